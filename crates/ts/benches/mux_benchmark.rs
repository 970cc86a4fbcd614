use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use ts::mux::{AccessUnit, AU_END, AU_RAP, AU_START, CAP_AU_PULL, ElementaryStreamSource, EsStreamKind, MuxConfig, Muxer, PesVariant, ProgramConfig, SlConfig, StepOutcome};
use ts::pat::{Pat, PatProgram};
use ts::pmt::{Pmt, PmtStream, StreamType};

fn benchmark_section_generation(c: &mut Criterion) {
    let mut group = c.benchmark_group("Section Generation");

    let programs = vec![
        PatProgram { program_number: 1, pmt_pid: 0x100 },
        PatProgram { program_number: 2, pmt_pid: 0x200 },
    ];
    group.bench_function("PAT payload", |b| {
        b.iter(|| black_box(Pat::program_loop_payload(black_box(&programs))))
    });

    let streams = vec![
        PmtStream { stream_type: StreamType::H264, elementary_pid: 0x101, es_info: Vec::new() },
        PmtStream { stream_type: StreamType::AdtsAac, elementary_pid: 0x102, es_info: Vec::new() },
    ];
    group.bench_function("PMT payload", |b| {
        b.iter(|| black_box(Pmt::payload(black_box(0x101), black_box(&[]), black_box(&streams))))
    });

    group.finish();
}

struct RepeatingSource {
    kind: EsStreamKind,
    payload: Vec<u8>,
    bit_rate: u32,
    dts: u64,
}

impl ElementaryStreamSource for RepeatingSource {
    fn stream_id(&self) -> u16 {
        1
    }
    fn stream_kind(&self) -> EsStreamKind {
        self.kind
    }
    fn object_type_indication(&self) -> u8 {
        0
    }
    fn timescale(&self) -> u32 {
        90_000
    }
    fn bit_rate(&self) -> u32 {
        self.bit_rate
    }
    fn decoder_config(&self) -> &[u8] {
        &[]
    }
    fn repeat_rate_ms(&self) -> u32 {
        0
    }
    fn sl_config(&self) -> Option<SlConfig> {
        None
    }
    fn caps(&self) -> u32 {
        CAP_AU_PULL
    }
    fn pull_access_unit(&mut self) -> Option<AccessUnit> {
        self.dts += 3000;
        Some(AccessUnit { data: self.payload.clone(), cts: self.dts, dts: self.dts, flags: AU_START | AU_END | AU_RAP })
    }
}

fn benchmark_pes_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("PES Packetization Throughput");

    group.bench_function("single video program, 1 Mbps, 1200-byte frames", |b| {
        b.iter(|| {
            let mut muxer = Muxer::new(MuxConfig { bit_rate: 1_000_000, ..Default::default() });
            let program = muxer.add_program(ProgramConfig { number: 1, pmt_pid: 0x100, pmt_refresh_rate_ms: 0, iod: None });
            let source = RepeatingSource { kind: EsStreamKind::Video, payload: vec![0xAB; 1200], bit_rate: 1_000_000, dts: 0 };
            muxer.add_pes_stream(program, 0x101, StreamType::H264, 0xE0, PesVariant::Plain, 90_000, 90_000, Box::new(source));

            let mut packets = 0;
            while packets < 2000 {
                match muxer.mux_step().unwrap() {
                    StepOutcome::Packet(pkt) => {
                        black_box(pkt);
                        packets += 1;
                    }
                    StepOutcome::Idle => break,
                    StepOutcome::Eos => break,
                }
            }
        })
    });

    group.finish();
}

criterion_group!(benches, benchmark_section_generation, benchmark_pes_throughput);
criterion_main!(benches);
