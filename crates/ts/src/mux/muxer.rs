//! The multiplex scheduler (spec.md S4.6): owns the PAT stream and the
//! programs, drives one 188-byte [`Muxer::mux_step`] tick at a time, and
//! picks which stream's packet goes out next.

use std::time::Instant;

use crate::mux::ingest::{ElementaryStreamSource, EsStreamKind, SlConfig};
use crate::mux::rand::MuxRng;
use crate::mux::section::{self, TABLE_ID_PAT, TABLE_ID_PMT};
use crate::mux::stream::{PcrAnchor, PesVariant, ProcessContext, ProcessOutcome, Stream, StreamBody};
use crate::mux::time::MuxTime;
use crate::pat::{Pat, PatProgram};
use crate::pmt::{Pmt, PmtStream, StreamType};
use crate::Result;

/// PAT/PMT carousel period used when a caller leaves the configured refresh
/// rate at 0 (spec.md S3 "refresh_rate_ms"); GPAC-derived muxers commonly
/// repeat the PAT faster than the PMT since it is cheaper to resend.
const DEFAULT_PAT_REFRESH_MS: u32 = 100;
const DEFAULT_PMT_REFRESH_MS: u32 = 400;
/// Minimum wall-... spacing between PCR insertions on a program's PCR
/// stream (spec.md S3 "last_pcr, last_sys_clock"); measured in mux time
/// rather than the real wall clock so output is deterministic and testable
/// outside real-time mode (see DESIGN.md "PCR throttle clock").
const PCR_MIN_SPACING_MS: u64 = 200;

/// Top-level mux configuration (spec.md S3 `Muxer` scalar fields).
#[derive(Debug, Clone)]
pub struct MuxConfig {
    /// Target bits/s; 0 means variable-rate (no NULL stuffing).
    pub bit_rate: u32,
    /// Pace emission to the wall clock instead of draining as fast as possible.
    pub real_time: bool,
    pub ts_id: u16,
    /// Carry MPEG-4 IOD in PMT and wrap media in SL-PES/SL-sections.
    pub mpeg4_signaling: bool,
    /// PAT carousel period; 0 uses [`DEFAULT_PAT_REFRESH_MS`].
    pub pat_refresh_rate_ms: u32,
    /// Seed for the deterministic PCR-init PRNG (spec.md S9).
    pub rng_seed: u64,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            bit_rate: 0,
            real_time: false,
            ts_id: 1,
            mpeg4_signaling: false,
            pat_refresh_rate_ms: 0,
            rng_seed: 0x5EED,
        }
    }
}

/// Per-program configuration (spec.md S3 `Program` scalar fields).
#[derive(Debug, Clone)]
pub struct ProgramConfig {
    pub number: u16,
    pub pmt_pid: u16,
    /// PMT carousel period; 0 uses [`DEFAULT_PMT_REFRESH_MS`].
    pub pmt_refresh_rate_ms: u32,
    /// Raw MPEG-4 Initial Object Descriptor bytes, carried verbatim in the
    /// PMT's program_info loop when [`MuxConfig::mpeg4_signaling`] is set.
    pub iod: Option<Vec<u8>>,
}

/// One program: its PMT stream, PCR designation, and elementary streams.
pub struct Program {
    pub number: u16,
    pub pmt: Stream,
    /// Index into `streams` of the stream currently supplying PCR for this
    /// program (spec.md S3: video preferred, else first audio).
    pub pcr_stream_idx: Option<usize>,
    pub pcr_anchor: PcrAnchor,
    last_pcr: Option<u64>,
    last_pcr_mux_time: Option<MuxTime>,
    pub iod: Option<Vec<u8>>,
    pub streams: Vec<Stream>,
    pmt_dirty: bool,
}

impl Program {
    fn is_video_stream(&self, idx: usize) -> bool {
        self.streams[idx]
            .source
            .as_ref()
            .map(|s| s.stream_kind() == EsStreamKind::Video)
            .unwrap_or(false)
    }

    /// spec.md S3 "pcr (the Stream designated as PCR source; video
    /// preferred, else first audio)". Scene/object-descriptor streams never
    /// carry PCR.
    fn designate_pcr_if_needed(&mut self, idx: usize, kind: EsStreamKind) {
        let should_take_over = match kind {
            EsStreamKind::Video => !matches!(self.pcr_stream_idx, Some(cur) if self.is_video_stream(cur)),
            EsStreamKind::Audio => self.pcr_stream_idx.is_none(),
            EsStreamKind::Scene | EsStreamKind::ObjectDescriptor => false,
        };
        if !should_take_over {
            return;
        }
        if let Some(prev) = self.pcr_stream_idx {
            if let StreamBody::Pes(b) = &mut self.streams[prev].body {
                b.is_pcr = false;
            }
        }
        self.pcr_stream_idx = Some(idx);
        if let StreamBody::Pes(b) = &mut self.streams[idx].body {
            b.is_pcr = true;
        }
        tracing::debug!(program = self.number, pid = self.streams[idx].pid, "designated PCR stream");
    }

    /// True once `PCR_MIN_SPACING_MS` of mux time has elapsed since the
    /// last PCR sample on this program (spec.md S3 "throttle PCR
    /// re-insertion to <=200 ms").
    fn pcr_due(&self, now: MuxTime) -> bool {
        match self.last_pcr_mux_time {
            None => true,
            Some(last) => now.as_millis().saturating_sub(last.as_millis()) >= PCR_MIN_SPACING_MS,
        }
    }
}

/// Result of one [`Muxer::mux_step`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// 188 bytes ready to hand to a sink.
    Packet([u8; 188]),
    /// Nothing to emit yet (VBR starvation, or real-time pacing not due).
    Idle,
    /// Every elementary stream has reported end-of-stream and fully drained.
    Eos,
}

#[derive(Debug, Clone, Copy)]
enum CandidateKind {
    Pat,
    Pmt(usize),
    Es(usize, usize),
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    time: MuxTime,
    /// Lower wins ties: PAT(0) before PMT(1) before ES(2) (spec.md S4.6 step 2).
    priority: u8,
    kind: CandidateKind,
}

/// The multiplexer: owns the PAT stream and an ordered list of programs,
/// and exposes [`Muxer::mux_step`] as the sole driving entry point.
pub struct Muxer {
    pub bit_rate: u32,
    pub real_time: bool,
    pub ts_id: u16,
    pub mpeg4_signaling: bool,
    pub time: MuxTime,
    pub tot_pck_sent: u64,
    pub tot_pad_sent: u64,
    pub pat: Stream,
    pub programs: Vec<Program>,
    null_pck: [u8; 188],
    rng: MuxRng,
    pat_dirty: bool,
    init_sys_time: Option<Instant>,
    init_ts_time: MuxTime,
    /// 500ms rolling average bitrate, only maintained in real-time mode
    /// (spec.md S4.6 step 5).
    pub avg_bit_rate: u32,
    avg_window_start: Option<Instant>,
    avg_window_bytes: u64,
    /// Set when any stream's estimated bit rate (spec.md S4.3 step 9) changes
    /// during a `mux_step`. This core's own scheduling never reads a
    /// estimated `Stream::bit_rate` back (PMT/PAT sizing and PCR math only
    /// use `Muxer::bit_rate`, the configured mux-wide rate); the flag exists
    /// so an external caller that cares about a specific ES's rate (e.g. to
    /// rebuild a sink's own rate-dependent buffering) can poll
    /// [`Muxer::take_needs_reconfig`] after each step rather than diffing
    /// `Stream::bit_rate` itself every tick.
    pub needs_reconfig: bool,
}

impl Muxer {
    pub fn new(config: MuxConfig) -> Self {
        let pat_refresh = if config.pat_refresh_rate_ms == 0 { DEFAULT_PAT_REFRESH_MS } else { config.pat_refresh_rate_ms };
        Self {
            bit_rate: config.bit_rate,
            real_time: config.real_time,
            ts_id: config.ts_id,
            mpeg4_signaling: config.mpeg4_signaling,
            time: MuxTime::ZERO,
            tot_pck_sent: 0,
            tot_pad_sent: 0,
            pat: Stream::new_pat(pat_refresh),
            programs: Vec::new(),
            null_pck: section::null_packet(),
            rng: MuxRng::new(config.rng_seed),
            pat_dirty: true,
            init_sys_time: None,
            init_ts_time: MuxTime::ZERO,
            avg_bit_rate: 0,
            avg_window_start: None,
            avg_window_bytes: 0,
            needs_reconfig: false,
        }
    }

    /// Registers a new program; marks the PAT for a rebuild on the next tick.
    pub fn add_program(&mut self, config: ProgramConfig) -> usize {
        let pmt_refresh = if config.pmt_refresh_rate_ms == 0 { DEFAULT_PMT_REFRESH_MS } else { config.pmt_refresh_rate_ms };
        let program = Program {
            number: config.number,
            pmt: Stream::new_pmt(config.pmt_pid, pmt_refresh),
            pcr_stream_idx: None,
            pcr_anchor: PcrAnchor::default(),
            last_pcr: None,
            last_pcr_mux_time: None,
            iod: config.iod,
            streams: Vec::new(),
            pmt_dirty: true,
        };
        self.programs.push(program);
        self.pat_dirty = true;
        tracing::debug!(program = config.number, pmt_pid = config.pmt_pid, "program added");
        self.programs.len() - 1
    }

    /// Adds a PES-carried elementary stream (video, audio, or an
    /// MPEG-4-signaled private stream wrapped per `variant`). Designates
    /// this stream as the program's PCR source per spec.md S3 if it
    /// qualifies, and marks the program's PMT dirty.
    #[allow(clippy::too_many_arguments)]
    pub fn add_pes_stream(
        &mut self,
        program_idx: usize,
        pid: u16,
        mpeg2_stream_type: StreamType,
        mpeg2_stream_id: u8,
        variant: PesVariant,
        ts_scale_num: u32,
        ts_scale_den: u32,
        source: Box<dyn ElementaryStreamSource>,
    ) -> usize {
        let kind = source.stream_kind();
        let stream = Stream::new_pes(pid, mpeg2_stream_type, mpeg2_stream_id, variant, ts_scale_num, ts_scale_den, source);
        let program = &mut self.programs[program_idx];
        program.streams.push(stream);
        let idx = program.streams.len() - 1;
        program.designate_pcr_if_needed(idx, kind);
        program.pmt_dirty = true;
        idx
    }

    /// Adds an MPEG-4 BIFS/OD elementary stream carried in its own
    /// SL-wrapped section carousel (spec.md S4.2 `update_table_mpeg4`).
    pub fn add_mpeg4_section_stream(
        &mut self,
        program_idx: usize,
        pid: u16,
        table_id: u8,
        repeat_rate_ms: u32,
        sl_config: SlConfig,
        source: Box<dyn ElementaryStreamSource>,
    ) -> usize {
        let stream = Stream::new_mpeg4_section(pid, table_id, repeat_rate_ms, sl_config, source);
        let program = &mut self.programs[program_idx];
        program.streams.push(stream);
        program.pmt_dirty = true;
        program.streams.len() - 1
    }

    fn all_es_done(&self) -> bool {
        self.programs.iter().all(|p| p.streams.iter().all(|s| s.is_eos()))
    }

    /// Reads and clears the flag set when any stream's estimated bit rate
    /// changed during a `mux_step` (spec.md S4.3 step 9).
    pub fn take_needs_reconfig(&mut self) -> bool {
        std::mem::take(&mut self.needs_reconfig)
    }

    /// Rebuilds the PAT table if dirty; returns whether it is due to emit
    /// on this tick (spec.md S4.6 step 1).
    fn refresh_pat(&mut self) -> Result<bool> {
        if self.pat_dirty {
            let programs: Vec<PatProgram> =
                self.programs.iter().map(|p| PatProgram { program_number: p.number, pmt_pid: p.pmt.pid }).collect();
            let payload = Pat::program_loop_payload(&programs);
            let StreamBody::Section(body) = &mut self.pat.body else { unreachable!("PAT is always section-bodied") };
            body.state.update_table(TABLE_ID_PAT, self.ts_id, &payload, true, false, true)?;
            self.pat.time = self.time;
            self.pat_dirty = false;
            tracing::debug!(version = body.state.tables[0].version, programs = programs.len(), "PAT rebuilt");
        }
        let StreamBody::Section(body) = &self.pat.body else { unreachable!() };
        Ok(body.state.has_pending_data() && self.pat.time <= self.time)
    }

    /// Rebuilds program `pi`'s PMT if dirty; returns whether it is due to
    /// emit on this tick (spec.md S4.6 step 1).
    fn refresh_pmt(&mut self, pi: usize) -> Result<bool> {
        let program = &mut self.programs[pi];
        if program.pmt_dirty {
            let mut program_info = Vec::new();
            if self.mpeg4_signaling {
                if let Some(iod) = &program.iod {
                    program_info.extend(crate::pmt::iod_descriptor(iod));
                }
            }
            let pcr_pid = program.pcr_stream_idx.map(|i| program.streams[i].pid).unwrap_or(crate::packet::PID_NULL);

            let mut pmt_streams = Vec::with_capacity(program.streams.len());
            for s in &program.streams {
                let mut es_info = Vec::new();
                if self.mpeg4_signaling {
                    if let Some(source) = &s.source {
                        es_info.extend(crate::pmt::sl_descriptor(source.stream_id()));
                    }
                }
                let stream_type = s.mpeg2_stream_type.unwrap_or(StreamType::Unknown(0));
                pmt_streams.push(PmtStream { stream_type, elementary_pid: s.pid, es_info });
            }

            let payload = Pmt::payload(pcr_pid, &program_info, &pmt_streams);
            let StreamBody::Section(body) = &mut program.pmt.body else { unreachable!("PMT is always section-bodied") };
            body.state.update_table(TABLE_ID_PMT, program.number, &payload, true, false, true)?;
            if body.state.tables[0].sections.len() > 1 {
                tracing::warn!(
                    program = program.number,
                    sections = body.state.tables[0].sections.len(),
                    "PMT did not fit in a single section (spec.md S3 invariant violated)"
                );
            }
            program.pmt.time = self.time;
            program.pmt_dirty = false;
            tracing::debug!(program = program.number, version = body.state.tables[0].version, "PMT rebuilt");
        }
        let StreamBody::Section(body) = &program.pmt.body else { unreachable!() };
        Ok(body.state.has_pending_data() && program.pmt.time <= self.time)
    }

    /// spec.md S4.6 real-time pacing: on first call, anchor `init_sys_time`/
    /// `init_ts_time`; afterwards compare elapsed wall-clock time against
    /// how far `mux.time` has advanced, and hold back emission if `mux.time`
    /// is running ahead of the wall clock.
    fn real_time_ready(&mut self) -> bool {
        let now = Instant::now();
        let init_sys = *self.init_sys_time.get_or_insert_with(|| {
            self.init_ts_time = self.time;
            now
        });
        let elapsed_ms = now.duration_since(init_sys).as_millis() as u64;
        let mut target = self.init_ts_time;
        target.inc(elapsed_ms, 1000);
        target >= self.time
    }

    fn update_avg_bitrate(&mut self) {
        if !self.real_time {
            return;
        }
        let now = Instant::now();
        let start = *self.avg_window_start.get_or_insert(now);
        self.avg_window_bytes += 188;
        let elapsed_ms = now.duration_since(start).as_millis() as u64;
        if elapsed_ms >= 500 {
            self.avg_bit_rate = ((self.avg_window_bytes * 8 * 1000) / elapsed_ms) as u32;
            self.avg_window_start = Some(now);
            self.avg_window_bytes = 0;
        }
    }

    /// Drives one 188-byte tick of the mux (spec.md S2/S4.6). Returns
    /// [`StepOutcome::Packet`] with the emitted bytes, [`StepOutcome::Idle`]
    /// if nothing is due yet, or [`StepOutcome::Eos`] once every elementary
    /// stream is drained and over.
    pub fn mux_step(&mut self) -> Result<StepOutcome> {
        if self.real_time && !self.real_time_ready() {
            return Ok(StepOutcome::Idle);
        }

        let pat_due = self.refresh_pat()?;
        let mut candidates = Vec::new();
        if pat_due {
            candidates.push(Candidate { time: self.pat.time, priority: 0, kind: CandidateKind::Pat });
        }

        let num_programs = self.programs.len();
        for pi in 0..num_programs {
            let pmt_due = self.refresh_pmt(pi)?;
            if pmt_due {
                candidates.push(Candidate { time: self.programs[pi].pmt.time, priority: 1, kind: CandidateKind::Pmt(pi) });
            }
        }

        let ctx = ProcessContext { mux_time: self.time, tot_pck_sent: self.tot_pck_sent, mux_bit_rate: self.bit_rate };
        let programs = &mut self.programs;
        let rng = &mut self.rng;
        let mut any_reconfig = false;
        for (pi, program) in programs.iter_mut().enumerate() {
            for si in 0..program.streams.len() {
                let stream = &mut program.streams[si];
                let is_pes = matches!(&stream.body, StreamBody::Pes(_));
                let outcome = if is_pes {
                    stream.process_pes(&ctx, &mut program.pcr_anchor, rng)?
                } else {
                    stream.process_section_es(&ctx)?
                };
                if outcome == ProcessOutcome::Scheduled {
                    candidates.push(Candidate { time: stream.time, priority: 2, kind: CandidateKind::Es(pi, si) });
                }
                any_reconfig |= stream.take_bitrate_reconfig();
            }
        }
        self.needs_reconfig |= any_reconfig;

        if candidates.is_empty() {
            if self.all_es_done() {
                return Ok(StepOutcome::Eos);
            }
            if self.bit_rate > 0 {
                self.tot_pck_sent += 1;
                self.tot_pad_sent += 1;
                self.time.inc_packet(self.bit_rate as u64);
                self.update_avg_bitrate();
                return Ok(StepOutcome::Packet(self.null_pck));
            }
            return Ok(StepOutcome::Idle);
        }

        candidates.sort_by(|a, b| a.time.cmp(&b.time).then(a.priority.cmp(&b.priority)));
        let winner = candidates[0];
        let packet = self.emit(winner)?;
        self.tot_pck_sent += 1;
        if self.bit_rate > 0 {
            self.time.inc_packet(self.bit_rate as u64);
        }
        self.update_avg_bitrate();
        Ok(StepOutcome::Packet(packet))
    }

    fn emit(&mut self, candidate: Candidate) -> Result<[u8; 188]> {
        match candidate.kind {
            CandidateKind::Pat => {
                let StreamBody::Section(body) = &mut self.pat.body else { unreachable!() };
                let pkt = body.state.next_packet(self.pat.pid, &mut self.pat.continuity_counter)?;
                if body.state.just_wrapped {
                    self.pat.time.inc(self.pat.refresh_rate_ms as u64, 1000);
                }
                tracing::trace!(pid = self.pat.pid, cc = self.pat.continuity_counter, "emitted PAT packet");
                Ok(pkt)
            }
            CandidateKind::Pmt(pi) => {
                let program = &mut self.programs[pi];
                let StreamBody::Section(body) = &mut program.pmt.body else { unreachable!() };
                let pkt = body.state.next_packet(program.pmt.pid, &mut program.pmt.continuity_counter)?;
                if body.state.just_wrapped {
                    program.pmt.time.inc(program.pmt.refresh_rate_ms as u64, 1000);
                }
                tracing::trace!(pid = program.pmt.pid, cc = program.pmt.continuity_counter, "emitted PMT packet");
                Ok(pkt)
            }
            CandidateKind::Es(pi, si) => self.emit_es(pi, si),
        }
    }

    /// Reads the PCR-anchor scalars and the PCR-due throttle into locals
    /// before taking a mutable borrow of the stream itself, so the
    /// PCR-bookkeeping writeback afterwards does not fight the borrow
    /// checker over disjoint fields of `program` held live inside the match.
    fn emit_es(&mut self, pi: usize, si: usize) -> Result<[u8; 188]> {
        let bit_rate = self.bit_rate;
        let tot_pck_sent = self.tot_pck_sent;
        let mux_time = self.time;
        let program = &mut self.programs[pi];

        let pcr_init_time = program.pcr_anchor.pcr_init_time;
        let num_pck_at_pcr_init = program.pcr_anchor.num_pck_at_pcr_init;
        let pcr_due = program.pcr_due(mux_time);

        let stream = &mut program.streams[si];
        let (pkt, new_pcr) = match &mut stream.body {
            StreamBody::Pes(body) => {
                let at_au_start = body.cursor.at_au_start();
                let need_pcr = body.is_pcr && at_au_start && pcr_init_time.is_some() && pcr_due;

                let pcr = need_pcr
                    .then(|| pcr_value(pcr_init_time.expect("checked by need_pcr"), tot_pck_sent, num_pck_at_pcr_init, bit_rate));

                let rap = body.current_au_rap;
                let pcr_field = pcr.map(|p| (p / 300, (p % 300) as u16));
                let pkt = body.cursor.next_packet(stream.pid, &mut stream.continuity_counter, pcr_field, rap)?;
                if let Some(p) = pcr {
                    tracing::debug!(pid = stream.pid, pcr = p, "inserted PCR");
                }
                tracing::trace!(pid = stream.pid, cc = stream.continuity_counter, "emitted PES packet");
                (pkt, pcr)
            }
            StreamBody::Section(body) => {
                let pkt = body.state.next_packet(stream.pid, &mut stream.continuity_counter)?;
                if body.state.just_wrapped {
                    stream.time.inc(stream.refresh_rate_ms as u64, 1000);
                }
                tracing::trace!(pid = stream.pid, cc = stream.continuity_counter, "emitted section packet");
                (pkt, None)
            }
        };

        if let Some(pcr) = new_pcr {
            program.last_pcr = Some(pcr);
            program.last_pcr_mux_time = Some(mux_time);
        }
        Ok(pkt)
    }
}

/// spec.md S4.3 "PCR value": `27_000_000 * (tot_pck_sent - num_pck_at_pcr_init)
/// * 1504 / mux.bit_rate + pcr_init_time`, in 27MHz units.
fn pcr_value(pcr_init_time: u64, tot_pck_sent: u64, num_pck_at_pcr_init: u64, mux_bit_rate: u32) -> u64 {
    if mux_bit_rate == 0 {
        return pcr_init_time;
    }
    let delta_pck = tot_pck_sent.saturating_sub(num_pck_at_pcr_init) as u128;
    let elapsed_27mhz = 27_000_000u128 * delta_pck * 1504 / mux_bit_rate as u128;
    elapsed_27mhz as u64 + pcr_init_time
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mux::ingest::{AU_END, AU_RAP, AU_START, CAP_AU_PULL, CAP_STREAM_IS_OVER};
    use crate::mux::stream::PesVariant;
    use crate::TsPacket;

    struct QueueSource {
        kind: EsStreamKind,
        aus: std::collections::VecDeque<crate::mux::ingest::AccessUnit>,
        bit_rate: u32,
        over: bool,
    }

    impl ElementaryStreamSource for QueueSource {
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
            let mut caps = CAP_AU_PULL;
            if self.over && self.aus.is_empty() {
                caps |= CAP_STREAM_IS_OVER;
            }
            caps
        }
        fn pull_access_unit(&mut self) -> Option<crate::mux::ingest::AccessUnit> {
            self.aus.pop_front()
        }
    }

    fn single_video_au(data: Vec<u8>) -> crate::mux::ingest::AccessUnit {
        crate::mux::ingest::AccessUnit { data, cts: 0, dts: 0, flags: AU_START | AU_END | AU_RAP }
    }

    /// spec.md S8 scenario 1: single program, single video ES, fixed rate.
    #[test]
    fn single_video_program_emits_pat_pmt_then_pes() {
        let mut muxer = Muxer::new(MuxConfig { bit_rate: 1_000_000, ..Default::default() });
        let program = muxer.add_program(ProgramConfig { number: 1, pmt_pid: 0x100, pmt_refresh_rate_ms: 0, iod: None });
        let source = QueueSource {
            kind: EsStreamKind::Video,
            aus: std::collections::VecDeque::from([single_video_au(vec![0xAB; 1000])]),
            bit_rate: 1_000_000,
            over: true,
        };
        muxer.add_pes_stream(program, 0x101, StreamType::H264, 0xE0, PesVariant::Plain, 90_000, 90_000, Box::new(source));

        let mut pids = Vec::new();
        let mut packets = 0;
        loop {
            match muxer.mux_step().unwrap() {
                StepOutcome::Packet(pkt) => {
                    assert_eq!(pkt[0], 0x47);
                    let parsed = TsPacket::parse(&pkt).unwrap();
                    pids.push(parsed.pid);
                    packets += 1;
                    if packets > 20 {
                        break;
                    }
                }
                StepOutcome::Eos => break,
                StepOutcome::Idle => break,
            }
        }

        assert!(pids.contains(&crate::packet::PID_PAT));
        assert!(pids.contains(&0x100)); // PMT
        assert!(pids.contains(&0x101)); // video PES
        // 1000-byte AU + 14-byte PES header across 184-byte payloads = 6 packets.
        assert!(pids.iter().filter(|&&p| p == 0x101).count() >= 6);
    }

    #[test]
    fn pcr_is_only_carried_on_the_designated_program_stream() {
        let mut muxer = Muxer::new(MuxConfig { bit_rate: 1_000_000, ..Default::default() });
        let program = muxer.add_program(ProgramConfig { number: 1, pmt_pid: 0x100, pmt_refresh_rate_ms: 0, iod: None });
        let video = QueueSource {
            kind: EsStreamKind::Video,
            aus: std::collections::VecDeque::from([single_video_au(vec![0xCD; 400])]),
            bit_rate: 1_000_000,
            over: true,
        };
        muxer.add_pes_stream(program, 0x101, StreamType::H264, 0xE0, PesVariant::Plain, 90_000, 90_000, Box::new(video));

        let mut saw_pcr = false;
        for _ in 0..20 {
            if let StepOutcome::Packet(pkt) = muxer.mux_step().unwrap() {
                let parsed = TsPacket::parse(&pkt).unwrap();
                if parsed.pid == 0x101 && parsed.has_adaptation_field() {
                    let af = parsed.adaptation_field.unwrap();
                    if af.len() > 1 && af[0] & 0x10 != 0 {
                        saw_pcr = true;
                    }
                }
            }
        }
        assert!(saw_pcr, "expected at least one PCR-bearing packet on the video PID");
    }

    #[test]
    fn vbr_mux_never_emits_null_packets() {
        let mut muxer = Muxer::new(MuxConfig { bit_rate: 0, ..Default::default() });
        let program = muxer.add_program(ProgramConfig { number: 1, pmt_pid: 0x100, pmt_refresh_rate_ms: 0, iod: None });
        let source = QueueSource {
            kind: EsStreamKind::Video,
            aus: std::collections::VecDeque::from([single_video_au(vec![0x01; 50])]),
            bit_rate: 500_000,
            over: true,
        };
        muxer.add_pes_stream(program, 0x101, StreamType::H264, 0xE0, PesVariant::Plain, 90_000, 90_000, Box::new(source));

        let mut saw_null = false;
        let mut iterations = 0;
        loop {
            iterations += 1;
            if iterations > 50 {
                break;
            }
            match muxer.mux_step().unwrap() {
                StepOutcome::Packet(pkt) => {
                    if pkt[1] & 0x1F == 0x1F && pkt[2] == 0xFF {
                        saw_null = true;
                    }
                }
                StepOutcome::Eos => break,
                StepOutcome::Idle => continue,
            }
        }
        assert!(!saw_null, "VBR mux (bit_rate=0) must never emit NULL stuffing packets");
    }

    #[test]
    fn eos_is_reported_once_every_stream_drains() {
        let mut muxer = Muxer::new(MuxConfig { bit_rate: 1_000_000, ..Default::default() });
        let program = muxer.add_program(ProgramConfig { number: 1, pmt_pid: 0x100, pmt_refresh_rate_ms: 0, iod: None });
        let source =
            QueueSource { kind: EsStreamKind::Video, aus: std::collections::VecDeque::new(), bit_rate: 1_000_000, over: true };
        muxer.add_pes_stream(program, 0x101, StreamType::H264, 0xE0, PesVariant::Plain, 90_000, 90_000, Box::new(source));

        let mut saw_eos = false;
        for _ in 0..10 {
            if let StepOutcome::Eos = muxer.mux_step().unwrap() {
                saw_eos = true;
                break;
            }
        }
        assert!(saw_eos);
    }

    #[test]
    fn needs_reconfig_is_set_when_an_estimated_bit_rate_changes() {
        let mut muxer = Muxer::new(MuxConfig { bit_rate: 1_000_000, ..Default::default() });
        let program = muxer.add_program(ProgramConfig { number: 1, pmt_pid: 0x100, pmt_refresh_rate_ms: 0, iod: None });
        let aus = std::collections::VecDeque::from([
            crate::mux::ingest::AccessUnit { data: vec![0xAB; 1000], cts: 0, dts: 0, flags: AU_START | AU_END | AU_RAP },
            crate::mux::ingest::AccessUnit {
                data: vec![0xAB; 1000],
                cts: 100_000,
                dts: 100_000,
                flags: AU_START | AU_END | AU_RAP,
            },
        ]);
        // bit_rate: 0 means the ingest declares no rate, so the scheduler must
        // estimate it (spec.md S4.3 step 9) instead of trusting a fixed value.
        let source = QueueSource { kind: EsStreamKind::Video, aus, bit_rate: 0, over: true };
        muxer.add_pes_stream(program, 0x101, StreamType::H264, 0xE0, PesVariant::Plain, 90_000, 90_000, Box::new(source));

        let mut saw_reconfig = false;
        for _ in 0..40 {
            match muxer.mux_step().unwrap() {
                StepOutcome::Eos => break,
                StepOutcome::Idle => continue,
                StepOutcome::Packet(_) => {}
            }
            if muxer.take_needs_reconfig() {
                saw_reconfig = true;
            }
        }
        assert!(saw_reconfig, "expected needs_reconfig to be set once the estimator closed its first window");
    }

    #[test]
    fn two_programs_each_get_their_own_pat_entry_and_pmt() {
        let mut muxer = Muxer::new(MuxConfig { bit_rate: 2_000_000, ..Default::default() });
        let p1 = muxer.add_program(ProgramConfig { number: 1, pmt_pid: 0x100, pmt_refresh_rate_ms: 0, iod: None });
        let p2 = muxer.add_program(ProgramConfig { number: 2, pmt_pid: 0x200, pmt_refresh_rate_ms: 0, iod: None });
        for (program, pid) in [(p1, 0x101u16), (p2, 0x201u16)] {
            let source = QueueSource {
                kind: EsStreamKind::Audio,
                aus: std::collections::VecDeque::from([single_video_au(vec![0x22; 64])]),
                bit_rate: 200_000,
                over: true,
            };
            muxer.add_pes_stream(program, pid, StreamType::AdtsAac, 0xC0, PesVariant::Plain, 90_000, 90_000, Box::new(source));
        }

        muxer.refresh_pat().unwrap();
        let StreamBody::Section(body) = &muxer.pat.body else { unreachable!() };
        let section = &body.state.tables[0].sections[0];
        let parsed = Pat::parse(section).unwrap();
        assert_eq!(parsed.programs.len(), 2);
        assert_eq!(parsed.get_pmt_pid(1), Some(0x100));
        assert_eq!(parsed.get_pmt_pid(2), Some(0x200));
    }
}
