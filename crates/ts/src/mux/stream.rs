//! The polymorphic per-PID packetization automaton (spec.md S3, S9
//! "Polymorphic Stream"): PAT, PMT and MPEG-4-systems section streams are
//! drained through [`SectionState`]; video/audio/MPEG-4-SL-PES streams are
//! drained through [`PesCursor`]. Both share the outer scheduling fields
//! (`pid`, `continuity_counter`, `time`, `refresh_rate_ms`, `bit_rate`).

use aac::PartialAudioSpecificConfig;

use crate::mux::ingest::{AccessUnit, CAP_STREAM_IS_OVER, ElementaryStreamSource, HAS_DTS, SlConfig};
use crate::mux::latm::wrap_latm;
use crate::mux::pes::{PesCursor, PesHeader};
use crate::mux::section::SectionState;
use crate::mux::sl::SlHeader;
use crate::mux::time::MuxTime;
use crate::pmt::StreamType;
use crate::Result;

/// How a PES-carried elementary stream's access units are wrapped before
/// going into the PES payload.
pub enum PesVariant {
    /// Raw AU bytes, unwrapped (MPEG-2/H.264/H.265 video, PCM-ish audio).
    Plain,
    /// LATM-wrapped AAC (spec.md S4.5).
    AacLatm { asc: PartialAudioSpecificConfig, repeat_rate_ms: u32, last_config_time: Option<MuxTime> },
    /// SL-wrapped MPEG-4 private stream carried in PES (spec.md S4.4).
    Mpeg4SlPes { sl_config: SlConfig },
}

/// Accumulates byte counts over ~1-second DTS windows to estimate a stream's
/// bit rate when the ingest does not declare one (spec.md S4.3 step 9).
#[derive(Debug, Clone, Copy, Default)]
pub struct BitrateEstimator {
    window_start_dts: Option<u64>,
    window_bytes: u64,
    pub estimate: u32,
}

impl BitrateEstimator {
    /// Folds in one more AU; returns whether this observation changed
    /// `estimate` (spec.md S4.3 step 9: "on change, set
    /// `mux.needs_reconfig = true`" — the caller is responsible for raising
    /// that flag, since this type has no visibility into the owning `Muxer`).
    fn observe(&mut self, dts_90k: u64, bytes: usize) -> bool {
        match self.window_start_dts {
            None => {
                self.window_start_dts = Some(dts_90k);
                self.window_bytes = bytes as u64;
                false
            }
            Some(start) => {
                self.window_bytes += bytes as u64;
                let elapsed_ticks = dts_90k.saturating_sub(start);
                if elapsed_ticks >= 90_000 {
                    let elapsed_ms = elapsed_ticks * 1000 / 90_000;
                    let mut changed = false;
                    if elapsed_ms > 0 {
                        let new_estimate = ((self.window_bytes * 8 * 1000) / elapsed_ms) as u32;
                        changed = new_estimate != self.estimate;
                        self.estimate = new_estimate;
                    }
                    self.window_start_dts = Some(dts_90k);
                    self.window_bytes = 0;
                    changed
                } else {
                    false
                }
            }
        }
    }
}

/// State specific to PES-carried elementary streams.
pub struct PesBody {
    pub mpeg2_stream_type: StreamType,
    pub mpeg2_stream_id: u8,
    pub variant: PesVariant,
    /// Rescales the ingest's native timescale to the 90kHz system clock:
    /// `ticks_90k = ticks_native * ts_scale_num / ts_scale_den`.
    pub ts_scale_num: u32,
    pub ts_scale_den: u32,
    pub cursor: PesCursor,
    pub is_pcr: bool,
    pub initial_ts: Option<u64>,
    pub eos: bool,
    pub bitrate: BitrateEstimator,
    /// Whether the AU currently loaded into `cursor` was a random access
    /// point; read by the scheduler to set the adaptation field's RAI bit
    /// on the packet that starts this AU (spec.md S4.3 step 5).
    pub current_au_rap: bool,
    /// An AU already pulled from the ingest but held back because the
    /// program's PCR anchor was not yet initialized; retried before pulling
    /// a fresh one (spec.md S3: "other streams must not emit before this
    /// moment", not "must discard what they already pulled").
    pending_au: Option<AccessUnit>,
    /// Set when the last [`BitrateEstimator::observe`] call changed the
    /// estimate for a stream with no declared bit rate; consumed (and
    /// cleared) by [`Stream::take_bitrate_reconfig`] so the scheduler can
    /// fold it into `Muxer::needs_reconfig` (spec.md S4.3 step 9).
    needs_reconfig: bool,
}

/// State specific to section-carried streams: PAT, PMT, and MPEG-4
/// BIFS/OD elementary streams wrapped in SL before going into a section.
pub struct SectionBody {
    pub state: SectionState,
    /// `Some` only for MPEG-4 BIFS/OD ES (PAT/PMT are driven structurally,
    /// not from an ingest).
    pub mpeg4_table_id: Option<u8>,
    pub sl_config: SlConfig,
    pub eos: bool,
}

pub enum StreamBody {
    Section(SectionBody),
    Pes(PesBody),
}

/// One PID's worth of scheduling state plus its packetization body.
pub struct Stream {
    pub pid: u16,
    pub continuity_counter: u8,
    pub time: MuxTime,
    pub refresh_rate_ms: u32,
    pub bit_rate: u32,
    pub source: Option<Box<dyn ElementaryStreamSource>>,
    /// This stream's PMT-listed `stream_type`; `None` for PAT/PMT themselves,
    /// which are never listed as an ES in anyone's PMT.
    pub mpeg2_stream_type: Option<StreamType>,
    pub body: StreamBody,
}

/// Mux-global figures a stream's `process` step needs to read; passed in
/// rather than held by reference so `Program::tick` can iterate `streams`
/// mutably without fighting the borrow checker over `Muxer` fields.
#[derive(Debug, Clone, Copy)]
pub struct ProcessContext {
    pub mux_time: MuxTime,
    pub tot_pck_sent: u64,
    pub mux_bit_rate: u32,
}

/// The program-level PCR anchor (spec.md S3 `Program` fields
/// `pcr_init_time`/`ts_time_at_pcr_init`/`num_pck_at_pcr_init`), read and
/// (for the PCR stream, once) written by [`Stream::process_pes`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PcrAnchor {
    pub pcr_init_time: Option<u64>,
    pub ts_time_at_pcr_init: MuxTime,
    pub num_pck_at_pcr_init: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// `stream.time` now holds this stream's next scheduled emission.
    Scheduled,
    /// A non-PCR stream with data, waiting on the program's PCR stream to
    /// draw `pcr_init_time` first (spec.md S3 invariant).
    WaitingForProgramPcr,
    /// No AU currently available; not (yet) end of stream.
    Idle,
    /// Ingest exhausted and fully drained.
    Done,
}

fn rescale(value: u64, num: u32, den: u32) -> u64 {
    if den == 0 || num == den {
        return value;
    }
    (value as u128 * num as u128 / den as u128) as u64
}

impl Stream {
    pub fn new_pat(refresh_rate_ms: u32) -> Self {
        Self {
            pid: crate::packet::PID_PAT,
            continuity_counter: 0,
            time: MuxTime::ZERO,
            refresh_rate_ms,
            bit_rate: 0,
            source: None,
            mpeg2_stream_type: None,
            body: StreamBody::Section(SectionBody {
                state: SectionState::new(refresh_rate_ms),
                mpeg4_table_id: None,
                sl_config: SlConfig::default(),
                eos: false,
            }),
        }
    }

    pub fn new_pmt(pid: u16, refresh_rate_ms: u32) -> Self {
        Self {
            pid,
            continuity_counter: 0,
            time: MuxTime::ZERO,
            refresh_rate_ms,
            bit_rate: 0,
            source: None,
            mpeg2_stream_type: None,
            body: StreamBody::Section(SectionBody {
                state: SectionState::new(refresh_rate_ms),
                mpeg4_table_id: None,
                sl_config: SlConfig::default(),
                eos: false,
            }),
        }
    }

    pub fn new_pes(
        pid: u16,
        mpeg2_stream_type: StreamType,
        mpeg2_stream_id: u8,
        variant: PesVariant,
        ts_scale_num: u32,
        ts_scale_den: u32,
        source: Box<dyn ElementaryStreamSource>,
    ) -> Self {
        Self {
            pid,
            continuity_counter: 0,
            time: MuxTime::ZERO,
            refresh_rate_ms: 0,
            bit_rate: 0,
            source: Some(source),
            mpeg2_stream_type: Some(mpeg2_stream_type),
            body: StreamBody::Pes(PesBody {
                mpeg2_stream_type,
                mpeg2_stream_id,
                variant,
                ts_scale_num,
                ts_scale_den,
                cursor: PesCursor::default(),
                is_pcr: false,
                initial_ts: None,
                eos: false,
                bitrate: BitrateEstimator::default(),
                current_au_rap: false,
                pending_au: None,
                needs_reconfig: false,
            }),
        }
    }

    pub fn new_mpeg4_section(
        pid: u16,
        table_id: u8,
        repeat_rate_ms: u32,
        sl_config: SlConfig,
        source: Box<dyn ElementaryStreamSource>,
    ) -> Self {
        Self {
            pid,
            continuity_counter: 0,
            time: MuxTime::ZERO,
            refresh_rate_ms: repeat_rate_ms,
            bit_rate: 0,
            source: Some(source),
            mpeg2_stream_type: Some(StreamType::Mpeg4SlSections),
            body: StreamBody::Section(SectionBody {
                state: SectionState::new(repeat_rate_ms),
                mpeg4_table_id: Some(table_id),
                sl_config,
                eos: false,
            }),
        }
    }

    pub fn is_eos(&self) -> bool {
        match &self.body {
            StreamBody::Pes(p) => p.eos && !p.cursor.has_pending_data(),
            StreamBody::Section(s) => s.eos && !s.state.has_pending_data(),
        }
    }

    pub fn has_pending_data(&self) -> bool {
        match &self.body {
            StreamBody::Pes(p) => p.cursor.has_pending_data(),
            StreamBody::Section(s) => s.state.has_pending_data(),
        }
    }

    /// Reads and clears this stream's bitrate-changed flag (spec.md S4.3
    /// step 9). Section-carried streams never estimate a bit rate, so this
    /// is always `false` for them.
    pub fn take_bitrate_reconfig(&mut self) -> bool {
        match &mut self.body {
            StreamBody::Pes(p) => std::mem::take(&mut p.needs_reconfig),
            StreamBody::Section(_) => false,
        }
    }

    /// spec.md S4.3 "Stream `process` for PES". Pulls at most one AU per
    /// call; if the previously loaded PES packet is not fully drained yet,
    /// the existing schedule is kept untouched.
    pub fn process_pes(
        &mut self,
        ctx: &ProcessContext,
        anchor: &mut PcrAnchor,
        rng: &mut crate::mux::rand::MuxRng,
    ) -> Result<ProcessOutcome> {
        let StreamBody::Pes(body) = &mut self.body else {
            return Ok(ProcessOutcome::Idle);
        };

        if body.cursor.has_pending_data() {
            return Ok(ProcessOutcome::Scheduled);
        }

        let au = if let Some(au) = body.pending_au.take() {
            au
        } else {
            let Some(source) = self.source.as_mut() else {
                return Ok(ProcessOutcome::Idle);
            };
            match source.pull_access_unit() {
                Some(au) => au,
                None => {
                    if source.caps() & CAP_STREAM_IS_OVER != 0 {
                        body.eos = true;
                        return Ok(ProcessOutcome::Done);
                    }
                    return Ok(ProcessOutcome::Idle);
                }
            }
        };

        if anchor.pcr_init_time.is_none() {
            if !body.is_pcr {
                body.pending_au = Some(au);
                return Ok(ProcessOutcome::WaitingForProgramPcr);
            }
            // This is the program's PCR stream and it just produced its
            // first AU: draw the anchor now, anchored to the current mux
            // time and packet count (spec.md S3/S9, pcr_init_time notes).
            anchor.pcr_init_time = Some(rng.next_nonzero_pcr_base());
            anchor.ts_time_at_pcr_init = ctx.mux_time;
            anchor.num_pck_at_pcr_init = ctx.tot_pck_sent;
        }
        let pcr_init = anchor.pcr_init_time.expect("just initialized above if it was None");

        let rescaled_dts = rescale(au.dts, body.ts_scale_num, body.ts_scale_den);
        let rescaled_cts = rescale(au.cts, body.ts_scale_num, body.ts_scale_den);

        let backlog_ticks = if ctx.mux_bit_rate > 0 {
            90_000u64 * 1504 * ctx.tot_pck_sent.saturating_sub(anchor.num_pck_at_pcr_init) / ctx.mux_bit_rate as u64
        } else {
            0
        };
        let initial_ts = *body.initial_ts.get_or_insert_with(|| rescaled_dts.saturating_sub(backlog_ticks));

        let payload = Self::wrap_payload(body, &au, rescaled_cts, rescaled_dts, ctx.mux_time);

        let adjusted_dts = rescaled_dts.saturating_sub(initial_ts) + pcr_init / 300;
        let adjusted_cts = rescaled_cts.saturating_sub(initial_ts) + pcr_init / 300;
        let has_distinct_dts = au.flags & HAS_DTS != 0;

        let header = PesHeader {
            stream_id: body.mpeg2_stream_id,
            pts: Some(adjusted_cts),
            dts: if has_distinct_dts { Some(adjusted_dts) } else { None },
            data_alignment_indicator: true,
            random_access: au.is_rap(),
        };
        let pes_bytes = header.encode_packet(&payload);

        let lookback = if ctx.mux_bit_rate > 0 {
            let packets = pes_bytes.len().div_ceil(184) as u64;
            90_000u64 * 1504 * packets / ctx.mux_bit_rate as u64
        } else {
            0
        };
        let next_time = rescaled_dts.saturating_sub(initial_ts).saturating_sub(lookback);
        let mut scheduled = anchor.ts_time_at_pcr_init;
        scheduled.inc(next_time, 90_000);
        self.time = scheduled;

        let declared_bit_rate = self.source.as_ref().map(|s| s.bit_rate()).unwrap_or(0);
        if declared_bit_rate > 0 {
            self.bit_rate = declared_bit_rate;
        } else {
            if body.bitrate.observe(rescaled_dts, pes_bytes.len()) {
                body.needs_reconfig = true;
            }
            self.bit_rate = body.bitrate.estimate;
        }

        body.current_au_rap = au.is_rap();
        body.cursor.load(pes_bytes);
        Ok(ProcessOutcome::Scheduled)
    }

    fn wrap_payload(body: &mut PesBody, au: &AccessUnit, cts_90k: u64, dts_90k: u64, now: MuxTime) -> Vec<u8> {
        match &mut body.variant {
            PesVariant::Plain => au.data.clone(),
            PesVariant::AacLatm { asc, repeat_rate_ms, last_config_time } => {
                let (wrapped, sent_config) = wrap_latm(&au.data, asc, *repeat_rate_ms, *last_config_time, now);
                if sent_config {
                    *last_config_time = Some(now);
                }
                wrapped
            }
            PesVariant::Mpeg4SlPes { sl_config } => {
                let header = SlHeader {
                    access_unit_start: true,
                    access_unit_end: true,
                    random_access_point: au.is_rap(),
                    has_cts: true,
                    cts: cts_90k,
                    has_dts: au.flags & HAS_DTS != 0,
                    dts: dts_90k,
                    config: *sl_config,
                };
                let mut out = header.encode();
                out.extend_from_slice(&au.data);
                out
            }
        }
    }

    /// spec.md S4.2 `update_table_mpeg4` driven stream (BIFS/OD carried in
    /// sections): pulls one AU per call and re-wraps it as a fresh table
    /// version. Unlike PES streams this core schedules the next emission
    /// immediately (at `ctx.mux_time`) rather than from a DTS-derived
    /// lookahead — BIFS/OD carriage has no per-AU presentation timestamp
    /// requirement the way audio/video PES does.
    pub fn process_section_es(&mut self, ctx: &ProcessContext) -> Result<ProcessOutcome> {
        let StreamBody::Section(body) = &mut self.body else {
            return Ok(ProcessOutcome::Idle);
        };
        let Some(table_id) = body.mpeg4_table_id else {
            return Ok(ProcessOutcome::Idle);
        };

        if body.state.has_pending_data() {
            return Ok(ProcessOutcome::Scheduled);
        }

        let Some(source) = self.source.as_mut() else {
            return Ok(ProcessOutcome::Idle);
        };

        let au = match source.pull_access_unit() {
            Some(au) => au,
            None => {
                if source.caps() & CAP_STREAM_IS_OVER != 0 {
                    body.eos = true;
                    return Ok(ProcessOutcome::Done);
                }
                return Ok(ProcessOutcome::Idle);
            }
        };

        let header = SlHeader { random_access_point: au.is_rap(), config: body.sl_config, ..Default::default() };
        body.state.update_table_mpeg4(
            table_id,
            0,
            &au.data,
            &header,
            true,
            Some(self.refresh_rate_ms),
        )?;
        self.time = ctx.mux_time;
        Ok(ProcessOutcome::Scheduled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mux::ingest::{AU_RAP, AU_START, AU_END, CAP_AU_PULL, EsStreamKind};

    struct OneShotSource {
        au: Option<AccessUnit>,
        caps: u32,
    }

    impl ElementaryStreamSource for OneShotSource {
        fn stream_id(&self) -> u16 {
            1
        }
        fn stream_kind(&self) -> EsStreamKind {
            EsStreamKind::Video
        }
        fn object_type_indication(&self) -> u8 {
            0
        }
        fn timescale(&self) -> u32 {
            90_000
        }
        fn bit_rate(&self) -> u32 {
            1_000_000
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
            self.caps
        }
        fn pull_access_unit(&mut self) -> Option<AccessUnit> {
            self.au.take()
        }
    }

    #[test]
    fn first_au_waits_for_program_pcr_when_not_pcr_stream() {
        let mut stream = Stream::new_pes(
            0x101,
            StreamType::H264,
            0xE0,
            PesVariant::Plain,
            90_000,
            90_000,
            Box::new(OneShotSource {
                au: Some(AccessUnit { data: vec![1, 2, 3], cts: 0, dts: 0, flags: AU_START | AU_END | AU_RAP }),
                caps: CAP_AU_PULL,
            }),
        );
        let ctx = ProcessContext { mux_time: MuxTime::ZERO, tot_pck_sent: 0, mux_bit_rate: 1_000_000 };
        let mut anchor = PcrAnchor::default();
        let mut rng = crate::mux::rand::MuxRng::new(1);
        let outcome = stream.process_pes(&ctx, &mut anchor, &mut rng).unwrap();
        assert_eq!(outcome, ProcessOutcome::WaitingForProgramPcr);
    }

    #[test]
    fn pcr_stream_loads_pes_once_anchor_is_set() {
        let mut stream = Stream::new_pes(
            0x101,
            StreamType::H264,
            0xE0,
            PesVariant::Plain,
            90_000,
            90_000,
            Box::new(OneShotSource {
                au: Some(AccessUnit { data: vec![0xAB; 100], cts: 0, dts: 0, flags: AU_START | AU_END | AU_RAP }),
                caps: CAP_AU_PULL,
            }),
        );
        if let StreamBody::Pes(body) = &mut stream.body {
            body.is_pcr = true;
        }
        let ctx = ProcessContext { mux_time: MuxTime::ZERO, tot_pck_sent: 0, mux_bit_rate: 1_000_000 };
        let mut anchor = PcrAnchor { pcr_init_time: Some(1234), ts_time_at_pcr_init: MuxTime::ZERO, num_pck_at_pcr_init: 0 };
        let mut rng = crate::mux::rand::MuxRng::new(1);
        let outcome = stream.process_pes(&ctx, &mut anchor, &mut rng).unwrap();
        assert_eq!(outcome, ProcessOutcome::Scheduled);
        assert!(stream.has_pending_data());
    }

    #[test]
    fn pcr_stream_draws_the_anchor_itself_when_unset() {
        let mut stream = Stream::new_pes(
            0x101,
            StreamType::H264,
            0xE0,
            PesVariant::Plain,
            90_000,
            90_000,
            Box::new(OneShotSource {
                au: Some(AccessUnit { data: vec![0xAB; 100], cts: 0, dts: 0, flags: AU_START | AU_END | AU_RAP }),
                caps: CAP_AU_PULL,
            }),
        );
        if let StreamBody::Pes(body) = &mut stream.body {
            body.is_pcr = true;
        }
        let ctx = ProcessContext { mux_time: MuxTime::ZERO, tot_pck_sent: 7, mux_bit_rate: 1_000_000 };
        let mut anchor = PcrAnchor::default();
        let mut rng = crate::mux::rand::MuxRng::new(1);
        let outcome = stream.process_pes(&ctx, &mut anchor, &mut rng).unwrap();
        assert_eq!(outcome, ProcessOutcome::Scheduled);
        assert!(anchor.pcr_init_time.unwrap() != 0);
        assert_eq!(anchor.num_pck_at_pcr_init, 7);
    }

    #[test]
    fn exhausted_source_reports_done_once_drained() {
        let mut stream = Stream::new_pes(
            0x101,
            StreamType::H264,
            0xE0,
            PesVariant::Plain,
            90_000,
            90_000,
            Box::new(OneShotSource { au: None, caps: CAP_AU_PULL | crate::mux::ingest::CAP_STREAM_IS_OVER }),
        );
        let ctx = ProcessContext { mux_time: MuxTime::ZERO, tot_pck_sent: 0, mux_bit_rate: 1_000_000 };
        let mut anchor = PcrAnchor { pcr_init_time: Some(1), ts_time_at_pcr_init: MuxTime::ZERO, num_pck_at_pcr_init: 0 };
        let mut rng = crate::mux::rand::MuxRng::new(1);
        let outcome = stream.process_pes(&ctx, &mut anchor, &mut rng).unwrap();
        assert_eq!(outcome, ProcessOutcome::Done);
        assert!(stream.is_eos());
    }
}
