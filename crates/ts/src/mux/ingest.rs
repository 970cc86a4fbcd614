//! Elementary Stream Ingest contract (spec.md S6).
//!
//! External collaborators (file demuxers, RTP sources, ...) feed the core
//! through this trait; the core never reaches into a demuxer or socket
//! itself. Two ingest shapes are supported, mirroring spec.md S5:
//!
//! - *pull*: `ElementaryStreamSource::pull_access_unit` is called directly on
//!   the mux thread (`caps()` reports [`CAP_AU_PULL`]).
//! - *push*: producers on arbitrary threads hand access units to a
//!   [`PushQueue`] guarded by a mutex; the mux thread drains it without ever
//!   holding the lock across packetization.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// First fragment of a (possibly multi-fragment) access unit.
pub const AU_START: u32 = 1 << 0;
/// Last fragment of a (possibly multi-fragment) access unit.
pub const AU_END: u32 = 1 << 1;
/// Random access point (keyframe / IDR).
pub const AU_RAP: u32 = 1 << 2;
/// The access unit carries a composition timestamp.
pub const HAS_CTS: u32 = 1 << 3;
/// The access unit carries a decoding timestamp.
pub const HAS_DTS: u32 = 1 << 4;

/// Ingest supports pull-mode (`pull_access_unit` invoked on the mux thread).
pub const CAP_AU_PULL: u32 = 1 << 0;
/// Ingest signals DTS distinct from CTS.
pub const CAP_SIGNAL_DTS: u32 = 1 << 1;
/// Ingest has reached end of stream (no further access units past the buffered ones).
pub const CAP_STREAM_IS_OVER: u32 = 1 << 2;

/// One Access Unit (a decodable media frame) as handed off by an ingest.
#[derive(Debug, Clone, Default)]
pub struct AccessUnit {
    pub data: Vec<u8>,
    /// Composition time stamp, in the source's `timescale` units.
    pub cts: u64,
    /// Decoding time stamp, in the source's `timescale` units.
    pub dts: u64,
    pub flags: u32,
}

impl AccessUnit {
    pub fn is_rap(&self) -> bool {
        self.flags & AU_RAP != 0
    }

    pub fn has_dts(&self) -> bool {
        self.flags & HAS_DTS != 0
    }
}

/// The kind of elementary stream, as carried in the PMT/SL descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EsStreamKind {
    Video,
    Audio,
    Scene,
    ObjectDescriptor,
}

/// SL Sync Layer configuration (spec.md S4.4), pared to what this core needs
/// to build an SL header: whether CTS/DTS are carried and the clock the
/// access unit timestamps are expressed in.
#[derive(Debug, Clone, Copy)]
pub struct SlConfig {
    pub use_random_access_point: bool,
    pub use_timestamps_flag: bool,
    pub timestamp_resolution: u32,
}

impl Default for SlConfig {
    fn default() -> Self {
        Self {
            use_random_access_point: true,
            use_timestamps_flag: true,
            timestamp_resolution: 90_000,
        }
    }
}

/// Static, per-ES description plus the pull entry point. Implemented by
/// whatever external component owns the real media source (file reader,
/// RTP depacketizer, ...); the core only ever calls through this trait.
pub trait ElementaryStreamSource: Send {
    /// MPEG-4 ES_ID.
    fn stream_id(&self) -> u16;
    fn stream_kind(&self) -> EsStreamKind;
    /// MPEG-4 objectTypeIndication / ISO/IEC 13818-1 stream_type source byte.
    fn object_type_indication(&self) -> u8;
    /// Source media timescale (e.g. 1000 for ms-based containers, 90000 for
    /// already-90kHz sources).
    fn timescale(&self) -> u32;
    /// Declared bit rate in bits/s, or 0 if unknown (the core then estimates it).
    fn bit_rate(&self) -> u32;
    fn decoder_config(&self) -> &[u8];
    /// Carousel repeat period in ms for section-carried streams; 0 = no repeat.
    fn repeat_rate_ms(&self) -> u32;
    fn sl_config(&self) -> Option<SlConfig>;
    fn caps(&self) -> u32;

    /// Pulls the next access unit, if any is currently available. Only
    /// called when `caps() & CAP_AU_PULL != 0`; invoked directly on the mux
    /// thread, never via the push queue.
    fn pull_access_unit(&mut self) -> Option<AccessUnit>;
}

/// Multi-producer/single-consumer FIFO for push-mode ingest (spec.md S5).
///
/// Producers call [`PushQueue::push`] from arbitrary threads. The mux thread
/// calls [`PushQueue::pop`] only while dequeuing; the lock is never held
/// across packetization.
#[derive(Debug, Default)]
pub struct PushQueue {
    inner: Mutex<VecDeque<AccessUnit>>,
    closed: AtomicBool,
}

impl PushQueue {
    pub fn new() -> Self {
        Self { inner: Mutex::new(VecDeque::new()), closed: AtomicBool::new(false) }
    }

    pub fn push(&self, au: AccessUnit) {
        self.inner.lock().expect("push queue mutex poisoned").push_back(au);
    }

    pub fn pop(&self) -> Option<AccessUnit> {
        self.inner.lock().expect("push queue mutex poisoned").pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("push queue mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Marks the producer side done (spec.md S6 `STREAM_IS_OVER`). Callable
    /// from any thread holding a handle to this queue; does not itself drop
    /// any buffered access units.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Static per-ES description for a push-mode ingest (spec.md S5/S6):
/// producers on arbitrary threads call [`PushQueue::push`]/[`PushQueue::close`]
/// on the shared `queue`; this wrapper is what the mux thread actually holds
/// as the stream's `ElementaryStreamSource`, draining the queue from
/// `pull_access_unit` without ever holding its lock across packetization.
pub struct PushElementaryStreamSource {
    pub stream_id: u16,
    pub stream_kind: EsStreamKind,
    pub object_type_indication: u8,
    pub timescale: u32,
    pub bit_rate: u32,
    pub decoder_config: Vec<u8>,
    pub repeat_rate_ms: u32,
    pub sl_config: Option<SlConfig>,
    pub queue: Arc<PushQueue>,
}

impl PushElementaryStreamSource {
    pub fn new(stream_id: u16, stream_kind: EsStreamKind, timescale: u32, queue: Arc<PushQueue>) -> Self {
        Self {
            stream_id,
            stream_kind,
            object_type_indication: 0,
            timescale,
            bit_rate: 0,
            decoder_config: Vec::new(),
            repeat_rate_ms: 0,
            sl_config: None,
            queue,
        }
    }
}

impl ElementaryStreamSource for PushElementaryStreamSource {
    fn stream_id(&self) -> u16 {
        self.stream_id
    }

    fn stream_kind(&self) -> EsStreamKind {
        self.stream_kind
    }

    fn object_type_indication(&self) -> u8 {
        self.object_type_indication
    }

    fn timescale(&self) -> u32 {
        self.timescale
    }

    fn bit_rate(&self) -> u32 {
        self.bit_rate
    }

    fn decoder_config(&self) -> &[u8] {
        &self.decoder_config
    }

    fn repeat_rate_ms(&self) -> u32 {
        self.repeat_rate_ms
    }

    fn sl_config(&self) -> Option<SlConfig> {
        self.sl_config
    }

    fn caps(&self) -> u32 {
        let mut caps = CAP_AU_PULL;
        if self.queue.is_closed() && self.queue.is_empty() {
            caps |= CAP_STREAM_IS_OVER;
        }
        caps
    }

    /// Drains one access unit from the shared queue. This is the one call
    /// site spec.md S5 describes as "drained by `process` on the mux
    /// thread": the lock is held only for the duration of `PushQueue::pop`,
    /// never across the packetization that follows.
    fn pull_access_unit(&mut self) -> Option<AccessUnit> {
        self.queue.pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn push_queue_is_fifo() {
        let q = PushQueue::new();
        q.push(AccessUnit { data: vec![1], ..Default::default() });
        q.push(AccessUnit { data: vec![2], ..Default::default() });
        assert_eq!(q.pop().unwrap().data, vec![1]);
        assert_eq!(q.pop().unwrap().data, vec![2]);
        assert!(q.pop().is_none());
    }

    #[test]
    fn push_queue_is_shareable_across_threads() {
        let q = Arc::new(PushQueue::new());
        let producer = {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                for i in 0..100u8 {
                    q.push(AccessUnit { data: vec![i], ..Default::default() });
                }
            })
        };
        producer.join().unwrap();
        assert_eq!(q.len(), 100);
    }

    #[test]
    fn push_source_reports_stream_over_only_once_closed_and_drained() {
        let queue = Arc::new(PushQueue::new());
        let mut source = PushElementaryStreamSource::new(1, EsStreamKind::Audio, 90_000, Arc::clone(&queue));

        assert_eq!(source.caps() & CAP_STREAM_IS_OVER, 0);
        queue.push(AccessUnit { data: vec![0xAA], ..Default::default() });
        queue.close();
        // Closed but still holding a buffered AU: not over yet.
        assert_eq!(source.caps() & CAP_STREAM_IS_OVER, 0);

        assert_eq!(source.pull_access_unit().unwrap().data, vec![0xAA]);
        assert_ne!(source.caps() & CAP_STREAM_IS_OVER, 0);
        assert!(source.pull_access_unit().is_none());
    }

    #[test]
    fn push_source_drains_in_fifo_order_from_a_producer_thread() {
        let queue = Arc::new(PushQueue::new());
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..10u8 {
                    queue.push(AccessUnit { data: vec![i], ..Default::default() });
                }
                queue.close();
            })
        };
        producer.join().unwrap();

        let mut source = PushElementaryStreamSource::new(1, EsStreamKind::Video, 90_000, queue);
        for i in 0..10u8 {
            assert_eq!(source.pull_access_unit().unwrap().data, vec![i]);
        }
        assert_ne!(source.caps() & CAP_STREAM_IS_OVER, 0);
    }
}
