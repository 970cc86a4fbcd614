//! MPEG-2 Transport Stream multiplexer core: section generation, PES
//! packetization, LATM/SL encapsulation and the multiplex scheduler that
//! drives all three one 188-byte packet at a time.
//!
//! This is the write-side counterpart to the parsing modules at the crate
//! root ([`crate::Pat`], [`crate::Pmt`], [`crate::TsPacket`]), which this
//! module's test suite uses to verify its own output round-trips.

pub mod crc32;
pub mod ingest;
pub mod latm;
pub mod muxer;
pub mod pes;
pub mod rand;
pub mod section;
pub mod sl;
pub mod stream;
pub mod time;

pub use ingest::{
    AccessUnit, AU_END, AU_RAP, AU_START, CAP_AU_PULL, CAP_SIGNAL_DTS, CAP_STREAM_IS_OVER,
    ElementaryStreamSource, EsStreamKind, HAS_CTS, HAS_DTS, PushElementaryStreamSource, PushQueue,
    SlConfig,
};
pub use muxer::{MuxConfig, Muxer, Program, ProgramConfig, StepOutcome};
pub use stream::{PesVariant, Stream};
pub use time::MuxTime;
