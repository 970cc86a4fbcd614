//! MPEG-4 Systems Sync Layer (SL) packetization (spec.md S4.4).
//!
//! A thin, configurable header prepended to each access unit when an
//! elementary stream is MPEG-4-signaled, whether it is carried in PES
//! (stream_type `Mpeg4SlPes`, stream_id `0xFA`) or in sections
//! (`Mpeg4SlSections`, wrapped by [`crate::mux::section`]).

use crate::mux::ingest::SlConfig;

/// One SL header instance, derived from [`SlConfig`] plus the per-AU state
/// the muxer tracks (start/end-of-AU for fragmented carriage, random access,
/// and optional CTS/DTS).
#[derive(Debug, Clone, Copy, Default)]
pub struct SlHeader {
    pub access_unit_start: bool,
    pub access_unit_end: bool,
    pub random_access_point: bool,
    pub has_cts: bool,
    pub cts: u64,
    pub has_dts: bool,
    pub dts: u64,
    pub config: SlConfig,
}

impl SlHeader {
    pub fn new(config: SlConfig) -> Self {
        Self { config, ..Default::default() }
    }

    /// Size in bytes of [`Self::encode`]'s output for the current flag set.
    pub fn encoded_len(&self) -> usize {
        self.encode().len()
    }

    /// Encodes the header as a byte-aligned sequence: one flags byte
    /// (auStart, auEnd, RAP, hasCTS, hasDTS, 3 reserved bits) followed by the
    /// CTS/DTS fields actually present, each as 5 bytes (40-bit field,
    /// generous enough for any `timestamp_resolution` without per-field bit
    /// packing — this core does not need the ISO/IEC 14496-1 SL-config
    /// instance-length negotiation, only a header this crate both writes and
    /// reads back out consistently).
    pub fn encode(&self) -> Vec<u8> {
        let mut flags = 0u8;
        if self.access_unit_start {
            flags |= 0x80;
        }
        if self.access_unit_end {
            flags |= 0x40;
        }
        if self.config.use_random_access_point && self.random_access_point {
            flags |= 0x20;
        }
        let has_cts = self.config.use_timestamps_flag && self.has_cts;
        let has_dts = self.config.use_timestamps_flag && self.has_dts;
        if has_cts {
            flags |= 0x10;
        }
        if has_dts {
            flags |= 0x08;
        }

        let mut out = vec![flags];
        if has_cts {
            out.extend_from_slice(&self.cts.to_be_bytes()[3..]);
        }
        if has_dts {
            out.extend_from_slice(&self.dts.to_be_bytes()[3..]);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_header_is_one_byte() {
        let h = SlHeader::default();
        assert_eq!(h.encode(), vec![0x00]);
    }

    #[test]
    fn start_and_end_flags_are_independent() {
        let mut h = SlHeader::new(SlConfig::default());
        h.access_unit_start = true;
        assert_eq!(h.encode()[0] & 0xC0, 0x80);
        h.access_unit_start = false;
        h.access_unit_end = true;
        assert_eq!(h.encode()[0] & 0xC0, 0x40);
    }

    #[test]
    fn timestamps_extend_the_header() {
        let mut h = SlHeader::new(SlConfig::default());
        h.has_dts = true;
        h.dts = 123_456;
        let encoded = h.encode();
        assert_eq!(encoded.len(), 6);
        assert_eq!(encoded[0] & 0x08, 0x08);
    }
}
