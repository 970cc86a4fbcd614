//! LATM (Low-overhead MPEG-4 Audio Transport Multiplex) encapsulation for
//! AAC elementary streams (spec.md S4.5).

use aac::PartialAudioSpecificConfig;
use bytes_util::BitWriter;

use crate::mux::time::MuxTime;

const LATM_SYNC_WORD: u64 = 0x2B7;
const DEFAULT_REPEAT_RATE_MS: u32 = 500;

/// Wraps one AAC access unit in a LATM AudioMuxElement.
///
/// `last_config_time` / `now` decide `useSameStreamMux`: the full config is
/// re-sent only after `repeat_rate_ms` (default 500ms) has elapsed since the
/// last time it went out, matching the carousel-like refresh every other
/// section-carried table gets.
/// Returns the wrapped bytes plus whether a full `AudioMuxElement` config was
/// emitted (the caller advances its `last_config_time` bookkeeping only then).
pub fn wrap_latm(
    payload: &[u8],
    asc: &PartialAudioSpecificConfig,
    repeat_rate_ms: u32,
    last_config_time: Option<MuxTime>,
    now: MuxTime,
) -> (Vec<u8>, bool) {
    let repeat_rate = if repeat_rate_ms == 0 { DEFAULT_REPEAT_RATE_MS } else { repeat_rate_ms };
    let use_same_stream_mux = match last_config_time {
        Some(last) => now.as_millis().saturating_sub(last.as_millis()) <= repeat_rate as u64,
        None => false,
    };

    let mut bw = BitWriter::<Vec<u8>>::default();
    // Reserve the sync word + 13-bit length placeholder; patched below once
    // the total size is known.
    bw.write_bits(LATM_SYNC_WORD, 11).expect("11-bit sync word fits");
    bw.write_bits(0, 13).expect("13-bit length placeholder fits");

    bw.write_bit(use_same_stream_mux).expect("bit write cannot fail on a Vec sink");
    if !use_same_stream_mux {
        write_audio_mux_config(&mut bw, asc);
    }

    // PayloadLengthInfo: 0xFF bytes for every full 255 of payload, then the remainder.
    let mut remaining = payload.len();
    while remaining >= 255 {
        bw.write_bits(0xFF, 8).expect("byte write cannot fail on a Vec sink");
        remaining -= 255;
    }
    bw.write_bits(remaining as u64, 8).expect("byte write cannot fail on a Vec sink");

    bw.align().expect("align cannot fail on a Vec sink");
    let mut out = bw.finish().expect("finish cannot fail on a Vec sink");
    out.extend_from_slice(payload);

    let total_size = out.len();
    let length_value = (total_size - 2) as u16 & 0x1FFF;
    out[1] = (out[1] & 0xE0) | ((length_value >> 8) as u8 & 0x1F);
    out[2] = (length_value & 0xFF) as u8;
    (out, !use_same_stream_mux)
}

/// Minimal single-program/single-layer AudioMuxElement config: just enough
/// of ISO/IEC 14496-3 SS 1.7.3 to round-trip one AAC-LC stream. The sampling
/// frequency is always written via the escape path (index 0xF + 24 explicit
/// bits) so no reverse frequency-to-index table is needed.
fn write_audio_mux_config(bw: &mut BitWriter<Vec<u8>>, asc: &PartialAudioSpecificConfig) {
    bw.write_bits(0, 1).unwrap(); // audioMuxVersion = 0
    bw.write_bits(1, 1).unwrap(); // allStreamsSameTimeFraming = 1
    bw.write_bits(0, 6).unwrap(); // numSubFrames = 0 (1 sub-frame)
    bw.write_bits(0, 4).unwrap(); // numProgram = 0 (1 program)
    bw.write_bits(0, 3).unwrap(); // numLayer = 0 (1 layer)

    bw.write_bit(false).unwrap(); // useSameConfig = 0

    let aot = asc.audio_object_type.as_u16();
    if aot < 31 {
        bw.write_bits(aot as u64, 5).unwrap();
    } else {
        bw.write_bits(31, 5).unwrap();
        bw.write_bits((aot - 32) as u64, 6).unwrap();
    }

    bw.write_bits(0xF, 4).unwrap(); // samplingFrequencyIndex escape
    bw.write_bits(asc.sampling_frequency as u64, 24).unwrap();
    bw.write_bits(asc.channel_configuration as u64, 4).unwrap();

    // GASpecificConfig (frameLengthFlag, dependsOnCoreCoder, extensionFlag), all 0.
    bw.write_bits(0, 3).unwrap();

    bw.write_bit(false).unwrap(); // frameLengthType = 0 -> latmBufferFullness
    bw.write_bits(0xFF, 8).unwrap(); // latmBufferFullness (arbitrary, non-zero)

    bw.write_bit(false).unwrap(); // otherDataPresent
    bw.write_bit(false).unwrap(); // crcCheckPresent
}

#[cfg(test)]
mod tests {
    use super::*;
    use aac::AudioObjectType;

    fn asc() -> PartialAudioSpecificConfig {
        PartialAudioSpecificConfig {
            audio_object_type: AudioObjectType::AacLowComplexity,
            sampling_frequency: 44_100,
            channel_configuration: 2,
        }
    }

    #[test]
    fn first_frame_carries_full_config() {
        let payload = vec![0u8; 10];
        let (wrapped, sent_config) = wrap_latm(&payload, &asc(), 500, None, MuxTime::ZERO);
        assert!(sent_config);
        assert_eq!(wrapped[0] >> 5, 0b010); // top 3 bits of the 11-bit sync word 0x2B7
        // useSameStreamMux bit is the first bit after the 24-bit sync+length prefix.
        let use_same_bit = (wrapped[3] & 0x80) != 0;
        assert!(!use_same_bit);
    }

    #[test]
    fn subsequent_frame_within_window_reuses_config() {
        let payload = vec![0u8; 10];
        let t0 = MuxTime::ZERO;
        let mut t1 = MuxTime::ZERO;
        t1.inc(100, 1000); // +100ms
        let (wrapped, sent_config) = wrap_latm(&payload, &asc(), 500, Some(t0), t1);
        assert!(!sent_config);
        let use_same_bit = (wrapped[3] & 0x80) != 0;
        assert!(use_same_bit);
    }

    #[test]
    fn frame_after_repeat_window_resends_config() {
        let payload = vec![0u8; 10];
        let t0 = MuxTime::ZERO;
        let mut t1 = MuxTime::ZERO;
        t1.inc(600, 1000); // +600ms, past the 500ms default
        let (wrapped, sent_config) = wrap_latm(&payload, &asc(), 500, Some(t0), t1);
        assert!(sent_config);
        let use_same_bit = (wrapped[3] & 0x80) != 0;
        assert!(!use_same_bit);
    }

    #[test]
    fn length_field_matches_total_size_minus_two() {
        let payload = vec![0xAAu8; 300]; // exercises the 0xFF PayloadLengthInfo run
        let (wrapped, _) = wrap_latm(&payload, &asc(), 500, None, MuxTime::ZERO);
        let declared = (((wrapped[1] & 0x1F) as u16) << 8) | wrapped[2] as u16;
        assert_eq!(declared as usize, wrapped.len() - 2);
    }

    #[test]
    fn payload_length_info_run_emits_0xff_then_remainder() {
        let payload = vec![0u8; 600]; // 2*255 + 90
        let (wrapped, _) = wrap_latm(&payload, &asc(), 500, None, MuxTime::ZERO);
        assert!(wrapped.windows(1).any(|w| w[0] == 0xFF));
        assert!(wrapped.ends_with(&payload));
    }
}
