//! 16-bit PCM conversions, amplitude scaling and polarity inversion.
//!
//! Everything here is allocation-free when the caller reuses its output
//! buffers, so the capture and playback tasks can call these on every cycle.
//!
//! ## Saturation
//!
//! `i16::MIN` has no positive counterpart. Inversion treats it as
//! `-i16::MAX` (one unit higher) before negating, so the result is always
//! representable. Scaling saturates at the i16 range instead of wrapping.

/// Bytes per 16-bit sample.
pub const BYTES_PER_SAMPLE: usize = 2;

/// Decode interleaved little-endian 16-bit PCM into `out`.
///
/// `out` is resized to `bytes.len() / 2`; a trailing odd byte is ignored.
pub fn bytes_to_samples(bytes: &[u8], out: &mut Vec<i16>) {
    out.clear();
    out.extend(
        bytes
            .chunks_exact(BYTES_PER_SAMPLE)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]])),
    );
}

/// Encode samples as interleaved little-endian 16-bit PCM into `out`.
pub fn samples_to_bytes(samples: &[i16], out: &mut Vec<u8>) {
    out.clear();
    out.reserve(samples.len() * BYTES_PER_SAMPLE);
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
}

/// Scale one sample by `amplitude`, saturating at the i16 range.
///
/// Fractional results truncate toward zero. A NaN amplitude yields silence.
#[inline]
pub fn scale_sample(sample: i16, amplitude: f32) -> i16 {
    let scaled = sample as f32 * amplitude;
    // `as` saturates out-of-range floats and maps NaN to 0.
    scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Scale every sample in place. An amplitude of exactly `1.0` is a no-op.
pub fn scale(samples: &mut [i16], amplitude: f32) {
    if amplitude == 1.0 {
        return;
    }
    for sample in samples.iter_mut() {
        *sample = scale_sample(*sample, amplitude);
    }
}

/// Negate one sample, clamping `i16::MIN` to `-i16::MAX` first.
#[inline]
pub fn invert_sample(sample: i16) -> i16 {
    -sample.max(-i16::MAX)
}

/// Invert the polarity of every sample in place.
pub fn invert(samples: &mut [i16]) {
    for sample in samples.iter_mut() {
        *sample = invert_sample(*sample);
    }
}

/// Number of whole samples that fit into `bytes` for the given bit depth.
pub fn samples_in(bytes: usize, bits_per_sample: u16) -> usize {
    let width = (bits_per_sample as usize / 8).max(1);
    bytes / width
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_little_endian_pairs() {
        let mut out = Vec::new();
        bytes_to_samples(&[0x01, 0x00, 0xFF, 0xFF, 0x00, 0x80], &mut out);
        assert_eq!(out, vec![1, -1, i16::MIN]);
    }

    #[test]
    fn ignores_trailing_odd_byte() {
        let mut out = vec![42; 8];
        bytes_to_samples(&[0x10, 0x00, 0x7F], &mut out);
        assert_eq!(out, vec![16]);
    }

    #[test]
    fn encodes_to_bytes_that_decode_back() {
        let samples = [0i16, 1, -1, 12_345, i16::MAX, i16::MIN];
        let mut bytes = Vec::new();
        samples_to_bytes(&samples, &mut bytes);
        assert_eq!(bytes.len(), samples.len() * BYTES_PER_SAMPLE);
        assert_eq!(&bytes[2..4], &[0x01, 0x00]);

        let mut decoded = Vec::new();
        bytes_to_samples(&bytes, &mut decoded);
        assert_eq!(decoded, samples);
    }

    #[test]
    fn inversion_clamps_most_negative_value() {
        assert_eq!(invert_sample(i16::MIN), i16::MAX);
        assert_eq!(invert_sample(-i16::MAX), i16::MAX);
        assert_eq!(invert_sample(i16::MAX), -i16::MAX);
        assert_eq!(invert_sample(0), 0);
    }

    #[test]
    fn inversion_is_an_involution_except_where_clamped() {
        let original: Vec<i16> = (i16::MIN..=i16::MAX).step_by(7).collect();
        let mut twice = original.clone();
        invert(&mut twice);
        invert(&mut twice);
        for (before, after) in original.iter().zip(&twice) {
            if *before == i16::MIN {
                assert_eq!(*after, -i16::MAX);
            } else {
                assert_eq!(before, after);
            }
        }
    }

    #[test]
    fn unit_amplitude_is_identity() {
        let original: Vec<i16> = (-512..512).map(|v| v * 61).collect();
        let mut scaled = original.clone();
        scale(&mut scaled, 1.0);
        assert_eq!(scaled, original);
        for s in &original {
            assert_eq!(scale_sample(*s, 1.0), *s);
        }
    }

    #[test]
    fn non_negative_amplitude_preserves_sign() {
        for amplitude in [0.0f32, 0.25, 0.5, 1.0, 1.5, 4.0] {
            for s in [-32_000i16, -300, -1, 0, 1, 300, 32_000] {
                let out = scale_sample(s, amplitude);
                assert!(out == 0 || out.signum() == s.signum(), "{s} * {amplitude} = {out}");
            }
        }
    }

    #[test]
    fn negative_amplitude_flips_sign() {
        assert_eq!(scale_sample(1_000, -1.0), -1_000);
        assert_eq!(scale_sample(-1_000, -0.5), 500);
    }

    #[test]
    fn scaling_saturates_instead_of_wrapping() {
        assert_eq!(scale_sample(20_000, 4.0), i16::MAX);
        assert_eq!(scale_sample(-20_000, 4.0), i16::MIN);
        assert_eq!(scale_sample(100, f32::NAN), 0);
    }

    #[test]
    fn counts_samples_for_bit_depth() {
        assert_eq!(samples_in(1024, 16), 512);
        assert_eq!(samples_in(1025, 16), 512);
        assert_eq!(samples_in(1024, 8), 1024);
    }
}
