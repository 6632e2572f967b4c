//! Conversions between stored element encodings and real values.
//!
//! Scores are either bf16 or plain integers. Normalized outputs are either
//! bf16 or unsigned/signed fixed point with every non-sign bit fractional,
//! saturating at the largest representable value.

use half::bf16;
use softex_core::format::ElementFormat;

/// Effective width of an integer format, capped by its 32-bit container.
fn stored_bits(bits: u8) -> u32 {
    (bits as u32).min(32)
}

fn mask(bits: u32) -> u32 {
    if bits >= 32 { u32::MAX } else { (1 << bits) - 1 }
}

/// Value of a stored score.
pub fn score_value(raw: u32, format: ElementFormat) -> f32 {
    match format {
        ElementFormat::Bf16 => bf16::from_bits(raw as u16).to_f32(),
        ElementFormat::Int { bits, signed } => {
            let bits = stored_bits(bits);
            let v = raw & mask(bits);
            if signed && (v >> (bits - 1)) & 1 == 1 {
                (v as i64 - (1i64 << bits)) as f32
            } else {
                v as f32
            }
        }
    }
}

/// Encodes a real score into `format`, rounding and saturating.
pub fn encode_score(value: f64, format: ElementFormat) -> u32 {
    match format {
        ElementFormat::Bf16 => bf16::from_f64(value).to_bits() as u32,
        ElementFormat::Int { bits, signed } => {
            let bits = stored_bits(bits);
            let (lo, hi) = if signed {
                (-(1i64 << (bits - 1)), (1i64 << (bits - 1)) - 1)
            } else {
                (0, (1i64 << bits) - 1)
            };
            let v = (value.round() as i64).clamp(lo, hi);
            v as u32 & mask(bits)
        }
    }
}

fn fraction_bits(bits: u8, signed: bool) -> i32 {
    stored_bits(bits) as i32 - signed as i32
}

/// Encodes a probability in `[0, 1]` into an output element.
pub fn encode_probability(p: f64, format: ElementFormat) -> u32 {
    match format {
        ElementFormat::Bf16 => bf16::from_f64(p).to_bits() as u32,
        ElementFormat::Int { bits, signed } => {
            let frac = fraction_bits(bits, signed);
            let max = 2f64.powi(frac) - 1.0;
            let scaled = (p * 2f64.powi(frac)).round().clamp(0.0, max);
            scaled as u32
        }
    }
}

/// Inverse of [`encode_probability`].
pub fn probability_value(raw: u32, format: ElementFormat) -> f64 {
    match format {
        ElementFormat::Bf16 => bf16::from_bits(raw as u16).to_f64(),
        ElementFormat::Int { bits, signed } => {
            let frac = fraction_bits(bits, signed);
            score_value(raw, format) as f64 / 2f64.powi(frac)
        }
    }
}

/// Distance in units of the last place between two non-negative outputs.
pub fn ulp_distance(a: u32, b: u32) -> u32 {
    a.abs_diff(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bf16_scores() {
        assert_eq!(score_value(0x3f80, ElementFormat::Bf16), 1.0);
        assert_eq!(score_value(0xc000, ElementFormat::Bf16), -2.0);
        assert_eq!(encode_score(3.0, ElementFormat::Bf16), 0x4040);
    }

    #[test]
    fn signed_integer_scores() {
        let i8 = ElementFormat::int(8, true).unwrap();
        assert_eq!(score_value(0xff, i8), -1.0);
        assert_eq!(score_value(0x7f, i8), 127.0);
        assert_eq!(encode_score(-200.0, i8), 0x80);

        let u4 = ElementFormat::int(4, false).unwrap();
        assert_eq!(score_value(0xf3, u4), 3.0);
    }

    #[test]
    fn fixed_point_probabilities() {
        let u8 = ElementFormat::int(8, false).unwrap();
        assert_eq!(encode_probability(0.5, u8), 128);
        assert_eq!(encode_probability(1.0, u8), 255);
        assert_eq!(probability_value(64, u8), 0.25);

        let i8 = ElementFormat::int(8, true).unwrap();
        assert_eq!(encode_probability(1.0, i8), 127);
        assert_eq!(probability_value(64, i8), 0.5);
    }
}
