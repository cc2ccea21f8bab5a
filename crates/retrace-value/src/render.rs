//! Scalar decoding and text rendering.

/// Placeholder rendered for values that are not completely
/// initialized.
pub const UNINITIALIZED: &str = "<uninitialized>";

/// Placeholder rendered for constructs the projector cannot
/// interpret.
pub const UNSUPPORTED: &str = "<unsupported>";

/// Decode a little-endian unsigned integer of up to eight bytes.
pub fn decode_unsigned(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    let n = bytes.len().min(8);
    buf[..n].copy_from_slice(&bytes[..n]);
    u64::from_le_bytes(buf)
}

/// Decode a little-endian signed integer of the given bit width.
pub fn decode_signed(bytes: &[u8], width_bits: u8) -> i64 {
    let raw = decode_unsigned(bytes);
    match width_bits {
        8 => i64::from(raw as u8 as i8),
        16 => i64::from(raw as u16 as i16),
        32 => i64::from(raw as u32 as i32),
        _ => raw as i64,
    }
}

/// Render a character the way the viewer shows `char` values:
/// printable characters bare, control characters as C escapes.
pub fn render_char(byte: u8) -> String {
    match byte {
        b'\n' => "\\n".into(),
        b'\t' => "\\t".into(),
        b'\r' => "\\r".into(),
        b'\0' => "\\0".into(),
        0x20..=0x7E => (byte as char).to_string(),
        other => format!("\\x{other:02x}"),
    }
}

/// Convert a raw x87 80-bit extended-precision pattern to `f64` for
/// display. Values outside `f64` range saturate to infinity.
pub fn x87_to_f64(bytes: [u8; 10]) -> f64 {
    let mantissa = u64::from_le_bytes(bytes[..8].try_into().unwrap());
    let sign_exp = u16::from_le_bytes(bytes[8..].try_into().unwrap());
    let sign = if sign_exp & 0x8000 != 0 { -1.0 } else { 1.0 };
    let exponent = i32::from(sign_exp & 0x7FFF);

    if exponent == 0 && mantissa == 0 {
        return sign * 0.0;
    }
    if exponent == 0x7FFF {
        return if mantissa << 1 == 0 {
            sign * f64::INFINITY
        } else {
            f64::NAN
        };
    }
    // The explicit integer bit is part of the mantissa; scale by the
    // unbiased exponent minus the 63 fractional bits.
    sign * (mantissa as f64) * 2f64.powi(exponent - 16383 - 63)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsigned_and_signed_decoding() {
        assert_eq!(decode_unsigned(&[0x05, 0x00, 0x00, 0x00]), 5);
        assert_eq!(decode_signed(&[0xFF], 8), -1);
        assert_eq!(decode_signed(&[0xFF, 0xFF, 0xFF, 0xFF], 32), -1);
        assert_eq!(decode_signed(&[0x2A, 0, 0, 0, 0, 0, 0, 0], 64), 42);
    }

    #[test]
    fn char_rendering_escapes_control_characters() {
        assert_eq!(render_char(b'c'), "c");
        assert_eq!(render_char(b'\n'), "\\n");
        assert_eq!(render_char(0), "\\0");
        assert_eq!(render_char(0x01), "\\x01");
    }

    #[test]
    fn x87_round_numbers() {
        // 1.0: exponent 16383, mantissa with only the integer bit set.
        let mut one = [0u8; 10];
        one[7] = 0x80;
        one[8..].copy_from_slice(&16383u16.to_le_bytes());
        assert_eq!(x87_to_f64(one), 1.0);

        // -2.0: exponent 16384, sign bit set.
        let mut neg_two = [0u8; 10];
        neg_two[7] = 0x80;
        neg_two[8..].copy_from_slice(&(16384u16 | 0x8000).to_le_bytes());
        assert_eq!(x87_to_f64(neg_two), -2.0);

        assert_eq!(x87_to_f64([0u8; 10]), 0.0);
    }
}
