//! The per-instruction runtime-value slot.

use std::fmt;

/// Value recorded for one instruction of a live function frame.
///
/// A discriminated union over the primitive ABI representations the
/// tracer can emit, plus [`RuntimeValue::Unassigned`] for slots no
/// event has written yet (or whose writing event has been retracted).
///
/// Reads are strictly typed: asking an integer slot for a float (or
/// any other cross-kind read) yields `None` rather than converting.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RuntimeValue {
    /// No value has been recorded for this instruction.
    Unassigned,
    /// An 8-bit integer value.
    U8(u8),
    /// A 16-bit integer value.
    U16(u16),
    /// A 32-bit integer value.
    U32(u32),
    /// A 64-bit integer value.
    U64(u64),
    /// A pointer value.
    Ptr(u64),
    /// A single-precision float value.
    Float(f32),
    /// A double-precision float value.
    Double(f64),
    /// The raw 80-bit x87 extended-precision pattern, little-endian.
    LongDouble([u8; 10]),
}

impl RuntimeValue {
    /// Whether the slot holds a value.
    pub fn is_assigned(&self) -> bool {
        !matches!(self, Self::Unassigned)
    }

    /// Read an integer slot, widened to `u64`.
    ///
    /// `None` for unassigned slots and for any non-integer kind.
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Self::U8(v) => Some(u64::from(v)),
            Self::U16(v) => Some(u64::from(v)),
            Self::U32(v) => Some(u64::from(v)),
            Self::U64(v) => Some(v),
            _ => None,
        }
    }

    /// Read an integer slot, reinterpreted as a sign-extended `i64`.
    ///
    /// The sign bit is taken from the slot's recorded width, so an
    /// 8-bit `0xFF` reads as `-1`.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::U8(v) => Some(i64::from(v as i8)),
            Self::U16(v) => Some(i64::from(v as i16)),
            Self::U32(v) => Some(i64::from(v as i32)),
            Self::U64(v) => Some(v as i64),
            _ => None,
        }
    }

    /// Read a pointer slot.
    pub fn as_ptr(&self) -> Option<u64> {
        match *self {
            Self::Ptr(v) => Some(v),
            _ => None,
        }
    }

    /// Read a single-precision float slot.
    pub fn as_float(&self) -> Option<f32> {
        match *self {
            Self::Float(v) => Some(v),
            _ => None,
        }
    }

    /// Read a double-precision float slot.
    pub fn as_double(&self) -> Option<f64> {
        match *self {
            Self::Double(v) => Some(v),
            _ => None,
        }
    }

    /// Read the raw `long double` bit pattern.
    pub fn as_long_double(&self) -> Option<[u8; 10]> {
        match *self {
            Self::LongDouble(v) => Some(v),
            _ => None,
        }
    }
}

impl Default for RuntimeValue {
    fn default() -> Self {
        Self::Unassigned
    }
}

impl fmt::Display for RuntimeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unassigned => write!(f, "<unassigned>"),
            Self::U8(v) => write!(f, "{v}"),
            Self::U16(v) => write!(f, "{v}"),
            Self::U32(v) => write!(f, "{v}"),
            Self::U64(v) => write!(f, "{v}"),
            Self::Ptr(v) => write!(f, "{v:#x}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::LongDouble(bytes) => {
                write!(f, "0x")?;
                for b in bytes.iter().rev() {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unassigned_reads_as_none() {
        let v = RuntimeValue::Unassigned;
        assert!(!v.is_assigned());
        assert_eq!(v.as_u64(), None);
        assert_eq!(v.as_ptr(), None);
        assert_eq!(v.as_double(), None);
    }

    #[test]
    fn cross_kind_reads_are_refused() {
        let v = RuntimeValue::U32(42);
        assert_eq!(v.as_u64(), Some(42));
        assert_eq!(v.as_float(), None);
        assert_eq!(v.as_ptr(), None);

        let v = RuntimeValue::Double(1.5);
        assert_eq!(v.as_double(), Some(1.5));
        assert_eq!(v.as_u64(), None);
    }

    #[test]
    fn signed_reads_sign_extend_from_recorded_width() {
        assert_eq!(RuntimeValue::U8(0xFF).as_i64(), Some(-1));
        assert_eq!(RuntimeValue::U16(0x8000).as_i64(), Some(-32768));
        assert_eq!(RuntimeValue::U32(7).as_i64(), Some(7));
        assert_eq!(RuntimeValue::U64(u64::MAX).as_i64(), Some(-1));
    }

    #[test]
    fn long_double_displays_big_endian_hex() {
        let mut bytes = [0u8; 10];
        bytes[9] = 0xAB;
        let s = RuntimeValue::LongDouble(bytes).to_string();
        assert!(s.starts_with("0xab"));
    }
}
