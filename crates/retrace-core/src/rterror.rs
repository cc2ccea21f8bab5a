//! Runtime errors detected in the traced program.
//!
//! These are *data*, not replay failures: the tracer records them as
//! `RuntimeError` events (plus subservient argument records), and the
//! replay engine attaches them to the function frame that produced
//! them so the viewer can show the fault at its source construct.

use std::fmt;

use smallvec::SmallVec;

/// Classification of a detected fault in the traced program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RuntimeErrorKind {
    /// Access to memory not covered by any live allocation.
    MemoryUnowned = 0,
    /// Read of memory that was never initialized.
    MemoryUninitialized = 1,
    /// Access past the end of a live allocation.
    MemoryOverflow = 2,
    /// `free` of an address that is not a live heap allocation.
    InvalidFree = 3,
    /// Integer or floating-point division by zero.
    DivideByZero = 4,
    /// `memcpy`-family call with overlapping source and destination.
    OverlappingCopy = 5,
    /// Operation on a `FILE` or `DIR` handle that is not open.
    BadStream = 6,
    /// Call that is unsafe in a multithreaded program.
    UnsafeMultithreadedCall = 7,
}

impl RuntimeErrorKind {
    /// Decode from the event payload byte.
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::MemoryUnowned),
            1 => Some(Self::MemoryUninitialized),
            2 => Some(Self::MemoryOverflow),
            3 => Some(Self::InvalidFree),
            4 => Some(Self::DivideByZero),
            5 => Some(Self::OverlappingCopy),
            6 => Some(Self::BadStream),
            7 => Some(Self::UnsafeMultithreadedCall),
            _ => None,
        }
    }

    /// The event payload byte for this kind.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for RuntimeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::MemoryUnowned => "access to unowned memory",
            Self::MemoryUninitialized => "read of uninitialized memory",
            Self::MemoryOverflow => "access past end of allocation",
            Self::InvalidFree => "free of invalid address",
            Self::DivideByZero => "division by zero",
            Self::OverlappingCopy => "overlapping copy",
            Self::BadStream => "operation on closed or unknown stream",
            Self::UnsafeMultithreadedCall => "unsafe multithreaded call",
        };
        write!(f, "{s}")
    }
}

/// What one runtime-error argument datum describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RuntimeErrorArgKind {
    /// A traced-program address.
    Address = 0,
    /// A size in bytes.
    Size = 1,
    /// An operand index of the faulting instruction.
    Operand = 2,
    /// A parameter index of the faulting call.
    Parameter = 3,
    /// The base address of the allocation involved.
    Object = 4,
    /// A character value.
    Character = 5,
}

impl RuntimeErrorArgKind {
    /// Decode from the event payload byte.
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Address),
            1 => Some(Self::Size),
            2 => Some(Self::Operand),
            3 => Some(Self::Parameter),
            4 => Some(Self::Object),
            5 => Some(Self::Character),
            _ => None,
        }
    }

    /// The event payload byte for this kind.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for RuntimeErrorArgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// One typed argument of a runtime error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RuntimeErrorArg {
    /// What `data` describes.
    pub kind: RuntimeErrorArgKind,
    /// The raw datum.
    pub data: u64,
}

/// A fully deserialized runtime error: classification plus arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeError {
    /// Classification of the fault.
    pub kind: RuntimeErrorKind,
    /// Whether this error was recorded as top-level (detail errors
    /// are recorded with `is_top_level == false`).
    pub is_top_level: bool,
    /// Arguments in recorded order.
    pub args: SmallVec<[RuntimeErrorArg; 4]>,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        for arg in &self.args {
            write!(f, "; {} {:#x}", arg.kind, arg.data)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn kind_bytes_round_trip() {
        for v in 0..8u8 {
            let kind = RuntimeErrorKind::from_u8(v).unwrap();
            assert_eq!(kind.as_u8(), v);
        }
        assert_eq!(RuntimeErrorKind::from_u8(8), None);
    }

    #[test]
    fn arg_kind_bytes_round_trip() {
        for v in 0..6u8 {
            let kind = RuntimeErrorArgKind::from_u8(v).unwrap();
            assert_eq!(kind.as_u8(), v);
        }
        assert_eq!(RuntimeErrorArgKind::from_u8(6), None);
    }

    #[test]
    fn display_includes_args() {
        let err = RuntimeError {
            kind: RuntimeErrorKind::MemoryOverflow,
            is_top_level: true,
            args: smallvec![RuntimeErrorArg {
                kind: RuntimeErrorArgKind::Address,
                data: 0x2000,
            }],
        };
        let s = err.to_string();
        assert!(s.contains("past end"));
        assert!(s.contains("0x2000"));
    }
}
