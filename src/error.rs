use std::error;
use std::fmt;
use std::io;

use crate::common::Size;

/// Everything that can go wrong while assembling or loading a routine.
///
/// Encoding errors (`SizeMismatch`, `Unsupported`) are raised before any byte of the offending
/// instruction is written. `InsufficientSpace` is the one condition a caller is expected to
/// recover from, by retrying with a larger `MemoryBlock`.
#[derive(Debug)]
pub enum Error {
    /// Two register operands of one instruction have different widths.
    SizeMismatch {
        expected: Size,
        found: Size,
    },

    /// The operand combination has no encoding in this assembler.
    Unsupported(&'static str),

    /// A caller supplied region is smaller than the code that should be loaded into it.
    InsufficientSpace {
        needed: usize,
        available: usize,
    },

    /// Forward labels were never bound before the buffer was finalized.
    UnresolvedLabel {
        count: usize,
    },

    /// The operating system refused to map or protect memory.
    Memory(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::SizeMismatch { expected, found } => {
                write!(f, "operand size mismatch: expected {}, found {}", expected, found)
            },
            Error::Unsupported(what) => write!(f, "unsupported operand combination: {}", what),
            Error::InsufficientSpace { needed, available } => write!(
                f,
                "memory block too small: {} bytes needed, {} available",
                needed, available
            ),
            Error::UnresolvedLabel { count } => {
                write!(f, "{} forward label(s) were never bound", count)
            },
            Error::Memory(err) => write!(f, "executable memory error: {}", err),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Memory(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Memory(err)
    }
}
