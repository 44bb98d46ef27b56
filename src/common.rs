//! This module contains various infrastructure that is shared between the operand model, the
//! encoder and the loader

use std::fmt;

/// Enum representing the width of a register operand in bytes.
/// Uses the NASM syntax for sizes (a word is 16 bits)
#[derive(Debug, PartialOrd, PartialEq, Ord, Eq, Hash, Clone, Copy)]
pub enum Size {
    DWORD = 4,
    QWORD = 8,
}

impl Size {
    pub const fn in_bytes(self) -> u8 {
        self as u8
    }

    pub const fn in_bits(self) -> u8 {
        self.in_bytes() * 8
    }

    pub fn as_literal(self) -> &'static str {
        match self {
            Size::DWORD => "i32",
            Size::QWORD => "i64",
        }
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Size::DWORD => write!(f, "dword"),
            Size::QWORD => write!(f, "qword"),
        }
    }
}

/// True when `value` survives a round trip through a sign-extended byte.
pub fn fits_i8(value: i32) -> bool {
    value >= i32::from(i8::MIN) && value <= i32::from(i8::MAX)
}

/// Narrow a buffer distance to a 32-bit displacement.
pub fn fits_i32(value: i64) -> Option<i32> {
    if value >= i64::from(i32::MIN) && value <= i64::from(i32::MAX) {
        Some(value as i32)
    } else {
        None
    }
}

/// Round `value` up to the next multiple of `align`, which must be a power of two.
pub fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}
