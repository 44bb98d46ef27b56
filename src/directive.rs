use crate::assembler::Assembler;
use crate::common::Size;
use crate::serialize::{push_i32, push_u64};

/// Fill byte used when aligning code, a one-byte `nop`.
pub const DEFAULT_ALIGN_FILL: u8 = 0x90;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MalformedDirectiveError {
    /// Alignment that is zero or not a power of two.
    BadAlignment(usize),

    /// The data word at the index does not fit the requested size.
    ValueOutOfRange {
        /// The index, to match to the input list.
        idx: usize,
        value: i64,
    },
}

impl std::fmt::Display for MalformedDirectiveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MalformedDirectiveError::BadAlignment(value) => {
                write!(f, "alignment {} is not a power of two", value)
            },
            MalformedDirectiveError::ValueOutOfRange { idx, value } => {
                write!(f, "data value {} at index {} does not fit", value, idx)
            },
        }
    }
}

impl std::error::Error for MalformedDirectiveError {}

/// Non-instruction content of the buffer: padding, literal bytes and data words.
impl Assembler {
    /// Pads with `nop` to a multiple of `alignment`.
    pub fn align(&mut self, alignment: usize) -> Result<(), MalformedDirectiveError> {
        self.align_with(alignment, DEFAULT_ALIGN_FILL)
    }

    /// Pads with `fill` until the buffer length is a multiple of `alignment`.
    pub fn align_with(&mut self, alignment: usize, fill: u8) -> Result<(), MalformedDirectiveError> {
        if !alignment.is_power_of_two() {
            return Err(MalformedDirectiveError::BadAlignment(alignment));
        }
        let misalignment = self.len() & (alignment - 1);
        if misalignment != 0 {
            let padding = vec![fill; alignment - misalignment];
            self.extend_raw(&padding);
        }
        Ok(())
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.extend_raw(bytes);
    }

    /// Dwords accept both signed and unsigned 32-bit values.
    pub fn data(&mut self, size: Size, values: &[i64]) -> Result<(), MalformedDirectiveError> {
        if size == Size::DWORD {
            let bad = values
                .iter()
                .position(|&v| v < i64::from(i32::MIN) || v > i64::from(u32::MAX));
            if let Some(idx) = bad {
                return Err(MalformedDirectiveError::ValueOutOfRange { idx, value: values[idx] });
            }
        }

        let mut bytes = Vec::with_capacity(values.len() * usize::from(size.in_bytes()));
        for &value in values {
            match size {
                Size::DWORD => push_i32(&mut bytes, value as i32),
                Size::QWORD => push_u64(&mut bytes, value as u64),
            }
        }
        self.extend_raw(&bytes);
        Ok(())
    }
}
