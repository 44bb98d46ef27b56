//! x86-64 operand model and the byte-level encoding helpers built on it.
//!
//! ```text
//! [0x67] [REX] opcode [ModRM] [SIB] [disp8 | disp32] [imm8 | imm32 | imm64]
//! ```
//!
//! `0x67` only appears for memory operands addressed through 32-bit registers, REX only when a
//! 64-bit operand or one of r8-r15 takes part.

mod reg;
pub(crate) mod encode;

pub use crate::common::Size;
pub use reg::{
    regs, ParseRegisterError, Register, RegisterIndex, RegisterIndexOffset,
    RegisterIndexOffsetRegister, RegisterOffset,
};
pub use encode::{Address, Rex};
