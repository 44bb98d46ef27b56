//! A runtime assembler for x86-64.
//!
//! Instructions are emitted one at a time into an `Assembler`. Branches to code that already
//! exists take a `Label`; branches to code not written yet return a `ForwardLabel` that is
//! bound once the target is reached. Finally the buffer is copied into executable memory,
//! native calls are relocated against its real address, and a typed function pointer comes
//! back.
//!
//! ```no_run
//! use jitasm::{abi, Assembler};
//!
//! let mut asm = Assembler::new();
//! asm.prologue();
//! asm.mov(abi::RETURN, abi::ARG1)?;
//! asm.add(abi::RETURN, abi::ARG0)?;
//! asm.epilogue();
//! asm.ret();
//!
//! let sum = unsafe { asm.compile::<extern "C" fn(i64, i64) -> i64>()? };
//! assert_eq!((sum.get())(2, 7), 9);
//! # Ok::<(), jitasm::Error>(())
//! ```

// utility
extern crate bitflags;
extern crate byteorder;
extern crate lazy_static;
extern crate memmap2;

/// Diagnostics for state that does not show up in the emitted bytes. Printed to stderr when
/// the `trace_asm` feature is enabled.
macro_rules! trace {
    ($($arg:tt)*) => {
        if cfg!(feature = "trace_asm") {
            eprintln!($($arg)*);
        }
    };
}

/// Module with common infrastructure across the assembler
mod common;
/// Module with the target description and operand encoding
pub mod arch;
/// Module containing the code buffer and the emission API
pub mod assembler;
/// Module contaning the implementation of directives
mod directive;
mod error;
/// Module turning buffers into executable routines
pub mod runtime;
mod serialize;

pub use arch::abi;
pub use arch::x64::{
    regs, Register, RegisterIndex, RegisterIndexOffset, RegisterIndexOffsetRegister,
    RegisterOffset,
};
pub use assembler::{Assembler, ForwardLabel, Label};
pub use common::Size;
pub use directive::MalformedDirectiveError;
pub use error::Error;
pub use runtime::{BlockFn, Compiled, JitFn, MemoryBlock, Relocation};
