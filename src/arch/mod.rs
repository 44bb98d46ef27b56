//! Target description. Only one instruction set is supported: x86-64 in long mode, using the
//! host's native calling convention.

pub mod x64;

/// The native integer calling convention of the host.
///
/// Generated routines are called through `extern "C"` function pointers, so their arguments
/// arrive in the registers listed here. Encoding does not depend on this table; only code
/// that is meant to be executed does.
pub mod abi {
    use super::x64::regs;
    use super::x64::Register;

    #[cfg(not(windows))]
    pub const ARG0: Register = regs::RDI;
    #[cfg(not(windows))]
    pub const ARG1: Register = regs::RSI;
    #[cfg(not(windows))]
    pub const ARG2: Register = regs::RDX;
    #[cfg(not(windows))]
    pub const ARG3: Register = regs::RCX;

    #[cfg(windows)]
    pub const ARG0: Register = regs::RCX;
    #[cfg(windows)]
    pub const ARG1: Register = regs::RDX;
    #[cfg(windows)]
    pub const ARG2: Register = regs::R8;
    #[cfg(windows)]
    pub const ARG3: Register = regs::R9;

    /// Integer argument registers in order.
    pub const ARGS: [Register; 4] = [ARG0, ARG1, ARG2, ARG3];

    /// Integer return value.
    pub const RETURN: Register = regs::RAX;

    /// Stack space a caller reserves for the callee's register arguments before a `call`.
    #[cfg(windows)]
    pub const SHADOW_SPACE: i32 = 32;
    #[cfg(not(windows))]
    pub const SHADOW_SPACE: i32 = 0;

    /// Registers a routine must restore before returning.
    #[cfg(not(windows))]
    pub const CALLEE_SAVED: [Register; 6] =
        [regs::RBX, regs::RBP, regs::R12, regs::R13, regs::R14, regs::R15];
    #[cfg(windows)]
    pub const CALLEE_SAVED: [Register; 8] = [
        regs::RBX, regs::RBP, regs::RDI, regs::RSI, regs::R12, regs::R13, regs::R14, regs::R15,
    ];
}

#[cfg(target_arch="x86_64")]
pub const CURRENT_ARCH: &str = "x64";
#[cfg(not(target_arch="x86_64"))]
pub const CURRENT_ARCH: &str = "unknown";

/// True when code produced by this crate can run on the host.
pub const fn can_execute() -> bool {
    cfg!(target_arch = "x86_64")
}
