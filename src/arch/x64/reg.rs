use std::collections::HashMap;
use std::fmt;
use std::ops::{Add, Mul, Sub};
use std::str::FromStr;

use lazy_static::lazy_static;

use crate::common::{fits_i8, Size};
use crate::error::Error;

const NAMES_64: [&str; 16] = [
    "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi",
    "r8", "r9", "r10", "r11", "r12", "r13", "r14", "r15",
];

const NAMES_32: [&str; 16] = [
    "eax", "ecx", "edx", "ebx", "esp", "ebp", "esi", "edi",
    "r8d", "r9d", "r10d", "r11d", "r12d", "r13d", "r14d", "r15d",
];

lazy_static! {
    static ref BY_NAME: HashMap<&'static str, Register> = {
        let mut map = HashMap::new();
        for index in 0..16u8 {
            map.insert(NAMES_64[usize::from(index)], Register::new(index, Size::QWORD));
            map.insert(NAMES_32[usize::from(index)], Register::new(index, Size::DWORD));
        }
        map
    };
}

/// One of the sixteen general purpose registers, viewed at 32 or 64 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Register {
    index: u8,
    size: Size,
}

impl Register {
    /// # Panics
    /// When `index` is not below 16.
    pub const fn new(index: u8, size: Size) -> Register {
        assert!(index < 16, "register index out of range");
        Register { index, size }
    }

    /// The 4-bit hardware number.
    pub const fn index(self) -> u8 {
        self.index
    }

    pub const fn size(self) -> Size {
        self.size
    }

    /// The part of the index that fits in ModRM, SIB and `+r` opcode fields.
    pub const fn low_bits(self) -> u8 {
        self.index & 0x7
    }

    /// r8 through r15: the fourth index bit travels in the REX prefix.
    pub const fn is_extended(self) -> bool {
        self.index & 0x8 != 0
    }

    pub fn is_64(self) -> bool {
        self.size == Size::QWORD
    }

    /// Whether this register alone forces a REX prefix.
    pub fn needs_rex(self) -> bool {
        self.is_64() || self.is_extended()
    }

    pub const fn as_dword(self) -> Register {
        Register { index: self.index, size: Size::DWORD }
    }

    pub const fn as_qword(self) -> Register {
        Register { index: self.index, size: Size::QWORD }
    }

    /// Fails with `SizeMismatch` unless the register has the given width.
    pub fn expect_size(self, size: Size) -> Result<(), Error> {
        if self.size == size {
            Ok(())
        } else {
            Err(Error::SizeMismatch { expected: size, found: self.size })
        }
    }

    pub fn name(self) -> &'static str {
        match self.size {
            Size::QWORD => NAMES_64[usize::from(self.index)],
            Size::DWORD => NAMES_32[usize::from(self.index)],
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseRegisterError(pub String);

impl fmt::Display for ParseRegisterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown register '{}'", self.0)
    }
}

impl std::error::Error for ParseRegisterError {}

impl FromStr for Register {
    type Err = ParseRegisterError;

    fn from_str(s: &str) -> Result<Register, ParseRegisterError> {
        BY_NAME
            .get(s.to_ascii_lowercase().as_str())
            .copied()
            .ok_or_else(|| ParseRegisterError(s.to_string()))
    }
}

/// `[reg + offset]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterOffset {
    reg: Register,
    offset: i32,
}

impl RegisterOffset {
    pub const fn new(reg: Register, offset: i32) -> RegisterOffset {
        RegisterOffset { reg, offset }
    }

    pub const fn reg(self) -> Register {
        self.reg
    }

    pub const fn offset(self) -> i32 {
        self.offset
    }
}

impl From<Register> for RegisterOffset {
    fn from(reg: Register) -> RegisterOffset {
        RegisterOffset::new(reg, 0)
    }
}

/// `[reg * scale]`, only usable as part of the larger forms below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterIndex {
    reg: Register,
    scale: u8,
}

impl RegisterIndex {
    /// Scales are 2, 4 or 8. The stack pointer has no encoding as an index.
    pub fn new(reg: Register, scale: u8) -> Result<RegisterIndex, Error> {
        match scale {
            2 | 4 | 8 => (),
            _ => return Err(Error::Unsupported("index scale must be 2, 4 or 8")),
        }
        if reg.index() == 4 {
            return Err(Error::Unsupported("rsp cannot be used as an index register"));
        }
        Ok(RegisterIndex { reg, scale })
    }

    pub const fn reg(self) -> Register {
        self.reg
    }

    pub const fn scale(self) -> u8 {
        self.scale
    }
}

/// `[reg * scale + offset]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterIndexOffset {
    index: RegisterIndex,
    offset: i32,
}

impl RegisterIndexOffset {
    pub const fn new(index: RegisterIndex, offset: i32) -> RegisterIndexOffset {
        RegisterIndexOffset { index, offset }
    }

    pub const fn index(self) -> RegisterIndex {
        self.index
    }

    pub const fn reg(self) -> Register {
        self.index.reg
    }

    pub const fn scale(self) -> u8 {
        self.index.scale
    }

    pub const fn offset(self) -> i32 {
        self.offset
    }
}

impl From<RegisterIndex> for RegisterIndexOffset {
    fn from(index: RegisterIndex) -> RegisterIndexOffset {
        RegisterIndexOffset::new(index, 0)
    }
}

/// `[reg * scale + base + offset]` where the offset fits in a signed byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterIndexOffsetRegister {
    index: RegisterIndex,
    base: RegisterOffset,
}

impl RegisterIndexOffsetRegister {
    /// The base must be as wide as the index and its offset must fit in a byte.
    pub fn new(index: RegisterIndex, base: RegisterOffset) -> Result<RegisterIndexOffsetRegister, Error> {
        base.reg().expect_size(index.reg().size())?;
        if !fits_i8(base.offset()) {
            return Err(Error::Unsupported("base offset of a scaled index must fit in 8 bits"));
        }
        Ok(RegisterIndexOffsetRegister { index, base })
    }

    pub const fn index(self) -> RegisterIndex {
        self.index
    }

    pub const fn reg(self) -> Register {
        self.index.reg
    }

    pub const fn scale(self) -> u8 {
        self.index.scale
    }

    pub const fn base(self) -> RegisterOffset {
        self.base
    }

    /// The displacement byte is required for a nonzero offset, and for rbp/r13 as base since
    /// their no-displacement encoding means "no base".
    pub fn has_fixed_offset(self) -> bool {
        self.base.offset() != 0 || self.base.reg().low_bits() == 5
    }

    pub fn fixed_offset(self) -> i8 {
        self.base.offset() as i8
    }
}

fn build<T>(result: Result<T, Error>) -> T {
    match result {
        Ok(operand) => operand,
        Err(err) => panic!("invalid addressing operand: {}", err),
    }
}

/// `-offset`, which does not exist for `i32::MIN`.
fn negate(offset: i32) -> Result<i32, Error> {
    offset
        .checked_neg()
        .ok_or(Error::Unsupported("offset out of range for a 32-bit displacement"))
}

impl Add<i32> for Register {
    type Output = RegisterOffset;

    fn add(self, offset: i32) -> RegisterOffset {
        RegisterOffset::new(self, offset)
    }
}

/// # Panics
/// When `offset` is `i32::MIN`.
impl Sub<i32> for Register {
    type Output = RegisterOffset;

    fn sub(self, offset: i32) -> RegisterOffset {
        RegisterOffset::new(self, build(negate(offset)))
    }
}

/// # Panics
/// On a scale other than 2, 4 or 8, or when scaling rsp. Use `RegisterIndex::new` to handle
/// these as errors.
impl Mul<u8> for Register {
    type Output = RegisterIndex;

    fn mul(self, scale: u8) -> RegisterIndex {
        build(RegisterIndex::new(self, scale))
    }
}

impl Add<i32> for RegisterIndex {
    type Output = RegisterIndexOffset;

    fn add(self, offset: i32) -> RegisterIndexOffset {
        RegisterIndexOffset::new(self, offset)
    }
}

/// # Panics
/// When `offset` is `i32::MIN`.
impl Sub<i32> for RegisterIndex {
    type Output = RegisterIndexOffset;

    fn sub(self, offset: i32) -> RegisterIndexOffset {
        RegisterIndexOffset::new(self, build(negate(offset)))
    }
}

/// # Panics
/// When the base width differs from the index width.
impl Add<Register> for RegisterIndex {
    type Output = RegisterIndexOffsetRegister;

    fn add(self, base: Register) -> RegisterIndexOffsetRegister {
        build(RegisterIndexOffsetRegister::new(self, base.into()))
    }
}

/// # Panics
/// When the base width differs from the index width or the offset needs more than 8 bits.
impl Add<RegisterOffset> for RegisterIndex {
    type Output = RegisterIndexOffsetRegister;

    fn add(self, base: RegisterOffset) -> RegisterIndexOffsetRegister {
        build(RegisterIndexOffsetRegister::new(self, base))
    }
}

impl Add<RegisterIndex> for Register {
    type Output = RegisterIndexOffsetRegister;

    fn add(self, index: RegisterIndex) -> RegisterIndexOffsetRegister {
        index + self
    }
}

impl Add<RegisterIndex> for RegisterOffset {
    type Output = RegisterIndexOffsetRegister;

    fn add(self, index: RegisterIndex) -> RegisterIndexOffsetRegister {
        index + self
    }
}

/// Predefined registers.
pub mod regs {
    use super::Register;
    use crate::common::Size;

    pub const EAX: Register = Register::new(0, Size::DWORD);
    pub const ECX: Register = Register::new(1, Size::DWORD);
    pub const EDX: Register = Register::new(2, Size::DWORD);
    pub const EBX: Register = Register::new(3, Size::DWORD);
    pub const ESP: Register = Register::new(4, Size::DWORD);
    pub const EBP: Register = Register::new(5, Size::DWORD);
    pub const ESI: Register = Register::new(6, Size::DWORD);
    pub const EDI: Register = Register::new(7, Size::DWORD);
    pub const R8D: Register = Register::new(8, Size::DWORD);
    pub const R9D: Register = Register::new(9, Size::DWORD);
    pub const R10D: Register = Register::new(10, Size::DWORD);
    pub const R11D: Register = Register::new(11, Size::DWORD);
    pub const R12D: Register = Register::new(12, Size::DWORD);
    pub const R13D: Register = Register::new(13, Size::DWORD);
    pub const R14D: Register = Register::new(14, Size::DWORD);
    pub const R15D: Register = Register::new(15, Size::DWORD);

    pub const RAX: Register = Register::new(0, Size::QWORD);
    pub const RCX: Register = Register::new(1, Size::QWORD);
    pub const RDX: Register = Register::new(2, Size::QWORD);
    pub const RBX: Register = Register::new(3, Size::QWORD);
    pub const RSP: Register = Register::new(4, Size::QWORD);
    pub const RBP: Register = Register::new(5, Size::QWORD);
    pub const RSI: Register = Register::new(6, Size::QWORD);
    pub const RDI: Register = Register::new(7, Size::QWORD);
    pub const R8: Register = Register::new(8, Size::QWORD);
    pub const R9: Register = Register::new(9, Size::QWORD);
    pub const R10: Register = Register::new(10, Size::QWORD);
    pub const R11: Register = Register::new(11, Size::QWORD);
    pub const R12: Register = Register::new(12, Size::QWORD);
    pub const R13: Register = Register::new(13, Size::QWORD);
    pub const R14: Register = Register::new(14, Size::QWORD);
    pub const R15: Register = Register::new(15, Size::QWORD);

    pub const REGISTER_COUNT: usize = 16;
}

#[cfg(test)]
mod tests {
    use super::regs::*;
    use super::*;

    #[test]
    fn classification() {
        assert_eq!(R12.low_bits(), 4);
        assert!(R12.is_extended());
        assert!(R12D.needs_rex());
        assert!(RAX.needs_rex());
        assert!(!EAX.needs_rex());
        assert_eq!(RBX.as_dword(), EBX);
        assert_eq!(R9D.as_qword(), R9);
    }

    #[test]
    fn names_round_trip() {
        for index in 0..16 {
            for &size in &[Size::DWORD, Size::QWORD] {
                let reg = Register::new(index, size);
                assert_eq!(reg.to_string().parse::<Register>(), Ok(reg));
            }
        }
        assert_eq!("R13D".parse::<Register>(), Ok(R13D));
        assert!("ax".parse::<Register>().is_err());
    }

    #[test]
    fn composed_operands() {
        let mem = RBX - 8;
        assert_eq!(mem.reg(), RBX);
        assert_eq!(mem.offset(), -8);

        let indexed = RCX * 4 + 16;
        assert_eq!(indexed.reg(), RCX);
        assert_eq!(indexed.scale(), 4);
        assert_eq!(indexed.offset(), 16);

        let full = (RDX + 3) + RCX * 8;
        assert_eq!(full.base().reg(), RDX);
        assert_eq!(full.fixed_offset(), 3);
        assert!(full.has_fixed_offset());
        assert!(!(RAX + RCX * 2).has_fixed_offset());
        assert!((RBP + RCX * 2).has_fixed_offset());
    }

    #[test]
    fn invalid_operands_are_rejected() {
        assert!(RegisterIndex::new(RCX, 3).is_err());
        assert!(RegisterIndex::new(RSP, 2).is_err());
        assert!(RegisterIndex::new(R12, 2).is_ok());

        let index = RegisterIndex::new(RCX, 4).unwrap();
        match RegisterIndexOffsetRegister::new(index, EDX.into()) {
            Err(Error::SizeMismatch { expected, found }) => {
                assert_eq!(expected, Size::QWORD);
                assert_eq!(found, Size::DWORD);
            },
            other => panic!("unexpected {:?}", other),
        }
        assert!(RegisterIndexOffsetRegister::new(index, RDX + 200).is_err());
    }

    #[test]
    #[should_panic]
    fn operator_scale_panics() {
        let _ = RAX * 3;
    }

    #[test]
    #[should_panic]
    fn unnegatable_offset_panics() {
        let _ = RBX - i32::MIN;
    }

    #[test]
    #[should_panic]
    fn unnegatable_index_offset_panics() {
        let _ = RCX * 4 - i32::MIN;
    }

    #[test]
    fn largest_negative_offsets() {
        assert_eq!((RBX - i32::MAX).offset(), -i32::MAX);
        assert_eq!((RCX * 2 - i32::MAX).offset(), -i32::MAX);
        assert_eq!((RBX + i32::MIN).offset(), i32::MIN);
        assert!(negate(i32::MIN).is_err());
    }
}
