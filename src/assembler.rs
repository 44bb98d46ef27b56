//! The code buffer and everything that appends to it.
//!
//! Each emission method writes one complete instruction. Methods that can reject their operands
//! return a `Result` and check everything before the first byte is written, so the buffer never
//! holds half an instruction.

use std::collections::BTreeSet;
use std::ops::Sub;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::arch::x64::encode::{encode_addressed, encode_ext_rm, encode_reg_rm};
use crate::arch::x64::{
    regs, Register, RegisterIndexOffset, RegisterIndexOffsetRegister, RegisterOffset, Size,
};
use crate::common::{fits_i32, fits_i8};
use crate::error::Error;
use crate::runtime::{JitFn, Relocation};
use crate::serialize::{self, push_i32};

/// A position in the buffer that code has already been emitted up to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label {
    offset: usize,
}

impl Label {
    pub fn offset(self) -> usize {
        self.offset
    }
}

/// Distance in bytes between two labels.
impl Sub for Label {
    type Output = i64;

    fn sub(self, other: Label) -> i64 {
        self.offset as i64 - other.offset as i64
    }
}

/// A 32-bit placeholder waiting for its branch target.
///
/// Created by the `*_forward` emitters and consumed by `Assembler::bind`, which is why it can
/// be bound only once.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "forward labels must be bound before the code is compiled"]
pub struct ForwardLabel {
    owner: usize,
    position: usize,
}

impl ForwardLabel {
    /// Offset of the placeholder inside the buffer.
    pub fn position(&self) -> usize {
        self.position
    }
}

/// Source of `Assembler::id`, so forward labels can be traced to their session.
static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

/// An in-progress assembly session.
#[derive(Debug)]
pub struct Assembler {
    id: usize,
    bytes: Vec<u8>,
    calls: Vec<Relocation>,
    pending: BTreeSet<usize>,
}

impl Default for Assembler {
    fn default() -> Assembler {
        Assembler {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            bytes: Vec::new(),
            calls: Vec::new(),
            pending: BTreeSet::new(),
        }
    }
}

/// Instruction-level overloads. `Assembler::mov` and friends dispatch on these.
pub mod insn {
    use crate::error::Error;

    pub trait Mov<D, S> {
        fn mov(&mut self, dst: D, src: S) -> Result<(), Error>;
    }

    pub trait Lea<S> {
        fn lea(&mut self, dst: super::Register, src: S) -> Result<(), Error>;
    }

    pub trait Add<D, S> {
        fn add(&mut self, dst: D, src: S) -> Result<(), Error>;
    }

    pub trait Sub<D, S> {
        fn sub(&mut self, dst: D, src: S) -> Result<(), Error>;
    }

    pub trait Imul<D, S> {
        fn imul(&mut self, dst: D, src: S) -> Result<(), Error>;
    }

    pub trait Cmp<A, B> {
        fn cmp(&mut self, a: A, b: B) -> Result<(), Error>;
    }

    pub trait Xor<D, S> {
        fn xor(&mut self, dst: D, src: S) -> Result<(), Error>;
    }

    pub trait Call<T> {
        fn call(&mut self, target: T) -> Result<(), Error>;
    }
}

use self::insn::{Add, Call, Cmp, Imul, Lea, Mov, Sub as SubInsn, Xor};

fn check_bits(a: Register, b: Register) -> Result<(), Error> {
    b.expect_size(a.size())
}

impl Assembler {
    pub fn new() -> Assembler {
        Assembler::default()
    }

    pub fn with_capacity(capacity: usize) -> Assembler {
        Assembler {
            bytes: Vec::with_capacity(capacity),
            ..Assembler::default()
        }
    }

    /// Bytes emitted so far.
    pub fn code(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Native calls waiting for the final code address.
    pub fn relocations(&self) -> &[Relocation] {
        &self.calls
    }

    /// Number of forward labels not bound yet.
    pub fn unresolved(&self) -> usize {
        self.pending.len()
    }

    /// The little-endian 32-bit value at `position`, e.g. a bound branch displacement.
    pub fn read_i32(&self, position: usize) -> i32 {
        serialize::read_i32_at(&self.bytes, position)
    }

    /// Hex listing of the buffer.
    pub fn dump(&self) -> String {
        serialize::dump(&self.bytes)
    }

    fn push(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    fn push_i32(&mut self, value: i32) {
        push_i32(&mut self.bytes, value);
    }

    /// Raw bytes, for directives.
    pub(crate) fn extend_raw(&mut self, bytes: &[u8]) {
        self.push(bytes);
    }

    // Labels

    /// The current end of the buffer, as a target for backward branches.
    pub fn label(&self) -> Label {
        Label { offset: self.bytes.len() }
    }

    pub fn current_position(&self) -> Label {
        self.label()
    }

    /// Emits a zeroed 32-bit placeholder to be resolved by `bind`.
    pub fn forward_label(&mut self) -> ForwardLabel {
        let position = self.bytes.len();
        self.push_i32(0);
        self.pending.insert(position);
        trace!("forward label taken at {:#x}", position);
        ForwardLabel { owner: self.id, position }
    }

    /// Points a forward label at the current end of the buffer.
    ///
    /// The stored displacement is relative to the end of the placeholder, which is where the
    /// branching instruction ends.
    ///
    /// # Panics
    /// When the label was not created by this assembler.
    pub fn bind(&mut self, label: ForwardLabel) -> Label {
        assert!(
            label.owner == self.id && self.pending.remove(&label.position),
            "forward label at {:#x} does not belong to this assembler",
            label.position
        );
        let distance = (self.bytes.len() - label.position - 4) as i64;
        let distance = match fits_i32(distance) {
            Some(distance) => distance,
            None => panic!("forward branch distance {} does not fit in 32 bits", distance),
        };
        serialize::write_i32_at(&mut self.bytes, label.position, distance);
        trace!("forward label at {:#x} bound to {:#x}", label.position, self.bytes.len());
        self.label()
    }

    // Stack frame

    /// `push rbp; mov rbp, rsp`
    pub fn prologue(&mut self) {
        self.push(&[0x55, 0x48, 0x89, 0xE5]);
    }

    /// `pop rbp`
    pub fn epilogue(&mut self) {
        self.push(&[0x5D]);
    }

    pub fn push_reg(&mut self, reg: Register) -> Result<(), Error> {
        reg.expect_size(Size::QWORD)?;
        if reg.is_extended() {
            self.push(&[0x41]);
        }
        self.push(&[0x50 | reg.low_bits()]);
        Ok(())
    }

    pub fn pop_reg(&mut self, reg: Register) -> Result<(), Error> {
        reg.expect_size(Size::QWORD)?;
        if reg.is_extended() {
            self.push(&[0x41]);
        }
        self.push(&[0x58 | reg.low_bits()]);
        Ok(())
    }

    pub fn ret(&mut self) {
        self.push(&[0xC3]);
    }

    pub fn nop(&mut self) {
        self.push(&[0x90]);
    }

    // Data movement

    /// `xor r32, r32`, which also clears the upper half of the 64-bit register.
    pub fn set_zero(&mut self, dst: Register) {
        let dst = dst.as_dword();
        encode_reg_rm(&mut self.bytes, &[0x31], dst, dst);
    }

    pub fn mov<D, S>(&mut self, dst: D, src: S) -> Result<(), Error>
    where
        Self: Mov<D, S>,
    {
        <Self as Mov<D, S>>::mov(self, dst, src)
    }

    pub fn lea<S>(&mut self, dst: Register, src: S) -> Result<(), Error>
    where
        Self: Lea<S>,
    {
        <Self as Lea<S>>::lea(self, dst, src)
    }

    // Arithmetic

    pub fn add<D, S>(&mut self, dst: D, src: S) -> Result<(), Error>
    where
        Self: Add<D, S>,
    {
        <Self as Add<D, S>>::add(self, dst, src)
    }

    pub fn sub<D, S>(&mut self, dst: D, src: S) -> Result<(), Error>
    where
        Self: SubInsn<D, S>,
    {
        <Self as SubInsn<D, S>>::sub(self, dst, src)
    }

    pub fn imul<D, S>(&mut self, dst: D, src: S) -> Result<(), Error>
    where
        Self: Imul<D, S>,
    {
        <Self as Imul<D, S>>::imul(self, dst, src)
    }

    /// `dst = src * value`
    pub fn imul3(&mut self, dst: Register, src: Register, value: i32) -> Result<(), Error> {
        check_bits(dst, src)?;
        if fits_i8(value) {
            encode_reg_rm(&mut self.bytes, &[0x6B], dst, src);
            self.push(&[value as u8]);
        } else {
            encode_reg_rm(&mut self.bytes, &[0x69], dst, src);
            self.push_i32(value);
        }
        Ok(())
    }

    pub fn inc(&mut self, dst: Register) {
        encode_ext_rm(&mut self.bytes, &[0xFF], 0, dst);
    }

    pub fn xor<D, S>(&mut self, dst: D, src: S) -> Result<(), Error>
    where
        Self: Xor<D, S>,
    {
        <Self as Xor<D, S>>::xor(self, dst, src)
    }

    pub fn cmp<A, B>(&mut self, a: A, b: B) -> Result<(), Error>
    where
        Self: Cmp<A, B>,
    {
        <Self as Cmp<A, B>>::cmp(self, a, b)
    }

    /// Group-1 arithmetic with an immediate, `/extension` picks the operation.
    fn arith_imm(&mut self, extension: u8, dst: Register, value: i32) {
        if fits_i8(value) {
            encode_ext_rm(&mut self.bytes, &[0x83], extension, dst);
            self.push(&[value as u8]);
        } else {
            encode_ext_rm(&mut self.bytes, &[0x81], extension, dst);
            self.push_i32(value);
        }
    }

    // Control flow

    /// Labels only point backwards; one past the end of the buffer came from somewhere else.
    fn check_emitted(&self, label: Label) {
        assert!(
            label.offset <= self.bytes.len(),
            "label at {:#x} lies past the end of the buffer ({:#x})",
            label.offset,
            self.bytes.len()
        );
    }

    /// Branch to an emitted label with the short form when the distance fits a byte.
    fn jump_to(&mut self, short: u8, long: &[u8], to: Label) -> Result<(), Error> {
        self.check_emitted(to);
        // both distances are measured from the end of the branch
        let here = self.bytes.len() as i64;
        let short_distance = to.offset as i64 - (here + 2);
        if short_distance >= i64::from(i8::MIN) && short_distance <= i64::from(i8::MAX) {
            self.push(&[short, short_distance as u8]);
            return Ok(());
        }
        let long_distance = to.offset as i64 - (here + long.len() as i64 + 4);
        let long_distance = fits_i32(long_distance)
            .ok_or(Error::Unsupported("branch distance exceeds 32 bits"))?;
        self.push(long);
        self.push_i32(long_distance);
        Ok(())
    }

    pub fn je(&mut self, to: Label) -> Result<(), Error> {
        self.jump_to(0x74, &[0x0F, 0x84], to)
    }

    /// `je rel32` to a label bound later.
    pub fn je_forward(&mut self) -> ForwardLabel {
        self.push(&[0x0F, 0x84]);
        self.forward_label()
    }

    pub fn jne(&mut self, to: Label) -> Result<(), Error> {
        self.jump_to(0x75, &[0x0F, 0x85], to)
    }

    pub fn jne_forward(&mut self) -> ForwardLabel {
        self.push(&[0x0F, 0x85]);
        self.forward_label()
    }

    pub fn jmp(&mut self, to: Label) -> Result<(), Error> {
        self.jump_to(0xEB, &[0xE9], to)
    }

    pub fn jmp_forward(&mut self) -> ForwardLabel {
        self.push(&[0xE9]);
        self.forward_label()
    }

    pub fn call<T>(&mut self, target: T) -> Result<(), Error>
    where
        Self: Call<T>,
    {
        <Self as Call<T>>::call(self, target)
    }

    pub fn call_forward(&mut self) -> ForwardLabel {
        self.push(&[0xE8]);
        self.forward_label()
    }

    /// Direct call to code outside the buffer.
    ///
    /// The displacement depends on where the code ends up, so only the target is recorded
    /// here; the loader writes the displacement once the buffer has an address.
    pub fn call_address(&mut self, target: usize) {
        self.push(&[0xE8]);
        let position = self.bytes.len();
        self.calls.push(Relocation::new(position, target));
        self.push_i32(0);
        trace!("native call at {:#x} to {:#x}", position, target);
    }

    pub fn call_native<F: JitFn>(&mut self, function: F) {
        self.call_address(function.addr());
    }
}

impl Mov<Register, Register> for Assembler {
    fn mov(&mut self, dst: Register, src: Register) -> Result<(), Error> {
        check_bits(dst, src)?;
        encode_reg_rm(&mut self.bytes, &[0x89], src, dst);
        Ok(())
    }
}

impl Mov<Register, i32> for Assembler {
    fn mov(&mut self, dst: Register, value: i32) -> Result<(), Error> {
        if value == 0 {
            self.set_zero(dst);
        } else if dst.is_64() {
            // sign-extended imm32
            encode_ext_rm(&mut self.bytes, &[0xC7], 0, dst);
            self.push_i32(value);
        } else {
            if dst.is_extended() {
                self.push(&[0x41]);
            }
            self.push(&[0xB8 | dst.low_bits()]);
            self.push_i32(value);
        }
        Ok(())
    }
}

macro_rules! addressed_forms {
    ($($address:ty),*) => {$(
        impl Mov<$address, Register> for Assembler {
            fn mov(&mut self, dst: $address, src: Register) -> Result<(), Error> {
                encode_addressed(&mut self.bytes, &[0x89], src, dst);
                Ok(())
            }
        }

        impl Mov<Register, $address> for Assembler {
            fn mov(&mut self, dst: Register, src: $address) -> Result<(), Error> {
                encode_addressed(&mut self.bytes, &[0x8B], dst, src);
                Ok(())
            }
        }

        impl Lea<$address> for Assembler {
            fn lea(&mut self, dst: Register, src: $address) -> Result<(), Error> {
                encode_addressed(&mut self.bytes, &[0x8D], dst, src);
                Ok(())
            }
        }
    )*};
}

addressed_forms!(RegisterOffset, RegisterIndexOffset, RegisterIndexOffsetRegister);

impl Add<Register, Register> for Assembler {
    fn add(&mut self, dst: Register, src: Register) -> Result<(), Error> {
        check_bits(dst, src)?;
        encode_reg_rm(&mut self.bytes, &[0x01], src, dst);
        Ok(())
    }
}

impl Add<Register, i32> for Assembler {
    fn add(&mut self, dst: Register, value: i32) -> Result<(), Error> {
        if value == 1 {
            self.inc(dst);
        } else if !fits_i8(value) && dst.index() == regs::RAX.index() {
            // accumulator form has no ModRM byte
            if dst.is_64() {
                self.push(&[0x48]);
            }
            self.push(&[0x05]);
            self.push_i32(value);
        } else {
            self.arith_imm(0, dst, value);
        }
        Ok(())
    }
}

impl SubInsn<Register, Register> for Assembler {
    fn sub(&mut self, dst: Register, src: Register) -> Result<(), Error> {
        check_bits(dst, src)?;
        encode_reg_rm(&mut self.bytes, &[0x29], src, dst);
        Ok(())
    }
}

impl SubInsn<Register, i32> for Assembler {
    fn sub(&mut self, dst: Register, value: i32) -> Result<(), Error> {
        self.arith_imm(5, dst, value);
        Ok(())
    }
}

impl Imul<Register, Register> for Assembler {
    fn imul(&mut self, dst: Register, src: Register) -> Result<(), Error> {
        check_bits(dst, src)?;
        encode_reg_rm(&mut self.bytes, &[0x0F, 0xAF], dst, src);
        Ok(())
    }
}

impl Imul<Register, i32> for Assembler {
    fn imul(&mut self, dst: Register, value: i32) -> Result<(), Error> {
        self.imul3(dst, dst, value)
    }
}

impl Xor<Register, Register> for Assembler {
    fn xor(&mut self, dst: Register, src: Register) -> Result<(), Error> {
        check_bits(dst, src)?;
        if dst == src {
            // same result and flags, one byte shorter for 64-bit registers
            self.set_zero(dst);
        } else {
            encode_reg_rm(&mut self.bytes, &[0x31], src, dst);
        }
        Ok(())
    }
}

impl Cmp<Register, Register> for Assembler {
    fn cmp(&mut self, a: Register, b: Register) -> Result<(), Error> {
        check_bits(a, b)?;
        encode_reg_rm(&mut self.bytes, &[0x39], b, a);
        Ok(())
    }
}

impl Cmp<Register, i32> for Assembler {
    fn cmp(&mut self, a: Register, value: i32) -> Result<(), Error> {
        self.arith_imm(7, a, value);
        Ok(())
    }
}

/// Indirect call through a register holding the address.
impl Call<Register> for Assembler {
    fn call(&mut self, target: Register) -> Result<(), Error> {
        target.expect_size(Size::QWORD)?;
        if target.is_extended() {
            self.push(&[0x41]);
        }
        self.push(&[0xFF, 0xD0 | target.low_bits()]);
        Ok(())
    }
}

impl Call<Label> for Assembler {
    fn call(&mut self, target: Label) -> Result<(), Error> {
        self.check_emitted(target);
        let distance = target.offset as i64 - (self.bytes.len() as i64 + 5);
        let distance = fits_i32(distance).ok_or(Error::Unsupported("call distance exceeds 32 bits"))?;
        self.push(&[0xE8]);
        self.push_i32(distance);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::x64::regs::*;

    fn assemble<F: FnOnce(&mut Assembler) -> Result<(), Error>>(f: F) -> Vec<u8> {
        let mut asm = Assembler::new();
        f(&mut asm).unwrap();
        asm.code().to_vec()
    }

    #[test]
    fn frame() {
        let bytes = assemble(|a| {
            a.prologue();
            a.push_reg(RBX)?;
            a.push_reg(R12)?;
            a.pop_reg(R12)?;
            a.pop_reg(RBX)?;
            a.epilogue();
            a.nop();
            a.ret();
            Ok(())
        });
        assert_eq!(bytes, [0x55, 0x48, 0x89, 0xE5, 0x53, 0x41, 0x54, 0x41, 0x5C, 0x5B, 0x5D, 0x90, 0xC3]);
        assert!(Assembler::new().push_reg(EBX).is_err());
    }

    #[test]
    fn register_moves() {
        assert_eq!(assemble(|a| a.mov(RAX, RBX)), [0x48, 0x89, 0xD8]);
        assert_eq!(assemble(|a| a.mov(R8, R9)), [0x4D, 0x89, 0xC8]);
        assert_eq!(assemble(|a| a.mov(EAX, ECX)), [0x89, 0xC8]);
        assert_eq!(assemble(|a| a.mov(ECX, R9D)), [0x44, 0x89, 0xC9]);
    }

    #[test]
    fn size_mismatch_writes_nothing() {
        let mut asm = Assembler::new();
        match asm.mov(RAX, EBX) {
            Err(Error::SizeMismatch { expected, found }) => {
                assert_eq!(expected, Size::QWORD);
                assert_eq!(found, Size::DWORD);
            },
            other => panic!("unexpected {:?}", other),
        }
        assert!(asm.add(EAX, R8).is_err());
        assert!(asm.cmp(RAX, ECX).is_err());
        assert!(asm.call(EAX).is_err());
        assert!(asm.is_empty());
    }

    #[test]
    fn immediate_moves() {
        assert_eq!(assemble(|a| a.mov(EAX, 42)), [0xB8, 0x2A, 0x00, 0x00, 0x00]);
        assert_eq!(assemble(|a| a.mov(R9D, 1)), [0x41, 0xB9, 0x01, 0x00, 0x00, 0x00]);
        assert_eq!(assemble(|a| a.mov(RAX, -1)), [0x48, 0xC7, 0xC0, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(assemble(|a| a.mov(R15, 7)), [0x49, 0xC7, 0xC7, 0x07, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn zeroing_idiom() {
        assert_eq!(assemble(|a| a.mov(RAX, 0)), [0x31, 0xC0]);
        assert_eq!(assemble(|a| a.mov(R12, 0)), [0x45, 0x31, 0xE4]);
        assert_eq!(assemble(|a| a.xor(RCX, RCX)), [0x31, 0xC9]);
        assert_eq!(assemble(|a| a.xor(RCX, RDX)), [0x48, 0x31, 0xD1]);
    }

    #[test]
    fn add_sub_immediates() {
        assert_eq!(assemble(|a| a.add(RAX, 1)), [0x48, 0xFF, 0xC0]);
        assert_eq!(assemble(|a| a.add(RBX, 10)), [0x48, 0x83, 0xC3, 0x0A]);
        assert_eq!(assemble(|a| a.add(RBX, -128)), [0x48, 0x83, 0xC3, 0x80]);
        assert_eq!(assemble(|a| a.add(RBX, 0x1000)), [0x48, 0x81, 0xC3, 0x00, 0x10, 0x00, 0x00]);
        assert_eq!(assemble(|a| a.add(RAX, 0x1000)), [0x48, 0x05, 0x00, 0x10, 0x00, 0x00]);
        assert_eq!(assemble(|a| a.add(EAX, 200)), [0x05, 0xC8, 0x00, 0x00, 0x00]);
        assert_eq!(assemble(|a| a.sub(RDI, 10)), [0x48, 0x83, 0xEF, 0x0A]);
        assert_eq!(assemble(|a| a.sub(R12, 1)), [0x49, 0x83, 0xEC, 0x01]);
        assert_eq!(assemble(|a| a.sub(ESP, 300)), [0x81, 0xEC, 0x2C, 0x01, 0x00, 0x00]);
    }

    #[test]
    fn register_arithmetic() {
        assert_eq!(assemble(|a| a.add(RAX, RBX)), [0x48, 0x01, 0xD8]);
        assert_eq!(assemble(|a| a.sub(EAX, R10D)), [0x44, 0x29, 0xD0]);
        assert_eq!(assemble(|a| a.imul(RAX, RCX)), [0x48, 0x0F, 0xAF, 0xC1]);
        assert_eq!(assemble(|a| a.imul(R8D, EDX)), [0x44, 0x0F, 0xAF, 0xC2]);
        assert_eq!(assemble(|a| a.imul(RAX, 3)), [0x48, 0x6B, 0xC0, 0x03]);
        assert_eq!(assemble(|a| a.imul3(RDX, RCX, 1000)), [0x48, 0x69, 0xD1, 0xE8, 0x03, 0x00, 0x00]);
        assert_eq!(assemble(|a| { a.inc(R9D); Ok(()) }), [0x41, 0xFF, 0xC1]);
        assert_eq!(assemble(|a| a.cmp(RAX, RBX)), [0x48, 0x39, 0xD8]);
        assert_eq!(assemble(|a| a.cmp(R12, 0)), [0x49, 0x83, 0xFC, 0x00]);
        assert_eq!(assemble(|a| a.cmp(EAX, 1000)), [0x81, 0xF8, 0xE8, 0x03, 0x00, 0x00]);
    }

    #[test]
    fn memory_operands() {
        assert_eq!(assemble(|a| a.mov(RAX, RBX + 8)), [0x48, 0x8B, 0x43, 0x08]);
        assert_eq!(assemble(|a| a.mov(RBX + 8, RAX)), [0x48, 0x89, 0x43, 0x08]);
        assert_eq!(assemble(|a| a.mov(EAX, RDI + 0)), [0x8B, 0x07]);
        assert_eq!(assemble(|a| a.lea(RAX, RCX * 8 - 4)), [0x48, 0x8D, 0x04, 0xCD, 0xFC, 0xFF, 0xFF, 0xFF]);
        assert_eq!(assemble(|a| a.lea(RAX, RDI + RSI * 4)), [0x48, 0x8D, 0x04, 0xB7]);
        assert_eq!(assemble(|a| a.mov(RDI + RSI * 4, EDX)), [0x89, 0x14, 0xB7]);
    }

    #[test]
    fn backward_jumps() {
        let mut asm = Assembler::new();
        let top = asm.label();
        asm.nop();
        asm.jmp(top).unwrap();
        asm.je(top).unwrap();
        asm.jne(top).unwrap();
        assert_eq!(asm.code(), [0x90, 0xEB, 0xFD, 0x74, 0xFB, 0x75, 0xF9]);

        let mut asm = Assembler::new();
        let top = asm.label();
        for _ in 0..200 {
            asm.nop();
        }
        asm.jmp(top).unwrap();
        asm.je(top).unwrap();
        assert_eq!(&asm.code()[200..205], [0xE9, 0x33, 0xFF, 0xFF, 0xFF]);
        // -(200 + 5 + 6)
        assert_eq!(&asm.code()[205..], [0x0F, 0x84, 0x2D, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn forward_jumps_are_long() {
        let mut asm = Assembler::new();
        let skip = asm.jne_forward();
        assert_eq!(skip.position(), 2);
        assert_eq!(asm.unresolved(), 1);
        asm.nop();
        asm.nop();
        let target = asm.bind(skip);
        assert_eq!(target.offset(), 8);
        assert_eq!(asm.unresolved(), 0);
        assert_eq!(asm.code(), [0x0F, 0x85, 0x02, 0x00, 0x00, 0x00, 0x90, 0x90]);

        let mut asm = Assembler::new();
        let out = asm.jmp_forward();
        let here = asm.bind(out);
        assert_eq!(asm.code(), [0xE9, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(here - Label { offset: 0 }, 5);
    }

    #[test]
    #[should_panic]
    fn foreign_forward_label() {
        let mut other = Assembler::new();
        other.nop();
        let label = other.je_forward();
        Assembler::new().bind(label);
    }

    #[test]
    #[should_panic]
    fn foreign_forward_label_at_same_offset() {
        let mut mine = Assembler::new();
        let mut other = Assembler::new();
        let own = mine.jne_forward();
        let theirs = other.jne_forward();
        assert_eq!(own.position(), theirs.position());
        mine.nop();
        mine.bind(theirs);
    }

    #[test]
    fn foreign_bind_leaves_own_label_pending() {
        let mut mine = Assembler::new();
        let mut other = Assembler::new();
        let own = mine.jne_forward();
        let theirs = other.jne_forward();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| mine.bind(theirs)));
        assert!(result.is_err());
        assert_eq!(mine.unresolved(), 1);
        assert_eq!(mine.read_i32(own.position()), 0);
        mine.bind(own);
        assert_eq!(mine.unresolved(), 0);
    }

    #[test]
    #[should_panic]
    fn jump_to_label_past_the_end() {
        let mut long = Assembler::new();
        for _ in 0..16 {
            long.nop();
        }
        let far = long.label();
        let mut short = Assembler::new();
        short.jmp(far).unwrap();
    }

    #[test]
    #[should_panic]
    fn call_label_past_the_end() {
        let mut long = Assembler::new();
        long.ret();
        let far = long.label();
        Assembler::new().call(far).unwrap();
    }

    #[test]
    fn calls() {
        assert_eq!(assemble(|a| a.call(RAX)), [0xFF, 0xD0]);
        assert_eq!(assemble(|a| a.call(R11)), [0x41, 0xFF, 0xD3]);

        let mut asm = Assembler::new();
        let f = asm.label();
        asm.ret();
        asm.call(f).unwrap();
        assert_eq!(asm.code(), [0xC3, 0xE8, 0xFA, 0xFF, 0xFF, 0xFF]);

        let mut asm = Assembler::new();
        let later = asm.call_forward();
        asm.ret();
        asm.bind(later);
        assert_eq!(asm.code(), [0xE8, 0x01, 0x00, 0x00, 0x00, 0xC3]);

        let mut asm = Assembler::new();
        asm.nop();
        asm.call_address(0xDEAD_BEEF);
        assert_eq!(asm.code(), [0x90, 0xE8, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(asm.relocations(), [Relocation::new(2, 0xDEAD_BEEF)]);
    }
}
