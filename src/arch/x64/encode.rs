//! Byte-level building blocks: prefixes, ModRM/SIB packing and displacements.
//!
//! Everything here appends to a plain byte vector. The assembler decides which opcode to use,
//! these helpers only know how operands are laid out around it.

use bitflags::bitflags;

use super::reg::{Register, RegisterIndexOffset, RegisterIndexOffsetRegister, RegisterOffset};
use crate::common::{fits_i8, Size};
use crate::serialize::push_i32;

/// Address-size override, selects 32-bit address computation.
pub const ADDRESS_SIZE_OVERRIDE: u8 = 0x67;

bitflags! {
    /// Bits of the REX prefix. The prefix byte is `0x40 | bits`.
    pub struct Rex: u8 {
        /// 64-bit operand size.
        const W = 0b1000;
        /// Extension of ModRM.reg.
        const R = 0b0100;
        /// Extension of SIB.index.
        const X = 0b0010;
        /// Extension of ModRM.rm, SIB.base or the opcode register.
        const B = 0b0001;
    }
}

impl Rex {
    /// Prefix for an instruction whose only register sits in ModRM.rm or the opcode.
    pub fn for_rm(rm: Register) -> Rex {
        let mut rex = Rex::empty();
        rex.set(Rex::W, rm.is_64());
        rex.set(Rex::B, rm.is_extended());
        rex
    }

    /// Prefix for a register in ModRM.reg, which also decides the operand size.
    pub fn for_reg(reg: Register) -> Rex {
        let mut rex = Rex::empty();
        rex.set(Rex::W, reg.is_64());
        rex.set(Rex::R, reg.is_extended());
        rex
    }

    pub fn for_reg_rm(reg: Register, rm: Register) -> Rex {
        let mut rex = Rex::for_reg(reg);
        rex.set(Rex::B, rm.is_extended());
        rex
    }

    /// The prefix byte, or nothing when no bit is needed.
    pub fn byte(self) -> Option<u8> {
        if self.is_empty() {
            None
        } else {
            Some(0x40 | self.bits())
        }
    }
}

pub const fn modrm(mode: u8, reg: u8, rm: u8) -> u8 {
    ((mode & 0b11) << 6) | ((reg & 0b111) << 3) | (rm & 0b111)
}

/// # Panics
/// On a scale that is not 1, 2, 4 or 8.
pub fn sib(scale: u8, index: u8, base: u8) -> u8 {
    let scale = match scale {
        1 => 0,
        2 => 1,
        4 => 2,
        8 => 3,
        _ => panic!("Type size not representable as scale"),
    };
    (scale << 6) | ((index & 0b111) << 3) | (base & 0b111)
}

/// How a memory operand's displacement is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Displacement {
    None,
    Byte(i8),
    Dword(i32),
}

impl Displacement {
    /// Picks the shortest form for `offset` from `base`.
    ///
    /// rbp and r13 have no zero-displacement form: mod=00 with their low bits means
    /// RIP-relative (ModRM) or "no base" (SIB).
    pub fn for_base(base: Register, offset: i32) -> Displacement {
        if offset == 0 && base.low_bits() != 5 {
            Displacement::None
        } else if fits_i8(offset) {
            Displacement::Byte(offset as i8)
        } else {
            Displacement::Dword(offset)
        }
    }

    /// The ModRM.mod value announcing this displacement.
    pub fn mode(self) -> u8 {
        match self {
            Displacement::None => 0b00,
            Displacement::Byte(_) => 0b01,
            Displacement::Dword(_) => 0b10,
        }
    }

    pub fn len(self) -> usize {
        match self {
            Displacement::None => 0,
            Displacement::Byte(_) => 1,
            Displacement::Dword(_) => 4,
        }
    }

    pub fn write(self, bytes: &mut Vec<u8>) {
        match self {
            Displacement::None => (),
            Displacement::Byte(disp) => bytes.push(disp as u8),
            Displacement::Dword(disp) => push_i32(bytes, disp),
        }
    }
}

/// A memory operand that can fill ModRM.rm (plus SIB and displacement).
pub trait Address: Copy {
    /// Width of the registers computing the address.
    fn address_size(self) -> Size;

    /// The X and B bits this operand contributes to the REX prefix.
    fn rex(self) -> Rex;

    /// Writes ModRM, SIB and displacement with `reg_field` in ModRM.reg.
    fn write_modrm(self, reg_field: u8, bytes: &mut Vec<u8>);
}

impl Address for RegisterOffset {
    fn address_size(self) -> Size {
        self.reg().size()
    }

    fn rex(self) -> Rex {
        let mut rex = Rex::empty();
        rex.set(Rex::B, self.reg().is_extended());
        rex
    }

    fn write_modrm(self, reg_field: u8, bytes: &mut Vec<u8>) {
        let base = self.reg();
        let disp = Displacement::for_base(base, self.offset());
        if base.low_bits() == 4 {
            // rsp and r12 share the "SIB follows" rm value
            bytes.push(modrm(disp.mode(), reg_field, 0b100));
            bytes.push(sib(1, 0b100, 0b100));
        } else {
            bytes.push(modrm(disp.mode(), reg_field, base.low_bits()));
        }
        disp.write(bytes);
    }
}

impl Address for RegisterIndexOffset {
    fn address_size(self) -> Size {
        self.reg().size()
    }

    fn rex(self) -> Rex {
        let mut rex = Rex::empty();
        rex.set(Rex::X, self.reg().is_extended());
        rex
    }

    fn write_modrm(self, reg_field: u8, bytes: &mut Vec<u8>) {
        // without a base the SIB form always carries a 32-bit displacement
        bytes.push(modrm(0b00, reg_field, 0b100));
        bytes.push(sib(self.scale(), self.reg().low_bits(), 0b101));
        push_i32(bytes, self.offset());
    }
}

impl Address for RegisterIndexOffsetRegister {
    fn address_size(self) -> Size {
        self.reg().size()
    }

    fn rex(self) -> Rex {
        let mut rex = Rex::empty();
        rex.set(Rex::X, self.reg().is_extended());
        rex.set(Rex::B, self.base().reg().is_extended());
        rex
    }

    fn write_modrm(self, reg_field: u8, bytes: &mut Vec<u8>) {
        let disp = if self.has_fixed_offset() {
            Displacement::Byte(self.fixed_offset())
        } else {
            Displacement::None
        };
        bytes.push(modrm(disp.mode(), reg_field, 0b100));
        bytes.push(sib(self.scale(), self.reg().low_bits(), self.base().reg().low_bits()));
        disp.write(bytes);
    }
}

/// `[0x67] [REX] opcode ModRM [SIB] [disp]` with `reg` in ModRM.reg.
pub fn encode_addressed<A: Address>(bytes: &mut Vec<u8>, opcode: &[u8], reg: Register, address: A) {
    if address.address_size() == Size::DWORD {
        bytes.push(ADDRESS_SIZE_OVERRIDE);
    }
    if let Some(rex) = (Rex::for_reg(reg) | address.rex()).byte() {
        bytes.push(rex);
    }
    bytes.extend_from_slice(opcode);
    address.write_modrm(reg.low_bits(), bytes);
}

/// Register to register form, `reg` in ModRM.reg and `rm` in ModRM.rm.
pub fn encode_reg_rm(bytes: &mut Vec<u8>, opcode: &[u8], reg: Register, rm: Register) {
    if let Some(rex) = Rex::for_reg_rm(reg, rm).byte() {
        bytes.push(rex);
    }
    bytes.extend_from_slice(opcode);
    bytes.push(modrm(0b11, reg.low_bits(), rm.low_bits()));
}

/// Single register form where ModRM.reg holds an opcode extension (`/digit`).
pub fn encode_ext_rm(bytes: &mut Vec<u8>, opcode: &[u8], extension: u8, rm: Register) {
    if let Some(rex) = Rex::for_rm(rm).byte() {
        bytes.push(rex);
    }
    bytes.extend_from_slice(opcode);
    bytes.push(modrm(0b11, extension, rm.low_bits()));
}
