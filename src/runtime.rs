//! Turning an assembled buffer into something callable.
//!
//! Loading always follows the same order: map read-write, copy the code, apply relocations,
//! switch to read-execute. A mapping is never writable and executable at the same time.

use std::io;
use std::marker::PhantomData;
use std::mem;

use memmap2::{Mmap, MmapMut, MmapOptions};

use crate::assembler::Assembler;
use crate::common::{align_up, fits_i32};
use crate::error::Error;
use crate::serialize::{write_i32_at, write_u64_at};

/// `jmp qword [rip + 0]` followed by the absolute target, padded to 16 bytes.
const STUB_LEN: usize = 16;
const STUB_PREFIX: [u8; 6] = [0xFF, 0x25, 0x00, 0x00, 0x00, 0x00];
const STUB_ALIGN: usize = 16;
/// Filler between code and stubs.
const INT3: u8 = 0xCC;

/// A native call waiting for the address of the code: the 32-bit placeholder at `position`
/// becomes the distance to `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relocation {
    position: usize,
    target: usize,
}

impl Relocation {
    pub fn new(position: usize, target: usize) -> Relocation {
        Relocation { position, target }
    }

    pub fn position(self) -> usize {
        self.position
    }

    pub fn target(self) -> usize {
        self.target
    }
}

/// Function pointer types generated code can be viewed as.
///
/// # Safety
/// Implementors must be plain function pointers, so that a code address can be reinterpreted
/// as `Self`.
pub unsafe trait JitFn: Copy {
    /// Reinterprets a code address.
    ///
    /// # Safety
    /// `ptr` must point at executable code that follows the calling convention and signature
    /// of `Self`, and must stay mapped for as long as the result is called.
    unsafe fn from_ptr(ptr: *const u8) -> Self;

    fn addr(self) -> usize;
}

macro_rules! jit_fn {
    ($($arg:ident),*) => {
        unsafe impl<R, $($arg),*> JitFn for extern "C" fn($($arg),*) -> R {
            unsafe fn from_ptr(ptr: *const u8) -> Self {
                mem::transmute_copy::<*const u8, Self>(&ptr)
            }

            fn addr(self) -> usize {
                self as usize
            }
        }
    };
}

jit_fn!();
jit_fn!(A);
jit_fn!(A, B);
jit_fn!(A, B, C);
jit_fn!(A, B, C, D);
jit_fn!(A, B, C, D, E);
jit_fn!(A, B, C, D, E, G);

/// Distinct call targets, each getting one stub.
fn stub_targets(relocations: &[Relocation]) -> Vec<usize> {
    let mut targets: Vec<usize> = relocations.iter().map(|r| r.target).collect();
    targets.sort_unstable();
    targets.dedup();
    targets
}

/// Bytes needed to load `code_len` bytes of code with these relocations.
fn layout_len(code_len: usize, relocations: &[Relocation]) -> usize {
    let stubs = stub_targets(relocations).len();
    if stubs == 0 {
        code_len
    } else {
        align_up(code_len, STUB_ALIGN) + stubs * STUB_LEN
    }
}

/// Copies `code` to the start of `region` and resolves every relocation against the region's
/// address. Calls out of 32-bit range go through a stub placed after the code.
fn load(code: &[u8], relocations: &[Relocation], region: &mut [u8]) -> Result<(), Error> {
    let needed = layout_len(code.len(), relocations);
    if region.len() < needed {
        return Err(Error::InsufficientSpace { needed, available: region.len() });
    }
    region[..code.len()].copy_from_slice(code);

    let base = region.as_ptr() as usize;
    let targets = stub_targets(relocations);
    let stubs = align_up(code.len(), STUB_ALIGN);
    if !targets.is_empty() {
        for byte in &mut region[code.len()..stubs] {
            *byte = INT3;
        }
    }
    for (i, &target) in targets.iter().enumerate() {
        let stub = stubs + i * STUB_LEN;
        region[stub..stub + STUB_PREFIX.len()].copy_from_slice(&STUB_PREFIX);
        write_u64_at(region, stub + STUB_PREFIX.len(), target as u64);
        for byte in &mut region[stub + STUB_PREFIX.len() + 8..stub + STUB_LEN] {
            *byte = INT3;
        }
    }

    for relocation in relocations {
        let next = (base + relocation.position + 4) as i64;
        let distance = match fits_i32(relocation.target as i64 - next) {
            Some(distance) => distance,
            None => {
                let index = targets.binary_search(&relocation.target).unwrap_or_default();
                let stub = (base + stubs + index * STUB_LEN) as i64;
                fits_i32(stub - next).ok_or(Error::Unsupported("call stub out of 32-bit range"))?
            },
        };
        write_i32_at(region, relocation.position, distance);
        trace!(
            "relocated call at {:#x} to {:#x} (displacement {})",
            base + relocation.position,
            relocation.target,
            distance
        );
    }
    Ok(())
}

fn anonymous(len: usize) -> Result<MmapMut, Error> {
    // zero-length mappings are rejected by the OS
    Ok(MmapOptions::new().len(len.max(1)).map_anon()?)
}

fn lost_mapping() -> Error {
    Error::Memory(io::Error::new(
        io::ErrorKind::Other,
        "memory block lost its mapping after a failed protection change",
    ))
}

/// A compiled routine that owns its executable memory. The memory is unmapped on drop.
pub struct Compiled<F: JitFn> {
    map: Mmap,
    function: F,
}

impl<F: JitFn> Compiled<F> {
    /// The callable entry point. It must not be called after `self` is dropped.
    pub fn get(&self) -> F {
        self.function
    }

    /// The loaded bytes, relocations applied.
    pub fn code(&self) -> &[u8] {
        &self.map
    }

    pub fn addr(&self) -> usize {
        self.map.as_ptr() as usize
    }
}

enum Region {
    Writable(MmapMut),
    Executable(Mmap),
    Lost,
}

/// Caller-owned memory that can receive one compiled routine at a time.
///
/// Every compilation maps the block read-write again, so a block can be reused once the
/// previous routine's `BlockFn` is gone.
pub struct MemoryBlock {
    region: Region,
    len: usize,
}

impl MemoryBlock {
    pub fn new(len: usize) -> Result<MemoryBlock, Error> {
        let map = anonymous(len)?;
        let len = map.len();
        Ok(MemoryBlock { region: Region::Writable(map), len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_executable(&self) -> bool {
        match self.region {
            Region::Executable(_) => true,
            _ => false,
        }
    }

    fn writable(&mut self) -> Result<&mut MmapMut, Error> {
        let map = match mem::replace(&mut self.region, Region::Lost) {
            Region::Writable(map) => map,
            Region::Executable(map) => map.make_mut()?,
            Region::Lost => return Err(lost_mapping()),
        };
        self.region = Region::Writable(map);
        match &mut self.region {
            Region::Writable(map) => Ok(map),
            _ => unreachable!(),
        }
    }

    /// Switches to read-execute and returns the start address.
    fn seal(&mut self) -> Result<*const u8, Error> {
        let map = match mem::replace(&mut self.region, Region::Lost) {
            Region::Writable(map) => map.make_exec()?,
            Region::Executable(map) => map,
            Region::Lost => return Err(lost_mapping()),
        };
        let ptr = map.as_ptr();
        self.region = Region::Executable(map);
        trace!("memory block at {:p} switched to read-execute", ptr);
        Ok(ptr)
    }
}

/// A routine living in a `MemoryBlock`, which stays borrowed while this exists.
pub struct BlockFn<'a, F: JitFn> {
    function: F,
    _block: PhantomData<&'a mut MemoryBlock>,
}

impl<'a, F: JitFn> BlockFn<'a, F> {
    pub fn get(&self) -> F {
        self.function
    }
}

impl Assembler {
    /// Bytes of executable memory the code needs, including call stubs.
    pub fn required_len(&self) -> usize {
        layout_len(self.len(), self.relocations())
    }

    fn check_resolved(&self) -> Result<(), Error> {
        match self.unresolved() {
            0 => Ok(()),
            count => Err(Error::UnresolvedLabel { count }),
        }
    }

    /// Loads the code into freshly mapped memory.
    ///
    /// # Safety
    /// The buffer must hold a complete routine matching the signature `F` under the native
    /// calling convention. The returned function pointer must not be called after the
    /// `Compiled` is dropped.
    pub unsafe fn compile<F: JitFn>(&self) -> Result<Compiled<F>, Error> {
        self.check_resolved()?;
        let mut map = anonymous(self.required_len())?;
        load(self.code(), self.relocations(), &mut map)?;
        let map = map.make_exec()?;
        trace!("compiled {} bytes at {:p}", self.len(), map.as_ptr());
        let function = F::from_ptr(map.as_ptr());
        Ok(Compiled { map, function })
    }

    /// Loads the code into a caller supplied block.
    ///
    /// Fails with `InsufficientSpace` when the block is smaller than `required_len`, without
    /// touching it.
    ///
    /// # Safety
    /// Same contract as `compile`; the function must not be called once the `BlockFn` is gone.
    pub unsafe fn compile_in<'a, F: JitFn>(&self, block: &'a mut MemoryBlock) -> Result<BlockFn<'a, F>, Error> {
        self.check_resolved()?;
        let needed = self.required_len();
        if block.len() < needed {
            return Err(Error::InsufficientSpace { needed, available: block.len() });
        }
        let map = block.writable()?;
        load(self.code(), self.relocations(), map)?;
        let ptr = block.seal()?;
        Ok(BlockFn { function: F::from_ptr(ptr), _block: PhantomData })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout() {
        assert_eq!(layout_len(5, &[]), 5);
        let calls = [Relocation::new(1, 0x1000), Relocation::new(9, 0x2000), Relocation::new(20, 0x1000)];
        assert_eq!(layout_len(25, &calls), 32 + 2 * STUB_LEN);
    }

    #[test]
    fn near_call_is_direct() {
        let mut region = vec![0u8; 64];
        let base = region.as_ptr() as usize;
        let code = [0xE8, 0, 0, 0, 0, 0xC3];
        let calls = [Relocation::new(1, base + 40)];
        load(&code, &calls, &mut region).unwrap();
        // 40 - (1 + 4)
        assert_eq!(&region[..6], [0xE8, 35, 0, 0, 0, 0xC3]);
        assert_eq!(&region[6..16], [INT3; 10]);
    }

    #[test]
    fn far_call_uses_stub() {
        let mut region = vec![0u8; 64];
        let base = region.as_ptr() as usize;
        let far = base.wrapping_add(1 << 40);
        let code = [0x90, 0xE8, 0, 0, 0, 0, 0xC3];
        load(&code, &[Relocation::new(2, far)], &mut region).unwrap();
        // stub at 16, call ends at 6
        assert_eq!(&region[..7], [0x90, 0xE8, 10, 0, 0, 0, 0xC3]);
        assert_eq!(&region[16..22], STUB_PREFIX);
        assert_eq!(&region[22..30], &(far as u64).to_le_bytes());
    }

    #[test]
    fn undersized_region() {
        let mut region = vec![0u8; 4];
        match load(&[0x90; 5], &[], &mut region) {
            Err(Error::InsufficientSpace { needed, available }) => {
                assert_eq!(needed, 5);
                assert_eq!(available, 4);
            },
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(region, [0; 4]);
    }
}
