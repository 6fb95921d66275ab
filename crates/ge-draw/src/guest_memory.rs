//! Guest memory access used by the draw engine.
//!
//! Submissions carry guest addresses, not host slices: the guest owns the bytes and may rewrite
//! them between flushes, which is exactly what the vertex array cache has to detect. The emulator
//! provides an implementation backed by its memory map; tests use [`VecGuestMemory`].

use core::fmt;
use std::cell::{Ref, RefCell, RefMut};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuestMemoryError {
    pub addr: u32,
    pub len: usize,
}

impl fmt::Display for GuestMemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "guest memory access out of bounds: addr=0x{:08x}, len=0x{:x}",
            self.addr, self.len
        )
    }
}

impl std::error::Error for GuestMemoryError {}

/// Read-only view of guest memory.
pub trait GuestMemory {
    fn read(&self, addr: u32, dst: &mut [u8]) -> Result<(), GuestMemoryError>;
}

/// A plain byte slice is guest memory starting at address 0.
impl GuestMemory for [u8] {
    fn read(&self, addr: u32, dst: &mut [u8]) -> Result<(), GuestMemoryError> {
        let err = || GuestMemoryError {
            addr,
            len: dst.len(),
        };
        let start = addr as usize;
        let end = start.checked_add(dst.len()).ok_or_else(err)?;
        let src = self.get(start..end).ok_or_else(err)?;
        dst.copy_from_slice(src);
        Ok(())
    }
}

impl<T: GuestMemory + ?Sized> GuestMemory for &T {
    fn read(&self, addr: u32, dst: &mut [u8]) -> Result<(), GuestMemoryError> {
        (**self).read(addr, dst)
    }
}

/// Contiguous in-memory guest RAM starting at `base`.
///
/// Interior mutability lets a test rewrite vertex data while the engine holds the memory.
#[derive(Clone, Debug)]
pub struct VecGuestMemory {
    base: u32,
    mem: RefCell<Vec<u8>>,
}

impl VecGuestMemory {
    pub fn new(size_bytes: usize) -> Self {
        Self::with_base(0, size_bytes)
    }

    pub fn with_base(base: u32, size_bytes: usize) -> Self {
        Self {
            base,
            mem: RefCell::new(vec![0u8; size_bytes]),
        }
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn as_slice(&self) -> Ref<'_, [u8]> {
        Ref::map(self.mem.borrow(), |v| v.as_slice())
    }

    pub fn as_mut_slice(&self) -> RefMut<'_, [u8]> {
        RefMut::map(self.mem.borrow_mut(), |v| v.as_mut_slice())
    }

    fn range(&self, addr: u32, len: usize) -> Result<std::ops::Range<usize>, GuestMemoryError> {
        let err = GuestMemoryError { addr, len };
        let start = addr.checked_sub(self.base).ok_or(err.clone())? as usize;
        let end = start.checked_add(len).ok_or(err.clone())?;
        if end > self.mem.borrow().len() {
            return Err(err);
        }
        Ok(start..end)
    }

    pub fn write(&self, addr: u32, data: &[u8]) -> Result<(), GuestMemoryError> {
        let range = self.range(addr, data.len())?;
        self.mem.borrow_mut()[range].copy_from_slice(data);
        Ok(())
    }
}

impl GuestMemory for VecGuestMemory {
    fn read(&self, addr: u32, dst: &mut [u8]) -> Result<(), GuestMemoryError> {
        let range = self.range(addr, dst.len())?;
        dst.copy_from_slice(&self.mem.borrow()[range]);
        Ok(())
    }
}
