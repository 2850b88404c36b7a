use crate::{
    memory::{Memory, MemoryError, RegionBounds},
    Error,
};

/// A bump-allocated region of named variables.
///
/// Used for both the system variables (dictionary pointers, the `WORD`
/// buffer) and the user variables (`BASE`, `STATE`, `>IN`, ...). Accesses are
/// checked against the region as well as against memory.
#[derive(Debug, Clone)]
pub struct Vars {
    base: usize,
    ptr: usize,
    limit: usize,
}

impl Vars {
    pub fn new(bounds: RegionBounds) -> Self {
        let span = bounds.span();
        Self {
            base: span.start,
            ptr: span.start,
            limit: span.end,
        }
    }

    /// Reserves `size` bytes and returns the address of the new variable.
    pub fn create(&mut self, size: usize) -> Result<usize, Error> {
        let addr = self.ptr;
        let next = addr + size;
        if next > self.limit {
            return Err(Error::VarsFull);
        }
        self.ptr = next;
        Ok(addr)
    }

    /// Bytes handed out so far.
    pub fn used(&self) -> usize {
        self.ptr - self.base
    }

    fn check(&self, addr: usize, len: usize) -> Result<usize, MemoryError> {
        if addr >= self.base && addr + len <= self.limit {
            Ok(addr)
        } else {
            Err(MemoryError::AddressOutOfRange)
        }
    }

    pub fn read_byte(&self, mem: &Memory, addr: usize) -> Result<u8, MemoryError> {
        mem.read_byte(self.check(addr, 1)?)
    }

    pub fn read_cell(&self, mem: &Memory, addr: usize) -> Result<u16, MemoryError> {
        mem.read_cell(self.check(addr, 2)?)
    }

    pub fn read_double(&self, mem: &Memory, addr: usize) -> Result<u32, MemoryError> {
        mem.read_double(self.check(addr, 4)?)
    }

    pub fn write_byte(&self, mem: &mut Memory, addr: usize, value: u8) -> Result<(), MemoryError> {
        mem.write_byte(self.check(addr, 1)?, value)
    }

    pub fn write_cell(&self, mem: &mut Memory, addr: usize, value: u16) -> Result<(), MemoryError> {
        mem.write_cell(self.check(addr, 2)?, value)
    }

    pub fn write_double(
        &self,
        mem: &mut Memory,
        addr: usize,
        value: u32,
    ) -> Result<(), MemoryError> {
        mem.write_double(self.check(addr, 4)?, value)
    }
}
