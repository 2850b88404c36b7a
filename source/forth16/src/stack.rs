use crate::{
    memory::{Growth, Memory, RegionBounds},
    Error, CELL, DOUBLE,
};

#[derive(Debug, PartialEq)]
pub enum StackError {
    StackOverflow,
    StackUnderflow,
}

/// A stack living inside a memory region.
///
/// The view only holds the pointer registers, every access goes through the
/// [`Memory`] passed in. Depths given to `peek_*`/`poke_*` count items of the
/// accessed width from the top, so `peek_cell(0)` is the top cell.
#[derive(Debug, Clone)]
pub struct Stack {
    base: usize,
    ptr: usize,
    limit: usize,
    growth: Growth,
}

impl Stack {
    pub fn new(bounds: RegionBounds) -> Self {
        Self {
            base: bounds.base,
            ptr: bounds.ptr,
            limit: bounds.limit,
            growth: bounds.growth,
        }
    }

    /// Current stack pointer.
    #[inline]
    pub fn ptr(&self) -> usize {
        self.ptr
    }

    #[inline]
    pub fn base(&self) -> usize {
        self.base
    }

    /// Depth in bytes.
    #[inline]
    pub fn depth(&self) -> usize {
        match self.growth {
            Growth::Up => self.ptr - self.base,
            Growth::Down => self.base - self.ptr,
        }
    }

    #[inline]
    pub fn depth_cells(&self) -> usize {
        self.depth() / CELL
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ptr == self.base
    }

    #[inline]
    pub fn clear(&mut self) {
        self.ptr = self.base;
    }

    /// Moves the pointer to make room for `width` bytes, returning the
    /// address of the new slot.
    fn claim(&mut self, width: usize) -> Result<usize, StackError> {
        match self.growth {
            Growth::Down => {
                let next = self
                    .ptr
                    .checked_sub(width)
                    .filter(|n| *n >= self.limit)
                    .ok_or(StackError::StackOverflow)?;
                self.ptr = next;
                Ok(next)
            }
            Growth::Up => {
                let next = self.ptr + width;
                if next > self.limit {
                    return Err(StackError::StackOverflow);
                }
                let slot = self.ptr;
                self.ptr = next;
                Ok(slot)
            }
        }
    }

    /// Address of the item `depth` items of `width` bytes below the top.
    fn slot(&self, depth: usize, width: usize) -> Result<usize, StackError> {
        let offset = depth
            .checked_mul(width)
            .ok_or(StackError::StackUnderflow)?;
        match self.growth {
            Growth::Down => {
                let addr = self.ptr + offset;
                if addr + width > self.base {
                    Err(StackError::StackUnderflow)
                } else {
                    Ok(addr)
                }
            }
            Growth::Up => self
                .ptr
                .checked_sub(offset + width)
                .filter(|a| *a >= self.base)
                .ok_or(StackError::StackUnderflow),
        }
    }

    /// Releases the top `width` bytes, returning their address.
    fn release(&mut self, width: usize) -> Result<usize, StackError> {
        let slot = self.slot(0, width)?;
        self.ptr = match self.growth {
            Growth::Down => self.ptr + width,
            Growth::Up => slot,
        };
        Ok(slot)
    }

    pub fn push_byte(&mut self, mem: &mut Memory, value: u8) -> Result<(), Error> {
        let slot = self.claim(1)?;
        mem.write_byte(slot, value)?;
        Ok(())
    }

    pub fn push_cell(&mut self, mem: &mut Memory, value: u16) -> Result<(), Error> {
        let slot = self.claim(CELL)?;
        mem.write_cell(slot, value)?;
        Ok(())
    }

    pub fn push_double(&mut self, mem: &mut Memory, value: u32) -> Result<(), Error> {
        let slot = self.claim(DOUBLE)?;
        mem.write_double(slot, value)?;
        Ok(())
    }

    pub fn pop_byte(&mut self, mem: &Memory) -> Result<u8, Error> {
        let slot = self.slot(0, 1)?;
        let val = mem.read_byte(slot)?;
        self.release(1)?;
        Ok(val)
    }

    pub fn pop_cell(&mut self, mem: &Memory) -> Result<u16, Error> {
        let slot = self.slot(0, CELL)?;
        let val = mem.read_cell(slot)?;
        self.release(CELL)?;
        Ok(val)
    }

    pub fn pop_double(&mut self, mem: &Memory) -> Result<u32, Error> {
        let slot = self.slot(0, DOUBLE)?;
        let val = mem.read_double(slot)?;
        self.release(DOUBLE)?;
        Ok(val)
    }

    pub fn peek_byte(&self, mem: &Memory, depth: usize) -> Result<u8, Error> {
        Ok(mem.read_byte(self.slot(depth, 1)?)?)
    }

    pub fn peek_cell(&self, mem: &Memory, depth: usize) -> Result<u16, Error> {
        Ok(mem.read_cell(self.slot(depth, CELL)?)?)
    }

    pub fn peek_double(&self, mem: &Memory, depth: usize) -> Result<u32, Error> {
        Ok(mem.read_double(self.slot(depth, DOUBLE)?)?)
    }

    pub fn poke_byte(&self, mem: &mut Memory, depth: usize, value: u8) -> Result<(), Error> {
        mem.write_byte(self.slot(depth, 1)?, value)?;
        Ok(())
    }

    pub fn poke_cell(&self, mem: &mut Memory, depth: usize, value: u16) -> Result<(), Error> {
        mem.write_cell(self.slot(depth, CELL)?, value)?;
        Ok(())
    }

    pub fn poke_double(&self, mem: &mut Memory, depth: usize, value: u32) -> Result<(), Error> {
        mem.write_double(self.slot(depth, DOUBLE)?, value)?;
        Ok(())
    }

    // Classical stack shuffles, all on cells.

    /// ( a -- a a )
    pub fn dup(&mut self, mem: &mut Memory) -> Result<(), Error> {
        let a = self.peek_cell(mem, 0)?;
        self.push_cell(mem, a)
    }

    /// ( a -- )
    pub fn drop(&mut self, mem: &Memory) -> Result<(), Error> {
        self.pop_cell(mem).map(|_| ())
    }

    /// ( a b -- b a )
    pub fn swap(&mut self, mem: &mut Memory) -> Result<(), Error> {
        let b = self.peek_cell(mem, 0)?;
        let a = self.peek_cell(mem, 1)?;
        self.poke_cell(mem, 0, a)?;
        self.poke_cell(mem, 1, b)
    }

    /// ( a b -- a b a )
    pub fn over(&mut self, mem: &mut Memory) -> Result<(), Error> {
        let a = self.peek_cell(mem, 1)?;
        self.push_cell(mem, a)
    }

    /// ( a b c -- b c a )
    pub fn rot(&mut self, mem: &mut Memory) -> Result<(), Error> {
        let c = self.peek_cell(mem, 0)?;
        let b = self.peek_cell(mem, 1)?;
        let a = self.peek_cell(mem, 2)?;
        self.poke_cell(mem, 2, b)?;
        self.poke_cell(mem, 1, c)?;
        self.poke_cell(mem, 0, a)
    }

    /// ( a b -- b )
    pub fn nip(&mut self, mem: &mut Memory) -> Result<(), Error> {
        let b = self.pop_cell(mem)?;
        self.poke_cell(mem, 0, b)
    }

    /// ( a b -- b a b )
    pub fn tuck(&mut self, mem: &mut Memory) -> Result<(), Error> {
        let b = self.peek_cell(mem, 0)?;
        let a = self.peek_cell(mem, 1)?;
        self.poke_cell(mem, 1, b)?;
        self.poke_cell(mem, 0, a)?;
        self.push_cell(mem, b)
    }
}

#[cfg(test)]
pub mod test {
    use super::{Stack, StackError};
    use crate::{
        memory::{Memory, RegionSpec},
        Error,
    };

    const ITEMS: usize = 16;

    fn setup(spec: RegionSpec) -> (Memory, Stack) {
        let mut mem = Memory::new(1024);
        let bounds = mem.region("S", spec).unwrap();
        (mem, Stack::new(bounds))
    }

    #[test]
    fn stack() {
        for spec in [RegionSpec::down(512, ITEMS * 2), RegionSpec::up(512, ITEMS * 2)] {
            let (mut mem, mut stack) = setup(spec);
            let start = stack.ptr();

            for _ in 0..3 {
                for i in 0..(ITEMS as u16) {
                    assert!(stack.push_cell(&mut mem, i).is_ok());
                }
                assert_eq!(
                    stack.push_cell(&mut mem, 100),
                    Err(Error::Stack(StackError::StackOverflow))
                );
                for i in (0..(ITEMS as u16)).rev() {
                    assert_eq!(stack.pop_cell(&mem), Ok(i));
                }
                assert_eq!(
                    stack.pop_cell(&mem),
                    Err(Error::Stack(StackError::StackUnderflow))
                );
                assert_eq!(stack.ptr(), start);
            }
        }
    }

    #[test]
    fn widths() {
        let (mut mem, mut stack) = setup(RegionSpec::down(512, 16));
        stack.push_byte(&mut mem, 0xAA).unwrap();
        stack.push_double(&mut mem, 0x0001_0002).unwrap();
        assert_eq!(stack.depth(), 5);

        // The high cell of a double is on top.
        assert_eq!(stack.peek_cell(&mem, 0), Ok(0x0001));
        assert_eq!(stack.peek_cell(&mem, 1), Ok(0x0002));
        assert_eq!(stack.pop_double(&mem), Ok(0x0001_0002));
        assert_eq!(stack.pop_byte(&mem), Ok(0xAA));
        assert!(stack.is_empty());

        stack.push_cell(&mut mem, 0x1234).unwrap();
        assert_eq!(
            stack.pop_double(&mem),
            Err(Error::Stack(StackError::StackUnderflow))
        );
        assert_eq!(stack.depth(), 2);
    }

    #[test]
    fn peek_and_poke_do_not_move() {
        let (mut mem, mut stack) = setup(RegionSpec::down(512, 16));
        for v in [10, 20, 30] {
            stack.push_cell(&mut mem, v).unwrap();
        }
        let ptr = stack.ptr();
        assert_eq!(stack.peek_cell(&mem, 0), Ok(30));
        assert_eq!(stack.peek_cell(&mem, 2), Ok(10));
        assert_eq!(
            stack.peek_cell(&mem, 3),
            Err(Error::Stack(StackError::StackUnderflow))
        );
        stack.poke_cell(&mut mem, 1, 99).unwrap();
        assert_eq!(
            stack.poke_cell(&mut mem, 3, 1),
            Err(Error::Stack(StackError::StackUnderflow))
        );
        assert_eq!(stack.ptr(), ptr);
        assert_eq!(stack.pop_cell(&mem), Ok(30));
        assert_eq!(stack.pop_cell(&mem), Ok(99));
    }

    fn cells(stack: &Stack, mem: &Memory) -> Vec<u16> {
        (0..stack.depth_cells())
            .rev()
            .map(|d| stack.peek_cell(mem, d).unwrap())
            .collect()
    }

    #[test]
    fn shuffles() {
        let (mut mem, mut stack) = setup(RegionSpec::down(512, 32));
        for v in [1, 2, 3] {
            stack.push_cell(&mut mem, v).unwrap();
        }
        stack.rot(&mut mem).unwrap();
        assert_eq!(cells(&stack, &mem), [2, 3, 1]);
        stack.swap(&mut mem).unwrap();
        assert_eq!(cells(&stack, &mem), [2, 1, 3]);
        stack.over(&mut mem).unwrap();
        assert_eq!(cells(&stack, &mem), [2, 1, 3, 1]);
        stack.nip(&mut mem).unwrap();
        assert_eq!(cells(&stack, &mem), [2, 1, 1]);
        stack.tuck(&mut mem).unwrap();
        assert_eq!(cells(&stack, &mem), [2, 1, 1, 1]);
        stack.drop(&mem).unwrap();
        stack.drop(&mem).unwrap();
        stack.push_cell(&mut mem, 7).unwrap();
        stack.tuck(&mut mem).unwrap();
        assert_eq!(cells(&stack, &mem), [2, 7, 1, 7]);

        // dup drop leaves the depth and top as they were before dup
        let depth = stack.depth();
        let top = stack.peek_cell(&mem, 0).unwrap();
        stack.dup(&mut mem).unwrap();
        stack.drop(&mem).unwrap();
        assert_eq!(stack.depth(), depth);
        assert_eq!(stack.peek_cell(&mem, 0), Ok(top));

        stack.clear();
        assert_eq!(
            stack.swap(&mut mem),
            Err(Error::Stack(StackError::StackUnderflow))
        );
        stack.push_cell(&mut mem, 1).unwrap();
        assert_eq!(
            stack.rot(&mut mem),
            Err(Error::Stack(StackError::StackUnderflow))
        );
        assert_eq!(stack.depth_cells(), 1);
    }
}
