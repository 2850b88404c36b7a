//! Block storage and the in-memory block buffers.

use std::collections::HashMap;

use crate::{
    memory::{Memory, RegionBounds},
    Error, ReplaceErr,
};

pub const BLOCK_SIZE: usize = 1024;

pub type Block = [u8; BLOCK_SIZE];

#[derive(Debug, PartialEq)]
pub enum BlockError {
    NoSuchBlock(u16),
    /// The buffer region is too small to hold a single block.
    NoBuffers,
    Io,
}

/// Persistent storage of numbered 1024-byte blocks.
pub trait BlockStorage {
    fn read_block(&mut self, n: u16, buf: &mut Block) -> Result<(), BlockError>;
    fn write_block(&mut self, n: u16, buf: &Block) -> Result<(), BlockError>;
}

/// Volatile block storage with a fixed number of blocks. Blocks that were
/// never written read back as spaces.
#[derive(Debug, Clone)]
pub struct MemBlocks {
    count: u16,
    blocks: HashMap<u16, Box<Block>>,
}

impl MemBlocks {
    pub fn new(count: u16) -> Self {
        Self {
            count,
            blocks: HashMap::new(),
        }
    }

    fn check(&self, n: u16) -> Result<(), BlockError> {
        if n < self.count {
            Ok(())
        } else {
            Err(BlockError::NoSuchBlock(n))
        }
    }
}

impl BlockStorage for MemBlocks {
    fn read_block(&mut self, n: u16, buf: &mut Block) -> Result<(), BlockError> {
        self.check(n)?;
        match self.blocks.get(&n) {
            Some(blk) => buf.copy_from_slice(&blk[..]),
            None => buf.fill(b' '),
        }
        Ok(())
    }

    fn write_block(&mut self, n: u16, buf: &Block) -> Result<(), BlockError> {
        self.check(n)?;
        self.blocks.insert(n, Box::new(*buf));
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    block: Option<u16>,
    dirty: bool,
}

/// The block buffer region, split into 1024-byte slots.
#[derive(Debug, Clone)]
pub struct BlockBuffers {
    base: usize,
    slots: Vec<Slot>,
    /// Slot most recently handed out by `block`, the target of `update`.
    current: Option<usize>,
    /// Next slot to evict when every slot is in use.
    victim: usize,
}

impl BlockBuffers {
    pub fn new(bounds: RegionBounds) -> Self {
        let span = bounds.span();
        Self {
            base: span.start,
            slots: vec![Slot::default(); span.len() / BLOCK_SIZE],
            current: None,
            victim: 0,
        }
    }

    fn slot_addr(&self, idx: usize) -> usize {
        self.base + idx * BLOCK_SIZE
    }

    fn write_back<S: BlockStorage + ?Sized>(
        &mut self,
        mem: &Memory,
        storage: &mut S,
        idx: usize,
    ) -> Result<(), Error> {
        let slot = self.slots[idx];
        if let (Some(n), true) = (slot.block, slot.dirty) {
            let bytes = mem.read_bytes(self.slot_addr(idx), BLOCK_SIZE)?;
            let buf: &Block = bytes.try_into().replace_err(BlockError::Io)?;
            storage.write_block(n, buf)?;
            self.slots[idx].dirty = false;
        }
        Ok(())
    }

    /// Address of a buffer holding block `n`, reading it in if needed. A
    /// dirty buffer is written back before being reused.
    pub fn block<S: BlockStorage + ?Sized>(
        &mut self,
        mem: &mut Memory,
        storage: &mut S,
        n: u16,
    ) -> Result<usize, Error> {
        if self.slots.is_empty() {
            return Err(BlockError::NoBuffers.into());
        }
        if let Some(idx) = self.slots.iter().position(|s| s.block == Some(n)) {
            self.current = Some(idx);
            return Ok(self.slot_addr(idx));
        }

        let idx = match self.slots.iter().position(|s| s.block.is_none()) {
            Some(idx) => idx,
            None => {
                let idx = self.victim;
                self.victim = (self.victim + 1) % self.slots.len();
                idx
            }
        };
        self.write_back(mem, storage, idx)?;

        let mut buf = [0u8; BLOCK_SIZE];
        storage.read_block(n, &mut buf)?;
        mem.write_bytes(self.slot_addr(idx), &buf)?;
        self.slots[idx] = Slot {
            block: Some(n),
            dirty: false,
        };
        self.current = Some(idx);
        Ok(self.slot_addr(idx))
    }

    /// Marks the most recently accessed buffer as modified.
    pub fn update(&mut self) {
        if let Some(idx) = self.current {
            self.slots[idx].dirty = true;
        }
    }

    /// Writes every modified buffer back to storage.
    pub fn flush<S: BlockStorage + ?Sized>(
        &mut self,
        mem: &Memory,
        storage: &mut S,
    ) -> Result<(), Error> {
        (0..self.slots.len()).try_for_each(|idx| self.write_back(mem, storage, idx))
    }

    /// Forgets every buffer without writing anything back.
    pub fn empty(&mut self) {
        self.slots.fill(Slot::default());
        self.current = None;
    }
}
