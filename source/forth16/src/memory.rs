//! Flat, byte addressable machine memory.
//!
//! All multi-byte values are stored big-endian: the high byte of a cell sits
//! at the lower address, and the high cell of a double sits at the lower
//! address.

use core::{fmt, ops::Range};

/// Default memory capacity, the full 16-bit address space.
pub const MEMORY_SIZE: usize = 65536;

#[derive(Debug, PartialEq)]
pub enum MemoryError {
    RegionOverlap,
    AddressOutOfRange,
}

/// Which way a region's pointer moves as it fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Growth {
    Up,
    Down,
}

/// A requested region: a start address and a signed size.
///
/// A negative size means the region grows downward from `start`, covering
/// the `|size|` addresses below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionSpec {
    pub start: usize,
    pub size: isize,
}

impl RegionSpec {
    pub const fn up(start: usize, size: usize) -> Self {
        Self {
            start,
            size: size as isize,
        }
    }

    pub const fn down(start: usize, size: usize) -> Self {
        Self {
            start,
            size: -(size as isize),
        }
    }
}

/// A registered region, covering `start..end`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub name: &'static str,
    pub start: usize,
    pub end: usize,
}

impl Region {
    #[inline]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    fn overlaps(&self, other: &Range<usize>) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// The pointer registers handed to a region view.
///
/// For an upward region `base` is the first address and `limit` is one past
/// the last. For a downward region `base` is one past the highest address
/// (the empty stack pointer) and `limit` is the lowest usable address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionBounds {
    pub base: usize,
    pub ptr: usize,
    pub limit: usize,
    pub growth: Growth,
}

impl RegionBounds {
    /// The covered address range, regardless of growth direction.
    pub fn span(&self) -> Range<usize> {
        match self.growth {
            Growth::Up => self.base..self.limit,
            Growth::Down => self.limit..self.base,
        }
    }
}

#[derive(Clone)]
pub struct Memory {
    bytes: Box<[u8]>,
    map: Vec<Region>,
}

impl Memory {
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: vec![0u8; capacity].into_boxed_slice(),
            map: Vec::new(),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Registers a named region and returns its pointer registers.
    pub fn region(
        &mut self,
        name: &'static str,
        spec: RegionSpec,
    ) -> Result<RegionBounds, MemoryError> {
        let size = spec.size.unsigned_abs();
        let (range, bounds) = if spec.size < 0 {
            let low = spec
                .start
                .checked_sub(size)
                .ok_or(MemoryError::AddressOutOfRange)?;
            let bounds = RegionBounds {
                base: spec.start,
                ptr: spec.start,
                limit: low,
                growth: Growth::Down,
            };
            (low..spec.start, bounds)
        } else {
            let high = spec
                .start
                .checked_add(size)
                .ok_or(MemoryError::AddressOutOfRange)?;
            let bounds = RegionBounds {
                base: spec.start,
                ptr: spec.start,
                limit: high,
                growth: Growth::Up,
            };
            (spec.start..high, bounds)
        };

        if range.end > self.capacity() {
            return Err(MemoryError::AddressOutOfRange);
        }
        if let Some(other) = self.map.iter().find(|r| r.overlaps(&range)) {
            tracing::warn!(name, overlaps = other.name, "region overlap");
            return Err(MemoryError::RegionOverlap);
        }

        let idx = self.map.partition_point(|r| r.start < range.start);
        self.map.insert(
            idx,
            Region {
                name,
                start: range.start,
                end: range.end,
            },
        );
        Ok(bounds)
    }

    /// Registered regions, ordered by start address.
    pub fn regions(&self) -> &[Region] {
        &self.map
    }

    #[inline]
    fn span(&self, addr: usize, len: usize) -> Result<Range<usize>, MemoryError> {
        let end = addr.checked_add(len).ok_or(MemoryError::AddressOutOfRange)?;
        if end > self.bytes.len() {
            Err(MemoryError::AddressOutOfRange)
        } else {
            Ok(addr..end)
        }
    }

    #[inline]
    pub fn read_byte(&self, addr: usize) -> Result<u8, MemoryError> {
        self.bytes
            .get(addr)
            .copied()
            .ok_or(MemoryError::AddressOutOfRange)
    }

    #[inline]
    pub fn write_byte(&mut self, addr: usize, value: u8) -> Result<(), MemoryError> {
        let slot = self
            .bytes
            .get_mut(addr)
            .ok_or(MemoryError::AddressOutOfRange)?;
        *slot = value;
        Ok(())
    }

    pub fn read_cell(&self, addr: usize) -> Result<u16, MemoryError> {
        self.span(addr, 2)?;
        let hi = self.read_byte(addr)?;
        let lo = self.read_byte(addr + 1)?;
        Ok(u16::from_be_bytes([hi, lo]))
    }

    pub fn write_cell(&mut self, addr: usize, value: u16) -> Result<(), MemoryError> {
        self.span(addr, 2)?;
        let [hi, lo] = value.to_be_bytes();
        self.write_byte(addr, hi)?;
        self.write_byte(addr + 1, lo)
    }

    pub fn read_double(&self, addr: usize) -> Result<u32, MemoryError> {
        self.span(addr, 4)?;
        let hi = self.read_cell(addr)?;
        let lo = self.read_cell(addr + 2)?;
        Ok((u32::from(hi) << 16) | u32::from(lo))
    }

    pub fn write_double(&mut self, addr: usize, value: u32) -> Result<(), MemoryError> {
        self.span(addr, 4)?;
        self.write_cell(addr, (value >> 16) as u16)?;
        self.write_cell(addr + 2, value as u16)
    }

    pub fn read_bytes(&self, addr: usize, len: usize) -> Result<&[u8], MemoryError> {
        let range = self.span(addr, len)?;
        Ok(&self.bytes[range])
    }

    pub fn write_bytes(&mut self, addr: usize, data: &[u8]) -> Result<(), MemoryError> {
        let range = self.span(addr, data.len())?;
        self.bytes[range].copy_from_slice(data);
        Ok(())
    }

    pub fn fill(&mut self, addr: usize, len: usize, value: u8) -> Result<(), MemoryError> {
        let range = self.span(addr, len)?;
        self.bytes[range].fill(value);
        Ok(())
    }

    /// Copies `len` bytes from `src` to `dst`. The ranges may overlap.
    pub fn copy_within(&mut self, src: usize, dst: usize, len: usize) -> Result<(), MemoryError> {
        let from = self.span(src, len)?;
        self.span(dst, len)?;
        self.bytes.copy_within(from, dst);
        Ok(())
    }

    /// The raw memory image.
    pub fn image(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memory")
            .field("capacity", &self.capacity())
            .field("map", &self.map)
            .finish()
    }
}

/// Renders the region map, including the unused gaps between regions.
impl fmt::Display for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut last_end = 0;
        for region in self.map.iter() {
            if region.start != last_end {
                writeln!(
                    f,
                    "{:>10} {:5} {:5} {:5}",
                    "UNUSED",
                    last_end,
                    region.start - 1,
                    region.start - last_end
                )?;
            }
            writeln!(
                f,
                "{:>10} {:5} {:5} {:5}",
                region.name,
                region.start,
                region.end.saturating_sub(1),
                region.len()
            )?;
            last_end = region.end;
        }
        if last_end < self.capacity() {
            writeln!(
                f,
                "{:>10} {:5} {:5} {:5}",
                "UNUSED",
                last_end,
                self.capacity() - 1,
                self.capacity() - last_end
            )?;
        }
        Ok(())
    }
}
