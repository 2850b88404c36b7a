use std::collections::VecDeque;

use crate::{
    memory::{Memory, RegionBounds},
    Error, ReplaceErr,
};

/// Where `KEY`, `KEY?` and `EXPECT` take characters from.
pub trait Input {
    /// Is a character available without blocking?
    fn check(&mut self) -> bool;

    /// The next character, or `None` when the input is exhausted.
    fn read(&mut self) -> Option<u8>;
}

impl<I: Input + ?Sized> Input for &mut I {
    fn check(&mut self) -> bool {
        (**self).check()
    }

    fn read(&mut self) -> Option<u8> {
        (**self).read()
    }
}

impl<I: Input + ?Sized> Input for Box<I> {
    fn check(&mut self) -> bool {
        (**self).check()
    }

    fn read(&mut self) -> Option<u8> {
        (**self).read()
    }
}

/// An in-memory keyboard queue.
#[derive(Debug, Clone, Default)]
pub struct InputBuf {
    queue: VecDeque<u8>,
}

impl InputBuf {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any pending input with `s`.
    pub fn set(&mut self, s: &str) {
        self.queue.clear();
        self.push_str(s);
    }

    pub fn push_str(&mut self, s: &str) {
        self.queue.extend(s.bytes());
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Input for InputBuf {
    fn check(&mut self) -> bool {
        !self.queue.is_empty()
    }

    fn read(&mut self) -> Option<u8> {
        self.queue.pop_front()
    }
}

/// The text input buffer, holding the line the outer interpreter is working
/// through.
///
/// The parse position and the line length live in the `>IN` and `#TIB` user
/// variables, so Forth code can inspect and move them.
#[derive(Debug, Clone)]
pub struct TextInputBuffer {
    base: usize,
    size: usize,
    to_in: usize,
    count: usize,
}

impl TextInputBuffer {
    /// `to_in` and `count` are the addresses of `>IN` and `#TIB`.
    pub fn new(bounds: RegionBounds, to_in: usize, count: usize) -> Self {
        let span = bounds.span();
        Self {
            base: span.start,
            size: span.len(),
            to_in,
            count,
        }
    }

    pub fn addr(&self) -> usize {
        self.base
    }

    pub fn capacity(&self) -> usize {
        self.size
    }

    /// Loads `line` and rewinds `>IN`.
    pub fn fill(&self, mem: &mut Memory, line: &str) -> Result<(), Error> {
        if line.len() > self.size {
            return Err(Error::InputTooLong);
        }
        if !line.is_ascii() {
            return Err(Error::InputNotAscii);
        }
        mem.write_bytes(self.base, line.as_bytes())?;
        mem.write_cell(self.count, line.len() as u16)?;
        mem.write_cell(self.to_in, 0)?;
        Ok(())
    }

    /// Current parse position and line end, as absolute addresses.
    fn cursor(&self, mem: &Memory) -> Result<(usize, usize), Error> {
        let len = usize::from(mem.read_cell(self.count)?).min(self.size);
        let pos = usize::from(mem.read_cell(self.to_in)?).min(len);
        Ok((self.base + pos, self.base + len))
    }

    fn is_delim(delim: u8, b: u8) -> bool {
        if delim == b' ' {
            b <= b' '
        } else {
            b == delim
        }
    }

    /// Skips leading `delim`s, then takes bytes up to the next `delim`.
    /// Returns the address and length of the token, which is empty at the
    /// end of the line.
    pub fn word(&self, mem: &mut Memory, delim: u8) -> Result<(usize, usize), Error> {
        let (mut pos, end) = self.cursor(mem)?;
        while pos < end && Self::is_delim(delim, mem.read_byte(pos)?) {
            pos += 1;
        }
        mem.write_cell(self.to_in, (pos - self.base) as u16)?;
        self.parse(mem, delim)
    }

    /// Takes bytes up to the next `delim`, without skipping leading ones.
    /// The delimiter itself is consumed.
    pub fn parse(&self, mem: &mut Memory, delim: u8) -> Result<(usize, usize), Error> {
        let (start, end) = self.cursor(mem)?;
        let mut pos = start;
        while pos < end && !Self::is_delim(delim, mem.read_byte(pos)?) {
            pos += 1;
        }
        let len = pos - start;
        if pos < end {
            pos += 1;
        }
        mem.write_cell(self.to_in, (pos - self.base) as u16)?;
        Ok((start, len))
    }

    /// Next blank delimited token as text. `None` at the end of the line.
    pub fn token<'m>(&self, mem: &'m mut Memory) -> Result<Option<&'m str>, Error> {
        let (addr, len) = self.word(mem, b' ')?;
        if len == 0 {
            return Ok(None);
        }
        let bytes = mem.read_bytes(addr, len)?;
        let s = core::str::from_utf8(bytes).replace_err(Error::InputNotAscii)?;
        Ok(Some(s))
    }

    /// Skips the rest of the line.
    pub fn exhaust(&self, mem: &mut Memory) -> Result<(), Error> {
        let len = mem.read_cell(self.count)?;
        mem.write_cell(self.to_in, len)?;
        Ok(())
    }
}
