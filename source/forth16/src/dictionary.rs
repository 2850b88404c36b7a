//! The dictionary: a backward-linked chain of word headers in memory.
//!
//! Header layout, starting at the header address `h` (Starting FORTH: page
//! 220, minus the view field):
//!
//! | offset    | size  | field                                      |
//! |-----------|-------|--------------------------------------------|
//! | 0         | cell  | link to the previous header, 0 for none    |
//! | 2         | byte  | name length (bits 0..5) and flags          |
//! | 3         | len   | name, stored upper case                    |
//! | 3 + len   | cell  | code field (the CFA, or execution token)   |
//! | 5 + len   | ...   | parameter field (the PFA)                  |
//!
//! The free pointer (`DP`), the newest header (`LATEST`) and the forget
//! barrier (`FENCE`) are kept in system variables, so the memory image alone
//! describes the whole dictionary.

use crate::{
    memory::{Memory, RegionBounds},
    Error, CELL,
};

/// Set on words that run even while compiling.
pub const IMMEDIATE: u8 = 0x80;
/// Set on words that `find` should skip, such as a definition in progress.
pub const HIDDEN: u8 = 0x40;
const LEN_MASK: u8 = 0x1F;
pub const MAX_NAME_LEN: usize = LEN_MASK as usize;

const NATIVE_TAG: u16 = 0x8000;

/// What a code field says to do when the word is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeField {
    /// Run the primitive with this index in the primitive table.
    Native(u16),
    /// Run the threaded list at this address.
    Compiled(u16),
}

impl CodeField {
    pub fn encode(self) -> u16 {
        match self {
            CodeField::Native(id) => NATIVE_TAG | id,
            CodeField::Compiled(list) => list,
        }
    }

    pub fn decode(raw: u16) -> Self {
        if raw & NATIVE_TAG != 0 {
            CodeField::Native(raw & !NATIVE_TAG)
        } else {
            CodeField::Compiled(raw)
        }
    }
}

#[derive(Debug, Clone)]
pub struct Dictionary {
    base: usize,
    limit: usize,
    dp: usize,
    latest: usize,
    fence: usize,
    /// Code field written by `create`.
    create_code: CodeField,
}

impl Dictionary {
    /// Sets up an empty dictionary over `bounds`, keeping its pointers in the
    /// cells at `dp`, `latest` and `fence`.
    pub fn new(
        mem: &mut Memory,
        bounds: RegionBounds,
        dp: usize,
        latest: usize,
        fence: usize,
        create_code: CodeField,
    ) -> Result<Self, Error> {
        let span = bounds.span();
        // Compiled code fields are plain addresses, so every list must sit
        // below the native tag bit.
        if span.end > usize::from(NATIVE_TAG) || span.start == 0 {
            return Err(Error::DictionaryTooHigh);
        }
        mem.write_cell(dp, span.start as u16)?;
        mem.write_cell(latest, 0)?;
        mem.write_cell(fence, span.start as u16)?;
        Ok(Self {
            base: span.start,
            limit: span.end,
            dp,
            latest,
            fence,
            create_code,
        })
    }

    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.base && addr < self.limit
    }

    pub fn here(&self, mem: &Memory) -> Result<usize, Error> {
        Ok(usize::from(mem.read_cell(self.dp)?))
    }

    /// Address of the `DP` system variable.
    pub fn dp_addr(&self) -> usize {
        self.dp
    }

    /// Address of the `LATEST` system variable.
    pub fn latest_addr(&self) -> usize {
        self.latest
    }

    /// The newest header, hidden or not.
    pub fn latest(&self, mem: &Memory) -> Result<Option<usize>, Error> {
        let hdr = mem.read_cell(self.latest)?;
        Ok((hdr != 0).then_some(usize::from(hdr)))
    }

    pub fn used(&self, mem: &Memory) -> Result<usize, Error> {
        Ok(self.here(mem)?.saturating_sub(self.base))
    }

    pub fn capacity(&self) -> usize {
        self.limit - self.base
    }

    /// Moves `HERE` by `n` bytes, which may be negative. Returns the old
    /// value of `HERE`.
    pub fn allot(&self, mem: &mut Memory, n: isize) -> Result<usize, Error> {
        let here = self.here(mem)?;
        let next = here
            .checked_add_signed(n)
            .filter(|n| *n >= self.base && *n <= self.limit)
            .ok_or(Error::DictionaryFull)?;
        mem.write_cell(self.dp, next as u16)?;
        Ok(here)
    }

    pub fn comma(&self, mem: &mut Memory, value: u16) -> Result<(), Error> {
        let at = self.allot(mem, CELL as isize)?;
        mem.write_cell(at, value)?;
        Ok(())
    }

    pub fn c_comma(&self, mem: &mut Memory, value: u8) -> Result<(), Error> {
        let at = self.allot(mem, 1)?;
        mem.write_byte(at, value)?;
        Ok(())
    }

    /// Appends a new header and makes it the newest word. The code field is
    /// the one configured for `CREATE`, pushing the parameter field address.
    pub fn create(&self, mem: &mut Memory, name: &str) -> Result<usize, Error> {
        if name.is_empty() {
            return Err(Error::MissingName);
        }
        if !name.is_ascii() {
            return Err(Error::InputNotAscii);
        }
        let name = &name.as_bytes()[..name.len().min(MAX_NAME_LEN)];

        let hdr = self.here(mem)?;
        let needed = CELL + 1 + name.len() + CELL;
        if hdr + needed > self.limit {
            return Err(Error::DictionaryFull);
        }
        let link = mem.read_cell(self.latest)?;
        self.comma(mem, link)?;
        self.c_comma(mem, name.len() as u8)?;
        for ch in name {
            self.c_comma(mem, ch.to_ascii_uppercase())?;
        }
        self.comma(mem, self.create_code.encode())?;
        mem.write_cell(self.latest, hdr as u16)?;
        Ok(hdr)
    }

    fn link(&self, mem: &Memory, hdr: usize) -> Result<Option<usize>, Error> {
        let link = usize::from(mem.read_cell(hdr)?);
        // Links always point at older, lower headers.
        Ok((link != 0 && link < hdr && self.contains(link)).then_some(link))
    }

    /// Every header, newest first.
    pub fn headers(&self, mem: &Memory) -> Result<Vec<usize>, Error> {
        let mut out = Vec::new();
        let mut cur = self.latest(mem)?;
        while let Some(hdr) = cur {
            out.push(hdr);
            cur = self.link(mem, hdr)?;
        }
        Ok(out)
    }

    /// Finds the newest visible header named `name`, ignoring ASCII case.
    pub fn find(&self, mem: &Memory, name: &str) -> Result<Option<usize>, Error> {
        let want = &name.as_bytes()[..name.len().min(MAX_NAME_LEN)];
        let mut cur = self.latest(mem)?;
        while let Some(hdr) = cur {
            let flags = self.flags(mem, hdr)?;
            if flags & HIDDEN == 0 {
                let have = self.name(mem, hdr)?;
                if have.len() == want.len()
                    && have
                        .iter()
                        .zip(want.iter())
                        .all(|(h, w)| *h == w.to_ascii_uppercase())
                {
                    return Ok(Some(hdr));
                }
            }
            cur = self.link(mem, hdr)?;
        }
        Ok(None)
    }

    /// Raw count byte: the name length plus the flag bits.
    pub fn flags(&self, mem: &Memory, hdr: usize) -> Result<u8, Error> {
        Ok(mem.read_byte(hdr + CELL)? & !LEN_MASK)
    }

    pub fn is_immediate(&self, mem: &Memory, hdr: usize) -> Result<bool, Error> {
        Ok(self.flags(mem, hdr)? & IMMEDIATE != 0)
    }

    pub fn set_flag(&self, mem: &mut Memory, hdr: usize, flag: u8, on: bool) -> Result<(), Error> {
        let count = mem.read_byte(hdr + CELL)?;
        let count = if on { count | flag } else { count & !flag };
        mem.write_byte(hdr + CELL, count)?;
        Ok(())
    }

    pub fn name<'m>(&self, mem: &'m Memory, hdr: usize) -> Result<&'m [u8], Error> {
        let len = mem.read_byte(hdr + CELL)? & LEN_MASK;
        Ok(mem.read_bytes(hdr + CELL + 1, usize::from(len))?)
    }

    /// Header address to code field address.
    pub fn cfa(&self, mem: &Memory, hdr: usize) -> Result<usize, Error> {
        let len = mem.read_byte(hdr + CELL)? & LEN_MASK;
        Ok(hdr + CELL + 1 + usize::from(len))
    }

    /// Header address to parameter field address.
    pub fn pfa(&self, mem: &Memory, hdr: usize) -> Result<usize, Error> {
        Ok(self.cfa(mem, hdr)? + CELL)
    }

    /// Reads the code field of the execution token `xt`.
    pub fn code_field(&self, mem: &Memory, xt: usize) -> Result<CodeField, Error> {
        if !self.contains(xt) {
            return Err(Error::BadCodeField(xt as u16));
        }
        Ok(CodeField::decode(mem.read_cell(xt)?))
    }

    pub fn set_code(&self, mem: &mut Memory, hdr: usize, code: CodeField) -> Result<(), Error> {
        let cfa = self.cfa(mem, hdr)?;
        mem.write_cell(cfa, code.encode())?;
        Ok(())
    }

    /// Truncates the dictionary back to just before `hdr`.
    ///
    /// Memory past the new `HERE` is left untouched, only unreachable.
    pub fn forget(&self, mem: &mut Memory, hdr: usize) -> Result<(), Error> {
        if hdr < usize::from(mem.read_cell(self.fence)?) {
            return Err(Error::CantForgetNucleus);
        }
        if !self.headers(mem)?.contains(&hdr) {
            return Err(Error::ForgetNotInDict);
        }
        self.drop_back_to(mem, hdr)
    }

    /// Rolls back a definition in progress, ignoring the fence.
    pub(crate) fn drop_back_to(&self, mem: &mut Memory, hdr: usize) -> Result<(), Error> {
        let link = mem.read_cell(hdr)?;
        mem.write_cell(self.latest, link)?;
        mem.write_cell(self.dp, hdr as u16)?;
        Ok(())
    }

    /// Protects everything defined so far from `forget`.
    pub fn seal(&self, mem: &mut Memory) -> Result<(), Error> {
        let here = self.here(mem)?;
        mem.write_cell(self.fence, here as u16)?;
        Ok(())
    }
}

#[cfg(test)]
pub mod test {
    use super::{CodeField, Dictionary, HIDDEN, IMMEDIATE};
    use crate::{
        memory::{Memory, RegionSpec},
        Error,
    };

    const DOVAR: CodeField = CodeField::Native(7);

    fn setup() -> (Memory, Dictionary) {
        let mut mem = Memory::new(8192);
        mem.region("SV", RegionSpec::up(0, 16)).unwrap();
        let bounds = mem.region("DICT", RegionSpec::up(1024, 256)).unwrap();
        let dict = Dictionary::new(&mut mem, bounds, 2, 4, 6, DOVAR).unwrap();
        (mem, dict)
    }

    #[test]
    fn code_fields() {
        for cf in [
            CodeField::Native(0),
            CodeField::Native(123),
            CodeField::Compiled(1024),
            CodeField::Compiled(0x7FFE),
        ] {
            assert_eq!(CodeField::decode(cf.encode()), cf);
        }
        assert_eq!(CodeField::Native(3).encode(), 0x8003);
    }

    #[test]
    fn layout() {
        let (mut mem, dict) = setup();
        let hdr = dict.create(&mut mem, "dup").unwrap();
        assert_eq!(hdr, 1024);
        assert_eq!(mem.read_cell(hdr), Ok(0));
        assert_eq!(mem.read_byte(hdr + 2), Ok(3));
        assert_eq!(dict.name(&mem, hdr).unwrap(), b"DUP");
        assert_eq!(dict.cfa(&mem, hdr), Ok(1024 + 6));
        assert_eq!(dict.pfa(&mem, hdr), Ok(1024 + 8));
        assert_eq!(dict.code_field(&mem, 1030), Ok(DOVAR));
        assert_eq!(dict.here(&mem), Ok(1032));

        let next = dict.create(&mut mem, "over").unwrap();
        assert_eq!(next, 1032);
        assert_eq!(mem.read_cell(next), Ok(1024));
        assert_eq!(dict.latest(&mem), Ok(Some(next)));
        assert_eq!(dict.headers(&mem).unwrap(), [next, hdr]);

        dict.set_code(&mut mem, next, CodeField::Compiled(2000)).unwrap();
        let xt = dict.cfa(&mem, next).unwrap();
        assert_eq!(dict.code_field(&mem, xt), Ok(CodeField::Compiled(2000)));
        assert_eq!(dict.code_field(&mem, 12), Err(Error::BadCodeField(12)));
    }

    #[test]
    fn find_shadows_and_forget_restores() {
        let (mut mem, dict) = setup();
        let first = dict.create(&mut mem, "TEST").unwrap();
        dict.comma(&mut mem, 1).unwrap();
        dict.create(&mut mem, "OTHER").unwrap();
        dict.seal(&mut mem).unwrap();

        let second = dict.create(&mut mem, "test").unwrap();
        assert_eq!(dict.find(&mem, "TEST"), Ok(Some(second)));
        assert_eq!(dict.find(&mem, "Test"), Ok(Some(second)));

        dict.forget(&mut mem, second).unwrap();
        assert_eq!(dict.find(&mem, "TEST"), Ok(Some(first)));
        assert_eq!(dict.here(&mem), Ok(second));
        assert_eq!(dict.forget(&mut mem, first), Err(Error::CantForgetNucleus));
        assert_eq!(dict.forget(&mut mem, 2000), Err(Error::ForgetNotInDict));
        assert_eq!(dict.find(&mem, "missing"), Ok(None));
    }

    #[test]
    fn flags() {
        let (mut mem, dict) = setup();
        let hdr = dict.create(&mut mem, "IF").unwrap();
        dict.set_flag(&mut mem, hdr, IMMEDIATE, true).unwrap();
        assert_eq!(dict.is_immediate(&mem, hdr), Ok(true));
        assert_eq!(dict.name(&mem, hdr).unwrap(), b"IF");

        dict.set_flag(&mut mem, hdr, HIDDEN, true).unwrap();
        assert_eq!(dict.find(&mem, "IF"), Ok(None));
        dict.set_flag(&mut mem, hdr, HIDDEN, false).unwrap();
        assert_eq!(dict.find(&mem, "if"), Ok(Some(hdr)));
        assert_eq!(dict.flags(&mem, hdr), Ok(IMMEDIATE));
    }

    #[test]
    fn full_and_bad_names() {
        let (mut mem, dict) = setup();
        assert_eq!(dict.create(&mut mem, ""), Err(Error::MissingName));
        assert_eq!(dict.create(&mut mem, "héllo"), Err(Error::InputNotAscii));

        let long = "X".repeat(40);
        let hdr = dict.create(&mut mem, &long).unwrap();
        assert_eq!(dict.name(&mem, hdr).unwrap().len(), 31);
        assert_eq!(dict.find(&mem, &long), Ok(Some(hdr)));

        assert_eq!(dict.allot(&mut mem, 1000), Err(Error::DictionaryFull));
        let room = dict.capacity() - dict.used(&mem).unwrap();
        dict.allot(&mut mem, room as isize).unwrap();
        assert_eq!(dict.comma(&mut mem, 1), Err(Error::DictionaryFull));
        assert_eq!(dict.create(&mut mem, "more"), Err(Error::DictionaryFull));
        dict.allot(&mut mem, -2).unwrap();
        assert!(dict.comma(&mut mem, 1).is_ok());
    }

    #[test]
    fn used_with_dp_below_base() {
        let (mut mem, dict) = setup();
        mem.write_cell(dict.dp_addr(), 0).unwrap();
        assert_eq!(dict.used(&mem), Ok(0));
    }
}
