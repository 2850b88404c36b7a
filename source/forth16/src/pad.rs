use crate::memory::{Memory, MemoryError, RegionBounds};

/// Scratch area for pictured numeric output.
///
/// `<#` resets the hold pointer to the top of the pad, `HOLD` prepends one
/// character, and `#>` hands back what was built so far.
#[derive(Debug, Clone)]
pub struct Pad {
    base: usize,
    limit: usize,
    hld: usize,
}

impl Pad {
    pub fn new(bounds: RegionBounds) -> Self {
        let span = bounds.span();
        Self {
            base: span.start,
            limit: span.end,
            hld: span.end,
        }
    }

    pub fn addr(&self) -> usize {
        self.base
    }

    pub fn reset(&mut self) {
        self.hld = self.limit;
    }

    pub fn hold(&mut self, mem: &mut Memory, ch: u8) -> Result<(), MemoryError> {
        if self.hld <= self.base {
            return Err(MemoryError::AddressOutOfRange);
        }
        self.hld -= 1;
        mem.write_byte(self.hld, ch)
    }

    /// Address and length of the held characters.
    pub fn held(&self) -> (usize, usize) {
        (self.hld, self.limit - self.hld)
    }
}
