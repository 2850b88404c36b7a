use core::fmt;

#[derive(Debug, PartialEq)]
pub enum OutputError {
    OutputFull,
    FormattingErr,
}

/// Where `EMIT`, `TYPE` and the number printing words send characters.
pub trait Output {
    fn write(&mut self, ch: u8) -> Result<(), OutputError>;

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), OutputError> {
        bytes.iter().try_for_each(|b| self.write(*b))
    }
}

impl<O: Output + ?Sized> Output for &mut O {
    fn write(&mut self, ch: u8) -> Result<(), OutputError> {
        (**self).write(ch)
    }
}

impl<O: Output + ?Sized> Output for Box<O> {
    fn write(&mut self, ch: u8) -> Result<(), OutputError> {
        (**self).write(ch)
    }
}

/// An in-memory output collector, optionally bounded.
///
/// Bytes outside of ASCII are kept as the Latin-1 character of the same
/// value, so the buffer is always a valid `str`.
#[derive(Debug, Clone, Default)]
pub struct OutputBuf {
    buf: String,
    limit: Option<usize>,
}

impl OutputBuf {
    pub fn new() -> Self {
        Self::default()
    }

    /// An output that fails with [`OutputError::OutputFull`] once `limit`
    /// characters have been written.
    pub fn with_capacity_limit(limit: usize) -> Self {
        Self {
            buf: String::with_capacity(limit),
            limit: Some(limit),
        }
    }

    #[inline]
    fn room(&self, n: usize) -> Result<(), OutputError> {
        match self.limit {
            Some(limit) if self.buf.chars().count() + n > limit => Err(OutputError::OutputFull),
            _ => Ok(()),
        }
    }

    pub fn push_str(&mut self, s: &str) -> Result<(), OutputError> {
        self.room(s.chars().count())?;
        self.buf.push_str(s);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

impl Output for OutputBuf {
    fn write(&mut self, ch: u8) -> Result<(), OutputError> {
        self.room(1)?;
        self.buf.push(char::from(ch));
        Ok(())
    }
}

impl fmt::Write for OutputBuf {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.push_str(s).map_err(|_| fmt::Error)
    }
}

/// Adapts any [`Output`] into a [`fmt::Write`], for `write!` based number
/// formatting.
pub(crate) struct Writer<'a, O: ?Sized>(pub(crate) &'a mut O);

impl<O: Output + ?Sized> fmt::Write for Writer<'_, O> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write_bytes(s.as_bytes()).map_err(|_| fmt::Error)
    }
}

#[cfg(test)]
pub mod test {
    use super::{Output, OutputBuf, OutputError, Writer};
    use core::fmt::Write;

    #[test]
    fn bounded() {
        let mut out = OutputBuf::with_capacity_limit(4);
        out.write(b'a').unwrap();
        out.push_str("bc").unwrap();
        assert_eq!(out.push_str("de"), Err(OutputError::OutputFull));
        out.write(b'd').unwrap();
        assert_eq!(out.write(b'e'), Err(OutputError::OutputFull));
        assert_eq!(out.as_str(), "abcd");
        out.clear();
        assert!(out.is_empty());
        assert!(write!(out, "{}", 12345).is_err());
        write!(out, "{}", 1234).unwrap();
        assert_eq!(out.as_str(), "1234");
    }

    #[test]
    fn writer_adapter() {
        let mut out = OutputBuf::new();
        write!(Writer(&mut out), "{} ", -5i16).unwrap();
        out.write_bytes(b"ok").unwrap();
        assert_eq!(out.as_str(), "-5 ok");
    }
}
