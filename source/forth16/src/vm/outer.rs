//! The outer interpreter: turns lines of text into executed or compiled
//! words.

use core::fmt::Write;

use crate::{
    input::Input,
    output::{Output, Writer},
    Error,
};

use super::Machine;

impl<I: Input + 'static, O: Output + 'static> Machine<I, O> {
    /// Interprets one line as a top-level command.
    ///
    /// On failure the stacks are emptied, the machine goes back to
    /// interpreting, and a definition left unfinished by this or an earlier
    /// line is dropped. A definition may span several lines.
    pub fn process_line(&mut self, line: &str) -> Result<(), Error> {
        tracing::debug!(line, "> ");
        self.begin_command();
        self.token.clear();
        let res = self
            .tib
            .fill(&mut self.mem, line)
            .and_then(|()| self.interpret());
        if let Err(error) = &res {
            tracing::warn!(token = %self.token, %error, "line aborted");
            self.recover();
        }
        res
    }

    fn interpret(&mut self) -> Result<(), Error> {
        while !self.halted {
            let Some(token) = self.next_token()? else {
                break;
            };
            self.interpret_token(&token)?;
        }
        Ok(())
    }

    /// Next blank delimited token from the input line, remembered for error
    /// reports.
    pub(crate) fn next_token(&mut self) -> Result<Option<String>, Error> {
        let token = self.tib.token(&mut self.mem)?.map(str::to_owned);
        if let Some(tok) = &token {
            self.token.clone_from(tok);
        }
        Ok(token)
    }

    /// Like [`Machine::next_token`], but a missing name is an error.
    pub(crate) fn parse_name(&mut self) -> Result<String, Error> {
        self.next_token()?.ok_or(Error::MissingName)
    }

    fn interpret_token(&mut self, token: &str) -> Result<(), Error> {
        if let Some(hdr) = self.dict.find(&self.mem, token)? {
            let xt = self.dict.cfa(&self.mem, hdr)? as u16;
            if self.compiling()? && !self.dict.is_immediate(&self.mem, hdr)? {
                self.dict.comma(&mut self.mem, xt)
            } else {
                self.execute(xt)
            }
        } else {
            let n = self.parse_number(token)?.ok_or(Error::UndefinedWord)?;
            if self.compiling()? {
                self.compile_lit(n)
            } else {
                self.ds.push_cell(&mut self.mem, n)
            }
        }
    }

    /// Parses `token` as a number in the current `BASE`.
    ///
    /// Accepts an optional leading `-`. Anything from -32768 up to 65535
    /// is taken, and wraps to a cell.
    pub fn parse_number(&self, token: &str) -> Result<Option<u16>, Error> {
        let base = self.base()?;
        if !(2..=36).contains(&base) {
            return Err(Error::BadBase(base));
        }
        let (neg, digits) = match token.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, token),
        };
        if digits.is_empty() {
            return Ok(None);
        }
        let mut val: i32 = 0;
        for ch in digits.chars() {
            let Some(d) = ch.to_digit(u32::from(base)) else {
                return Ok(None);
            };
            val = val * i32::from(base) + d as i32;
            if val > i32::from(u16::MAX) {
                return Ok(None);
            }
        }
        if neg {
            val = -val;
        }
        if val < i32::from(i16::MIN) {
            return Ok(None);
        }
        Ok(Some(val as u16))
    }

    /// Interprets `lines` in turn, the way a terminal session would.
    ///
    /// Each line that succeeds is acknowledged with ` ok`. A failing line
    /// reports the offending token and the error, and the session carries
    /// on with the next line. Stops early after `BYE`.
    pub fn run<'a>(&mut self, lines: impl IntoIterator<Item = &'a str>) -> Result<(), Error> {
        for line in lines {
            match self.process_line(line) {
                Ok(()) if self.halted => break,
                Ok(()) => self.output.write_bytes(b" ok\n")?,
                Err(error) => {
                    writeln!(Writer(&mut self.output), "{} ? {error}", self.token)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub mod test {
    use crate::{input::InputBuf, output::OutputBuf, vm::Params, Error, Machine};

    fn machine() -> Machine {
        Machine::boot(Params::default(), InputBuf::new(), OutputBuf::new()).unwrap()
    }

    #[test]
    fn numbers() {
        let mut forth = machine();
        assert_eq!(forth.parse_number("123"), Ok(Some(123)));
        assert_eq!(forth.parse_number("-1"), Ok(Some(0xFFFF)));
        assert_eq!(forth.parse_number("65535"), Ok(Some(0xFFFF)));
        assert_eq!(forth.parse_number("-32768"), Ok(Some(0x8000)));
        assert_eq!(forth.parse_number("65536"), Ok(None));
        assert_eq!(forth.parse_number("-32769"), Ok(None));
        assert_eq!(forth.parse_number("-"), Ok(None));
        assert_eq!(forth.parse_number("12x"), Ok(None));
        assert_eq!(forth.parse_number("ff"), Ok(None));

        forth.process_line("hex").unwrap();
        assert_eq!(forth.parse_number("ff"), Ok(Some(255)));
        assert_eq!(forth.parse_number("-FF"), Ok(Some(0xFF01)));

        forth.process_line("1 base !").unwrap();
        assert_eq!(forth.parse_number("1"), Err(Error::BadBase(1)));
    }

    #[test]
    fn multi_line_definitions() {
        let mut forth = machine();
        forth.process_line(": five").unwrap();
        forth.process_line("  5 .").unwrap();
        forth.process_line(";").unwrap();
        forth.process_line("five").unwrap();
        assert_eq!(forth.output.as_str(), "5 ");

        // A failure part way through drops the unfinished definition.
        forth.process_line(": six 6 .").unwrap();
        assert_eq!(forth.process_line("oops ;"), Err(Error::UndefinedWord));
        assert_eq!(forth.process_line("six"), Err(Error::UndefinedWord));
        forth.output.clear();
        forth.process_line("five").unwrap();
        assert_eq!(forth.output.as_str(), "5 ");
    }

    #[test]
    fn compile_only() {
        let mut forth = machine();
        for line in ["1 if", "then", ";", "begin", "5 0 do"] {
            assert_eq!(
                forth.process_line(line),
                Err(Error::InterpretingCompileOnlyWord),
                "{line}"
            );
        }
        assert_eq!(forth.process_line(": bad if ;"), Err(Error::UnbalancedControl));
        assert_eq!(forth.process_line(": bad then ;"), Err(Error::UnbalancedControl));
        assert_eq!(forth.process_line(": bad begin 1 ;"), Err(Error::UnbalancedControl));
        assert_eq!(forth.process_line("bad"), Err(Error::UndefinedWord));
        assert_eq!(forth.process_line(":"), Err(Error::MissingName));
    }

    #[test]
    fn persist_stack() {
        let mut forth = machine();
        forth.process_line("1 2 3").unwrap();
        forth.process_line("depth .").unwrap();
        assert_eq!(forth.output.as_str(), "0 ");

        let mut forth = Machine::boot(
            Params::default().with_persist_stack(true),
            InputBuf::new(),
            OutputBuf::new(),
        )
        .unwrap();
        forth.process_line("1 2 3").unwrap();
        forth.process_line("depth .").unwrap();
        assert_eq!(forth.output.as_str(), "3 ");
        assert!(forth.process_line("drop drop drop drop").is_err());
        assert_eq!(forth.ds.depth(), 0);
    }

    #[test]
    fn run_session() {
        let mut forth = machine();
        forth
            .run([": sq dup * ;", "7 sq .", "nope", "bye", "1 ."])
            .unwrap();
        assert_eq!(
            forth.output.as_str(),
            " ok\n49  ok\nnope ? undefined word\n"
        );
        assert!(forth.is_halted());
    }
}
