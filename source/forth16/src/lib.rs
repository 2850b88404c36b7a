//! # forth16
//!
//! A classical Forth virtual machine with a 16-bit cell. A [`Machine`] owns a
//! flat [`Memory`](memory::Memory) image that is carved into fixed regions at
//! boot (system variables, dictionary, pad, data stack, text input buffer,
//! return stack, user variables and block buffers). Words live in a
//! backward-linked [`Dictionary`](dictionary::Dictionary) inside that image,
//! and compiled definitions are threaded lists of execution tokens run by the
//! inner interpreter.
//!
//! The machine never touches the host directly. Keyboard input, character
//! output and block storage are reached through the [`Input`](input::Input),
//! [`Output`](output::Output) and [`BlockStorage`](blocks::BlockStorage)
//! traits.
//!
//! ```rust
//! use forth16::{input::InputBuf, output::OutputBuf, vm::Params, Machine};
//!
//! let mut forth = Machine::boot(Params::default(), InputBuf::new(), OutputBuf::new()).unwrap();
//! forth.process_line(": star 42 emit ; star star").unwrap();
//! assert_eq!(forth.output.as_str(), "**");
//! ```

pub mod blocks;
pub mod dictionary;
pub mod input;
pub mod memory;
pub mod output;
pub mod pad;
pub mod stack;
pub mod vars;
pub mod vm;

#[cfg(any(test, feature = "_force_test_utils"))]
pub mod testutil;

use core::fmt;

pub use crate::vm::Machine;
use crate::{
    blocks::BlockError, memory::MemoryError, output::OutputError, stack::StackError,
};

/// Width of a cell in bytes.
pub const CELL: usize = 2;

/// Width of a double cell in bytes.
pub const DOUBLE: usize = 4;

/// The canonical Forth "true" flag, all bits set.
pub const TRUE: u16 = 0xFFFF;

/// The canonical Forth "false" flag.
pub const FALSE: u16 = 0;

#[inline]
pub(crate) fn flag(b: bool) -> u16 {
    if b {
        TRUE
    } else {
        FALSE
    }
}

#[derive(Debug, PartialEq)]
pub enum Error {
    Memory(MemoryError),
    Stack(StackError),
    Output(OutputError),
    Block(BlockError),
    UndefinedWord,
    RunawayExecution,
    DivideByZero,
    InputTooLong,
    InputNotAscii,
    NoInput,
    InterpretingCompileOnlyWord,
    MissingName,
    UnbalancedControl,
    ForgetNotInDict,
    CantForgetNucleus,
    BadCodeField(u16),
    BadBase(u16),
    DictionaryFull,
    DictionaryTooHigh,
    VarsFull,
    NoBlockStorage,
}

impl From<MemoryError> for Error {
    fn from(me: MemoryError) -> Self {
        Error::Memory(me)
    }
}

impl From<StackError> for Error {
    fn from(se: StackError) -> Self {
        Error::Stack(se)
    }
}

impl From<OutputError> for Error {
    fn from(oe: OutputError) -> Self {
        Error::Output(oe)
    }
}

impl From<BlockError> for Error {
    fn from(be: BlockError) -> Self {
        Error::Block(be)
    }
}

impl From<fmt::Error> for Error {
    fn from(_: fmt::Error) -> Self {
        Error::Output(OutputError::FormattingErr)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Memory(MemoryError::RegionOverlap) => f.write_str("region overlap"),
            Error::Memory(MemoryError::AddressOutOfRange) => f.write_str("address out of range"),
            Error::Stack(StackError::StackOverflow) => f.write_str("stack overflow"),
            Error::Stack(StackError::StackUnderflow) => f.write_str("stack underflow"),
            Error::Output(OutputError::OutputFull) => f.write_str("output full"),
            Error::Output(OutputError::FormattingErr) => f.write_str("formatting error"),
            Error::Block(BlockError::NoSuchBlock(n)) => write!(f, "no such block {n}"),
            Error::Block(BlockError::NoBuffers) => f.write_str("no room for block buffers"),
            Error::Block(BlockError::Io) => f.write_str("block i/o failed"),
            Error::UndefinedWord => f.write_str("undefined word"),
            Error::RunawayExecution => f.write_str("step limit exceeded"),
            Error::DivideByZero => f.write_str("divide by zero"),
            Error::InputTooLong => f.write_str("input line too long"),
            Error::InputNotAscii => f.write_str("input is not ascii"),
            Error::NoInput => f.write_str("no input available"),
            Error::InterpretingCompileOnlyWord => f.write_str("compile only word"),
            Error::MissingName => f.write_str("missing name"),
            Error::UnbalancedControl => f.write_str("unbalanced control structure"),
            Error::ForgetNotInDict => f.write_str("not in dictionary"),
            Error::CantForgetNucleus => f.write_str("can't forget nucleus words"),
            Error::BadCodeField(cf) => write!(f, "bad code field {cf:#06x}"),
            Error::BadBase(b) => write!(f, "bad base {b}"),
            Error::DictionaryFull => f.write_str("dictionary full"),
            Error::DictionaryTooHigh => f.write_str("dictionary must lie below 0x8000"),
            Error::VarsFull => f.write_str("variable space full"),
            Error::NoBlockStorage => f.write_str("no block storage attached"),
        }
    }
}

impl std::error::Error for Error {}

trait ReplaceErr {
    type OK;
    fn replace_err<NE>(self, t: NE) -> Result<Self::OK, NE>;
}

impl<T, OE> ReplaceErr for Result<T, OE> {
    type OK = T;
    #[inline]
    fn replace_err<NE>(self, e: NE) -> Result<Self::OK, NE> {
        match self {
            Ok(t) => Ok(t),
            Err(_e) => Err(e),
        }
    }
}

#[cfg(test)]
pub mod test {
    use crate::{
        input::InputBuf,
        output::OutputBuf,
        stack::StackError,
        vm::{Item, Params},
        Error, Machine,
    };

    fn machine() -> Machine {
        Machine::boot(Params::default(), InputBuf::new(), OutputBuf::new()).unwrap()
    }

    #[test]
    fn forth() {
        let mut forth = machine();
        let lines = &[
            ("2 3 + .", "5 "),
            (": yay 2 3 + . ;", ""),
            ("yay yay yay", "5 5 5 "),
            (": boop yay yay ;", ""),
            ("boop", "5 5 "),
            (": err if boop boop boop else yay yay then ;", ""),
            (": erf if boop boop boop then yay yay ;", ""),
            ("0 err", "5 5 "),
            ("1 err", "5 5 5 5 5 5 "),
            ("0 erf", "5 5 "),
            ("1 erf", "5 5 5 5 5 5 5 5 "),
            (": one 1 . ;", ""),
            (": two 2 . ;", ""),
            (": six 6 . ;", ""),
            (": nif if one if two two else six then one then ;", ""),
            ("  0 nif", ""),
            ("0 1 nif", "1 6 1 "),
            ("1 1 nif", "1 2 2 1 "),
            ("42 emit", "*"),
            (": star 42 emit ;", ""),
            ("star star star", "***"),
            (": sloop one 5 0 do star star loop six ;", ""),
            ("sloop", "1 **********6 "),
            (": count 10 0 do i . loop ;", ""),
            ("count", "0 1 2 3 4 5 6 7 8 9 "),
            (": smod 10 0 do i 3 mod not if star then loop ;", ""),
            ("smod", "****"),
            (": beep .\" hello, world!\" ;", ""),
            ("beep", "hello, world!"),
            ("123 constant x", ""),
            ("x .", "123 "),
            ("4 x + .", "127 "),
            ("variable y", ""),
            ("y @ .", "0 "),
            ("10 y ! y @ .", "10 "),
        ];

        for (line, out) in lines {
            println!("> {line}");
            forth.process_line(line).unwrap();
            println!("< {}", forth.output.as_str());
            assert_eq!(forth.output.as_str(), *out);
            forth.output.clear();
        }

        // A broken definition is rolled back and leaves no trace.
        assert_eq!(forth.process_line(": derp boop yay yaay ;"), Err(Error::UndefinedWord));
        assert_eq!(forth.process_line("derp"), Err(Error::UndefinedWord));
        assert_eq!(forth.process_line("1 2 3 drop drop drop drop"), Err(Error::Stack(StackError::StackUnderflow)));
        assert_eq!(forth.ds.depth(), 0);
        assert_eq!(forth.rs.depth(), 0);

        forth.output.clear();
        forth.process_line("boop yay").unwrap();
        assert_eq!(forth.output.as_str(), "5 5 5 ");
    }

    #[test]
    fn host_defined_words() {
        let mut forth = machine();
        forth
            .define("TEST", &[Item::Lit(1), Item::Lit(2), Item::Word("+"), Item::Word(".")])
            .unwrap();
        forth.execute_word("TEST").unwrap();
        assert_eq!(forth.output.as_str(), "3 ");

        forth.output.clear();
        forth
            .define(
                "TEST",
                &[
                    Item::Lit(10),
                    Item::Lit(20),
                    Item::Word("SWAP"),
                    Item::Word("."),
                    Item::Word("."),
                ],
            )
            .unwrap();
        forth.execute_word("TEST").unwrap();
        assert_eq!(forth.output.as_str(), "10 20 ");
    }

    #[test]
    fn display_errors() {
        assert_eq!(Error::UndefinedWord.to_string(), "undefined word");
        assert_eq!(
            Error::Stack(StackError::StackOverflow).to_string(),
            "stack overflow"
        );
        assert_eq!(Error::BadBase(1).to_string(), "bad base 1");
    }
}
