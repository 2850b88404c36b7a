use crate::{
    blocks::{Block, BlockError, BLOCK_SIZE},
    dictionary::{CodeField, HIDDEN, IMMEDIATE},
    input::Input,
    output::Output,
    Error, ReplaceErr, CELL,
};

use super::{Machine, Pending, WORD_BUF_SIZE};

pub type WordFunc<I, O> = fn(&mut Machine<I, O>) -> Result<(), Error>;

/// A natively implemented word. The position in
/// [`Machine::PRIMITIVES`] is the id stored in its code field.
pub struct Primitive<I: 'static, O: 'static> {
    pub name: &'static str,
    pub func: WordFunc<I, O>,
    pub immediate: bool,
    /// Only installed when block storage is attached.
    pub needs_blocks: bool,
}

// NOTE: This macro exists because we can't have const constructors that include
// "mut" items, which unfortunately covers things like `fn(&mut T)`. Use a macro
// until this is resolved.
macro_rules! builtin {
    ($name:literal, $func:expr) => {
        Primitive {
            name: $name,
            func: $func,
            immediate: false,
            needs_blocks: false,
        }
    };
}

macro_rules! builtin_imm {
    ($name:literal, $func:expr) => {
        Primitive {
            name: $name,
            func: $func,
            immediate: true,
            needs_blocks: false,
        }
    };
}

macro_rules! builtin_blk {
    ($name:literal, $func:expr) => {
        Primitive {
            name: $name,
            func: $func,
            immediate: false,
            needs_blocks: true,
        }
    };
}

fn digit_char(d: u32) -> u8 {
    if d < 10 {
        b'0' + d as u8
    } else {
        b'A' + (d - 10) as u8
    }
}

impl<I: Input + 'static, O: Output + 'static> Machine<I, O> {
    pub const PRIMITIVES: &'static [Primitive<I, O>] = &[
        // Inner interpreter
        builtin!("LIT", Self::lit),
        builtin!("BRANCH", Self::branch_word),
        builtin!("0BRANCH", Self::zero_branch),
        builtin!("EXIT", Self::exit),
        builtin!("EXECUTE", Self::execute_xt),
        builtin!("(DO)", Self::paren_do),
        builtin!("(LOOP)", Self::paren_loop),
        builtin!("(+LOOP)", Self::paren_plus_loop),
        builtin!("(SLIT)", Self::slit),
        builtin!("(.\")", Self::paren_dot_quote),
        builtin!("(VAR)", Self::dovar),
        builtin!("(CONST)", Self::doconst),
        builtin!("NOP", Self::nop),
        builtin!("BYE", Self::bye),
        // Stack
        builtin!("DUP", Self::dup),
        builtin!("DROP", Self::drop),
        builtin!("SWAP", Self::swap),
        builtin!("OVER", Self::over),
        builtin!("ROT", Self::rot),
        builtin!("-ROT", Self::minus_rot),
        builtin!("NIP", Self::nip),
        builtin!("TUCK", Self::tuck),
        builtin!("?DUP", Self::question_dup),
        builtin!("2DUP", Self::two_dup),
        builtin!("2DROP", Self::two_drop),
        builtin!("2SWAP", Self::two_swap),
        builtin!("2OVER", Self::two_over),
        builtin!("DEPTH", Self::depth),
        builtin!(">R", Self::to_r),
        builtin!("R>", Self::r_from),
        builtin!("R@", Self::r_fetch),
        builtin!("I", Self::loop_i),
        builtin!("J", Self::loop_j),
        // Arithmetic
        builtin!("+", Self::add),
        builtin!("-", Self::sub),
        builtin!("*", Self::mul),
        builtin!("/", Self::div),
        builtin!("MOD", Self::modu),
        builtin!("/MOD", Self::div_mod),
        builtin!("NEGATE", Self::negate),
        builtin!("ABS", Self::abs),
        builtin!("MIN", Self::min),
        builtin!("MAX", Self::max),
        builtin!("1+", Self::one_plus),
        builtin!("1-", Self::one_minus),
        builtin!("2+", Self::two_plus),
        builtin!("2-", Self::two_minus),
        builtin!("2*", Self::two_star),
        builtin!("2/", Self::two_slash),
        builtin!("AND", Self::and),
        builtin!("OR", Self::or),
        builtin!("XOR", Self::xor),
        builtin!("INVERT", Self::invert),
        builtin!("LSHIFT", Self::lshift),
        builtin!("RSHIFT", Self::rshift),
        builtin!("UM*", Self::um_star),
        builtin!("M*", Self::m_star),
        builtin!("UM/MOD", Self::um_slash_mod),
        builtin!("*/", Self::star_slash),
        // Comparison
        builtin!("=", Self::equal),
        builtin!("<>", Self::not_equal),
        builtin!("<", Self::less),
        builtin!(">", Self::greater),
        builtin!("U<", Self::u_less),
        builtin!("U>", Self::u_greater),
        builtin!("0=", Self::zero_equal),
        builtin!("0<", Self::zero_less),
        builtin!("0>", Self::zero_greater),
        builtin!("NOT", Self::zero_equal),
        // Memory
        builtin!("@", Self::fetch),
        builtin!("!", Self::store),
        builtin!("C@", Self::c_fetch),
        builtin!("C!", Self::c_store),
        builtin!("+!", Self::plus_store),
        builtin!("2@", Self::two_fetch),
        builtin!("2!", Self::two_store),
        builtin!("HERE", Self::here),
        builtin!(",", Self::comma),
        builtin!("C,", Self::c_comma),
        builtin!("ALLOT", Self::allot),
        builtin!("CELLS", Self::cells),
        builtin!("CELL+", Self::cell_plus),
        builtin!("FILL", Self::fill),
        builtin!("CMOVE", Self::cmove),
        // Character I/O
        builtin!("EMIT", Self::emit),
        builtin!("KEY", Self::key),
        builtin!("KEY?", Self::key_question),
        builtin!("TYPE", Self::type_),
        builtin!("CR", Self::cr),
        builtin!("SPACE", Self::space),
        builtin!("SPACES", Self::spaces),
        builtin!(".", Self::dot),
        builtin!("U.", Self::u_dot),
        builtin!(".S", Self::dot_s),
        builtin!("COUNT", Self::count),
        builtin!("EXPECT", Self::expect),
        builtin!("PAD", Self::pad_addr),
        builtin!("HOLD", Self::hold),
        builtin!("<#", Self::less_sharp),
        builtin!("#", Self::sharp),
        builtin!("#S", Self::sharp_s),
        builtin!("SIGN", Self::sign),
        builtin!("#>", Self::sharp_greater),
        builtin!("HEX", Self::hex),
        builtin!("DECIMAL", Self::decimal),
        builtin!("OCTAL", Self::octal),
        // Input
        builtin!("WORD", Self::word),
        builtin!("FIND", Self::find),
        // Compiler
        builtin!(":", Self::colon),
        builtin_imm!(";", Self::semicolon),
        builtin!("IMMEDIATE", Self::immediate),
        builtin!("CREATE", Self::create),
        builtin!("VARIABLE", Self::variable),
        builtin!("CONSTANT", Self::constant_word),
        builtin!("'", Self::tick_word),
        builtin_imm!("[", Self::left_bracket),
        builtin!("]", Self::right_bracket),
        builtin_imm!("LITERAL", Self::literal),
        builtin_imm!("IF", Self::if_),
        builtin_imm!("ELSE", Self::else_),
        builtin_imm!("THEN", Self::then),
        builtin_imm!("BEGIN", Self::begin),
        builtin_imm!("UNTIL", Self::until),
        builtin_imm!("AGAIN", Self::again),
        builtin_imm!("WHILE", Self::while_),
        builtin_imm!("REPEAT", Self::repeat),
        builtin_imm!("DO", Self::do_),
        builtin_imm!("LOOP", Self::loop_),
        builtin_imm!("+LOOP", Self::plus_loop),
        builtin_imm!("(", Self::paren),
        builtin_imm!("\\", Self::backslash),
        builtin_imm!(".\"", Self::dot_quote),
        builtin_imm!("C\"", Self::c_quote),
        builtin!("FORGET", Self::forget),
        builtin!("WORDS", Self::words),
        // Blocks
        builtin_blk!("BLOCK", Self::block),
        builtin_blk!("UPDATE", Self::update),
        builtin_blk!("SAVE-BUFFERS", Self::save_buffers),
        builtin_blk!("EMPTY-BUFFERS", Self::empty_buffers),
        builtin_blk!("RBLK", Self::rblk),
        builtin_blk!("WBLK", Self::wblk),
    ];

    // Helpers

    #[inline]
    fn pop(&mut self) -> Result<u16, Error> {
        self.ds.pop_cell(&self.mem)
    }

    #[inline]
    fn push(&mut self, val: u16) -> Result<(), Error> {
        self.ds.push_cell(&mut self.mem, val)
    }

    #[inline]
    fn pop_signed(&mut self) -> Result<i16, Error> {
        Ok(self.pop()? as i16)
    }

    #[inline]
    fn push_flag(&mut self, b: bool) -> Result<(), Error> {
        self.push(crate::flag(b))
    }

    fn pop_addr(&mut self) -> Result<usize, Error> {
        Ok(usize::from(self.pop()?))
    }

    fn unary(&mut self, f: impl FnOnce(u16) -> u16) -> Result<(), Error> {
        let a = self.pop()?;
        self.push(f(a))
    }

    fn binary(&mut self, f: impl FnOnce(u16, u16) -> u16) -> Result<(), Error> {
        let b = self.pop()?;
        let a = self.pop()?;
        self.push(f(a, b))
    }

    fn compare(&mut self, f: impl FnOnce(u16, u16) -> bool) -> Result<(), Error> {
        let b = self.pop()?;
        let a = self.pop()?;
        self.push_flag(f(a, b))
    }

    fn checked_base(&self) -> Result<u32, Error> {
        let base = self.base()?;
        if (2..=36).contains(&base) {
            Ok(u32::from(base))
        } else {
            Err(Error::BadBase(base))
        }
    }

    fn set_base(&mut self, base: u16) -> Result<(), Error> {
        self.uv.write_cell(&mut self.mem, self.vars.base, base)?;
        Ok(())
    }

    /// Prints `magnitude` in the current base, with a leading `-` when
    /// `negative`, followed by a space.
    fn print_number(&mut self, magnitude: u32, negative: bool) -> Result<(), Error> {
        let base = self.checked_base()?;
        let mut buf = [0u8; 34];
        let mut at = buf.len();
        let mut val = magnitude;
        loop {
            at -= 1;
            buf[at] = digit_char(val % base);
            val /= base;
            if val == 0 {
                break;
            }
        }
        if negative {
            at -= 1;
            buf[at] = b'-';
        }
        self.output.write_bytes(&buf[at..])?;
        self.output.write(b' ')?;
        Ok(())
    }

    fn require_compiling(&self) -> Result<(), Error> {
        if self.compiling()? {
            Ok(())
        } else {
            Err(Error::InterpretingCompileOnlyWord)
        }
    }

    fn here_addr(&self) -> Result<usize, Error> {
        self.dict.here(&self.mem)
    }

    fn comma_xt(&mut self, xt: u16) -> Result<(), Error> {
        self.dict.comma(&mut self.mem, xt)
    }

    /// Compiles a branch operand reaching `target`.
    fn comma_offset(&mut self, target: usize) -> Result<(), Error> {
        let at = self.here_addr()?;
        let offset = target as isize - (at + CELL) as isize;
        self.dict.comma(&mut self.mem, offset as u16)
    }

    /// Compiles a placeholder operand to be patched later.
    fn comma_orig(&mut self) -> Result<usize, Error> {
        let at = self.here_addr()?;
        self.dict.comma(&mut self.mem, 0)?;
        Ok(at)
    }

    /// Points the operand at `at` to `HERE`.
    fn patch(&mut self, at: usize) -> Result<(), Error> {
        let here = self.here_addr()?;
        let offset = here as isize - (at + CELL) as isize;
        self.mem.write_cell(at, offset as u16)?;
        Ok(())
    }

    fn pop_orig(&mut self) -> Result<usize, Error> {
        match self.control.pop() {
            Some(Pending::Orig(at)) => Ok(at),
            _ => Err(Error::UnbalancedControl),
        }
    }

    fn pop_dest(&mut self) -> Result<usize, Error> {
        match self.control.pop() {
            Some(Pending::Dest(at)) => Ok(at),
            _ => Err(Error::UnbalancedControl),
        }
    }

    fn pop_do(&mut self) -> Result<usize, Error> {
        match self.control.pop() {
            Some(Pending::Do(at)) => Ok(at),
            _ => Err(Error::UnbalancedControl),
        }
    }

    /// Bytes of an inline counted string at `ip`. Leaves `ip` after it.
    fn inline_string(&mut self) -> Result<(usize, usize), Error> {
        if self.ip == 0 {
            return Err(Error::InterpretingCompileOnlyWord);
        }
        let addr = self.ip;
        let len = usize::from(self.mem.read_byte(addr)?);
        self.ip = addr + 1 + len;
        Ok((addr, len))
    }

    // Inner interpreter

    pub fn lit(&mut self) -> Result<(), Error> {
        let val = self.operand()?;
        self.push(val)
    }

    pub fn branch_word(&mut self) -> Result<(), Error> {
        self.branch()
    }

    pub fn zero_branch(&mut self) -> Result<(), Error> {
        if self.pop()? == 0 {
            self.branch()
        } else {
            self.operand().map(drop)
        }
    }

    pub fn execute_xt(&mut self) -> Result<(), Error> {
        let xt = self.pop()?;
        self.dispatch(xt)
    }

    /// ( limit index -- ) ( R: -- limit index )
    pub fn paren_do(&mut self) -> Result<(), Error> {
        let index = self.pop()?;
        let limit = self.pop()?;
        self.rs.push_cell(&mut self.mem, limit)?;
        self.rs.push_cell(&mut self.mem, index)
    }

    /// Adds `inc` to the loop index. Loops back while the index has not
    /// crossed the boundary between `limit - 1` and `limit`.
    fn loop_step(&mut self, inc: u16) -> Result<(), Error> {
        let index = self.rs.peek_cell(&self.mem, 0)?;
        let limit = self.rs.peek_cell(&self.mem, 1)?;
        let old = index.wrapping_sub(limit) as i16;
        let new = old.wrapping_add(inc as i16);
        let done = (old ^ new) < 0 && (old ^ inc as i16) < 0;
        if done {
            self.rs.pop_cell(&self.mem)?;
            self.rs.pop_cell(&self.mem)?;
            self.operand().map(drop)
        } else {
            self.rs.poke_cell(&mut self.mem, 0, index.wrapping_add(inc))?;
            self.branch()
        }
    }

    pub fn paren_loop(&mut self) -> Result<(), Error> {
        self.loop_step(1)
    }

    pub fn paren_plus_loop(&mut self) -> Result<(), Error> {
        let inc = self.pop()?;
        self.loop_step(inc)
    }

    /// Pushes the address of the inline counted string.
    pub fn slit(&mut self) -> Result<(), Error> {
        let (addr, _) = self.inline_string()?;
        self.push(addr as u16)
    }

    pub fn paren_dot_quote(&mut self) -> Result<(), Error> {
        let (addr, len) = self.inline_string()?;
        self.output.write_bytes(self.mem.read_bytes(addr + 1, len)?)?;
        Ok(())
    }

    pub fn dovar(&mut self) -> Result<(), Error> {
        self.push(self.w + CELL as u16)
    }

    pub fn doconst(&mut self) -> Result<(), Error> {
        let val = self.mem.read_cell(usize::from(self.w) + CELL)?;
        self.push(val)
    }

    pub fn nop(&mut self) -> Result<(), Error> {
        Ok(())
    }

    pub fn bye(&mut self) -> Result<(), Error> {
        tracing::debug!("bye");
        self.halted = true;
        Ok(())
    }

    // Stack

    pub fn dup(&mut self) -> Result<(), Error> {
        self.ds.dup(&mut self.mem)
    }

    pub fn drop(&mut self) -> Result<(), Error> {
        self.ds.drop(&self.mem)
    }

    pub fn swap(&mut self) -> Result<(), Error> {
        self.ds.swap(&mut self.mem)
    }

    pub fn over(&mut self) -> Result<(), Error> {
        self.ds.over(&mut self.mem)
    }

    pub fn rot(&mut self) -> Result<(), Error> {
        self.ds.rot(&mut self.mem)
    }

    pub fn minus_rot(&mut self) -> Result<(), Error> {
        self.ds.rot(&mut self.mem)?;
        self.ds.rot(&mut self.mem)
    }

    pub fn nip(&mut self) -> Result<(), Error> {
        self.ds.nip(&mut self.mem)
    }

    pub fn tuck(&mut self) -> Result<(), Error> {
        self.ds.tuck(&mut self.mem)
    }

    pub fn question_dup(&mut self) -> Result<(), Error> {
        if self.ds.peek_cell(&self.mem, 0)? != 0 {
            self.ds.dup(&mut self.mem)?;
        }
        Ok(())
    }

    pub fn two_dup(&mut self) -> Result<(), Error> {
        let d = self.ds.peek_double(&self.mem, 0)?;
        self.ds.push_double(&mut self.mem, d)
    }

    pub fn two_drop(&mut self) -> Result<(), Error> {
        self.ds.pop_double(&self.mem).map(drop)
    }

    pub fn two_swap(&mut self) -> Result<(), Error> {
        let b = self.ds.pop_double(&self.mem)?;
        let a = self.ds.pop_double(&self.mem)?;
        self.ds.push_double(&mut self.mem, b)?;
        self.ds.push_double(&mut self.mem, a)
    }

    pub fn two_over(&mut self) -> Result<(), Error> {
        let a = self.ds.peek_double(&self.mem, 1)?;
        self.ds.push_double(&mut self.mem, a)
    }

    pub fn depth(&mut self) -> Result<(), Error> {
        let depth = self.ds.depth_cells() as u16;
        self.push(depth)
    }

    pub fn to_r(&mut self) -> Result<(), Error> {
        let val = self.pop()?;
        self.rs.push_cell(&mut self.mem, val)
    }

    pub fn r_from(&mut self) -> Result<(), Error> {
        let val = self.rs.pop_cell(&self.mem)?;
        self.push(val)
    }

    pub fn r_fetch(&mut self) -> Result<(), Error> {
        let val = self.rs.peek_cell(&self.mem, 0)?;
        self.push(val)
    }

    pub fn loop_i(&mut self) -> Result<(), Error> {
        let val = self.rs.peek_cell(&self.mem, 0)?;
        self.push(val)
    }

    pub fn loop_j(&mut self) -> Result<(), Error> {
        let val = self.rs.peek_cell(&self.mem, 2)?;
        self.push(val)
    }

    // Arithmetic

    pub fn add(&mut self) -> Result<(), Error> {
        self.binary(u16::wrapping_add)
    }

    pub fn sub(&mut self) -> Result<(), Error> {
        self.binary(u16::wrapping_sub)
    }

    pub fn mul(&mut self) -> Result<(), Error> {
        self.binary(u16::wrapping_mul)
    }

    /// ( a b -- quot rem ), truncating toward zero.
    fn signed_div(&mut self) -> Result<(i16, i16), Error> {
        let b = self.pop_signed()?;
        let a = self.pop_signed()?;
        if b == 0 {
            return Err(Error::DivideByZero);
        }
        Ok((a.wrapping_div(b), a.wrapping_rem(b)))
    }

    pub fn div(&mut self) -> Result<(), Error> {
        let (quot, _) = self.signed_div()?;
        self.push(quot as u16)
    }

    pub fn modu(&mut self) -> Result<(), Error> {
        let (_, rem) = self.signed_div()?;
        self.push(rem as u16)
    }

    /// ( a b -- rem quot )
    pub fn div_mod(&mut self) -> Result<(), Error> {
        let (quot, rem) = self.signed_div()?;
        self.push(rem as u16)?;
        self.push(quot as u16)
    }

    pub fn negate(&mut self) -> Result<(), Error> {
        self.unary(|a| (a as i16).wrapping_neg() as u16)
    }

    pub fn abs(&mut self) -> Result<(), Error> {
        self.unary(|a| (a as i16).wrapping_abs() as u16)
    }

    pub fn min(&mut self) -> Result<(), Error> {
        self.binary(|a, b| (a as i16).min(b as i16) as u16)
    }

    pub fn max(&mut self) -> Result<(), Error> {
        self.binary(|a, b| (a as i16).max(b as i16) as u16)
    }

    pub fn one_plus(&mut self) -> Result<(), Error> {
        self.unary(|a| a.wrapping_add(1))
    }

    pub fn one_minus(&mut self) -> Result<(), Error> {
        self.unary(|a| a.wrapping_sub(1))
    }

    pub fn two_plus(&mut self) -> Result<(), Error> {
        self.unary(|a| a.wrapping_add(2))
    }

    pub fn two_minus(&mut self) -> Result<(), Error> {
        self.unary(|a| a.wrapping_sub(2))
    }

    pub fn two_star(&mut self) -> Result<(), Error> {
        self.unary(|a| a << 1)
    }

    pub fn two_slash(&mut self) -> Result<(), Error> {
        self.unary(|a| ((a as i16) >> 1) as u16)
    }

    pub fn and(&mut self) -> Result<(), Error> {
        self.binary(|a, b| a & b)
    }

    pub fn or(&mut self) -> Result<(), Error> {
        self.binary(|a, b| a | b)
    }

    pub fn xor(&mut self) -> Result<(), Error> {
        self.binary(|a, b| a ^ b)
    }

    pub fn invert(&mut self) -> Result<(), Error> {
        self.unary(|a| !a)
    }

    pub fn lshift(&mut self) -> Result<(), Error> {
        self.binary(|a, n| a.checked_shl(u32::from(n)).unwrap_or(0))
    }

    pub fn rshift(&mut self) -> Result<(), Error> {
        self.binary(|a, n| a.checked_shr(u32::from(n)).unwrap_or(0))
    }

    /// ( u1 u2 -- ud )
    pub fn um_star(&mut self) -> Result<(), Error> {
        let b = u32::from(self.pop()?);
        let a = u32::from(self.pop()?);
        self.ds.push_double(&mut self.mem, a * b)
    }

    /// ( n1 n2 -- d )
    pub fn m_star(&mut self) -> Result<(), Error> {
        let b = i32::from(self.pop_signed()?);
        let a = i32::from(self.pop_signed()?);
        self.ds.push_double(&mut self.mem, (a * b) as u32)
    }

    /// ( ud u -- urem uquot )
    pub fn um_slash_mod(&mut self) -> Result<(), Error> {
        let div = u32::from(self.pop()?);
        let ud = self.ds.pop_double(&self.mem)?;
        if div == 0 {
            return Err(Error::DivideByZero);
        }
        self.push((ud % div) as u16)?;
        self.push((ud / div) as u16)
    }

    /// ( n1 n2 n3 -- n1*n2/n3 ), with a double width intermediate.
    pub fn star_slash(&mut self) -> Result<(), Error> {
        let c = i32::from(self.pop_signed()?);
        let b = i32::from(self.pop_signed()?);
        let a = i32::from(self.pop_signed()?);
        if c == 0 {
            return Err(Error::DivideByZero);
        }
        self.push(((a * b) / c) as u16)
    }

    // Comparison

    pub fn equal(&mut self) -> Result<(), Error> {
        self.compare(|a, b| a == b)
    }

    pub fn not_equal(&mut self) -> Result<(), Error> {
        self.compare(|a, b| a != b)
    }

    pub fn less(&mut self) -> Result<(), Error> {
        self.compare(|a, b| (a as i16) < (b as i16))
    }

    pub fn greater(&mut self) -> Result<(), Error> {
        self.compare(|a, b| (a as i16) > (b as i16))
    }

    pub fn u_less(&mut self) -> Result<(), Error> {
        self.compare(|a, b| a < b)
    }

    pub fn u_greater(&mut self) -> Result<(), Error> {
        self.compare(|a, b| a > b)
    }

    pub fn zero_equal(&mut self) -> Result<(), Error> {
        let a = self.pop()?;
        self.push_flag(a == 0)
    }

    pub fn zero_less(&mut self) -> Result<(), Error> {
        let a = self.pop_signed()?;
        self.push_flag(a < 0)
    }

    pub fn zero_greater(&mut self) -> Result<(), Error> {
        let a = self.pop_signed()?;
        self.push_flag(a > 0)
    }

    // Memory

    pub fn fetch(&mut self) -> Result<(), Error> {
        let addr = self.pop_addr()?;
        let val = self.mem.read_cell(addr)?;
        self.push(val)
    }

    pub fn store(&mut self) -> Result<(), Error> {
        let addr = self.pop_addr()?;
        let val = self.pop()?;
        self.mem.write_cell(addr, val)?;
        Ok(())
    }

    pub fn c_fetch(&mut self) -> Result<(), Error> {
        let addr = self.pop_addr()?;
        let val = self.mem.read_byte(addr)?;
        self.push(u16::from(val))
    }

    pub fn c_store(&mut self) -> Result<(), Error> {
        let addr = self.pop_addr()?;
        let val = self.pop()?;
        self.mem.write_byte(addr, val as u8)?;
        Ok(())
    }

    pub fn plus_store(&mut self) -> Result<(), Error> {
        let addr = self.pop_addr()?;
        let n = self.pop()?;
        let val = self.mem.read_cell(addr)?;
        self.mem.write_cell(addr, val.wrapping_add(n))?;
        Ok(())
    }

    pub fn two_fetch(&mut self) -> Result<(), Error> {
        let addr = self.pop_addr()?;
        let val = self.mem.read_double(addr)?;
        self.ds.push_double(&mut self.mem, val)
    }

    pub fn two_store(&mut self) -> Result<(), Error> {
        let addr = self.pop_addr()?;
        let val = self.ds.pop_double(&self.mem)?;
        self.mem.write_double(addr, val)?;
        Ok(())
    }

    pub fn here(&mut self) -> Result<(), Error> {
        let here = self.here_addr()?;
        self.push(here as u16)
    }

    pub fn comma(&mut self) -> Result<(), Error> {
        let val = self.pop()?;
        self.dict.comma(&mut self.mem, val)
    }

    pub fn c_comma(&mut self) -> Result<(), Error> {
        let val = self.pop()?;
        self.dict.c_comma(&mut self.mem, val as u8)
    }

    pub fn allot(&mut self) -> Result<(), Error> {
        let n = self.pop_signed()?;
        self.dict.allot(&mut self.mem, isize::from(n)).map(drop)
    }

    pub fn cells(&mut self) -> Result<(), Error> {
        self.unary(|n| n.wrapping_mul(CELL as u16))
    }

    pub fn cell_plus(&mut self) -> Result<(), Error> {
        self.unary(|n| n.wrapping_add(CELL as u16))
    }

    /// ( addr n ch -- )
    pub fn fill(&mut self) -> Result<(), Error> {
        let ch = self.pop()?;
        let len = self.pop_signed()?;
        let addr = self.pop_addr()?;
        if len > 0 {
            self.mem.fill(addr, len as usize, ch as u8)?;
        }
        Ok(())
    }

    /// ( src dst n -- ), copying from low addresses to high.
    pub fn cmove(&mut self) -> Result<(), Error> {
        let len = self.pop_signed()?;
        let dst = self.pop_addr()?;
        let src = self.pop_addr()?;
        for i in 0..len.max(0) as usize {
            let b = self.mem.read_byte(src + i)?;
            self.mem.write_byte(dst + i, b)?;
        }
        Ok(())
    }

    // Character I/O

    pub fn emit(&mut self) -> Result<(), Error> {
        let ch = self.pop()?;
        self.output.write(ch as u8)?;
        Ok(())
    }

    pub fn key(&mut self) -> Result<(), Error> {
        let ch = self.input.read().ok_or(Error::NoInput)?;
        self.push(u16::from(ch))
    }

    pub fn key_question(&mut self) -> Result<(), Error> {
        let ready = self.input.check();
        self.push_flag(ready)
    }

    /// ( addr n -- )
    pub fn type_(&mut self) -> Result<(), Error> {
        let len = self.pop_signed()?;
        let addr = self.pop_addr()?;
        let bytes = self.mem.read_bytes(addr, len.max(0) as usize)?;
        self.output.write_bytes(bytes)?;
        Ok(())
    }

    pub fn cr(&mut self) -> Result<(), Error> {
        self.output.write(b'\n')?;
        Ok(())
    }

    pub fn space(&mut self) -> Result<(), Error> {
        self.output.write(b' ')?;
        Ok(())
    }

    pub fn spaces(&mut self) -> Result<(), Error> {
        let num = self.pop_signed()?;
        for _ in 0..num.max(0) {
            self.output.write(b' ')?;
        }
        Ok(())
    }

    /// Prints the top of the stack as a signed number.
    pub fn dot(&mut self) -> Result<(), Error> {
        let n = self.pop_signed()?;
        self.print_number(u32::from(n.unsigned_abs()), n < 0)
    }

    pub fn u_dot(&mut self) -> Result<(), Error> {
        let n = self.pop()?;
        self.print_number(u32::from(n), false)
    }

    /// Prints `<depth>` and then the stack from the bottom up.
    pub fn dot_s(&mut self) -> Result<(), Error> {
        let depth = self.ds.depth_cells();
        self.output.write(b'<')?;
        for b in depth.to_string().bytes() {
            self.output.write(b)?;
        }
        self.output.write_bytes(b"> ")?;
        for d in (0..depth).rev() {
            let n = self.ds.peek_cell(&self.mem, d)? as i16;
            self.print_number(u32::from(n.unsigned_abs()), n < 0)?;
        }
        Ok(())
    }

    /// ( c-addr -- addr len )
    pub fn count(&mut self) -> Result<(), Error> {
        let addr = self.pop()?;
        let len = self.mem.read_byte(usize::from(addr))?;
        self.push(addr.wrapping_add(1))?;
        self.push(u16::from(len))
    }

    /// ( addr n -- ) Reads up to `n` characters, or up to a newline, into
    /// `addr`. The count read goes to `SPAN`.
    pub fn expect(&mut self) -> Result<(), Error> {
        let max = self.pop_signed()?.max(0) as usize;
        let addr = self.pop_addr()?;
        let mut n = 0;
        while n < max {
            match self.input.read() {
                None | Some(b'\n') => break,
                Some(b'\r') => {}
                Some(ch) => {
                    self.mem.write_byte(addr + n, ch)?;
                    n += 1;
                }
            }
        }
        self.uv.write_cell(&mut self.mem, self.vars.span, n as u16)?;
        Ok(())
    }

    pub fn pad_addr(&mut self) -> Result<(), Error> {
        let addr = self.pad.addr();
        self.push(addr as u16)
    }

    pub fn hold(&mut self) -> Result<(), Error> {
        let ch = self.pop()?;
        self.pad.hold(&mut self.mem, ch as u8)?;
        Ok(())
    }

    pub fn less_sharp(&mut self) -> Result<(), Error> {
        self.pad.reset();
        Ok(())
    }

    /// ( ud -- ud' ) Moves the lowest digit of `ud` into the pad.
    pub fn sharp(&mut self) -> Result<(), Error> {
        let base = self.checked_base()?;
        let ud = self.ds.pop_double(&self.mem)?;
        self.pad.hold(&mut self.mem, digit_char(ud % base))?;
        self.ds.push_double(&mut self.mem, ud / base)
    }

    pub fn sharp_s(&mut self) -> Result<(), Error> {
        loop {
            self.sharp()?;
            if self.ds.peek_double(&self.mem, 0)? == 0 {
                break Ok(());
            }
        }
    }

    /// ( n -- ) Holds a `-` if `n` is negative.
    pub fn sign(&mut self) -> Result<(), Error> {
        if self.pop_signed()? < 0 {
            self.pad.hold(&mut self.mem, b'-')?;
        }
        Ok(())
    }

    /// ( ud -- addr len )
    pub fn sharp_greater(&mut self) -> Result<(), Error> {
        self.ds.pop_double(&self.mem)?;
        let (addr, len) = self.pad.held();
        self.push(addr as u16)?;
        self.push(len as u16)
    }

    pub fn hex(&mut self) -> Result<(), Error> {
        self.set_base(16)
    }

    pub fn decimal(&mut self) -> Result<(), Error> {
        self.set_base(10)
    }

    pub fn octal(&mut self) -> Result<(), Error> {
        self.set_base(8)
    }

    // Input

    /// ( ch -- c-addr ) Parses the next `ch` delimited word into the `WORD`
    /// buffer as a counted string.
    pub fn word(&mut self) -> Result<(), Error> {
        let delim = self.pop()? as u8;
        let (addr, len) = self.tib.word(&mut self.mem, delim)?;
        if len >= WORD_BUF_SIZE {
            return Err(Error::InputTooLong);
        }
        let buf = self.vars.word;
        self.mem.copy_within(addr, buf + 1, len)?;
        self.sv.write_byte(&mut self.mem, buf, len as u8)?;
        self.push(buf as u16)
    }

    /// ( c-addr -- c-addr 0 | xt 1 | xt -1 ) 1 for immediate words.
    pub fn find(&mut self) -> Result<(), Error> {
        let c_addr = self.pop()?;
        let len = self.mem.read_byte(usize::from(c_addr))?;
        let bytes = self.mem.read_bytes(usize::from(c_addr) + 1, usize::from(len))?;
        let name = core::str::from_utf8(bytes).replace_err(Error::InputNotAscii)?;
        match self.dict.find(&self.mem, name)? {
            Some(hdr) => {
                let xt = self.dict.cfa(&self.mem, hdr)? as u16;
                let kind = if self.dict.is_immediate(&self.mem, hdr)? { 1 } else { 0xFFFF };
                self.push(xt)?;
                self.push(kind)
            }
            None => {
                self.push(c_addr)?;
                self.push(0)
            }
        }
    }

    // Compiler

    pub fn colon(&mut self) -> Result<(), Error> {
        if self.building.is_some() {
            return Err(Error::UnbalancedControl);
        }
        let name = self.parse_name()?;
        let hdr = self.dict.create(&mut self.mem, &name)?;
        let pfa = self.dict.pfa(&self.mem, hdr)?;
        self.dict.set_code(&mut self.mem, hdr, CodeField::Compiled(pfa as u16))?;
        self.dict.set_flag(&mut self.mem, hdr, HIDDEN, true)?;
        self.building = Some(hdr);
        self.control.clear();
        self.set_state(true)
    }

    pub fn semicolon(&mut self) -> Result<(), Error> {
        self.require_compiling()?;
        if !self.control.is_empty() {
            return Err(Error::UnbalancedControl);
        }
        self.comma_xt(self.prims.exit)?;
        if let Some(hdr) = self.building.take() {
            self.dict.set_flag(&mut self.mem, hdr, HIDDEN, false)?;
        }
        self.set_state(false)
    }

    pub fn immediate(&mut self) -> Result<(), Error> {
        let hdr = self.dict.latest(&self.mem)?.ok_or(Error::UndefinedWord)?;
        self.dict.set_flag(&mut self.mem, hdr, IMMEDIATE, true)
    }

    pub fn create(&mut self) -> Result<(), Error> {
        let name = self.parse_name()?;
        self.dict.create(&mut self.mem, &name).map(drop)
    }

    pub fn variable(&mut self) -> Result<(), Error> {
        self.create()?;
        self.dict.comma(&mut self.mem, 0)
    }

    /// ( x "name" -- )
    pub fn constant_word(&mut self) -> Result<(), Error> {
        let val = self.pop()?;
        let name = self.parse_name()?;
        self.constant(&name, val).map(drop)
    }

    pub fn tick_word(&mut self) -> Result<(), Error> {
        let name = self.parse_name()?;
        let xt = self.lookup_xt(&name)?;
        self.push(xt)
    }

    pub fn left_bracket(&mut self) -> Result<(), Error> {
        self.set_state(false)
    }

    pub fn right_bracket(&mut self) -> Result<(), Error> {
        self.set_state(true)
    }

    pub fn literal(&mut self) -> Result<(), Error> {
        self.require_compiling()?;
        let val = self.pop()?;
        self.compile_lit(val)
    }

    pub fn if_(&mut self) -> Result<(), Error> {
        self.require_compiling()?;
        self.comma_xt(self.prims.zbranch)?;
        let orig = self.comma_orig()?;
        self.control.push(Pending::Orig(orig));
        Ok(())
    }

    pub fn else_(&mut self) -> Result<(), Error> {
        self.require_compiling()?;
        let orig = self.pop_orig()?;
        self.comma_xt(self.prims.branch)?;
        let ahead = self.comma_orig()?;
        self.patch(orig)?;
        self.control.push(Pending::Orig(ahead));
        Ok(())
    }

    pub fn then(&mut self) -> Result<(), Error> {
        self.require_compiling()?;
        let orig = self.pop_orig()?;
        self.patch(orig)
    }

    pub fn begin(&mut self) -> Result<(), Error> {
        self.require_compiling()?;
        let dest = self.here_addr()?;
        self.control.push(Pending::Dest(dest));
        Ok(())
    }

    pub fn until(&mut self) -> Result<(), Error> {
        self.require_compiling()?;
        let dest = self.pop_dest()?;
        self.comma_xt(self.prims.zbranch)?;
        self.comma_offset(dest)
    }

    pub fn again(&mut self) -> Result<(), Error> {
        self.require_compiling()?;
        let dest = self.pop_dest()?;
        self.comma_xt(self.prims.branch)?;
        self.comma_offset(dest)
    }

    pub fn while_(&mut self) -> Result<(), Error> {
        self.require_compiling()?;
        let dest = self.pop_dest()?;
        self.comma_xt(self.prims.zbranch)?;
        let orig = self.comma_orig()?;
        self.control.push(Pending::Orig(orig));
        self.control.push(Pending::Dest(dest));
        Ok(())
    }

    pub fn repeat(&mut self) -> Result<(), Error> {
        self.require_compiling()?;
        let dest = self.pop_dest()?;
        self.comma_xt(self.prims.branch)?;
        self.comma_offset(dest)?;
        let orig = self.pop_orig()?;
        self.patch(orig)
    }

    pub fn do_(&mut self) -> Result<(), Error> {
        self.require_compiling()?;
        self.comma_xt(self.prims.do_)?;
        let body = self.here_addr()?;
        self.control.push(Pending::Do(body));
        Ok(())
    }

    pub fn loop_(&mut self) -> Result<(), Error> {
        self.require_compiling()?;
        let body = self.pop_do()?;
        self.comma_xt(self.prims.loop_)?;
        self.comma_offset(body)
    }

    pub fn plus_loop(&mut self) -> Result<(), Error> {
        self.require_compiling()?;
        let body = self.pop_do()?;
        self.comma_xt(self.prims.plus_loop)?;
        self.comma_offset(body)
    }

    pub fn paren(&mut self) -> Result<(), Error> {
        self.tib.parse(&mut self.mem, b')').map(drop)
    }

    pub fn backslash(&mut self) -> Result<(), Error> {
        self.tib.exhaust(&mut self.mem)
    }

    /// Prints the following `"` delimited text, or compiles code that does.
    pub fn dot_quote(&mut self) -> Result<(), Error> {
        let (addr, len) = self.tib.parse(&mut self.mem, b'"')?;
        if self.compiling()? {
            let text = self.mem.read_bytes(addr, len)?.to_vec();
            self.compile_string(self.prims.dot_quote, &text)
        } else {
            self.output.write_bytes(self.mem.read_bytes(addr, len)?)?;
            Ok(())
        }
    }

    pub fn c_quote(&mut self) -> Result<(), Error> {
        self.require_compiling()?;
        let (addr, len) = self.tib.parse(&mut self.mem, b'"')?;
        let text = self.mem.read_bytes(addr, len)?.to_vec();
        self.compile_string(self.prims.slit, &text)
    }

    pub fn forget(&mut self) -> Result<(), Error> {
        let name = self.parse_name()?;
        let hdr = self
            .dict
            .find(&self.mem, &name)?
            .ok_or(Error::UndefinedWord)?;
        self.dict.forget(&mut self.mem, hdr)
    }

    /// Lists the visible words, newest first.
    pub fn words(&mut self) -> Result<(), Error> {
        for hdr in self.dict.headers(&self.mem)? {
            if self.dict.flags(&self.mem, hdr)? & HIDDEN != 0 {
                continue;
            }
            self.output.write_bytes(self.dict.name(&self.mem, hdr)?)?;
            self.output.write(b' ')?;
        }
        Ok(())
    }

    // Blocks

    /// ( n -- addr )
    pub fn block(&mut self) -> Result<(), Error> {
        let n = self.pop()?;
        let storage = self.blocks.as_deref_mut().ok_or(Error::NoBlockStorage)?;
        let addr = self.bb.block(&mut self.mem, storage, n)?;
        self.push(addr as u16)
    }

    pub fn update(&mut self) -> Result<(), Error> {
        self.bb.update();
        Ok(())
    }

    pub fn save_buffers(&mut self) -> Result<(), Error> {
        let storage = self.blocks.as_deref_mut().ok_or(Error::NoBlockStorage)?;
        self.bb.flush(&self.mem, storage)
    }

    pub fn empty_buffers(&mut self) -> Result<(), Error> {
        self.bb.empty();
        Ok(())
    }

    /// ( addr n -- ) Reads block `n` straight into memory at `addr`.
    pub fn rblk(&mut self) -> Result<(), Error> {
        let n = self.pop()?;
        let addr = self.pop_addr()?;
        let storage = self.blocks.as_deref_mut().ok_or(Error::NoBlockStorage)?;
        let mut buf: Block = [0u8; BLOCK_SIZE];
        storage.read_block(n, &mut buf)?;
        self.mem.write_bytes(addr, &buf)?;
        Ok(())
    }

    /// ( addr n -- ) Writes the block at `addr` straight to block `n`.
    pub fn wblk(&mut self) -> Result<(), Error> {
        let n = self.pop()?;
        let addr = self.pop_addr()?;
        let storage = self.blocks.as_deref_mut().ok_or(Error::NoBlockStorage)?;
        let bytes = self.mem.read_bytes(addr, BLOCK_SIZE)?;
        let buf: &Block = bytes.try_into().replace_err(BlockError::Io)?;
        storage.write_block(n, buf)?;
        Ok(())
    }
}

#[cfg(test)]
pub mod test {
    use crate::{input::InputBuf, output::OutputBuf, vm::Params, Error, Machine};

    fn machine() -> Machine {
        Machine::boot(Params::default(), InputBuf::new(), OutputBuf::new()).unwrap()
    }

    fn stack(forth: &Machine) -> Vec<u16> {
        (0..forth.ds.depth_cells())
            .rev()
            .map(|d| forth.ds.peek_cell(&forth.mem, d).unwrap())
            .collect()
    }

    #[test]
    fn primitive_names_are_unique() {
        let prims = Machine::<InputBuf, OutputBuf>::PRIMITIVES;
        for (i, a) in prims.iter().enumerate() {
            assert!(a.name.len() <= crate::dictionary::MAX_NAME_LEN);
            for b in prims.iter().skip(i + 1) {
                assert_ne!(a.name, b.name);
            }
        }
    }

    #[test]
    fn arithmetic() {
        let mut forth = Machine::boot(
            Params::default().with_persist_stack(true),
            InputBuf::new(),
            OutputBuf::new(),
        )
        .unwrap();
        let cases: &[(&str, &[u16])] = &[
            ("32767 1 +", &[0x8000]),
            ("0 1 -", &[0xFFFF]),
            ("-7 2 /", &[0xFFFD]),
            ("-7 2 mod", &[0xFFFF]),
            ("7 2 /mod", &[1, 3]),
            ("-32768 -1 /", &[0x8000]),
            ("5 negate abs", &[5]),
            ("-32768 abs", &[0x8000]),
            ("-1 1 min -1 1 max", &[0xFFFF, 1]),
            ("-4 2/ 3 2*", &[0xFFFE, 6]),
            ("1 15 lshift 1 16 lshift", &[0x8000, 0]),
            ("-1 8 rshift", &[0x00FF]),
            ("12 10 and 12 10 or 12 10 xor 0 invert", &[8, 14, 6, 0xFFFF]),
            ("65535 65535 um*", &[0x0001, 0xFFFE]),
            ("-2 3 m*", &[0xFFFA, 0xFFFF]),
            ("0 1 3 um/mod", &[1, 0x5555]),
            ("30000 3 1000 */", &[90]),
            ("1 2 < -1 1 < -1 1 u< 2 1 >", &[0xFFFF, 0xFFFF, 0, 0xFFFF]),
            ("1 1 = 1 2 <> 0 0>", &[0xFFFF, 0xFFFF, 0]),
            ("1 2 3 -rot", &[3, 1, 2]),
            ("0 ?dup 5 ?dup", &[0, 5, 5]),
            ("1 2 3 4 2swap", &[3, 4, 1, 2]),
            ("1 2 3 4 2over", &[1, 2, 3, 4, 1, 2]),
            ("1 2 2dup 2drop", &[1, 2]),
            ("4 cells cell+", &[10]),
        ];
        for (line, expected) in cases {
            forth.process_line(line).unwrap();
            assert_eq!(stack(&forth), *expected, "{line}");
            forth.ds.clear();
        }

        assert_eq!(forth.process_line("1 0 /"), Err(Error::DivideByZero));
        assert_eq!(forth.process_line("1 0 mod"), Err(Error::DivideByZero));
        assert_eq!(forth.process_line("1 0 0 um/mod"), Err(Error::DivideByZero));
    }

    #[test]
    fn memory_words() {
        let mut forth = machine();
        forth
            .process_line("variable v  258 v !  v c@ .  v 1+ c@ .  5 v +! v @ .")
            .unwrap();
        assert_eq!(forth.output.as_str(), "1 2 263 ");
        forth.output.clear();

        forth
            .process_line("create buf 8 allot  buf 8 65 fill  66 buf c!  buf buf 1+ 7 cmove  buf 8 type")
            .unwrap();
        assert_eq!(forth.output.as_str(), "BBBBBBBB");
        forth.output.clear();

        forth
            .process_line("create d 4 allot  1 2 d 2!  d 2@ . .  d @ .")
            .unwrap();
        assert_eq!(forth.output.as_str(), "2 1 2 ");
        forth.output.clear();

        assert!(forth.process_line("65535 @").is_err());
        assert!(forth.process_line("65534 @").is_ok());
    }

    #[test]
    fn printing() {
        let mut forth = machine();
        forth.process_line("-5 . 65535 u. 255 hex . decimal").unwrap();
        assert_eq!(forth.output.as_str(), "-5 65535 FF ");
        forth.output.clear();

        forth.process_line("1 2 3 .s cr 3 spaces space 2 base ! 5 .").unwrap();
        assert_eq!(forth.output.as_str(), "<3> 1 2 3 \n    101 ");
        forth.output.clear();

        forth.process_line("decimal 8 octal . decimal").unwrap();
        assert_eq!(forth.output.as_str(), "10 ");
        forth.output.clear();

        forth.process_line("-123 dup abs 0 <# #s rot sign #> type").unwrap();
        assert_eq!(forth.output.as_str(), "-123");
        forth.output.clear();

        forth.process_line("hex FF 0 <# # # 2D hold #s #> type decimal").unwrap();
        assert_eq!(forth.output.as_str(), "0-FF");
    }

    #[test]
    fn loops() {
        let mut forth = machine();
        forth.process_line(": down 0 10 do i . -2 +loop ;").unwrap();
        forth.process_line("down").unwrap();
        assert_eq!(forth.output.as_str(), "10 8 6 4 2 0 ");
        forth.output.clear();

        forth.process_line(": grid 3 1 do 3 1 do j i * . loop loop ;").unwrap();
        forth.process_line("grid").unwrap();
        assert_eq!(forth.output.as_str(), "1 2 2 4 ");
        forth.output.clear();

        forth
            .process_line(": countdown begin dup . 1- dup 0= until drop ;")
            .unwrap();
        forth.process_line("3 countdown").unwrap();
        assert_eq!(forth.output.as_str(), "3 2 1 ");
        forth.output.clear();

        forth
            .process_line(": halve begin dup 1 > while 2/ dup . repeat drop ;")
            .unwrap();
        forth.process_line("20 halve").unwrap();
        assert_eq!(forth.output.as_str(), "10 5 2 1 ");
        forth.output.clear();

        forth
            .process_line(": spin 0 begin 1+ dup 4 = if . exit then again ;")
            .unwrap();
        forth.process_line("spin").unwrap();
        assert_eq!(forth.output.as_str(), "4 ");
    }

    #[test]
    fn strings_inside_control_flow() {
        let mut forth = machine();
        let cases = [
            (": t 0 if .\" ab\" then 7 . ;", "t", "7 "),
            (": t -1 if .\" ab\" then 7 . ;", "t", "ab7 "),
            (": t 0 if .\" abc\" then 7 . ;", "t", "7 "),
            (": t if .\" yes\" else .\" no\" then ;", "-1 t 0 t", "yesno"),
            (": t if .\" ja\" else .\" nein\" then 7 . ;", "0 t -1 t", "nein7 ja7 "),
            (": t if c\" hi\" else c\" bye\" then count type ;", "0 t -1 t", "byehi"),
            (": t 3 0 do .\" ab\" loop 7 . ;", "t", "ababab7 "),
            (": t 2 0 do .\" abc\" loop 7 . ;", "t", "abcabc7 "),
            (": t 6 0 do c\" xy\" count type 2 +loop ;", "t", "xyxyxy"),
            (": t 3 begin .\" ab\" 1- dup 0= until . ;", "t", "ababab0 "),
            (": t 2 begin .\" abc\" 1- dup 0= until . ;", "t", "abcabc0 "),
            (": t 2 begin dup while .\" xy\" 1- repeat . ;", "t", "xyxy0 "),
            (": t 2 begin dup while .\" xyz\" 1- repeat . ;", "t", "xyzxyz0 "),
        ];
        for (def, run, out) in cases {
            forth.process_line(def).unwrap();
            forth.process_line(run).unwrap();
            assert_eq!(forth.output.as_str(), out, "{def}");
            forth.output.clear();
        }
    }

    #[test]
    fn odd_bytes_inside_control_flow() {
        let mut forth = machine();
        let cases = [
            (": t 0 if [ 1 c, ] then 7 . ;", "7 "),
            (": t 0 if [ 3 allot ] then 7 . ;", "7 "),
            (": t 0 if [ 1 c, ] then 3 0 do i . loop ;", "0 1 2 "),
            (": t 0 if [ 1 allot ] then 2 begin dup . 1- dup 0= until drop ;", "2 1 "),
            (": t 0 if [ 1 c, ] then 2 begin dup while dup . 1- repeat drop ;", "2 1 "),
            (": t 0 if [ 1 c, ] else 7 . then 8 . ;", "7 8 "),
        ];
        for (def, out) in cases {
            forth.process_line(def).unwrap();
            forth.process_line("t").unwrap();
            assert_eq!(forth.output.as_str(), out, "{def}");
            forth.output.clear();
        }
    }

    #[test]
    fn key_and_expect() {
        let mut forth = machine();
        forth.input.push_str("ab");
        forth.process_line("key? key key emit emit key?").unwrap();
        assert_eq!(forth.output.as_str(), "ba");
        assert_eq!(stack(&forth), [0xFFFF, 0]);
        assert_eq!(forth.process_line("key"), Err(Error::NoInput));

        forth.output.clear();
        forth.input.push_str("hello\nworld");
        forth.process_line("pad 20 expect pad span @ type span @ .").unwrap();
        assert_eq!(forth.output.as_str(), "hello5 ");
        forth.output.clear();
        forth.process_line("pad 3 expect pad span @ type").unwrap();
        assert_eq!(forth.output.as_str(), "wor");
    }

    #[test]
    fn word_and_find() {
        let mut forth = machine();
        forth.process_line("bl word swap count type").unwrap();
        assert_eq!(forth.output.as_str(), "swap");
        forth.output.clear();

        forth
            .process_line("bl word dup find -1 = . ' dup = .")
            .unwrap();
        assert_eq!(forth.output.as_str(), "-1 -1 ");
        forth.output.clear();

        forth.process_line("bl word if find . drop").unwrap();
        assert_eq!(forth.output.as_str(), "1 ");
        forth.output.clear();

        forth.process_line("bl word nosuch find . count type").unwrap();
        assert_eq!(forth.output.as_str(), "0 nosuch");
    }

    #[test]
    fn compiler_words() {
        let mut forth = machine();
        forth.process_line(": lit5 [ 2 3 + ] literal . ;  lit5").unwrap();
        assert_eq!(forth.output.as_str(), "5 ");
        forth.output.clear();

        forth.process_line(": greet c\" hey\" count type ;  greet").unwrap();
        assert_eq!(forth.output.as_str(), "hey");
        forth.output.clear();

        forth.process_line(".\" now\" ( ignored ) \\ also ignored").unwrap();
        assert_eq!(forth.output.as_str(), "now");
        forth.output.clear();

        forth.process_line(": [now] 42 emit ; immediate").unwrap();
        forth.process_line(": later [now] ;").unwrap();
        assert_eq!(forth.output.as_str(), "*");
        forth.output.clear();
        forth.process_line("later").unwrap();
        assert_eq!(forth.output.as_str(), "");

        forth.process_line("create tbl 1 , 2 , 3 c, tbl @ . tbl cell+ @ . tbl 4 + c@ .").unwrap();
        assert_eq!(forth.output.as_str(), "1 2 3 ");
    }

    #[test]
    fn forget_and_words() {
        let mut forth = machine();
        forth.process_line(": greet 1 . ;").unwrap();
        forth.process_line(": greet 2 . ;").unwrap();
        forth.process_line("greet").unwrap();
        assert_eq!(forth.output.as_str(), "2 ");
        forth.output.clear();

        forth.process_line("forget greet greet").unwrap();
        assert_eq!(forth.output.as_str(), "1 ");
        forth.output.clear();

        forth.process_line("forget greet").unwrap();
        assert_eq!(forth.process_line("greet"), Err(Error::UndefinedWord));
        assert_eq!(forth.process_line("forget dup"), Err(Error::CantForgetNucleus));
        assert_eq!(forth.process_line("forget nothing"), Err(Error::UndefinedWord));

        forth.output.clear();
        forth.process_line(": newest ; words").unwrap();
        assert!(forth.output.as_str().starts_with("NEWEST FALSE TRUE BL TIB "));
        assert!(forth.output.as_str().ends_with(" LIT "));
    }
}
