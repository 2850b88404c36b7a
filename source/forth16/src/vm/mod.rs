use serde::{Deserialize, Serialize};

use crate::{
    blocks::{BlockBuffers, BlockStorage},
    dictionary::{CodeField, Dictionary, IMMEDIATE},
    input::{Input, InputBuf, TextInputBuffer},
    memory::{Memory, MemoryError, RegionSpec, MEMORY_SIZE},
    output::{Output, OutputBuf},
    pad::Pad,
    stack::Stack,
    vars::Vars,
    Error, CELL, FALSE, TRUE,
};

pub mod builtins;
mod outer;

pub use self::builtins::{Primitive, WordFunc};

/// Size of the transient `WORD` buffer: a count byte and up to 33 characters.
pub const WORD_BUF_SIZE: usize = 34;

/// Tunables for a [`Machine`].
#[derive(Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[non_exhaustive]
pub struct Params {
    /// Dispatches allowed per top-level command before execution is
    /// aborted with [`Error::RunawayExecution`]. `None` never aborts.
    #[serde(default = "Params::default_step_limit")]
    pub step_limit: Option<u64>,
    /// Keep the data stack between top-level commands, the way an
    /// interactive session expects.
    #[serde(default = "Params::default_persist_stack")]
    pub persist_stack: bool,
}

impl Params {
    pub const DEFAULT_STEP_LIMIT: Option<u64> = None;
    pub const DEFAULT_PERSIST_STACK: bool = false;

    const fn default_step_limit() -> Option<u64> {
        Self::DEFAULT_STEP_LIMIT
    }
    const fn default_persist_stack() -> bool {
        Self::DEFAULT_PERSIST_STACK
    }

    pub const fn new() -> Self {
        Self {
            step_limit: Self::DEFAULT_STEP_LIMIT,
            persist_stack: Self::DEFAULT_PERSIST_STACK,
        }
    }

    pub const fn with_step_limit(self, step_limit: Option<u64>) -> Self {
        Self { step_limit, ..self }
    }

    pub const fn with_persist_stack(self, persist_stack: bool) -> Self {
        Self {
            persist_stack,
            ..self
        }
    }
}

impl Default for Params {
    fn default() -> Self {
        Self::new()
    }
}

/// Where each region lives in memory.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Layout {
    pub memory: usize,
    pub sv: RegionSpec,
    pub dict: RegionSpec,
    pub pad: RegionSpec,
    pub ds: RegionSpec,
    pub tib: RegionSpec,
    pub rs: RegionSpec,
    pub uv: RegionSpec,
    pub bb: RegionSpec,
}

impl Layout {
    /// The classic 64K map.
    pub const CLASSIC: Self = Self {
        memory: MEMORY_SIZE,
        sv: RegionSpec::up(0, 1024),
        dict: RegionSpec::up(1024, 5120),
        pad: RegionSpec::up(6144, 80),
        ds: RegionSpec::down(8192, 1024),
        tib: RegionSpec::up(8192, 256),
        rs: RegionSpec::down(16384, 1024),
        uv: RegionSpec::up(16384, 1024),
        bb: RegionSpec::up(63488, 2048),
    };
}

impl Default for Layout {
    fn default() -> Self {
        Self::CLASSIC
    }
}

/// One entry of a host built definition, see [`Machine::define`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Item<'a> {
    /// A call to the named word.
    Word(&'a str),
    /// A literal, compiled as `LIT n`. Use the two's-complement value for
    /// cells above 32767.
    Lit(i16),
    /// A raw cell, such as a branch offset in bytes.
    Cell(i16),
    /// An inline counted string, compiled as `(SLIT)`.
    Str(&'a str),
}

/// Addresses of the system and user variables.
#[derive(Debug, Clone, Copy)]
pub(crate) struct VarAddrs {
    pub(crate) word: usize,
    pub(crate) base: usize,
    pub(crate) state: usize,
    pub(crate) to_in: usize,
    pub(crate) ntib: usize,
    pub(crate) span: usize,
    pub(crate) blk: usize,
}

/// Execution tokens of the words the compiler emits, captured at boot so
/// that user redefinitions can't change what compiled code does.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Prims {
    pub(crate) lit: u16,
    pub(crate) branch: u16,
    pub(crate) zbranch: u16,
    pub(crate) exit: u16,
    pub(crate) do_: u16,
    pub(crate) loop_: u16,
    pub(crate) plus_loop: u16,
    pub(crate) slit: u16,
    pub(crate) dot_quote: u16,
    pub(crate) doconst: CodeField,
}

/// A forward reference or loop target waiting for its matching word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Pending {
    /// Branch operand to patch (`IF`, `ELSE`, `WHILE`).
    Orig(usize),
    /// Branch target (`BEGIN`).
    Dest(usize),
    /// Start of a `DO` loop body.
    Do(usize),
}

/// A Forth machine.
///
/// Owns its memory image and every view onto it. Nothing is shared between
/// machines, so any number of them can run side by side.
pub struct Machine<I: 'static = InputBuf, O: 'static = OutputBuf> {
    pub mem: Memory,
    pub ds: Stack,
    pub rs: Stack,
    pub dict: Dictionary,
    pub input: I,
    pub output: O,
    pub(crate) tib: TextInputBuffer,
    pub(crate) pad: Pad,
    pub(crate) sv: Vars,
    pub(crate) uv: Vars,
    pub(crate) bb: BlockBuffers,
    pub(crate) blocks: Option<Box<dyn BlockStorage>>,
    pub(crate) vars: VarAddrs,
    pub(crate) prims: Prims,
    pub(crate) params: Params,
    /// Instruction pointer, 0 when nothing is executing.
    pub(crate) ip: usize,
    /// Execution token of the primitive being dispatched.
    pub(crate) w: u16,
    /// Return stack depth at which the current `execute` finishes.
    rs_floor: usize,
    steps: u64,
    pub(crate) halted: bool,
    pub(crate) control: Vec<Pending>,
    /// Header of the colon definition being compiled.
    pub(crate) building: Option<usize>,
    /// Last token the outer interpreter looked at.
    pub(crate) token: String,
}

impl<I: Input + 'static, O: Output + 'static> Machine<I, O> {
    /// Boots a machine with the classic layout and no block storage.
    pub fn boot(params: Params, input: I, output: O) -> Result<Self, Error> {
        Self::boot_with(Layout::CLASSIC, params, input, output, None)
    }

    /// Lays out memory, allocates the variables and loads the nucleus.
    ///
    /// The block words are only installed when `blocks` is given.
    pub fn boot_with(
        layout: Layout,
        params: Params,
        input: I,
        output: O,
        blocks: Option<Box<dyn BlockStorage>>,
    ) -> Result<Self, Error> {
        let mut mem = Memory::new(layout.memory);
        let sv_bounds = mem.region("SV", layout.sv)?;
        let dict_bounds = mem.region("DICT", layout.dict)?;
        let pad_bounds = mem.region("PAD", layout.pad)?;
        let ds_bounds = mem.region("DS", layout.ds)?;
        let tib_bounds = mem.region("TIB", layout.tib)?;
        let rs_bounds = mem.region("RS", layout.rs)?;
        let uv_bounds = mem.region("UV", layout.uv)?;
        let bb_bounds = mem.region("BB", layout.bb)?;
        tracing::debug!("memory map:\n{mem}");

        let mut sv = Vars::new(sv_bounds);
        // Address 0 is never a valid header or list.
        sv.create(CELL)?;
        let dp = sv.create(CELL)?;
        let latest = sv.create(CELL)?;
        let fence = sv.create(CELL)?;
        let word = sv.create(WORD_BUF_SIZE)?;

        let mut uv = Vars::new(uv_bounds);
        let vars = VarAddrs {
            word,
            base: uv.create(CELL)?,
            state: uv.create(CELL)?,
            to_in: uv.create(CELL)?,
            ntib: uv.create(CELL)?,
            span: uv.create(CELL)?,
            blk: uv.create(CELL)?,
        };
        uv.write_cell(&mut mem, vars.base, 10)?;

        let dict = Dictionary::new(&mut mem, dict_bounds, dp, latest, fence, Self::native("(VAR)")?)?;
        let tib = TextInputBuffer::new(tib_bounds, vars.to_in, vars.ntib);

        let mut forth = Self {
            mem,
            ds: Stack::new(ds_bounds),
            rs: Stack::new(rs_bounds),
            dict,
            input,
            output,
            tib,
            pad: Pad::new(pad_bounds),
            sv,
            uv,
            bb: BlockBuffers::new(bb_bounds),
            blocks,
            vars,
            prims: Prims {
                lit: 0,
                branch: 0,
                zbranch: 0,
                exit: 0,
                do_: 0,
                loop_: 0,
                plus_loop: 0,
                slit: 0,
                dot_quote: 0,
                doconst: Self::native("(CONST)")?,
            },
            params,
            ip: 0,
            w: 0,
            rs_floor: 0,
            steps: 0,
            halted: false,
            control: Vec::new(),
            building: None,
            token: String::new(),
        };
        forth.load_nucleus()?;
        tracing::debug!(
            used = forth.dict.used(&forth.mem)?,
            capacity = forth.dict.capacity(),
            "nucleus loaded"
        );
        Ok(forth)
    }

    /// Native code field of the primitive called `name`.
    fn native(name: &str) -> Result<CodeField, Error> {
        Self::PRIMITIVES
            .iter()
            .position(|p| p.name == name)
            .map(|id| CodeField::Native(id as u16))
            .ok_or(Error::UndefinedWord)
    }

    fn load_nucleus(&mut self) -> Result<(), Error> {
        let with_blocks = self.blocks.is_some();
        for (id, prim) in Self::PRIMITIVES.iter().enumerate() {
            if prim.needs_blocks && !with_blocks {
                continue;
            }
            let hdr = self.dict.create(&mut self.mem, prim.name)?;
            self.dict.set_code(&mut self.mem, hdr, CodeField::Native(id as u16))?;
            if prim.immediate {
                self.dict.set_flag(&mut self.mem, hdr, IMMEDIATE, true)?;
            }
        }

        let consts = [
            ("BASE", self.vars.base as u16),
            ("STATE", self.vars.state as u16),
            (">IN", self.vars.to_in as u16),
            ("#TIB", self.vars.ntib as u16),
            ("SPAN", self.vars.span as u16),
            ("BLK", self.vars.blk as u16),
            ("TIB", self.tib.addr() as u16),
            ("BL", u16::from(b' ')),
            ("TRUE", TRUE),
            ("FALSE", FALSE),
        ];
        for (name, value) in consts {
            self.constant(name, value)?;
        }

        self.prims = Prims {
            lit: self.nucleus_xt("LIT")?,
            branch: self.nucleus_xt("BRANCH")?,
            zbranch: self.nucleus_xt("0BRANCH")?,
            exit: self.nucleus_xt("EXIT")?,
            do_: self.nucleus_xt("(DO)")?,
            loop_: self.nucleus_xt("(LOOP)")?,
            plus_loop: self.nucleus_xt("(+LOOP)")?,
            slit: self.nucleus_xt("(SLIT)")?,
            dot_quote: self.nucleus_xt("(.\")")?,
            doconst: self.prims.doconst,
        };
        self.dict.seal(&mut self.mem)
    }

    fn nucleus_xt(&self, name: &str) -> Result<u16, Error> {
        let hdr = self
            .dict
            .find(&self.mem, name)?
            .ok_or(Error::UndefinedWord)?;
        Ok(self.dict.cfa(&self.mem, hdr)? as u16)
    }

    /// Defines `name` as a constant pushing `value`.
    pub fn constant(&mut self, name: &str, value: u16) -> Result<u16, Error> {
        let hdr = self.dict.create(&mut self.mem, name)?;
        self.dict.set_code(&mut self.mem, hdr, self.prims.doconst)?;
        self.dict.comma(&mut self.mem, value)?;
        Ok(self.dict.cfa(&self.mem, hdr)? as u16)
    }

    /// A new machine starting from a copy of this one's memory image.
    ///
    /// The copy gets its own collaborators and no block storage. Nothing
    /// either machine does afterwards is visible to the other.
    pub fn fork<I2: Input + 'static, O2: Output + 'static>(
        &self,
        input: I2,
        output: O2,
    ) -> Machine<I2, O2> {
        tracing::debug!(
            dict_used = self.dict.used(&self.mem).unwrap_or(0),
            "forking machine"
        );
        Machine {
            mem: self.mem.clone(),
            ds: self.ds.clone(),
            rs: self.rs.clone(),
            dict: self.dict.clone(),
            input,
            output,
            tib: self.tib.clone(),
            pad: self.pad.clone(),
            sv: self.sv.clone(),
            uv: self.uv.clone(),
            bb: self.bb.clone(),
            blocks: None,
            vars: self.vars,
            prims: self.prims,
            params: self.params,
            ip: 0,
            w: 0,
            rs_floor: 0,
            steps: 0,
            halted: false,
            control: self.control.clone(),
            building: self.building,
            token: String::new(),
        }
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Has `BYE` been executed?
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn base(&self) -> Result<u16, Error> {
        Ok(self.uv.read_cell(&self.mem, self.vars.base)?)
    }

    pub(crate) fn compiling(&self) -> Result<bool, Error> {
        Ok(self.uv.read_cell(&self.mem, self.vars.state)? != 0)
    }

    pub(crate) fn set_state(&mut self, compiling: bool) -> Result<(), Error> {
        let state = if compiling { TRUE } else { FALSE };
        self.uv.write_cell(&mut self.mem, self.vars.state, state)?;
        Ok(())
    }

    /// Resets per-command state before a top-level command.
    pub(crate) fn begin_command(&mut self) {
        if !self.params.persist_stack {
            self.ds.clear();
        }
        self.rs.clear();
        self.ip = 0;
        self.rs_floor = 0;
        self.steps = 0;
    }

    /// Looks up `name` and executes it as a top-level command.
    pub fn execute_word(&mut self, name: &str) -> Result<(), Error> {
        self.begin_command();
        let res = self.lookup_xt(name).and_then(|xt| self.execute(xt));
        if let Err(e) = &res {
            tracing::warn!(name, error = %e, "execution aborted");
            self.recover();
        }
        res
    }

    pub(crate) fn lookup_xt(&self, name: &str) -> Result<u16, Error> {
        let hdr = self
            .dict
            .find(&self.mem, name)?
            .ok_or(Error::UndefinedWord)?;
        Ok(self.dict.cfa(&self.mem, hdr)? as u16)
    }

    /// Runs the word `xt` to completion.
    ///
    /// Nested calls are safe: the caller's instruction pointer and return
    /// stack floor are restored afterwards.
    pub fn execute(&mut self, xt: u16) -> Result<(), Error> {
        let ip = self.ip;
        let floor = self.rs_floor;
        self.ip = 0;
        self.rs_floor = self.rs.depth();

        let mut res = self.dispatch(xt);
        while res.is_ok() && self.ip != 0 && !self.halted {
            res = self.step();
        }

        self.ip = ip;
        self.rs_floor = floor;
        res
    }

    /// Runs the next cell of the current threaded list.
    pub fn step(&mut self) -> Result<(), Error> {
        let xt = self.mem.read_cell(self.ip)?;
        self.ip += CELL;
        self.dispatch(xt)
    }

    fn tick(&mut self) -> Result<(), Error> {
        self.steps += 1;
        match self.params.step_limit {
            Some(limit) if self.steps > limit => Err(Error::RunawayExecution),
            _ => Ok(()),
        }
    }

    /// Runs a primitive or enters a compiled definition.
    fn dispatch(&mut self, xt: u16) -> Result<(), Error> {
        self.tick()?;
        match self.dict.code_field(&self.mem, usize::from(xt))? {
            CodeField::Native(id) => {
                let prim = Self::PRIMITIVES
                    .get(usize::from(id))
                    .ok_or(Error::BadCodeField(CodeField::Native(id).encode()))?;
                tracing::trace!(xt, ip = self.ip, name = prim.name, "native");
                self.w = xt;
                (prim.func)(self)
            }
            CodeField::Compiled(list) => {
                tracing::trace!(xt, ip = self.ip, list, "call");
                if self.ip != 0 {
                    self.rs.push_cell(&mut self.mem, self.ip as u16)?;
                }
                self.ip = usize::from(list);
                Ok(())
            }
        }
    }

    /// Returns from the current definition, or ends the execution once the
    /// return stack is back where it started.
    pub(crate) fn exit(&mut self) -> Result<(), Error> {
        if self.rs.depth() <= self.rs_floor {
            self.ip = 0;
        } else {
            self.ip = usize::from(self.rs.pop_cell(&self.mem)?);
        }
        Ok(())
    }

    /// Takes the inline operand following the current word.
    pub(crate) fn operand(&mut self) -> Result<u16, Error> {
        if self.ip == 0 {
            return Err(Error::InterpretingCompileOnlyWord);
        }
        let val = self.mem.read_cell(self.ip)?;
        self.ip += CELL;
        Ok(val)
    }

    /// Branches by the inline offset, counted in bytes from just past the
    /// operand.
    pub(crate) fn branch(&mut self) -> Result<(), Error> {
        let offset = self.operand()? as i16;
        self.ip = self
            .ip
            .checked_add_signed(isize::from(offset))
            .ok_or(MemoryError::AddressOutOfRange)?;
        Ok(())
    }

    /// Defines `name` from a list of items and returns its execution token.
    ///
    /// An `EXIT` is appended. A failed definition leaves the dictionary as it
    /// was.
    pub fn define(&mut self, name: &str, items: &[Item<'_>]) -> Result<u16, Error> {
        let hdr = self.dict.create(&mut self.mem, name)?;
        match self.compile_items(hdr, items) {
            Ok(xt) => Ok(xt),
            Err(e) => {
                self.dict.drop_back_to(&mut self.mem, hdr)?;
                Err(e)
            }
        }
    }

    fn compile_items(&mut self, hdr: usize, items: &[Item<'_>]) -> Result<u16, Error> {
        let pfa = self.dict.pfa(&self.mem, hdr)?;
        self.dict.set_code(&mut self.mem, hdr, CodeField::Compiled(pfa as u16))?;
        for item in items {
            match *item {
                Item::Word(name) => {
                    let xt = self.lookup_xt(name)?;
                    self.dict.comma(&mut self.mem, xt)?;
                }
                Item::Lit(n) => self.compile_lit(n as u16)?,
                Item::Cell(c) => self.dict.comma(&mut self.mem, c as u16)?,
                Item::Str(s) => self.compile_string(self.prims.slit, s.as_bytes())?,
            }
        }
        self.dict.comma(&mut self.mem, self.prims.exit)?;
        Ok(self.dict.cfa(&self.mem, hdr)? as u16)
    }

    pub(crate) fn compile_lit(&mut self, n: u16) -> Result<(), Error> {
        self.dict.comma(&mut self.mem, self.prims.lit)?;
        self.dict.comma(&mut self.mem, n)
    }

    /// Compiles `xt` followed by an inline counted string.
    pub(crate) fn compile_string(&mut self, xt: u16, s: &[u8]) -> Result<(), Error> {
        let len = u8::try_from(s.len()).map_err(|_| Error::InputTooLong)?;
        self.dict.comma(&mut self.mem, xt)?;
        self.dict.c_comma(&mut self.mem, len)?;
        for b in s {
            self.dict.c_comma(&mut self.mem, *b)?;
        }
        Ok(())
    }

    /// Puts the machine back into a clean interpreting state after an error.
    /// The dictionary keeps everything but a half built definition.
    pub(crate) fn recover(&mut self) {
        self.ds.clear();
        self.rs.clear();
        self.control.clear();
        self.ip = 0;
        self.rs_floor = 0;
        if let Err(error) = self.set_state(false) {
            tracing::error!(%error, "failed to reset STATE");
        }
        if let Some(hdr) = self.building.take() {
            if let Err(error) = self.dict.drop_back_to(&mut self.mem, hdr) {
                tracing::error!(%error, "failed to roll back definition");
            }
        }
    }
}
