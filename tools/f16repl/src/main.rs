use std::{
    collections::VecDeque,
    fs::{File, OpenOptions},
    io::{self, BufRead, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use clap::{Args, Parser};
use forth16::{
    blocks::{Block, BlockError, BlockStorage, BLOCK_SIZE},
    input::Input,
    output::{Output, OutputError},
    vm::{Layout, Params},
    Machine,
};
use miette::{Context, IntoDiagnostic};
use serde::{Deserialize, Serialize};

fn main() -> miette::Result<()> {
    use tracing_subscriber::prelude::*;

    let App {
        config,
        limit,
        keep_stack,
        disk,
        files,
        output,
    } = App::parse();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_writer(io::stderr),
        )
        .with(output.trace_filter)
        .init();

    let mut config = match config {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };
    if limit.is_some() {
        config.machine = config.machine.with_step_limit(limit);
    }
    if keep_stack {
        config.machine = config.machine.with_persist_stack(true);
    }
    if disk.is_some() {
        config.disk = disk;
    }
    tracing::debug!(?config, "starting");

    let blocks = match &config.disk {
        Some(path) => Some(Box::new(DiskBlocks::open(path, config.disk_blocks)?) as Box<dyn BlockStorage>),
        None => None,
    };
    let mut forth = Machine::boot_with(
        Layout::CLASSIC,
        config.machine,
        Keyboard::default(),
        Terminal,
        blocks,
    )
    .into_diagnostic()
    .context("failed to boot forth16")?;

    for file in files {
        let source = std::fs::read_to_string(&file)
            .into_diagnostic()
            .with_context(|| format!("failed to read {}", file.display()))?;
        tracing::info!(file = %file.display(), "loading");
        forth.run(source.lines()).into_diagnostic()?;
        if forth.is_halted() {
            break;
        }
    }

    let mut line = String::new();
    while !forth.is_halted() {
        print!("{}", config.prompt);
        io::stdout().flush().into_diagnostic()?;
        line.clear();
        let read = io::stdin()
            .lock()
            .read_line(&mut line)
            .into_diagnostic()
            .context("failed to read stdin")?;
        if read == 0 {
            break;
        }
        forth
            .run([line.trim_end_matches(['\r', '\n'])])
            .into_diagnostic()?;
    }

    // Anything UPDATEd but not yet saved goes out on the way down.
    if config.disk.is_some() {
        forth
            .execute_word("SAVE-BUFFERS")
            .into_diagnostic()
            .context("failed to save block buffers")?;
    }
    Ok(())
}

/// A REPL for the forth16 virtual machine.
#[derive(Debug, Parser)]
#[clap(about, version)]
struct App {
    /// Path to a TOML configuration file.
    #[clap(long, short)]
    config: Option<PathBuf>,

    /// Abort any line that dispatches more than this many words.
    #[clap(long)]
    limit: Option<u64>,

    /// Keep the data stack from one line to the next.
    #[clap(long)]
    keep_stack: bool,

    /// File used as block storage.
    #[clap(long)]
    disk: Option<PathBuf>,

    /// Forth source files to interpret before the prompt.
    files: Vec<PathBuf>,

    #[clap(flatten)]
    output: OutputOptions,
}

#[derive(Clone, Debug, Args)]
#[command(next_help_heading = "Output Options")]
struct OutputOptions {
    /// Tracing filter for the VM.
    #[clap(
        long = "trace",
        alias = "log",
        env = "RUST_LOG",
        default_value = "warn",
        global = true
    )]
    trace_filter: tracing_subscriber::filter::Targets,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
struct Config {
    machine: Params,
    prompt: String,
    disk: Option<PathBuf>,
    /// Number of blocks on the disk.
    disk_blocks: u16,
}

impl Config {
    fn load(path: &Path) -> miette::Result<Self> {
        let text = std::fs::read_to_string(path)
            .into_diagnostic()
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&text)
            .into_diagnostic()
            .with_context(|| format!("failed to parse {}", path.display()))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            machine: Params::default().with_persist_stack(true),
            prompt: String::from("> "),
            disk: None,
            disk_blocks: 64,
        }
    }
}

/// Keys typed at the terminal. Reads a whole line whenever it runs dry.
#[derive(Default)]
struct Keyboard {
    pending: VecDeque<u8>,
}

impl Input for Keyboard {
    fn check(&mut self) -> bool {
        !self.pending.is_empty()
    }

    fn read(&mut self) -> Option<u8> {
        if self.pending.is_empty() {
            let mut line = String::new();
            match io::stdin().lock().read_line(&mut line) {
                Ok(0) => return None,
                Ok(_) => self.pending.extend(line.bytes()),
                Err(error) => {
                    tracing::warn!(%error, "failed to read stdin");
                    return None;
                }
            }
        }
        self.pending.pop_front()
    }
}

struct Terminal;

impl Output for Terminal {
    fn write(&mut self, ch: u8) -> Result<(), OutputError> {
        self.write_bytes(&[ch])
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), OutputError> {
        io::stdout().write_all(bytes).map_err(|error| {
            tracing::warn!(%error, "failed to write stdout");
            OutputError::OutputFull
        })
    }
}

/// Blocks kept in a plain file, block `n` at byte offset `n * 1024`. Parts
/// past the end of the file read as spaces.
struct DiskBlocks {
    file: File,
    count: u16,
}

impl DiskBlocks {
    fn open(path: &Path, count: u16) -> miette::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .into_diagnostic()
            .with_context(|| format!("failed to open disk {}", path.display()))?;
        tracing::info!(disk = %path.display(), count, "attached block storage");
        Ok(Self { file, count })
    }

    fn seek(&mut self, n: u16) -> Result<(), BlockError> {
        if n >= self.count {
            return Err(BlockError::NoSuchBlock(n));
        }
        let offset = u64::from(n) * BLOCK_SIZE as u64;
        self.file
            .seek(SeekFrom::Start(offset))
            .map(drop)
            .map_err(|error| {
                tracing::warn!(%error, block = n, "seek failed");
                BlockError::Io
            })
    }
}

impl BlockStorage for DiskBlocks {
    fn read_block(&mut self, n: u16, buf: &mut Block) -> Result<(), BlockError> {
        self.seek(n)?;
        buf.fill(b' ');
        let mut filled = 0;
        while filled < BLOCK_SIZE {
            match self.file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(len) => filled += len,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => {
                    tracing::warn!(%error, block = n, "read failed");
                    return Err(BlockError::Io);
                }
            }
        }
        Ok(())
    }

    fn write_block(&mut self, n: u16, buf: &Block) -> Result<(), BlockError> {
        self.seek(n)?;
        self.file.write_all(buf).map_err(|error| {
            tracing::warn!(%error, block = n, "write failed");
            BlockError::Io
        })
    }
}
