//! # Test Utilities
//!
//! Helpers for running "ui tests", or executing forth code at test time.
//!
//! ## UI Tests
//!
//! Forth code provided as a str will have one of the following things on each
//! line:
//!
//! * Configuration values for the VM, specified as "frontmatter comments".
//!   These must appear before any other non-comment lines. Currently accepted:
//!     * `( step_limit U64 )`
//!     * `( persist_stack BOOL )`
//!     * `( blocks U16 )`, attaching that many volatile blocks
//! * Comment lines. These are any lines just containing a `( ... )` style forth comment.
//! * Successful input lines, starting with `> ...`.
//! * Successful output lines, starting with `< ...`.
//!     * Any successful input line can have zero or more output lines
//!     * If *no* output lines are specified, ANY successful output is accepted/ignored.
//! * Unsuccessful input lines, starting with `x ...`.
//!     * This line is expected to abort, with `process_line` returning an `Err()`.
//!     * Unsuccessful input lines may not have any successful output
//! * Keyboard lines, starting with `i ...`. The text and a newline are queued
//!   for `KEY` and `EXPECT`.
//!
//! ### Example
//!
//! ```text
//! ( specify VM settings with frontmatter )
//! ( step_limit 1000 )
//!
//! ( specify input with no output )
//! > : star 42 emit ;
//!
//! ( specify input and output )
//! > star star
//! < **
//!
//! ( specify lines that cause exceptions/errors )
//! x starb
//! ```

use crate::{
    blocks::{BlockStorage, MemBlocks},
    input::InputBuf,
    output::OutputBuf,
    vm::{Layout, Params},
    Error, Machine,
};

/// Run the given forth ui test against a freshly booted machine
///
/// Does accept any/all/none of the configuration frontmatter (see above for
/// listing of frontmatter kinds)
pub fn blocking_runtest(contents: &str) {
    let tokd = tokenize(contents, true).unwrap();
    let blocks = tokd
        .blocks
        .map(|n| Box::new(MemBlocks::new(n)) as Box<dyn BlockStorage>);
    let mut forth = Machine::boot_with(
        Layout::CLASSIC,
        tokd.settings,
        InputBuf::new(),
        OutputBuf::new(),
        blocks,
    )
    .unwrap();
    blocking_steps_with(tokd.steps.as_slice(), &mut forth);
}

/// Run the given forth ui-test against the given machine.
///
/// Does not accept ui-tests with frontmatter configuration (will panic)
pub fn blocking_runtest_with(forth: &mut Machine, contents: &str) {
    let tokd = tokenize(contents, false).unwrap();
    blocking_steps_with(tokd.steps.as_slice(), forth);
}

fn check_output(res: Result<(), Error>, outcome: &Outcome, output: &str) {
    println!("< {output}");
    match (res, outcome) {
        (Ok(()), Outcome::OkAnyOutput) => {}
        (Ok(()), Outcome::OkWithOutput(exp)) => {
            let act_lines = output.lines().collect::<Vec<&str>>();
            assert_eq!(act_lines.len(), exp.len());
            act_lines.iter().zip(exp.iter()).for_each(|(a, e)| {
                assert_eq!(a.trim_end(), e.trim_end());
            })
        }
        (Err(_e), Outcome::FatalError) => {}
        (res, exp) => {
            eprintln!("Error!");
            eprintln!("Expected: {exp:?}");
            eprintln!("Got: {res:?}");
            if res.is_ok() {
                eprintln!("Output:\n{}", output);
            }
            panic!();
        }
    }
}

// Runs the given steps against the given machine.
//
// Panics on any mismatch
fn blocking_steps_with(steps: &[Step], forth: &mut Machine) {
    for step in steps {
        match step {
            Step::Keys(keys) => {
                println!("i {keys}");
                forth.input.push_str(keys);
                forth.input.push_str("\n");
            }
            Step::Line { input, output } => {
                println!("> {input}");
                let res = forth.process_line(input);
                check_output(res, output, forth.output.as_str());
                forth.output.clear();
            }
        }
    }
}

#[derive(Debug)]
enum Outcome {
    OkAnyOutput,
    OkWithOutput(Vec<String>),
    FatalError,
}

#[derive(Debug)]
enum Step {
    Line { input: String, output: Outcome },
    Keys(String),
}

#[derive(Default, Debug)]
struct Tokenized {
    settings: Params,
    blocks: Option<u16>,
    steps: Vec<Step>,
}

fn tokenize(contents: &str, allow_frontmatter: bool) -> Result<Tokenized, ()> {
    let mut output = Tokenized::default();
    let mut frontmatter_done = !allow_frontmatter;

    for line in contents.lines() {
        let (tok, remain) = if let Some(t) = line.trim_start().split_once(' ') {
            t
        } else {
            continue;
        };

        match tok {
            ">" => {
                frontmatter_done = true;
                output.steps.push(Step::Line {
                    input: remain.to_string(),
                    output: Outcome::OkAnyOutput,
                });
            }
            "<" => {
                frontmatter_done = true;
                let Some(Step::Line { output: cur, .. }) = output.steps.last_mut() else {
                    panic!("Output without an input line");
                };
                match cur {
                    Outcome::OkAnyOutput => {
                        *cur = Outcome::OkWithOutput(vec![remain.to_string()]);
                    }
                    Outcome::OkWithOutput(o) => {
                        o.push(remain.to_string());
                    }
                    Outcome::FatalError => panic!("Fatal error can't set output"),
                }
            }
            "x" => {
                frontmatter_done = true;
                output.steps.push(Step::Line {
                    input: remain.to_string(),
                    output: Outcome::FatalError,
                });
            }
            "i" => {
                frontmatter_done = true;
                output.steps.push(Step::Keys(remain.to_string()));
            }
            "(" => {
                let mut split = remain.split_whitespace();
                let mut is_comment = false;
                match split.next() {
                    Some("step_limit") => {
                        output.settings.step_limit =
                            Some(split.next().unwrap().parse::<u64>().unwrap());
                    }
                    Some("persist_stack") => {
                        output.settings.persist_stack =
                            split.next().unwrap().parse::<bool>().unwrap();
                    }
                    Some("blocks") => {
                        output.blocks = Some(split.next().unwrap().parse::<u16>().unwrap());
                    }
                    Some(_) => {
                        is_comment = true;
                    }
                    _ => panic!(),
                }
                if !is_comment {
                    assert!(!frontmatter_done, "Unexpected frontmatter settings!");
                    assert_eq!(Some(")"), split.next());
                }
            }
            _ => {}
        }
    }

    Ok(output)
}
