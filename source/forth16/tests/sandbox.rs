//! Machines share nothing: separate boots and forks evolve independently.

use forth16::{
    blocks::MemBlocks,
    input::InputBuf,
    output::OutputBuf,
    vm::{Layout, Params},
    Error, Machine,
};

fn machine() -> Machine {
    Machine::boot(Params::default(), InputBuf::new(), OutputBuf::new()).unwrap()
}

#[test]
fn separate_machines() {
    let mut a = machine();
    let mut b = machine();

    a.process_line(": greet 1 . ;  variable v  7 v !").unwrap();
    assert_eq!(b.process_line("greet"), Err(Error::UndefinedWord));
    assert_eq!(b.process_line("v"), Err(Error::UndefinedWord));

    b.process_line("hex").unwrap();
    a.process_line("greet 255 . v @ .").unwrap();
    assert_eq!(a.output.as_str(), "1 255 7 ");
    b.process_line("255 .").unwrap();
    assert_eq!(b.output.as_str(), "FF ");
}

#[test]
fn forks_diverge() {
    let mut parent = machine();
    parent
        .process_line(": greet 1 . ;  variable counter  10 counter !")
        .unwrap();

    let mut child = parent.fork(InputBuf::new(), OutputBuf::new());
    child.process_line("greet counter @ .").unwrap();
    assert_eq!(child.output.as_str(), "1 10 ");
    child.output.clear();

    // Changes on either side stay on that side.
    child.process_line("5 counter +!  : greet 2 . ;  : extra ;").unwrap();
    parent.process_line("1 counter +!").unwrap();

    parent.process_line("greet counter @ .").unwrap();
    assert_eq!(parent.output.as_str(), "1 11 ");
    assert_eq!(parent.process_line("extra"), Err(Error::UndefinedWord));

    child.process_line("greet counter @ .").unwrap();
    assert_eq!(child.output.as_str(), "2 15 ");
}

#[test]
fn forks_keep_params_but_not_storage() {
    let mut parent = Machine::boot_with(
        Layout::CLASSIC,
        Params::default().with_step_limit(Some(200)),
        InputBuf::new(),
        OutputBuf::new(),
        Some(Box::new(MemBlocks::new(2))),
    )
    .unwrap();
    parent.process_line("0 block drop").unwrap();

    let mut child = parent.fork(InputBuf::new(), OutputBuf::new());
    assert_eq!(child.params(), parent.params());
    assert_eq!(child.process_line("0 block"), Err(Error::NoBlockStorage));

    child.process_line(": spin begin again ;").unwrap();
    assert_eq!(child.process_line("spin"), Err(Error::RunawayExecution));
    assert_eq!(parent.process_line("spin"), Err(Error::UndefinedWord));
}

#[test]
fn bye_halts_only_one_machine() {
    let mut a = machine();
    let mut b = a.fork(InputBuf::new(), OutputBuf::new());
    a.process_line("bye").unwrap();
    assert!(a.is_halted());
    assert!(!b.is_halted());
    b.process_line("1 .").unwrap();
    assert_eq!(b.output.as_str(), "1 ");
}
