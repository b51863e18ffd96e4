//! Shared assembly harness for the integration tests.
//!
//! The compiler front end is a host collaborator, so tests stand in for it:
//! each test assembles descriptors with `CodeBuilder` and runs them through
//! `Runner`. The helpers here cover the recurring shapes - build a root
//! script, build a named function, call it.
#![allow(dead_code, reason = "each test binary uses a subset of the helpers")]

use kestrel::{CodeBuilder, Exception, FunctionId, HostValue, Program, Runner};

/// Assembles a root script and validates the program.
pub fn compile(build: impl FnOnce(&mut Program, &mut CodeBuilder)) -> (Program, FunctionId) {
    let mut program = Program::new();
    let url = program.intern("test.js");
    let mut b = CodeBuilder::new();
    build(&mut program, &mut b);
    let root = program.add_function(b.build(url));
    program.validate().expect("assembled bytecode is in bounds");
    (program, root)
}

/// Assembles and runs a root script.
pub fn run(build: impl FnOnce(&mut Program, &mut CodeBuilder)) -> Result<HostValue, Exception> {
    let (program, root) = compile(build);
    Runner::new(program, root).run()
}

/// Assembles and runs, unwrapping the result.
#[track_caller]
pub fn run_ok(build: impl FnOnce(&mut Program, &mut CodeBuilder)) -> HostValue {
    match run(build) {
        Ok(value) => value,
        Err(err) => panic!("script failed: {err}"),
    }
}

/// Builds a named function descriptor with parameters.
pub fn function(
    program: &mut Program,
    name: &str,
    params: &[&str],
    build: impl FnOnce(&mut Program, &mut CodeBuilder),
) -> FunctionId {
    let url = program.intern("test.js");
    let name = program.intern(name);
    let mut b = CodeBuilder::new();
    b.set_name(name);
    for &param in params {
        let param = program.intern(param);
        b.add_param(param);
    }
    build(program, &mut b);
    program.add_function(b.build(url))
}

/// Emits `MakeFunction` + a sloppy global assignment for the descriptor.
pub fn define_global_fn(program: &mut Program, b: &mut CodeBuilder, name: &str, id: FunctionId) {
    let name = program.intern(name);
    b.ind_reg(id.operand());
    b.emit(kestrel::Opcode::MakeFunction);
    b.set_var(name);
    b.emit(kestrel::Opcode::Pop);
}
