//! Module records: loading, linking, evaluation, and live bindings.

mod common;

use kestrel::{
    CodeBuilder, ErrorKind, ExportTables, HostValue, ImportEntry, InMemoryLoader, ModuleSource, Opcode, Program,
    Runner,
};

/// Builds a module whose body initializes its local exports with
/// `SetLetInit` (the environment is created at link time with every local
/// export in its dead zone).
fn module_a(program: &mut Program) -> ModuleSource {
    let url = program.intern("a.js");
    let x = program.intern("x");
    let mut b = CodeBuilder::new();
    // export const x = 40
    b.load_int(40);
    b.str_reg(x);
    b.emit(Opcode::SetLetInit);
    b.emit(Opcode::Pop);
    b.emit(Opcode::ReturnUndef);
    let root = program.add_function(b.build(url));
    ModuleSource {
        root,
        requests: Vec::new(),
        imports: Vec::new(),
        exports: ExportTables {
            local: vec![(x, x)],
            indirect: Vec::new(),
            star: Vec::new(),
        },
    }
}

/// `import {x} from "a"; export const y = x + 2;`
fn module_main(program: &mut Program) -> ModuleSource {
    let url = program.intern("main.js");
    let x = program.intern("x");
    let y = program.intern("y");
    let a = program.intern("a");
    let mut b = CodeBuilder::new();
    b.get_var(x);
    b.load_int(2);
    b.emit(Opcode::Add);
    b.str_reg(y);
    b.emit(Opcode::SetLetInit);
    b.emit(Opcode::Pop);
    b.emit(Opcode::ReturnUndef);
    let root = program.add_function(b.build(url));
    ModuleSource {
        root,
        requests: vec![a],
        imports: vec![ImportEntry {
            request: a,
            import_name: Some(x),
            local_name: x,
        }],
        exports: ExportTables {
            local: vec![(y, y)],
            indirect: Vec::new(),
            star: Vec::new(),
        },
    }
}

fn runner_with_modules() -> Runner {
    let mut program = Program::new();
    let url = program.intern("root.js");
    let mut b = CodeBuilder::new();
    b.emit(Opcode::ReturnUndef);
    let a = module_a(&mut program);
    let main = module_main(&mut program);
    let root = program.add_function(b.build(url));
    let mut loader = InMemoryLoader::new();
    loader.insert("a", a);
    loader.insert("main", main);
    let mut runner = Runner::new(program, root);
    runner.set_module_loader(Box::new(loader));
    runner
}

#[test]
fn imports_resolve_through_live_bindings() {
    let mut runner = runner_with_modules();
    runner.evaluate_module("main").unwrap();
    assert_eq!(runner.module_export("main", "y").unwrap(), HostValue::Int(42));
    assert_eq!(runner.module_export("a", "x").unwrap(), HostValue::Int(40));
}

#[test]
fn evaluation_is_idempotent() {
    let mut runner = runner_with_modules();
    runner.evaluate_module("main").unwrap();
    runner.evaluate_module("main").unwrap();
    assert_eq!(runner.module_export("main", "y").unwrap(), HostValue::Int(42));
}

#[test]
fn unknown_exports_are_syntax_errors() {
    let mut runner = runner_with_modules();
    runner.evaluate_module("main").unwrap();
    let err = runner.module_export("main", "nope").unwrap_err();
    assert_eq!(err.kind, ErrorKind::SyntaxError);
}

#[test]
fn unknown_specifiers_fail_resolution() {
    let mut runner = runner_with_modules();
    let err = runner.evaluate_module("missing").unwrap_err();
    assert_eq!(err.kind, ErrorKind::SyntaxError);
    assert!(err.message.contains("missing"));
}

#[test]
fn importing_a_missing_name_fails_at_link_time() {
    let mut program = Program::new();
    let url = program.intern("root.js");
    let mut b = CodeBuilder::new();
    b.emit(Opcode::ReturnUndef);
    let a = module_a(&mut program);

    // import {ghost} from "a"
    let ghost = program.intern("ghost");
    let a_name = program.intern("a");
    let bad_url = program.intern("bad.js");
    let mut bad = CodeBuilder::new();
    bad.emit(Opcode::ReturnUndef);
    let bad_root = program.add_function(bad.build(bad_url));
    let bad_source = ModuleSource {
        root: bad_root,
        requests: vec![a_name],
        imports: vec![ImportEntry {
            request: a_name,
            import_name: Some(ghost),
            local_name: ghost,
        }],
        exports: ExportTables::default(),
    };

    let root = program.add_function(b.build(url));
    let mut loader = InMemoryLoader::new();
    loader.insert("a", a);
    loader.insert("bad", bad_source);
    let mut runner = Runner::new(program, root);
    runner.set_module_loader(Box::new(loader));

    let err = runner.evaluate_module("bad").unwrap_err();
    assert_eq!(err.kind, ErrorKind::SyntaxError);
    assert!(err.message.contains("ghost"));
}

#[test]
fn evaluation_errors_are_cached_and_terminal() {
    let mut program = Program::new();
    let url = program.intern("root.js");
    let mut b = CodeBuilder::new();
    b.emit(Opcode::ReturnUndef);

    let boom_url = program.intern("boom.js");
    let mut boom = CodeBuilder::new();
    let nope = program.intern("nope");
    boom.get_var(nope);
    boom.emit(Opcode::Return);
    let boom_root = program.add_function(boom.build(boom_url));
    let boom_source = ModuleSource {
        root: boom_root,
        requests: Vec::new(),
        imports: Vec::new(),
        exports: ExportTables::default(),
    };

    let root = program.add_function(b.build(url));
    let mut loader = InMemoryLoader::new();
    loader.insert("boom", boom_source);
    let mut runner = Runner::new(program, root);
    runner.set_module_loader(Box::new(loader));

    let first = runner.evaluate_module("boom").unwrap_err();
    assert_eq!(first.kind, ErrorKind::ReferenceError);
    // The second attempt re-throws the cached evaluation error.
    let second = runner.evaluate_module("boom").unwrap_err();
    assert_eq!(second.kind, ErrorKind::SyntaxError);
    assert!(second.message.contains("nope"));
}
