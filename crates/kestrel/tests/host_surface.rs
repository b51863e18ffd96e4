//! The embedding surface: globals, call-ins, stats, snapshots, tracing.

mod common;

use common::{compile, define_global_fn, function};
use kestrel::{CodeBuilder, CountingTracer, HostValue, Opcode, Program, Runner};

#[test]
fn host_values_round_trip_through_globals() {
    let (program, root) = compile(|program, b| {
        let input = program.intern("input");
        b.get_var(input);
        b.emit(Opcode::Return);
    });
    let mut runner = Runner::new(program, root);
    runner
        .set_global(
            "input",
            HostValue::Array(vec![HostValue::Int(1), HostValue::String("two".to_owned())]),
        )
        .unwrap();
    assert_eq!(
        runner.run().unwrap(),
        HostValue::Array(vec![HostValue::Int(1), HostValue::String("two".to_owned())])
    );
}

#[test]
fn call_global_invokes_script_functions_with_host_arguments() {
    let (program, root) = compile(|program, b| {
        let add = function(program, "add", &["a", "b"], |program, b| {
            let a = program.intern("a");
            let bee = program.intern("b");
            b.get_var(a);
            b.get_var(bee);
            b.emit(Opcode::Add);
            b.emit(Opcode::Return);
        });
        define_global_fn(program, b, "add", add);
        b.emit(Opcode::ReturnUndef);
    });
    let mut runner = Runner::new(program, root);
    runner.run().unwrap();
    let result = runner
        .call_global("add", &[HostValue::Int(40), HostValue::Int(2)])
        .unwrap();
    assert_eq!(result, HostValue::Int(2 + 40));
}

#[test]
fn repeated_runs_reuse_the_realm() {
    let (program, root) = compile(|program, b| {
        let n = program.intern("n");
        // n = (n | 0) + 1
        b.get_var(n);
        b.load_int(0);
        b.emit(Opcode::BitOr);
        b.load_int(1);
        b.emit(Opcode::Add);
        b.set_var(n);
        b.emit(Opcode::Return);
    });
    let mut runner = Runner::new(program, root);
    runner.set_global("n", HostValue::Int(0)).unwrap();
    for expected in 1..=50 {
        assert_eq!(runner.run_function(root).unwrap(), HostValue::Int(expected));
    }
}

#[test]
fn garbage_collection_reclaims_unreachable_graphs() {
    let (program, root) = compile(|program, b| {
        let keep = program.intern("keep");
        // Allocate a pile of temporary objects, keep only the last.
        for _ in 0..100 {
            b.emit(Opcode::NewObjectLit);
            b.emit(Opcode::Pop);
        }
        b.emit(Opcode::NewObjectLit);
        b.set_var(keep);
        b.emit(Opcode::Return);
    });
    let mut runner = Runner::new(program, root);
    runner.run().unwrap();
    let before = runner.heap_stats();
    runner.collect_garbage();
    let after = runner.heap_stats();
    assert!(after.live_objects <= before.live_objects);
    assert!(after.free_slots >= 100, "temporaries were reclaimed: {after:?}");
}

#[test]
fn counting_tracer_observes_execution() {
    let (program, root) = compile(|program, b| {
        let f = program.intern("f");
        let inner = function(program, "f", &[], |_, b| {
            b.load_int(1);
            b.emit(Opcode::Return);
        });
        define_global_fn(program, b, "f", inner);
        b.name_op(Opcode::GetVarThis, f);
        b.call(0);
        b.emit(Opcode::Return);
    });
    let mut runner = Runner::new(program, root);
    let mut tracer = CountingTracer::default();
    runner.run_function_traced(root, &mut tracer).unwrap();
    assert!(tracer.ops_executed > 5);
    assert!(tracer.calls >= 2, "root frame and one call: {}", tracer.calls);
    assert!(tracer.max_frame_depth >= 2);
}

#[test]
fn programs_round_trip_through_postcard_and_still_run() {
    let mut program = Program::new();
    let url = program.intern("demo.js");
    let mut b = CodeBuilder::new();
    b.load_int(20);
    b.load_int(22);
    b.emit(Opcode::Add);
    b.emit(Opcode::Return);
    let root = program.add_function(b.build(url));

    let bytes = program.to_postcard();
    let restored = Program::from_postcard(&bytes).unwrap();
    assert_eq!(restored.to_postcard(), bytes, "serialization round-trips exactly");

    let mut runner = Runner::new(restored, root);
    assert_eq!(runner.run().unwrap(), HostValue::Int(42));
}

#[test]
fn disassembly_lists_every_instruction() {
    let mut program = Program::new();
    let url = program.intern("demo.js");
    let answer = program.intern("answer");
    let mut b = CodeBuilder::new();
    b.load_int(42);
    b.set_var(answer);
    b.emit(Opcode::Return);
    let root = program.add_function(b.build(url));
    let listing = program.disassemble(root);
    assert!(listing.contains("ShortInt 42"));
    assert!(listing.contains("SetVar"));
    assert!(listing.contains("answer"));
    assert!(listing.contains("Return"));
}

#[test]
fn regexp_literals_compile_through_the_proxy() {
    let (program, root) = compile(|program, b| {
        let source = program.intern("a+b");
        let flags = program.intern("i");
        let re = program.intern("source");
        b.load_string(source);
        b.load_string(flags);
        b.emit(Opcode::NewRegExp);
        b.get_prop(re);
        b.emit(Opcode::Return);
    });
    assert_eq!(Runner::new(program, root).run().unwrap(), HostValue::String("a+b".to_owned()));
}

#[test]
fn invalid_regexp_flags_are_syntax_errors() {
    let (program, root) = compile(|program, b| {
        let source = program.intern("a");
        let flags = program.intern("gg");
        b.load_string(source);
        b.load_string(flags);
        b.emit(Opcode::NewRegExp);
        b.emit(Opcode::Return);
    });
    let err = Runner::new(program, root).run().unwrap_err();
    assert_eq!(err.kind, kestrel::ErrorKind::SyntaxError);
}
