//! Execution driver tests: the debug entry point and the supervisor.

use rill_engine::{compile, debug_run, run_many, Supervisor};
use rill_runtime::Stdlib;
use rill_vm::value::Value;

#[test]
fn debug_run_returns_elapsed_time_and_memory() {
    let report = debug_run("var a = 2\na + 3").expect("debug run");
    assert_eq!(report.memory.stack.len(), 1);
    match &report.memory.stack[0] {
        Value::Number(n) => assert_eq!(n.to_string(), "5"),
        other => panic!("expected a number, got {other}"),
    }
    assert_eq!(report.memory.variables.len(), 1);
    assert_eq!(report.memory.variables[0].name, "a");
}

#[test]
fn debug_run_surfaces_compile_faults() {
    assert!(debug_run("bogus = 1").is_err());
}

#[test]
fn debug_run_surfaces_runtime_faults() {
    assert!(debug_run("var x = 1 / 0").is_err());
}

#[test]
fn supervisor_waits_for_all_programs() {
    let stdlib = Stdlib::new();
    let supervisor = Supervisor::new();
    for _ in 0..4 {
        let image = compile("var total = 0\nloop i in 0 to 100\n    total = total + i\nend", &stdlib)
            .expect("compile");
        supervisor.launch(image, stdlib.natives());
    }
    supervisor.wait_all();
    assert!(!supervisor.had_fault());
}

#[test]
fn first_fault_is_latched_and_siblings_finish() {
    let stdlib = Stdlib::new();
    let supervisor = Supervisor::new();
    let good = compile("var a = 1 + 1", &stdlib).expect("compile");
    let bad = compile("var x = 1 / 0", &stdlib).expect("compile");
    supervisor.launch(good, stdlib.natives());
    supervisor.launch(bad, stdlib.natives());
    supervisor.wait_all();
    assert!(supervisor.had_fault());
}

#[test]
fn run_many_accepts_a_batch() {
    let sources = vec![
        "var a = 1".to_string(),
        "var b = 2".to_string(),
    ];
    run_many(&sources).expect("batch");
}
