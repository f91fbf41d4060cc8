//! Integration tests: lex → classify → compile → VM

use std::str::FromStr;

use rust_decimal::Decimal;

use rill_codegen::compile;
use rill_runtime::Stdlib;
use rill_syntax::classify::classify;
use rill_syntax::lexer::Lexer;
use rill_vm::error::Fault;
use rill_vm::machine::{Machine, Memory};
use rill_vm::value::Value;

/// Helper: compile Rill source against the standard libraries.
fn compile_source(source: &str) -> rill_vm::image::Image {
    let stdlib = Stdlib::new();
    let tokens = Lexer::new(source).tokenize();
    let classified = classify(tokens, &stdlib).expect("classify failed");
    compile(&classified).expect("compile failed")
}

/// Helper: compile and run, returning the final memory state.
fn run_source(source: &str) -> Memory {
    let stdlib = Stdlib::new();
    let tokens = Lexer::new(source).tokenize();
    let classified = classify(tokens, &stdlib).expect("classify failed");
    let image = compile(&classified).expect("compile failed");
    let mut machine = Machine::load(image, stdlib.natives()).expect("load failed");
    machine.run().expect("run failed");
    machine.memory()
}

/// Helper: compile and run, expecting a runtime fault.
fn run_source_fault(source: &str) -> Fault {
    let stdlib = Stdlib::new();
    let tokens = Lexer::new(source).tokenize();
    let classified = classify(tokens, &stdlib).expect("classify failed");
    let image = compile(&classified).expect("compile failed");
    let mut machine = Machine::load(image, stdlib.natives()).expect("load failed");
    machine.run().expect_err("expected a fault")
}

/// Most recent binding of a name.
fn var_value(memory: &Memory, name: &str) -> Value {
    memory
        .variables
        .iter()
        .rev()
        .find(|v| v.name == name)
        .unwrap_or_else(|| panic!("no variable `{name}`"))
        .value
        .clone()
}

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

#[test]
fn numeric_evaluation_is_exact() {
    let memory = run_source(
        "var a = 2\nvar b = 3\n(a + b / 5 * (2 * 2.111 * (9.3 - 6.34))) / (2 + 9.32) + 3.45 / 4 - 45.3222",
    );
    assert_eq!(memory.stack.len(), 1);
    match &memory.stack[0] {
        Value::Number(n) => {
            assert_eq!(*n, dec("-43.620630035335689045936395760"));
        }
        other => panic!("expected a number, got {other}"),
    }
}

#[test]
fn factorial_of_27_is_exact() {
    let memory = run_source(
        "var r = fact(27)\n\
         func fact(n)\n\
             if n < 2\n\
                 return 1\n\
             end\n\
             return n * fact(n - 1)\n\
         end",
    );
    match var_value(&memory, "r") {
        Value::Number(n) => assert_eq!(n, dec("10888869450418352160768000000")),
        other => panic!("expected a number, got {other}"),
    }
    // every recursive frame unbound its parameter on return
    assert_eq!(memory.variables.len(), 1);
    assert!(memory.call_trace.is_empty());
}

#[test]
fn shadowing_restores_the_outer_binding() {
    let memory = run_source("var i = 1\nif true\n    var i = 2\nend");
    assert_eq!(memory.variables.len(), 1);
    match var_value(&memory, "i") {
        Value::Number(n) => assert_eq!(n, dec("1")),
        other => panic!("expected a number, got {other}"),
    }
}

#[test]
fn live_set_size_returns_after_a_block() {
    let memory = run_source(
        "var keep = 1\n\
         if true\n\
             var t1 = 10\n\
             var t2 = 20\n\
             keep = t1 + t2\n\
         end",
    );
    assert_eq!(memory.variables.len(), 1);
    match var_value(&memory, "keep") {
        Value::Number(n) => assert_eq!(n, dec("30")),
        other => panic!("expected a number, got {other}"),
    }
}

#[test]
fn redeclaration_rebinds_in_the_same_scope() {
    let memory = run_source("var x = 1\nvar x = 2\nvar y = x + 1");
    match var_value(&memory, "y") {
        Value::Number(n) => assert_eq!(n, dec("3")),
        other => panic!("expected a number, got {other}"),
    }
    // both bindings are live at top level; the newest wins lookups
    let x_bindings = memory.variables.iter().filter(|v| v.id == memory.variables[0].id);
    assert_eq!(x_bindings.count(), 2);
}

#[test]
fn string_number_overloads() {
    let memory = run_source(
        "var a = 'Hello!' + 'Hi!'\n\
         var b = 'He Ha He!' / ' '\n\
         var c = '2' * 5\n\
         var d = 'Hello!' + 5\n\
         var e = 5 + 'Hi'",
    );
    assert_eq!(var_value(&memory, "a").to_string(), "Hello!Hi!");
    assert_eq!(var_value(&memory, "b").to_string(), "[He, Ha, He!]");
    assert_eq!(var_value(&memory, "c").to_string(), "22222");
    assert_eq!(var_value(&memory, "d").to_string(), "Hello!5");
    assert_eq!(var_value(&memory, "e").to_string(), "5Hi");
}

#[test]
fn list_index_read_and_write() {
    let memory = run_source(
        "var lst = [1, 2, 3]\n\
         var first = 0 elemOf lst\n\
         lst setElem of 1 to 9\n\
         var second = 1 elemOf lst",
    );
    assert_eq!(var_value(&memory, "first").to_string(), "1");
    assert_eq!(var_value(&memory, "second").to_string(), "9");
    assert_eq!(var_value(&memory, "lst").to_string(), "[1, 9, 3]");
}

#[test]
fn structures_create_and_mutate() {
    let memory = run_source(
        "var p = Point(3, 4)\n\
         p.y = p.x + 10\n\
         var s = p.y\n\
         struct Point\n\
             x\n\
             y\n\
         end",
    );
    assert_eq!(var_value(&memory, "s").to_string(), "13");
}

#[test]
fn loop_desugars_to_counted_iteration() {
    let memory = run_source("var total = 0\nloop i in 0 to 5\n    total = total + i\nend");
    assert_eq!(var_value(&memory, "total").to_string(), "10");
    // the loop variable was deleted at loop exit
    assert_eq!(memory.variables.len(), 1);
}

#[test]
fn if_else_takes_the_right_branch() {
    let memory = run_source("var r = 0\nif 1 > 2\n    r = 1\nelse\n    r = 2\nend");
    assert_eq!(var_value(&memory, "r").to_string(), "2");
}

#[test]
fn conditions_use_word_operators() {
    let memory = run_source(
        "var r = 0\n\
         if (2 is 2) and (3 is not 4)\n\
             r = 1\n\
         end",
    );
    assert_eq!(var_value(&memory, "r").to_string(), "1");
}

#[test]
fn wildcard_import_calls_foreign_functions() {
    let memory = run_source("import * @ 'math'\nvar m = max(3, 9) + abs(0 - 5)");
    assert_eq!(var_value(&memory, "m").to_string(), "14");
}

#[test]
fn named_import_binds_one_function() {
    let memory = run_source("import len @ 'lists'\nvar n = len([4, 5, 6])");
    assert_eq!(var_value(&memory, "n").to_string(), "3");
}

#[test]
fn unclassified_identifier_is_a_compile_fault() {
    let stdlib = Stdlib::new();
    let tokens = Lexer::new("var a = 2\nbogus = 3").tokenize();
    let classified = classify(tokens, &stdlib).expect("classify failed");
    let err = compile(&classified).expect_err("expected a compile fault");
    assert_eq!(
        err,
        rill_codegen::CompileError::UnexpectedToken {
            kind: "identifier",
            text: "bogus".to_string()
        }
    );
}

#[test]
fn arity_mismatch_is_a_compile_fault() {
    let stdlib = Stdlib::new();
    let tokens = Lexer::new("var r = f(1)\nfunc f(a, b)\nend").tokenize();
    let classified = classify(tokens, &stdlib).expect("classify failed");
    let err = compile(&classified).expect_err("expected a compile fault");
    assert!(matches!(
        err,
        rill_codegen::CompileError::ArityMismatch { .. }
    ));
}

#[test]
fn division_by_zero_is_a_runtime_fault() {
    assert_eq!(run_source_fault("var x = 1 / 0"), Fault::DivisionByZero);
}

#[test]
fn out_of_bounds_index_is_a_runtime_fault() {
    let fault = run_source_fault("var lst = [1]\nvar x = 4 elemOf lst");
    assert_eq!(fault, Fault::IndexOutOfBounds { index: 4, len: 1 });
}

#[test]
fn functions_never_run_unless_called() {
    // straight-line execution stops at the halt guarding the body
    let memory = run_source("var a = 1\nfunc f()\n    a = 99\nend\nvar b = 2");
    assert_eq!(var_value(&memory, "a").to_string(), "1");
    // the statement after the function body is unreachable by design:
    // the guard halt ended the program
    assert!(memory.variables.iter().all(|v| v.name != "b"));
}

#[test]
fn bytecode_listing_names_labels() {
    let image = compile_source("var r = f()\nfunc f()\n    return 1\nend");
    let listing = rill_codegen::disasm(&image);
    assert!(listing.contains("fn_f:"));
    assert!(listing.contains("push_addr"));
    assert!(listing.contains("ret"));
}
