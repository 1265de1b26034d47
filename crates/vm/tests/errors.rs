//! Panic behavior: boundary conditions, error codes, try semantics.

mod common;

use common::{eval, eval_panic_code, run_code};
use pyro_vm::{ErrorCode, Halt};

#[test]
fn test_division_by_zero() {
    assert_eq!(eval_panic_code("echo 1 / 0;"), ErrorCode::ValueError);
    assert_eq!(eval_panic_code("echo 1.0 / 0;"), ErrorCode::ValueError);
    assert_eq!(eval_panic_code("echo 1 // 0;"), ErrorCode::ValueError);
    assert_eq!(eval_panic_code("echo 1 % 0;"), ErrorCode::ValueError);
}

#[test]
fn test_negative_shifts() {
    assert_eq!(eval_panic_code("echo 1 << -1;"), ErrorCode::ValueError);
    assert_eq!(eval_panic_code("echo 1 >> -1;"), ErrorCode::ValueError);
}

#[test]
fn test_float_to_int_range() {
    assert_eq!(eval_panic_code("echo $i64(1e300);"), ErrorCode::ValueError);
    assert_eq!(eval("echo $i64(2.9);"), "2\n");
}

#[test]
fn test_empty_vector_indexing() {
    assert_eq!(eval_panic_code("var v = []; echo v[0];"), ErrorCode::ValueError);
    assert_eq!(eval_panic_code("var v = []; echo v[-1];"), ErrorCode::ValueError);
}

#[test]
fn test_class_inheriting_from_itself() {
    assert_eq!(eval_panic_code("class A < A { }"), ErrorCode::TypeError);
}

#[test]
fn test_error_code_taxonomy() {
    assert_eq!(eval_panic_code("assert false;"), ErrorCode::AssertionFailed);
    assert_eq!(eval_panic_code("echo undefined_name;"), ErrorCode::NameError);
    assert_eq!(eval_panic_code("echo 1 + \"x\";"), ErrorCode::TypeError);
    assert_eq!(eval_panic_code("echo null:method();"), ErrorCode::TypeError);
    assert_eq!(
        eval_panic_code("class A { } echo A().missing;"),
        ErrorCode::NameError
    );
    assert_eq!(
        eval_panic_code("def f(a) { } f();"),
        ErrorCode::ArgsError
    );
    assert_eq!(eval_panic_code("import no_such_module;"), ErrorCode::ModuleNotFound);
}

#[test]
fn test_syntax_errors_carry_location() {
    let (result, _) = run_code("var x = 1;\nvar y = ;\n");
    match result {
        Err(Halt::Panic(panic)) => {
            assert_eq!(panic.code, ErrorCode::SyntaxError);
            assert_eq!(panic.line, Some(2));
            assert_eq!(panic.source_id.as_deref(), Some("test"));
        }
        other => panic!("expected a syntax error, got {other:?}"),
    }
}

#[test]
fn test_unpack_length_mismatch() {
    assert_eq!(
        eval_panic_code("var (a, b, c) = $tup(1, 2);"),
        ErrorCode::ValueError
    );
    assert_eq!(eval_panic_code("var (a, b) = 5;"), ErrorCode::TypeError);
    // Extras are ignored.
    assert_eq!(eval("var (a, b) = $tup(1, 2, 3); echo a, b;"), "1 2\n");
}

#[test]
fn test_try_catches_each_kind() {
    assert_eq!(
        eval("echo (try 1 / 0):code();"),
        format!("{}\n", ErrorCode::ValueError.as_i64())
    );
    assert_eq!(
        eval("echo (try undefined_name):code();"),
        format!("{}\n", ErrorCode::NameError.as_i64())
    );
    assert_eq!(
        eval("var t = try (1 + \"x\"); echo t:code();"),
        format!("{}\n", ErrorCode::TypeError.as_i64())
    );
}

#[test]
fn test_try_restores_stack_depth() {
    // A panic deep inside nested calls unwinds cleanly; execution
    // continues with an intact stack.
    assert_eq!(
        eval(
            "def level3() { $panic(\"deep\"); }
             def level2() { level3(); }
             def level1() { level2(); }
             var t = try level1();
             echo $is_err(t);
             echo 1 + 2;"
        ),
        "true\n3\n"
    );
}

#[test]
fn test_nested_try() {
    assert_eq!(
        eval(
            "def outer() {
                 var inner = try $panic(\"inner\");
                 if $is_err(inner) { $panic(\"outer\"); }
                 return 0;
             }
             var t = try outer();
             echo t:message();"
        ),
        "outer\n"
    );
}

#[test]
fn test_exit_skips_try() {
    let (result, _) = run_code("var t = try $exit(7); echo \"unreachable\";");
    match result {
        Err(Halt::Exit(7)) => {}
        other => panic!("expected Exit(7), got {other:?}"),
    }
}

#[test]
fn test_call_depth_limit() {
    let code = eval_panic_code("def f() { return f(); } f();");
    assert_eq!(code, ErrorCode::OutOfMemory);
    // Catchable: the recursion panic converts into an err tuple.
    assert_eq!(
        eval("def f() { return f(); } echo $is_err(try f());"),
        "true\n"
    );
}

#[test]
fn test_memory_ceiling_panics() {
    let capture = pyro_vm::CaptureBuffer::new();
    let mut vm = pyro_vm::Vm::new();
    vm.set_output(capture.stream());
    vm.set_error_output(pyro_vm::CaptureBuffer::new().stream());
    vm.set_max_memory(vm.heap.bytes_allocated() + 16 * 1024);

    let result = vm.exec_code_as_main(
        b"var v = []; loop var i = 0; i < 100000; i += 1 { v:append($str(i)); }",
        "test",
    );
    match result {
        Err(Halt::Panic(panic)) => assert_eq!(panic.code, ErrorCode::OutOfMemory),
        other => panic!("expected an out-of-memory panic, got {other:?}"),
    }
}

#[test]
fn test_uncatchable_never_reports_success() {
    // A panic leaves the status code set.
    let capture = pyro_vm::CaptureBuffer::new();
    let mut vm = pyro_vm::Vm::new();
    vm.set_error_output(capture.stream());
    let _ = vm.exec_code_as_main(b"$panic(\"boom\");", "test");
    assert_eq!(vm.status_code(), ErrorCode::Error.as_i64());
    assert!(capture.contents().contains("boom"));
}

#[test]
fn test_stack_trace_renders_source_lines() {
    let errors = pyro_vm::CaptureBuffer::new();
    let mut vm = pyro_vm::Vm::new();
    vm.set_error_output(errors.stream());
    let _ = vm.exec_code_as_main(
        b"def inner() {\n    $panic(\"trace me\");\n}\ndef outer() {\n    inner();\n}\nouter();\n",
        "trace.pyro",
    );
    let report = errors.contents();
    assert!(report.contains("trace me"));
    assert!(report.contains("Traceback"));
    assert!(report.contains("trace.pyro:2"));
    assert!(report.contains("in inner"));
}
