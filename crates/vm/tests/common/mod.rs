//! Shared helpers for the integration suites.

use pyro_vm::{CaptureBuffer, ErrorCode, Halt, Vm, VmResult};

/// Runs a source snippet in a fresh VM, capturing its output.
pub fn run_code(src: &str) -> (VmResult<()>, String) {
    let capture = CaptureBuffer::new();
    let errors = CaptureBuffer::new();
    let mut vm = Vm::new();
    vm.set_output(capture.stream());
    vm.set_error_output(errors.stream());
    let result = vm.exec_code_as_main(src.as_bytes(), "test");
    (result, capture.contents())
}

/// Runs a snippet and returns its output, panicking on any halt.
pub fn eval(src: &str) -> String {
    let (result, output) = run_code(src);
    match result {
        Ok(()) => output,
        Err(halt) => panic!("unexpected halt {halt:?} (output so far: {output:?})"),
    }
}

/// Runs a snippet and returns the panic's error code.
pub fn eval_panic_code(src: &str) -> ErrorCode {
    let (result, output) = run_code(src);
    match result {
        Err(Halt::Panic(panic)) => panic.code,
        other => panic!("expected a panic, got {other:?} (output: {output:?})"),
    }
}
