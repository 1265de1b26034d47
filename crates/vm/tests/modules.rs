//! Module loading: filesystem resolution, member imports, cycles, and
//! the builtin `$std` registry.

mod common;

use std::fs;

use pyro_vm::{CaptureBuffer, ErrorCode, Halt, Vm};

fn vm_with_root(root: &str) -> (Vm, CaptureBuffer) {
    let capture = CaptureBuffer::new();
    let mut vm = Vm::new();
    vm.set_output(capture.stream());
    vm.set_error_output(CaptureBuffer::new().stream());
    vm.add_import_root(root).unwrap();
    (vm, capture)
}

#[test]
fn test_import_module_file() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("a")).unwrap();
    fs::write(dir.path().join("a/b.pyro"), "pub var x = 42;\n").unwrap();

    let (mut vm, capture) = vm_with_root(&dir.path().to_string_lossy());
    vm.exec_code_as_main(b"import a::b; echo a::b::x;", "test")
        .unwrap();
    assert_eq!(capture.contents(), "42\n");
}

#[test]
fn test_import_binds_last_component_too() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("a")).unwrap();
    fs::write(dir.path().join("a/b.pyro"), "pub var x = 7;\n").unwrap();

    let (mut vm, capture) = vm_with_root(&dir.path().to_string_lossy());
    vm.exec_code_as_main(b"import a::b; echo b::x;", "test")
        .unwrap();
    assert_eq!(capture.contents(), "7\n");
}

#[test]
fn test_directory_module_with_entry_file() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("pkg")).unwrap();
    fs::write(dir.path().join("pkg/self.pyro"), "pub var version = 3;\n").unwrap();

    let (mut vm, capture) = vm_with_root(&dir.path().to_string_lossy());
    vm.exec_code_as_main(b"import pkg; echo pkg::version;", "test")
        .unwrap();
    assert_eq!(capture.contents(), "3\n");
}

#[test]
fn test_bare_directory_namespace() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("ns")).unwrap();
    fs::write(dir.path().join("ns/leaf.pyro"), "pub var v = 1;\n").unwrap();

    let (mut vm, capture) = vm_with_root(&dir.path().to_string_lossy());
    vm.exec_code_as_main(b"import ns::leaf; echo ns::leaf::v;", "test")
        .unwrap();
    assert_eq!(capture.contents(), "1\n");
}

#[test]
fn test_import_members() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("lib")).unwrap();
    fs::write(
        dir.path().join("lib/util.pyro"),
        "pub var x = 1;\npub var y = 2;\npub def double(n) { return n * 2; }\n",
    )
    .unwrap();

    let (mut vm, capture) = vm_with_root(&dir.path().to_string_lossy());
    vm.exec_code_as_main(
        b"import lib::util::{x, y, double}; echo x, y, double(21);",
        "test",
    )
    .unwrap();
    assert_eq!(capture.contents(), "1 2 42\n");
}

#[test]
fn test_missing_member_is_a_name_error() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("m.pyro"), "pub var x = 1;\n").unwrap();

    let (mut vm, _capture) = vm_with_root(&dir.path().to_string_lossy());
    let result = vm.exec_code_as_main(b"import m::{nope};", "test");
    match result {
        Err(Halt::Panic(panic)) => assert_eq!(panic.code, ErrorCode::NameError),
        other => panic!("expected a name error, got {other:?}"),
    }
}

#[test]
fn test_modules_are_cached() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("counted.pyro"),
        "echo \"loaded\";\npub var x = 1;\n",
    )
    .unwrap();

    let (mut vm, capture) = vm_with_root(&dir.path().to_string_lossy());
    vm.exec_code_as_main(
        b"import counted; import counted; echo counted::x;",
        "test",
    )
    .unwrap();
    // The module body executed exactly once.
    assert_eq!(capture.contents(), "loaded\n1\n");
}

#[test]
fn test_cyclic_imports_resolve() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("alpha.pyro"),
        "pub var started = 1;\nimport beta;\npub var finished = beta::seen;\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("beta.pyro"),
        "import alpha;\npub var seen = alpha::started;\n",
    )
    .unwrap();

    let (mut vm, capture) = vm_with_root(&dir.path().to_string_lossy());
    vm.exec_code_as_main(b"import alpha; echo alpha::finished;", "test")
        .unwrap();
    assert_eq!(capture.contents(), "1\n");
}

#[test]
fn test_cyclic_import_of_undefined_name_is_a_name_error() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("ping.pyro"),
        "import pong;\npub var x = 1;\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("pong.pyro"),
        // ping::x is not yet defined when pong executes mid-cycle.
        "import ping;\npub var y = ping::x;\n",
    )
    .unwrap();

    let (mut vm, _capture) = vm_with_root(&dir.path().to_string_lossy());
    let result = vm.exec_code_as_main(b"import ping;", "test");
    match result {
        Err(Halt::Panic(panic)) => assert_eq!(panic.code, ErrorCode::NameError),
        other => panic!("expected a name error, got {other:?}"),
    }
}

#[test]
fn test_module_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let (mut vm, _capture) = vm_with_root(&dir.path().to_string_lossy());
    let result = vm.exec_code_as_main(b"import missing::module;", "test");
    match result {
        Err(Halt::Panic(panic)) => assert_eq!(panic.code, ErrorCode::ModuleNotFound),
        other => panic!("expected module-not-found, got {other:?}"),
    }
}

#[test]
fn test_builtin_std_module() {
    let capture = CaptureBuffer::new();
    let mut vm = Vm::new();
    vm.set_output(capture.stream());
    vm.exec_code_as_main(
        b"import $std::pyro; echo pyro::version_string; echo pyro::version_major;",
        "test",
    )
    .unwrap();
    assert_eq!(capture.contents(), "0.6.0\n0\n");
}

#[test]
fn test_embedded_module_compiles_on_first_import() {
    let capture = CaptureBuffer::new();
    let mut vm = Vm::new();
    vm.set_output(capture.stream());
    vm.register_embedded_module("greeting", "pub def greet() { return \"hello\"; }\n");
    vm.exec_code_as_main(
        b"import $std::greeting; echo greeting::greet();",
        "test",
    )
    .unwrap();
    assert_eq!(capture.contents(), "hello\n");
}

#[test]
fn test_unknown_std_module() {
    let mut vm = Vm::new();
    vm.set_error_output(CaptureBuffer::new().stream());
    let result = vm.exec_code_as_main(b"import $std::nonexistent;", "test");
    match result {
        Err(Halt::Panic(panic)) => assert_eq!(panic.code, ErrorCode::ModuleNotFound),
        other => panic!("expected module-not-found, got {other:?}"),
    }
}

#[test]
fn test_filepath_member_is_defined() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("where.pyro"), "pub var x = 1;\n").unwrap();

    let (mut vm, capture) = vm_with_root(&dir.path().to_string_lossy());
    vm.exec_code_as_main(
        b"import where; echo where::$filepath:ends_with(\"where.pyro\");",
        "test",
    )
    .unwrap();
    assert_eq!(capture.contents(), "true\n");
}
