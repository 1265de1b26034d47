//! End-to-end scripts: source in, captured output out.

mod common;

use common::{eval, run_code};
use pyro_vm::{CaptureBuffer, Vm};

#[test]
fn test_arithmetic_echo() {
    assert_eq!(eval("echo 1 + 2;"), "3\n");
    assert_eq!(eval("echo 7 % 3, 7 // 2, 2 ** 10;"), "1 3 1024.0\n");
    assert_eq!(eval("echo 1 + 0.5;"), "1.5\n");
    assert_eq!(eval("echo 10 / 4;"), "2.5\n");
    assert_eq!(eval("echo 1 << 4, 255 >> 4, 6 & 3, 6 | 3, 6 ^ 3, ~0;"), "16 15 2 7 5 -1\n");
}

#[test]
fn test_function_call() {
    assert_eq!(eval("def f() { return 7; } echo f();"), "7\n");
    assert_eq!(eval("def add(a, b) { return a + b; } echo add(2, 3);"), "5\n");
    assert_eq!(
        eval("def fib(n) { if n < 2 { return n; } return fib(n - 1) + fib(n - 2); } echo fib(10);"),
        "55\n"
    );
}

#[test]
fn test_class_inheritance_copy_down() {
    assert_eq!(
        eval("class A { def m() { return 1; } } class B < A { } echo B():m();"),
        "1\n"
    );
    assert_eq!(
        eval(
            "class A { var x = 10; def get() { return self.x; } }
             class B < A { var y = 2; def sum() { return self:get() + self.y; } }
             echo B():sum();"
        ),
        "12\n"
    );
}

#[test]
fn test_initializers_and_fields() {
    assert_eq!(
        eval(
            "class Point {
                 var x;
                 var y;
                 def $init(x, y) { self.x = x; self.y = y; }
                 def sum() { return self.x + self.y; }
             }
             var p = Point(3, 4);
             echo p.x, p.y, p:sum();"
        ),
        "3 4 7\n"
    );
}

#[test]
fn test_map_iteration_order() {
    assert_eq!(
        eval("var m = {:\"a\" = 1, \"b\" = 2}; for k in m.keys() { echo k; }"),
        "a\nb\n"
    );
    assert_eq!(
        eval("var m = {\"x\" = 1, \"y\" = 2}; for (k, v) in m { echo k, v; }"),
        "x 1\ny 2\n"
    );
    assert_eq!(
        eval(
            "var m = $map();
             m[\"a\"] = 1; m[\"b\"] = 2; m[\"c\"] = 3;
             m:remove(\"b\");
             for k in m:keys() { echo k; }
             echo m:count();"
        ),
        "a\nc\n2\n"
    );
}

#[test]
fn test_vec_map_method() {
    assert_eq!(
        eval("var v = [1, 2, 3]; echo v:map(def(x) { return x * x; });"),
        "[1, 4, 9]\n"
    );
    assert_eq!(
        eval("echo [1, 2, 3, 4]:filter(def(x) { return x % 2 == 0; });"),
        "[2, 4]\n"
    );
}

#[test]
fn test_try_produces_err_tuple() {
    assert_eq!(
        eval("var t = try $panic(\"boom\"); echo $is_err(t), t:code(), t:message();"),
        "true 1 boom\n"
    );
    // No process exit, execution continues.
    assert_eq!(eval("try $panic(\"x\"); echo \"after\";"), "after\n");
    // A non-panicking try yields the value.
    assert_eq!(eval("echo try 42;"), "42\n");
}

#[test]
fn test_char_count() {
    assert_eq!(eval("var s = \"héllo\"; echo s:char_count();"), "5\n");
    assert_eq!(eval("echo \"héllo\":byte_count();"), "6\n");
}

#[test]
fn test_closures_capture_and_close() {
    assert_eq!(
        eval(
            "def make() {
                 var n = 0;
                 def inc() { n = n + 1; return n; }
                 return inc;
             }
             var c = make();
             echo c(), c(), c();"
        ),
        "1 2 3\n"
    );
    // Two closures over the same variable share one upvalue.
    assert_eq!(
        eval(
            "def make() {
                 var n = 0;
                 def inc() { n = n + 1; }
                 def get() { return n; }
                 return $tup(inc, get);
             }
             var (inc, get) = make();
             inc(); inc();
             echo get();"
        ),
        "2\n"
    );
}

#[test]
fn test_loops() {
    assert_eq!(eval("var i = 0; while i < 3 { echo i; i += 1; }"), "0\n1\n2\n");
    assert_eq!(eval("loop var i = 0; i < 3; i += 1 { echo i; }"), "0\n1\n2\n");
    assert_eq!(
        eval("var n = 0; loop { n += 1; if n == 5 { break; } } echo n;"),
        "5\n"
    );
    assert_eq!(
        eval("for i in $range(5) { if i % 2 == 0 { continue; } echo i; }"),
        "1\n3\n"
    );
    assert_eq!(eval("for x in $tup(10, 20) { echo x; }"), "10\n20\n");
}

#[test]
fn test_string_interpolation() {
    assert_eq!(eval("echo \"v=${1 + 2}!\";"), "v=3!\n");
    assert_eq!(eval("var name = \"pyro\"; echo \"hi ${name}, ${1 + 1}\";"), "hi pyro, 2\n");
}

#[test]
fn test_string_methods() {
    assert_eq!(eval("echo \"a,b,c\":split(\",\");"), "[\"a\", \"b\", \"c\"]\n");
    assert_eq!(eval("echo \"hello\":to_ascii_upper();"), "HELLO\n");
    assert_eq!(eval("echo \"hello\":replace(\"l\", \"L\");"), "heLLo\n");
    assert_eq!(eval("echo \"hello\":slice(1, 3);"), "ell\n");
    assert_eq!(eval("echo \", \":join([1, 2, 3]);"), "1, 2, 3\n");
    assert_eq!(eval("echo \"ab\" in \"xabz\", \"q\" in \"xabz\";"), "true false\n");
}

#[test]
fn test_coalescing_operators() {
    assert_eq!(eval("echo null ?? 1;"), "1\n");
    assert_eq!(eval("echo 0 ?? 1;"), "0\n");
    assert_eq!(eval("echo (try $panic(\"x\")) !! 9;"), "9\n");
    assert_eq!(eval("echo 5 !! 9;"), "5\n");
}

#[test]
fn test_logical_operators_short_circuit() {
    assert_eq!(
        eval("def boom() { $panic(\"never\"); } echo false && boom();"),
        "false\n"
    );
    assert_eq!(
        eval("def boom() { $panic(\"never\"); } echo true || boom();"),
        "true\n"
    );
}

#[test]
fn test_iterator_adapters_are_lazy() {
    assert_eq!(
        eval(
            "var calls = 0;
             def double(x) { calls = calls + 1; return x * 2; }
             var it = $range(10):map(double);
             echo it:next(), it:next();
             echo calls;"
        ),
        "0 2\n2\n"
    );
    assert_eq!(
        eval("echo $range(5):filter(def(x) { return x > 2; }):to_vec();"),
        "[3, 4]\n"
    );
    assert_eq!(
        eval("echo $range(3):enumerate():to_vec();"),
        "[(0, 0), (1, 1), (2, 2)]\n"
    );
    assert_eq!(eval("echo $range(10):skip_first(7):to_vec();"), "[7, 8, 9]\n");
    assert_eq!(eval("echo $range(5):skip_last(2):to_vec();"), "[0, 1, 2]\n");
    assert_eq!(eval("echo $range(4):count();"), "4\n");
    assert_eq!(eval("echo $range(3):join(\"-\");"), "0-1-2\n");
}

#[test]
fn test_operator_overloading() {
    assert_eq!(
        eval(
            "class V {
                 var x;
                 def $init(x) { self.x = x; }
                 def $op_binary_plus(other) { return V(self.x + other.x); }
                 def $str() { return \"V(\" + $str(self.x) + \")\"; }
             }
             echo V(1) + V(2);"
        ),
        "V(3)\n"
    );
    assert_eq!(
        eval(
            "class N {
                 var x;
                 def $init(x) { self.x = x; }
                 def $op_binary_equals_equals(other) { return self.x == other.x; }
             }
             echo N(1) == N(1), N(1) == N(2);"
        ),
        "true false\n"
    );
}

#[test]
fn test_super_dispatch() {
    assert_eq!(
        eval(
            "class A { def describe() { return \"A\"; } }
             class B < A {
                 def describe() { return super:describe() + \"B\"; }
             }
             echo B():describe();"
        ),
        "AB\n"
    );
}

#[test]
fn test_callable_instances() {
    assert_eq!(
        eval(
            "class Adder {
                 var n;
                 def $init(n) { self.n = n; }
                 def $call(x) { return x + self.n; }
             }
             var add5 = Adder(5);
             echo add5(10);"
        ),
        "15\n"
    );
}

#[test]
fn test_custom_iterator_protocol() {
    assert_eq!(
        eval(
            "class Countdown {
                 var n;
                 def $init(n) { self.n = n; }
                 def $iter() { return self; }
                 def $next() {
                     if self.n == 0 { return $err(); }
                     self.n = self.n - 1;
                     return self.n + 1;
                 }
             }
             for x in Countdown(3) { echo x; }"
        ),
        "3\n2\n1\n"
    );
}

#[test]
fn test_unpacking() {
    assert_eq!(eval("var (a, b) = $tup(1, 2); echo a, b;"), "1 2\n");
    assert_eq!(eval("var (a, b, c) = [10, 20, 30]; echo a + b + c;"), "60\n");
}

#[test]
fn test_queue_and_stack() {
    assert_eq!(
        eval(
            "var q = $queue();
             q:enqueue(1); q:enqueue(2); q:enqueue(3);
             echo q:dequeue(), q:dequeue(), q:count();"
        ),
        "1 2 1\n"
    );
    assert_eq!(
        eval(
            "var s = $stack();
             s:push(1); s:push(2);
             echo s:pop(), s:pop();"
        ),
        "2 1\n"
    );
}

#[test]
fn test_buffer_to_str() {
    assert_eq!(
        eval(
            "var b = $buf();
             b:write(\"hel\");
             b:write(\"lo \", 42);
             var s = b:to_str();
             echo s, b:count();"
        ),
        "hello 42 0\n"
    );
}

#[test]
fn test_gc_pressure_during_execution() {
    // Enough transient strings to cross the collection threshold while
    // the live vector keeps growing.
    assert_eq!(
        eval(
            "var v = [];
             loop var i = 0; i < 1000; i += 1 {
                 v:append(\"item-\" + $str(i));
             }
             echo v:count(), v[999];"
        ),
        "1000 item-999\n"
    );
}

#[test]
fn test_repl_echoes_expression_values() {
    let capture = CaptureBuffer::new();
    let mut vm = Vm::new();
    vm.set_output(capture.stream());
    vm.set_repl_mode(true);
    vm.exec_code_as_main(b"1 + 2;", "<repl>").unwrap();
    assert_eq!(capture.contents(), "3\n");

    capture.clear();
    vm.exec_code_as_main(b"\"quoted\";", "<repl>").unwrap();
    assert_eq!(capture.contents(), "\"quoted\"\n");

    // Null results stay silent.
    capture.clear();
    vm.exec_code_as_main(b"var q = 1;", "<repl>").unwrap();
    assert_eq!(capture.contents(), "");
}

#[test]
fn test_test_function_protocol() {
    let mut vm = Vm::new();
    let capture = CaptureBuffer::new();
    vm.set_output(capture.stream());
    vm.exec_code_as_main(
        b"def $test_passes() { assert 1 + 1 == 2; }
          def $test_fails() { assert false; }
          def $test_wrong_arity(x) { }
          def not_a_test() { assert false; }",
        "test",
    )
    .unwrap();

    let (passed, failed) = vm.run_test_funcs().unwrap();
    assert_eq!(passed, 1);
    assert_eq!(failed, 2);
}

#[test]
fn test_main_function_runs_after_script() {
    let (result, output) = run_code("echo \"top\"; def $main() { echo \"main\"; }");
    result.unwrap();
    assert_eq!(output, "top\n");

    let capture = CaptureBuffer::new();
    let mut vm = Vm::new();
    vm.set_output(capture.stream());
    vm.exec_code_as_main(b"echo \"top\"; def $main() { echo \"main\"; }", "test")
        .unwrap();
    vm.run_main_func().unwrap();
    assert_eq!(capture.contents(), "top\nmain\n");
}

#[test]
fn test_formatting_builtins() {
    assert_eq!(eval("echo $fmt(\"{} and {}\", 1, 2);"), "1 and 2\n");
    assert_eq!(eval("echo $fmt(\"{05d}\", 42);"), "00042\n");
    assert_eq!(eval("echo $fmt(\"{.2f}\", 3.14159);"), "3.14\n");
    assert_eq!(eval("echo $str(65), $i64(\"65\"), $f64(2), $char(65), $bool(null);"), "65 65 2.0 A false\n");
}
