//! End-to-end program tests: source text in, captured output out.

use sablei::{CancelToken, HostValue, Interpreter, InterpreterConfig, Kind, native_fn};
use std::time::Duration;

fn run(source: &str) -> String {
    let mut interp = Interpreter::new(CancelToken::none()).unwrap();
    interp.interpret(source)
}

fn run_big(source: &str) -> String {
    let mut interp = Interpreter::with_config(
        CancelToken::none(),
        InterpreterConfig {
            heap_bytes: 64 * 1024,
            stack_bytes: 8 * 1024,
            ..InterpreterConfig::default()
        },
    )
    .unwrap();
    interp.interpret(source)
}

#[test]
fn test_hello_world() {
    assert_eq!(run(r#"Console.WriteLine("hi");"#), "hi\n");
}

#[test]
fn test_infinite_loop_times_out() {
    let mut interp = Interpreter::with_config(
        CancelToken::with_timeout(Duration::from_millis(10)),
        InterpreterConfig::default(),
    )
    .unwrap();
    let out = interp.interpret("while (true) { }");
    assert!(out.contains("Program timed out"), "{out}");
}

#[test]
fn test_heap_reclaimed_after_scoped_allocations() {
    let out = run(
        r#"
        string Big() {
            string b = "xxxxxxxx";
            b = b + b; b = b + b; b = b + b; b = b + b;
            b = b + b; b = b + b; b = b + b;
            return b;
        }
        for (int i = 0; i < 10; i++) {
            string s = Big();
        }
        Console.WriteLine(GetMemoryUsage() <= 64);
        "#,
    );
    assert_eq!(out, "True\n");
}

#[test]
fn test_native_overload_set() {
    let mut interp = Interpreter::new(CancelToken::none()).unwrap();
    interp.register_native(
        "Add",
        native_fn(&[("a", Kind::Int), ("b", Kind::Int)], |_, args| {
            match (&args[0], &args[1]) {
                (HostValue::Int(a), HostValue::Int(b)) => Ok(HostValue::Int(a + b)),
                _ => Err("expected ints".into()),
            }
        }),
    );
    interp.register_native(
        "Add",
        native_fn(&[("a", Kind::Str), ("b", Kind::Str)], |_, args| {
            match (&args[0], &args[1]) {
                (HostValue::Str(a), HostValue::Str(b)) => Ok(HostValue::Str(format!("{a}{b}"))),
                _ => Err("expected strings".into()),
            }
        }),
    );
    let out = interp.interpret(r#"Console.WriteLine(Add(1, 2)); Console.WriteLine(Add("a", "b"));"#);
    assert_eq!(out, "3\nab\n");
}

#[test]
fn test_struct_json_round_trip() {
    let out = run(
        r#"
        struct P { int x; string s; }
        P p = new P();
        p.x = 7;
        p.s = "k";
        Console.WriteLine(Json.Serialize(p));
        "#,
    );
    assert_eq!(out, "{\"x\":7,\"s\":\"k\"}\n");
}

#[test]
fn test_attribute_dispatch() {
    let out = run(
        r#"
        [Command("hi")] void Hi() { Console.WriteLine("HI"); }
        [Command("bye")] void Bye() { Console.WriteLine("BYE"); }
        InvokeByAttribute("Command", new[] { "hi" }, new object[] { });
        "#,
    );
    assert_eq!(out, "HI\n");
}

#[test]
fn test_functions_and_recursion() {
    let out = run(
        r#"
        int Fib(int n) {
            if (n < 2) { return n; }
            return Fib(n - 1) + Fib(n - 2);
        }
        Console.WriteLine(Fib(10));
        "#,
    );
    assert_eq!(out, "55\n");
}

#[test]
fn test_user_overloads_prefer_exact() {
    let out = run(
        r#"
        string Tag(int v) { return "int"; }
        string Tag(object v) { return "object"; }
        string Tag(string v) { return "string"; }
        Console.WriteLine(Tag(1));
        Console.WriteLine(Tag("x"));
        Console.WriteLine(Tag(true));
        "#,
    );
    assert_eq!(out, "int\nstring\nobject\n");
}

#[test]
fn test_params_tail() {
    let out = run(
        r#"
        int Sum(params int[] xs) {
            int total = 0;
            foreach (var x in xs) { total = total + x; }
            return total;
        }
        Console.WriteLine(Sum(1, 2, 3));
        Console.WriteLine(Sum());
        int[] given = new[] { 5, 6 };
        Console.WriteLine(Sum(given));
        "#,
    );
    assert_eq!(out, "6\n0\n11\n");
}

#[test]
fn test_optional_and_named_arguments() {
    let out = run(
        r#"
        string Greet(string name = "world") { return "hello " + name; }
        Console.WriteLine(Greet());
        Console.WriteLine(Greet(name: "sable"));
        "#,
    );
    assert_eq!(out, "hello world\nhello sable\n");
}

#[test]
fn test_generics_with_constraints() {
    let out = run(
        r#"
        T Larger<T>(T a, T b) where T : numeric {
            if (a > b) { return a; }
            return b;
        }
        Console.WriteLine(Larger(3, 9));
        Console.WriteLine(Larger(2.5, 1.5));
        "#,
    );
    assert_eq!(out, "9\n2.5\n");
}

#[test]
fn test_switch_with_goto_case() {
    let out = run(
        r#"
        int x = 1;
        switch (x) {
            case 1:
                Console.WriteLine("one");
                goto case 2;
            case 2:
                Console.WriteLine("two");
                break;
            default:
                Console.WriteLine("other");
                break;
        }
        "#,
    );
    assert_eq!(out, "one\ntwo\n");
}

#[test]
fn test_switch_expression_and_patterns() {
    let out = run(
        r#"
        int n = 12;
        var label = n switch {
            1 => "one",
            > 10 when n < 100 => "tens",
            _ => "other",
        };
        Console.WriteLine(label);
        object o = 5;
        if (o is int i and > 3) { Console.WriteLine(i + 1); }
        "#,
    );
    assert_eq!(out, "tens\n6\n");
}

#[test]
fn test_switch_expression_no_match() {
    let out = run("var x = 2 switch { 1 => \"one\" }; Console.WriteLine(x);");
    assert!(out.starts_with("NoMatch:"), "{out}");
}

#[test]
fn test_try_catch_finally() {
    let out = run(
        r#"
        try {
            int z = 1 / 0;
            Console.WriteLine("unreached");
        } catch (DomainError e) {
            Console.WriteLine("caught " + e);
        } finally {
            Console.WriteLine("done");
        }
        "#,
    );
    assert_eq!(out, "caught division by zero\ndone\n");
}

#[test]
fn test_user_throw_and_rethrow() {
    let out = run(
        r#"
        try {
            try {
                throw "boom";
            } catch (Exception e) {
                Console.WriteLine("inner " + e);
                throw;
            }
        } catch {
            Console.WriteLine("outer");
        }
        "#,
    );
    assert_eq!(out, "inner boom\nouter\n");
}

#[test]
fn test_checked_cast_overflow() {
    let out = run(
        r#"
        long big = 2147483648;
        try {
            int y = (int)big;
        } catch (Overflow e) {
            Console.WriteLine("overflow");
        }
        "#,
    );
    assert_eq!(out, "overflow\n");
}

#[test]
fn test_array_indexing_bounds() {
    let out = run(
        r#"
        int[] a = new[] { 10, 20, 30 };
        Console.WriteLine(a[^1]);
        try {
            Console.WriteLine(a[-1]);
        } catch (IndexOutOfRange e) {
            Console.WriteLine("oob");
        }
        "#,
    );
    assert_eq!(out, "30\noob\n");
}

#[test]
fn test_float_division_is_ieee() {
    assert_eq!(run("Console.WriteLine(1.0 / 0.0);"), "Infinity\n");
}

#[test]
fn test_array_linq_surface() {
    let out = run_big(
        r#"
        int[] xs = new[] { 3, 1, 4, 1, 5 };
        Console.WriteLine(xs.Where(x => x % 2 == 1).Count());
        Console.WriteLine(xs.Select(x => x * 10).Sum());
        Console.WriteLine(xs.OrderBy(x => x)[0]);
        Console.WriteLine(xs.Max());
        Console.WriteLine(xs.Distinct().Count());
        Console.WriteLine(xs.Any(x => x > 4));
        Console.WriteLine(xs.All(x => x > 0));
        "#,
    );
    assert_eq!(out, "4\n140\n1\n5\n4\nTrue\nTrue\n");
}

#[test]
fn test_single_semantics() {
    let out = run_big(
        r#"
        int[] xs = new[] { 1, 2, 2 };
        try {
            xs.Single(x => x == 2);
        } catch (DomainError e) {
            Console.WriteLine("many");
        }
        try {
            xs.Single(x => x == 9);
        } catch (DomainError e) {
            Console.WriteLine("none");
        }
        Console.WriteLine(xs.SingleOrDefault(x => x == 9) == null);
        "#,
    );
    assert_eq!(out, "many\nnone\nTrue\n");
}

#[test]
fn test_array_mutation_through_variable() {
    let out = run_big(
        r#"
        int[] xs = new[] { 2, 1 };
        xs.Add(3);
        xs.Sort();
        Console.WriteLine(xs[0] + "," + xs[1] + "," + xs[2]);
        xs.RemoveAt(0);
        Console.WriteLine(xs.Length);
        "#,
    );
    assert_eq!(out, "1,2,3\n2\n");
}

#[test]
fn test_tuples_and_deconstruction() {
    let out = run(
        r#"
        var t = (x: 1, "two");
        Console.WriteLine(t.x);
        Console.WriteLine(t.Item2);
        var (a, b) = t;
        Console.WriteLine(a + "/" + b);
        Console.WriteLine(t);
        "#,
    );
    assert_eq!(out, "1\ntwo\n1/two\n(1, two)\n");
}

#[test]
fn test_dictionaries() {
    let out = run_big(
        r#"
        var ages = new Dictionary<string, int> { {"ana", 31} };
        ages["bo"] = 9;
        ages["bo"] = ages["bo"] + 1;
        Console.WriteLine(ages["bo"]);
        Console.WriteLine(ages.ContainsKey("ana"));
        Console.WriteLine(ages.Count);
        foreach (var kv in ages) {
            if (kv[0] == "ana") { Console.WriteLine("ana=" + kv[1]); }
        }
        ages.Remove("ana");
        Console.WriteLine(ages.Count);
        "#,
    );
    assert_eq!(out, "10\nTrue\n2\nana=31\n1\n");
}

#[test]
fn test_nullables() {
    let out = run(
        r#"
        int? maybe = null;
        Console.WriteLine(maybe.HasValue);
        maybe = 5;
        Console.WriteLine(maybe.Value + 1);
        Console.WriteLine(maybe ?? 0);
        int? gone = null;
        Console.WriteLine(gone ?? 42);
        "#,
    );
    assert_eq!(out, "False\n6\n5\n42\n");
}

#[test]
fn test_enums() {
    let out = run(
        r#"
        enum Color { Red, Green = 5, Blue }
        var c = Color.Blue;
        Console.WriteLine(c);
        Console.WriteLine((int)c);
        Console.WriteLine(c == Color.Blue);
        switch (c) {
            case Color.Red: Console.WriteLine("r"); break;
            case Color.Blue: Console.WriteLine("b"); break;
        }
        "#,
    );
    assert_eq!(out, "Blue\n6\nTrue\nb\n");
}

#[test]
fn test_classes_with_constructor_and_methods() {
    let out = run(
        r#"
        class Counter {
            int total;
            Counter(int start) { this.total = start; }
            int Bump() { this.total = this.total + 1; return this.total; }
        }
        var c = new Counter(5);
        c.Bump();
        Console.WriteLine(c.Bump());
        Console.WriteLine(c.total);
        "#,
    );
    assert_eq!(out, "7\n7\n");
}

#[test]
fn test_struct_defaults_and_ctor_overloads() {
    let out = run(
        r#"
        struct Point {
            int x = 1;
            int y;
            Point(int both) { this.x = both; this.y = both; }
            Point(int x, int y) { this.x = x; this.y = y; }
        }
        Point a = new Point();
        Console.WriteLine(a.x + "," + a.y);
        Point b = new Point(7);
        Console.WriteLine(b.x + "," + b.y);
        Point c = new Point(2, 3);
        Console.WriteLine(Json.Serialize(c));
        "#,
    );
    assert_eq!(out, "1,0\n7,7\n{\"x\":2,\"y\":3}\n");
}

#[test]
fn test_interpolated_strings() {
    let out = run(
        r#"
        int n = 6;
        Console.WriteLine($"n={n}, next={n + 1}!");
        "#,
    );
    assert_eq!(out, "n=6, next=7!\n");
}

#[test]
fn test_namespaces_and_using() {
    let out = run(
        r#"
        namespace App.Util {
            int Twice(int v) { return v * 2; }
        }
        using App.Util;
        Console.WriteLine(Twice(21));
        Console.WriteLine(App.Util.Twice(1));
        "#,
    );
    assert_eq!(out, "42\n2\n");
}

#[test]
fn test_using_disposes_on_all_paths() {
    let out = run(
        r#"
        void Dispose(object r) { Console.WriteLine("disposed " + r); }
        using (var r = 1) {
            Console.WriteLine("body");
        }
        try {
            using (var r = 2) {
                throw "err";
            }
        } catch {
            Console.WriteLine("caught");
        }
        "#,
    );
    assert_eq!(out, "body\ndisposed 1\ndisposed 2\ncaught\n");
}

#[test]
fn test_goto_label() {
    let out = run(
        r#"
        int i = 0;
        again:
        i = i + 1;
        if (i < 3) { goto again; }
        Console.WriteLine(i);
        "#,
    );
    assert_eq!(out, "3\n");
}

#[test]
fn test_loops_break_continue() {
    let out = run(
        r#"
        int sum = 0;
        for (int i = 0; i < 10; i++) {
            if (i % 2 == 0) { continue; }
            if (i > 6) { break; }
            sum = sum + i;
        }
        Console.WriteLine(sum);
        int n = 0;
        do { n = n + 1; } while (n < 3);
        Console.WriteLine(n);
        "#,
    );
    assert_eq!(out, "9\n3\n");
}

#[test]
fn test_foreach_over_string_and_range_slices() {
    let out = run(
        r#"
        string word = "abc";
        foreach (var ch in word) { Console.Write(ch); }
        Console.WriteLine("");
        int[] xs = new[] { 1, 2, 3, 4 };
        int[] mid = xs[1..3];
        Console.WriteLine(mid[0] + "," + mid[1]);
        Console.WriteLine(word[1..]);
        "#,
    );
    assert_eq!(out, "abc\n2,3\nbc\n");
}

#[test]
fn test_decimal_arithmetic() {
    let out = run(
        r#"
        decimal a = 0.1m;
        decimal b = 0.2m;
        Console.WriteLine(a + b);
        Console.WriteLine(10m / 4m);
        "#,
    );
    assert_eq!(out, "0.3\n2.5\n");
}

#[test]
fn test_datetime_arithmetic() {
    let out = run(
        r#"
        DateTime a = (DateTime)"2024-03-05";
        DateTime b = a.AddDays(2);
        Console.WriteLine(b.Day);
        TimeSpan gap = b - a;
        Console.WriteLine(gap.Days);
        Console.WriteLine(b > a);
        "#,
    );
    assert_eq!(out, "7\n2\nTrue\n");
}

#[test]
fn test_compound_assignment_and_increments() {
    let out = run(
        r#"
        int x = 5;
        x += 3;
        x *= 2;
        Console.WriteLine(x);
        Console.WriteLine(x++);
        Console.WriteLine(++x);
        "#,
    );
    assert_eq!(out, "16\n16\n18\n");
}

#[test]
fn test_pointer_surface() {
    let out = run(
        r#"
        int x = 5;
        nint p = &x;
        *p = 9;
        Console.WriteLine(x);
        Console.WriteLine(*p);
        "#,
    );
    assert_eq!(out, "9\n9\n");
}

#[test]
fn test_json_deserialize() {
    let out = run_big(
        r#"
        var data = Json.Deserialize("{\"a\": [1, 2], \"b\": [3]}");
        var a = data["a"];
        Console.WriteLine(a[1]);
        var round = Json.Serialize(data);
        Console.WriteLine(round);
        Console.WriteLine(Json.SerializeXaml(data) == "");
        "#,
    );
    assert_eq!(out, "2\n{\"a\":[1,2],\"b\":[3]}\nTrue\n");
}

#[test]
fn test_string_members() {
    let out = run(
        r#"
        string s = "  Hello, world  ";
        string t = s.Trim();
        Console.WriteLine(t.Length);
        Console.WriteLine(t.Substring(0, 5));
        Console.WriteLine(t.Contains("world"));
        Console.WriteLine(t.Replace("world", "sable"));
        Console.WriteLine("a,b,c".Split(",")[1]);
        "#,
    );
    assert_eq!(out, "13\nHello\nTrue\nHello, sable\nb\n");
}

#[test]
fn test_stack_overflow_is_fatal() {
    // A small stack region trips the limit after a few dozen frames
    let mut interp = Interpreter::with_config(
        CancelToken::none(),
        InterpreterConfig {
            stack_bytes: 256,
            ..InterpreterConfig::default()
        },
    )
    .unwrap();
    let out = interp.interpret(
        r#"
        int Loop(int n) { return Loop(n + 1); }
        try {
            Loop(0);
        } catch {
            Console.WriteLine("should not catch");
        }
        "#,
    );
    assert!(out.starts_with("StackOverflow:"), "{out}");
}

#[test]
fn test_config_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sable.toml");
    std::fs::write(&path, "heap_bytes = 16384\ntrace_frames = 1\n").unwrap();
    let config = InterpreterConfig::from_file(&path).unwrap();
    assert_eq!(config.heap_bytes, 16384);
    assert_eq!(config.trace_frames, 1);
    assert_eq!(config.stack_bytes, 1024);
}

#[test]
fn test_scope_shadowing_rules() {
    let out = run(
        r#"
        int x = 1;
        {
            int x = 2;
            Console.WriteLine(x);
        }
        Console.WriteLine(x);
        try {
            int y = 1;
            int y = 2;
        } catch (NameError e) {
            Console.WriteLine("redeclared");
        }
        "#,
    );
    assert_eq!(out, "2\n1\nredeclared\n");
}

#[test]
fn test_range_intrinsic() {
    let out = run(
        r#"
        int[] up = Range(1, 5);
        Console.WriteLine(up.Length);
        Console.WriteLine(up[0] + "," + up[^1]);
        int[] down = Range(3, 0);
        Console.WriteLine(down[0]);
        "#,
    );
    assert_eq!(out, "4\n1,4\n3\n");
}

#[test]
fn test_math_natives() {
    let out = run(
        r#"
        Console.WriteLine(Math.Abs(-5));
        Console.WriteLine(Math.Max(2.5, 1.0));
        Console.WriteLine(Math.Sqrt(144.0));
        Console.WriteLine(int.Parse("123") + 1);
        "#,
    );
    assert_eq!(out, "5\n2.5\n12\n124\n");
}

#[test]
fn test_out_of_memory_is_fatal() {
    let out = run(
        r#"
        string b = "xxxxxxxxxxxxxxxx";
        try {
            while (true) { b = b + b; }
        } catch {
            Console.WriteLine("should not catch");
        }
        "#,
    );
    assert!(out.starts_with("OutOfMemory:"), "{out}");
}
