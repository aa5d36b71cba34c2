//! The embedding API
//!
//! `Interpreter` is what a host constructs: a cancellation token, an
//! optional configuration, `register_native` / `declare` to shape the
//! surface, then `interpret` per program. Interpretation never panics
//! and never returns `Err`: the captured output plus the first failure
//! message *is* the result.

use crate::config::InterpreterConfig;
use crate::dispatch::{HostValue, NativeFn};
use crate::eval::Interp;
use crate::meter::{CancelToken, Meter};
use crate::natives::{self, Output};
use crate::parser;
use crate::stdlib;
use sable_core::error::{RunResult, RuntimeError};
use sable_core::kind::Kind;
use sable_core::stats::MemoryReport;
use sable_runtime::coerce;

pub struct Interpreter {
    interp: Interp,
    token: CancelToken,
    config: InterpreterConfig,
}

impl Interpreter {
    /// Construct with the default arena (4 KiB heap, 1 KiB stack).
    pub fn new(token: CancelToken) -> RunResult<Interpreter> {
        Interpreter::with_config(token, InterpreterConfig::default())
    }

    pub fn with_config(token: CancelToken, config: InterpreterConfig) -> RunResult<Interpreter> {
        let mut interp = Interp::new(
            token.clone(),
            config.heap_bytes,
            config.stack_bytes,
            config.max_ops,
            config.output_cap,
            false,
        )?;
        stdlib::register(&mut interp.natives);
        // The global scope lives as long as the interpreter: host
        // declarations land here and survive across interpretations
        interp.mem.enter_scope()?;
        Ok(Interpreter { interp, token, config })
    }

    /// Add a callback under a dotted name; repeated registrations under
    /// one name form an overload set.
    pub fn register_native(&mut self, name: &str, callback: NativeFn) {
        self.interp.natives.register(name, callback);
    }

    /// Preload a host-visible value into the global scope.
    pub fn declare(&mut self, name: &str, kind: Kind, value: HostValue) -> RunResult<()> {
        let v = natives::from_host(&mut self.interp.mem, value)?;
        let v = if v.is_null() {
            v
        } else {
            coerce::cast(&mut self.interp.mem, v, kind)?
        };
        let var = self.interp.mem.scopes.declare(name, kind)?;
        if kind.is_reference() {
            self.interp.mem.arena.write_i32(var.addr, sable_core::NULL_PTR)?;
        } else {
            self.interp.mem.arena.fill(var.addr, var.size, 0)?;
        }
        if !v.is_null() {
            v.write_cell(&mut self.interp.mem, var.addr, kind)?;
        }
        Ok(())
    }

    /// Parse then evaluate, returning the captured output (capped) plus
    /// the first failure message.
    pub fn interpret(&mut self, source: &str) -> String {
        self.interpret_with(source, false, false, false)
    }

    pub fn interpret_with(
        &mut self,
        source: &str,
        echo: bool,
        print_tree: bool,
        dump_memory: bool,
    ) -> String {
        self.interp.out = Output::new(self.config.output_cap, echo);
        self.interp.meter = Meter::new(self.token.clone(), self.config.max_ops);
        self.interp.frames.clear();
        self.interp.current_catch = None;

        match parser::parse_program(source) {
            Err(message) => {
                self.interp.out.push(&format!("ParseError: {message}\n"));
            }
            Ok(tree) => {
                if print_tree {
                    self.interp.out.push(&format!("{tree:#?}\n"));
                }
                tracing::debug!(bytes = source.len(), "interpreting program");
                if let Err(e) = self.interp.run_program(&tree) {
                    let text = self.format_error(&e);
                    self.interp.out.push(&text);
                }
            }
        }
        if dump_memory {
            let report = serde_json::to_string(&self.memory_report())
                .unwrap_or_else(|e| format!("report failed: {e}"));
            self.interp.out.push(&format!("\n{report}\n"));
        }
        std::mem::replace(&mut self.interp.out, Output::new(self.config.output_cap, false))
            .into_text()
    }

    /// `Label: message` plus a trimmed frame window.
    fn format_error(&self, e: &RuntimeError) -> String {
        let mut text = format!("{e}\n");
        for frame in e.frames.iter().take(self.config.trace_frames) {
            text.push_str(&format!("  at {frame}\n"));
        }
        text
    }

    pub fn memory_report(&self) -> MemoryReport {
        self.interp.mem.report()
    }

    /// Direct access for embedding tests and tooling.
    pub fn interp(&mut self) -> &mut Interp {
        &mut self.interp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stdlib::native_fn;

    fn run(source: &str) -> String {
        let mut interp = Interpreter::new(CancelToken::none()).unwrap();
        interp.interpret(source)
    }

    #[test]
    fn test_hello() {
        assert_eq!(run(r#"Console.WriteLine("hi");"#), "hi\n");
    }

    #[test]
    fn test_first_failure_reported() {
        let out = run("int x = 1 / 0;");
        assert!(out.starts_with("DomainError: division by zero"), "{out}");
    }

    #[test]
    fn test_parse_error_carried_opaquely() {
        let out = run("int x = ;");
        assert!(out.starts_with("ParseError: parse error at 1:"), "{out}");
    }

    #[test]
    fn test_output_cap() {
        let mut interp = Interpreter::with_config(
            CancelToken::none(),
            InterpreterConfig {
                output_cap: 10,
                max_ops: 10_000,
                ..InterpreterConfig::default()
            },
        )
        .unwrap();
        let out = interp.interpret(r#"while (true) { Console.Write("xxxx"); }"#);
        // the op meter stops the loop; output stays capped
        assert!(out.starts_with("xxxxxxxxxx"), "{out}");
        assert!(out.len() <= 10, "{}", out.len());
    }

    #[test]
    fn test_host_declared_value() {
        let mut interp = Interpreter::new(CancelToken::none()).unwrap();
        interp.declare("seed", Kind::Int, HostValue::Int(41)).unwrap();
        assert_eq!(interp.interpret("Console.WriteLine(seed + 1);"), "42\n");
    }

    #[test]
    fn test_registered_native_overloads() {
        let mut interp = Interpreter::new(CancelToken::none()).unwrap();
        interp.register_native(
            "Add",
            native_fn(&[("a", Kind::Int), ("b", Kind::Int)], |_, args| {
                let (HostValue::Int(a), HostValue::Int(b)) = (&args[0], &args[1]) else {
                    return Err("expected ints".into());
                };
                Ok(HostValue::Int(a + b))
            }),
        );
        interp.register_native(
            "Add",
            native_fn(&[("a", Kind::Str), ("b", Kind::Str)], |_, args| {
                let (HostValue::Str(a), HostValue::Str(b)) = (&args[0], &args[1]) else {
                    return Err("expected strings".into());
                };
                Ok(HostValue::Str(format!("{a}{b}")))
            }),
        );
        let out = interp.interpret(
            r#"Console.WriteLine(Add(1, 2)); Console.WriteLine(Add("a", "b"));"#,
        );
        assert_eq!(out, "3\nab\n");
    }

    #[test]
    fn test_native_failure_surfaces() {
        let mut interp = Interpreter::new(CancelToken::none()).unwrap();
        interp.register_native(
            "Boom",
            native_fn(&[], |_, _| Err("exploded".into())),
        );
        let out = interp.interpret("Boom();");
        assert!(out.contains("NativeFailure"), "{out}");
        assert!(out.contains("exploded"), "{out}");
    }

    #[test]
    fn test_globals_survive_across_interpretations() {
        let mut interp = Interpreter::new(CancelToken::none()).unwrap();
        interp.declare("counter", Kind::Int, HostValue::Int(1)).unwrap();
        interp.interpret("counter = counter + 1;");
        assert_eq!(interp.interpret("Console.WriteLine(counter);"), "2\n");
    }
}
