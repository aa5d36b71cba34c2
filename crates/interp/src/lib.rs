//! Sable Interp: the sandboxed interpreter front end
//!
//! Parses C-like source, walks the tree over the `sable-runtime` value
//! model and the `sable-core` arena, and brokers calls between
//! interpreted code and host-declared native callbacks.
//!
//! # Embedding
//!
//! ```no_run
//! use sablei::{CancelToken, Interpreter};
//!
//! let mut interp = Interpreter::new(CancelToken::none()).unwrap();
//! let output = interp.interpret(r#"Console.WriteLine("hi");"#);
//! assert_eq!(output, "hi\n");
//! ```
//!
//! # Modules
//!
//! - `lexer` / `parser` / `ast`: source text to the closed node set
//! - `eval`: the tree-walking evaluator and its signal model
//! - `dispatch`: name resolution, overload scoring, registries
//! - `members`: builtin per-kind members and intrinsics
//! - `natives`: the host-callback adapter (`HostValue` marshalling)
//! - `stdlib`: the built-in native battery
//! - `meter`: cancellation and operation/depth metering
//! - `config`: defaults, environment and `sable.toml`
//! - `interpreter`: the embedding API

pub mod ast;
pub mod config;
pub mod dispatch;
pub mod eval;
pub mod interpreter;
pub mod lexer;
pub mod members;
pub mod meter;
pub mod natives;
pub mod parser;
pub mod stdlib;

pub use config::InterpreterConfig;
pub use dispatch::{HostValue, NativeFn, NativeParam};
pub use interpreter::Interpreter;
pub use meter::CancelToken;
pub use natives::NativeCtx;
pub use sable_core::error::{ErrorKind, RunResult, RuntimeError};
pub use sable_core::kind::Kind;
pub use stdlib::native_fn;
