//! Interpreter configuration
//!
//! Defaults match the embedding contract (4 KiB heap, 1 KiB stack,
//! 4 000-byte output window, 3 trace frames). Values can come from the
//! environment or from a `sable.toml` project file; unset fields keep
//! their defaults.
//!
//! | Variable             | Default     | Description                     |
//! |----------------------|-------------|---------------------------------|
//! | `SABLE_HEAP_BYTES`   | `4096`      | Heap region size                |
//! | `SABLE_STACK_BYTES`  | `1024`      | Stack region size               |
//! | `SABLE_MAX_OPS`      | `100000000` | Operation cap per interpretation|
//! | `SABLE_OUTPUT_CAP`   | `4000`      | Captured-output byte cap        |
//! | `SABLE_TRACE_FRAMES` | `3`         | Frames shown on failure         |

use crate::meter::MAX_OPERATIONS;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterConfig {
    pub heap_bytes: usize,
    pub stack_bytes: usize,
    pub max_ops: u64,
    pub output_cap: usize,
    pub trace_frames: usize,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        InterpreterConfig {
            heap_bytes: sable_core::DEFAULT_HEAP_BYTES,
            stack_bytes: sable_core::DEFAULT_STACK_BYTES,
            max_ops: MAX_OPERATIONS,
            output_cap: 4000,
            trace_frames: 3,
        }
    }
}

impl InterpreterConfig {
    /// Overlay environment variables onto the defaults.
    pub fn from_env() -> Self {
        let mut config = InterpreterConfig::default();
        if let Some(v) = read_env("SABLE_HEAP_BYTES") {
            config.heap_bytes = v;
        }
        if let Some(v) = read_env("SABLE_STACK_BYTES") {
            config.stack_bytes = v;
        }
        if let Some(v) = read_env("SABLE_MAX_OPS") {
            config.max_ops = v as u64;
        }
        if let Some(v) = read_env("SABLE_OUTPUT_CAP") {
            config.output_cap = v;
        }
        if let Some(v) = read_env("SABLE_TRACE_FRAMES") {
            config.trace_frames = v;
        }
        config
    }

    /// Load a `sable.toml` project file.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
        toml::from_str(&text).map_err(|e| format!("bad config {}: {e}", path.display()))
    }
}

fn read_env(name: &str) -> Option<usize> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults() {
        let c = InterpreterConfig::default();
        assert_eq!(c.heap_bytes, 4096);
        assert_eq!(c.stack_bytes, 1024);
        assert_eq!(c.output_cap, 4000);
        assert_eq!(c.trace_frames, 3);
    }

    #[test]
    #[serial]
    fn test_env_overlay() {
        unsafe {
            std::env::set_var("SABLE_HEAP_BYTES", "65536");
            std::env::set_var("SABLE_TRACE_FRAMES", "5");
        }
        let c = InterpreterConfig::from_env();
        assert_eq!(c.heap_bytes, 65536);
        assert_eq!(c.trace_frames, 5);
        assert_eq!(c.stack_bytes, 1024);
        unsafe {
            std::env::remove_var("SABLE_HEAP_BYTES");
            std::env::remove_var("SABLE_TRACE_FRAMES");
        }
    }

    #[test]
    #[serial]
    fn test_bad_env_values_ignored() {
        unsafe {
            std::env::set_var("SABLE_HEAP_BYTES", "not-a-number");
        }
        let c = InterpreterConfig::from_env();
        assert_eq!(c.heap_bytes, 4096);
        unsafe {
            std::env::remove_var("SABLE_HEAP_BYTES");
        }
    }

    #[test]
    fn test_toml_round_trip() {
        let text = "heap_bytes = 8192\nmax_ops = 1000\n";
        let c: InterpreterConfig = toml::from_str(text).unwrap();
        assert_eq!(c.heap_bytes, 8192);
        assert_eq!(c.max_ops, 1000);
        assert_eq!(c.stack_bytes, 1024);
    }
}
