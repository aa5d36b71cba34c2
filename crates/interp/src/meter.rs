//! Execution metering
//!
//! Every evaluator step calls `Meter::check`, which observes the
//! cancellation token, counts operations against the hard cap, and every
//! 1 024 operations asks the caller to re-verify the scope/variable
//! caps. Function entry and exit track call depth against the recursion
//! limit.

use sable_core::error::{ErrorKind, RunResult, err};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Hard cap on evaluator operations per interpretation
pub const MAX_OPERATIONS: u64 = 100_000_000;

/// Hard cap on function call depth
pub const MAX_CALL_DEPTH: u32 = 512;

/// Scope/variable caps are re-verified every this many operations
pub const CAP_CHECK_INTERVAL: u64 = 1024;

/// Cooperative cancellation: a host-owned flag, an optional deadline, or
/// both. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    /// A token that never fires on its own (the host may still cancel).
    pub fn none() -> CancelToken {
        CancelToken::default()
    }

    /// A token that fires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> CancelToken {
        CancelToken {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Trip the token from the host side.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// The message to report when tripped, or None while live.
    pub fn tripped(&self) -> Option<&'static str> {
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Some("Program timed out");
        }
        if self.flag.load(Ordering::Acquire) {
            return Some("Execution was cancelled");
        }
        None
    }
}

/// Per-interpretation counters.
pub struct Meter {
    pub token: CancelToken,
    ops: u64,
    max_ops: u64,
    depth: u32,
}

impl Meter {
    pub fn new(token: CancelToken, max_ops: u64) -> Meter {
        Meter {
            token,
            ops: 0,
            max_ops,
            depth: 0,
        }
    }

    pub fn operations(&self) -> u64 {
        self.ops
    }

    /// One evaluator step. Returns true when the periodic cap re-check
    /// is due.
    pub fn check(&mut self) -> RunResult<bool> {
        if let Some(msg) = self.token.tripped() {
            return Err(err(ErrorKind::Cancelled, msg));
        }
        self.ops += 1;
        if self.ops > self.max_ops {
            return Err(err(
                ErrorKind::ResourceExhausted,
                format!("operation limit of {} exceeded", self.max_ops),
            ));
        }
        Ok(self.ops % CAP_CHECK_INTERVAL == 0)
    }

    pub fn enter_call(&mut self) -> RunResult<()> {
        self.depth += 1;
        if self.depth > MAX_CALL_DEPTH {
            return Err(err(
                ErrorKind::StackOverflow,
                format!("call depth limit of {MAX_CALL_DEPTH} exceeded"),
            ));
        }
        Ok(())
    }

    pub fn exit_call(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_cap() {
        let mut m = Meter::new(CancelToken::none(), 10);
        for _ in 0..10 {
            m.check().unwrap();
        }
        assert_eq!(m.check().unwrap_err().kind, ErrorKind::ResourceExhausted);
    }

    #[test]
    fn test_periodic_recheck_signal() {
        let mut m = Meter::new(CancelToken::none(), MAX_OPERATIONS);
        let mut due = 0;
        for _ in 0..(CAP_CHECK_INTERVAL * 2) {
            if m.check().unwrap() {
                due += 1;
            }
        }
        assert_eq!(due, 2);
    }

    #[test]
    fn test_cancel_flag() {
        let token = CancelToken::none();
        let mut m = Meter::new(token.clone(), MAX_OPERATIONS);
        m.check().unwrap();
        token.cancel();
        let e = m.check().unwrap_err();
        assert_eq!(e.kind, ErrorKind::Cancelled);
        assert_eq!(e.message, "Execution was cancelled");
    }

    #[test]
    fn test_deadline() {
        let token = CancelToken::with_timeout(Duration::from_millis(0));
        let mut m = Meter::new(token, MAX_OPERATIONS);
        let e = m.check().unwrap_err();
        assert_eq!(e.kind, ErrorKind::Cancelled);
        assert_eq!(e.message, "Program timed out");
    }

    #[test]
    fn test_call_depth() {
        let mut m = Meter::new(CancelToken::none(), MAX_OPERATIONS);
        for _ in 0..MAX_CALL_DEPTH {
            m.enter_call().unwrap();
        }
        assert_eq!(m.enter_call().unwrap_err().kind, ErrorKind::StackOverflow);
        m.exit_call();
        assert_eq!(m.depth(), MAX_CALL_DEPTH);
    }
}
