//! Execution monitor and run reports.
//!
//! The monitor is the only state shared across threads: a host thread may
//! request termination and observe progress while the engine runs on
//! another. Everything else about a run is single-threaded.

use crate::error::{RuntimeError, VmResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The program reached END or ran off its last instruction.
    Completed,
    /// A termination request was observed.
    Terminated,
    /// The graph was built but not executed.
    DispatchOnly,
}

/// Result of a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    /// How the run ended.
    pub outcome: RunOutcome,
    /// Nodes (or instructions, without the accelerator) executed.
    pub executed_nodes: u64,
}

#[derive(Debug, Default)]
struct MonitorState {
    terminator_enabled: AtomicBool,
    termination_requested: AtomicBool,
    executed: AtomicU64,
    current_address: AtomicUsize,
}

/// Cloneable, thread-safe handle onto a running engine.
#[derive(Debug, Clone, Default)]
pub struct Monitor {
    state: Arc<MonitorState>,
}

impl Monitor {
    /// Create a monitor; termination requests are refused unless `terminator_enabled`.
    pub fn new(terminator_enabled: bool) -> Self {
        let monitor = Self::default();
        monitor.set_terminator_enabled(terminator_enabled);
        monitor
    }

    pub(crate) fn set_terminator_enabled(&self, enabled: bool) {
        self.state.terminator_enabled.store(enabled, Ordering::Relaxed);
    }

    /// Whether termination requests are honoured.
    pub fn is_terminator_enabled(&self) -> bool {
        self.state.terminator_enabled.load(Ordering::Relaxed)
    }

    /// Ask the running program to stop after its current node.
    pub fn terminate(&self) -> VmResult<()> {
        if !self.is_terminator_enabled() {
            return Err(RuntimeError::terminator_disabled());
        }
        self.state.termination_requested.store(true, Ordering::Release);
        Ok(())
    }

    /// Whether termination has been requested.
    #[inline(always)]
    pub fn is_termination_requested(&self) -> bool {
        self.state.termination_requested.load(Ordering::Acquire)
    }

    /// Clear the termination request and the progress counters.
    pub fn reset(&self) -> VmResult<()> {
        if !self.is_terminator_enabled() {
            return Err(RuntimeError::terminator_disabled());
        }
        self.state.termination_requested.store(false, Ordering::Release);
        self.state.executed.store(0, Ordering::Relaxed);
        self.state.current_address.store(0, Ordering::Relaxed);
        Ok(())
    }

    /// Number of nodes executed by the current or last run.
    pub fn executed_count(&self) -> u64 {
        self.state.executed.load(Ordering::Relaxed)
    }

    /// Original address of the node most recently executed.
    pub fn current_address(&self) -> usize {
        self.state.current_address.load(Ordering::Relaxed)
    }

    #[inline(always)]
    pub(crate) fn record(&self, address: usize) {
        self.state.executed.fetch_add(1, Ordering::Relaxed);
        self.state.current_address.store(address, Ordering::Relaxed);
    }

    pub(crate) fn begin_run(&self) {
        self.state.executed.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuntimeErrorKind;

    #[test]
    fn test_terminate_requires_terminator() {
        let monitor = Monitor::new(false);
        let err = monitor.terminate().unwrap_err();
        assert_eq!(err.kind, RuntimeErrorKind::TerminatorDisabled);
        assert!(!monitor.is_termination_requested());
    }

    #[test]
    fn test_terminate_and_reset() {
        let monitor = Monitor::new(true);
        monitor.terminate().unwrap();
        assert!(monitor.clone().is_termination_requested());
        monitor.reset().unwrap();
        assert!(!monitor.is_termination_requested());
    }

    #[test]
    fn test_reset_requires_terminator() {
        let monitor = Monitor::new(false);
        monitor.record(4);
        let err = monitor.reset().unwrap_err();
        assert_eq!(err.kind, RuntimeErrorKind::TerminatorDisabled);
        assert_eq!(monitor.executed_count(), 1);
    }

    #[test]
    fn test_progress_counters() {
        let monitor = Monitor::new(false);
        monitor.record(3);
        monitor.record(7);
        assert_eq!(monitor.executed_count(), 2);
        assert_eq!(monitor.current_address(), 7);
        monitor.begin_run();
        assert_eq!(monitor.executed_count(), 0);
    }

    #[test]
    fn test_handle_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Monitor>();
    }
}
