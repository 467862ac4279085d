//! Worker termination analysis and exit-status identity encoding.

use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;

/// Exit code of a tagged-mode worker that reported a failure in its message
pub const REPORTED_FAILURE_CODE: i32 = 1;

/// Exit code that carries `index` in the low 8 bits.
///
/// Indices 256 apart collide: 256 encodes as 0, 257 as 1.
pub fn exit_code_for(index: usize) -> i32 {
    (index & 0xFF) as i32
}

/// Recover an index from an exit code
pub fn index_from_exit_code(code: i32) -> usize {
    (code & 0xFF) as usize
}

/// Why a worker process terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Normal exit with status code.
    Exited(i32),
    /// Killed by signal.
    Signaled(Signal),
    /// Still running, stopped or continued.
    NotTerminated,
}

impl TerminationReason {
    /// Get a human-readable description.
    pub fn description(&self) -> String {
        match self {
            Self::Exited(code) => format!("exited with code {}", code),
            Self::Signaled(Signal::SIGABRT) => "aborted (SIGABRT)".to_string(),
            Self::Signaled(sig) => format!("killed by signal {:?}", sig),
            Self::NotTerminated => "not terminated".to_string(),
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Analyze a `WaitStatus` to determine the termination reason.
pub fn analyze_wait_status(status: WaitStatus) -> TerminationReason {
    match status {
        WaitStatus::Exited(_, code) => TerminationReason::Exited(code),
        WaitStatus::Signaled(_, signal, _) => TerminationReason::Signaled(signal),
        _ => TerminationReason::NotTerminated,
    }
}
