//! Per-slot batch outcomes.

use crate::status::TerminationReason;
use nix::unistd::Pid;
use std::fmt;

/// Why a slot holds no value
#[derive(Debug, Clone, PartialEq)]
pub enum FailureReason {
    /// Worker did not exit normally (signal, abort)
    Terminated(TerminationReason),
    /// Worker was killed after the batch deadline
    TimedOut,
    /// Message could not be decoded
    Malformed(String),
    /// Worker sent an `err` message
    WorkerReported(String),
    /// Identity decoded from the worker disagrees with the one it was spawned with
    IdentityMismatch { expected: usize, got: usize },
    /// Worker disappeared without being reaped by the coordinator
    Lost,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Terminated(reason) => write!(f, "{}", reason),
            Self::TimedOut => write!(f, "timed out"),
            Self::Malformed(detail) => write!(f, "malformed message: {}", detail),
            Self::WorkerReported(detail) => write!(f, "worker reported: {}", detail),
            Self::IdentityMismatch { expected, got } => {
                write!(f, "identity mismatch: spawned as {}, reported {}", expected, got)
            }
            Self::Lost => write!(f, "lost"),
        }
    }
}

/// A failed slot
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerFailure {
    /// Slot index
    pub index: usize,
    /// Worker process, when known
    pub pid: Option<Pid>,
    pub reason: FailureReason,
}

impl fmt::Display for WorkerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Worker {}", self.index)?;
        if let Some(pid) = self.pid {
            write!(f, " (pid {})", pid)?;
        }
        write!(f, " {}", self.reason)
    }
}

/// Outcome of one slot
#[derive(Debug, Clone, PartialEq)]
pub enum SlotOutcome {
    Value(f64),
    Failed(WorkerFailure),
}

impl SlotOutcome {
    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Value(v) => Some(*v),
            Self::Failed(_) => None,
        }
    }
}

/// Index-aligned outcomes of a batch
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    slots: Vec<SlotOutcome>,
}

impl BatchReport {
    pub(crate) fn new(slots: Vec<SlotOutcome>) -> Self {
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[SlotOutcome] {
        &self.slots
    }

    /// Value of slot `index`, `None` if it failed or is out of range
    pub fn value(&self, index: usize) -> Option<f64> {
        self.slots.get(index).and_then(SlotOutcome::value)
    }

    /// Failed slots in index order
    pub fn failures(&self) -> impl Iterator<Item = &WorkerFailure> {
        self.slots.iter().filter_map(|slot| match slot {
            SlotOutcome::Failed(failure) => Some(failure),
            SlotOutcome::Value(_) => None,
        })
    }

    /// Whether every slot holds a value
    pub fn is_complete(&self) -> bool {
        self.failures().next().is_none()
    }

    /// Result array with failed slots left at `0.0`
    pub fn values(&self) -> Vec<f64> {
        self.slots
            .iter()
            .map(|slot| slot.value().unwrap_or_default())
            .collect()
    }

    pub fn into_values(self) -> Vec<f64> {
        self.values()
    }
}
