//! procfan - one-shot process fan-out over pipes
//!
//! Computes a pure function over an array of inputs by forking one worker
//! process per element. Each worker sends its result as a single
//! NUL-terminated text message over its own pipe and exits; the coordinator
//! matches the finished worker to its slot and reads that pipe.
//!
//! # Architecture
//!
//! - **Channel fabric**: one pipe per element, allocated before any fork
//! - **Worker**: forked child; closes foreign pipe ends, computes, writes, exits
//! - **Coordinator**: waits for workers in completion order, stores by index
//!
//! Worker identity travels either in the low 8 bits of the exit status
//! (batches of at most 256) or as a tag inside the message.
//!
//! ```no_run
//! let results = procfan::compute_batch(3, &[0.0, 0.5, 1.0]).unwrap();
//! assert_eq!(results.len(), 3);
//! ```

pub mod bindings;
pub mod channel;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod logging;
pub mod message;
pub mod payload;
pub mod report;
pub mod status;
mod worker;

pub use config::{BatchConfig, IdentityEncoding, ParsePolicy};
pub use coordinator::{compute_batch, run_batch};
pub use error::{FanoutError, Result};
pub use payload::{Payload, TaylorSine};
pub use report::{BatchReport, FailureReason, SlotOutcome, WorkerFailure};
