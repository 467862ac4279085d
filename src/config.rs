//! Batch configuration

use crate::error::{FanoutError, Result};
use std::time::Duration;

/// Default message capacity in bytes, terminator included
pub const DEFAULT_MESSAGE_LEN: usize = 100;

/// Smallest usable message: one digit plus the terminator
pub const MIN_MESSAGE_LEN: usize = 2;

/// Largest message; bounded by `PIPE_BUF` so a worker's write is atomic
pub const MAX_MESSAGE_LEN: usize = 4096;

/// Number of distinct indices an exit status can carry
pub const EXIT_STATUS_IDENTITIES: usize = 256;

/// Default poll interval used while a timeout is armed
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// How a finished worker is matched to its result slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IdentityEncoding {
    /// Index carried in the low 8 bits of the worker's exit status.
    ///
    /// Batches are limited to [`EXIT_STATUS_IDENTITIES`] workers.
    #[default]
    ExitStatus,
    /// Index carried inside the message (`ok <index> <value>`), no size limit
    Tagged,
}

/// How message text is turned back into a number
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ParsePolicy {
    /// Longest numeric prefix, `0.0` when there is none
    #[default]
    Lenient,
    /// Whole text must be a number, otherwise the slot fails
    Strict,
}

/// Batch configuration
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Message capacity in bytes, including the NUL terminator
    pub max_message_len: usize,
    /// Worker identity encoding
    pub encoding: IdentityEncoding,
    /// Parse policy for result text
    pub parse_policy: ParsePolicy,
    /// Kill workers still running after this long; `None` waits forever
    pub timeout: Option<Duration>,
    /// Wait poll interval, only used while `timeout` is set
    pub poll_interval: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_message_len: DEFAULT_MESSAGE_LEN,
            encoding: IdentityEncoding::default(),
            parse_policy: ParsePolicy::default(),
            timeout: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl BatchConfig {
    /// Configuration using in-message tags instead of exit statuses
    pub fn tagged() -> Self {
        Self {
            encoding: IdentityEncoding::Tagged,
            ..Self::default()
        }
    }

    /// Largest batch this configuration accepts, `None` when unbounded
    pub fn max_batch(&self) -> Option<usize> {
        match self.encoding {
            IdentityEncoding::ExitStatus => Some(EXIT_STATUS_IDENTITIES),
            IdentityEncoding::Tagged => None,
        }
    }

    /// Check the configuration against a batch of `n` items
    pub fn validate(&self, n: usize) -> Result<()> {
        if !(MIN_MESSAGE_LEN..=MAX_MESSAGE_LEN).contains(&self.max_message_len) {
            return Err(FanoutError::InvalidConfig(format!(
                "max_message_len must be in {}..={}, got {}",
                MIN_MESSAGE_LEN, MAX_MESSAGE_LEN, self.max_message_len
            )));
        }

        if self.timeout.is_some() && self.poll_interval.is_zero() {
            return Err(FanoutError::InvalidConfig(
                "poll_interval must be non-zero when a timeout is set".into(),
            ));
        }

        if let Some(max) = self.max_batch() {
            if n > max {
                return Err(FanoutError::BatchTooLarge { max, got: n });
            }
        }

        Ok(())
    }
}
