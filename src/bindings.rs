//! C Bindings for procfan
//!
//! Provides a raw C API for running a Taylor-sine batch.

use crate::config::{BatchConfig, IdentityEncoding, ParsePolicy};
use crate::coordinator::run_batch;
use crate::payload::TaylorSine;
use std::slice;
use std::time::Duration;

/// A pointer argument was null
pub const PROCFAN_ERR_NULL: i32 = -1;
/// The batch was aborted (setup, wait or read failure, invalid config)
pub const PROCFAN_ERR_BATCH: i32 = -2;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ProcfanConfig {
    /// Message capacity in bytes, terminator included
    pub max_message_len: usize,
    /// Carry the index in the message instead of the exit status
    pub tagged: bool,
    /// Fail slots whose message is not a number instead of reading 0
    pub strict: bool,
    /// Kill workers after this many milliseconds; 0 waits forever
    pub timeout_ms: u64,
}

impl From<ProcfanConfig> for BatchConfig {
    fn from(config: ProcfanConfig) -> Self {
        Self {
            max_message_len: config.max_message_len,
            encoding: if config.tagged {
                IdentityEncoding::Tagged
            } else {
                IdentityEncoding::ExitStatus
            },
            parse_policy: if config.strict {
                ParsePolicy::Strict
            } else {
                ParsePolicy::Lenient
            },
            timeout: (config.timeout_ms > 0).then(|| Duration::from_millis(config.timeout_ms)),
            ..BatchConfig::default()
        }
    }
}

/// Default configuration
#[no_mangle]
pub extern "C" fn procfan_default_config() -> ProcfanConfig {
    let defaults = BatchConfig::default();
    ProcfanConfig {
        max_message_len: defaults.max_message_len,
        tagged: false,
        strict: false,
        timeout_ms: 0,
    }
}

/// Compute the Taylor sine of `len` inputs, one worker process each.
///
/// Writes `len` values to `results`; failed slots are written as 0.
/// Returns the number of failed slots, or a negative `PROCFAN_ERR_*` code.
///
/// # Safety
/// `inputs` and `results` must point to `len` valid doubles.
#[no_mangle]
pub unsafe extern "C" fn procfan_compute_batch(
    terms: u32,
    inputs: *const f64,
    len: usize,
    results: *mut f64,
) -> i32 {
    procfan_run_batch(
        procfan_default_config(),
        terms,
        inputs,
        len,
        results,
        std::ptr::null_mut(),
    )
}

/// Like [`procfan_compute_batch`] with an explicit configuration.
///
/// When `filled` is non-null it receives `len` flags, true for slots that
/// hold a computed value.
///
/// # Safety
/// `inputs` and `results` must point to `len` valid doubles; `filled`, when
/// non-null, to `len` bools.
#[no_mangle]
pub unsafe extern "C" fn procfan_run_batch(
    config: ProcfanConfig,
    terms: u32,
    inputs: *const f64,
    len: usize,
    results: *mut f64,
    filled: *mut bool,
) -> i32 {
    if len > 0 && (inputs.is_null() || results.is_null()) {
        return PROCFAN_ERR_NULL;
    }
    if len == 0 {
        return 0;
    }

    let inputs = slice::from_raw_parts(inputs, len);
    let results = slice::from_raw_parts_mut(results, len);

    let report = match run_batch(&config.into(), &TaylorSine::new(terms), inputs) {
        Ok(report) => report,
        Err(e) => {
            tracing::error!("{}", e);
            return PROCFAN_ERR_BATCH;
        }
    };

    for (out, value) in results.iter_mut().zip(report.values()) {
        *out = value;
    }
    if !filled.is_null() {
        let filled = slice::from_raw_parts_mut(filled, len);
        for (flag, slot) in filled.iter_mut().zip(report.slots()) {
            *flag = slot.value().is_some();
        }
    }

    i32::try_from(report.failures().count()).unwrap_or(i32::MAX)
}
