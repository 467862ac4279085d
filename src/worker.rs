//! Worker side of the batch protocol.
//!
//! Everything here runs in a child between `fork` and `_exit`. The child
//! shares the coordinator's memory image but none of its threads, so the
//! code below does not allocate, log, or run destructors of inherited state.
//! It computes one value, sends one message, and exits.

use crate::channel::WriteEnd;
use crate::config::IdentityEncoding;
use crate::message::{self, OVERFLOW_REASON};
use crate::payload::Payload;
use crate::status::{exit_code_for, REPORTED_FAILURE_CODE};
use nix::sys::resource::{setrlimit, Resource};
use std::panic::{self, AssertUnwindSafe};

/// Everything a worker needs, already resolved by the coordinator
pub(crate) struct WorkerTask<'a, P: ?Sized> {
    pub index: usize,
    pub input: f64,
    pub encoding: IdentityEncoding,
    /// Message buffer allocated before the fork
    pub scratch: &'a mut [u8],
    pub payload: &'a P,
}

/// Terminate abnormally.
///
/// Every exit code may be a valid index, so fatal errors leave through a
/// signal where the coordinator cannot mistake them for a result.
fn abort_worker() -> ! {
    std::process::abort()
}

/// Leave the worker with `code`, skipping atexit handlers and stdio flushes
/// inherited from the coordinator.
pub(crate) fn exit_now(code: i32) -> ! {
    // SAFETY: `_exit` is async-signal-safe and touches no user-space state
    unsafe { libc::_exit(code) }
}

fn send(end: &WriteEnd, bytes: &[u8]) {
    if end.write_all(bytes).is_err() {
        abort_worker();
    }
}

/// Run one worker to completion. Never returns.
///
/// `end` is the worker's own write end after every foreign end has been
/// closed; `None` means the fabric was already consumed, which is fatal.
pub(crate) fn run<P>(task: WorkerTask<'_, P>, end: Option<WriteEnd>) -> !
where
    P: Payload + ?Sized,
{
    // Aborts are expected failure paths, not crashes worth a core file
    let _ = setrlimit(Resource::RLIMIT_CORE, 0, 0);

    let Some(end) = end else {
        abort_worker();
    };

    let WorkerTask {
        index,
        input,
        encoding,
        scratch,
        payload,
    } = task;

    // A panic still runs the process-wide panic hook before it is caught
    // here. See `Payload` for why a payload must not rely on that.
    let value = match panic::catch_unwind(AssertUnwindSafe(|| payload.compute(input))) {
        Ok(value) => value,
        Err(_) => abort_worker(),
    };

    let code = match encoding {
        IdentityEncoding::ExitStatus => {
            let Ok(len) = message::encode_value(scratch, value) else {
                abort_worker();
            };
            send(&end, &scratch[..len]);
            exit_code_for(index)
        }
        IdentityEncoding::Tagged => match message::encode_ok(scratch, index, value) {
            Ok(len) => {
                send(&end, &scratch[..len]);
                0
            }
            Err(_) => {
                let Ok(len) = message::encode_err(scratch, index, OVERFLOW_REASON) else {
                    abort_worker();
                };
                send(&end, &scratch[..len]);
                REPORTED_FAILURE_CODE
            }
        },
    };

    drop(end);
    exit_now(code)
}
