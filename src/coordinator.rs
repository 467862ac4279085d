//! Coordinator: fans a batch out to one forked worker per element and
//! collects the results.
//!
//! # Protocol
//!
//! ```text
//!   allocate N channels
//!   for i in 0..N:  fork ──► child: isolate(i), compute, write, _exit(i & 0xFF)
//!                   parent: close write end i, record pid -> i
//!   repeat until every worker is accounted for:
//!       wait for any worker of this batch
//!       signaled   -> slot fails, channel closed unread
//!       exited(c)  -> index = c & 0xFF, read channel[index], parse, close
//! ```
//!
//! Results are discovered in completion order and stored by index, so the
//! returned array does not depend on scheduling.
//!
//! Workers of one batch share a process group led by the first worker. The
//! coordinator waits on that group only, so several batches can run in one
//! process (threads, test harnesses) without reaping each other's children.
//!
//! A worker inherits every descriptor its coordinator's process holds at
//! fork time, including write ends owned by other batches. Channel
//! allocation and the fork loop therefore run under one process-wide lock:
//! when a batch releases it, the coordinator holds only read ends, so a
//! later fork can never keep another batch's channel open. Processes
//! spawned through `exec` drop every end, since all pipes are close-on-exec.

use crate::channel::ChannelFabric;
use crate::config::{BatchConfig, IdentityEncoding};
use crate::error::{FanoutError, Result};
use crate::message;
use crate::payload::{Payload, TaylorSine};
use crate::report::{BatchReport, FailureReason, SlotOutcome, WorkerFailure};
use crate::status::{analyze_wait_status, index_from_exit_code, TerminationReason};
use crate::worker::{self, WorkerTask};
use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, setpgid, ForkResult, Pid};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Instant;

/// Held from channel allocation until every write end has left the
/// coordinator's process.
static SPAWN_WINDOW: Mutex<()> = Mutex::new(());

/// Spawned workers not yet reaped.
///
/// Dropping the set kills and reaps whatever is still running, so an early
/// return never leaves workers behind.
struct WorkerSet {
    by_pid: HashMap<Pid, usize>,
    group: Option<Pid>,
}

impl WorkerSet {
    fn with_capacity(n: usize) -> Self {
        Self {
            by_pid: HashMap::with_capacity(n),
            group: None,
        }
    }

    /// Process group of this batch, once the first worker exists
    fn group(&self) -> Option<Pid> {
        self.group
    }

    fn record(&mut self, index: usize, pid: Pid) {
        self.group.get_or_insert(pid);
        self.by_pid.insert(pid, index);
    }

    fn outstanding(&self) -> usize {
        self.by_pid.len()
    }

    /// Forget a reaped worker, returning the slot it was spawned for
    fn reap(&mut self, pid: Pid) -> Option<usize> {
        self.by_pid.remove(&pid)
    }

    /// Forget every worker; used when the kernel says none are left to reap
    fn abandon(&mut self) -> Vec<(usize, Pid)> {
        let mut lost: Vec<_> = self.by_pid.drain().map(|(pid, index)| (index, pid)).collect();
        lost.sort_unstable_by_key(|&(index, _)| index);
        lost
    }

    fn kill_all(&self) {
        if let Some(group) = self.group {
            let _ = killpg(group, Signal::SIGKILL);
        }
    }
}

impl Drop for WorkerSet {
    fn drop(&mut self) {
        for (&pid, _) in self.by_pid.iter() {
            let _ = kill(pid, Signal::SIGKILL);
            while let Err(Errno::EINTR) = waitpid(pid, None) {}
        }
    }
}

/// Put the calling process into `group`, or make it a new group leader
fn join_group(pid: Pid, group: Option<Pid>) -> nix::Result<()> {
    setpgid(pid, group.unwrap_or(pid))
}

/// Run `payload` over `inputs`, one forked worker per element.
///
/// Returns one outcome per input, index-aligned. Setup failures (channels,
/// fork), wait failures and channel read failures abort the batch; a worker
/// that dies, times out or sends an unusable message only fails its slot.
pub fn run_batch<P>(config: &BatchConfig, payload: &P, inputs: &[f64]) -> Result<BatchReport>
where
    P: Payload + ?Sized,
{
    config.validate(inputs.len())?;

    let started = Instant::now();
    let n = inputs.len();
    let spawn_window = SPAWN_WINDOW.lock().unwrap_or_else(PoisonError::into_inner);
    let mut fabric = ChannelFabric::allocate(n)?;
    let mut workers = WorkerSet::with_capacity(n);
    let mut scratch = vec![0u8; config.max_message_len];

    for (index, &input) in inputs.iter().enumerate() {
        let group = workers.group();

        // SAFETY: the child only touches memory it inherited, closes
        // descriptors, writes one message and calls `_exit`.
        match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                let _ = join_group(Pid::from_raw(0), group);
                let end = fabric.isolate(index);
                let task = WorkerTask {
                    index,
                    input,
                    encoding: config.encoding,
                    scratch: scratch.as_mut_slice(),
                    payload,
                };
                worker::run(task, end)
            }
            Ok(ForkResult::Parent { child }) => {
                // Mirrors the child's own call; whichever runs first wins
                let _ = join_group(child, group);
                drop(fabric.take_write(index));
                workers.record(index, child);
                tracing::debug!(index, pid = %child, "Spawned worker");
            }
            Err(e) => {
                return Err(FanoutError::Spawn {
                    index,
                    source: e.into(),
                })
            }
        }
    }

    // Only read ends are left on this side
    debug_assert_eq!(fabric.open_ends(), n);
    drop(spawn_window);

    let mut slots: Vec<Option<SlotOutcome>> = (0..n).map(|_| None).collect();
    let mut buf = vec![0u8; config.max_message_len];
    let deadline = config.timeout.map(|timeout| started + timeout);
    let mut timed_out = false;

    while workers.outstanding() > 0 {
        let Some(group) = workers.group() else {
            break;
        };
        let flags = (deadline.is_some() && !timed_out).then_some(WaitPidFlag::WNOHANG);

        let status = match waitpid(Pid::from_raw(-group.as_raw()), flags) {
            Ok(WaitStatus::StillAlive) => {
                if deadline.map_or(false, |d| Instant::now() >= d) {
                    tracing::warn!(
                        outstanding = workers.outstanding(),
                        "Batch deadline passed, killing remaining workers"
                    );
                    workers.kill_all();
                    timed_out = true;
                } else {
                    thread::sleep(config.poll_interval);
                }
                continue;
            }
            Ok(status) => status,
            Err(Errno::EINTR) => continue,
            Err(Errno::ECHILD) => {
                for (index, pid) in workers.abandon() {
                    let failure = WorkerFailure {
                        index,
                        pid: Some(pid),
                        reason: FailureReason::Lost,
                    };
                    tracing::warn!("{}", failure);
                    slots[index] = Some(SlotOutcome::Failed(failure));
                }
                break;
            }
            Err(e) => return Err(FanoutError::Wait(e.into())),
        };

        let Some(pid) = status.pid() else {
            continue;
        };
        let reason = analyze_wait_status(status);
        if reason == TerminationReason::NotTerminated {
            continue;
        }
        let Some(slot) = workers.reap(pid) else {
            continue;
        };

        let outcome = match reason {
            TerminationReason::Exited(code) => {
                collect(config, &mut fabric, &mut buf, slot, pid, code)?
            }
            _ => {
                // Nothing to read from a worker that never finished
                drop(fabric.take_read(slot));
                let reason = match reason {
                    TerminationReason::Signaled(Signal::SIGKILL) if timed_out => {
                        FailureReason::TimedOut
                    }
                    other => FailureReason::Terminated(other),
                };
                SlotOutcome::Failed(WorkerFailure {
                    index: slot,
                    pid: Some(pid),
                    reason,
                })
            }
        };

        match &outcome {
            SlotOutcome::Value(value) => {
                tracing::debug!(index = slot, pid = %pid, value, "Collected result");
            }
            SlotOutcome::Failed(failure) => tracing::warn!("{}", failure),
        }
        slots[slot] = Some(outcome);
    }

    let slots: Vec<SlotOutcome> = slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.unwrap_or(SlotOutcome::Failed(WorkerFailure {
                index,
                pid: None,
                reason: FailureReason::Lost,
            }))
        })
        .collect();
    let report = BatchReport::new(slots);

    tracing::info!(
        workers = n,
        failed = report.failures().count(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Batch complete"
    );

    Ok(report)
}

/// Read and decode the message of a worker that exited with `code`.
///
/// `slot` is where the worker was spawned. In exit-status mode the index is
/// decoded from `code` and must agree with it.
fn collect(
    config: &BatchConfig,
    fabric: &mut ChannelFabric,
    buf: &mut [u8],
    slot: usize,
    pid: Pid,
    code: i32,
) -> Result<SlotOutcome> {
    let index = match config.encoding {
        IdentityEncoding::ExitStatus => index_from_exit_code(code),
        IdentityEncoding::Tagged => slot,
    };

    let failed = |reason| {
        SlotOutcome::Failed(WorkerFailure {
            index: slot,
            pid: Some(pid),
            reason,
        })
    };

    if index != slot {
        drop(fabric.take_read(slot));
        return Ok(failed(FailureReason::IdentityMismatch {
            expected: slot,
            got: index,
        }));
    }

    let Some(read) = fabric.take_read(index) else {
        return Ok(failed(FailureReason::Lost));
    };
    let len = read
        .read_message(buf)
        .map_err(|source| FanoutError::Read { index, source })?;
    drop(read);

    Ok(
        match message::decode(&buf[..len], config.encoding, config.parse_policy, index) {
            Ok(value) => SlotOutcome::Value(value),
            Err(reason) => failed(reason),
        },
    )
}

/// Taylor-series sine of every input, computed by one worker per element.
///
/// Uses the default configuration. Slots whose worker failed hold `0.0`.
pub fn compute_batch(terms: u32, inputs: &[f64]) -> Result<Vec<f64>> {
    run_batch(&BatchConfig::default(), &TaylorSine::new(terms), inputs).map(BatchReport::into_values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParsePolicy;
    use crate::payload::sin_taylor;
    use crate::status::exit_code_for;
    use nix::sys::signal::raise;
    use std::f64::consts::PI;
    use std::sync::Mutex;
    use std::time::Duration;

    // Batches of a few hundred workers each hold two descriptors per item;
    // running two at once can exhaust a 1024-descriptor limit.
    static LARGE_BATCH: Mutex<()> = Mutex::new(());

    #[test]
    fn test_reference_scenario() {
        let inputs = [0.0, PI / 6.0, PI / 3.0, 0.314];
        let results = compute_batch(3, &inputs).unwrap();

        assert_eq!(results.len(), 4);
        assert_eq!(results[0], 0.0);
        assert!((results[1] - 0.5).abs() < 1e-7);
        assert!((results[2] - 0.8660254037844386).abs() < 1e-4);
        assert!((results[3] - 0.314f64.sin()).abs() < 1e-6);

        for (x, y) in inputs.iter().zip(&results) {
            assert_eq!(y.to_bits(), sin_taylor(*x, 3).to_bits());
        }
    }

    #[test]
    fn test_empty_batch() {
        let report = run_batch(&BatchConfig::default(), &TaylorSine::new(3), &[]).unwrap();
        assert!(report.is_empty());
    }

    #[test]
    fn test_deterministic_across_runs() {
        let inputs: Vec<f64> = (0..32).map(|i| f64::from(i) * 0.1 - 1.6).collect();
        let first = compute_batch(6, &inputs).unwrap();
        let second = compute_batch(6, &inputs).unwrap();

        let bits = |v: &[f64]| v.iter().map(|x| x.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&first), bits(&second));
    }

    #[test]
    fn test_results_are_index_aligned() {
        // Later workers finish first, so completion order is reversed
        let inputs: Vec<f64> = (0..8).map(f64::from).collect();
        let payload = |x: f64| {
            thread::sleep(Duration::from_millis((8.0 - x) as u64 * 5));
            x * 10.0
        };
        let report = run_batch(&BatchConfig::default(), &payload, &inputs).unwrap();
        assert!(report.is_complete());
        assert_eq!(report.values(), inputs.iter().map(|x| x * 10.0).collect::<Vec<_>>());
    }

    #[test]
    fn test_signaled_worker_fails_only_its_slot() {
        let payload = |x: f64| {
            if x == 2.0 {
                let _ = raise(Signal::SIGKILL);
            }
            x + 0.5
        };
        let report = run_batch(&BatchConfig::default(), &payload, &[0.0, 1.0, 2.0, 3.0]).unwrap();

        assert_eq!(report.values(), vec![0.5, 1.5, 0.0, 3.5]);
        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].index, 2);
        assert_eq!(
            failures[0].reason,
            FailureReason::Terminated(TerminationReason::Signaled(Signal::SIGKILL))
        );
    }

    #[test]
    fn test_message_exactly_fills_buffer() {
        let config = BatchConfig {
            max_message_len: 4,
            ..BatchConfig::default()
        };
        // "0.5\0" fits exactly, "0.25\0" is one byte too long
        let payload = |x: f64| x;
        let report = run_batch(&config, &payload, &[0.5, 0.25, 1.0]).unwrap();

        assert_eq!(report.value(0), Some(0.5));
        assert_eq!(report.value(1), None);
        assert_eq!(report.value(2), Some(1.0));

        let failure = report.failures().next().unwrap();
        assert_eq!(failure.index, 1);
        assert_eq!(
            failure.reason,
            FailureReason::Terminated(TerminationReason::Signaled(Signal::SIGABRT))
        );
    }

    #[test]
    fn test_tagged_overflow_is_reported_in_message() {
        let config = BatchConfig {
            max_message_len: 24,
            ..BatchConfig::tagged()
        };
        let payload = |x: f64| x;
        let report = run_batch(&config, &payload, &[0.5, 0.30920632676738636]).unwrap();

        assert_eq!(report.value(0), Some(0.5));
        let failure = report.failures().next().unwrap();
        assert_eq!(failure.index, 1);
        assert_eq!(
            failure.reason,
            FailureReason::WorkerReported("message overflow".into())
        );
    }

    #[test]
    fn test_identity_space_boundary() {
        let _guard = LARGE_BATCH.lock().unwrap_or_else(|e| e.into_inner());
        let payload = |x: f64| x * 2.0;

        let inputs: Vec<f64> = (0..256).map(f64::from).collect();
        let report = run_batch(&BatchConfig::default(), &payload, &inputs).unwrap();
        assert!(report.is_complete());
        assert_eq!(report.value(255), Some(510.0));
        assert_eq!(report.value(0), Some(0.0));

        let inputs: Vec<f64> = (0..257).map(f64::from).collect();
        let err = run_batch(&BatchConfig::default(), &payload, &inputs).unwrap_err();
        assert!(matches!(err, FanoutError::BatchTooLarge { max: 256, got: 257 }));

        // Worker 256 would have reported itself as worker 0
        assert_eq!(exit_code_for(256), exit_code_for(0));
    }

    #[test]
    fn test_tagged_batch_beyond_identity_space() {
        let _guard = LARGE_BATCH.lock().unwrap_or_else(|e| e.into_inner());
        let payload = |x: f64| -x;
        let inputs: Vec<f64> = (0..300).map(f64::from).collect();
        let report = run_batch(&BatchConfig::tagged(), &payload, &inputs).unwrap();

        assert!(report.is_complete());
        assert_eq!(report.value(256), Some(-256.0));
        assert_eq!(report.value(299), Some(-299.0));
    }

    #[test]
    fn test_empty_message_by_parse_policy() {
        // Worker 1 exits with its own identity but never sends a message
        let payload = |x: f64| {
            if x == 1.0 {
                worker::exit_now(exit_code_for(1));
            }
            x
        };
        let inputs = [0.25, 1.0];

        let lenient = run_batch(&BatchConfig::default(), &payload, &inputs).unwrap();
        assert_eq!(lenient.values(), vec![0.25, 0.0]);
        assert!(lenient.is_complete());

        let config = BatchConfig {
            parse_policy: ParsePolicy::Strict,
            ..BatchConfig::default()
        };
        let strict = run_batch(&config, &payload, &inputs).unwrap();
        assert_eq!(strict.value(0), Some(0.25));
        let failure = strict.failures().next().unwrap();
        assert_eq!(failure.index, 1);
        assert!(matches!(failure.reason, FailureReason::Malformed(_)));
    }

    #[test]
    fn test_concurrent_batch_holds_no_foreign_write_ends() {
        // Slow workers live for seconds after their batch forked them
        let slow = thread::spawn(|| {
            let payload = |x: f64| {
                thread::sleep(Duration::from_secs(3));
                x
            };
            let inputs: Vec<f64> = (0..64).map(f64::from).collect();
            run_batch(&BatchConfig::tagged(), &payload, &inputs)
        });

        // Quick workers never write, so every read waits for EOF. A slow
        // worker holding one of these write ends would stall it for seconds.
        let quick = |x: f64| -> f64 { worker::exit_now(exit_code_for(x as usize)) };
        let inputs: Vec<f64> = (0..16).map(f64::from).collect();
        let mut rounds = 0;
        while !slow.is_finished() || rounds == 0 {
            let started = Instant::now();
            let report = run_batch(&BatchConfig::default(), &quick, &inputs).unwrap();
            assert!(report.is_complete());
            assert!(
                started.elapsed() < Duration::from_secs(1),
                "round {} took {:?}",
                rounds,
                started.elapsed()
            );
            rounds += 1;
        }

        let report = slow.join().unwrap().unwrap();
        assert!(report.is_complete());
        assert_eq!(report.value(63), Some(63.0));
    }

    #[test]
    fn test_strict_policy_accepts_nan() {
        let config = BatchConfig {
            parse_policy: ParsePolicy::Strict,
            ..BatchConfig::default()
        };
        let report = run_batch(&config, &|x: f64| x.sqrt(), &[4.0, -1.0]).unwrap();

        assert_eq!(report.value(0), Some(2.0));
        assert!(report.value(1).unwrap().is_nan());
    }

    #[test]
    fn test_identity_mismatch_from_foreign_exit() {
        // A payload that exits on its own claims the wrong identity
        let payload = |x: f64| {
            if x == 1.0 {
                worker::exit_now(exit_code_for(3));
            }
            x
        };
        let report = run_batch(&BatchConfig::default(), &payload, &[0.0, 1.0]).unwrap();

        assert_eq!(report.value(0), Some(0.0));
        let failure = report.failures().next().unwrap();
        assert_eq!(failure.index, 1);
        assert_eq!(
            failure.reason,
            FailureReason::IdentityMismatch { expected: 1, got: 3 }
        );
    }

    #[test]
    fn test_timeout_kills_stuck_worker() {
        let config = BatchConfig {
            timeout: Some(Duration::from_millis(300)),
            ..BatchConfig::default()
        };
        let payload = |x: f64| {
            if x < 0.0 {
                loop {
                    thread::sleep(Duration::from_secs(60));
                }
            }
            x
        };

        let started = Instant::now();
        let report = run_batch(&config, &payload, &[1.0, -1.0, 2.0]).unwrap();
        assert!(started.elapsed() < Duration::from_secs(30));

        assert_eq!(report.values(), vec![1.0, 0.0, 2.0]);
        let failure = report.failures().next().unwrap();
        assert_eq!(failure.index, 1);
        assert_eq!(failure.reason, FailureReason::TimedOut);
    }

    #[test]
    fn test_panicking_payload_fails_slot() {
        let config = BatchConfig {
            timeout: Some(Duration::from_secs(20)),
            ..BatchConfig::default()
        };
        let payload = |x: f64| {
            if x == 0.0 {
                panic!("payload refused input");
            }
            x
        };
        let report = run_batch(&config, &payload, &[0.0, 7.0]).unwrap();

        assert_eq!(report.value(0), None);
        assert_eq!(report.value(1), Some(7.0));
    }

    #[test]
    fn test_invalid_config_spawns_nothing() {
        let config = BatchConfig {
            max_message_len: 0,
            ..BatchConfig::default()
        };
        let err = run_batch(&config, &|x: f64| x, &[1.0]).unwrap_err();
        assert!(matches!(err, FanoutError::InvalidConfig(_)));
    }
}
