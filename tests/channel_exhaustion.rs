//! Channel allocation when the process runs out of descriptors.
//!
//! Lowers the descriptor limit of the whole process, so it lives alone in
//! its own test binary.

use nix::errno::Errno;
use nix::sys::resource::{getrlimit, setrlimit, Resource};
use nix::sys::wait::{waitpid, WaitPidFlag};
use nix::unistd::Pid;
use procfan::{run_batch, BatchConfig, FanoutError, TaylorSine};

#[cfg(target_os = "linux")]
fn open_descriptors() -> usize {
    std::fs::read_dir("/proc/self/fd")
        .expect("procfs is mounted")
        .count()
}

#[cfg(target_os = "linux")]
#[test]
fn test_exhausted_descriptors_abort_before_any_fork() {
    let (soft, hard) = getrlimit(Resource::RLIMIT_NOFILE).unwrap();
    let before = open_descriptors();

    // Room for a few pipes, far fewer than 64 items need
    let limit = (before + 8) as libc::rlim_t;
    setrlimit(Resource::RLIMIT_NOFILE, limit, hard).unwrap();

    let inputs = vec![0.5; 64];
    let result = run_batch(&BatchConfig::default(), &TaylorSine::new(3), &inputs);
    let after = open_descriptors();
    setrlimit(Resource::RLIMIT_NOFILE, soft, hard).unwrap();

    match result {
        Err(FanoutError::ChannelCreate { index, source }) => {
            assert!(index < inputs.len());
            assert_eq!(source.raw_os_error(), Some(libc::EMFILE));
        }
        Err(other) => panic!("expected a channel creation failure, got {}", other),
        Ok(report) => panic!("batch of {} ran past the descriptor limit", report.len()),
    }

    // Pipes created before the failure are closed again
    assert_eq!(after, before);

    // Nothing was forked
    assert_eq!(
        waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)),
        Err(Errno::ECHILD)
    );
}
