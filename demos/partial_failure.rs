//! Partial failure demo
//!
//! One worker kills itself, one overruns a deliberately small message
//! buffer; the rest of the batch still completes.

use nix::sys::signal::{raise, Signal};
use procfan::logging::{self, LogConfig};
use procfan::{run_batch, BatchConfig, SlotOutcome};
use tracing::Level;

fn main() {
    logging::init(LogConfig::default().with_level(Level::DEBUG).with_env_overrides());

    let config = BatchConfig {
        max_message_len: 8,
        ..BatchConfig::default()
    };
    let payload = |x: f64| {
        if x == 3.0 {
            let _ = raise(Signal::SIGKILL);
        }
        1.0 / x
    };
    let inputs = [1.0, 2.0, 3.0, 7.0, 8.0];

    let report = match run_batch(&config, &payload, &inputs) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("[partial] Batch failed: {}", e);
            std::process::exit(1);
        }
    };

    for (x, slot) in inputs.iter().zip(report.slots()) {
        match slot {
            SlotOutcome::Value(v) => println!("1/{} = {}", x, v),
            SlotOutcome::Failed(failure) => println!("1/{} -> {}", x, failure),
        }
    }
}
