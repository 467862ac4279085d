//! procfan CLI - Taylor sine over forked workers
//!
//! Runs one batch and prints each series result next to libm's sin(x).

use clap::{Parser, ValueEnum};
use console::style;
use procfan::config::DEFAULT_MESSAGE_LEN;
use procfan::logging::{self, LogConfig, LogFormat};
use procfan::{run_batch, BatchConfig, IdentityEncoding, ParsePolicy, SlotOutcome, TaylorSine};
use std::f64::consts::PI;
use std::time::Duration;
use tracing::Level;

#[derive(Parser)]
#[command(name = "procfan")]
#[command(about = "Compute sin(x) with one worker process per input", long_about = None)]
struct Cli {
    /// Inputs in radians (default: 0, pi/6, pi/3, 0.314)
    #[arg(allow_negative_numbers = true)]
    inputs: Vec<f64>,

    /// Taylor terms after x
    #[arg(short, long, default_value = "3")]
    terms: u32,

    /// Carry worker identity in the message instead of the exit status
    #[arg(long)]
    tagged: bool,

    /// Fail slots whose message is not a number instead of reading 0
    #[arg(long)]
    strict: bool,

    /// Kill workers still running after this many milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Message capacity in bytes, terminator included
    #[arg(long, default_value_t = DEFAULT_MESSAGE_LEN)]
    max_message_len: usize,

    /// Log level: error, warn, info, debug, trace
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value = "pretty")]
    log_format: FormatArg,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, ValueEnum)]
enum FormatArg {
    Pretty,
    Compact,
}

impl From<FormatArg> for LogFormat {
    fn from(f: FormatArg) -> Self {
        match f {
            FormatArg::Pretty => LogFormat::Pretty,
            FormatArg::Compact => LogFormat::Compact,
        }
    }
}

impl Cli {
    fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            max_message_len: self.max_message_len,
            encoding: if self.tagged {
                IdentityEncoding::Tagged
            } else {
                IdentityEncoding::ExitStatus
            },
            parse_policy: if self.strict {
                ParsePolicy::Strict
            } else {
                ParsePolicy::Lenient
            },
            timeout: self.timeout_ms.map(Duration::from_millis),
            ..BatchConfig::default()
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let level = match logging::parse_level(&cli.log_level) {
        Some(level) => level,
        None => {
            eprintln!(
                "{} unknown log level '{}', using warn",
                style("Warning:").yellow(),
                cli.log_level
            );
            Level::WARN
        }
    };
    logging::init(
        LogConfig::default()
            .with_level(level)
            .with_format(cli.log_format.into())
            .with_env_overrides(),
    );

    let inputs = if cli.inputs.is_empty() {
        vec![0.0, PI / 6.0, PI / 3.0, 0.314]
    } else {
        cli.inputs.clone()
    };

    let report = match run_batch(&cli.batch_config(), &TaylorSine::new(cli.terms), &inputs) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            std::process::exit(1);
        }
    };

    for (x, slot) in inputs.iter().zip(report.slots()) {
        match slot {
            SlotOutcome::Value(y) => {
                println!("sin({:.2}) by Taylor series = {}", x, style(format!("{:.10}", y)).green());
            }
            SlotOutcome::Failed(failure) => {
                println!("sin({:.2}) by Taylor series = {}", x, style(failure).red());
            }
        }
        println!("sin({:.2}) (libm)          = {:.10}", x, x.sin());
    }

    let failed = report.failures().count();
    if failed > 0 {
        println!();
        println!(
            "{}",
            style(format!("{} of {} workers failed", failed, report.len())).yellow()
        );
    }
}
