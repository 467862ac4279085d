//! Taylor vs libm - the reference batch
//!
//! Computes sin(x) for four inputs with one worker process each and prints
//! the series result next to the libm value.

use procfan::compute_batch;
use std::f64::consts::PI;

fn main() {
    let inputs = [0.0, PI / 6.0, PI / 3.0, 0.314];
    let terms = 3;

    let results = match compute_batch(terms, &inputs) {
        Ok(results) => results,
        Err(e) => {
            eprintln!("[compare] Batch failed: {}", e);
            std::process::exit(1);
        }
    };

    for (x, y) in inputs.iter().zip(&results) {
        println!("sin({:.2}) by Taylor series = {:.10}", x, y);
        println!("sin({:.2}) (libm)          = {:.10}", x, x.sin());
    }
}
