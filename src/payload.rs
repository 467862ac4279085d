//! Per-element payload functions.
//!
//! A payload runs inside a freshly forked worker, so it should be a pure
//! function of its input: no locks, no I/O, no logging.

/// A pure function computed once per work item.
///
/// # Panics
///
/// A panicking payload fails only its own slot, but the panic hook runs
/// first inside the forked worker. The default hook locks stderr and
/// allocates, and if another coordinator thread held either lock at fork
/// time the worker deadlocks. Without [`BatchConfig::timeout`] such a
/// worker is never reaped and the batch never returns. Payloads that can
/// fail should return NaN or another sentinel instead of panicking.
///
/// [`BatchConfig::timeout`]: crate::config::BatchConfig::timeout
pub trait Payload {
    /// Compute the result for one input
    fn compute(&self, x: f64) -> f64;
}

impl<F> Payload for F
where
    F: Fn(f64) -> f64,
{
    #[inline]
    fn compute(&self, x: f64) -> f64 {
        self(x)
    }
}

/// Sine by truncated Taylor expansion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaylorSine {
    /// Number of correction terms after `x`
    pub terms: u32,
}

impl TaylorSine {
    pub fn new(terms: u32) -> Self {
        Self { terms }
    }
}

impl Payload for TaylorSine {
    fn compute(&self, x: f64) -> f64 {
        sin_taylor(x, self.terms)
    }
}

/// `x - x^3/3! + x^5/5! - ...` with `terms` terms after `x`
pub fn sin_taylor(x: f64, terms: u32) -> f64 {
    let x2 = x * x;
    let mut value = x;
    let mut numer = x * x2;
    let mut denom = 6.0;
    let mut sign = -1.0;

    for j in 1..=terms {
        value += sign * (numer / denom);
        numer *= x2;
        let j = f64::from(j);
        denom *= (2.0 * j + 2.0) * (2.0 * j + 3.0);
        sign = -sign;
    }

    value
}
