//! Wire format of the single message a worker sends.
//!
//! A message is NUL-terminated UTF-8 text that must fit the configured
//! capacity, terminator included. Untagged messages carry only the value;
//! tagged messages are `ok <index> <value>` or `err <index> <reason>`.
//!
//! Encoding writes into a caller-provided buffer and never allocates, since
//! it runs in a forked worker. Decoding runs in the coordinator.

use crate::config::{IdentityEncoding, ParsePolicy};
use crate::report::FailureReason;
use std::borrow::Cow;
use std::fmt::{self, Write};

/// Reason a tagged worker reports when its value does not fit
pub const OVERFLOW_REASON: &str = "message overflow";

/// The encoded text plus terminator does not fit the buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overflow;

/// `fmt::Write` into a fixed slice, failing instead of truncating
struct SliceWriter<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl Write for SliceWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let end = self.len + s.len();
        if end > self.buf.len() {
            return Err(fmt::Error);
        }
        self.buf[self.len..end].copy_from_slice(s.as_bytes());
        self.len = end;
        Ok(())
    }
}

/// Write `value` at round-trip precision.
///
/// Plain decimal for ordinary magnitudes, scientific notation for very large
/// or very small ones, so any finite value stays short.
fn write_value(w: &mut impl Write, value: f64) -> fmt::Result {
    let magnitude = value.abs();
    if value == 0.0 || !value.is_finite() || (1e-5..1e16).contains(&magnitude) {
        write!(w, "{}", value)
    } else {
        write!(w, "{:e}", value)
    }
}

/// Format into `buf` and append the terminator; returns bytes used.
fn encode_with(
    buf: &mut [u8],
    body: impl FnOnce(&mut SliceWriter<'_>) -> fmt::Result,
) -> Result<usize, Overflow> {
    let Some(text_cap) = buf.len().checked_sub(1) else {
        return Err(Overflow);
    };
    let mut writer = SliceWriter {
        buf: &mut buf[..text_cap],
        len: 0,
    };
    body(&mut writer).map_err(|_| Overflow)?;
    let len = writer.len;
    buf[len] = 0;
    Ok(len + 1)
}

/// Untagged message: the value alone
pub fn encode_value(buf: &mut [u8], value: f64) -> Result<usize, Overflow> {
    encode_with(buf, |w| write_value(w, value))
}

/// Tagged success message
pub fn encode_ok(buf: &mut [u8], index: usize, value: f64) -> Result<usize, Overflow> {
    encode_with(buf, |w| {
        write!(w, "ok {} ", index)?;
        write_value(w, value)
    })
}

/// Tagged failure message
pub fn encode_err(buf: &mut [u8], index: usize, reason: &str) -> Result<usize, Overflow> {
    encode_with(buf, |w| write!(w, "err {} {}", index, reason))
}

/// Message text up to the first NUL
pub fn message_text(bytes: &[u8]) -> Cow<'_, str> {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end])
}

/// Longest numeric prefix of `text` after leading whitespace, else `0.0`
pub fn parse_lenient(text: &str) -> f64 {
    let text = text.trim_start();
    (1..=text.len())
        .rev()
        .filter(|&end| text.is_char_boundary(end))
        .find_map(|end| text[..end].parse::<f64>().ok())
        .unwrap_or(0.0)
}

fn parse_value(text: &str, policy: ParsePolicy) -> Result<f64, FailureReason> {
    match policy {
        ParsePolicy::Lenient => Ok(parse_lenient(text)),
        ParsePolicy::Strict if text.is_empty() => {
            Err(FailureReason::Malformed("empty message".into()))
        }
        ParsePolicy::Strict => text
            .parse::<f64>()
            .map_err(|_| FailureReason::Malformed(format!("not a number: {:?}", text))),
    }
}

fn parse_tag(tag: &str, expected: usize) -> Result<(), FailureReason> {
    let got = tag
        .parse::<usize>()
        .map_err(|_| FailureReason::Malformed(format!("bad index tag: {:?}", tag)))?;
    if got != expected {
        return Err(FailureReason::IdentityMismatch { expected, got });
    }
    Ok(())
}

/// Decode a received message for slot `expected`
pub fn decode(
    bytes: &[u8],
    encoding: IdentityEncoding,
    policy: ParsePolicy,
    expected: usize,
) -> Result<f64, FailureReason> {
    let text = message_text(bytes);

    match encoding {
        IdentityEncoding::ExitStatus => parse_value(&text, policy),
        IdentityEncoding::Tagged => {
            let mut parts = text.splitn(3, ' ');
            match (parts.next(), parts.next(), parts.next()) {
                (Some("ok"), Some(tag), Some(value)) => {
                    parse_tag(tag, expected)?;
                    parse_value(value, policy)
                }
                (Some("err"), Some(tag), reason) => {
                    parse_tag(tag, expected)?;
                    Err(FailureReason::WorkerReported(
                        reason.unwrap_or_default().to_string(),
                    ))
                }
                _ => Err(FailureReason::Malformed(format!(
                    "missing tag: {:?}",
                    text
                ))),
            }
        }
    }
}
