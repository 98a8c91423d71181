//! Line parser: one serial text line in, one queued block (and a handshake
//! reply) out.
//!
//! The reply protocol is the only flow control there is: the host must not
//! send another line until it saw "ok" or "Ready", and must never resend
//! after "dropped". A line whose numeral fails to scan gets no reply at all;
//! the host side has to treat such a line as already answered or it will
//! stall.

use core::fmt::Write;

use crate::axis::{Axis, MotorOutputs};
use crate::config::MAX_FEED;
use crate::machine::{write_diagnostics, Machine};
use crate::queue::LookaheadQueue;

/// A fault that abandons the rest of a line. Nothing is enqueued and no
/// reply is written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    /// A letter code was not followed by a scannable numeral.
    InvalidNumber,
}

/// What became of one parsed line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineStatus {
    /// The block was enqueued. If the push filled the queue, no "ok" was
    /// written; the slot being freed again is announced with "Ready".
    Queued { full_after: bool },
    /// The queue was already full; the block was discarded and "dropped"
    /// written.
    Dropped,
    Fault(Fault),
}

/// Tolerant signed-decimal scanner, grbl style.
///
/// Reads an optional sign, a digit run, an optional decimal point and a
/// fractional digit run starting at `*idx`, leaving `*idx` on the first
/// unconsumed byte. `None` if no digit was consumed. Digits beyond the
/// leading eight keep their magnitude but lose their value, which is far more
/// precision than a position command can use anyway.
pub fn read_float(line: &[u8], idx: &mut usize) -> Option<f32> {
    let mut i = *idx;

    let negative = match line.get(i) {
        Some(b'-') => {
            i += 1;
            true
        }
        Some(b'+') => {
            i += 1;
            false
        }
        _ => false,
    };

    let mut intval: u32 = 0;
    let mut exp: i32 = 0;
    let mut ndigit: u32 = 0;
    let mut seen_dot = false;

    while let Some(&c) = line.get(i) {
        match c {
            b'0'..=b'9' => {
                ndigit += 1;
                if ndigit <= 8 {
                    intval = intval * 10 + (c - b'0') as u32;
                    if seen_dot {
                        exp -= 1;
                    }
                } else if !seen_dot {
                    exp += 1;
                }
                i += 1;
            }
            b'.' if !seen_dot => {
                seen_dot = true;
                i += 1;
            }
            _ => break,
        }
    }

    if ndigit == 0 {
        return None;
    }

    let mut value = intval as f32;
    while exp > 0 {
        value *= 10.0;
        exp -= 1;
    }
    while exp < 0 {
        value /= 10.0;
        exp += 1;
    }

    *idx = i;
    Some(if negative { -value } else { value })
}

/// Parse one command line and push the resulting block, writing the
/// handshake reply to `out`.
///
/// The block starts as a copy of the most recently queued one. Whitespace and
/// CR/LF are skipped; `(`..`)` is a comment (an unterminated comment silently
/// consumes the rest of the line, and a stray `)` outside any comment is
/// skipped); every other byte is a letter code that
/// must be followed by a numeral:
///
/// * `G` - rapid flag on the machine register, true iff the value is 1
/// * `M` - 0 emits the diagnostic line; any other value sets the lift flag,
///   true iff the value is 3
/// * `F` - feed, clamped to [`MAX_FEED`]
/// * `X`, `Y` - absolute target coordinates
///
/// Unrecognized letters with a valid numeral are scanned and ignored.
pub fn parse_line<const N: usize, OA, OB, W>(
    line: &str,
    machine: &mut Machine,
    queue: &mut LookaheadQueue<N>,
    axis_a: &Axis<OA>,
    axis_b: &Axis<OB>,
    out: &mut W,
) -> LineStatus
where
    OA: MotorOutputs,
    OB: MotorOutputs,
    W: Write,
{
    let bytes = line.as_bytes();
    let mut i = 0;
    let mut comment = false;
    let mut block = queue.last();

    while i < bytes.len() {
        let c = bytes[i];

        if c == b' ' || c == b'\r' || c == b'\n' {
            i += 1;
            continue;
        }

        // A close paren is skipped whether or not a comment is open.
        if c == b')' {
            comment = false;
            i += 1;
            continue;
        }

        if c == b'(' || comment {
            comment = true;
            i += 1;
            continue;
        }

        i += 1;
        let value = match read_float(bytes, &mut i) {
            Some(v) => v,
            None => return LineStatus::Fault(Fault::InvalidNumber),
        };

        match c {
            b'G' => machine.rapid = value == 1.0,
            b'M' => {
                if value == 0.0 {
                    write_diagnostics(machine, axis_a, axis_b, out);
                } else {
                    block.lift = value == 3.0;
                }
            }
            b'F' => block.feed = (value as i32).min(MAX_FEED),
            b'X' => block.target.x = value as f64,
            b'Y' => block.target.y = value as f64,
            _ => {}
        }
    }

    if queue.is_full() {
        let _ = out.write_str("dropped\r\n");
        return LineStatus::Dropped;
    }

    queue.push(block);
    let full_after = queue.is_full();
    if !full_after {
        let _ = out.write_str("ok\r\n");
    }
    LineStatus::Queued { full_after }
}
