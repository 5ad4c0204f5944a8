// SPDX-License-Identifier: Apache-2.0

//! Line-oriented operator console: line editing and command classification.
use core::fmt;

use heapless::{Deque, String};

use crate::config::{self, AcquisitionConfig, InputError, LINE_CAPACITY};

/// Carriage return, ends a line
pub const CR: u8 = 0x0D;
/// Backspace
pub const BS: u8 = 0x08;
/// Delete, treated as backspace
pub const DEL: u8 = 0x7F;

/// Byte stream to and from the operator.
pub trait Console: fmt::Write {
    /// Block until one byte arrives
    fn read_byte(&mut self) -> u8;

    /// Write raw bytes, which need not be valid UTF-8
    fn write_bytes(&mut self, bytes: &[u8]) -> fmt::Result;
}

/// One edited input line, without its terminator.
pub type Line = String<LINE_CAPACITY>;

/// Read one CR-terminated line into `line`, echoing input as it is typed.
///
/// Printable bytes (`0x20..=0x7E`) are appended and echoed. Once `line` is full, further
/// printable bytes are still echoed but not stored. Backspace and delete erase the last stored
/// character. Everything else is ignored.
pub fn read_line<C: Console>(console: &mut C, line: &mut Line) -> fmt::Result {
    line.clear();
    loop {
        match console.read_byte() {
            CR => return console.write_str("\r\n"),
            BS | DEL => {
                if line.pop().is_some() {
                    console.write_str("\x08 \x08")?;
                }
            }
            byte @ 0x20..=0x7E => {
                let c = char::from(byte);
                console.write_char(c)?;
                // Full line: keep echoing, drop the character
                let _ = line.push(c);
            }
            _ => {}
        }
    }
}

/// A classified console line.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum Command {
    /// Start the interactive bin count / bin time prompts
    Init,
    /// Configure a run in one line: `SET <bin_count> <bin_time>`
    Set(AcquisitionConfig),
    /// Print every bin as decimal text
    GetAll,
    /// Print the sum over every bin
    GetSum,
    /// Print every bin as one raw byte
    GetBin,
    /// Discard the captured data
    Delete,
    /// Anything else, including `SET` with out-of-range values
    Unknown,
}

/// Classify one line. Keywords are case-sensitive and must match the whole line.
pub fn classify(line: &str) -> Command {
    match line {
        "INIT" => Command::Init,
        "GETALL" => Command::GetAll,
        "GETSUM" => Command::GetSum,
        "GETBIN" => Command::GetBin,
        "DEL" | "DELETE" => Command::Delete,
        _ => parse_set(line).unwrap_or(Command::Unknown),
    }
}

/// Parse `SET <bin_count> <bin_time>`, with both values in range
fn parse_set(line: &str) -> Option<Command> {
    let mut tokens = line.split_whitespace();
    if tokens.next()? != "SET" {
        return None;
    }
    let bin_count = parse_scalar(tokens.next()?).ok()?;
    let bin_time = parse_scalar(tokens.next()?).ok()?;
    if tokens.next().is_some() {
        return None;
    }
    AcquisitionConfig::new(bin_count, bin_time)
        .ok()
        .map(Command::Set)
}

/// Parse a bare unsigned decimal integer, as typed at a prompt
pub fn parse_scalar(line: &str) -> Result<u32, InputError> {
    let digits = line.trim();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(InputError::NotANumber);
    }
    // All digits, so the only possible failure is overflow
    digits.parse().map_err(|_| InputError::NotANumber)
}

/// Parse and validate a bin count typed at its prompt
pub fn parse_bin_count(line: &str) -> Result<u32, InputError> {
    parse_scalar(line).and_then(config::check_bin_count)
}

/// Parse and validate a bin time typed at its prompt
pub fn parse_bin_time(line: &str) -> Result<u32, InputError> {
    parse_scalar(line).and_then(config::check_bin_time)
}

/// Bytes received from the operator and not yet read.
///
/// Filling never blocks the receiver: bytes that arrive while the queue is full are dropped.
pub struct InputQueue<const N: usize> {
    /// Pending bytes, oldest first
    bytes: Deque<u8, N>,
}

impl<const N: usize> InputQueue<N> {
    /// An empty queue
    pub const fn new() -> Self {
        Self {
            bytes: Deque::new(),
        }
    }

    /// Queue `received`, keeping what fits. Returns the number of bytes dropped.
    pub fn extend_from_received(&mut self, received: &[u8]) -> usize {
        let mut dropped = 0;
        for &byte in received {
            if self.bytes.push_back(byte).is_err() {
                dropped += 1;
            }
        }
        dropped
    }

    /// Take the oldest pending byte
    pub fn pop(&mut self) -> Option<u8> {
        self.bytes.pop_front()
    }

    /// Number of pending bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True if nothing is pending
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl<const N: usize> Default for InputQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}
