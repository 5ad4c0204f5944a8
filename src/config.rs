// SPDX-License-Identifier: Apache-2.0

//! Acquisition limits and per-run configuration.
use core::fmt;

use crate::geometry;

/// Number of counter output bits sampled per bin. Fixed by the board: one 8-bit counter whose
/// parallel outputs are wired to eight consecutive GPIOs.
pub const LANE_COUNT: u32 = 8;

/// Largest bin count accepted for a run.
///
/// Chosen so the capture pool ([`CAPTURE_POOL_WORDS`]) is 200 KB and still leaves room for the
/// stack and USB buffers in the RP2040's 264 KB of SRAM.
pub const MAX_BINS: u32 = 199_999;

/// Largest per-bin integration time, in PIO clock cycles (one second at 125 MHz).
pub const MAX_BIN_TIME: u32 = 125_000_000;

/// Transfer words reserved for the capture buffer, enough for a [`MAX_BINS`] run.
pub const CAPTURE_POOL_WORDS: usize = geometry::words_needed(MAX_BINS, LANE_COUNT);

/// Console line capacity. Must hold the longest legal command, `"SET 199999 125000000"`.
pub const LINE_CAPACITY: usize = 32;

/// Capture deadline used when the `capture_timeout` feature is enabled
pub const CAPTURE_TIMEOUT_MS: u32 = 10_000;

/// Reasons an operator-supplied value is rejected. Always recoverable.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum InputError {
    /// Input is not an unsigned decimal integer
    NotANumber,
    /// Bin count outside `1..=MAX_BINS`
    BinCountOutOfRange(u32),
    /// Bin time outside `0..=MAX_BIN_TIME`
    BinTimeOutOfRange(u32),
}

impl fmt::Display for InputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotANumber => f.write_str("Expected a decimal number"),
            Self::BinCountOutOfRange(_) => write!(
                f,
                "The number of bins is not correct, do not exceed memory limits of {}",
                MAX_BINS
            ),
            Self::BinTimeOutOfRange(_) => write!(
                f,
                "Invalid bin time. Can only accept values in the range [0-{}]",
                MAX_BIN_TIME
            ),
        }
    }
}

/// Check a requested bin count against `1..=MAX_BINS`
pub fn check_bin_count(bin_count: u32) -> Result<u32, InputError> {
    if bin_count > 0 && bin_count <= MAX_BINS {
        Ok(bin_count)
    } else {
        Err(InputError::BinCountOutOfRange(bin_count))
    }
}

/// Check a requested bin time against `0..=MAX_BIN_TIME`
pub fn check_bin_time(bin_time: u32) -> Result<u32, InputError> {
    if bin_time <= MAX_BIN_TIME {
        Ok(bin_time)
    } else {
        Err(InputError::BinTimeOutOfRange(bin_time))
    }
}

/// Settings for a single run. Immutable once the run starts.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub struct AcquisitionConfig {
    /// Number of bins to report
    bin_count: u32,
    /// Integration time per bin, in PIO clock cycles
    bin_time: u32,
}

impl AcquisitionConfig {
    /// Build a validated configuration
    pub fn new(bin_count: u32, bin_time: u32) -> Result<Self, InputError> {
        Ok(Self {
            bin_count: check_bin_count(bin_count)?,
            bin_time: check_bin_time(bin_time)?,
        })
    }

    /// Number of bins requested
    pub fn bin_count(&self) -> u32 {
        self.bin_count
    }

    /// Integration time per bin
    pub fn bin_time(&self) -> u32 {
        self.bin_time
    }

    /// Transfer words the capture buffer needs for this run
    pub fn words_needed(&self) -> usize {
        geometry::words_needed(self.bin_count, LANE_COUNT)
    }
}

/// Controller settings that stay fixed across runs.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RunSettings {
    /// Give up on a capture after this many milliseconds. `None` waits forever.
    pub capture_timeout_ms: Option<u32>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            capture_timeout_ms: if cfg!(feature = "capture_timeout") {
                Some(CAPTURE_TIMEOUT_MS)
            } else {
                None
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bin_count_bounds() {
        assert_eq!(check_bin_count(0), Err(InputError::BinCountOutOfRange(0)));
        assert_eq!(check_bin_count(1), Ok(1));
        assert_eq!(check_bin_count(MAX_BINS), Ok(MAX_BINS));
        assert!(check_bin_count(MAX_BINS + 1).is_err());
    }

    #[test]
    fn bin_time_bounds() {
        assert_eq!(check_bin_time(0), Ok(0));
        assert_eq!(check_bin_time(MAX_BIN_TIME), Ok(MAX_BIN_TIME));
        assert!(check_bin_time(MAX_BIN_TIME + 1).is_err());
    }

    #[test]
    fn pool_holds_largest_run() {
        let config = AcquisitionConfig::new(MAX_BINS, 0).unwrap();
        assert_eq!(config.words_needed(), CAPTURE_POOL_WORDS);
        assert_eq!(CAPTURE_POOL_WORDS, 50_000);
    }

    #[test]
    fn longest_set_line_fits() {
        let mut longest = heapless::String::<64>::new();
        core::fmt::write(&mut longest, format_args!("SET {} {}", MAX_BINS, MAX_BIN_TIME)).unwrap();
        assert!(longest.len() <= LINE_CAPACITY);
    }
}
