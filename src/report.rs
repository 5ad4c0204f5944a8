// SPDX-License-Identifier: Apache-2.0

//! Unpacking captured transfer words into bin counts, and printing them.
use crate::{
    buffer::CaptureBuffer,
    command::Console,
    config::{AcquisitionConfig, LANE_COUNT},
    geometry,
};

/// Marks both ends of the data block so a host can find it among prompts and diagnostics
pub const DATA_DELIMITER: &str = "||";

/// Width of the counter's parallel output
const COUNT_MASK: u32 = 0xFF;

/// How a report is printed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum ReportMode {
    /// One raw byte per bin
    FullBinary,
    /// Decimal counts separated by spaces
    FullText,
    /// Decimal sum of every count
    SumText,
}

/// Iterator over the bin counts in a capture, in bin order.
///
/// The first sub-sample of the first word is skipped (the counter was already integrating when
/// the program started), as is anything after the last requested bin.
#[derive(Debug, Clone)]
pub struct BinCounts<'a> {
    /// Captured transfer words
    words: &'a [u32],
    /// Bits per sub-sample
    lane_count: u32,
    /// Next sub-sample, counted across all words
    position: usize,
    /// One past the last sub-sample to yield
    end: usize,
}

impl<'a> BinCounts<'a> {
    /// Counts for `bin_count` bins in `words`, sampled `lane_count` bits at a time.
    ///
    /// Yields nothing unless `lane_count` fits a shift register (`1..=32`).
    pub(crate) fn new(words: &'a [u32], bin_count: u32, lane_count: u32) -> Self {
        let end = if (1..=geometry::SHIFT_REG_WIDTH).contains(&lane_count) {
            let per_word = geometry::sub_samples_per_word(lane_count) as usize;
            (bin_count as usize + 1).min(words.len() * per_word)
        } else {
            0
        };
        Self {
            words,
            lane_count,
            position: 1,
            end,
        }
    }
}

impl Iterator for BinCounts<'_> {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        if self.position >= self.end {
            return None;
        }
        let per_word = geometry::sub_samples_per_word(self.lane_count) as usize;
        let word = self.words[self.position / per_word];
        let shift = self.lane_count * (self.position % per_word) as u32;
        self.position += 1;
        Some((word.checked_shr(shift).unwrap_or(0) & COUNT_MASK) as u8)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end.saturating_sub(self.position);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for BinCounts<'_> {}

/// Every bin count of a finished capture
pub fn full_report<'a>(buffer: &'a CaptureBuffer, config: &AcquisitionConfig) -> BinCounts<'a> {
    BinCounts::new(buffer.words(), config.bin_count(), LANE_COUNT)
}

/// Total count over every bin of a finished capture
pub fn sum_report(buffer: &CaptureBuffer, config: &AcquisitionConfig) -> u64 {
    full_report(buffer, config).map(u64::from).sum()
}

/// Print a report between [`DATA_DELIMITER`]s
pub fn write_report<C: Console>(
    console: &mut C,
    mode: ReportMode,
    buffer: &CaptureBuffer,
    config: &AcquisitionConfig,
) -> core::fmt::Result {
    debug!("Reporting {} bins", config.bin_count());
    write!(console, "\r\n{}", DATA_DELIMITER)?;
    match mode {
        ReportMode::FullBinary => {
            // Chunked so the console sees a few large writes instead of one per bin
            let mut chunk = heapless::Vec::<u8, 64>::new();
            for count in full_report(buffer, config) {
                if chunk.push(count).is_err() {
                    console.write_bytes(&chunk)?;
                    chunk.clear();
                    let _ = chunk.push(count);
                }
            }
            console.write_bytes(&chunk)?;
        }
        ReportMode::FullText => {
            for count in full_report(buffer, config) {
                write!(console, "{} ", count)?;
            }
        }
        ReportMode::SumText => write!(console, "{} ", sum_report(buffer, config))?,
    }
    write!(console, "{}\r\n", DATA_DELIMITER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{buffer::tests::test_pool, command::tests::MockConsole};
    use std::vec::Vec;

    /// Pack one byte per sub-sample, lowest bits first
    fn pack(counts: &[u8]) -> Vec<u32> {
        counts
            .chunks(4)
            .map(|chunk| {
                chunk
                    .iter()
                    .enumerate()
                    .fold(0, |word, (idx, &count)| word | u32::from(count) << (8 * idx))
            })
            .collect()
    }

    fn filled(words: &[u32]) -> CaptureBuffer {
        let mut buffer = test_pool(words.len()).allocate(words.len()).unwrap();
        buffer.words_mut().copy_from_slice(words);
        buffer
    }

    #[test]
    fn drops_the_stale_first_reading() {
        let buffer = filled(&[0x0403_0201]);
        let config = AcquisitionConfig::new(3, 2).unwrap();
        assert_eq!(full_report(&buffer, &config).collect::<Vec<_>>(), [2, 3, 4]);
        assert_eq!(sum_report(&buffer, &config), 9);
    }

    #[test]
    fn reproduces_packed_counts_in_order() {
        let counts: Vec<u8> = (0..=255u8).chain(0..45).collect();
        let words = pack(&counts);
        let buffer = filled(&words);
        let config = AcquisitionConfig::new(counts.len() as u32 - 1, 0).unwrap();
        assert_eq!(buffer.len(), config.words_needed());

        let report: Vec<u8> = full_report(&buffer, &config).collect();
        assert_eq!(report, counts[1..]);
        assert_eq!(
            sum_report(&buffer, &config),
            report.iter().map(|&c| u64::from(c)).sum::<u64>()
        );
    }

    #[test]
    fn stops_at_the_requested_bin_count() {
        // 4 bins need 2 words, which hold 7 usable sub-samples
        let buffer = filled(&pack(&[9, 1, 2, 3, 4, 0xAA, 0xBB, 0xCC]));
        let config = AcquisitionConfig::new(4, 0).unwrap();
        let report = full_report(&buffer, &config);
        assert_eq!(report.len(), 4);
        assert_eq!(report.collect::<Vec<_>>(), [1, 2, 3, 4]);
    }

    #[test]
    fn other_lane_widths() {
        // 16 bits per sub-sample, two per word; counts stay 8 bits wide
        let counts: Vec<u8> = BinCounts::new(&[0x1234_5678, 0xFFFF_00AB], 3, 16).collect();
        assert_eq!(counts, [0x34, 0xAB, 0xFF]);
    }

    #[test]
    fn unusable_lane_widths_yield_nothing() {
        assert_eq!(BinCounts::new(&[0xFFFF_FFFF], 3, 0).count(), 0);
        assert_eq!(BinCounts::new(&[0xFFFF_FFFF], 3, 33).len(), 0);
    }

    #[test]
    fn frames_text_reports() {
        let buffer = filled(&[0x0403_0201]);
        let config = AcquisitionConfig::new(3, 2).unwrap();

        let mut console = MockConsole::default();
        write_report(&mut console, ReportMode::FullText, &buffer, &config).unwrap();
        assert_eq!(console.output_text(), "\r\n||2 3 4 ||\r\n");

        let mut console = MockConsole::default();
        write_report(&mut console, ReportMode::SumText, &buffer, &config).unwrap();
        assert_eq!(console.output_text(), "\r\n||9 ||\r\n");
    }

    #[test]
    fn frames_binary_reports() {
        let counts: Vec<u8> = (0..200u8).collect();
        let buffer = filled(&pack(&counts));
        let config = AcquisitionConfig::new(199, 0).unwrap();

        let mut console = MockConsole::default();
        write_report(&mut console, ReportMode::FullBinary, &buffer, &config).unwrap();
        let mut expected = b"\r\n||".to_vec();
        expected.extend_from_slice(&counts[1..]);
        expected.extend_from_slice(b"||\r\n");
        assert_eq!(console.output, expected);
    }
}
