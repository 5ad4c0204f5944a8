// SPDX-License-Identifier: Apache-2.0

//! Sequencing of one capture on the counter front-end.
//!
//! [`capture`] owns the [`CaptureBuffer`] for the whole capture: the buffer moves into the
//! front-end's transfer, and comes back only once the transfer has finished or been aborted.
//! This keeps the DMA writer and the CPU reader from ever seeing the buffer at the same time.
use core::fmt;

use crate::{buffer::CaptureBuffer, config::AcquisitionConfig};

/// Counter hardware as seen by the orchestrator. Every method is safe to call in any order and
/// repeatedly across runs.
pub trait CounterFrontEnd {
    /// An in-flight transfer from the counter's receive queue into a [`CaptureBuffer`]
    type Transfer;

    /// Stop the counting program. No-op if already stopped.
    fn disable_counter(&mut self);

    /// Drop words still queued from a previous run
    fn clear_counter(&mut self);

    /// Zero the counting program's shift counters so the first word starts on a sample boundary.
    /// Only called while the counter is disabled.
    fn reset_shift_counters(&mut self);

    /// Rewind the counting program and load the per-bin integration time
    fn arm_counter_program(&mut self, bin_time: u32);

    /// Start a one-shot transfer of `buffer.len()` words from the receive queue into `buffer`,
    /// paced by the counter's data requests
    fn start_transfer(&mut self, buffer: CaptureBuffer) -> Self::Transfer;

    /// Start the counting program. The first bin integrated is discarded later.
    fn enable_counter(&mut self);

    /// True once every word of the transfer has been written
    fn transfer_complete(&self, transfer: &Self::Transfer) -> bool;

    /// Reclaim the buffer of a completed transfer
    fn finish_transfer(&mut self, transfer: Self::Transfer) -> CaptureBuffer;

    /// Stop an incomplete transfer and reclaim its buffer
    fn abort_transfer(&mut self, transfer: Self::Transfer) -> CaptureBuffer;

    /// Monotonic time in microseconds, used for capture deadlines
    fn now_micros(&self) -> u64;
}

/// A capture that didn't complete.
pub enum CaptureError {
    /// No data before the deadline, usually because the trigger never arrived. The counter has
    /// been disabled and the buffer reclaimed, so a new run can be armed.
    TimedOut(CaptureBuffer),
}

impl fmt::Debug for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimedOut(buffer) => f.debug_tuple("TimedOut").field(buffer).finish(),
        }
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimedOut(_) => f.write_str("Capture timed out waiting for the trigger"),
        }
    }
}

/// Run one capture into `buffer`, blocking until it has been filled.
///
/// With `timeout_ms` set to `None` the wait is unbounded, and a trigger that never arrives stalls
/// the caller forever.
pub fn capture<F: CounterFrontEnd>(
    front_end: &mut F,
    buffer: CaptureBuffer,
    config: &AcquisitionConfig,
    timeout_ms: Option<u32>,
) -> Result<CaptureBuffer, CaptureError> {
    let word_count = buffer.len();
    debug!("Arming capture of {} words", word_count);

    front_end.disable_counter();
    front_end.clear_counter();
    front_end.reset_shift_counters();
    front_end.arm_counter_program(config.bin_time());
    let transfer = front_end.start_transfer(buffer);
    front_end.enable_counter();

    let deadline = timeout_ms.map(|ms| front_end.now_micros() + u64::from(ms) * 1_000);
    while !front_end.transfer_complete(&transfer) {
        if let Some(deadline) = deadline {
            if front_end.now_micros() >= deadline {
                let buffer = front_end.abort_transfer(transfer);
                front_end.disable_counter();
                warn!("Capture of {} words timed out", word_count);
                return Err(CaptureError::TimedOut(buffer));
            }
        }
        core::hint::spin_loop();
    }

    let buffer = front_end.finish_transfer(transfer);
    front_end.disable_counter();
    debug!("Capture complete");
    #[cfg(feature = "trace_capture_words")]
    for (idx, word) in buffer.words().iter().enumerate() {
        trace!("word {}: {:x}", idx, word);
    }
    Ok(buffer)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::buffer::tests::test_pool;
    use std::{cell::Cell, vec::Vec};

    /// Front-end that "captures" a fixed word sequence after a few polls.
    pub(crate) struct MockFrontEnd {
        /// Words copied into the buffer when the transfer finishes
        pub words: Vec<u32>,
        /// Polls before the transfer reports completion; `None` never completes
        pub polls_until_done: Option<usize>,
        /// Calls made, in order
        pub calls: Vec<&'static str>,
        /// Microseconds advanced by every `now_micros` call
        clock: Cell<u64>,
        /// Polls seen by the current transfer
        polls: Cell<usize>,
        /// Bin time loaded by the last arm
        pub bin_time: Option<u32>,
        /// Counter program running
        pub enabled: bool,
    }

    impl MockFrontEnd {
        pub fn new(words: &[u32]) -> Self {
            Self {
                words: words.to_vec(),
                polls_until_done: Some(2),
                calls: Vec::new(),
                clock: Cell::new(0),
                polls: Cell::new(0),
                bin_time: None,
                enabled: false,
            }
        }

        pub fn stalled() -> Self {
            Self {
                polls_until_done: None,
                ..Self::new(&[])
            }
        }
    }

    impl CounterFrontEnd for MockFrontEnd {
        type Transfer = CaptureBuffer;

        fn disable_counter(&mut self) {
            self.calls.push("disable");
            self.enabled = false;
        }

        fn clear_counter(&mut self) {
            self.calls.push("clear");
        }

        fn reset_shift_counters(&mut self) {
            assert!(!self.enabled, "shift counters reset while counting");
            self.calls.push("reset_shift");
        }

        fn arm_counter_program(&mut self, bin_time: u32) {
            self.calls.push("arm");
            self.bin_time = Some(bin_time);
        }

        fn start_transfer(&mut self, buffer: CaptureBuffer) -> CaptureBuffer {
            self.calls.push("start_transfer");
            self.polls.set(0);
            buffer
        }

        fn enable_counter(&mut self) {
            self.calls.push("enable");
            self.enabled = true;
        }

        fn transfer_complete(&self, _transfer: &CaptureBuffer) -> bool {
            self.polls.set(self.polls.get() + 1);
            self.polls_until_done
                .is_some_and(|polls| self.polls.get() >= polls)
        }

        fn finish_transfer(&mut self, mut transfer: CaptureBuffer) -> CaptureBuffer {
            self.calls.push("finish_transfer");
            for (dst, src) in transfer.words_mut().iter_mut().zip(&self.words) {
                *dst = *src;
            }
            transfer
        }

        fn abort_transfer(&mut self, transfer: CaptureBuffer) -> CaptureBuffer {
            self.calls.push("abort_transfer");
            transfer
        }

        fn now_micros(&self) -> u64 {
            let now = self.clock.get() + 1_000;
            self.clock.set(now);
            now
        }
    }

    #[test]
    fn sequences_the_front_end() {
        let mut pool = test_pool(4);
        let mut front_end = MockFrontEnd::new(&[0x0403_0201]);
        let config = AcquisitionConfig::new(3, 2).unwrap();
        let buffer = pool.allocate(config.words_needed()).unwrap();

        let buffer = capture(&mut front_end, buffer, &config, None).unwrap();
        assert_eq!(buffer.words(), &[0x0403_0201]);
        assert_eq!(
            front_end.calls,
            [
                "disable",
                "clear",
                "reset_shift",
                "arm",
                "start_transfer",
                "enable",
                "finish_transfer",
                "disable"
            ]
        );
        assert_eq!(front_end.bin_time, Some(2));
        assert!(!front_end.enabled);
    }

    #[test]
    fn times_out_and_returns_the_buffer() {
        let mut pool = test_pool(4);
        let mut front_end = MockFrontEnd::stalled();
        let config = AcquisitionConfig::new(3, 0).unwrap();
        let buffer = pool.allocate(config.words_needed()).unwrap();

        let Err(CaptureError::TimedOut(buffer)) = capture(&mut front_end, buffer, &config, Some(5))
        else {
            panic!("capture should time out");
        };
        assert_eq!(buffer.len(), 1);
        assert!(front_end.calls.ends_with(&["abort_transfer", "disable"]));
        assert!(!front_end.calls.contains(&"finish_transfer"));
        assert!(!front_end.enabled);

        // The reclaimed buffer can be released and a new run re-armed from a clean state
        pool.release(buffer);
        front_end.calls.clear();
        front_end.polls_until_done = Some(1);
        let buffer = pool.allocate(1).unwrap();
        assert!(capture(&mut front_end, buffer, &config, Some(5)).is_ok());
        assert_eq!(
            front_end.calls[..4],
            ["disable", "clear", "reset_shift", "arm"]
        );
    }

    #[test]
    fn completes_before_the_deadline() {
        let mut pool = test_pool(4);
        let mut front_end = MockFrontEnd::new(&[7, 8]);
        let config = AcquisitionConfig::new(4, 0).unwrap();
        let buffer = pool.allocate(config.words_needed()).unwrap();

        let buffer = capture(&mut front_end, buffer, &config, Some(1_000)).unwrap();
        assert_eq!(buffer.words(), &[7, 8]);
    }
}
