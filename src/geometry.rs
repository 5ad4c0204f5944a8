// SPDX-License-Identifier: Apache-2.0

//! Mapping between bins and hardware transfer words.
//!
//! The PIO shift register pushes one 32-bit word to its RX FIFO every time its shift count
//! reaches the push threshold. Each bin contributes `lane_count` bits, so several bins share a
//! word. All values here are recomputed for every run.

/// Width of the PIO input shift register
pub const SHIFT_REG_WIDTH: u32 = 32;

/// Useful bits per transfer word for `lane_count` pins.
///
/// When `lane_count` doesn't divide [`SHIFT_REG_WIDTH`], the push happens before the last partial
/// group, and the remaining bits of the word are wasted.
pub const fn bits_per_transfer_word(lane_count: u32) -> u32 {
    debug_assert!(lane_count >= 1 && lane_count <= SHIFT_REG_WIDTH);
    SHIFT_REG_WIDTH - (SHIFT_REG_WIDTH % lane_count)
}

/// Bins packed into one transfer word
pub const fn sub_samples_per_word(lane_count: u32) -> u32 {
    debug_assert!(lane_count >= 1 && lane_count <= SHIFT_REG_WIDTH);
    SHIFT_REG_WIDTH / lane_count
}

/// Transfer words required to capture `bin_count` bins.
///
/// One extra bin is always captured: the counter is already integrating when the program
/// starts, so the first reading is stale and gets dropped by the extractor.
pub const fn words_needed(bin_count: u32, lane_count: u32) -> usize {
    let total_bits = (bin_count as usize + 1) * lane_count as usize;
    total_bits.div_ceil(SHIFT_REG_WIDTH as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn divisors_fill_the_word() {
        for lane_count in [1, 2, 4, 8, 16, 32] {
            assert_eq!(sub_samples_per_word(lane_count) * lane_count, SHIFT_REG_WIDTH);
            assert_eq!(bits_per_transfer_word(lane_count), SHIFT_REG_WIDTH);
        }
    }

    #[test]
    fn non_divisors_waste_the_tail() {
        assert_eq!(bits_per_transfer_word(3), 30);
        assert_eq!(bits_per_transfer_word(5), 30);
        assert_eq!(bits_per_transfer_word(7), 28);
        assert_eq!(bits_per_transfer_word(31), 31);
    }

    #[test]
    fn eight_lanes_pack_four_bins() {
        for bin_count in 1..=1000u32 {
            assert_eq!(
                words_needed(bin_count, 8),
                (bin_count as usize + 1).div_ceil(4),
                "bin_count = {}",
                bin_count
            );
        }
    }

    #[test]
    fn extra_bin_can_spill_into_a_new_word() {
        assert_eq!(words_needed(3, 8), 1);
        assert_eq!(words_needed(4, 8), 2);
        assert_eq!(words_needed(1, 32), 2);
    }
}
