// SPDX-License-Identifier: Apache-2.0

//! Capture buffer storage.
//!
//! The firmware reserves one static block of [`CAPTURE_POOL_WORDS`](crate::config::CAPTURE_POOL_WORDS)
//! words at start-up. Each run borrows a prefix of it as a [`CaptureBuffer`] and hands it back
//! once the results are reported or discarded, so at most one buffer is ever live.
use core::fmt;

/// Reasons a capture buffer cannot be reserved. Both are fatal for the run.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum AllocError {
    /// The run needs more words than the pool holds
    TooLarge {
        /// Words needed by the run
        requested: usize,
        /// Words available in the pool
        capacity: usize,
    },
    /// The previous buffer was never released
    InUse,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooLarge {
                requested,
                capacity,
            } => write!(
                f,
                "capture needs {} words but only {} are available",
                requested, capacity
            ),
            Self::InUse => f.write_str("capture buffer is still in use"),
        }
    }
}

/// Transfer words for one run. Written by DMA during the capture, read afterwards.
pub struct CaptureBuffer {
    /// Whole pool, of which the first `len` words belong to this run
    storage: &'static mut [u32],
    /// Words in this run
    len: usize,
}

impl CaptureBuffer {
    /// Number of transfer words in the buffer
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false for a buffer handed out by [`BufferPool::allocate`]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Captured words
    pub fn words(&self) -> &[u32] {
        &self.storage[..self.len]
    }

    /// Captured words, for writers other than DMA
    pub fn words_mut(&mut self) -> &mut [u32] {
        &mut self.storage[..self.len]
    }
}

impl fmt::Debug for CaptureBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureBuffer").field("len", &self.len).finish()
    }
}

// SAFETY: `storage` is a `'static` borrow, so the pointer stays valid and unaliased while the
// buffer is owned by a DMA transfer, and `len` never exceeds `storage.len()`.
unsafe impl embedded_dma::WriteBuffer for CaptureBuffer {
    type Word = u32;

    unsafe fn write_buffer(&mut self) -> (*mut Self::Word, usize) {
        (self.storage.as_mut_ptr(), self.len)
    }
}

/// Single-slot allocator for [`CaptureBuffer`]s.
pub struct BufferPool {
    /// Backing storage while no buffer is live
    storage: Option<&'static mut [u32]>,
    /// Total words in the backing storage
    capacity: usize,
}

impl BufferPool {
    /// Wrap the static backing storage
    pub fn new(storage: &'static mut [u32]) -> Self {
        Self {
            capacity: storage.len(),
            storage: Some(storage),
        }
    }

    /// Words available to a single run
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// True when no buffer is live
    pub fn is_available(&self) -> bool {
        self.storage.is_some()
    }

    /// Reserve a zeroed buffer of `words` transfer words
    pub fn allocate(&mut self, words: usize) -> Result<CaptureBuffer, AllocError> {
        if words == 0 || words > self.capacity {
            return Err(AllocError::TooLarge {
                requested: words,
                capacity: self.capacity,
            });
        }
        let storage = self.storage.take().ok_or(AllocError::InUse)?;
        storage[..words].fill(0);
        debug!("Allocated capture buffer of {} words", words);
        Ok(CaptureBuffer {
            storage,
            len: words,
        })
    }

    /// Return a buffer to the pool once its data is no longer needed
    pub fn release(&mut self, buffer: CaptureBuffer) {
        debug!("Released capture buffer of {} words", buffer.len);
        if self.storage.replace(buffer.storage).is_some() {
            warn!("Capture buffer released into an occupied pool");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::{boxed::Box, vec};

    /// Pool backed by leaked heap storage
    pub(crate) fn test_pool(words: usize) -> BufferPool {
        BufferPool::new(Box::leak(vec![0u32; words].into_boxed_slice()))
    }

    #[test]
    fn allocate_release_cycle() {
        let mut pool = test_pool(8);
        let mut buffer = pool.allocate(3).unwrap();
        assert_eq!(buffer.len(), 3);
        assert!(!pool.is_available());
        buffer.words_mut().copy_from_slice(&[1, 2, 3]);
        pool.release(buffer);
        assert!(pool.is_available());

        // Reallocation clears stale data
        let buffer = pool.allocate(4).unwrap();
        assert_eq!(buffer.words(), &[0, 0, 0, 0]);
    }

    #[test]
    fn only_one_buffer_is_live() {
        let mut pool = test_pool(8);
        let _buffer = pool.allocate(2).unwrap();
        assert_eq!(pool.allocate(2).unwrap_err(), AllocError::InUse);
    }

    #[test]
    fn rejects_oversized_requests() {
        let mut pool = test_pool(4);
        assert_eq!(
            pool.allocate(5).unwrap_err(),
            AllocError::TooLarge {
                requested: 5,
                capacity: 4
            }
        );
        assert!(pool.allocate(0).is_err());
        assert!(pool.is_available());
    }
}
