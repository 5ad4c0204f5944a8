// SPDX-License-Identifier: Apache-2.0

//! Errors that end the acquisition loop.
use core::fmt;

use crate::buffer::AllocError;

/// A fatal error. The firmware reports it and halts until reset.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum Error {
    /// The capture buffer for a run couldn't be reserved
    Allocation(AllocError),
    /// Writing to the operator console failed
    Console,
}

impl From<AllocError> for Error {
    fn from(err: AllocError) -> Self {
        Self::Allocation(err)
    }
}

impl From<fmt::Error> for Error {
    fn from(_: fmt::Error) -> Self {
        Self::Console
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allocation(err) => write!(
                f,
                "Error in memory allocation ({}), restart the device and report the issue.",
                err
            ),
            Self::Console => f.write_str("Console output failed"),
        }
    }
}
