//! This [RP2040](rp2040_hal) project counts photomultiplier (PMT) pulses in fixed-length time
//! bins. An 8-bit counter board is latched and cleared by a PIO program once per bin, and the
//! latched counts are streamed into RAM by DMA after an external trigger. Runs are configured and
//! read back over a USB serial console.
//!
//! ## Console protocol
//!
//! Lines end with a carriage return and can be edited with backspace or delete.
//!
//! - `INIT`: prompts for the number of bins, then the bin time (in 125 MHz clock cycles).
//! - `SET <bins> <bin time>`: configures a run in one line.
//! - `GETALL`, `GETSUM`, `GETBIN`: after a capture, print every bin as text, the sum of all
//!   bins, or every bin as one raw byte. Data is wrapped in `||` delimiters.
//! - `DEL` or `DELETE`: discard the capture.
//!
//! See [`controller::RunState`] for the full cycle.
//!
//! ## Crate features
//!
//! - `activity_led`: Lights the on-board LED while a capture is in progress. Enabled by default.
//! - `capture_timeout`: Gives up on a capture after [`config::CAPTURE_TIMEOUT_MS`] instead of
//!   waiting forever for the trigger. The run is discarded and the console returns to the first
//!   prompt.
//! - `trace_capture_words`: Logs every captured transfer word. Very noisy!
//!
//! Only the portable modules are built for the host. [`components`] and [`interrupt`] require an
//! RP2040 target.

// Copyright 2024 PMT counter contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), feature(doc_auto_cfg), feature(doc_cfg_hide))]

mod fmt;

pub mod buffer;
pub mod capture;
pub mod command;
#[cfg(target_os = "none")]
pub mod components;
pub mod config;
pub mod controller;
pub mod error;
pub mod geometry;
#[cfg(target_os = "none")]
pub mod interrupt;
pub mod report;
