// SPDX-License-Identifier: Apache-2.0

//! Top-level acquisition loop: configure, capture, report, repeat.
use core::convert::Infallible;

use crate::{
    buffer::{BufferPool, CaptureBuffer},
    capture::{self, CaptureError, CounterFrontEnd},
    command::{self, Command, Console, Line},
    config::{AcquisitionConfig, InputError, RunSettings, MAX_BIN_TIME},
    error::Error,
    report::{self, ReportMode},
};

/// Printed once at start-up
pub const BANNER: &str = "<--- PMT counter --->\r\n";
/// Prompt while waiting for `INIT` or `SET`
const MODE_PROMPT: &str = "Type INIT or \"SET N_SAMPLES EXPTIME\" to start: \r\n";
/// Prompt for the bin count after `INIT`
const BIN_COUNT_PROMPT: &str = "N of samples: \r\n";
/// Prompt while waiting for a retrieval command
const RETRIEVAL_PROMPT: &str =
    "Type GETALL or GETSUM to retrieve previous data, DEL to delete it: \r\n";
/// Diagnostic for unrecognized commands
const UNKNOWN_COMMAND: &str = "ERR: Unknown command \r\n";

/// What to do with a finished capture.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Retrieval {
    /// Print the data
    Report(ReportMode),
    /// Drop the data without printing
    Discard,
}

/// Position in the acquisition cycle. States after [`RunState::Ready`] own the run's buffer.
#[derive(Debug)]
pub enum RunState {
    /// Between runs
    Idle,
    /// Waiting for `INIT` or `SET`
    AwaitingMode,
    /// Waiting for a bin count after `INIT`
    AwaitingBinCount,
    /// Waiting for a bin time after `INIT`
    AwaitingBinTime {
        /// Bin count already accepted
        bin_count: u32,
    },
    /// Configured, buffer not yet reserved
    Ready(AcquisitionConfig),
    /// Buffer reserved, capture about to run
    Capturing(AcquisitionConfig, CaptureBuffer),
    /// Capture finished, waiting for `GETALL`, `GETSUM`, `GETBIN` or `DEL`
    AwaitingRetrievalCommand(AcquisitionConfig, CaptureBuffer),
    /// Retrieval command received
    Reporting(AcquisitionConfig, CaptureBuffer, Retrieval),
}

/// Drives the operator console and counter front-end through repeated runs.
pub struct RunController<C, F> {
    /// Operator console
    console: C,
    /// Counter hardware
    front_end: F,
    /// Storage for the single live capture buffer
    pool: BufferPool,
    /// Fixed settings
    settings: RunSettings,
    /// Last line typed by the operator
    line: Line,
}

impl<C: Console, F: CounterFrontEnd> RunController<C, F> {
    /// Create a controller in the [`RunState::Idle`] state
    pub fn new(console: C, front_end: F, pool: BufferPool, settings: RunSettings) -> Self {
        Self {
            console,
            front_end,
            pool,
            settings,
            line: Line::new(),
        }
    }

    /// Run forever. Only returns on a fatal error.
    pub fn run(&mut self) -> Result<Infallible, Error> {
        self.console.write_str(BANNER)?;
        loop {
            self.run_cycle()?;
        }
    }

    /// Run one full cycle from [`RunState::Idle`] back to [`RunState::Idle`]
    pub fn run_cycle(&mut self) -> Result<(), Error> {
        let mut state = self.step(RunState::Idle)?;
        while !matches!(state, RunState::Idle) {
            state = self.step(state)?;
        }
        Ok(())
    }

    /// Perform one state transition
    pub fn step(&mut self, state: RunState) -> Result<RunState, Error> {
        let next = match state {
            RunState::Idle => {
                self.console.write_str(MODE_PROMPT)?;
                RunState::AwaitingMode
            }
            RunState::AwaitingMode => match self.next_command()? {
                Command::Init => {
                    self.console.write_str(BIN_COUNT_PROMPT)?;
                    RunState::AwaitingBinCount
                }
                Command::Set(config) => self.configured(config)?,
                _ => {
                    self.console.write_str(UNKNOWN_COMMAND)?;
                    self.console.write_str(MODE_PROMPT)?;
                    RunState::AwaitingMode
                }
            },
            RunState::AwaitingBinCount => {
                self.read_line()?;
                match command::parse_bin_count(&self.line) {
                    Ok(bin_count) => {
                        self.prompt_bin_time()?;
                        RunState::AwaitingBinTime { bin_count }
                    }
                    Err(err) => {
                        self.input_error(err)?;
                        self.console.write_str(BIN_COUNT_PROMPT)?;
                        RunState::AwaitingBinCount
                    }
                }
            }
            RunState::AwaitingBinTime { bin_count } => {
                self.read_line()?;
                match command::parse_bin_time(&self.line)
                    .and_then(|bin_time| AcquisitionConfig::new(bin_count, bin_time))
                {
                    Ok(config) => self.configured(config)?,
                    Err(err) => {
                        self.input_error(err)?;
                        self.prompt_bin_time()?;
                        RunState::AwaitingBinTime { bin_count }
                    }
                }
            }
            RunState::Ready(config) => match self.pool.allocate(config.words_needed()) {
                Ok(buffer) => RunState::Capturing(config, buffer),
                Err(err) => {
                    error!("Capture buffer allocation failed: {:?}", err);
                    return Err(err.into());
                }
            },
            RunState::Capturing(config, buffer) => {
                match capture::capture(
                    &mut self.front_end,
                    buffer,
                    &config,
                    self.settings.capture_timeout_ms,
                ) {
                    Ok(buffer) => {
                        self.console.write_str(RETRIEVAL_PROMPT)?;
                        RunState::AwaitingRetrievalCommand(config, buffer)
                    }
                    Err(err) => {
                        write!(self.console, "ERR: {}\r\n", err)?;
                        let CaptureError::TimedOut(buffer) = err;
                        self.pool.release(buffer);
                        RunState::Idle
                    }
                }
            }
            RunState::AwaitingRetrievalCommand(config, buffer) => {
                let retrieval = match self.next_command()? {
                    Command::GetAll => Some(Retrieval::Report(ReportMode::FullText)),
                    Command::GetSum => Some(Retrieval::Report(ReportMode::SumText)),
                    Command::GetBin => Some(Retrieval::Report(ReportMode::FullBinary)),
                    Command::Delete => Some(Retrieval::Discard),
                    _ => None,
                };
                match retrieval {
                    Some(retrieval) => RunState::Reporting(config, buffer, retrieval),
                    None => {
                        self.console.write_str(UNKNOWN_COMMAND)?;
                        self.console.write_str(RETRIEVAL_PROMPT)?;
                        RunState::AwaitingRetrievalCommand(config, buffer)
                    }
                }
            }
            RunState::Reporting(config, buffer, retrieval) => {
                if let Retrieval::Report(mode) = retrieval {
                    report::write_report(&mut self.console, mode, &buffer, &config)?;
                }
                self.pool.release(buffer);
                RunState::Idle
            }
        };
        Ok(next)
    }

    /// Borrow the console, mainly to report a fatal error
    pub fn console(&mut self) -> &mut C {
        &mut self.console
    }

    /// Announce an accepted configuration
    fn configured(&mut self, config: AcquisitionConfig) -> Result<RunState, Error> {
        info!(
            "Run configured: {} bins of {} cycles",
            config.bin_count(),
            config.bin_time()
        );
        write!(
            self.console,
            "N_SAMPLES = {} ,EXP_TIME = {};\r\n",
            config.bin_count(),
            config.bin_time()
        )?;
        Ok(RunState::Ready(config))
    }

    /// Read the next line into `self.line`
    fn read_line(&mut self) -> Result<(), Error> {
        command::read_line(&mut self.console, &mut self.line)?;
        Ok(())
    }

    /// Read and classify the next line
    fn next_command(&mut self) -> Result<Command, Error> {
        self.read_line()?;
        let command = command::classify(&self.line);
        debug!("Command: {:?}", command);
        Ok(command)
    }

    /// Prompt for the bin time after a bin count was accepted
    fn prompt_bin_time(&mut self) -> Result<(), Error> {
        write!(
            self.console,
            "Bin time (units of 1/125MHz) [0-{}]: \r\n",
            MAX_BIN_TIME
        )?;
        Ok(())
    }

    /// Report a rejected value to the operator
    fn input_error(&mut self, err: InputError) -> Result<(), Error> {
        write!(self.console, "ERR: {}\r\n", err)?;
        Ok(())
    }
}
