// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use std::fmt;
use std::process::ExitCode;

/// CLI-specific error type with exit code mapping
#[derive(Debug)]
pub enum CliError {
    /// Invalid command-line arguments
    InvalidArgs(String),
    /// Configuration file or power sequence rejected
    ConfigError(String),
    /// Board, sensor or buffer allocation failure
    HardwareError(String),
    /// The pipeline did not reach the expected state in time
    Timeout(String),
    /// Any other error from the rearcam library
    General(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::InvalidArgs(msg) => write!(f, "Invalid arguments: {}", msg),
            CliError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            CliError::HardwareError(msg) => write!(f, "Hardware error: {}", msg),
            CliError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            CliError::General(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for CliError {}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    fn code(&self) -> u8 {
        match self {
            CliError::InvalidArgs(_) => 2,
            CliError::ConfigError(_) => 3,
            CliError::HardwareError(_) => 4,
            CliError::Timeout(_) => 6,
            CliError::General(_) => 1,
        }
    }
}

/// Map rearcam::Error to CliError with appropriate exit codes
impl From<rearcam::Error> for CliError {
    fn from(err: rearcam::Error) -> Self {
        use rearcam::Error;

        match err {
            Error::Io(io_err) => match io_err.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                    CliError::ConfigError(format!("Cannot read configuration: {}", io_err))
                }
                std::io::ErrorKind::TimedOut => {
                    CliError::Timeout(format!("Operation timed out: {}", io_err))
                }
                _ => CliError::General(format!("I/O error: {}", io_err)),
            },

            Error::Json(_) | Error::Config(_) | Error::Sequence(_) | Error::Geometry(_) => {
                CliError::ConfigError(err.to_string())
            }

            Error::OutOfMemory { .. } | Error::Hardware(_) => {
                CliError::HardwareError(err.to_string())
            }

            Error::ShutDown => CliError::General(err.to_string()),
        }
    }
}

/// Helper function to convert result to exit code
pub fn result_to_exit_code<T>(result: Result<T, CliError>) -> ExitCode {
    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            e.exit_code()
        }
    }
}
