// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::error::CliError;
use rearcam::config::RearcamConfig;
use signal_hook::consts::SIGINT;
use signal_hook::flag;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Parse a word list such as `"0x12345678, 0xff110000 17 1 0"`.
///
/// Words are separated by commas and/or whitespace and may be decimal or
/// `0x`-prefixed hexadecimal.
pub fn parse_words(s: &str) -> Result<Vec<u32>, CliError> {
    s.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .map(|w| {
            let parsed = match w.strip_prefix("0x").or_else(|| w.strip_prefix("0X")) {
                Some(hex) => u32::from_str_radix(hex, 16),
                None => w.parse::<u32>(),
            };
            parsed.map_err(|_| CliError::InvalidArgs(format!("Invalid word: {}", w)))
        })
        .collect()
}

/// Load and validate a configuration file, or the defaults without one.
pub fn load_config(path: Option<&Path>) -> Result<RearcamConfig, CliError> {
    let config = match path {
        Some(path) => {
            log::debug!("Loading configuration from {}", path.display());
            RearcamConfig::from_file(path)?
        }
        None => RearcamConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

/// Install signal handler for graceful shutdown on Ctrl+C
///
/// Returns an Arc<AtomicBool> that will be set to true when SIGINT is received.
pub fn install_signal_handler() -> Result<Arc<AtomicBool>, CliError> {
    let term = Arc::new(AtomicBool::new(false));

    flag::register(SIGINT, Arc::clone(&term))
        .map_err(|e| CliError::General(format!("Failed to register signal handler: {}", e)))?;

    log::debug!("Installed SIGINT handler");
    Ok(term)
}

/// Sleep for `duration` in short steps, returning early on Ctrl+C.
pub fn sleep_unless(term: &AtomicBool, duration: Duration) {
    let start = Instant::now();
    while !term.load(Ordering::Relaxed) && start.elapsed() < duration {
        thread::sleep(Duration::from_millis(5).min(duration));
    }
}

/// Poll `cond` until it holds. Returns `false` on timeout or Ctrl+C.
pub fn wait_until(term: &AtomicBool, timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while !cond() {
        if term.load(Ordering::Relaxed) || start.elapsed() >= timeout {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
    true
}
