// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Rear-view camera pipeline for Rust
//!
//! This crate drives the rear-view camera path of an embedded SoC: a sensor
//! feeds the video input (VIP) block, completed frames are optionally rotated
//! by 90 degrees, and the newest frame is published to a hardware compositor
//! (MLC) layer whenever the reverse-gear signal is engaged.
//!
//! Frames live in a fixed pool allocated once at start-up and are handed
//! between stages through four FIFO queues (capture-empty, capture-done,
//! rotation-empty, rotation-done). Every stage applies a newest-wins policy:
//! stale frames are recycled, never displayed.
//!
//! # Quick Start
//!
//! ```no_run
//! use rearcam::camera;
//! use rearcam::config::RearcamConfig;
//! use rearcam::hw::HwEvent;
//! use rearcam::sim::SimBoard;
//! use std::sync::Arc;
//!
//! let board = Arc::new(SimBoard::new());
//! let cam = camera::create_rearcam()
//!     .with_config(RearcamConfig::default())
//!     .with_board(SimBoard::board(&board))
//!     .open()?;
//!
//! let irq = cam.irq_line(64)?;
//! board.set_gear_level(true);
//! irq.raise(HwEvent::GearEdge);
//! // capture and vsync producers raise the remaining events
//! cam.shutdown();
//! # Ok::<(), rearcam::Error>(())
//! ```
//!
//! # Features
//!
//! - Fixed frame pool with 64-byte aligned YUV420 planes
//! - Lock-protected buffer queues with non-mutating peek
//! - Marker-delimited power-sequence parsing and execution
//! - Three-worker 90 degree rotation (luma, Cb, Cr in parallel)
//! - Debounced reverse-gear activation with self-correcting recheck

use std::{error, fmt, io};

pub use power::SequenceError;

/// Error type for rearcam operations
#[derive(Debug)]
pub enum Error {
    /// I/O error, typically from reading configuration or spawning threads
    Io(io::Error),

    /// JSON configuration could not be deserialized
    Json(serde_json::Error),

    /// Configuration failed validation
    Config(String),

    /// Malformed power-sequence word array
    Sequence(SequenceError),

    /// The contiguous buffer region cannot satisfy an allocation
    OutOfMemory { requested: usize, available: usize },

    /// Plane dimensions or strides do not fit the destination
    Geometry(String),

    /// A hardware capability call failed
    Hardware(String),

    /// The pipeline has been shut down
    ShutDown,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Json(err) => write!(f, "configuration parse error: {}", err),
            Error::Config(msg) => write!(f, "invalid configuration: {}", msg),
            Error::Sequence(err) => write!(f, "power sequence error: {}", err),
            Error::OutOfMemory {
                requested,
                available,
            } => write!(
                f,
                "buffer allocation of {} bytes failed ({} bytes available)",
                requested, available
            ),
            Error::Geometry(msg) => write!(f, "invalid plane geometry: {}", msg),
            Error::Hardware(msg) => write!(f, "hardware error: {}", msg),
            Error::ShutDown => write!(f, "pipeline has been shut down"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Json(err) => Some(err),
            Error::Sequence(err) => Some(err),
            Error::Config(_)
            | Error::OutOfMemory { .. }
            | Error::Geometry(_)
            | Error::Hardware(_)
            | Error::ShutDown => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

impl From<SequenceError> for Error {
    fn from(err: SequenceError) -> Self {
        Error::Sequence(err)
    }
}

/// The queue module provides the lock-protected FIFO of buffer handles.
pub mod queue;

/// The buffer module provides the frame pool and plane layout rules.
pub mod buffer;

/// The power module provides the power-sequence parser and interpreter.
pub mod power;

/// The hw module provides the hardware capability traits.
pub mod hw;

/// The sim module provides an in-memory board implementing every hardware trait.
pub mod sim;

/// The hooks module provides the vendor customisation points.
pub mod hooks;

/// The worker module provides single-threaded deferred work queues.
pub mod worker;

/// The config module provides the deserializable pipeline configuration.
pub mod config;

/// The stats module provides pipeline counters.
pub mod stats;

/// The camera module provides the public pipeline handle and its builder.
pub mod camera;

mod activation;
mod capture;
mod display;
mod pipeline;
mod rotation;

pub use activation::Decision;
pub use rotation::rotate_plane;

/// Maximum number of capture (and rotation) buffers in the pool
pub const MAX_BUFFER_COUNT: usize = 13;

/// Minimum number of buffers needed to keep capture running while one is displayed
pub const MIN_BUFFER_COUNT: usize = 2;

/// Largest capture, rotated or display dimension in pixels
pub const MAX_DIMENSION: u32 = 4096;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_display() {
        let err = Error::OutOfMemory {
            requested: 8192,
            available: 4096,
        };
        assert_eq!(
            err.to_string(),
            "buffer allocation of 8192 bytes failed (4096 bytes available)"
        );
        assert!(err.source().is_none());
    }

    #[test]
    fn test_error_source() {
        let err: Error = SequenceError::MissingEnd { start: 3 }.into();
        assert!(err.source().is_some());
        assert!(err.to_string().contains("index 3"));
    }
}
