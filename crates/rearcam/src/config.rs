// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::{Error, MAX_BUFFER_COUNT, MAX_DIMENSION, MIN_BUFFER_COUNT};
use serde::{Deserialize, Serialize};
use std::{fmt, fs, path::Path, time::Duration};

/// Delay before re-deciding after the gear line is released.
pub const RELEASE_DEBOUNCE: Duration = Duration::from_millis(100);

/// Complete pipeline configuration, read once before the pipeline opens.
///
/// Every field has a default so a configuration file only needs to name
/// what differs from a 720x480 progressive sensor on a 1024x600 panel.
///
/// # Example
///
/// ```
/// use rearcam::config::RearcamConfig;
///
/// let cfg = RearcamConfig::from_json_str(r#"{ "rotation": true, "buffer_count": 6 }"#)?;
/// assert_eq!(cfg.buffer_count, 6);
/// assert_eq!(cfg.capture.width, 720);
/// # Ok::<(), rearcam::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RearcamConfig {
    pub capture: CaptureConfig,
    pub display: DisplayConfig,
    pub gear: GearConfig,
    pub power: PowerConfig,
    /// Rotate captured frames by 90 degrees before display
    pub rotation: bool,
    pub buffer_count: usize,
    /// `[register, value]` pairs written to the sensor after power-up
    pub sensor_init: Vec<[u8; 2]>,
    /// Size of the contiguous region buffers are carved from
    pub cma_bytes: usize,
}

impl Default for RearcamConfig {
    fn default() -> Self {
        RearcamConfig {
            capture: CaptureConfig::default(),
            display: DisplayConfig::default(),
            gear: GearConfig::default(),
            power: PowerConfig::default(),
            rotation: false,
            buffer_count: MAX_BUFFER_COUNT,
            sensor_init: Vec::new(),
            cma_bytes: 64 << 20,
        }
    }
}

impl RearcamConfig {
    pub fn from_json_str(json: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Checks the values the pipeline relies on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid field.
    pub fn validate(&self) -> Result<(), Error> {
        let cap = &self.capture;
        if cap.width == 0 || cap.height == 0 || cap.width % 2 != 0 || cap.height % 2 != 0 {
            return Err(Error::Config(format!(
                "capture size {}x{} must be non-zero and even",
                cap.width, cap.height
            )));
        }
        if cap.width > MAX_DIMENSION || cap.height > MAX_DIMENSION {
            return Err(Error::Config(format!(
                "capture size {}x{} exceeds {}",
                cap.width, cap.height, MAX_DIMENSION
            )));
        }
        if !(MIN_BUFFER_COUNT..=MAX_BUFFER_COUNT).contains(&self.buffer_count) {
            return Err(Error::Config(format!(
                "buffer_count {} outside {}..={}",
                self.buffer_count, MIN_BUFFER_COUNT, MAX_BUFFER_COUNT
            )));
        }
        let sync = &self.display.sync;
        if sync.h_active == 0 || sync.v_active == 0 {
            return Err(Error::Config("display active area must be non-zero".into()));
        }
        if sync.h_active > MAX_DIMENSION || sync.v_active > MAX_DIMENSION {
            return Err(Error::Config(format!(
                "display active area {}x{} exceeds {}",
                sync.h_active, sync.v_active, MAX_DIMENSION
            )));
        }
        if self.rotation {
            let rotated = self.rotated_width();
            if rotated < cap.height {
                return Err(Error::Config(format!(
                    "rotated width {} narrower than capture height {} for a {}x{} display",
                    rotated, cap.height, sync.h_active, sync.v_active
                )));
            }
            if rotated > MAX_DIMENSION {
                return Err(Error::Config(format!(
                    "rotated width {} exceeds {} for a {}x{} display",
                    rotated, MAX_DIMENSION, sync.h_active, sync.v_active
                )));
            }
        }
        if self.gear.detect_delay_ms == 0 {
            return Err(Error::Config("gear.detect_delay_ms must be non-zero".into()));
        }
        Ok(())
    }

    /// Width of a rotated frame, stretched to the display aspect so the
    /// portrait image is letterboxed rather than distorted.
    pub fn rotated_width(&self) -> u32 {
        rate_width(self.capture.width, &self.display.sync)
    }

    /// Width of a rotated chroma plane.
    pub fn rotated_chroma_width(&self) -> u32 {
        rate_width(self.capture.width / 2, &self.display.sync)
    }

    pub fn detect_delay(&self) -> Duration {
        Duration::from_millis(self.gear.detect_delay_ms)
    }
}

fn rate_width(width: u32, sync: &DisplaySync) -> u32 {
    let scaled = u64::from(sync.h_active) * u64::from(width) / u64::from(sync.v_active.max(1));
    u32::try_from(scaled.saturating_sub(1)).unwrap_or(u32::MAX)
}

/// Video input timing and format.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaptureConfig {
    pub width: u32,
    pub height: u32,
    /// Frames arrive as two fields, even then odd
    pub interlace: bool,
    pub port: u32,
    pub external_sync: bool,
    pub h_back_porch: u32,
    pub v_back_porch: u32,
    pub h_sync_width: u32,
    pub v_sync_width: u32,
    pub data_order: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        CaptureConfig {
            width: 720,
            height: 480,
            interlace: false,
            port: 0,
            external_sync: false,
            h_back_porch: 4,
            v_back_porch: 3,
            h_sync_width: 1,
            v_sync_width: 1,
            data_order: 0,
        }
    }
}

/// Display output timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DisplaySync {
    pub h_active: u32,
    pub v_active: u32,
    pub h_front_porch: u32,
    pub h_back_porch: u32,
    pub h_sync_width: u32,
    pub v_front_porch: u32,
    pub v_back_porch: u32,
    pub v_sync_width: u32,
    pub clock_hz: u32,
}

impl Default for DisplaySync {
    fn default() -> Self {
        DisplaySync {
            h_active: 1024,
            v_active: 600,
            h_front_porch: 160,
            h_back_porch: 140,
            h_sync_width: 20,
            v_front_porch: 12,
            v_back_porch: 20,
            v_sync_width: 3,
            clock_hz: 51_200_000,
        }
    }
}

impl DisplaySync {
    /// Refresh rate implied by the timing.
    pub fn refresh_hz(&self) -> f64 {
        let h_total = self.h_active + self.h_front_porch + self.h_back_porch + self.h_sync_width;
        let v_total = self.v_active + self.v_front_porch + self.v_back_porch + self.v_sync_width;
        f64::from(self.clock_hz) / (f64::from(h_total) * f64::from(v_total)).max(1.0)
    }
}

/// Overlay pixel formats supported by the RGB layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RgbFormat {
    R5g6b5,
    A1r5g5b5,
    R8g8b8,
    #[default]
    A8r8g8b8,
    X8r8g8b8,
}

impl RgbFormat {
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            RgbFormat::R5g6b5 | RgbFormat::A1r5g5b5 => 2,
            RgbFormat::R8g8b8 => 3,
            RgbFormat::A8r8g8b8 | RgbFormat::X8r8g8b8 => 4,
        }
    }

    pub fn has_alpha(self) -> bool {
        matches!(self, RgbFormat::A1r5g5b5 | RgbFormat::A8r8g8b8)
    }
}

impl fmt::Display for RgbFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            RgbFormat::R5g6b5 => "r5g6b5",
            RgbFormat::A1r5g5b5 => "a1r5g5b5",
            RgbFormat::R8g8b8 => "r8g8b8",
            RgbFormat::A8r8g8b8 => "a8r8g8b8",
            RgbFormat::X8r8g8b8 => "x8r8g8b8",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DisplayConfig {
    pub sync: DisplaySync,
    pub overlay_format: RgbFormat,
    pub video_priority: u32,
    pub background: u32,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        DisplayConfig {
            sync: DisplaySync::default(),
            overlay_format: RgbFormat::default(),
            video_priority: 1,
            background: 0x000000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct GearConfig {
    /// The line reads high when reverse is engaged
    pub active_high: bool,
    /// Settle time before acting on an engaged gear line
    pub detect_delay_ms: u64,
}

impl Default for GearConfig {
    fn default() -> Self {
        GearConfig {
            active_high: true,
            detect_delay_ms: 300,
        }
    }
}

/// A voltage regulator switched by PMIC power actions.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Regulator {
    pub name: String,
    #[serde(default)]
    pub microvolts: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PowerConfig {
    /// Marker-delimited word array run when the sensor is powered up
    pub enable_seq: Vec<u32>,
    /// Marker-delimited word array run when the sensor is powered down
    pub disable_seq: Vec<u32>,
    pub regulators: Vec<Regulator>,
    /// Power the sensor on every turn-on instead of once at open
    pub on_demand: bool,
}
