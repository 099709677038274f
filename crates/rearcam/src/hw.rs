// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Hardware capability traits.
//!
//! The pipeline never touches registers directly. Each hardware block it
//! drives is reached through one of these traits, grouped in a [`Board`].
//! [`crate::sim::SimBoard`] implements all of them in memory.

use crate::{
    buffer::Plane,
    config::{CaptureConfig, DisplaySync, RgbFormat},
    Error,
};
use std::{fmt, sync::Arc};

/// Interrupt sources delivered to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HwEvent {
    /// The capture block finished writing a frame (or field).
    CaptureDone,
    /// The display output reached vertical sync.
    DisplayVsync,
    /// The reverse-gear line changed level.
    GearEdge,
}

/// Video input (VIP) block.
pub trait CaptureHw: Send + Sync {
    /// Programs sync, timing and format registers.
    fn configure(&self, config: &CaptureConfig) -> Result<(), Error>;

    /// Programs the luma/Cb/Cr addresses the next frame is written to.
    fn set_addresses(&self, planes: &[Plane; 3]);

    fn set_enable(&self, enable: bool);

    /// Enables or disables the frame-done interrupt, clearing any pending one.
    fn set_interrupt(&self, enable: bool);

    fn clear_interrupt_pending(&self);

    /// Parity of the field that just completed, for interlaced sources.
    fn field_is_odd(&self) -> bool;
}

/// Layer configuration applied when the compositor is brought up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositorLayout {
    pub screen_width: u32,
    pub screen_height: u32,
    /// Source size of the video layer, scaled to the screen
    pub video_width: u32,
    pub video_height: u32,
    pub video_priority: u32,
    pub background: u32,
}

/// RGB overlay layer parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlaySetup {
    pub addr: u32,
    pub stride: u32,
    pub width: u32,
    pub height: u32,
    pub format: RgbFormat,
}

/// Multi-layer compositor (MLC) and display output controller (DPC).
pub trait DisplayHw: Send + Sync {
    fn compositor_enabled(&self) -> bool;
    fn configure_compositor(&self, layout: &CompositorLayout);
    fn set_compositor_enable(&self, enable: bool);

    fn output_enabled(&self) -> bool;
    fn configure_output(&self, sync: &DisplaySync);
    fn set_output_enable(&self, enable: bool);

    /// Programs the video layer with a YUV420 frame.
    fn set_video_address(&self, planes: &[Plane; 3]);
    fn set_overlay(&self, overlay: &OverlaySetup);

    fn set_video_layer(&self, enable: bool);
    fn set_overlay_layer(&self, enable: bool);

    /// Read back from the hardware, not cached.
    fn video_layer_enabled(&self) -> bool;

    fn set_vsync_interrupt(&self, enable: bool);
    fn clear_vsync_pending(&self);
}

/// Reverse-gear input line.
pub trait GearSignal: Send + Sync {
    /// Raw electrical level; polarity is applied by the caller.
    fn level(&self) -> bool;
}

/// GPIO, regulator and clock drivers used by power sequences.
pub trait PowerControl: Send + Sync {
    fn set_gpio(&self, gpio: u32, value: u32) -> Result<(), Error>;

    fn regulator_can_change_voltage(&self, _name: &str) -> bool {
        false
    }

    fn regulator_set_voltage(&self, name: &str, microvolts: u32) -> Result<(), Error>;
    fn regulator_is_enabled(&self, name: &str) -> Result<bool, Error>;
    fn regulator_set_enable(&self, name: &str, enable: bool) -> Result<(), Error>;

    /// Enables or disables the sensor PWM clock.
    fn set_clock(&self, enable: bool) -> Result<(), Error>;
}

/// Sensor control bus (I2C).
pub trait SensorBus: Send + Sync {
    fn write_reg(&self, reg: u8, value: u8) -> Result<(), Error>;
}

/// Cache maintenance for memory shared with DMA masters.
pub trait CacheSync: Send + Sync {
    /// Invalidates `len` bytes at `addr` so the CPU observes device writes.
    fn sync_for_cpu(&self, addr: u32, len: usize);

    /// Cleans `len` bytes at `addr` so the device observes CPU writes.
    fn sync_for_device(&self, addr: u32, len: usize);
}

/// Cache maintenance for fully coherent memory.
#[derive(Debug, Default, Clone, Copy)]
pub struct Coherent;

impl CacheSync for Coherent {
    fn sync_for_cpu(&self, _addr: u32, _len: usize) {}
    fn sync_for_device(&self, _addr: u32, _len: usize) {}
}

/// Source of contiguous, device-addressable memory.
pub trait DmaAllocator: Send + Sync {
    /// Reserves `size` bytes and returns their bus address.
    fn alloc(&self, size: usize) -> Result<u32, Error>;

    fn free(&self, addr: u32, size: usize);
}

/// The set of hardware blocks the pipeline drives.
#[derive(Clone)]
pub struct Board {
    pub capture: Arc<dyn CaptureHw>,
    pub display: Arc<dyn DisplayHw>,
    pub gear: Arc<dyn GearSignal>,
    pub power: Arc<dyn PowerControl>,
    pub sensor: Arc<dyn SensorBus>,
    pub cache: Arc<dyn CacheSync>,
}

impl fmt::Debug for Board {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Board").finish_non_exhaustive()
    }
}
