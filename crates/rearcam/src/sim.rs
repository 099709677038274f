// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! In-memory board.
//!
//! [`SimBoard`] implements every hardware trait with plain registers held in
//! atomics. It records power and sensor activity so tests can assert on the
//! exact order of operations, and it exposes the interrupt-enable state so
//! event producers only raise interrupts the pipeline has asked for.

use crate::{
    buffer::Plane,
    config::{CaptureConfig, DisplaySync},
    hw::{
        Board, CacheSync, CaptureHw, CompositorLayout, DisplayHw, GearSignal, OverlaySetup,
        PowerControl, SensorBus,
    },
    pipeline::lock,
    Error,
};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
        Arc, Mutex,
    },
};

/// One recorded power operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PowerEvent {
    Gpio(u32, u32),
    Voltage(String, u32),
    Regulator(String, bool),
    Clock(bool),
}

#[derive(Debug, Default, Clone, Copy)]
struct RegulatorState {
    enabled: bool,
    adjustable: bool,
}

/// Simulated VIP, MLC, DPC, gear line, power rails, sensor bus and cache.
#[derive(Debug, Default)]
pub struct SimBoard {
    gear_level: AtomicBool,

    capture_configured: AtomicBool,
    capture_enabled: AtomicBool,
    capture_irq: AtomicBool,
    capture_luma: AtomicU32,
    field_odd: AtomicBool,
    capture_irq_cleared: AtomicU64,

    compositor_enabled: AtomicBool,
    output_enabled: AtomicBool,
    video_layer: AtomicBool,
    overlay_layer: AtomicBool,
    vsync_irq: AtomicBool,
    video_luma: AtomicU32,
    video_programs: AtomicU64,
    overlay_programs: AtomicU64,
    compositor_layout: Mutex<Option<CompositorLayout>>,

    gpios: Mutex<HashMap<u32, u32>>,
    regulators: Mutex<HashMap<String, RegulatorState>>,
    clock: AtomicBool,
    power_log: Mutex<Vec<PowerEvent>>,
    sensor_log: Mutex<Vec<(u8, u8)>>,
    fail_sensor: AtomicBool,

    cpu_syncs: AtomicU64,
    device_syncs: AtomicU64,
}

impl SimBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a shared simulator as a [`Board`] where every block is backed by
    /// the same instance.
    pub fn board(this: &Arc<SimBoard>) -> Board {
        Board {
            capture: this.clone(),
            display: this.clone(),
            gear: this.clone(),
            power: this.clone(),
            sensor: this.clone(),
            cache: this.clone(),
        }
    }

    pub fn set_gear_level(&self, level: bool) {
        self.gear_level.store(level, Ordering::SeqCst);
    }

    /// Parity reported for the next capture interrupt.
    pub fn set_field(&self, odd: bool) {
        self.field_odd.store(odd, Ordering::SeqCst);
    }

    /// Forces the video layer state, as if another agent changed it.
    pub fn force_video_layer(&self, enable: bool) {
        self.video_layer.store(enable, Ordering::SeqCst);
    }

    pub fn set_regulator(&self, name: &str, enabled: bool, adjustable: bool) {
        lock(&self.regulators).insert(
            name.to_string(),
            RegulatorState {
                enabled,
                adjustable,
            },
        );
    }

    /// Makes every subsequent sensor register write fail.
    pub fn fail_sensor_writes(&self, fail: bool) {
        self.fail_sensor.store(fail, Ordering::SeqCst);
    }

    /// True when a producer should deliver capture interrupts.
    pub fn capture_irq_enabled(&self) -> bool {
        self.capture_irq.load(Ordering::SeqCst) && self.capture_enabled.load(Ordering::SeqCst)
    }

    pub fn capture_enabled(&self) -> bool {
        self.capture_enabled.load(Ordering::SeqCst)
    }

    pub fn capture_configured(&self) -> bool {
        self.capture_configured.load(Ordering::SeqCst)
    }

    /// True when a producer should deliver vsync interrupts.
    pub fn vsync_irq_enabled(&self) -> bool {
        self.vsync_irq.load(Ordering::SeqCst)
    }

    /// Luma address the capture block writes the next frame to.
    pub fn capture_address(&self) -> u32 {
        self.capture_luma.load(Ordering::SeqCst)
    }

    /// Luma address the video layer currently scans out.
    pub fn video_address(&self) -> u32 {
        self.video_luma.load(Ordering::SeqCst)
    }

    pub fn video_programs(&self) -> u64 {
        self.video_programs.load(Ordering::SeqCst)
    }

    pub fn overlay_programs(&self) -> u64 {
        self.overlay_programs.load(Ordering::SeqCst)
    }

    pub fn overlay_layer_enabled(&self) -> bool {
        self.overlay_layer.load(Ordering::SeqCst)
    }

    pub fn compositor_layout(&self) -> Option<CompositorLayout> {
        *lock(&self.compositor_layout)
    }

    pub fn capture_irq_cleared(&self) -> u64 {
        self.capture_irq_cleared.load(Ordering::SeqCst)
    }

    pub fn gpio(&self, gpio: u32) -> Option<u32> {
        lock(&self.gpios).get(&gpio).copied()
    }

    pub fn power_events(&self) -> Vec<PowerEvent> {
        lock(&self.power_log).clone()
    }

    pub fn sensor_writes(&self) -> Vec<(u8, u8)> {
        lock(&self.sensor_log).clone()
    }

    /// Number of CPU and device cache synchronizations.
    pub fn cache_syncs(&self) -> (u64, u64) {
        (
            self.cpu_syncs.load(Ordering::SeqCst),
            self.device_syncs.load(Ordering::SeqCst),
        )
    }

    fn record(&self, event: PowerEvent) {
        lock(&self.power_log).push(event);
    }
}

impl CaptureHw for SimBoard {
    fn configure(&self, config: &CaptureConfig) -> Result<(), Error> {
        log::trace!("sim: capture {}x{}", config.width, config.height);
        self.capture_configured.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn set_addresses(&self, planes: &[Plane; 3]) {
        self.capture_luma.store(planes[0].addr, Ordering::SeqCst);
    }

    fn set_enable(&self, enable: bool) {
        self.capture_enabled.store(enable, Ordering::SeqCst);
    }

    fn set_interrupt(&self, enable: bool) {
        self.capture_irq.store(enable, Ordering::SeqCst);
    }

    fn clear_interrupt_pending(&self) {
        self.capture_irq_cleared.fetch_add(1, Ordering::SeqCst);
    }

    fn field_is_odd(&self) -> bool {
        self.field_odd.load(Ordering::SeqCst)
    }
}

impl DisplayHw for SimBoard {
    fn compositor_enabled(&self) -> bool {
        self.compositor_enabled.load(Ordering::SeqCst)
    }

    fn configure_compositor(&self, layout: &CompositorLayout) {
        *lock(&self.compositor_layout) = Some(*layout);
    }

    fn set_compositor_enable(&self, enable: bool) {
        self.compositor_enabled.store(enable, Ordering::SeqCst);
    }

    fn output_enabled(&self) -> bool {
        self.output_enabled.load(Ordering::SeqCst)
    }

    fn configure_output(&self, sync: &DisplaySync) {
        log::trace!("sim: output {}x{}", sync.h_active, sync.v_active);
    }

    fn set_output_enable(&self, enable: bool) {
        self.output_enabled.store(enable, Ordering::SeqCst);
    }

    fn set_video_address(&self, planes: &[Plane; 3]) {
        self.video_luma.store(planes[0].addr, Ordering::SeqCst);
        self.video_programs.fetch_add(1, Ordering::SeqCst);
    }

    fn set_overlay(&self, overlay: &OverlaySetup) {
        log::trace!("sim: overlay at {:#010x}", overlay.addr);
        self.overlay_programs.fetch_add(1, Ordering::SeqCst);
    }

    fn set_video_layer(&self, enable: bool) {
        self.video_layer.store(enable, Ordering::SeqCst);
    }

    fn set_overlay_layer(&self, enable: bool) {
        self.overlay_layer.store(enable, Ordering::SeqCst);
    }

    fn video_layer_enabled(&self) -> bool {
        self.video_layer.load(Ordering::SeqCst)
    }

    fn set_vsync_interrupt(&self, enable: bool) {
        self.vsync_irq.store(enable, Ordering::SeqCst);
    }

    fn clear_vsync_pending(&self) {}
}

impl GearSignal for SimBoard {
    fn level(&self) -> bool {
        self.gear_level.load(Ordering::SeqCst)
    }
}

impl PowerControl for SimBoard {
    fn set_gpio(&self, gpio: u32, value: u32) -> Result<(), Error> {
        lock(&self.gpios).insert(gpio, value);
        self.record(PowerEvent::Gpio(gpio, value));
        Ok(())
    }

    fn regulator_can_change_voltage(&self, name: &str) -> bool {
        lock(&self.regulators)
            .get(name)
            .map(|r| r.adjustable)
            .unwrap_or(false)
    }

    fn regulator_set_voltage(&self, name: &str, microvolts: u32) -> Result<(), Error> {
        self.record(PowerEvent::Voltage(name.to_string(), microvolts));
        Ok(())
    }

    fn regulator_is_enabled(&self, name: &str) -> Result<bool, Error> {
        Ok(lock(&self.regulators)
            .get(name)
            .map(|r| r.enabled)
            .unwrap_or(false))
    }

    fn regulator_set_enable(&self, name: &str, enable: bool) -> Result<(), Error> {
        lock(&self.regulators)
            .entry(name.to_string())
            .or_default()
            .enabled = enable;
        self.record(PowerEvent::Regulator(name.to_string(), enable));
        Ok(())
    }

    fn set_clock(&self, enable: bool) -> Result<(), Error> {
        self.clock.store(enable, Ordering::SeqCst);
        self.record(PowerEvent::Clock(enable));
        Ok(())
    }
}

impl SensorBus for SimBoard {
    fn write_reg(&self, reg: u8, value: u8) -> Result<(), Error> {
        if self.fail_sensor.load(Ordering::SeqCst) {
            return Err(Error::Hardware(format!(
                "sensor write {:#04x} not acknowledged",
                reg
            )));
        }
        lock(&self.sensor_log).push((reg, value));
        Ok(())
    }
}

impl CacheSync for SimBoard {
    fn sync_for_cpu(&self, _addr: u32, _len: usize) {
        self.cpu_syncs.fetch_add(1, Ordering::SeqCst);
    }

    fn sync_for_device(&self, _addr: u32, _len: usize) {
        self.device_syncs.fetch_add(1, Ordering::SeqCst);
    }
}
