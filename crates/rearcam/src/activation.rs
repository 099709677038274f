// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::{
    buffer::PoolKind,
    config::RELEASE_DEBOUNCE,
    hw::CompositorLayout,
    pipeline::{lock, Pipeline},
    queue::FrameQueue,
};
use serde::Serialize;

/// Outcome of one activation decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Decision {
    /// Reverse engaged while the video layer was off; the pipeline started
    TurnedOn,
    /// Reverse released while the video layer was on; the pipeline stopped
    TurnedOff,
    /// Reverse engaged but the video layer is still off; decided again later
    Recheck,
    /// Gear and hardware agree
    Unchanged,
}

#[derive(Debug, Default)]
pub(crate) struct ActivationState {
    pub(crate) is_on: bool,
    reargear_on: bool,
    running: bool,
}

enum TurnOn {
    Started,
    AlreadyOn,
    Vetoed,
}

impl Pipeline {
    /// Reverse-gear edge handler. Leaves exactly one decision pending.
    pub(crate) fn gear_irq(&self) {
        let _state = lock(&self.activation);
        if self.is_shut_down() {
            return;
        }
        let Some(workers) = self.workers() else {
            return;
        };

        let delay = if self.gear_engaged() {
            self.config.detect_delay()
        } else {
            RELEASE_DEBOUNCE
        };
        workers.decide.cancel();
        workers.decide.queue_delayed(delay);
        log::debug!("gear edge, deciding in {:?}", delay);
    }

    /// Decision job: compares the gear line with the video layer state and
    /// turns the pipeline on or off.
    pub(crate) fn decide(&self) -> Decision {
        let mut state = lock(&self.activation);
        if self.is_shut_down() {
            return Decision::Unchanged;
        }
        self.stats.decision();

        if !self.hooks.decide() {
            log::error!("vendor decide hook failed");
        }

        state.running = self.board.display.video_layer_enabled();
        state.reargear_on = self.gear_engaged();
        log::debug!(
            "running {}, reargear on {}",
            state.running,
            state.reargear_on
        );

        if state.reargear_on && !state.running {
            match self.turn_on(&mut state) {
                TurnOn::Started => Decision::TurnedOn,
                TurnOn::AlreadyOn | TurnOn::Vetoed => self.recheck(),
            }
        } else if state.running && !state.reargear_on {
            self.turn_off(&mut state);
            Decision::TurnedOff
        } else if !state.running && self.gear_engaged() {
            self.recheck()
        } else {
            Decision::Unchanged
        }
    }

    fn recheck(&self) -> Decision {
        log::warn!("recheck rear camera");
        self.stats.recheck();
        if let Some(workers) = self.workers() {
            workers.decide.queue_delayed(self.config.detect_delay());
        }
        Decision::Recheck
    }

    /// Enables the compositor and output blocks if another agent has not.
    fn ensure_display_hw(&self) {
        let hw = self.board.display.as_ref();
        if !hw.compositor_enabled() {
            let sync = &self.config.display.sync;
            let (video_width, video_height) = match &self.rotation {
                Some(stage) => stage.geometry().frame_size(),
                None => (self.config.capture.width, self.config.capture.height),
            };
            hw.configure_compositor(&CompositorLayout {
                screen_width: sync.h_active,
                screen_height: sync.v_active,
                video_width,
                video_height,
                video_priority: self.config.display.video_priority,
                background: self.config.display.background,
            });
            self.program_overlay();
            lock(&self.display).mlc_on_first = true;
            hw.set_compositor_enable(true);
            log::info!("compositor enabled");
        }

        if !hw.output_enabled() {
            hw.configure_output(&self.config.display.sync);
            hw.set_output_enable(true);
            log::info!(
                "display output enabled at {:.1} Hz",
                self.config.display.sync.refresh_hz()
            );
        }
    }

    fn turn_on(&self, state: &mut ActivationState) -> TurnOn {
        self.ensure_display_hw();
        if state.is_on {
            return TurnOn::AlreadyOn;
        }
        state.is_on = true;

        if self.config.power.on_demand {
            if let Err(err) = self.power_up() {
                log::error!("sensor power up failed: {}", err);
                state.is_on = false;
                return TurnOn::Vetoed;
            }
        }
        if !self.hooks.pre_turn_on() {
            log::error!("vendor pre_turn_on hook failed");
            state.is_on = false;
            return TurnOn::Vetoed;
        }

        lock(&self.capture).reset();
        lock(&self.display).reset(false);
        self.pool.seed(PoolKind::Capture, &self.queues.capture_empty);
        self.queues.capture_done.init();
        self.pool.seed(PoolKind::Rotation, &self.queues.rotation_empty);
        self.queues.rotation_done.init();

        self.board.capture.set_interrupt(true);
        if !self.arm_capture() {
            log::error!("capture could not be armed");
        }
        self.stats.turned_on();
        log::info!("rear camera on");
        TurnOn::Started
    }

    fn turn_off(&self, state: &mut ActivationState) {
        self.stop_layers();
        // late capture events now see nothing armed
        lock(&self.capture).reset();
        self.cleanup();
        self.queues.reset();
        lock(&self.display).reset(false);
        state.is_on = false;

        if self.config.power.on_demand {
            self.power_down();
        }
        self.hooks.post_turn_off();
        self.stats.turned_off();
        log::info!("rear camera off");
    }

    /// Hides both compositor layers and masks the capture interrupt.
    pub(crate) fn stop_layers(&self) {
        let display = self.board.display.as_ref();
        display.set_overlay_layer(false);
        display.set_video_layer(false);
        self.board.capture.set_interrupt(false);
    }

    /// Masks vsync and waits out every rotation and display job. No worker
    /// touches a buffer after this returns.
    pub(crate) fn cleanup(&self) {
        {
            let _display = lock(&self.display);
            self.board.display.set_vsync_interrupt(false);
        }
        if let Some(stage) = &self.rotation {
            stage.sync();
        }

        let Some(workers) = self.workers() else {
            return;
        };
        workers.display.cancel_sync();
        if let Some(rot) = &workers.rotation {
            rot.luma.cancel_sync();
            rot.cb.cancel_sync();
            rot.cr.cancel_sync();
        }
    }
}
