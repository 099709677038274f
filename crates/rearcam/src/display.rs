// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::{
    buffer::BufferId,
    hw::OverlaySetup,
    pipeline::{lock, Pipeline},
    queue::FrameQueue,
};

/// Result of one display publisher run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOutcome {
    /// Buffer newly programmed into the video layer
    pub shown: Option<BufferId>,
    /// Older buffers returned to the empty queue
    pub recycled: usize,
}

#[derive(Debug, Default)]
pub(crate) struct DisplayState {
    pub(crate) is_display_on: bool,
    pub(crate) is_mlc_on: bool,
    pub(crate) mlc_on_first: bool,
    last_shown: Option<BufferId>,
}

impl DisplayState {
    /// Clears the per-activation flags. The overlay latch survives unless
    /// `overlay` is set.
    pub(crate) fn reset(&mut self, overlay: bool) {
        self.is_display_on = false;
        self.is_mlc_on = false;
        self.last_shown = None;
        if overlay {
            self.mlc_on_first = false;
        }
    }
}

impl Pipeline {
    /// Display vsync event handler.
    pub(crate) fn display_irq(&self) {
        self.board.display.clear_vsync_pending();
        if let Some(workers) = self.workers() {
            workers.display.queue();
        }
    }

    /// Display job: shows the newest finished frame and recycles the rest.
    pub(crate) fn publish_frame(&self) -> PublishOutcome {
        let (done, empty) = if self.rotation.is_some() {
            (&self.queues.rotation_done, &self.queues.rotation_empty)
        } else {
            (&self.queues.capture_done, &self.queues.capture_empty)
        };
        let hw = self.board.display.as_ref();

        let mut state = lock(&self.display);
        let q_size = done.size();
        if q_size < 1 {
            return PublishOutcome::default();
        }
        let Some(newest) = done.peek(q_size - 1) else {
            return PublishOutcome::default();
        };

        let mut outcome = PublishOutcome::default();
        if state.last_shown != Some(newest) {
            let Some(buf) = self.pool.get(newest) else {
                return outcome;
            };
            hw.set_video_address(&buf.planes());
            state.last_shown = Some(newest);
            outcome.shown = Some(newest);
            self.stats.frame_displayed();
            log::trace!("displaying {}", newest);
        }

        if !state.mlc_on_first {
            self.program_overlay();
            state.mlc_on_first = true;
        }

        if !state.is_mlc_on {
            hw.set_video_layer(true);
            hw.set_overlay_layer(true);
            state.is_mlc_on = true;
            log::info!("rear camera video layer on");
        }

        // the newest entry stays queued while it is being scanned out
        outcome.recycled = done.recycle_into(empty, q_size - 1);
        self.stats.frames_recycled(outcome.recycled);
        outcome
    }

    /// Programs the RGB layer and lets the vendor hook draw into it.
    pub(crate) fn program_overlay(&self) {
        let Some(overlay) = self.pool.overlay() else {
            return;
        };
        let format = self.config.display.overlay_format;
        self.board.display.set_overlay(&OverlaySetup {
            addr: overlay.bus_addr(),
            stride: overlay.stride(),
            width: overlay.width(),
            height: overlay.height(),
            format,
        });

        let rotation = self.rotation.is_some();
        overlay.with_pixels(|pixels| {
            self.hooks.draw_overlay(
                overlay.width(),
                overlay.height(),
                overlay.bytes_per_pixel(),
                rotation,
                pixels,
            )
        });
        log::debug!(
            "overlay {}x{} {} drawn",
            overlay.width(),
            overlay.height(),
            format
        );
    }
}
