// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::{
    buffer::{BufferHandle, BufferId, DmaOwner},
    pipeline::{lock, Pipeline},
    queue::FrameQueue,
};

/// Result of one capture-done event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// First field of an interlaced frame, nothing to do yet
    FieldPending,
    /// No buffer is programmed into the capture block
    NotArmed,
    /// No empty buffer; the armed buffer is captured into again
    Underrun,
    /// The named buffer now holds a complete frame on the capture-done queue
    Retired(BufferId),
}

#[derive(Debug, Default)]
pub(crate) struct CaptureState {
    pub(crate) armed: Option<BufferHandle>,
    irq_count: u8,
}

impl CaptureState {
    /// Pairs an even field with the following odd field.
    fn field_complete(&mut self, odd: bool) -> bool {
        if self.irq_count == 0 {
            if !odd {
                self.irq_count = 1;
            }
        } else if odd {
            self.irq_count += 1;
        }

        if self.irq_count == 2 {
            self.irq_count = 0;
            true
        } else {
            false
        }
    }

    pub(crate) fn reset(&mut self) {
        self.armed = None;
        self.irq_count = 0;
    }
}

impl Pipeline {
    /// Capture-done event handler.
    ///
    /// Retires the armed buffer to capture-done and arms the next empty one.
    /// Never blocks beyond the capture, queue and display locks, all of which
    /// are only held for constant-time sections.
    pub(crate) fn capture_irq(&self) -> CaptureOutcome {
        let hw = self.board.capture.as_ref();
        hw.clear_interrupt_pending();

        let mut state = lock(&self.capture);
        if self.config.capture.interlace && !state.field_complete(hw.field_is_odd()) {
            return CaptureOutcome::FieldPending;
        }

        let armed = match &state.armed {
            Some(armed) => armed.id(),
            None => return CaptureOutcome::NotArmed,
        };

        let next = match self.queues.capture_empty.dequeue() {
            Some(next) => next,
            None => {
                self.stats.capture_underrun();
                log::error!("capture empty buffer underrun, {} stays armed", armed);
                return CaptureOutcome::Underrun;
            }
        };
        let next_buf = match self.pool.get(next.id()) {
            Some(buf) => buf,
            None => return CaptureOutcome::NotArmed,
        };
        if next_buf.owner() == DmaOwner::Cpu {
            next_buf.sync_for_device(self.board.cache.as_ref());
        }
        hw.set_addresses(&next_buf.planes());

        let retired = state.armed.replace(next);
        if let Some(buf) = self.pool.get(armed) {
            buf.stamp();
        }
        if let Some(retired) = retired {
            self.queues.capture_done.enqueue(retired);
        }
        self.stats.frame_captured();
        log::trace!("captured into {}, armed {}", armed, next_buf.id());

        if let Some(rot) = self.workers().and_then(|w| w.rotation.as_ref()) {
            rot.luma.queue();
        }

        let mut display = lock(&self.display);
        if !display.is_display_on {
            display.is_display_on = true;
            self.board.display.set_vsync_interrupt(true);
            log::debug!("first frame captured, display interrupt enabled");
        }

        CaptureOutcome::Retired(armed)
    }

    /// Seeds the first empty buffer into the capture block and starts it.
    pub(crate) fn arm_capture(&self) -> bool {
        let mut state = lock(&self.capture);
        let Some(first) = self.queues.capture_empty.dequeue() else {
            log::error!("no empty capture buffer to arm");
            return false;
        };
        let Some(buf) = self.pool.get(first.id()) else {
            return false;
        };
        self.board.capture.set_addresses(&buf.planes());
        state.armed = Some(first);
        self.board.capture.set_enable(true);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_pairing() {
        let mut state = CaptureState::default();
        // odd first field is ignored until an even one starts the pair
        assert!(!state.field_complete(true));
        assert!(!state.field_complete(false));
        assert!(state.field_complete(true));
        // even, even, odd still completes one frame
        assert!(!state.field_complete(false));
        assert!(!state.field_complete(false));
        assert!(state.field_complete(true));
    }
}
