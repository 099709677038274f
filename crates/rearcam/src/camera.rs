// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::{
    buffer::{FramePool, LinearAllocator, PoolKind, VideoBuffer},
    config::RearcamConfig,
    hooks::{NoHooks, VendorHooks},
    hw::{Board, DmaAllocator, HwEvent},
    pipeline::Pipeline,
    stats::StatsSnapshot,
    Decision, Error,
};
use std::{
    fmt,
    sync::{
        mpsc::{self, RecvTimeoutError, SyncSender, TrySendError},
        Arc, Weak,
    },
    thread,
    time::{Duration, Instant},
};

pub use crate::{capture::CaptureOutcome, display::PublishOutcome, pipeline::QueueSizes};

/// Bus address the default allocator carves buffers from.
pub const DEFAULT_CMA_BASE: u32 = 0x4000_0000;

const DISPATCH_POLL: Duration = Duration::from_millis(50);
const STOP_POLL: Duration = Duration::from_millis(200);

/// Builder for a [`RearCamera`].
#[derive(Clone)]
pub struct RearcamBuilder {
    config: RearcamConfig,
    board: Option<Board>,
    hooks: Arc<dyn VendorHooks>,
    allocator: Option<Arc<dyn DmaAllocator>>,
}

impl RearcamBuilder {
    pub fn with_config(self, config: RearcamConfig) -> RearcamBuilder {
        RearcamBuilder { config, ..self }
    }

    pub fn with_board(self, board: Board) -> RearcamBuilder {
        RearcamBuilder {
            board: Some(board),
            ..self
        }
    }

    pub fn with_hooks(self, hooks: Arc<dyn VendorHooks>) -> RearcamBuilder {
        RearcamBuilder { hooks, ..self }
    }

    /// Replaces the default [`LinearAllocator`] over `cma_bytes` at
    /// [`DEFAULT_CMA_BASE`].
    pub fn with_allocator(self, allocator: Arc<dyn DmaAllocator>) -> RearcamBuilder {
        RearcamBuilder {
            allocator: Some(allocator),
            ..self
        }
    }

    /// Builds the pipeline, powers the sensor and schedules the first
    /// decision if reverse is already engaged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] without a board or for an invalid
    /// configuration, [`Error::Sequence`] for a malformed power sequence and
    /// [`Error::OutOfMemory`] if the pool does not fit the allocator.
    pub fn open(self) -> Result<RearCamera, Error> {
        let board = self
            .board
            .ok_or_else(|| Error::Config("no board given".into()))?;
        let allocator: Arc<dyn DmaAllocator> = match self.allocator {
            Some(allocator) => allocator,
            None => Arc::new(LinearAllocator::new(DEFAULT_CMA_BASE, self.config.cma_bytes)),
        };

        let pipeline = Pipeline::new(self.config, board, self.hooks, allocator)?;
        if let Err(err) = pipeline.start() {
            pipeline.shutdown();
            return Err(err);
        }
        log::info!("rear camera ready");
        Ok(RearCamera { pipeline })
    }
}

impl Default for RearcamBuilder {
    fn default() -> RearcamBuilder {
        RearcamBuilder {
            config: RearcamConfig::default(),
            board: None,
            hooks: Arc::new(NoHooks),
            allocator: None,
        }
    }
}

impl fmt::Debug for RearcamBuilder {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RearcamBuilder")
            .field("config", &self.config)
            .field("board", &self.board)
            .finish_non_exhaustive()
    }
}

pub fn create_rearcam() -> RearcamBuilder {
    RearcamBuilder::default()
}

/// Handle to a running rear-camera pipeline. Dropping it shuts the pipeline
/// down.
pub struct RearCamera {
    pipeline: Arc<Pipeline>,
}

impl RearCamera {
    /// Delivers a capture-done interrupt on the calling thread.
    pub fn capture_irq(&self) -> CaptureOutcome {
        if self.pipeline.is_shut_down() {
            return CaptureOutcome::NotArmed;
        }
        self.pipeline.capture_irq()
    }

    /// Delivers a display vsync interrupt on the calling thread.
    pub fn display_irq(&self) {
        self.pipeline.dispatch(HwEvent::DisplayVsync);
    }

    /// Delivers a reverse-gear edge on the calling thread.
    pub fn gear_irq(&self) {
        self.pipeline.dispatch(HwEvent::GearEdge);
    }

    pub fn dispatch(&self, event: HwEvent) {
        self.pipeline.dispatch(event);
    }

    /// Runs one activation decision on the calling thread.
    pub fn decide_now(&self) -> Decision {
        self.pipeline.decide()
    }

    /// Runs the display publisher on the calling thread.
    pub fn publish_now(&self) -> PublishOutcome {
        if self.pipeline.is_shut_down() {
            return PublishOutcome::default();
        }
        self.pipeline.publish_frame()
    }

    /// Starts a dispatcher thread and returns the producer side of its
    /// interrupt line. At most `capacity` events are buffered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShutDown`] after [`RearCamera::shutdown`] and
    /// [`Error::Io`] if the thread cannot be spawned.
    pub fn irq_line(&self, capacity: usize) -> Result<IrqLine, Error> {
        if self.pipeline.is_shut_down() {
            return Err(Error::ShutDown);
        }
        let (tx, rx) = mpsc::sync_channel(capacity.max(1));
        let pipeline = Arc::downgrade(&self.pipeline);
        let handle = thread::Builder::new()
            .name("rearcam-irq".to_string())
            .spawn(move || dispatch_loop(&pipeline, &rx))?;
        self.pipeline.add_irq_thread(handle);
        Ok(IrqLine { tx })
    }

    pub fn is_on(&self) -> bool {
        crate::pipeline::lock(&self.pipeline.activation).is_on
    }

    pub fn config(&self) -> &RearcamConfig {
        &self.pipeline.config
    }

    pub fn queue_sizes(&self) -> QueueSizes {
        self.pipeline.queue_sizes()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.pipeline.stats.snapshot()
    }

    pub fn pool(&self) -> &FramePool {
        &self.pipeline.pool
    }

    pub fn buffers(&self, kind: PoolKind) -> Vec<Arc<VideoBuffer>> {
        self.pipeline.pool.buffers(kind)
    }

    /// True while a decision, display or rotation job is queued or running.
    pub fn has_pending_work(&self) -> bool {
        let Some(workers) = self.pipeline.workers() else {
            return false;
        };
        let busy = |w: &crate::worker::Worker| w.is_pending() || w.is_running();
        busy(&workers.decide)
            || busy(&workers.display)
            || workers
                .rotation
                .as_ref()
                .is_some_and(|r| busy(&r.luma) || busy(&r.cb) || busy(&r.cr))
    }

    /// Stops the pipeline and releases every buffer. Idempotent.
    pub fn shutdown(&self) {
        self.pipeline.shutdown();
    }

    /// Waits for the camera to turn off, then shuts it down. Returns `false`
    /// if it was still on after `timeout`; the pipeline keeps running then.
    pub fn stop_when_idle(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        while self.is_on() {
            if start.elapsed() >= timeout {
                log::warn!("rear camera still on after {:?}", timeout);
                return false;
            }
            log::debug!("waiting for rear camera to stop");
            thread::sleep(STOP_POLL.min(timeout));
        }
        self.shutdown();
        true
    }

    pub fn is_removed(&self) -> bool {
        self.pipeline.is_shut_down()
    }
}

impl Drop for RearCamera {
    fn drop(&mut self) {
        self.pipeline.shutdown();
    }
}

impl fmt::Debug for RearCamera {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RearCamera")
            .field("is_on", &self.is_on())
            .field("removed", &self.is_removed())
            .field("queues", &self.queue_sizes())
            .finish()
    }
}

/// Producer side of an interrupt line.
#[derive(Debug, Clone)]
pub struct IrqLine {
    tx: SyncSender<HwEvent>,
}

impl IrqLine {
    /// Raises `event` without blocking. Returns `false` if it was dropped
    /// because the line is full or the dispatcher has stopped.
    pub fn raise(&self, event: HwEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                log::warn!("interrupt line full, {:?} dropped", event);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

fn dispatch_loop(pipeline: &Weak<Pipeline>, rx: &mpsc::Receiver<HwEvent>) {
    loop {
        let event = match rx.recv_timeout(DISPATCH_POLL) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => return,
        };
        let Some(p) = pipeline.upgrade() else {
            return;
        };
        if p.is_shut_down() {
            return;
        }
        if let Some(event) = event {
            p.dispatch(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimBoard;

    #[test]
    fn test_open_requires_board() {
        let err = create_rearcam().open().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_open_fails_on_small_carve_out() {
        let board = Arc::new(SimBoard::new());
        let err = create_rearcam()
            .with_board(SimBoard::board(&board))
            .with_allocator(Arc::new(LinearAllocator::new(DEFAULT_CMA_BASE, 4096)))
            .open()
            .unwrap_err();
        assert!(matches!(err, Error::OutOfMemory { .. }));
    }

    #[test]
    fn test_irq_line_after_shutdown() {
        let board = Arc::new(SimBoard::new());
        let cam = create_rearcam()
            .with_board(SimBoard::board(&board))
            .open()
            .unwrap();
        let irq = cam.irq_line(4).unwrap();
        cam.shutdown();
        assert!(cam.is_removed());
        assert!(matches!(cam.irq_line(4), Err(Error::ShutDown)));
        // the dispatcher has exited, events go nowhere
        assert!(!irq.raise(HwEvent::GearEdge));
    }

    #[test]
    fn test_stop_when_idle_waits_for_off() {
        let board = Arc::new(SimBoard::new());
        let cam = create_rearcam()
            .with_board(SimBoard::board(&board))
            .open()
            .unwrap();
        board.set_gear_level(true);
        assert_eq!(cam.decide_now(), Decision::TurnedOn);
        assert!(!cam.stop_when_idle(Duration::from_millis(10)));
        assert!(!cam.is_removed());

        board.force_video_layer(true);
        board.set_gear_level(false);
        assert_eq!(cam.decide_now(), Decision::TurnedOff);
        assert!(cam.stop_when_idle(Duration::from_secs(1)));
        assert!(cam.is_removed());
    }
}
