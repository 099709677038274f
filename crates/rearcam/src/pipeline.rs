// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::{
    activation::ActivationState,
    buffer::{FramePool, PoolSpec},
    capture::CaptureState,
    config::RearcamConfig,
    display::DisplayState,
    hooks::VendorHooks,
    hw::{Board, DmaAllocator, HwEvent},
    power::{write_init_table, SensorPower},
    queue::{BufferQueue, FrameQueue},
    rotation::RotationStage,
    stats::Stats,
    worker::Worker,
    Error,
};
use serde::Serialize;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLock, RwLockReadGuard,
        RwLockWriteGuard, Weak,
    },
    thread::JoinHandle,
};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read<T>(rw: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    rw.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(rw: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    rw.write().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) struct Queues {
    pub(crate) capture_empty: BufferQueue,
    pub(crate) capture_done: BufferQueue,
    pub(crate) rotation_empty: BufferQueue,
    pub(crate) rotation_done: BufferQueue,
}

impl Queues {
    fn new() -> Self {
        Queues {
            capture_empty: BufferQueue::new("capture-empty"),
            capture_done: BufferQueue::new("capture-done"),
            rotation_empty: BufferQueue::new("rotation-empty"),
            rotation_done: BufferQueue::new("rotation-done"),
        }
    }

    pub(crate) fn reset(&self) {
        self.capture_empty.init();
        self.capture_done.init();
        self.rotation_empty.init();
        self.rotation_done.init();
    }
}

/// Occupancy of the four buffer queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct QueueSizes {
    pub capture_empty: usize,
    pub capture_done: usize,
    /// A capture buffer is programmed into the capture hardware
    pub capture_armed: bool,
    pub rotation_empty: usize,
    pub rotation_done: usize,
}

pub(crate) struct RotationWorkers {
    pub(crate) luma: Worker,
    pub(crate) cb: Worker,
    pub(crate) cr: Worker,
}

pub(crate) struct Workers {
    pub(crate) display: Worker,
    pub(crate) decide: Worker,
    pub(crate) rotation: Option<RotationWorkers>,
}

fn spawn_job(name: &str, pipeline: &Weak<Pipeline>, job: fn(&Pipeline)) -> Result<Worker, Error> {
    let pipeline = pipeline.clone();
    Worker::spawn(name, move || {
        if let Some(p) = pipeline.upgrade() {
            job(&p);
        }
    })
}

impl Workers {
    fn spawn(pipeline: &Weak<Pipeline>, rotation: bool) -> Result<Self, Error> {
        let rotation = if rotation {
            Some(RotationWorkers {
                luma: spawn_job("rearcam-rot-y", pipeline, |p| p.rotate_luma())?,
                cb: spawn_job("rearcam-rot-cb", pipeline, |p| p.rotate_cb())?,
                cr: spawn_job("rearcam-rot-cr", pipeline, |p| p.rotate_cr())?,
            })
        } else {
            None
        };

        Ok(Workers {
            display: spawn_job("rearcam-display", pipeline, |p| {
                p.publish_frame();
            })?,
            decide: spawn_job("rearcam-decide", pipeline, |p| {
                p.decide();
            })?,
            rotation,
        })
    }

    fn shutdown(&self) {
        self.decide.shutdown();
        self.display.shutdown();
        if let Some(rot) = &self.rotation {
            rot.luma.shutdown();
            rot.cb.shutdown();
            rot.cr.shutdown();
        }
    }
}

/// Shared state of one rear-camera instance.
pub(crate) struct Pipeline {
    pub(crate) config: RearcamConfig,
    pub(crate) board: Board,
    pub(crate) hooks: Arc<dyn VendorHooks>,
    pub(crate) pool: FramePool,
    pub(crate) queues: Queues,
    pub(crate) capture: Mutex<CaptureState>,
    pub(crate) display: Mutex<DisplayState>,
    pub(crate) rotation: Option<RotationStage>,
    pub(crate) activation: Mutex<ActivationState>,
    pub(crate) sensor: SensorPower,
    pub(crate) stats: Stats,
    workers: OnceLock<Workers>,
    shut_down: AtomicBool,
    irq_threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Pipeline {
    /// Validates the configuration, parses the power sequences, allocates
    /// the pool and spawns the workers. Nothing is started yet.
    pub(crate) fn new(
        config: RearcamConfig,
        board: Board,
        hooks: Arc<dyn VendorHooks>,
        allocator: Arc<dyn DmaAllocator>,
    ) -> Result<Arc<Self>, Error> {
        config.validate()?;
        let sensor = SensorPower::from_config(&config.power, Arc::clone(&board.power))?;
        let rotation = if config.rotation {
            Some(RotationStage::new(&config)?)
        } else {
            None
        };

        let sync = &config.display.sync;
        let spec = PoolSpec {
            count: config.buffer_count,
            capture: (config.capture.width, config.capture.height),
            rotation: rotation.as_ref().map(|r| r.geometry().frame_size()),
            overlay: Some((
                sync.h_active,
                sync.v_active,
                config.display.overlay_format.bytes_per_pixel(),
            )),
        };
        let pool = FramePool::allocate(&spec, allocator)?;

        let pipeline = Arc::new(Pipeline {
            config,
            board,
            hooks,
            pool,
            queues: Queues::new(),
            capture: Mutex::new(CaptureState::default()),
            display: Mutex::new(DisplayState::default()),
            rotation,
            activation: Mutex::new(ActivationState::default()),
            sensor,
            stats: Stats::default(),
            workers: OnceLock::new(),
            shut_down: AtomicBool::new(false),
            irq_threads: Mutex::new(Vec::new()),
        });

        let workers = Workers::spawn(&Arc::downgrade(&pipeline), pipeline.rotation.is_some())?;
        if pipeline.workers.set(workers).is_err() {
            return Err(Error::Config("pipeline workers already spawned".into()));
        }
        Ok(pipeline)
    }

    pub(crate) fn workers(&self) -> Option<&Workers> {
        self.workers.get()
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Brings up the capture block and the sensor and, if reverse is already
    /// engaged, schedules the first decision.
    pub(crate) fn start(&self) -> Result<(), Error> {
        self.board.capture.configure(&self.config.capture)?;
        if !self.config.power.on_demand {
            self.power_up()?;
        }

        if self.gear_engaged() {
            log::info!("reverse gear engaged at start");
            if let Some(workers) = self.workers() {
                workers.decide.queue_delayed(self.config.detect_delay());
            }
        }
        Ok(())
    }

    /// Runs the sensor enable sequence followed by its register table.
    pub(crate) fn power_up(&self) -> Result<(), Error> {
        if self.sensor.set(true)? {
            let written = write_init_table(self.board.sensor.as_ref(), &self.config.sensor_init)?;
            log::debug!("sensor initialized with {} register writes", written);
        }
        Ok(())
    }

    pub(crate) fn power_down(&self) {
        if let Err(err) = self.sensor.set(false) {
            log::error!("sensor power down failed: {}", err);
        }
    }

    /// Reverse-gear line level with polarity applied.
    pub(crate) fn gear_engaged(&self) -> bool {
        self.board.gear.level() == self.config.gear.active_high
    }

    pub(crate) fn dispatch(&self, event: HwEvent) {
        if self.is_shut_down() {
            return;
        }
        match event {
            HwEvent::CaptureDone => {
                self.capture_irq();
            }
            HwEvent::DisplayVsync => self.display_irq(),
            HwEvent::GearEdge => self.gear_irq(),
        }
    }

    pub(crate) fn add_irq_thread(&self, handle: JoinHandle<()>) {
        lock(&self.irq_threads).push(handle);
    }

    pub(crate) fn queue_sizes(&self) -> QueueSizes {
        QueueSizes {
            capture_empty: self.queues.capture_empty.size(),
            capture_done: self.queues.capture_done.size(),
            capture_armed: lock(&self.capture).armed.is_some(),
            rotation_empty: self.queues.rotation_empty.size(),
            rotation_done: self.queues.rotation_done.size(),
        }
    }

    /// Stops every stage, joins every thread and releases the pool.
    /// Idempotent.
    pub(crate) fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        log::info!("rear camera shutting down");

        // the decision job takes the activation lock, cancel it first
        if let Some(workers) = self.workers() {
            workers.decide.cancel_sync();
        }

        {
            let mut state = lock(&self.activation);
            self.stop_layers();
            self.board.capture.set_enable(false);
            lock(&self.capture).reset();
            self.cleanup();
            self.queues.reset();
            lock(&self.display).reset(true);
            state.is_on = false;
        }

        if let Some(workers) = self.workers() {
            workers.shutdown();
        }
        let threads = std::mem::take(&mut *lock(&self.irq_threads));
        for handle in threads {
            if handle.join().is_err() {
                log::error!("interrupt dispatcher panicked");
            }
        }

        self.power_down();
        self.pool.release();
        log::debug!("rear camera stopped: {:?}", self.stats.snapshot());
    }
}
