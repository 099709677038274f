// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::error::CliError;
use crate::utils;
use clap::Args as ClapArgs;
use rearcam::{
    camera::{self, IrqLine, QueueSizes},
    hooks::{GuideLines, NoHooks, VendorHooks},
    hw::HwEvent,
    sim::SimBoard,
    stats::StatsSnapshot,
};
use serde::Serialize;
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// JSON configuration file (defaults: 720x480 capture, 1024x600 panel)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Rotate frames by 90 degrees regardless of the configuration
    #[arg(long)]
    rotation: bool,

    /// Simulated capture frame rate
    #[arg(long, default_value = "30")]
    fps: u32,

    /// Delay before the reverse gear is engaged, in milliseconds
    #[arg(long, default_value = "200")]
    engage_ms: u64,

    /// How long the reverse gear stays engaged, in milliseconds
    #[arg(long, default_value = "2000")]
    duration_ms: u64,

    /// Seconds to wait for the camera to turn on or off
    #[arg(short, long, default_value = "5.0")]
    timeout: f64,

    /// Draw parking guide lines into the overlay
    #[arg(long)]
    guide_lines: bool,
}

#[derive(Serialize)]
struct Report {
    width: u32,
    height: u32,
    rotation: bool,
    buffers: usize,
    interrupted: bool,
    queues: QueueSizes,
    stats: StatsSnapshot,
}

/// Interrupt producer threads, stopped and joined on drop.
struct Producers {
    stop: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl Producers {
    fn start(board: &Arc<SimBoard>, irq: &IrqLine, fps: u32, vsync_hz: f64) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let capture_period = Duration::from_secs_f64(1.0 / f64::from(fps.max(1)));
        let vsync_period = Duration::from_secs_f64(1.0 / vsync_hz.max(1.0));

        let handles = vec![
            spawn_ticker(board, irq, &stop, capture_period, HwEvent::CaptureDone),
            spawn_ticker(board, irq, &stop, vsync_period, HwEvent::DisplayVsync),
        ];
        Producers { stop, handles }
    }
}

impl Drop for Producers {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                log::error!("Interrupt producer panicked");
            }
        }
    }
}

/// Raises `event` every `period` while the board has its interrupt enabled.
fn spawn_ticker(
    board: &Arc<SimBoard>,
    irq: &IrqLine,
    stop: &Arc<AtomicBool>,
    period: Duration,
    event: HwEvent,
) -> JoinHandle<()> {
    let board = Arc::clone(board);
    let irq = irq.clone();
    let stop = Arc::clone(stop);
    thread::spawn(move || {
        let mut odd = false;
        while !stop.load(Ordering::SeqCst) {
            thread::sleep(period);
            let enabled = match event {
                HwEvent::CaptureDone => board.capture_irq_enabled(),
                HwEvent::DisplayVsync => board.vsync_irq_enabled(),
                HwEvent::GearEdge => false,
            };
            if !enabled {
                continue;
            }
            if event == HwEvent::CaptureDone {
                // alternate fields for interlaced sources
                board.set_field(odd);
                odd = !odd;
            }
            irq.raise(event);
        }
    })
}

pub fn execute(args: Args, json: bool) -> Result<(), CliError> {
    log::debug!("Simulate parameters: {:?}", args);
    if args.fps == 0 {
        return Err(CliError::InvalidArgs("fps must be positive".to_string()));
    }
    if !(args.timeout > 0.0 && args.timeout.is_finite()) {
        return Err(CliError::InvalidArgs(format!(
            "timeout must be positive: {}",
            args.timeout
        )));
    }

    let mut config = utils::load_config(args.config.as_deref())?;
    if args.rotation {
        config.rotation = true;
        config.validate()?;
    }
    let active = config.gear.active_high;
    let vsync_hz = config.display.sync.refresh_hz();
    let timeout = Duration::from_secs_f64(args.timeout);

    let term = utils::install_signal_handler()?;

    let board = Arc::new(SimBoard::new());
    board.set_gear_level(!active);
    let hooks: Arc<dyn VendorHooks> = if args.guide_lines {
        Arc::new(GuideLines)
    } else {
        Arc::new(NoHooks)
    };

    let cam = camera::create_rearcam()
        .with_config(config)
        .with_board(SimBoard::board(&board))
        .with_hooks(hooks)
        .open()?;
    let irq = cam.irq_line(64)?;

    log::info!(
        "Simulating {}x{}{} at {} fps, display {:.1} Hz",
        cam.config().capture.width,
        cam.config().capture.height,
        if cam.config().rotation { " rotated" } else { "" },
        args.fps,
        vsync_hz
    );

    {
        let _producers = Producers::start(&board, &irq, args.fps, vsync_hz);

        utils::sleep_unless(&term, Duration::from_millis(args.engage_ms));
        if !term.load(Ordering::Relaxed) {
            log::info!("Reverse gear engaged");
            board.set_gear_level(active);
            irq.raise(HwEvent::GearEdge);
            if !utils::wait_until(&term, timeout, || cam.is_on()) && !term.load(Ordering::Relaxed)
            {
                return Err(CliError::Timeout(format!(
                    "camera did not turn on within {:.1}s",
                    args.timeout
                )));
            }

            utils::sleep_unless(&term, Duration::from_millis(args.duration_ms));

            log::info!("Reverse gear released");
            board.set_gear_level(!active);
            irq.raise(HwEvent::GearEdge);
            if !utils::wait_until(&term, timeout, || !cam.is_on()) && !term.load(Ordering::Relaxed)
            {
                return Err(CliError::Timeout(format!(
                    "camera did not turn off within {:.1}s",
                    args.timeout
                )));
            }
        }
    }

    let interrupted = term.load(Ordering::Relaxed);
    if interrupted {
        log::warn!("Interrupted, shutting down");
        cam.shutdown();
    } else if !cam.stop_when_idle(timeout) {
        return Err(CliError::Timeout(format!(
            "camera still on after {:.1}s",
            args.timeout
        )));
    }

    let report = Report {
        width: cam.config().capture.width,
        height: cam.config().capture.height,
        rotation: cam.config().rotation,
        buffers: cam.config().buffer_count,
        interrupted,
        queues: cam.queue_sizes(),
        stats: cam.stats(),
    };

    if json {
        let out = serde_json::to_string_pretty(&report)
            .map_err(|e| CliError::General(format!("JSON serialization failed: {}", e)))?;
        println!("{}", out);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &Report) {
    let s = &report.stats;
    println!(
        "Rear camera {}x{}{} with {} buffers{}",
        report.width,
        report.height,
        if report.rotation { " (rotated)" } else { "" },
        report.buffers,
        if report.interrupted {
            ", interrupted"
        } else {
            ""
        }
    );
    println!("  Frames captured:    {}", s.frames_captured);
    println!("  Capture underruns:  {}", s.capture_underruns);
    if report.rotation {
        println!("  Frames rotated:     {}", s.frames_rotated);
        println!("  Rotation underruns: {}", s.rotation_underruns);
    }
    println!("  Frames displayed:   {}", s.frames_displayed);
    println!("  Frames dropped:     {}", s.frames_recycled);
    println!(
        "  Decisions:          {} ({} on, {} off, {} rechecks)",
        s.decisions, s.turn_ons, s.turn_offs, s.rechecks
    );
}
