// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies
//
// Rear Camera Pipeline Tests
//
// TESTING LAYERS:
//
// Layer 1 (Deterministic - events delivered on the test thread):
//   - test_capture_display_handoff: capture retire/arm, underrun, newest-wins
//   - test_rotation_path: luma/chroma rotation into a letterboxed buffer
//   - test_power_and_sensor_bring_up: enable/disable sequences, init table
//   - test_overlay_drawn_once: vendor overlay hook and compositor layout
//
// Layer 2 (Threaded - events delivered through an IrqLine):
//   - test_gear_cycle_with_producers: full on/off cycle with live producers
//   - test_gear_burst_decides_once: debounce of bursty gear edges
//   - test_recheck_until_running: self-correcting re-decision
//   - test_shutdown_while_streaming: no buffer access after shutdown
//
// All tests run against the in-memory SimBoard, no hardware required.
//
// RUN:
//   cargo test -p rearcam --test pipeline

use rearcam::{
    buffer::{PlaneKind, PoolKind, LUMA_BLACK, CHROMA_NEUTRAL},
    camera::{self, CaptureOutcome, RearCamera},
    config::RearcamConfig,
    hooks::GuideLines,
    hw::{DisplayHw, HwEvent},
    power::{ACTION_END, ACTION_START, ACTION_TYPE_CLOCK, ACTION_TYPE_GPIO, ACTION_TYPE_PMIC},
    sim::{PowerEvent, SimBoard},
    Decision, Error,
};
use serial_test::serial;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 64x32 capture on a 64x32 panel with four buffers.
fn small_config() -> RearcamConfig {
    let mut config = RearcamConfig::default();
    config.capture.width = 64;
    config.capture.height = 32;
    config.display.sync.h_active = 64;
    config.display.sync.v_active = 32;
    config.buffer_count = 4;
    config.cma_bytes = 1 << 20;
    config.gear.detect_delay_ms = 20;
    config
}

fn open(config: RearcamConfig) -> (Arc<SimBoard>, RearCamera) {
    let board = Arc::new(SimBoard::new());
    let cam = camera::create_rearcam()
        .with_config(config)
        .with_board(SimBoard::board(&board))
        .open()
        .unwrap();
    (board, cam)
}

fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while !cond() {
        if start.elapsed() > timeout {
            return false;
        }
        thread::sleep(Duration::from_millis(2));
    }
    true
}

/// Every buffer of each pool is on exactly one queue or armed.
fn assert_conserved(cam: &RearCamera) {
    let sizes = cam.queue_sizes();
    let count = cam.config().buffer_count;
    assert_eq!(
        sizes.capture_empty + sizes.capture_done + usize::from(sizes.capture_armed),
        count,
        "capture pool {:?}",
        sizes
    );
    if cam.config().rotation {
        assert_eq!(
            sizes.rotation_empty + sizes.rotation_done,
            count,
            "rotation pool {:?}",
            sizes
        );
    }
}

#[test]
#[serial]
fn test_capture_display_handoff() {
    init_logging();
    let (board, cam) = open(small_config());

    board.set_gear_level(true);
    assert_eq!(cam.decide_now(), Decision::TurnedOn);
    assert!(cam.is_on());
    assert!(board.capture_enabled());
    assert!(!board.vsync_irq_enabled());
    assert_conserved(&cam);

    let mut retired = Vec::new();
    for _ in 0..3 {
        match cam.capture_irq() {
            CaptureOutcome::Retired(id) => retired.push(id.index),
            other => panic!("unexpected {:?}", other),
        }
        assert_conserved(&cam);
    }
    assert_eq!(retired, vec![0, 1, 2]);
    assert!(board.vsync_irq_enabled());
    let armed = board.capture_address();

    // all buffers in flight: the stale one stays armed
    assert_eq!(cam.capture_irq(), CaptureOutcome::Underrun);
    assert_eq!(board.capture_address(), armed);
    assert_eq!(cam.stats().capture_underruns, 1);
    assert_conserved(&cam);

    let shown = cam.publish_now();
    assert_eq!(shown.shown.map(|id| id.index), Some(2));
    assert_eq!(shown.recycled, 2);
    assert!(board.video_layer_enabled());
    assert_eq!(cam.queue_sizes().capture_done, 1);
    assert_conserved(&cam);

    // captures resume from the recycled buffers
    assert!(matches!(cam.capture_irq(), CaptureOutcome::Retired(id) if id.index == 3));
    let shown = cam.publish_now();
    assert_eq!(shown.shown.map(|id| id.index), Some(3));
    assert_eq!(shown.recycled, 1);
    assert_conserved(&cam);

    let frame = &cam.buffers(PoolKind::Capture)[3];
    assert!(frame.timestamp().is_some());
    assert_eq!(board.video_address(), frame.bus_addr());

    assert_eq!(cam.decide_now(), Decision::Unchanged);
    board.set_gear_level(false);
    assert_eq!(cam.decide_now(), Decision::TurnedOff);
    assert!(!cam.is_on());
    assert!(!board.video_layer_enabled());
    assert!(!board.overlay_layer_enabled());
    assert!(!board.vsync_irq_enabled());
    assert!(!board.capture_irq_enabled());

    let stats = cam.stats();
    assert_eq!(stats.frames_captured, 4);
    assert_eq!(stats.frames_displayed, 2);
    assert_eq!(stats.frames_recycled, 3);
}

#[test]
#[serial]
fn test_interlaced_fields_pair() {
    init_logging();
    let mut config = small_config();
    config.capture.interlace = true;
    let (board, cam) = open(config);

    board.set_gear_level(true);
    assert_eq!(cam.decide_now(), Decision::TurnedOn);

    board.set_field(false);
    assert_eq!(cam.capture_irq(), CaptureOutcome::FieldPending);
    assert_eq!(cam.queue_sizes().capture_done, 0);
    board.set_field(true);
    assert!(matches!(cam.capture_irq(), CaptureOutcome::Retired(_)));
    assert_eq!(cam.queue_sizes().capture_done, 1);
}

#[test]
#[serial]
fn test_rotation_path() {
    init_logging();
    let mut config = small_config();
    config.rotation = true;
    let (board, cam) = open(config);
    assert_eq!(cam.pool().rotation_layout().unwrap().width, 127);

    board.set_gear_level(true);
    assert_eq!(cam.decide_now(), Decision::TurnedOn);
    assert_eq!(cam.queue_sizes().rotation_empty, 4);

    // mark the top-left pixel of the frame about to be retired
    let src = Arc::clone(&cam.buffers(PoolKind::Capture)[0]);
    src.plane_mut(PlaneKind::Luma).unwrap()[0] = 0xab;
    src.plane_mut(PlaneKind::Cb).unwrap()[0] = 0x11;

    assert!(matches!(cam.capture_irq(), CaptureOutcome::Retired(id) if id.index == 0));
    assert!(wait_for(Duration::from_secs(5), || {
        cam.stats().frames_rotated == 1 && !cam.has_pending_work()
    }));
    assert_conserved(&cam);
    assert_eq!(cam.queue_sizes().rotation_done, 1);

    let dst = Arc::clone(&cam.buffers(PoolKind::Rotation)[0]);
    let layout = *dst.layout();
    {
        let luma = dst.plane(PlaneKind::Luma).unwrap();
        let stride = layout.plane(PlaneKind::Luma).stride as usize;
        // (x=0, y=0) lands at row width-1, column luma offset 47
        assert_eq!(luma[63 * stride + 47], 0xab);
        assert_eq!(luma[0], LUMA_BLACK);
    }
    {
        let cb = dst.plane(PlaneKind::Cb).unwrap();
        let stride = layout.plane(PlaneKind::Cb).stride as usize;
        // chroma offset 63/2 - 32/4
        assert_eq!(cb[31 * stride + 23], 0x11);
        assert_eq!(cb[0], CHROMA_NEUTRAL);
    }
    let (cpu, device) = board.cache_syncs();
    assert!(cpu >= 1);
    assert!(device >= 1);

    let shown = cam.publish_now();
    assert_eq!(shown.shown, Some(dst.id()));
    assert_eq!(board.video_address(), dst.bus_addr());
    assert_eq!(
        board.compositor_layout().map(|l| (l.video_width, l.video_height)),
        Some((127, 64))
    );
}

#[test]
#[serial]
fn test_power_and_sensor_bring_up() {
    init_logging();
    let mut config = small_config();
    config.power.enable_seq = vec![
        ACTION_START, ACTION_TYPE_PMIC, 1, 0, ACTION_END,
        ACTION_START, ACTION_TYPE_GPIO, 17, 1, 0, 0, 0, ACTION_END,
        ACTION_START, ACTION_TYPE_CLOCK, 1, 0, ACTION_END,
    ];
    config.power.disable_seq = vec![
        ACTION_START, ACTION_TYPE_CLOCK, 0, 0, ACTION_END,
        ACTION_START, ACTION_TYPE_PMIC, 0, 0, ACTION_END,
    ];
    config.power.regulators = vec![rearcam::config::Regulator {
        name: "vcam".into(),
        microvolts: Some(1_800_000),
    }];
    config.sensor_init = vec![[0x10, 0x01], [0x11, 0x02], [0xff, 0xff], [0x12, 0x03]];

    let board = Arc::new(SimBoard::new());
    board.set_regulator("vcam", false, true);
    let cam = camera::create_rearcam()
        .with_config(config)
        .with_board(SimBoard::board(&board))
        .open()
        .unwrap();

    assert!(board.capture_configured());
    assert_eq!(
        board.power_events(),
        vec![
            PowerEvent::Voltage("vcam".into(), 1_800_000),
            PowerEvent::Regulator("vcam".into(), true),
            PowerEvent::Gpio(17, 1),
            PowerEvent::Gpio(17, 0),
            PowerEvent::Clock(true),
        ]
    );
    assert_eq!(board.sensor_writes(), vec![(0x10, 0x01), (0x11, 0x02)]);

    cam.shutdown();
    let events = board.power_events();
    assert_eq!(
        &events[5..],
        &[
            PowerEvent::Clock(false),
            PowerEvent::Regulator("vcam".into(), false),
        ]
    );
    assert_eq!(board.gpio(17), Some(0));
}

#[test]
#[serial]
fn test_open_rejects_malformed_sequence() {
    init_logging();
    let mut config = small_config();
    config.power.enable_seq = vec![ACTION_START, ACTION_TYPE_GPIO, 17, 1];
    let board = Arc::new(SimBoard::new());
    let err = camera::create_rearcam()
        .with_config(config)
        .with_board(SimBoard::board(&board))
        .open()
        .unwrap_err();
    assert!(matches!(err, Error::Sequence(_)));
    assert!(board.power_events().is_empty());
}

#[test]
#[serial]
fn test_open_rejects_oversized_frames() {
    init_logging();
    let mut config = small_config();
    config.capture.width = 65536;
    config.capture.height = 65536;
    let board = Arc::new(SimBoard::new());
    let err = camera::create_rearcam()
        .with_config(config)
        .with_board(SimBoard::board(&board))
        .open()
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)));

    let mut config = small_config();
    config.display.sync.h_active = 65536;
    config.display.sync.v_active = 32768;
    let err = camera::create_rearcam()
        .with_config(config)
        .with_board(SimBoard::board(&board))
        .open()
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert!(board.power_events().is_empty());
}

#[test]
#[serial]
fn test_sensor_failure_aborts_open() {
    init_logging();
    let mut config = small_config();
    config.sensor_init = vec![[0x10, 0x01]];
    let board = Arc::new(SimBoard::new());
    board.fail_sensor_writes(true);
    let err = camera::create_rearcam()
        .with_config(config)
        .with_board(SimBoard::board(&board))
        .open()
        .unwrap_err();
    assert!(matches!(err, Error::Hardware(_)));
}

#[test]
#[serial]
fn test_overlay_drawn_once() {
    init_logging();
    let board = Arc::new(SimBoard::new());
    let cam = camera::create_rearcam()
        .with_config(small_config())
        .with_board(SimBoard::board(&board))
        .with_hooks(Arc::new(GuideLines))
        .open()
        .unwrap();

    board.set_gear_level(true);
    assert_eq!(cam.decide_now(), Decision::TurnedOn);
    assert_eq!(board.overlay_programs(), 1);
    let overlay = cam.pool().overlay().unwrap();
    assert!(overlay.with_pixels(|px| px.iter().any(|&b| b != 0)));

    cam.capture_irq();
    cam.publish_now();
    assert_eq!(board.overlay_programs(), 1);
    assert!(board.overlay_layer_enabled());

    // a second activation keeps the latched overlay
    board.set_gear_level(false);
    assert_eq!(cam.decide_now(), Decision::TurnedOff);
    board.set_gear_level(true);
    assert_eq!(cam.decide_now(), Decision::TurnedOn);
    cam.capture_irq();
    cam.publish_now();
    assert_eq!(board.overlay_programs(), 1);
}

/// Raises capture and vsync interrupts while the board has them enabled.
fn spawn_producers(
    board: &Arc<SimBoard>,
    irq: rearcam::camera::IrqLine,
    stop: &Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    let board = Arc::clone(board);
    let stop = Arc::clone(stop);
    thread::spawn(move || {
        while !stop.load(Ordering::SeqCst) {
            if board.capture_irq_enabled() {
                irq.raise(HwEvent::CaptureDone);
            }
            if board.vsync_irq_enabled() {
                irq.raise(HwEvent::DisplayVsync);
            }
            thread::sleep(Duration::from_millis(2));
        }
    })
}

#[test]
#[serial]
fn test_gear_cycle_with_producers() {
    init_logging();
    let mut config = small_config();
    config.rotation = true;
    let (board, cam) = open(config);
    let irq = cam.irq_line(64).unwrap();
    let stop = Arc::new(AtomicBool::new(false));
    let producers = spawn_producers(&board, irq.clone(), &stop);

    board.set_gear_level(true);
    irq.raise(HwEvent::GearEdge);
    assert!(wait_for(Duration::from_secs(5), || cam.is_on()));
    assert!(wait_for(Duration::from_secs(5), || cam.stats().frames_displayed >= 5));
    assert!(board.video_layer_enabled());

    board.set_gear_level(false);
    irq.raise(HwEvent::GearEdge);
    assert!(wait_for(Duration::from_secs(5), || !cam.is_on()));
    assert!(!board.video_layer_enabled());
    assert!(!board.capture_irq_enabled());

    stop.store(true, Ordering::SeqCst);
    producers.join().unwrap();
    cam.shutdown();

    let stats = cam.stats();
    assert_eq!(stats.turn_ons, 1);
    assert_eq!(stats.turn_offs, 1);
    assert!(stats.frames_rotated >= 5);
    assert_eq!(cam.pool().late_accesses(), 0);
}

#[test]
#[serial]
fn test_gear_burst_decides_once() {
    init_logging();
    let mut config = small_config();
    config.gear.detect_delay_ms = 50;
    let (board, cam) = open(config);

    // chatter on the line, settling engaged
    for level in [true, false, true, false, true] {
        board.set_gear_level(level);
        cam.gear_irq();
    }
    assert!(wait_for(Duration::from_secs(5), || cam.is_on()));
    thread::sleep(Duration::from_millis(200));

    let stats = cam.stats();
    assert_eq!(stats.decisions, 1);
    assert_eq!(stats.turn_ons, 1);
}

#[test]
#[serial]
fn test_recheck_until_running() {
    init_logging();
    let (board, cam) = open(small_config());

    board.set_gear_level(true);
    assert_eq!(cam.decide_now(), Decision::TurnedOn);
    // no frame displayed yet, the layer is still off
    assert_eq!(cam.decide_now(), Decision::Recheck);
    assert!(wait_for(Duration::from_secs(5), || cam.stats().rechecks >= 2));

    cam.capture_irq();
    cam.publish_now();
    assert!(board.video_layer_enabled());

    thread::sleep(Duration::from_millis(200));
    let settled = cam.stats().decisions;
    thread::sleep(Duration::from_millis(200));
    assert_eq!(cam.stats().decisions, settled);
    assert_eq!(cam.stats().turn_ons, 1);
}

#[test]
#[serial]
fn test_engaged_at_open_turns_on() {
    init_logging();
    let board = Arc::new(SimBoard::new());
    board.set_gear_level(true);
    let cam = camera::create_rearcam()
        .with_config(small_config())
        .with_board(SimBoard::board(&board))
        .open()
        .unwrap();
    assert!(wait_for(Duration::from_secs(5), || cam.is_on()));
}

#[test]
#[serial]
fn test_shutdown_while_streaming() {
    init_logging();
    let mut config = small_config();
    config.rotation = true;
    let (board, cam) = open(config);
    let irq = cam.irq_line(64).unwrap();
    let stop = Arc::new(AtomicBool::new(false));
    let producers = spawn_producers(&board, irq.clone(), &stop);

    board.set_gear_level(true);
    irq.raise(HwEvent::GearEdge);
    assert!(wait_for(Duration::from_secs(5), || cam.stats().frames_rotated >= 3));

    let kept = cam.buffers(PoolKind::Rotation);
    cam.shutdown();
    assert!(cam.is_removed());
    assert!(!cam.is_on());
    assert!(!cam.has_pending_work());
    assert!(!board.capture_enabled());

    // producers keep firing into a stopped pipeline
    thread::sleep(Duration::from_millis(20));
    stop.store(true, Ordering::SeqCst);
    producers.join().unwrap();
    assert!(!irq.raise(HwEvent::CaptureDone));
    assert_eq!(cam.capture_irq(), CaptureOutcome::NotArmed);
    cam.display_irq();
    cam.gear_irq();

    assert_eq!(cam.pool().late_accesses(), 0);
    assert!(kept.iter().all(|buf| buf.is_released()));
    assert!(kept[0].plane(PlaneKind::Luma).is_none());
    assert_eq!(cam.pool().late_accesses(), 1);
    assert_eq!(cam.pool().count(PoolKind::Capture), 0);

    // idempotent
    cam.shutdown();
}
