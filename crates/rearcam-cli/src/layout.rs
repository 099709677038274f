// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::error::CliError;
use crate::utils;
use clap::Args as ClapArgs;
use rearcam::{
    buffer::{align_usize, FrameLayout, PlaneKind, PAGE_SIZE},
    config::{RearcamConfig, RgbFormat},
};
use serde::Serialize;
use std::path::PathBuf;

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// JSON configuration file (defaults: 720x480 capture, 1024x600 panel)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Include the rotation buffers regardless of the configuration
    #[arg(long)]
    rotation: bool,
}

#[derive(Serialize)]
struct Overlay {
    width: u32,
    height: u32,
    format: RgbFormat,
    size: usize,
}

#[derive(Serialize)]
struct Layout {
    buffers: usize,
    capture: FrameLayout,
    rotation: Option<FrameLayout>,
    overlay: Overlay,
    total_bytes: usize,
    cma_bytes: usize,
}

impl Layout {
    fn new(config: &RearcamConfig) -> Layout {
        let capture = FrameLayout::yuv420(config.capture.width, config.capture.height);
        let rotation = config
            .rotation
            .then(|| FrameLayout::yuv420(config.rotated_width(), config.capture.width));

        let sync = &config.display.sync;
        let format = config.display.overlay_format;
        let overlay_bytes =
            sync.h_active as usize * sync.v_active as usize * format.bytes_per_pixel() as usize;
        let overlay = Overlay {
            width: sync.h_active,
            height: sync.v_active,
            format,
            size: align_usize(overlay_bytes, PAGE_SIZE),
        };

        let per_frame = capture.size + rotation.map_or(0, |r| r.size);
        Layout {
            buffers: config.buffer_count,
            total_bytes: config.buffer_count * per_frame + overlay.size,
            cma_bytes: config.cma_bytes,
            capture,
            rotation,
            overlay,
        }
    }
}

pub fn execute(args: Args, json: bool) -> Result<(), CliError> {
    let mut config = utils::load_config(args.config.as_deref())?;
    if args.rotation {
        config.rotation = true;
        config.validate()?;
    }

    let layout = Layout::new(&config);
    if layout.total_bytes > layout.cma_bytes {
        log::warn!(
            "Pool needs {} bytes but only {} are reserved",
            layout.total_bytes,
            layout.cma_bytes
        );
    }

    if json {
        let out = serde_json::to_string_pretty(&layout)
            .map_err(|e| CliError::General(format!("JSON serialization failed: {}", e)))?;
        println!("{}", out);
        return Ok(());
    }

    print_frame("capture", layout.buffers, &layout.capture);
    if let Some(rotation) = &layout.rotation {
        print_frame("rotation", layout.buffers, rotation);
    }
    println!(
        "overlay {}x{} {}: {} bytes",
        layout.overlay.width, layout.overlay.height, layout.overlay.format, layout.overlay.size
    );
    println!(
        "total {} of {} bytes reserved",
        layout.total_bytes, layout.cma_bytes
    );
    Ok(())
}

fn print_frame(name: &str, count: usize, layout: &FrameLayout) {
    println!(
        "{} {}x{}: {} x {} bytes",
        name, layout.width, layout.height, count, layout.size
    );
    for kind in PlaneKind::ALL {
        let plane = layout.plane(kind);
        println!(
            "  {:<5} offset {:>8}  stride {:>5}  size {:>8}",
            format!("{:?}", kind).to_lowercase(),
            plane.addr,
            plane.stride,
            plane.size
        );
    }
}
