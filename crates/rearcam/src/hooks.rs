// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

/// Vendor customisation points.
///
/// The hook object doubles as the vendor context: it is created before the
/// pipeline opens and dropped when the pipeline is shut down. Every method
/// has a permissive default.
pub trait VendorHooks: Send + Sync {
    /// Called once per turn-on, after `is_on` is latched. Returning `false`
    /// aborts the turn-on.
    fn pre_turn_on(&self) -> bool {
        true
    }

    /// Called at the end of every turn-off.
    fn post_turn_off(&self) {}

    /// Called at the start of every activation decision. Returning `false`
    /// is logged; the decision still proceeds on the gear signal.
    fn decide(&self) -> bool {
        true
    }

    /// Draws the static overlay into `dst`, an RGB buffer of
    /// `width * height * bytes_per_pixel` bytes.
    fn draw_overlay(
        &self,
        _width: u32,
        _height: u32,
        _bytes_per_pixel: u32,
        _rotation: bool,
        _dst: &mut [u8],
    ) {
    }
}

/// Hooks that accept everything and draw nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl VendorHooks for NoHooks {}

/// Draws three horizontal parking guide lines (green, yellow, red from the
/// top) into the overlay, leaving the rest transparent.
#[derive(Debug, Default, Clone, Copy)]
pub struct GuideLines;

impl GuideLines {
    const COLOURS: [[u8; 4]; 3] = [
        // B, G, R, A
        [0x00, 0xc0, 0x00, 0xff],
        [0x00, 0xd0, 0xd0, 0xff],
        [0x00, 0x00, 0xe0, 0xff],
    ];
}

impl VendorHooks for GuideLines {
    fn draw_overlay(
        &self,
        width: u32,
        height: u32,
        bytes_per_pixel: u32,
        _rotation: bool,
        dst: &mut [u8],
    ) {
        let bpp = bytes_per_pixel as usize;
        let stride = width as usize * bpp;
        let thickness = (height as usize / 60).max(1);

        for (n, colour) in Self::COLOURS.iter().enumerate() {
            let top = height as usize * (n + 2) / 5;
            let inset = width as usize * (3 - n) / 10;
            for row in top..(top + thickness).min(height as usize) {
                let line = &mut dst[row * stride..(row + 1) * stride];
                for px in line[inset * bpp..(width as usize - inset) * bpp].chunks_exact_mut(bpp) {
                    px.copy_from_slice(&colour[..bpp.min(4)]);
                }
            }
        }
    }
}
