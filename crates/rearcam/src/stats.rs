// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Running counters, updated lock-free from every stage.
#[derive(Debug, Default)]
pub struct Stats {
    frames_captured: AtomicU64,
    capture_underruns: AtomicU64,
    frames_rotated: AtomicU64,
    rotation_underruns: AtomicU64,
    frames_displayed: AtomicU64,
    frames_recycled: AtomicU64,
    decisions: AtomicU64,
    turn_ons: AtomicU64,
    turn_offs: AtomicU64,
    rechecks: AtomicU64,
}

/// Point-in-time copy of [`Stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub frames_captured: u64,
    pub capture_underruns: u64,
    pub frames_rotated: u64,
    pub rotation_underruns: u64,
    pub frames_displayed: u64,
    /// Frames dropped by a newest-wins stage without being displayed
    pub frames_recycled: u64,
    pub decisions: u64,
    pub turn_ons: u64,
    pub turn_offs: u64,
    pub rechecks: u64,
}

fn bump(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

impl Stats {
    pub(crate) fn frame_captured(&self) {
        bump(&self.frames_captured, 1);
    }

    pub(crate) fn capture_underrun(&self) {
        bump(&self.capture_underruns, 1);
    }

    pub(crate) fn frame_rotated(&self, recycled: usize) {
        bump(&self.frames_rotated, 1);
        self.frames_recycled(recycled);
    }

    pub(crate) fn rotation_underrun(&self) {
        bump(&self.rotation_underruns, 1);
    }

    pub(crate) fn frame_displayed(&self) {
        bump(&self.frames_displayed, 1);
    }

    pub(crate) fn frames_recycled(&self, n: usize) {
        bump(&self.frames_recycled, n as u64);
    }

    pub(crate) fn decision(&self) {
        bump(&self.decisions, 1);
    }

    pub(crate) fn turned_on(&self) {
        bump(&self.turn_ons, 1);
    }

    pub(crate) fn turned_off(&self) {
        bump(&self.turn_offs, 1);
    }

    pub(crate) fn recheck(&self) {
        bump(&self.rechecks, 1);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            frames_captured: get(&self.frames_captured),
            capture_underruns: get(&self.capture_underruns),
            frames_rotated: get(&self.frames_rotated),
            rotation_underruns: get(&self.rotation_underruns),
            frames_displayed: get(&self.frames_displayed),
            frames_recycled: get(&self.frames_recycled),
            decisions: get(&self.decisions),
            turn_ons: get(&self.turn_ons),
            turn_offs: get(&self.turn_offs),
            rechecks: get(&self.rechecks),
        }
    }
}
