// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::{
    buffer::{BufferHandle, BufferId},
    pipeline::lock,
};
use std::{collections::VecDeque, fmt, sync::Mutex};

/// FIFO of buffer handles shared between the capture, rotation and display
/// stages.
///
/// Handles are moved in and out of a queue; `peek` only reports the identity
/// of an entry so a queued buffer can never be owned by two stages at once.
pub trait FrameQueue {
    /// Resets the queue to empty, dropping any handles it still holds.
    fn init(&self);

    /// Appends `buf` at the tail.
    fn enqueue(&self, buf: BufferHandle);

    /// Removes and returns the head, or `None` when empty.
    fn dequeue(&self) -> Option<BufferHandle>;

    /// Returns the identity of the entry at zero-based `pos` without removing
    /// it, or `None` when `pos >= size()`.
    fn peek(&self, pos: usize) -> Option<BufferId>;

    /// Dequeues until empty and returns the number of entries removed.
    fn clear(&self) -> usize;

    /// Current number of entries.
    fn size(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.size() == 0
    }
}

/// Mutex protected buffer queue.
///
/// The lock is only held for the duration of a single operation so the
/// capture event handler never waits behind a worker.
pub struct BufferQueue {
    name: &'static str,
    entries: Mutex<VecDeque<BufferHandle>>,
}

impl BufferQueue {
    pub fn new(name: &'static str) -> Self {
        BufferQueue {
            name,
            entries: Mutex::new(VecDeque::with_capacity(crate::MAX_BUFFER_COUNT)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Moves up to `count` entries from the head of this queue to the tail of
    /// `dst`, returning how many were moved.
    pub fn recycle_into(&self, dst: &BufferQueue, count: usize) -> usize {
        let mut moved = 0;
        while moved < count {
            match self.dequeue() {
                Some(buf) => {
                    dst.enqueue(buf);
                    moved += 1;
                }
                None => break,
            }
        }
        moved
    }

    /// Identities of all queued entries, head first.
    pub fn snapshot(&self) -> Vec<BufferId> {
        lock(&self.entries).iter().map(BufferHandle::id).collect()
    }
}

impl FrameQueue for BufferQueue {
    fn init(&self) {
        lock(&self.entries).clear();
    }

    fn enqueue(&self, buf: BufferHandle) {
        lock(&self.entries).push_back(buf);
    }

    fn dequeue(&self) -> Option<BufferHandle> {
        lock(&self.entries).pop_front()
    }

    fn peek(&self, pos: usize) -> Option<BufferId> {
        // size and position are read under the same guard
        lock(&self.entries).get(pos).map(BufferHandle::id)
    }

    fn clear(&self) -> usize {
        let mut removed = 0;
        while self.dequeue().is_some() {
            removed += 1;
        }
        removed
    }

    fn size(&self) -> usize {
        lock(&self.entries).len()
    }
}

impl fmt::Debug for BufferQueue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BufferQueue")
            .field("name", &self.name)
            .field("entries", &self.snapshot())
            .finish()
    }
}
