// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Deferred work.
//!
//! A [`Worker`] is a dedicated thread that owns a single work item. Queueing
//! an item that is already pending is a no-op, so any number of triggers
//! between two runs collapse into one run. The item may be queued for
//! immediate execution or after a delay, cancelled while pending and
//! flushed.

use crate::{pipeline::lock, Error};
use std::{
    fmt,
    sync::{Arc, Condvar, Mutex, MutexGuard},
    thread::{self, JoinHandle, ThreadId},
    time::{Duration, Instant},
};

#[derive(Debug, Default)]
struct State {
    /// When the pending run becomes due; `None` when nothing is pending
    deadline: Option<Instant>,
    running: bool,
    shutdown: bool,
    runs: u64,
}

struct Shared {
    state: Mutex<State>,
    cond: Condvar,
}

impl Shared {
    fn wait<'a>(&self, guard: MutexGuard<'a, State>) -> MutexGuard<'a, State> {
        self.cond
            .wait(guard)
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn wait_timeout<'a>(
        &self,
        guard: MutexGuard<'a, State>,
        timeout: Duration,
    ) -> MutexGuard<'a, State> {
        match self.cond.wait_timeout(guard, timeout) {
            Ok((guard, _)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
        }
    }
}

/// Single-threaded queue for one work item.
pub struct Worker {
    name: String,
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
}

impl Worker {
    /// Spawns the worker thread. `job` runs on that thread each time the
    /// work item becomes due.
    pub fn spawn<F>(name: &str, job: F) -> Result<Self, Error>
    where
        F: Fn() + Send + 'static,
    {
        let shared = Arc::new(Shared {
            state: Mutex::new(State::default()),
            cond: Condvar::new(),
        });
        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run(&thread_shared, job))?;

        Ok(Worker {
            name: name.to_string(),
            thread_id: handle.thread().id(),
            shared,
            thread: Mutex::new(Some(handle)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queues the item for immediate execution. Returns `false` if it was
    /// already pending or the worker is shut down.
    pub fn queue(&self) -> bool {
        self.queue_delayed(Duration::ZERO)
    }

    /// Queues the item to run after `delay`. Returns `false` if it was
    /// already pending (the existing deadline is kept) or the worker is
    /// shut down.
    pub fn queue_delayed(&self, delay: Duration) -> bool {
        let mut state = lock(&self.shared.state);
        if state.shutdown || state.deadline.is_some() {
            return false;
        }
        state.deadline = Some(Instant::now() + delay);
        self.shared.cond.notify_all();
        true
    }

    /// Replaces any pending deadline with one `delay` from now.
    pub fn reschedule(&self, delay: Duration) -> bool {
        let mut state = lock(&self.shared.state);
        if state.shutdown {
            return false;
        }
        state.deadline = Some(Instant::now() + delay);
        self.shared.cond.notify_all();
        true
    }

    /// Drops the pending run, if any. A run already in progress continues.
    pub fn cancel(&self) -> bool {
        let mut state = lock(&self.shared.state);
        let was_pending = state.deadline.take().is_some();
        self.shared.cond.notify_all();
        was_pending
    }

    /// Cancels the pending run and waits for a run in progress to finish.
    pub fn cancel_sync(&self) -> bool {
        let was_pending = self.cancel();
        self.wait_idle(false);
        was_pending
    }

    /// Runs the pending item now, if any, and waits until the worker is idle.
    pub fn flush(&self) {
        self.wait_idle(true);
    }

    fn wait_idle(&self, expedite: bool) {
        if thread::current().id() == self.thread_id {
            // called from the job itself
            return;
        }
        let mut state = lock(&self.shared.state);
        if expedite && state.deadline.is_some() {
            state.deadline = Some(Instant::now());
            self.shared.cond.notify_all();
        }
        while !state.shutdown && (state.running || (expedite && state.deadline.is_some())) {
            state = self.shared.wait(state);
        }
    }

    pub fn is_pending(&self) -> bool {
        lock(&self.shared.state).deadline.is_some()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.shared.state).running
    }

    /// Number of completed runs.
    pub fn runs(&self) -> u64 {
        lock(&self.shared.state).runs
    }

    /// Cancels pending work, waits for the current run and joins the thread.
    /// Idempotent.
    pub fn shutdown(&self) {
        {
            let mut state = lock(&self.shared.state);
            state.deadline = None;
            while state.running && thread::current().id() != self.thread_id {
                state = self.shared.wait(state);
            }
            state.shutdown = true;
            self.shared.cond.notify_all();
        }

        if thread::current().id() == self.thread_id {
            return;
        }
        if let Some(handle) = lock(&self.thread).take() {
            if handle.join().is_err() {
                log::error!("worker {} panicked", self.name);
            }
        }
    }
}

fn run<F: Fn()>(shared: &Shared, job: F) {
    loop {
        let mut state = lock(&shared.state);
        loop {
            if state.shutdown {
                return;
            }
            match state.deadline {
                Some(due) => {
                    let now = Instant::now();
                    if due <= now {
                        state.deadline = None;
                        state.running = true;
                        break;
                    }
                    state = shared.wait_timeout(state, due - now);
                }
                None => state = shared.wait(state),
            }
        }
        drop(state);

        job();

        let mut state = lock(&shared.state);
        state.running = false;
        state.runs += 1;
        shared.cond.notify_all();
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = lock(&self.shared.state);
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("pending", &state.deadline.is_some())
            .field("running", &state.running)
            .field("runs", &state.runs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc,
    };

    fn counting_worker() -> (Worker, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let job_count = Arc::clone(&count);
        let worker = Worker::spawn("test-worker", move || {
            job_count.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        (worker, count)
    }

    #[test]
    fn test_queue_and_flush() {
        let (worker, count) = counting_worker();
        assert!(worker.queue());
        worker.flush();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(worker.runs(), 1);
        assert!(!worker.is_pending());
    }

    #[test]
    fn test_pending_item_coalesces() {
        let (worker, count) = counting_worker();
        assert!(worker.queue_delayed(Duration::from_secs(60)));
        assert!(!worker.queue());
        assert!(!worker.queue_delayed(Duration::ZERO));
        assert!(worker.is_pending());

        worker.flush();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_drops_pending_run() {
        let (worker, count) = counting_worker();
        worker.queue_delayed(Duration::from_secs(60));
        assert!(worker.cancel());
        assert!(!worker.cancel());
        worker.flush();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_reschedule_replaces_deadline() {
        let (worker, count) = counting_worker();
        worker.queue_delayed(Duration::from_secs(60));
        worker.reschedule(Duration::from_millis(5));
        let start = Instant::now();
        while count.load(Ordering::SeqCst) == 0 && start.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_sync_waits_for_running_job() {
        let (started_tx, started_rx) = mpsc::channel();
        let done = Arc::new(AtomicUsize::new(0));
        let job_done = Arc::clone(&done);
        let worker = Worker::spawn("slow-worker", move || {
            let _ = started_tx.send(());
            thread::sleep(Duration::from_millis(50));
            job_done.store(1, Ordering::SeqCst);
        })
        .unwrap();

        worker.queue();
        started_rx.recv().unwrap();
        worker.cancel_sync();
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let (worker, count) = counting_worker();
        worker.queue_delayed(Duration::from_secs(60));
        worker.shutdown();
        worker.shutdown();
        assert!(!worker.queue());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
