// SPDX-License-Identifier: MIT
//
// SpoolTag: Filament Spool Tag Reader
// Copyright (c) 2025 SpoolTag Contributors
//
// https://github.com/spooltag/spooltag

//! Bounded fire-and-forget worker pool for cache warming
//!
//! Jobs are queued on a bounded `crossbeam` channel and run on a fixed set of
//! worker threads. A full queue drops the job. Job errors and panics are
//! logged and never reach the submitter or take a worker down.

use crate::Result;
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, warn};

type Job = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

#[derive(Default)]
struct PoolCounters {
    completed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

pub struct PreloadPool {
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<PoolCounters>,
}

impl PreloadPool {
    /// Start `workers` threads sharing a queue of `queue_depth` pending jobs
    pub fn new(workers: usize, queue_depth: usize) -> Self {
        let (sender, receiver) = channel::bounded::<Job>(queue_depth.max(1));
        let counters = Arc::new(PoolCounters::default());

        let handles = (0..workers.max(1))
            .filter_map(|i| {
                let receiver = receiver.clone();
                let counters = Arc::clone(&counters);
                std::thread::Builder::new()
                    .name(format!("spooltag-preload-{}", i))
                    .spawn(move || worker_loop(receiver, counters))
                    .map_err(|e| warn!("Failed to spawn preload worker {}: {}", i, e))
                    .ok()
            })
            .collect();

        Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(handles),
            counters,
        }
    }

    /// Queue a job without waiting; returns false if it was dropped
    pub fn submit<F>(&self, job: F) -> bool
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        };

        match sender.try_send(Box::new(job)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("Preload queue full, dropping request");
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn completed(&self) -> u64 {
        self.counters.completed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.counters.failed.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }

    /// Stop accepting jobs, let queued jobs finish, and join the workers
    pub fn shutdown(&self) {
        self.sender.lock().take();
        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                warn!("Preload worker exited abnormally");
            }
        }
    }
}

impl Drop for PreloadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(receiver: Receiver<Job>, counters: Arc<PoolCounters>) {
    for job in receiver.iter() {
        match panic::catch_unwind(AssertUnwindSafe(job)) {
            Ok(Ok(())) => {
                counters.completed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                debug!("Preload job failed: {}", e);
                counters.failed.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                warn!("Preload job panicked");
                counters.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
