//! Long-lived background workers.
//!
//! A worker is a named thread that runs one closure per tick until asked
//! to stop. The heartbeat counts completed ticks so tests and health
//! checks can observe progress.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::debug;

/// A stoppable background worker.
#[derive(Debug)]
pub struct Worker {
    name: &'static str,
    stop: Arc<AtomicBool>,
    heartbeat: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawns a worker running `tick` every `interval` until stopped.
    pub fn spawn(
        name: &'static str,
        interval: Duration,
        mut tick: impl FnMut() + Send + 'static,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let heartbeat = Arc::new(AtomicU64::new(0));
        let stop_flag = Arc::clone(&stop);
        let beat = Arc::clone(&heartbeat);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                debug!(worker = name, "worker started");
                while !stop_flag.load(Ordering::Acquire) {
                    tick();
                    beat.fetch_add(1, Ordering::Relaxed);
                    thread::park_timeout(interval);
                }
                debug!(worker = name, "worker stopped");
            })
            .expect("worker thread spawn");
        Self {
            name,
            stop,
            heartbeat,
            handle: Some(handle),
        }
    }

    /// Completed ticks so far.
    #[must_use]
    pub fn heartbeat(&self) -> u64 {
        self.heartbeat.load(Ordering::Relaxed)
    }

    /// Signals the worker and waits for it to exit.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            let _ = handle.join();
        }
    }

    /// The worker's name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_worker_ticks_and_stops() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let mut worker = Worker::spawn("test", Duration::from_millis(1), move || {
            count_clone.fetch_add(1, Ordering::Relaxed);
        });
        while worker.heartbeat() < 3 {
            std::thread::sleep(Duration::from_millis(1));
        }
        worker.stop();
        let settled = count.load(Ordering::Relaxed);
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(count.load(Ordering::Relaxed), settled);
    }
}
