//! Fixed-rate periodic task on a dedicated thread.
//!
//! Each `PeriodicTask` owns one OS thread that sleeps on a crossbeam
//! channel deadline between ticks. Dropping the sender side wakes the
//! thread immediately, so `cancel` is "signal, then join": once it
//! returns, no invocation of the body is running or will run again.

use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use tracing::{debug, warn};

use crate::error::Result;

pub struct PeriodicTask {
    name: String,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    /// Run `body` first after `initial_delay`, then every `period`.
    ///
    /// Ticks missed because `body` overran are skipped rather than run
    /// back-to-back.
    pub fn spawn<F>(name: &str, initial_delay: Duration, period: Duration, mut body: F) -> Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let period = period.max(Duration::from_millis(1));
        let thread_name = name.to_string();
        let handle = std::thread::Builder::new()
            .name(format!("nullwave-{name}"))
            .spawn(move || {
                debug!(task = %thread_name, ?period, ?initial_delay, "periodic task started");
                let mut next = Instant::now() + initial_delay;
                loop {
                    match stop_rx.recv_deadline(next) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    body();
                    next += period;
                    let now = Instant::now();
                    while next <= now {
                        next += period;
                    }
                }
                debug!(task = %thread_name, "periodic task stopped");
            })?;

        Ok(Self {
            name: name.to_string(),
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop scheduling and wait for a running invocation to finish.
    pub fn cancel(&mut self) {
        self.stop_tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(task = %self.name, "periodic task panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };
    use std::thread;

    #[test]
    fn fires_repeatedly_after_initial_delay() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let start = Instant::now();
        let first = Arc::new(parking_lot::Mutex::new(None));
        let f = Arc::clone(&first);
        let mut task = PeriodicTask::spawn(
            "test",
            Duration::from_millis(30),
            Duration::from_millis(5),
            move || {
                f.lock().get_or_insert_with(Instant::now);
                c.fetch_add(1, Ordering::SeqCst);
            },
        )
        .expect("spawn");

        thread::sleep(Duration::from_millis(120));
        task.cancel();
        assert!(count.load(Ordering::SeqCst) >= 3);
        let first = first.lock().expect("task never fired");
        assert!(first.duration_since(start) >= Duration::from_millis(30));
    }

    #[test]
    fn cancel_waits_for_running_body_and_stops_ticks() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let mut task = PeriodicTask::spawn("slow", Duration::ZERO, Duration::from_millis(1), move || {
            thread::sleep(Duration::from_millis(20));
            c.fetch_add(1, Ordering::SeqCst);
        })
        .expect("spawn");

        thread::sleep(Duration::from_millis(5));
        task.cancel();
        assert!(!task.is_running());
        let after_cancel = count.load(Ordering::SeqCst);
        assert!(after_cancel >= 1, "body in flight must complete before cancel returns");
        thread::sleep(Duration::from_millis(40));
        assert_eq!(count.load(Ordering::SeqCst), after_cancel);
    }

    #[test]
    fn cancel_before_first_tick_never_runs_body() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let task = PeriodicTask::spawn("idle", Duration::from_secs(10), Duration::from_secs(10), move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .expect("spawn");
        drop(task);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
