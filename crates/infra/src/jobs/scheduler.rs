//! Background thread that runs a job on a fixed interval until shut down.

use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

/// Work invoked on every tick. Errors are logged and the loop keeps going.
pub trait PeriodicJob: Send + 'static {
    fn name(&self) -> &str;

    fn run(&mut self) -> Result<(), String>;
}

/// Closure-backed job.
pub struct FnJob<F> {
    name: String,
    f: F,
}

impl<F> FnJob<F>
where
    F: FnMut() -> Result<(), String> + Send + 'static,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> PeriodicJob for FnJob<F>
where
    F: FnMut() -> Result<(), String> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self) -> Result<(), String> {
        (self.f)()
    }
}

/// Handle to a running periodic job.
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Request shutdown and wait for the current tick to finish.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Spawn `job` on its own thread, running it every `interval`.
pub fn spawn_periodic<J: PeriodicJob>(mut job: J, interval: Duration) -> io::Result<SchedulerHandle> {
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
    let name = job.name().to_string();

    let join = thread::Builder::new().name(name.clone()).spawn(move || {
        info!(job = %name, interval_ms = interval.as_millis() as u64, "periodic job started");
        loop {
            if let Err(e) = job.run() {
                warn!(job = %name, error = %e, "periodic job tick failed");
            }
            match shutdown_rx.recv_timeout(interval) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }
        }
        info!(job = %name, "periodic job stopped");
    })?;

    Ok(SchedulerHandle {
        shutdown: shutdown_tx,
        join: Some(join),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn runs_until_shutdown() {
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = ticks.clone();
        let handle = spawn_periodic(
            FnJob::new("ticker", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
            Duration::from_millis(5),
        )
        .unwrap();

        thread::sleep(Duration::from_millis(40));
        handle.shutdown();
        let seen = ticks.load(Ordering::SeqCst);
        assert!(seen >= 1);

        thread::sleep(Duration::from_millis(20));
        assert_eq!(ticks.load(Ordering::SeqCst), seen);
    }
}
