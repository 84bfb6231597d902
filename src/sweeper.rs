//! Periodic expiry of diagnostics files and deferred ring buffer dumps

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::diagnostics::list_diagnostics_files;
use crate::engine::CaptureEngine;

/// Upper bound on files removed by a single sweep; the rest wait for the next tick
pub const MAX_DELETIONS_PER_SWEEP: usize = 64;

/// Shortest period accepted by `Sweeper::spawn`
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

/// Sweeper state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepState {
    /// Waiting for the next tick
    Idle,
    /// A sweep is running
    Sweeping,
}

/// Outcome of one sweep
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Expired files removed
    pub deleted: Vec<PathBuf>,
    /// Expired files that could not be removed
    pub failed: Vec<PathBuf>,
    /// Diagnostics file written for a pending dump request
    pub dump: Option<PathBuf>,
    /// Set when another sweep was already running
    pub skipped: bool,
}

/// Deletes expired diagnostics files and services dump requests
pub struct Sweeper {
    engine: Arc<CaptureEngine>,
    lifetime: Duration,
    state: Mutex<SweepState>,
}

impl Sweeper {
    /// Create a sweeper for the engine's diagnostics path
    #[must_use]
    pub fn new(engine: Arc<CaptureEngine>) -> Self {
        let lifetime = engine.config().diagnostics_lifetime();
        Self {
            engine,
            lifetime,
            state: Mutex::new(SweepState::Idle),
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> SweepState {
        *self.state.lock()
    }

    /// Sweep using the wall clock
    pub fn sweep(&self) -> SweepReport {
        self.sweep_at(SystemTime::now())
    }

    /// Sweep as if the current time were `now`
    ///
    /// The engine lock is only taken to consume a dump request and copy the
    /// ring buffer; all filesystem work runs without it.
    pub fn sweep_at(&self, now: SystemTime) -> SweepReport {
        {
            let mut state = self.state.lock();
            if *state == SweepState::Sweeping {
                return SweepReport {
                    skipped: true,
                    ..SweepReport::default()
                };
            }
            *state = SweepState::Sweeping;
        }

        let report = self.run(now);
        *self.state.lock() = SweepState::Idle;

        debug!(
            "Sweep finished: {} deleted, {} failed, dump {:?}",
            report.deleted.len(),
            report.failed.len(),
            report.dump
        );
        report
    }

    /// Run sweeps every `interval` on the given runtime until stopped
    ///
    /// Intervals shorter than `MIN_SWEEP_INTERVAL` are raised to it.
    #[must_use]
    pub fn spawn(self: Arc<Self>, interval: Duration, runtime: &Handle) -> SweepTask {
        let interval = interval.max(MIN_SWEEP_INTERVAL);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        let sweeper = Arc::clone(&self);
                        if let Err(e) = tokio::task::spawn_blocking(move || sweeper.sweep()).await {
                            warn!("Diagnostics sweep panicked: {}", e);
                        }
                    }
                }
            }

            debug!("Diagnostics sweep task stopped");
        });

        SweepTask {
            shutdown: Some(shutdown_tx),
            handle,
        }
    }

    fn run(&self, now: SystemTime) -> SweepReport {
        let mut report = SweepReport::default();
        let base = &self.engine.config().diagnostics_path;

        match list_diagnostics_files(base) {
            Ok(files) => {
                let expired = files
                    .into_iter()
                    .filter(|file| file.age(now) > self.lifetime)
                    .take(MAX_DELETIONS_PER_SWEEP);

                for file in expired {
                    match fs::remove_file(&file.path) {
                        Ok(()) => report.deleted.push(file.path),
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                        Err(e) => {
                            warn!("Could not delete {}: {}", file.path.display(), e);
                            report.failed.push(file.path);
                        }
                    }
                }
            }
            Err(e) => warn!("Could not list diagnostics files for {}: {}", base.display(), e),
        }

        if let Some(entries) = self.engine.take_dump_request() {
            match self.engine.write_dump(&entries) {
                Ok(path) => report.dump = path,
                Err(e) => warn!("Could not write requested diagnostics dump: {}", e),
            }
        }

        report
    }
}

/// Handle to a running sweep task
pub struct SweepTask {
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl SweepTask {
    /// Cancel the task and wait for it to finish
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }

        if let Err(e) = self.handle.await {
            warn!("Diagnostics sweep task ended abnormally: {}", e);
        }
    }

    /// Whether the task has exited
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
