//! Start/stop lifecycle around the capture engine and its sweep task

use std::path::PathBuf;
use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::info;

use crate::config::{CaptureConfig, Mode};
use crate::engine::{CaptureEngine, CaptureStats};
use crate::sweeper::{SweepTask, Sweeper};
use crate::wire::{Direction, PacketType};
use crate::Result;

/// A running snoop logger
///
/// Cheap to share: producers only need `&SnoopLogger` (or the engine from
/// [`SnoopLogger::engine`]) to call `capture`.
pub struct SnoopLogger {
    engine: Arc<CaptureEngine>,
    sweeper: Arc<Sweeper>,
    sweep_task: Option<SweepTask>,
}

impl SnoopLogger {
    /// Build the engine and start the periodic diagnostics sweep on `runtime`
    ///
    /// With [`Mode::Disabled`], capture files left by earlier sessions are
    /// deleted.
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` for a bad configuration, or
    /// `StorageUnavailable` if stale capture files cannot be removed
    pub fn start(config: CaptureConfig, runtime: &Handle) -> Result<Self> {
        let interval = config.sweep_interval();
        let mode = config.mode;
        let engine = Arc::new(CaptureEngine::new(config)?);

        if mode == Mode::Disabled {
            engine.discard_capture_files()?;
        }

        let sweeper = Arc::new(Sweeper::new(Arc::clone(&engine)));
        let sweep_task = Arc::clone(&sweeper).spawn(interval, runtime);

        info!(
            "Snoop logger started: mode {}, primary {}",
            mode,
            engine.config().primary_path.display()
        );

        Ok(Self {
            engine,
            sweeper,
            sweep_task: Some(sweep_task),
        })
    }

    /// Record one packet
    pub fn capture(&self, packet: &[u8], direction: Direction, packet_type: PacketType) {
        self.engine.capture(packet, direction, packet_type);
    }

    /// Current counters
    #[must_use]
    pub fn stats(&self) -> CaptureStats {
        self.engine.stats()
    }

    /// Have the next sweep write the ring buffer to a diagnostics file
    pub fn request_dump(&self) {
        self.engine.request_dump();
    }

    /// Shared engine handle for producer threads
    #[must_use]
    pub fn engine(&self) -> Arc<CaptureEngine> {
        Arc::clone(&self.engine)
    }

    /// The diagnostics sweeper
    #[must_use]
    pub fn sweeper(&self) -> &Sweeper {
        &self.sweeper
    }

    /// Stop capturing, close files, write the shutdown dump and cancel the sweep
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the final close or dump fails; the
    /// sweep task is stopped either way
    pub async fn stop(mut self) -> Result<Option<PathBuf>> {
        let result = self.engine.shutdown();

        if let Some(task) = self.sweep_task.take() {
            task.stop().await;
        }

        info!("Snoop logger stopped");
        result
    }
}
