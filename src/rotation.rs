//! Primary capture file ownership and count-based rotation

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::{CaptureConfig, RotationPolicy};
use crate::{Result, SnoopError};

/// Outcome of a successful append
#[derive(Debug)]
pub enum Appended {
    /// The record went into a file that stays open
    Open,
    /// The record filled the file, which was then synced and closed
    Rotated,
    /// The record was written, but closing the full file failed
    CloseFailed(SnoopError),
}

/// Writer for the primary capture file
///
/// Holds at most one open file. After `max_packets_per_file` records the file
/// is synced and closed; the next append starts a new one at the same path.
pub struct RotationManager {
    path: PathBuf,
    backup_path: PathBuf,
    max_packets_per_file: usize,
    policy: RotationPolicy,
    file: Option<BufWriter<File>>,
    packet_counter: usize,
    packets_written: u64,
    files_opened: u64,
}

impl RotationManager {
    /// Create a manager for the configured primary path; no file is opened yet
    #[must_use]
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            path: config.primary_path.clone(),
            backup_path: config.backup_path(),
            max_packets_per_file: config.max_packets_per_file.max(1),
            policy: config.rotation,
            file: None,
            packet_counter: 0,
            packets_written: 0,
            files_opened: 0,
        }
    }

    /// Append one encoded record
    ///
    /// `file_header` is written first whenever a new file has to be opened.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the file cannot be opened or written.
    /// The file is closed on a failed write. A failure while closing a full
    /// file is reported as `Appended::CloseFailed`, since the record itself
    /// is already on disk.
    pub fn append(&mut self, file_header: &[u8], record: &[u8]) -> Result<Appended> {
        let writer = match self.file.take() {
            Some(writer) => writer,
            None => self.open_next(file_header)?,
        };
        let writer = self.file.insert(writer);

        if let Err(e) = writer.write_all(record).and_then(|()| writer.flush()) {
            self.file = None;
            return Err(SnoopError::storage(&self.path, e));
        }

        self.packet_counter += 1;
        self.packets_written += 1;

        if self.packet_counter >= self.max_packets_per_file {
            debug!(
                "Rotating {} after {} packets",
                self.path.display(),
                self.packet_counter
            );
            return Ok(match self.close() {
                Ok(()) => Appended::Rotated,
                Err(e) => Appended::CloseFailed(e),
            });
        }

        Ok(Appended::Open)
    }

    /// Flush, sync and close the open file, if any
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the final flush or sync fails
    pub fn close(&mut self) -> Result<()> {
        let Some(mut writer) = self.file.take() else {
            return Ok(());
        };

        self.packet_counter = 0;
        writer
            .flush()
            .and_then(|()| writer.get_ref().sync_all())
            .map_err(|e| SnoopError::storage(&self.path, e))?;

        info!("Closed capture file {}", self.path.display());
        Ok(())
    }

    /// Delete the primary file and its backup if present
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if an existing file cannot be removed
    pub fn discard_files(&mut self) -> Result<()> {
        self.file = None;
        self.packet_counter = 0;

        for path in [&self.path, &self.backup_path] {
            match fs::remove_file(path) {
                Ok(()) => info!("Removed capture file {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(SnoopError::storage(path, e)),
            }
        }

        Ok(())
    }

    /// Whether a file is currently open
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Records in the current file
    #[must_use]
    pub fn packet_counter(&self) -> usize {
        self.packet_counter
    }

    /// Records written since construction
    #[must_use]
    pub fn packets_written(&self) -> u64 {
        self.packets_written
    }

    /// Files opened since construction
    #[must_use]
    pub fn files_opened(&self) -> u64 {
        self.files_opened
    }

    /// Primary file path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_next(&mut self, file_header: &[u8]) -> Result<BufWriter<File>> {
        // the previous generation must reach the backup before truncation
        if self.policy == RotationPolicy::KeepBackup && self.path.exists() {
            if let Err(e) = fs::rename(&self.path, &self.backup_path) {
                warn!(
                    "Could not move {} to {}: {}",
                    self.path.display(),
                    self.backup_path.display(),
                    e
                );
                return Err(SnoopError::storage(&self.backup_path, e));
            }
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)
            .map_err(|e| SnoopError::storage(&self.path, e))?;

        let mut writer = BufWriter::new(file);
        writer
            .write_all(file_header)
            .and_then(|()| writer.flush())
            .map_err(|e| SnoopError::storage(&self.path, e))?;

        self.packet_counter = 0;
        self.files_opened += 1;
        info!("Opened capture file {}", self.path.display());

        Ok(writer)
    }
}
