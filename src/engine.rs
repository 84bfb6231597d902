//! Capture engine: the synchronized entry point for packet producers
//!
//! All mutable state (open file, ring buffer, counters) sits behind one
//! reentrant lock. `capture` never fails from the caller's point of view:
//! storage errors are logged once and switch capture off for the session.

use std::cell::RefCell;
use std::path::PathBuf;
use std::time::SystemTime;

use bytes::Bytes;
use parking_lot::ReentrantMutex;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::buffer::RingBuffer;
use crate::config::{CaptureConfig, Mode};
use crate::diagnostics::write_diagnostics_file;
use crate::policy::{classify, Routing};
use crate::rotation::{Appended, RotationManager};
use crate::wire::{
    btsnoop_timestamp, encode_file_header, encode_record, Direction, PacketRecord, PacketType,
    DATALINK_HCI_UART, FILE_HEADER_SIZE,
};
use crate::{Result, SnoopError};

/// Counters reported for external diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureStats {
    /// Configured mode
    pub mode: Mode,
    /// Whether new packets are still accepted
    pub accepting: bool,
    /// Whether capture was switched off by a storage failure
    pub storage_failed: bool,
    /// Packets routed since start
    pub packets_captured: u64,
    /// Records in the current primary file
    pub packets_in_file: usize,
    /// Records written to primary files since start
    pub packets_written: u64,
    /// Primary files opened since start
    pub files_opened: u64,
    /// Ring buffer occupancy
    pub buffer_len: usize,
    /// Ring buffer capacity
    pub buffer_capacity: usize,
    /// Ring buffer evictions since start
    pub buffer_evicted: u64,
    /// Records lost since the last successful one
    pub dropped_packets: u32,
    /// Diagnostics files written
    pub dumps_written: u64,
}

struct EngineState {
    accepting: bool,
    closed: bool,
    storage_failed: bool,
    rotation: RotationManager,
    buffer: RingBuffer<Bytes>,
    dropped_packets: u32,
    last_timestamp: u64,
    packets_captured: u64,
    dump_requested: bool,
    dumps_written: u64,
}

impl EngineState {
    fn next_timestamp(&mut self) -> u64 {
        let now = btsnoop_timestamp(SystemTime::now());
        self.last_timestamp = self.last_timestamp.max(now);
        self.last_timestamp
    }
}

/// Packet capture engine
pub struct CaptureEngine {
    config: CaptureConfig,
    file_header: [u8; FILE_HEADER_SIZE],
    state: ReentrantMutex<RefCell<EngineState>>,
}

impl CaptureEngine {
    /// Create an engine; no file is opened until the first primary write
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` if the configuration fails validation
    pub fn new(config: CaptureConfig) -> Result<Self> {
        config.validate()?;

        let state = EngineState {
            accepting: config.mode.is_enabled(),
            closed: false,
            storage_failed: false,
            rotation: RotationManager::new(&config),
            buffer: RingBuffer::new(config.max_packets_per_buffer)?,
            dropped_packets: 0,
            last_timestamp: 0,
            packets_captured: 0,
            dump_requested: false,
            dumps_written: 0,
        };

        Ok(Self {
            file_header: encode_file_header(DATALINK_HCI_UART),
            config,
            state: ReentrantMutex::new(RefCell::new(state)),
        })
    }

    /// Engine configuration
    #[must_use]
    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Record one packet
    ///
    /// Records from concurrent callers are written in lock acquisition order.
    pub fn capture(&self, packet: &[u8], direction: Direction, packet_type: PacketType) {
        if !self.config.mode.is_enabled() {
            return;
        }

        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        if !state.accepting {
            return;
        }

        let timestamp = state.next_timestamp();
        let record = PacketRecord::new(
            packet,
            direction,
            packet_type,
            state.dropped_packets,
            timestamp,
        );

        match classify(&record, &self.config) {
            Routing::Drop => return,
            Routing::ToPrimaryOnly(len) => {
                if !self.write_primary(&mut state, &record.redacted(len)) {
                    return;
                }
            }
            Routing::ToBufferOnly(len) => {
                state.buffer.push(Bytes::from(encode_record(&record.redacted(len))));
            }
            Routing::ToBoth { primary, buffer } => {
                if !self.write_primary(&mut state, &record.redacted(primary)) {
                    return;
                }
                state
                    .buffer
                    .push(Bytes::from(encode_record(&record.redacted(buffer))));
            }
        }

        state.dropped_packets = 0;
        state.packets_captured += 1;
    }

    /// Current counters
    #[must_use]
    pub fn stats(&self) -> CaptureStats {
        self.with_state(|state| CaptureStats {
            mode: self.config.mode,
            accepting: state.accepting,
            storage_failed: state.storage_failed,
            packets_captured: state.packets_captured,
            packets_in_file: state.rotation.packet_counter(),
            packets_written: state.rotation.packets_written(),
            files_opened: state.rotation.files_opened(),
            buffer_len: state.buffer.len(),
            buffer_capacity: state.buffer.capacity(),
            buffer_evicted: state.buffer.evicted(),
            dropped_packets: state.dropped_packets,
            dumps_written: state.dumps_written,
        })
    }

    /// Encoded ring buffer entries, oldest first
    #[must_use]
    pub fn snapshot(&self) -> Vec<Bytes> {
        self.with_state(|state| state.buffer.snapshot())
    }

    /// Ask the next sweep to write the ring buffer to a diagnostics file
    pub fn request_dump(&self) {
        self.with_state(|state| state.dump_requested = true);
    }

    /// Write the ring buffer to a fresh diagnostics file now
    ///
    /// The lock is held only to copy the buffer; file I/O happens unlocked.
    /// Returns `None` if the buffer is empty.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the file cannot be written
    pub fn dump_diagnostics(&self) -> Result<Option<PathBuf>> {
        let entries = self.snapshot();
        self.write_dump(&entries)
    }

    /// Delete the primary capture file and its backup
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if an existing file cannot be removed
    pub fn discard_capture_files(&self) -> Result<()> {
        self.with_state(|state| state.rotation.discard_files())
    }

    /// Whether `capture` still records packets
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.with_state(|state| state.accepting)
    }

    /// Stop accepting packets, close the primary file and, if configured,
    /// write the ring buffer out
    ///
    /// Calling this more than once is a no-op. The ring buffer is cleared
    /// only once the shutdown dump has been written.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if closing the file or writing the dump fails
    pub fn shutdown(&self) -> Result<Option<PathBuf>> {
        let guard = self.state.lock();
        let (closed, entries) = {
            let mut state = guard.borrow_mut();
            if state.closed {
                return Ok(None);
            }
            state.closed = true;
            state.accepting = false;

            let closed = state.rotation.close();
            let entries = if self.config.dump_on_shutdown {
                state.buffer.snapshot()
            } else {
                Vec::new()
            };
            (closed, entries)
        };

        let stats = self.stats();
        drop(guard);

        info!(
            "Capture stopped: {} packets captured, {} written to {} files",
            stats.packets_captured, stats.packets_written, stats.files_opened
        );

        // nothing is accepted any more, so the buffer still matches `entries`
        let dump = self.write_dump(&entries);
        if matches!(dump, Ok(Some(_))) {
            self.with_state(|state| state.buffer.clear());
        }
        closed?;
        dump
    }

    /// Consume a pending dump request, returning the buffer contents to write
    pub(crate) fn take_dump_request(&self) -> Option<Vec<Bytes>> {
        self.with_state(|state| {
            std::mem::take(&mut state.dump_requested).then(|| state.buffer.snapshot())
        })
    }

    /// Write encoded entries to a new diagnostics file without holding the lock
    pub(crate) fn write_dump(&self, entries: &[Bytes]) -> Result<Option<PathBuf>> {
        let path = write_diagnostics_file(&self.config.diagnostics_path, SystemTime::now(), entries)?;
        if path.is_some() {
            self.with_state(|state| state.dumps_written += 1);
        }
        Ok(path)
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut EngineState) -> R) -> R {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        f(&mut state)
    }

    fn write_primary(&self, state: &mut EngineState, record: &PacketRecord<'_>) -> bool {
        let bytes = encode_record(record);
        match state.rotation.append(&self.file_header, &bytes) {
            Ok(Appended::Open | Appended::Rotated) => true,
            Ok(Appended::CloseFailed(e)) => {
                Self::disable(state, &e);
                true
            }
            Err(e) => {
                Self::disable(state, &e);
                state.dropped_packets = state.dropped_packets.saturating_add(1);
                debug!("Dropped packets: {}", state.dropped_packets);
                false
            }
        }
    }

    fn disable(state: &mut EngineState, e: &SnoopError) {
        error!("Disabling packet capture: {}", e);
        state.storage_failed = true;
        state.accepting = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RotationPolicy;
    use crate::diagnostics::list_diagnostics_files;
    use crate::wire::{decode_record, CaptureReader};
    use tempfile::TempDir;

    fn test_config(dir: &TempDir, mode: Mode) -> CaptureConfig {
        CaptureConfig::new(
            mode,
            dir.path().join("btsnoop_hci.log"),
            dir.path().join("btsnooz_hci.log"),
        )
    }

    fn read_primary(config: &CaptureConfig) -> Vec<PacketRecord<'static>> {
        CaptureReader::open(&config.primary_path)
            .unwrap()
            .read_all()
            .unwrap()
    }

    #[test]
    fn test_full_mode_keeps_payload() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir, Mode::Full);
        let engine = CaptureEngine::new(config.clone()).unwrap();

        engine.capture(&[0x03, 0x0C, 0x00], Direction::Outgoing, PacketType::Command);
        engine.capture(&[0x01, 0x20, 0x02, 0x00, 0xAA, 0xBB], Direction::Incoming, PacketType::Acl);
        engine.shutdown().unwrap();

        let records = read_primary(&config);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].payload(), &[0x03, 0x0C, 0x00]);
        assert_eq!(records[0].direction, Direction::Outgoing);
        assert_eq!(records[1].captured_length(), records[1].original_length);
        assert_eq!(records[1].packet_type, PacketType::Acl);
        assert!(records[0].timestamp <= records[1].timestamp);

        let stats = engine.stats();
        assert_eq!(stats.packets_written, 2);
        assert_eq!(stats.buffer_len, 0);
    }

    #[test]
    fn test_truncated_mode_never_opens_primary() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir, Mode::Truncated);
        let engine = CaptureEngine::new(config.clone()).unwrap();

        for len in [1usize, 10, 100] {
            engine.capture(&vec![0x42; len], Direction::Incoming, PacketType::Acl);
        }

        assert!(!config.primary_path.exists());
        let entries = engine.snapshot();
        assert_eq!(entries.len(), 3);
        for (entry, len) in entries.iter().zip([1u32, 10, 100]) {
            let (record, _) = decode_record(entry).unwrap();
            assert_eq!(record.captured_length(), 0);
            assert_eq!(record.original_length, len);
            assert!(record.is_redacted());
        }
    }

    #[test]
    fn test_disabled_mode_does_nothing() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir, Mode::Disabled);
        let engine = CaptureEngine::new(config.clone()).unwrap();

        for _ in 0..5 {
            engine.capture(&[1, 2, 3], Direction::Outgoing, PacketType::Command);
        }

        let stats = engine.stats();
        assert!(!config.primary_path.exists());
        assert_eq!(stats.buffer_len, 0);
        assert_eq!(stats.packets_captured, 0);
        assert_eq!(stats.dropped_packets, 0);
        assert!(!stats.accepting);
    }

    #[test]
    fn test_filtered_mode_splits_redaction() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir, Mode::Filtered);
        let engine = CaptureEngine::new(config.clone()).unwrap();

        engine.capture(&[0x0E, 0x01, 0x00], Direction::Incoming, PacketType::Event);
        engine.capture(&[0x01, 0x20, 0x02, 0x00, 0xAA, 0xBB], Direction::Incoming, PacketType::Acl);
        let entries = engine.snapshot();
        engine.shutdown().unwrap();

        let primary = read_primary(&config);
        assert_eq!(primary[0].captured_length(), 3);
        assert_eq!(primary[1].captured_length(), 0);
        assert_eq!(primary[1].original_length, 6);

        let (buffered, _) = decode_record(&entries[1]).unwrap();
        assert_eq!(buffered.captured_length(), 6);
    }

    #[test]
    fn test_rotation_scenario() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir, Mode::Full);
        config.max_packets_per_file = 2;
        config.rotation = RotationPolicy::KeepBackup;
        let engine = CaptureEngine::new(config.clone()).unwrap();

        for len in [10usize, 20, 30] {
            engine.capture(&vec![0u8; len], Direction::Outgoing, PacketType::Acl);
        }
        engine.shutdown().unwrap();

        let first = CaptureReader::open(&config.backup_path()).unwrap().read_all().unwrap();
        let lengths: Vec<u32> = first.iter().map(|r| r.original_length).collect();
        assert_eq!(lengths, vec![10, 20]);

        let second = read_primary(&config);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].original_length, 30);
    }

    #[test]
    fn test_storage_failure_disables_capture() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir, Mode::Filtered);
        config.primary_path = dir.path().join("missing").join("btsnoop_hci.log");
        let engine = CaptureEngine::new(config).unwrap();

        engine.capture(&[1], Direction::Outgoing, PacketType::Command);
        let stats = engine.stats();
        assert!(stats.storage_failed);
        assert!(!stats.accepting);
        assert_eq!(stats.dropped_packets, 1);
        assert_eq!(stats.buffer_len, 0);

        engine.capture(&[2], Direction::Outgoing, PacketType::Command);
        assert_eq!(engine.stats(), stats);
    }

    #[test]
    fn test_blocked_backup_disables_capture() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir, Mode::Full);
        config.max_packets_per_file = 1;
        config.rotation = RotationPolicy::KeepBackup;
        let backup = config.backup_path();
        std::fs::create_dir(&backup).unwrap();
        std::fs::write(backup.join("occupant"), b"x").unwrap();
        let engine = CaptureEngine::new(config.clone()).unwrap();

        engine.capture(&[0xAA; 10], Direction::Incoming, PacketType::Acl);
        engine.capture(&[0xBB; 20], Direction::Incoming, PacketType::Acl);

        let stats = engine.stats();
        assert!(stats.storage_failed);
        assert!(!stats.accepting);
        assert_eq!(stats.packets_written, 1);
        assert_eq!(stats.dropped_packets, 1);

        // the first generation was not truncated away
        let records = read_primary(&config);
        let lengths: Vec<u32> = records.iter().map(|r| r.original_length).collect();
        assert_eq!(lengths, vec![10]);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_close_failure_keeps_written_record() {
        // fsync on /dev/null fails with EINVAL
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir, Mode::Filtered);
        config.primary_path = PathBuf::from("/dev/null");
        config.max_packets_per_file = 1;
        config.rotation = RotationPolicy::Overwrite;
        let engine = CaptureEngine::new(config).unwrap();

        engine.capture(&[0x0E, 0x00], Direction::Incoming, PacketType::Event);

        let stats = engine.stats();
        assert!(stats.storage_failed);
        assert!(!stats.accepting);
        assert_eq!(stats.packets_written, 1);
        assert_eq!(stats.packets_captured, 1);
        assert_eq!(stats.dropped_packets, 0);
        assert_eq!(stats.buffer_len, 1);
    }

    #[test]
    fn test_failed_shutdown_dump_keeps_buffer() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir, Mode::Truncated);
        config.diagnostics_path = dir.path().join("missing").join("btsnooz_hci.log");
        let engine = CaptureEngine::new(config).unwrap();
        engine.capture(&[0x0E, 0x00], Direction::Incoming, PacketType::Event);

        assert!(matches!(
            engine.shutdown(),
            Err(crate::SnoopError::StorageUnavailable { .. })
        ));
        assert_eq!(engine.snapshot().len(), 1);
        assert_eq!(engine.stats().dumps_written, 0);
    }

    #[test]
    fn test_dump_diagnostics() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir, Mode::Truncated);
        config.max_packets_per_buffer = 2;
        let engine = CaptureEngine::new(config.clone()).unwrap();

        assert_eq!(engine.dump_diagnostics().unwrap(), None);

        for len in [1usize, 2, 3] {
            engine.capture(&vec![0; len], Direction::Incoming, PacketType::Event);
        }
        let path = engine.dump_diagnostics().unwrap().unwrap();

        let records = CaptureReader::open(&path).unwrap().read_all().unwrap();
        let lengths: Vec<u32> = records.iter().map(|r| r.original_length).collect();
        assert_eq!(lengths, vec![2, 3]);
        assert_eq!(engine.stats().buffer_len, 2);
        assert_eq!(engine.stats().dumps_written, 1);
    }

    #[test]
    fn test_dump_request_is_consumed_once() {
        let dir = TempDir::new().unwrap();
        let engine = CaptureEngine::new(test_config(&dir, Mode::Truncated)).unwrap();
        engine.capture(&[1], Direction::Incoming, PacketType::Event);

        assert!(engine.take_dump_request().is_none());
        engine.request_dump();
        assert_eq!(engine.take_dump_request().map(|e| e.len()), Some(1));
        assert!(engine.take_dump_request().is_none());
    }

    #[test]
    fn test_shutdown_dumps_and_stops() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir, Mode::Filtered);
        let engine = CaptureEngine::new(config.clone()).unwrap();
        engine.capture(&[0x0E, 0x00], Direction::Incoming, PacketType::Event);

        let dump = engine.shutdown().unwrap();
        assert!(dump.is_some());
        assert_eq!(list_diagnostics_files(&config.diagnostics_path).unwrap().len(), 1);
        assert!(!engine.is_accepting());
        assert_eq!(engine.stats().buffer_len, 0);

        engine.capture(&[0x0E, 0x00], Direction::Incoming, PacketType::Event);
        assert_eq!(engine.stats().packets_captured, 1);
        assert_eq!(engine.shutdown().unwrap(), None);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir, Mode::Full);
        config.max_packets_per_buffer = 0;
        assert!(CaptureEngine::new(config).is_err());
    }
}
