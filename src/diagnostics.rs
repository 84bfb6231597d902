//! Diagnostics log files: naming, enumeration, materialization
//!
//! Dumps live next to the configured diagnostics path and carry their
//! creation time in the name: `btsnooz_hci.log` produces files such as
//! `btsnooz_hci.log.1700000000000` (Unix milliseconds).

use std::ffi::OsStr;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tracing::info;

use crate::wire::{encode_file_header, DATALINK_HCI_UART};
use crate::{Result, SnoopError};

const NAME_COLLISION_RETRIES: u64 = 16;

/// A diagnostics file found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticsFile {
    /// Full path
    pub path: PathBuf,
    /// Creation time encoded in the name
    pub created: SystemTime,
}

impl DiagnosticsFile {
    /// Age relative to `now`; zero for files stamped in the future
    #[must_use]
    pub fn age(&self, now: SystemTime) -> Duration {
        now.duration_since(self.created).unwrap_or_default()
    }
}

/// Path of the dump created at `created`
#[must_use]
pub fn diagnostics_file_path(base: &Path, created: SystemTime) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(format!(".{}", unix_millis(created)));
    PathBuf::from(name)
}

/// Creation time of `candidate` if it is a dump of `base`
#[must_use]
pub fn parse_created(base: &Path, candidate: &Path) -> Option<SystemTime> {
    let base_name = base.file_name()?.to_str()?;
    let name = candidate.file_name().and_then(OsStr::to_str)?;
    let suffix = name.strip_prefix(base_name)?.strip_prefix('.')?;

    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let millis: u64 = suffix.parse().ok()?;
    UNIX_EPOCH.checked_add(Duration::from_millis(millis))
}

/// Enumerate dumps belonging to `base`, oldest first
///
/// # Errors
///
/// Returns error if the directory cannot be read
pub fn list_diagnostics_files(base: &Path) -> Result<Vec<DiagnosticsFile>> {
    let dir = parent_dir(base);
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if let Some(created) = parse_created(base, &path) {
            files.push(DiagnosticsFile { path, created });
        }
    }

    files.sort_by_key(|file| file.created);
    Ok(files)
}

/// Write a self-contained capture file from encoded ring buffer entries
///
/// Returns `None` without touching the disk when `entries` is empty.
///
/// # Errors
///
/// Returns `StorageUnavailable` if the file cannot be created or written
pub fn write_diagnostics_file(
    base: &Path,
    created: SystemTime,
    entries: &[Bytes],
) -> Result<Option<PathBuf>> {
    if entries.is_empty() {
        return Ok(None);
    }

    let (path, file) = create_unique(base, created)?;
    let mut writer = BufWriter::new(file);

    let written = writer
        .write_all(&encode_file_header(DATALINK_HCI_UART))
        .and_then(|()| entries.iter().try_for_each(|entry| writer.write_all(entry)))
        .and_then(|()| writer.flush())
        .and_then(|()| writer.get_ref().sync_all());

    if let Err(e) = written {
        drop(writer);
        let _ = fs::remove_file(&path);
        return Err(SnoopError::storage(path, e));
    }

    info!(
        "Wrote diagnostics log {} ({} packets)",
        path.display(),
        entries.len()
    );
    Ok(Some(path))
}

fn create_unique(base: &Path, created: SystemTime) -> Result<(PathBuf, fs::File)> {
    let mut last_err = None;

    for bump in 0..NAME_COLLISION_RETRIES {
        let stamp = created + Duration::from_millis(bump);
        let path = diagnostics_file_path(base, stamp);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => last_err = Some((path, e)),
            Err(e) => return Err(SnoopError::storage(path, e)),
        }
    }

    let (path, e) = last_err.unwrap_or_else(|| {
        (
            base.to_path_buf(),
            io::Error::new(io::ErrorKind::AlreadyExists, "no free diagnostics file name"),
        )
    });
    Err(SnoopError::storage(path, e))
}

fn parent_dir(base: &Path) -> &Path {
    match base.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

fn unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{encode_record, CaptureReader, Direction, PacketRecord, PacketType};
    use tempfile::TempDir;

    #[test]
    fn test_name_roundtrip() {
        let base = Path::new("/data/misc/btsnooz_hci.log");
        let created = UNIX_EPOCH + Duration::from_millis(1_700_000_000_123);
        let path = diagnostics_file_path(base, created);

        assert_eq!(path, PathBuf::from("/data/misc/btsnooz_hci.log.1700000000123"));
        assert_eq!(parse_created(base, &path), Some(created));
    }

    #[test]
    fn test_foreign_names_ignored() {
        let base = Path::new("/tmp/btsnooz_hci.log");
        assert_eq!(parse_created(base, Path::new("/tmp/btsnooz_hci.log")), None);
        assert_eq!(parse_created(base, Path::new("/tmp/btsnooz_hci.log.")), None);
        assert_eq!(parse_created(base, Path::new("/tmp/btsnooz_hci.log.last")), None);
        assert_eq!(parse_created(base, Path::new("/tmp/btsnooz_hci.log.12a")), None);
        assert_eq!(parse_created(base, Path::new("/tmp/btsnoop_hci.log.12")), None);
    }

    #[test]
    fn test_empty_buffer_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("btsnooz_hci.log");
        assert_eq!(write_diagnostics_file(&base, SystemTime::now(), &[]).unwrap(), None);
        assert!(list_diagnostics_files(&base).unwrap().is_empty());
    }

    #[test]
    fn test_write_and_list() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("btsnooz_hci.log");
        let packet = [0x0E, 0x01, 0x00];
        let record = PacketRecord::new(&packet, Direction::Incoming, PacketType::Event, 0, 9);
        let entries = vec![Bytes::from(encode_record(&record)); 3];

        let now = SystemTime::now();
        let first = write_diagnostics_file(&base, now, &entries).unwrap().unwrap();
        let second = write_diagnostics_file(&base, now, &entries).unwrap().unwrap();
        assert_ne!(first, second);

        let files = list_diagnostics_files(&base).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path, first);

        let reader = CaptureReader::open(&first).unwrap();
        let records = reader.read_all().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].payload(), &packet);
    }

    #[test]
    fn test_missing_directory_lists_nothing() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("absent").join("btsnooz_hci.log");
        assert!(list_diagnostics_files(&base).unwrap().is_empty());
    }
}
