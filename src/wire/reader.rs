//! Capture file reader

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;

use super::codec::{decode_file_header, decode_record_at, PacketRecord};
use super::format::{FileHeader, FILE_HEADER_SIZE};
use crate::{Result, SnoopError};

/// Read-only view of a capture file
pub struct CaptureReader {
    _file: File,
    mmap: Mmap,
    header: FileHeader,
}

impl CaptureReader {
    /// Open an existing capture file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be opened, mapped, or has a bad header
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;

        if file.metadata()?.len() < FILE_HEADER_SIZE as u64 {
            return Err(SnoopError::malformed(0, "File too small to contain header"));
        }

        let mmap = unsafe { Mmap::map(&file)? };
        let header = decode_file_header(&mmap)?;

        Ok(Self {
            _file: file,
            mmap,
            header,
        })
    }

    /// The file header
    #[must_use]
    pub fn header(&self) -> FileHeader {
        self.header
    }

    /// Total file size in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    /// Whether the file holds only a header
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mmap.len() == FILE_HEADER_SIZE
    }

    /// Iterate over records in file order
    ///
    /// Iteration stops after the first malformed record.
    pub fn records(&self) -> Records<'_> {
        Records {
            bytes: &self.mmap,
            offset: FILE_HEADER_SIZE,
            failed: false,
        }
    }

    /// Decode every record, failing on the first malformed one
    ///
    /// # Errors
    ///
    /// Returns `MalformedRecord` if any record is truncated or inconsistent
    pub fn read_all(&self) -> Result<Vec<PacketRecord<'static>>> {
        self.records()
            .map(|record| record.map(PacketRecord::into_owned))
            .collect()
    }
}

/// Iterator over the records of a capture file
pub struct Records<'a> {
    bytes: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> Iterator for Records<'a> {
    type Item = Result<PacketRecord<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.bytes.len() {
            return None;
        }

        match decode_record_at(self.bytes, self.offset) {
            Ok((record, consumed)) => {
                self.offset += consumed;
                Some(Ok(record))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
