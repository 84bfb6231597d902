//! Encoding and decoding of btsnoop headers and records

use std::borrow::Cow;

use bytemuck::{bytes_of, pod_read_unaligned};

use super::format::{
    Direction, FileHeader, PacketType, RecordHeader, FILE_HEADER_SIZE, FILE_MAGIC, FILE_VERSION,
    FLAG_INCOMING, FLAG_REDACTED, FLAG_TYPE_MASK, FLAG_TYPE_SHIFT, RECORD_HEADER_SIZE,
};
use crate::{Result, SnoopError};

const KNOWN_FLAGS: u32 = FLAG_INCOMING | FLAG_TYPE_MASK | FLAG_REDACTED;

/// One captured packet
///
/// The captured length is always the payload length, so it can never exceed
/// the original length: redaction only ever shortens the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketRecord<'a> {
    /// Packet length before redaction
    pub original_length: u32,
    /// Direction relative to the host
    pub direction: Direction,
    /// Packet kind
    pub packet_type: PacketType,
    /// Records lost since the previous successful one
    pub dropped_packets: u32,
    /// Microseconds since the btsnoop epoch
    pub timestamp: u64,
    payload: Cow<'a, [u8]>,
}

impl<'a> PacketRecord<'a> {
    /// Record carrying the whole packet
    #[must_use]
    pub fn new(
        packet: &'a [u8],
        direction: Direction,
        packet_type: PacketType,
        dropped_packets: u32,
        timestamp: u64,
    ) -> Self {
        let original_length = u32::try_from(packet.len()).unwrap_or(u32::MAX);
        Self {
            original_length,
            direction,
            packet_type,
            dropped_packets,
            timestamp,
            payload: Cow::Borrowed(&packet[..original_length as usize]),
        }
    }

    /// Stored payload bytes
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Number of stored payload bytes
    #[must_use]
    pub fn captured_length(&self) -> u32 {
        self.payload.len() as u32
    }

    /// Whether part of the payload was withheld
    #[must_use]
    pub fn is_redacted(&self) -> bool {
        self.captured_length() < self.original_length
    }

    /// View of this record keeping at most `captured_length` payload bytes
    #[must_use]
    pub fn redacted(&self, captured_length: u32) -> PacketRecord<'_> {
        let keep = (captured_length as usize).min(self.payload.len());
        PacketRecord {
            original_length: self.original_length,
            direction: self.direction,
            packet_type: self.packet_type,
            dropped_packets: self.dropped_packets,
            timestamp: self.timestamp,
            payload: Cow::Borrowed(&self.payload[..keep]),
        }
    }

    /// Flags word: direction, type code and redaction marker
    #[must_use]
    pub fn flags(&self) -> u32 {
        let mut flags = u32::from(self.packet_type.code()) << FLAG_TYPE_SHIFT;
        if self.direction == Direction::Incoming {
            flags |= FLAG_INCOMING;
        }
        if self.is_redacted() {
            flags |= FLAG_REDACTED;
        }
        flags
    }

    /// Size of this record once encoded
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        RECORD_HEADER_SIZE + self.payload.len()
    }

    /// Detach from the borrowed packet
    #[must_use]
    pub fn into_owned(self) -> PacketRecord<'static> {
        PacketRecord {
            original_length: self.original_length,
            direction: self.direction,
            packet_type: self.packet_type,
            dropped_packets: self.dropped_packets,
            timestamp: self.timestamp,
            payload: Cow::Owned(self.payload.into_owned()),
        }
    }
}

/// Encode a file header for the given datalink type
#[must_use]
pub fn encode_file_header(datalink_type: u32) -> [u8; FILE_HEADER_SIZE] {
    let mut out = [0u8; FILE_HEADER_SIZE];
    out.copy_from_slice(bytes_of(&FileHeader::new(datalink_type)));
    out
}

/// Encode a record: header, type tag, then captured payload
#[must_use]
pub fn encode_record(record: &PacketRecord<'_>) -> Vec<u8> {
    let header = RecordHeader::new(
        record.original_length,
        record.captured_length(),
        record.flags(),
        record.dropped_packets,
        record.timestamp,
        record.packet_type.code(),
    );

    let mut out = Vec::with_capacity(record.encoded_len());
    out.extend_from_slice(bytes_of(&header));
    out.extend_from_slice(record.payload());
    out
}

/// Decode and validate a file header
///
/// # Errors
///
/// Returns `MalformedRecord` if the input is short or the magic/version is wrong
pub fn decode_file_header(bytes: &[u8]) -> Result<FileHeader> {
    if bytes.len() < FILE_HEADER_SIZE {
        return Err(SnoopError::malformed(
            bytes.len(),
            format!(
                "file header truncated: need {FILE_HEADER_SIZE} bytes, have {}",
                bytes.len()
            ),
        ));
    }

    let header: FileHeader = pod_read_unaligned(&bytes[..FILE_HEADER_SIZE]);

    if header.identification_pattern() != FILE_MAGIC {
        return Err(SnoopError::malformed(
            0,
            format!(
                "invalid magic bytes: expected {:?}, got {:?}",
                FILE_MAGIC,
                header.identification_pattern()
            ),
        ));
    }

    if header.version() != FILE_VERSION {
        return Err(SnoopError::malformed(
            8,
            format!(
                "unsupported version {}, expected {FILE_VERSION}",
                header.version()
            ),
        ));
    }

    Ok(header)
}

/// Decode one record from the start of `bytes`
///
/// Returns the record (borrowing its payload from `bytes`) and the number of
/// bytes consumed.
///
/// # Errors
///
/// Returns `MalformedRecord` on truncated input or inconsistent fields
pub fn decode_record(bytes: &[u8]) -> Result<(PacketRecord<'_>, usize)> {
    decode_record_at(bytes, 0)
}

/// Decode the record starting at `offset`, reporting errors at absolute offsets
pub(crate) fn decode_record_at(bytes: &[u8], offset: usize) -> Result<(PacketRecord<'_>, usize)> {
    let available = bytes.len().saturating_sub(offset);
    if available < RECORD_HEADER_SIZE {
        return Err(SnoopError::malformed(
            offset,
            format!("record header truncated: need {RECORD_HEADER_SIZE} bytes, have {available}"),
        ));
    }

    let header: RecordHeader = pod_read_unaligned(&bytes[offset..offset + RECORD_HEADER_SIZE]);
    let flags = header.flags();

    if flags & !KNOWN_FLAGS != 0 {
        return Err(SnoopError::malformed(
            offset + 8,
            format!("unknown flag bits {:#x}", flags & !KNOWN_FLAGS),
        ));
    }

    let Some(packet_type) = PacketType::from_code(header.packet_type()) else {
        return Err(SnoopError::malformed(
            offset + 24,
            format!("unknown packet type {}", header.packet_type()),
        ));
    };

    if (flags & FLAG_TYPE_MASK) >> FLAG_TYPE_SHIFT != u32::from(packet_type.code()) {
        return Err(SnoopError::malformed(
            offset + 8,
            format!("flags type disagrees with type tag {packet_type}"),
        ));
    }

    let original = header.length_original();
    let captured = header.length_captured();
    if captured > original {
        return Err(SnoopError::malformed(
            offset + 4,
            format!("captured length {captured} exceeds original length {original}"),
        ));
    }

    if (flags & FLAG_REDACTED != 0) != (captured < original) {
        return Err(SnoopError::malformed(
            offset + 8,
            "redaction marker disagrees with lengths",
        ));
    }

    let payload_start = offset + RECORD_HEADER_SIZE;
    let payload_end = payload_start + captured as usize;
    if payload_end > bytes.len() {
        return Err(SnoopError::malformed(
            payload_start,
            format!(
                "payload truncated: need {captured} bytes, have {}",
                bytes.len() - payload_start
            ),
        ));
    }

    let direction = if flags & FLAG_INCOMING != 0 {
        Direction::Incoming
    } else {
        Direction::Outgoing
    };

    let record = PacketRecord {
        original_length: original,
        direction,
        packet_type,
        dropped_packets: header.dropped_packets(),
        timestamp: header.timestamp(),
        payload: Cow::Borrowed(&bytes[payload_start..payload_end]),
    };

    Ok((record, RECORD_HEADER_SIZE + captured as usize))
}
