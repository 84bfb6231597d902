//! btsnoop wire format: header layout, record codec, file reader

mod codec;
mod format;
mod reader;

pub use codec::{decode_file_header, decode_record, encode_file_header, encode_record, PacketRecord};
pub use format::{
    Direction, FileHeader, PacketType, RecordHeader, BTSNOOP_EPOCH_DELTA_US, DATALINK_HCI_UART,
    FILE_HEADER_SIZE, FILE_MAGIC, FILE_VERSION, FLAG_INCOMING, FLAG_REDACTED, FLAG_TYPE_MASK,
    FLAG_TYPE_SHIFT, RECORD_HEADER_SIZE,
};
pub use reader::{CaptureReader, Records};

use std::time::{SystemTime, UNIX_EPOCH};

/// Convert a wall-clock time to microseconds since the btsnoop epoch
///
/// Times before the Unix epoch clamp to the Unix epoch.
#[must_use]
pub fn btsnoop_timestamp(time: SystemTime) -> u64 {
    let unix_us = time
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_micros() as u64);
    unix_us + BTSNOOP_EPOCH_DELTA_US
}
