//! btsnoop on-disk structures
//!
//! Every multi-byte field is stored in network byte order. The structs hold
//! the already-swapped values so they can be written with `bytes_of` and read
//! back with `pod_read_unaligned`; use the accessors to get host values.

use std::fmt;

use bytemuck::{Pod, Zeroable};

/// File magic bytes: "btsnoop\0"
pub const FILE_MAGIC: [u8; 8] = *b"btsnoop\0";

/// btsnoop format version
pub const FILE_VERSION: u32 = 1;

/// Datalink code for HCI UART (H4) framing
pub const DATALINK_HCI_UART: u32 = 1002;

/// Encoded file header size
pub const FILE_HEADER_SIZE: usize = 16;

/// Encoded record header size, including the trailing type tag
pub const RECORD_HEADER_SIZE: usize = 25;

/// Microseconds between the btsnoop epoch (0 AD) and the Unix epoch
pub const BTSNOOP_EPOCH_DELTA_US: u64 = 0x00DC_DDB3_0F2F_8000;

/// Flags bit 0: packet travelled controller -> host
pub const FLAG_INCOMING: u32 = 1;

/// Flags bits 1..=8: packet type code
pub const FLAG_TYPE_SHIFT: u32 = 1;

/// Mask selecting the packet type code within the flags word
pub const FLAG_TYPE_MASK: u32 = 0xFF << FLAG_TYPE_SHIFT;

/// Flags bit 9: payload was redacted (captured < original)
pub const FLAG_REDACTED: u32 = 1 << 9;

/// HCI packet kind, encoded as a single byte (H4 indicator values)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum PacketType {
    /// HCI command
    Command = 1,
    /// ACL data
    Acl = 2,
    /// Synchronous (SCO) data
    Sco = 3,
    /// HCI event
    Event = 4,
    /// Isochronous data
    Iso = 5,
}

impl PacketType {
    /// All packet types in code order
    pub const ALL: [Self; 5] = [Self::Command, Self::Acl, Self::Sco, Self::Event, Self::Iso];

    /// Wire code of this type
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Parse a wire code
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Command),
            2 => Some(Self::Acl),
            3 => Some(Self::Sco),
            4 => Some(Self::Event),
            5 => Some(Self::Iso),
            _ => None,
        }
    }

    /// Whether the type carries user data rather than control traffic
    #[must_use]
    pub const fn is_data(self) -> bool {
        matches!(self, Self::Acl | Self::Sco | Self::Iso)
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Command => "CMD",
            Self::Acl => "ACL",
            Self::Sco => "SCO",
            Self::Event => "EVT",
            Self::Iso => "ISO",
        };
        f.pad(name)
    }
}

/// Direction of a packet relative to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Controller to host
    Incoming,
    /// Host to controller
    Outgoing,
}

/// File header (16 bytes)
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C, packed)]
pub struct FileHeader {
    identification_pattern: [u8; 8],
    version_number: u32,
    datalink_type: u32,
}

static_assertions::const_assert_eq!(std::mem::size_of::<FileHeader>(), FILE_HEADER_SIZE);

impl FileHeader {
    /// Header for the given datalink type
    #[must_use]
    pub fn new(datalink_type: u32) -> Self {
        Self {
            identification_pattern: FILE_MAGIC,
            version_number: FILE_VERSION.to_be(),
            datalink_type: datalink_type.to_be(),
        }
    }

    /// Magic bytes
    #[must_use]
    pub fn identification_pattern(&self) -> [u8; 8] {
        self.identification_pattern
    }

    /// Format version
    #[must_use]
    pub fn version(&self) -> u32 {
        u32::from_be(self.version_number)
    }

    /// Datalink type code
    #[must_use]
    pub fn datalink_type(&self) -> u32 {
        u32::from_be(self.datalink_type)
    }
}

impl Default for FileHeader {
    fn default() -> Self {
        Self::new(DATALINK_HCI_UART)
    }
}

/// Per-packet record header (25 bytes)
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C, packed)]
pub struct RecordHeader {
    length_original: u32,
    length_captured: u32,
    flags: u32,
    dropped_packets: u32,
    timestamp: u64,
    packet_type: u8,
}

static_assertions::const_assert_eq!(std::mem::size_of::<RecordHeader>(), RECORD_HEADER_SIZE);

impl RecordHeader {
    /// Build a header from host-order values
    #[must_use]
    pub fn new(
        length_original: u32,
        length_captured: u32,
        flags: u32,
        dropped_packets: u32,
        timestamp: u64,
        packet_type: u8,
    ) -> Self {
        Self {
            length_original: length_original.to_be(),
            length_captured: length_captured.to_be(),
            flags: flags.to_be(),
            dropped_packets: dropped_packets.to_be(),
            timestamp: timestamp.to_be(),
            packet_type,
        }
    }

    /// Length of the packet before redaction
    #[must_use]
    pub fn length_original(&self) -> u32 {
        u32::from_be(self.length_original)
    }

    /// Number of payload bytes following the header
    #[must_use]
    pub fn length_captured(&self) -> u32 {
        u32::from_be(self.length_captured)
    }

    /// Raw flags word
    #[must_use]
    pub fn flags(&self) -> u32 {
        u32::from_be(self.flags)
    }

    /// Dropped packets since the previous record
    #[must_use]
    pub fn dropped_packets(&self) -> u32 {
        u32::from_be(self.dropped_packets)
    }

    /// Microseconds since the btsnoop epoch
    #[must_use]
    pub fn timestamp(&self) -> u64 {
        u64::from_be(self.timestamp)
    }

    /// Explicit type tag
    #[must_use]
    pub fn packet_type(&self) -> u8 {
        self.packet_type
    }
}
