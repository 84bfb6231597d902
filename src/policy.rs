//! Mode-dependent routing and redaction decisions
//!
//! Everything here is a pure function of the record and the configuration.
//! The engine carries out the returned [`Routing`].

use crate::config::{CaptureConfig, Mode, Redaction};
use crate::wire::{PacketRecord, PacketType};

/// ACL connection handle used by controllers for vendor debug traffic
pub const VENDOR_DEBUG_ACL_HANDLE: u16 = 0x0EDC;

/// Event code reserved for vendor-specific events
pub const VENDOR_SPECIFIC_EVENT_CODE: u8 = 0xFF;

const ACL_HANDLE_MASK: u16 = 0x0FFF;

/// Where a record goes and how many payload bytes each copy keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routing {
    /// Not recorded anywhere
    Drop,
    /// Primary file only
    ToPrimaryOnly(u32),
    /// Ring buffer only
    ToBufferOnly(u32),
    /// Both destinations, each with its own captured length
    ToBoth {
        /// Captured length in the primary file
        primary: u32,
        /// Captured length in the ring buffer
        buffer: u32,
    },
}

/// Decide the routing of one unredacted record
#[must_use]
pub fn classify(record: &PacketRecord<'_>, config: &CaptureConfig) -> Routing {
    let full = record.captured_length();

    match config.mode {
        Mode::Disabled => Routing::Drop,
        Mode::Truncated => Routing::ToBufferOnly(0),
        Mode::Filtered => {
            let exempt = config.vendor_debug && is_vendor_debug(record);
            let primary = if exempt {
                full
            } else {
                redacted_len(config.redaction.primary.for_type(record.packet_type), full)
            };
            let buffer = if exempt {
                full
            } else {
                redacted_len(config.redaction.buffer.for_type(record.packet_type), full)
            };

            Routing::ToBoth {
                primary,
                buffer: cap_buffered(buffer, config),
            }
        }
        Mode::Full => Routing::ToPrimaryOnly(record.original_length),
    }
}

/// Whether a packet is controller vendor debug output
#[must_use]
pub fn is_vendor_debug(record: &PacketRecord<'_>) -> bool {
    let payload = record.payload();
    match record.packet_type {
        PacketType::Acl => match payload {
            [lo, hi, ..] => u16::from_le_bytes([*lo, *hi]) & ACL_HANDLE_MASK == VENDOR_DEBUG_ACL_HANDLE,
            _ => false,
        },
        PacketType::Event => payload.first() == Some(&VENDOR_SPECIFIC_EVENT_CODE),
        _ => false,
    }
}

fn redacted_len(redaction: Redaction, full: u32) -> u32 {
    match redaction {
        Redaction::Keep => full,
        Redaction::HeaderOnly => 0,
    }
}

fn cap_buffered(len: u32, config: &CaptureConfig) -> u32 {
    config
        .redaction
        .max_buffered_payload
        .map_or(len, |cap| len.min(cap))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TypeRedaction;
    use crate::wire::Direction;

    fn config(mode: Mode) -> CaptureConfig {
        CaptureConfig::new(mode, "/tmp/btsnoop_hci.log", "/tmp/btsnooz_hci.log")
    }

    fn record(packet: &[u8], packet_type: PacketType) -> PacketRecord<'_> {
        PacketRecord::new(packet, Direction::Incoming, packet_type, 0, 0)
    }

    const ACL: &[u8] = &[0x01, 0x20, 0x04, 0x00, 0xAA, 0xBB, 0xCC, 0xDD];
    const EVT: &[u8] = &[0x0E, 0x04, 0x01, 0x03, 0x0C, 0x00];

    #[test]
    fn test_disabled_drops() {
        for packet_type in PacketType::ALL {
            assert_eq!(classify(&record(EVT, packet_type), &config(Mode::Disabled)), Routing::Drop);
        }
    }

    #[test]
    fn test_truncated_is_header_only_in_buffer() {
        for packet_type in PacketType::ALL {
            assert_eq!(
                classify(&record(ACL, packet_type), &config(Mode::Truncated)),
                Routing::ToBufferOnly(0)
            );
        }
    }

    #[test]
    fn test_full_keeps_everything_in_primary() {
        for packet_type in PacketType::ALL {
            assert_eq!(
                classify(&record(ACL, packet_type), &config(Mode::Full)),
                Routing::ToPrimaryOnly(ACL.len() as u32)
            );
        }
    }

    #[test]
    fn test_filtered_default_table() {
        let config = config(Mode::Filtered);
        assert_eq!(
            classify(&record(EVT, PacketType::Event), &config),
            Routing::ToBoth { primary: 6, buffer: 6 }
        );
        assert_eq!(
            classify(&record(EVT, PacketType::Command), &config),
            Routing::ToBoth { primary: 6, buffer: 6 }
        );
        for packet_type in [PacketType::Acl, PacketType::Sco, PacketType::Iso] {
            assert_eq!(
                classify(&record(ACL, packet_type), &config),
                Routing::ToBoth { primary: 0, buffer: 8 }
            );
        }
    }

    #[test]
    fn test_filtered_inverted_table() {
        let mut config = config(Mode::Filtered);
        config.redaction.primary = TypeRedaction::KEEP_ALL;
        config.redaction.buffer = TypeRedaction::DATA_HEADER_ONLY;

        assert_eq!(
            classify(&record(ACL, PacketType::Acl), &config),
            Routing::ToBoth { primary: 8, buffer: 0 }
        );
    }

    #[test]
    fn test_buffer_cap() {
        let mut config = config(Mode::Filtered);
        config.redaction.max_buffered_payload = Some(4);

        assert_eq!(
            classify(&record(ACL, PacketType::Acl), &config),
            Routing::ToBoth { primary: 0, buffer: 4 }
        );
    }

    #[test]
    fn test_vendor_debug_exemption() {
        let debug_acl = [0xDC, 0x2E, 0x02, 0x00, 0x11, 0x22];
        let vendor_event = [0xFF, 0x02, 0x01, 0x02];
        let mut config = config(Mode::Filtered);

        assert_eq!(
            classify(&record(&debug_acl, PacketType::Acl), &config),
            Routing::ToBoth { primary: 0, buffer: 6 }
        );

        config.vendor_debug = true;
        assert_eq!(
            classify(&record(&debug_acl, PacketType::Acl), &config),
            Routing::ToBoth { primary: 6, buffer: 6 }
        );
        assert_eq!(
            classify(&record(ACL, PacketType::Acl), &config),
            Routing::ToBoth { primary: 0, buffer: 8 }
        );

        config.redaction.primary.event = Redaction::HeaderOnly;
        assert_eq!(
            classify(&record(&vendor_event, PacketType::Event), &config),
            Routing::ToBoth { primary: 4, buffer: 4 }
        );
    }

    #[test]
    fn test_is_vendor_debug() {
        assert!(is_vendor_debug(&record(&[0xDC, 0x0E], PacketType::Acl)));
        assert!(!is_vendor_debug(&record(&[0xDC], PacketType::Acl)));
        assert!(!is_vendor_debug(&record(&[0xFF], PacketType::Command)));
        assert!(is_vendor_debug(&record(&[0xFF], PacketType::Event)));
    }
}
