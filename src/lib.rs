//! hci-snoop - btsnoop capture logger for HCI traffic
//!
//! Records host/controller packets to a rotating btsnoop file according to a
//! privacy mode, keeps a bounded ring of recent packets for crash
//! diagnostics, and expires old diagnostics dumps in the background.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::cargo)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::cast_possible_truncation,
    clippy::multiple_crate_versions
)]

pub mod buffer;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod logger;
pub mod policy;
pub mod rotation;
pub mod sweeper;
pub mod wire;

pub use config::{CaptureConfig, Mode};
pub use engine::{CaptureEngine, CaptureStats};
pub use error::{Result, SnoopError};
pub use logger::SnoopLogger;
pub use wire::{Direction, PacketType};
