//! Configuration types for hci-snoop
//!
//! A [`CaptureConfig`] is assembled once at startup and never changes while
//! an engine is running; changes take effect after a restart.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::wire::PacketType;
use crate::{Result, SnoopError};

/// Default rotation threshold for the primary capture file
pub const DEFAULT_MAX_PACKETS_PER_FILE: usize = 0xFFFF;

/// Default ring buffer capacity
pub const DEFAULT_MAX_PACKETS_PER_BUFFER: usize = 4096;

/// Default lifetime of a diagnostics file (12 hours)
pub const DEFAULT_DIAGNOSTICS_LIFETIME_MS: u64 = 12 * 60 * 60 * 1000;

/// Default sweep interval (1 minute)
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 60 * 1000;

/// Capture verbosity / privacy mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Nothing is captured
    Disabled,
    /// Header-only records kept in memory for diagnostics dumps
    Truncated,
    /// Primary file with data payloads redacted, full copy in memory
    Filtered,
    /// Every packet written unredacted to the primary file
    Full,
}

impl Mode {
    /// Configuration string for this mode
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Truncated => "truncated",
            Self::Filtered => "filtered",
            Self::Full => "full",
        }
    }

    /// Whether packets are captured at all
    #[must_use]
    pub const fn is_enabled(self) -> bool {
        !matches!(self, Self::Disabled)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = SnoopError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "disabled" => Ok(Self::Disabled),
            "truncated" => Ok(Self::Truncated),
            "filtered" => Ok(Self::Filtered),
            "full" => Ok(Self::Full),
            other => Err(SnoopError::ConfigInvalid(format!(
                "Unknown capture mode: {other:?}"
            ))),
        }
    }
}

/// What happens to the previous primary file when a new one is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationPolicy {
    /// Truncate the file in place
    Overwrite,
    /// Move the previous file to `<path>.last` first
    #[default]
    KeepBackup,
}

/// Payload treatment for one destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Redaction {
    /// Keep the full payload
    Keep,
    /// Drop the payload, keep the record header
    HeaderOnly,
}

/// Per packet type redaction assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeRedaction {
    /// HCI commands
    pub command: Redaction,
    /// ACL data
    pub acl: Redaction,
    /// SCO data
    pub sco: Redaction,
    /// HCI events
    pub event: Redaction,
    /// ISO data
    pub iso: Redaction,
}

impl TypeRedaction {
    /// Keep every payload
    pub const KEEP_ALL: Self = Self {
        command: Redaction::Keep,
        acl: Redaction::Keep,
        sco: Redaction::Keep,
        event: Redaction::Keep,
        iso: Redaction::Keep,
    };

    /// Keep control traffic, strip data payloads
    pub const DATA_HEADER_ONLY: Self = Self {
        command: Redaction::Keep,
        acl: Redaction::HeaderOnly,
        sco: Redaction::HeaderOnly,
        event: Redaction::Keep,
        iso: Redaction::HeaderOnly,
    };

    /// Assignment for a packet type
    #[must_use]
    pub const fn for_type(&self, packet_type: PacketType) -> Redaction {
        match packet_type {
            PacketType::Command => self.command,
            PacketType::Acl => self.acl,
            PacketType::Sco => self.sco,
            PacketType::Event => self.event,
            PacketType::Iso => self.iso,
        }
    }
}

/// Redaction applied in filtered mode
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedactionConfig {
    /// Treatment of records written to the primary file
    #[serde(default = "default_primary_redaction")]
    pub primary: TypeRedaction,
    /// Treatment of records kept in the ring buffer
    #[serde(default = "default_buffer_redaction")]
    pub buffer: TypeRedaction,
    /// Upper bound on payload bytes kept per ring buffer entry
    #[serde(default)]
    pub max_buffered_payload: Option<u32>,
}

fn default_primary_redaction() -> TypeRedaction {
    TypeRedaction::DATA_HEADER_ONLY
}

fn default_buffer_redaction() -> TypeRedaction {
    TypeRedaction::KEEP_ALL
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            primary: default_primary_redaction(),
            buffer: default_buffer_redaction(),
            max_buffered_payload: None,
        }
    }
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Capture mode
    pub mode: Mode,
    /// Primary capture file
    pub primary_path: PathBuf,
    /// Diagnostics log base path; dumps are written next to it
    pub diagnostics_path: PathBuf,
    /// Records per primary file before rotation
    #[serde(default = "default_max_packets_per_file")]
    pub max_packets_per_file: usize,
    /// Ring buffer capacity
    #[serde(default = "default_max_packets_per_buffer")]
    pub max_packets_per_buffer: usize,
    /// Keep controller vendor debug traffic unredacted
    #[serde(default)]
    pub vendor_debug: bool,
    /// Age after which diagnostics files are deleted
    #[serde(default = "default_diagnostics_lifetime_ms")]
    pub diagnostics_lifetime_ms: u64,
    /// Period of the diagnostics sweep
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    /// Previous-file handling on rotation
    #[serde(default)]
    pub rotation: RotationPolicy,
    /// Write the ring buffer to a diagnostics file on shutdown
    #[serde(default = "default_true")]
    pub dump_on_shutdown: bool,
    /// Filtered mode redaction tables
    #[serde(default)]
    pub redaction: RedactionConfig,
}

fn default_max_packets_per_file() -> usize {
    DEFAULT_MAX_PACKETS_PER_FILE
}

fn default_max_packets_per_buffer() -> usize {
    DEFAULT_MAX_PACKETS_PER_BUFFER
}

fn default_diagnostics_lifetime_ms() -> u64 {
    DEFAULT_DIAGNOSTICS_LIFETIME_MS
}

fn default_sweep_interval_ms() -> u64 {
    DEFAULT_SWEEP_INTERVAL_MS
}

fn default_true() -> bool {
    true
}

impl CaptureConfig {
    /// Configuration with default thresholds
    pub fn new(
        mode: Mode,
        primary_path: impl Into<PathBuf>,
        diagnostics_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            mode,
            primary_path: primary_path.into(),
            diagnostics_path: diagnostics_path.into(),
            max_packets_per_file: DEFAULT_MAX_PACKETS_PER_FILE,
            max_packets_per_buffer: DEFAULT_MAX_PACKETS_PER_BUFFER,
            vendor_debug: false,
            diagnostics_lifetime_ms: DEFAULT_DIAGNOSTICS_LIFETIME_MS,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
            rotation: RotationPolicy::default(),
            dump_on_shutdown: true,
            redaction: RedactionConfig::default(),
        }
    }

    /// Load configuration from TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read, parsed, or validated
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SnoopError::ConfigInvalid(format!("Failed to read config file: {e}")))?;

        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    ///
    /// # Errors
    ///
    /// Returns error if the text cannot be parsed or fails validation
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| SnoopError::ConfigInvalid(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` describing the first problem found
    pub fn validate(&self) -> Result<()> {
        if self.primary_path.as_os_str().is_empty() {
            return Err(SnoopError::ConfigInvalid(
                "primary_path cannot be empty".to_string(),
            ));
        }

        if self.diagnostics_path.file_name().is_none() {
            return Err(SnoopError::ConfigInvalid(format!(
                "diagnostics_path must name a file: {}",
                self.diagnostics_path.display()
            )));
        }

        if self.primary_path == self.diagnostics_path {
            return Err(SnoopError::ConfigInvalid(
                "primary_path and diagnostics_path must differ".to_string(),
            ));
        }

        if self.max_packets_per_file == 0 {
            return Err(SnoopError::ConfigInvalid(
                "max_packets_per_file must be > 0".to_string(),
            ));
        }

        if self.max_packets_per_buffer == 0 {
            return Err(SnoopError::ConfigInvalid(
                "max_packets_per_buffer must be > 0".to_string(),
            ));
        }

        if self.sweep_interval_ms == 0 {
            return Err(SnoopError::ConfigInvalid(
                "sweep_interval_ms must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Diagnostics file lifetime
    #[must_use]
    pub fn diagnostics_lifetime(&self) -> Duration {
        Duration::from_millis(self.diagnostics_lifetime_ms)
    }

    /// Diagnostics sweep period
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Where the previous primary file goes under [`RotationPolicy::KeepBackup`]
    #[must_use]
    pub fn backup_path(&self) -> PathBuf {
        let mut name = self.primary_path.clone().into_os_string();
        name.push(".last");
        PathBuf::from(name)
    }
}
