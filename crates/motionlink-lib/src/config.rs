//! Application configuration — TOML-based, platform-aware paths.
//!
//! The `[engine]` table tunes the I/O engine; `[[devices]]` is a static device
//! table that stands in for discovery, so tools can drive known hardware paths.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::error::DeviceError;
use crate::handle::{ChannelInfo, DeviceId, DiscoveryStatus, MAX_CHANNELS, MAX_INPUT_REPORT_SIZE, MAX_OUTPUT_REPORT_SIZE};
use crate::platform::Platform;
use crate::slot::MAX_SEND_SLOTS;

/// Header comment prepended to saved config files.
const CONFIG_HEADER: &str = "# motionlink configuration\n\n";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineSettings,

    /// Statically known devices, registered in order.
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Synchronous send timeout in milliseconds. Default: 1000.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    /// Host-side input report queue depth per channel. Default: 128.
    #[serde(default = "default_input_buffer_count")]
    pub input_buffer_count: u32,

    /// Send slots per device. Default: 16.
    #[serde(default = "default_send_slots")]
    pub send_slots: usize,

    /// Perform tick interval for the CLI monitor. Default: 10.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_send_timeout_ms() -> u64 {
    1000
}
fn default_input_buffer_count() -> u32 {
    128
}
fn default_send_slots() -> usize {
    16
}
fn default_poll_interval_ms() -> u64 {
    10
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            send_timeout_ms: default_send_timeout_ms(),
            input_buffer_count: default_input_buffer_count(),
            send_slots: default_send_slots(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub name: String,
    #[serde(default)]
    pub channels: Vec<ChannelEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelEntry {
    pub path: String,
    #[serde(default)]
    pub vendor_id: u16,
    #[serde(default)]
    pub product_id: u16,
    #[serde(default)]
    pub input_report_len: usize,
    #[serde(default)]
    pub output_report_len: usize,
}

impl From<&ChannelEntry> for ChannelInfo {
    fn from(c: &ChannelEntry) -> Self {
        ChannelInfo {
            path: c.path.clone(),
            vendor_id: c.vendor_id,
            product_id: c.product_id,
            input_report_len: c.input_report_len,
            output_report_len: c.output_report_len,
        }
    }
}

/// Runtime engine settings, as consumed by [`Context`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub send_timeout: Duration,
    pub input_buffer_count: u32,
    pub send_slots: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineSettings::default().engine_config()
    }
}

impl EngineSettings {
    /// Engine settings with the slot count clamped to `1..=MAX_SEND_SLOTS`.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            send_timeout: Duration::from_millis(self.send_timeout_ms),
            input_buffer_count: self.input_buffer_count,
            send_slots: self.send_slots.clamp(1, MAX_SEND_SLOTS),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Validation errors that [`Config::validate`] can return.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// `send_slots` is zero or above [`MAX_SEND_SLOTS`].
    InvalidSendSlots(usize),
    ZeroSendTimeout,
    ZeroInputBuffers,
    EmptyDeviceName { index: usize },
    DuplicateDeviceName(String),
    NoChannels { device: String },
    TooManyChannels { device: String, count: usize },
    EmptyPath { device: String },
    /// A report length is zero on both sides or exceeds the report buffer.
    InvalidReportLength { device: String, path: String, reason: String },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::InvalidSendSlots(n) => {
                write!(f, "send_slots must be 1..={MAX_SEND_SLOTS}, got {n}")
            }
            ValidationError::ZeroSendTimeout => write!(f, "send_timeout_ms cannot be 0"),
            ValidationError::ZeroInputBuffers => write!(f, "input_buffer_count cannot be 0"),
            ValidationError::EmptyDeviceName { index } => {
                write!(f, "Device #{} has an empty name", index + 1)
            }
            ValidationError::DuplicateDeviceName(name) => {
                write!(f, "Duplicate device name: {name}")
            }
            ValidationError::NoChannels { device } => write!(f, "Device {device} has no channels"),
            ValidationError::TooManyChannels { device, count } => {
                write!(f, "Device {device} has {count} channels (max {MAX_CHANNELS})")
            }
            ValidationError::EmptyPath { device } => {
                write!(f, "Device {device} has a channel with an empty path")
            }
            ValidationError::InvalidReportLength {
                device,
                path,
                reason,
            } => write!(f, "Device {device} channel {path}: {reason}"),
        }
    }
}

impl Config {
    /// Platform-specific config directory.
    pub fn dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("motionlink"))
    }

    /// Full path to config file.
    pub fn path() -> Option<PathBuf> {
        Self::dir().map(|d| d.join("config.toml"))
    }

    /// Load config from disk, or return defaults if not found.
    pub fn load() -> Self {
        let (config, warnings) = Self::load_with_warnings();
        for w in &warnings {
            log::warn!("{w}");
        }
        config
    }

    /// Save config to an arbitrary path atomically (write to temp file, then rename).
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let serialized = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        let contents = format!("{CONFIG_HEADER}{serialized}");
        let tmp = path.with_extension("toml.tmp");
        std::fs::write(&tmp, &contents)?;
        match std::fs::rename(&tmp, path) {
            Ok(()) => Ok(()),
            Err(_) => {
                // Rename can fail across filesystems; fall back to direct write + cleanup
                let result = std::fs::write(path, &contents);
                let _ = std::fs::remove_file(&tmp);
                result
            }
        }
    }

    /// Save config to the default platform path.
    pub fn save(&self) -> std::io::Result<()> {
        let Some(path) = Self::path() else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "No config directory",
            ));
        };
        self.save_to(&path)
    }

    /// Load config from an arbitrary path, returning the config and any parse warnings.
    ///
    /// Returns `(defaults, [])` if the file doesn't exist and
    /// `(defaults, [warning])` if it exists but can't be parsed.
    pub fn load_from(path: &Path) -> (Self, Vec<String>) {
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => (config, vec![]),
                Err(e) => {
                    let warning = format!(
                        "config parse error ({}), using defaults: {e}",
                        path.display()
                    );
                    (Self::default(), vec![warning])
                }
            },
            Err(_) => (Self::default(), vec![]),
        }
    }

    /// Load config from the default path, returning the config and any parse warnings.
    pub fn load_with_warnings() -> (Self, Vec<String>) {
        let Some(path) = Self::path() else {
            return (Self::default(), vec![]);
        };
        Self::load_from(&path)
    }

    /// Validate the entire config, collecting all errors.
    pub fn validate(&self) -> std::result::Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        let e = &self.engine;
        if e.send_slots == 0 || e.send_slots > MAX_SEND_SLOTS {
            errors.push(ValidationError::InvalidSendSlots(e.send_slots));
        }
        if e.send_timeout_ms == 0 {
            errors.push(ValidationError::ZeroSendTimeout);
        }
        if e.input_buffer_count == 0 {
            errors.push(ValidationError::ZeroInputBuffers);
        }

        for (index, dev) in self.devices.iter().enumerate() {
            if dev.name.trim().is_empty() {
                errors.push(ValidationError::EmptyDeviceName { index });
            } else if self.devices[..index].iter().any(|d| d.name == dev.name) {
                errors.push(ValidationError::DuplicateDeviceName(dev.name.clone()));
            }
            if dev.channels.is_empty() {
                errors.push(ValidationError::NoChannels {
                    device: dev.name.clone(),
                });
            }
            if dev.channels.len() > MAX_CHANNELS {
                errors.push(ValidationError::TooManyChannels {
                    device: dev.name.clone(),
                    count: dev.channels.len(),
                });
            }
            for ch in &dev.channels {
                if ch.path.trim().is_empty() {
                    errors.push(ValidationError::EmptyPath {
                        device: dev.name.clone(),
                    });
                    continue;
                }
                let reason = if ch.input_report_len == 0 && ch.output_report_len == 0 {
                    Some("no report lengths".to_string())
                } else if ch.input_report_len > MAX_INPUT_REPORT_SIZE {
                    Some(format!(
                        "input_report_len {} exceeds {MAX_INPUT_REPORT_SIZE}",
                        ch.input_report_len
                    ))
                } else if ch.output_report_len > MAX_OUTPUT_REPORT_SIZE {
                    Some(format!(
                        "output_report_len {} exceeds {MAX_OUTPUT_REPORT_SIZE}",
                        ch.output_report_len
                    ))
                } else {
                    None
                };
                if let Some(reason) = reason {
                    errors.push(ValidationError::InvalidReportLength {
                        device: dev.name.clone(),
                        path: ch.path.clone(),
                        reason,
                    });
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Create a device in `ctx` for every `[[devices]]` entry and attach its channels.
    ///
    /// Registered devices are marked [`DiscoveryStatus::Added`]. Channels past
    /// the per-device capacity are skipped with a warning.
    pub fn register_devices<P: Platform>(
        &self,
        ctx: &mut Context<P>,
    ) -> std::result::Result<Vec<DeviceId>, DeviceError> {
        let mut ids = Vec::with_capacity(self.devices.len());
        for entry in &self.devices {
            let id = ctx.create_device(&entry.name);
            for ch in &entry.channels {
                if let Err(e) = ctx.attach_channel(id, ChannelInfo::from(ch)) {
                    log::warn!("device {}: channel {} not attached: {e}", entry.name, ch.path);
                }
            }
            ctx.set_discovery_status(id, DiscoveryStatus::Added)?;
            ids.push(id);
        }
        Ok(ids)
    }
}
