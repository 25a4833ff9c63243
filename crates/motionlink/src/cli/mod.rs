//! CLI subcommands — device listing, report exchange, live monitoring.

mod config_cmd;
mod devices;
mod info;
mod monitor;
mod read;
mod send;

use std::path::{Path, PathBuf};

use clap::Subcommand;
use serde::Serialize;

pub(super) use crate::RUNNING;
pub(super) use motionlink_lib::config::{ChannelEntry, Config};
pub(super) use motionlink_lib::error::{MotionlinkError, Result};
pub(super) use motionlink_lib::{
    ChannelInfo, Context, DeviceError, DeviceId, DeviceInfo, EventBridge, Primitive,
};

/// Global options shared by every subcommand.
pub struct Options {
    pub json: bool,
    pub config: Option<PathBuf>,
}

const PADDING: usize = 2;

/// Compute alignment width for a command's key-value output.
/// Top-level and indented values line up in the same column.
pub(super) fn kv_width(top: &[&str], indent: &[&str]) -> usize {
    let top_max = top.iter().map(|k| k.len()).max().unwrap_or(0);
    let indent_max = indent.iter().map(|k| k.len()).max().unwrap_or(0);
    let top_need = if top.is_empty() { 0 } else { top_max + PADDING };
    // Indent keys lose 2 chars of inner width to the "  " prefix
    let indent_need = if indent.is_empty() {
        0
    } else {
        indent_max + PADDING + 2
    };
    top_need.max(indent_need)
}

pub(super) fn format_kv(key: &str, value: impl std::fmt::Display, w: usize) -> String {
    format!("{key:<width$}{value}", width = w)
}

pub(super) fn kv(key: &str, value: impl std::fmt::Display, w: usize) {
    println!("{}", format_kv(key, value, w));
}

pub(super) fn kv_indent(key: &str, value: impl std::fmt::Display, w: usize) {
    println!("  {key:<width$}{value}", width = w.saturating_sub(2));
}

/// `vvvv:pppp`, the way USB ids are usually written.
pub(super) fn usb_id(vendor: u16, product: u16) -> String {
    format!("{vendor:04x}:{product:04x}")
}

pub(super) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).map_err(std::io::Error::other)?;
    println!("{text}");
    Ok(())
}

// ── JSON output structs ──

#[derive(Serialize)]
pub(super) struct DevicesOutput {
    pub count: usize,
    pub devices: Vec<DeviceEntryJson>,
}

#[derive(Serialize)]
pub(super) struct DeviceEntryJson {
    pub index: usize,
    pub name: String,
    pub channels: Vec<ChannelEntry>,
}

#[derive(Serialize)]
pub(super) struct InfoOutput {
    pub device: DeviceInfo,
    pub channels: Vec<ChannelInfo>,
    pub send_slots: usize,
}

#[derive(Serialize)]
pub(super) struct ReadOutput {
    pub device: String,
    pub reports: Vec<ReportJson>,
}

#[derive(Serialize)]
pub(super) struct ReportJson {
    pub length: usize,
    pub hex: String,
}

#[derive(Serialize)]
pub(super) struct ConfigOutput {
    pub config_file: Option<String>,
    pub config_file_exists: bool,
    pub settings: Config,
    pub problems: Vec<String>,
}

#[derive(Subcommand)]
pub enum Command {
    /// List devices from the config file
    Devices,

    /// Show identity and channels of one device
    Info {
        /// Device name or 1-based index (see `devices`)
        device: String,
    },

    /// Send one output report
    Send {
        /// Device name or 1-based index (see `devices`)
        device: String,
        /// Report bytes in hex, report ID first (e.g. "01 ff 00")
        hex: String,
        /// Use the callback path and tick until it completes
        #[arg(long = "async")]
        async_send: bool,
        /// Override the send timeout (0 with --async waits indefinitely)
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Read input reports
    Read {
        /// Device name or 1-based index (see `devices`)
        device: String,
        /// Number of reports to read
        #[arg(long, default_value_t = 1)]
        count: usize,
        /// How long to wait for each report
        #[arg(long, default_value_t = 1000)]
        timeout_ms: u64,
    },

    /// Print every input report until Ctrl+C
    Monitor {
        /// Device name or 1-based index (see `devices`)
        device: String,
    },

    /// Show current configuration and file path
    Config,
}

/// Warn if `--json` was passed to a command that doesn't support it.
fn warn_json_unsupported(cmd_name: &str) {
    log::warn!("--json is not supported for `{cmd_name}` (ignored)");
}

pub fn run(cmd: Command, opts: &Options) -> Result<()> {
    match cmd {
        Command::Devices => devices::cmd_devices(opts),
        Command::Info { device } => info::cmd_info(opts, &device),
        Command::Send {
            device,
            hex,
            async_send,
            timeout_ms,
        } => {
            if opts.json {
                warn_json_unsupported("send");
            }
            send::cmd_send(opts, &device, &hex, async_send, timeout_ms)
        }
        Command::Read {
            device,
            count,
            timeout_ms,
        } => read::cmd_read(opts, &device, count, timeout_ms),
        Command::Monitor { device } => {
            if opts.json {
                warn_json_unsupported("monitor");
            }
            monitor::cmd_monitor(opts, &device)
        }
        Command::Config => config_cmd::cmd_config(opts),
    }
}

// ── Config and device resolution ──

/// Load the config from `custom_path` or the platform default, logging parse warnings.
pub(super) fn load_config(custom_path: Option<&Path>) -> Config {
    let (config, warnings) = match custom_path {
        Some(p) => Config::load_from(p),
        None => Config::load_with_warnings(),
    };
    for w in &warnings {
        log::warn!("{w}");
    }
    config
}

/// Validation problems as display strings (empty when the config is usable).
pub(super) fn config_problems(config: &Config) -> Vec<String> {
    match config.validate() {
        Ok(()) => Vec::new(),
        Err(errors) => errors.iter().map(ToString::to_string).collect(),
    }
}

/// An engine context with every configured device registered.
pub(super) struct Session {
    pub config: Config,
    pub ctx: Context,
    ids: Vec<DeviceId>,
}

impl Session {
    pub fn new(config: Config) -> Result<Self> {
        let problems = config_problems(&config);
        if !problems.is_empty() {
            return Err(MotionlinkError::Config(problems.join("; ")));
        }
        let mut ctx = Context::native(config.engine.engine_config());
        let ids = config.register_devices(&mut ctx)?;
        Ok(Session { config, ctx, ids })
    }

    /// Resolve a device argument: a 1-based index into the device table, or a name.
    pub fn resolve(&self, arg: &str) -> Result<DeviceId> {
        resolve_device(&self.ids, arg, |name| self.ctx.find_by_name(name))
    }

    pub fn name(&self, id: DeviceId) -> String {
        self.ctx
            .device_info(id)
            .map(|i| i.name)
            .unwrap_or_else(|_| id.to_string())
    }
}

fn resolve_device(
    ids: &[DeviceId],
    arg: &str,
    by_name: impl FnOnce(&str) -> Option<DeviceId>,
) -> Result<DeviceId> {
    if ids.is_empty() {
        return Err(MotionlinkError::Config(
            "no devices configured (add [[devices]] to the config file)".into(),
        ));
    }
    if let Ok(n) = arg.parse::<usize>() {
        return n
            .checked_sub(1)
            .and_then(|i| ids.get(i))
            .copied()
            .ok_or_else(|| {
                MotionlinkError::Config(format!(
                    "device index {n} out of range (1..={})",
                    ids.len()
                ))
            });
    }
    by_name(arg)
        .ok_or_else(|| MotionlinkError::Config(format!("no configured device named '{arg}'")))
}

// ── Report text ──

/// Parse hex report text. Bytes may be separated by whitespace, `:`, `-` or `,`,
/// and each group may carry a `0x` prefix.
pub(super) fn parse_hex(text: &str) -> Result<Vec<u8>> {
    let digits: String = text
        .split(|c: char| c.is_whitespace() || matches!(c, ':' | '-' | ','))
        .map(|t| {
            t.strip_prefix("0x")
                .or_else(|| t.strip_prefix("0X"))
                .unwrap_or(t)
        })
        .collect();
    if digits.is_empty() {
        return Err(MotionlinkError::Report("empty report".into()));
    }
    hex::decode(&digits).map_err(|e| MotionlinkError::Report(format!("invalid hex '{text}': {e}")))
}

pub(super) fn format_hex(bytes: &[u8]) -> String {
    bytes
        .chunks(1)
        .map(hex::encode)
        .collect::<Vec<_>>()
        .join(" ")
}

// ── Event bridge ──

/// Bridge for the CLI's sleep-and-tick loop: there is no external wait set,
/// so primitive registrations are only logged.
pub(super) struct LoggingBridge;

impl EventBridge for LoggingBridge {
    fn primitive_added(&mut self, primitive: Primitive, count: u32) {
        log::debug!("[bridge] watch {primitive} ({count})");
    }

    fn primitive_removed(&mut self, primitive: Primitive) {
        log::debug!("[bridge] unwatch {primitive}");
    }
}

#[cfg(test)]
mod format_tests {
    use super::*;

    #[test]
    fn kv_width_top_only() {
        let w = kv_width(&["Name:", "Vendor ID:"], &[]);
        // "Vendor ID:" = 10 + PADDING = 12
        assert_eq!(w, 12);
    }

    #[test]
    fn kv_width_indent_drives_width() {
        let w = kv_width(&["Id:"], &["send_timeout_ms:"]);
        // 16 + PADDING + 2 = 20
        assert_eq!(w, 20);
    }

    #[test]
    fn values_align_across_levels() {
        let w = kv_width(&["Top:"], &["Indent:"]);
        let top = format_kv("Top:", "V", w);
        let indent = format!("  {:<width$}{}", "Indent:", "V", width = w - 2);
        assert_eq!(top.find('V'), indent.find('V'));
    }

    #[test]
    fn format_kv_exceeding_width_is_not_padded() {
        assert_eq!(format_kv("ExactWidth:", "val", 10), "ExactWidth:val");
    }

    #[test]
    fn usb_id_is_zero_padded_hex() {
        assert_eq!(usb_id(0x1d5a, 0xc0), "1d5a:00c0");
    }
}

#[cfg(test)]
mod hex_tests {
    use super::*;

    #[test]
    fn parses_compact_and_separated_forms() {
        assert_eq!(parse_hex("01ff00").unwrap(), vec![0x01, 0xff, 0x00]);
        assert_eq!(parse_hex("01 FF 00").unwrap(), vec![0x01, 0xff, 0x00]);
        assert_eq!(parse_hex("0x01:0xff-00,7a").unwrap(), vec![0x01, 0xff, 0x00, 0x7a]);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(parse_hex(""), Err(MotionlinkError::Report(_))));
        assert!(matches!(parse_hex("   "), Err(MotionlinkError::Report(_))));
        assert!(matches!(parse_hex("123"), Err(MotionlinkError::Report(_))));
        assert!(matches!(parse_hex("zz"), Err(MotionlinkError::Report(_))));
        assert!(matches!(parse_hex("é1"), Err(MotionlinkError::Report(_))));
        assert!(matches!(parse_hex("é é"), Err(MotionlinkError::Report(_))));
    }

    #[test]
    fn decode_errors_name_the_input() {
        let err = parse_hex("01 zz").unwrap_err();
        assert!(err.to_string().contains("01 zz"), "{err}");
        let odd = parse_hex("abc").unwrap_err().to_string();
        assert!(odd.to_lowercase().contains("odd"), "{odd}");
    }

    #[test]
    fn formats_lowercase_spaced() {
        assert_eq!(format_hex(&[0x01, 0xab, 0x00]), "01 ab 00");
        assert_eq!(format_hex(&[]), "");
    }
}


#[cfg(test)]
mod json_struct_tests {
    use super::*;

    #[test]
    fn read_output_has_expected_fields() {
        let out = ReadOutput {
            device: "pad".into(),
            reports: vec![ReportJson {
                length: 2,
                hex: "01 02".into(),
            }],
        };
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["device"], "pad");
        assert_eq!(json["reports"][0]["length"], 2);
        assert_eq!(json["reports"][0]["hex"], "01 02");
    }

    #[test]
    fn config_output_embeds_settings() {
        let out = ConfigOutput {
            config_file: None,
            config_file_exists: false,
            settings: Config::default(),
            problems: vec![],
        };
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["settings"]["engine"]["send_slots"], 16);
        assert!(json["config_file"].is_null());
    }
}
