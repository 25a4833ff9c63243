//! motionlink — exchange reports with HID motion-sensing devices from the terminal.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::{ArgAction, Parser};

mod cli;

/// Shared shutdown flag, cleared by the Ctrl+C handler.
pub static RUNNING: AtomicBool = AtomicBool::new(true);

#[derive(Parser)]
#[command(
    name = "motionlink",
    version,
    about = "Exchange reports with HID motion-sensing devices"
)]
struct Args {
    /// Output as JSON (for devices, info, read, config)
    #[arg(long, global = true)]
    json: bool,

    /// Use this config file instead of the platform default
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: cli::Command,
}

fn default_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    }
}

// ── Ctrl+C handler ──

#[cfg(windows)]
unsafe extern "system" fn ctrl_handler(_ctrl_type: u32) -> windows::core::BOOL {
    RUNNING.store(false, Ordering::SeqCst);
    windows::core::BOOL(1)
}

fn main() {
    let args = Args::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_filter(args.verbose)),
    )
    .format_timestamp(None)
    .format_target(false)
    .init();

    #[cfg(windows)]
    unsafe {
        let _ = windows::Win32::System::Console::SetConsoleCtrlHandler(Some(ctrl_handler), true);
    }

    #[cfg(not(windows))]
    {
        ctrlc::set_handler(move || {
            RUNNING.store(false, Ordering::SeqCst);
        })
        .ok();
    }

    let opts = cli::Options {
        json: args.json,
        config: args.config,
    };
    if let Err(e) = cli::run(args.command, &opts) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_raises_filter() {
        assert_eq!(default_filter(0), "warn");
        assert_eq!(default_filter(1), "debug");
        assert_eq!(default_filter(4), "trace");
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let args = Args::try_parse_from(["motionlink", "devices", "--json", "-vv", "--config", "x.toml"])
            .unwrap();
        assert!(args.json);
        assert_eq!(args.verbose, 2);
        assert_eq!(args.config, Some(PathBuf::from("x.toml")));
    }
}
