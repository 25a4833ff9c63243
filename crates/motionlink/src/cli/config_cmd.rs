//! `config` subcommand — show current configuration and file path.

use super::{
    Config, ConfigOutput, Options, Result, config_problems, kv, kv_indent, kv_width, load_config,
    print_json,
};

pub(super) fn cmd_config(opts: &Options) -> Result<()> {
    let custom_path = opts.config.as_deref();
    let config = load_config(custom_path);
    let config_path = custom_path.map(|p| p.to_path_buf()).or_else(Config::path);
    let config_exists = config_path.as_ref().is_some_and(|p| p.exists());
    let problems = config_problems(&config);

    if opts.json {
        return print_json(&ConfigOutput {
            config_file: config_path.as_ref().map(|p| p.display().to_string()),
            config_file_exists: config_exists,
            settings: config,
            problems,
        });
    }

    let w = kv_width(
        &["Config file:"],
        &[
            "send_timeout_ms:",
            "input_buffer_count:",
            "send_slots:",
            "poll_interval_ms:",
        ],
    );

    match &config_path {
        Some(p) if config_exists => kv("Config file:", format_args!("{} (loaded)", p.display()), w),
        Some(p) => kv(
            "Config file:",
            format_args!("{} (not found, using defaults)", p.display()),
            w,
        ),
        None => kv("Config file:", "(no config directory)", w),
    }
    println!();

    let engine = &config.engine;
    println!("Engine:");
    kv_indent("send_timeout_ms:", engine.send_timeout_ms, w);
    kv_indent("input_buffer_count:", engine.input_buffer_count, w);
    kv_indent("send_slots:", engine.send_slots, w);
    kv_indent("poll_interval_ms:", engine.poll_interval_ms, w);
    println!();

    println!("Devices:");
    if config.devices.is_empty() {
        println!("  (none)");
    }
    for (i, dev) in config.devices.iter().enumerate() {
        println!(
            "  [{}] {} ({} channel{})",
            i + 1,
            dev.name,
            dev.channels.len(),
            if dev.channels.len() == 1 { "" } else { "s" }
        );
    }

    if !problems.is_empty() {
        println!();
        println!("Problems:");
        for p in &problems {
            println!("  - {p}");
        }
    }

    Ok(())
}
