//! `devices` subcommand — list the configured device table.

use super::{DeviceEntryJson, DevicesOutput, Options, Result, load_config, print_json, usb_id};

pub(super) fn cmd_devices(opts: &Options) -> Result<()> {
    let config = load_config(opts.config.as_deref());

    if opts.json {
        let devices = config
            .devices
            .iter()
            .enumerate()
            .map(|(i, d)| DeviceEntryJson {
                index: i + 1,
                name: d.name.clone(),
                channels: d.channels.clone(),
            })
            .collect();
        return print_json(&DevicesOutput {
            count: config.devices.len(),
            devices,
        });
    }

    if config.devices.is_empty() {
        println!("No devices configured.");
        println!("Add [[devices]] entries to the config file (see `motionlink config`).");
        return Ok(());
    }

    let n = config.devices.len();
    println!("{n} configured device{}:", if n == 1 { "" } else { "s" });
    println!();

    for (i, dev) in config.devices.iter().enumerate() {
        println!("  [{}] {}", i + 1, dev.name);
        for ch in &dev.channels {
            println!(
                "      {}  {}  in {} / out {}",
                ch.path,
                usb_id(ch.vendor_id, ch.product_id),
                ch.input_report_len,
                ch.output_report_len
            );
        }
    }

    Ok(())
}
