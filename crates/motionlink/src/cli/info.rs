//! `info` subcommand — identity and channel layout of one device.

use super::{InfoOutput, Options, Result, Session, kv, kv_indent, kv_width, load_config, print_json, usb_id};

pub(super) fn cmd_info(opts: &Options, device: &str) -> Result<()> {
    let session = Session::new(load_config(opts.config.as_deref()))?;
    let id = session.resolve(device)?;
    let info = session.ctx.device_info(id)?;
    let (channels, send_slots) = match session.ctx.device(id) {
        Some(dev) => (
            dev.channels().iter().map(|c| c.info().clone()).collect::<Vec<_>>(),
            dev.pool().capacity(),
        ),
        None => (Vec::new(), 0),
    };

    if opts.json {
        return print_json(&InfoOutput {
            device: info,
            channels,
            send_slots,
        });
    }

    let w = kv_width(
        &["Id:", "Name:", "USB id:", "Status:", "Send slots:", "Channels:"],
        &["Path:"],
    );
    kv("Id:", info.id, w);
    kv("Name:", &info.name, w);
    kv("USB id:", usb_id(info.vendor, info.product), w);
    kv("Status:", format_args!("{:?}", info.status), w);
    kv("Send slots:", send_slots, w);
    kv("Channels:", channels.len(), w);
    for ch in &channels {
        kv_indent(
            "Path:",
            format_args!(
                "{}  (in {} / out {})",
                ch.path, ch.input_report_len, ch.output_report_len
            ),
            w,
        );
    }

    Ok(())
}
