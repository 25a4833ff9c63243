//! `read` subcommand — blocking reads of input reports.

use std::sync::atomic::Ordering;
use std::time::Duration;

use motionlink_lib::MAX_INPUT_REPORT_SIZE;

use super::{
    DeviceError, Options, RUNNING, ReadOutput, ReportJson, Result, Session, format_hex,
    load_config, print_json,
};

pub(super) fn cmd_read(opts: &Options, device: &str, count: usize, timeout_ms: u64) -> Result<()> {
    let mut session = Session::new(load_config(opts.config.as_deref()))?;
    let id = session.resolve(device)?;
    let name = session.name(id);
    let timeout = Duration::from_millis(timeout_ms);

    session.ctx.open(id)?;

    let mut reports: Vec<Vec<u8>> = Vec::with_capacity(count);
    let mut buf = [0u8; MAX_INPUT_REPORT_SIZE];
    while reports.len() < count && RUNNING.load(Ordering::SeqCst) {
        match session.ctx.read(id, &mut buf, timeout) {
            Ok(n) => {
                if !opts.json {
                    println!("[{}] {n:>3} bytes: {}", reports.len() + 1, format_hex(&buf[..n]));
                }
                reports.push(buf[..n].to_vec());
            }
            Err(DeviceError::Timeout) if !reports.is_empty() => {
                log::warn!(
                    "no report within {timeout_ms} ms, stopping after {} of {count}",
                    reports.len()
                );
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }

    if opts.json {
        return print_json(&ReadOutput {
            device: name,
            reports: reports
                .iter()
                .map(|r| ReportJson {
                    length: r.len(),
                    hex: format_hex(r),
                })
                .collect(),
        });
    }

    Ok(())
}
