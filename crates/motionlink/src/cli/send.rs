//! `send` subcommand — write one output report, blocking or via the callback path.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use super::{DeviceError, DeviceId, Options, RUNNING, Result, Session, load_config, parse_hex};

pub(super) fn cmd_send(
    opts: &Options,
    device: &str,
    hex: &str,
    async_send: bool,
    timeout_ms: Option<u64>,
) -> Result<()> {
    let report = parse_hex(hex)?;

    let mut config = load_config(opts.config.as_deref());
    if !async_send && let Some(ms) = timeout_ms {
        config.engine.send_timeout_ms = ms;
    }
    let mut session = Session::new(config)?;
    let id = session.resolve(device)?;
    let name = session.name(id);

    session.ctx.open(id)?;
    log::debug!("{name} opened");

    if async_send {
        let timeout = Duration::from_millis(
            timeout_ms.unwrap_or(session.config.engine.send_timeout_ms),
        );
        send_async(&mut session, id, &report, timeout)?;
    } else {
        session.ctx.send(id, &report)?;
    }

    println!("Sent {} byte{} to {name}", report.len(), if report.len() == 1 { "" } else { "s" });
    Ok(())
}

/// Queue the report and tick the device until its callback fires.
fn send_async(
    session: &mut Session,
    id: DeviceId,
    report: &[u8],
    timeout: Duration,
) -> Result<()> {
    let outcome: Rc<Cell<Option<std::result::Result<(), DeviceError>>>> = Rc::new(Cell::new(None));
    let sink = Rc::clone(&outcome);
    session
        .ctx
        .send_async(id, report, timeout, move |_, result| sink.set(Some(result)))?;

    let tick = session.config.engine.poll_interval();
    while outcome.get().is_none() && RUNNING.load(Ordering::SeqCst) {
        session.ctx.perform(id)?;
        if outcome.get().is_none() {
            std::thread::sleep(tick);
        }
    }

    // Closing completes a still-pending send with `Interrupted`.
    session.ctx.close(id)?;
    match outcome.take() {
        Some(result) => Ok(result?),
        None => Err(DeviceError::Interrupted.into()),
    }
}
