//! `monitor` subcommand — print every input report until Ctrl+C.
//!
//! Installs a receive callback and drives the device with a periodic
//! `perform` tick. The callback stops itself when the device disconnects or
//! Ctrl+C is pressed.

use std::cell::Cell;
use std::ops::ControlFlow;
use std::rc::Rc;
use std::sync::atomic::Ordering;

use super::{
    DeviceError, DeviceId, LoggingBridge, Options, RUNNING, Result, Session, format_hex,
    load_config,
};
use motionlink_lib::ReceiveCallback;

pub(super) fn cmd_monitor(opts: &Options, device: &str) -> Result<()> {
    let mut session = Session::new(load_config(opts.config.as_deref()))?;
    let id = session.resolve(device)?;
    let name = session.name(id);
    let tick = session.config.engine.poll_interval();

    session.ctx.set_event_bridge(Some(Box::new(LoggingBridge)));
    session.ctx.open(id)?;
    let channels = session.ctx.device(id).map_or(0, |d| d.channels().len());
    println!("[device]  {name} ({channels} channel{})", if channels == 1 { "" } else { "s" });
    println!("[monitor] Press Ctrl+C to stop");

    let received = Rc::new(Cell::new(0u64));
    let counter = Rc::clone(&received);
    let on_report: ReceiveCallback = Box::new(
        move |_: DeviceId, result: std::result::Result<&[u8], DeviceError>| {
            if !RUNNING.load(Ordering::SeqCst) {
                return ControlFlow::Break(());
            }
            match result {
                Ok(report) => {
                    counter.set(counter.get() + 1);
                    println!("[report]  {:>3} bytes: {}", report.len(), format_hex(report));
                }
                Err(DeviceError::NotFound) => {
                    println!("[device]  disconnected");
                    return ControlFlow::Break(());
                }
                Err(e) => log::warn!("[monitor] read failed: {e}"),
            }
            ControlFlow::Continue(())
        },
    );
    session.ctx.set_receive_callback(id, Some(on_report))?;

    while RUNNING.load(Ordering::SeqCst) {
        if let Err(e) = session.ctx.perform(id) {
            log::warn!("[monitor] tick failed: {e}");
        }
        if !session.ctx.device(id).is_some_and(|d| d.has_receive_callback()) {
            break;
        }
        std::thread::sleep(tick);
    }

    session.ctx.close(id)?;
    println!("[monitor] Stopped after {} report{}", received.get(), if received.get() == 1 { "" } else { "s" });
    Ok(())
}
