//! motionlink — report I/O engine for multi-interface HID motion-sensing devices.
//!
//! A [`Context`] owns logical devices, each aggregating up to
//! [`MAX_CHANNELS`] physical report channels. Reports go out through a bounded
//! pool of send slots (blocking or callback-based) and come in through reads
//! kept armed on every channel. [`Context::perform`] is the non-blocking tick
//! that advances both; an [`EventBridge`] tells an external event loop which
//! primitives to wait on before ticking.

pub mod bridge;
pub mod config;
pub mod context;
pub mod error;
pub mod handle;
mod lifecycle;
mod perform;
pub mod platform;
mod receive;
mod send;
pub mod slot;

pub use bridge::EventBridge;
pub use config::{Config, EngineConfig};
pub use context::Context;
pub use error::{DeviceError, MotionlinkError};
pub use handle::{
    ChannelInfo, DeviceId, DeviceInfo, DiscoveryStatus, MAX_CHANNELS, MAX_INPUT_REPORT_SIZE,
    MAX_OUTPUT_REPORT_SIZE, ReceiveCallback,
};
pub use platform::Primitive;
