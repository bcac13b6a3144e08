//! Output Host Abstraction
//!
//! The session never talks to an audio API directly. A host enumerates
//! devices, negotiates a stream format and drives a [`DeviceRenderer`] from
//! its device callback.
//!
//! - [`CpalHost`]: every host API cpal knows about
//! - [`MockHost`]: in-process device pumped by hand, for tests

mod cpal_host;
mod mock;

use std::time::Duration;

use crossbeam_channel::Sender;

use crate::device::DeviceRegistry;
use crate::error::OutputResult;
use crate::message::Event;
use crate::render::DeviceRenderer;

pub use self::cpal_host::CpalHost;
pub use self::mock::{MockDevice, MockHost};

/// What the session asks of the device
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRequest {
    pub device_index: usize,
    pub channels: u16,
    pub sample_rate: u32,
    /// Preferred frames per callback, one producer period at `sample_rate`
    pub block_size: u32,
    pub suggested_latency: Duration,
    /// Callback size to assume when the device picks its own block
    pub max_callback_frames: u32,
}

/// What the device agreed to
#[derive(Debug, Clone, PartialEq)]
pub struct NegotiatedStream {
    pub device_index: usize,
    pub device_name: String,
    pub channels: u16,
    pub sample_rate: u32,
    /// Expected frames per callback
    pub block_size: u32,
    /// The device honours `block_size` exactly
    pub fixed_block: bool,
    /// Largest callback the device may deliver; `block_size` when fixed
    pub max_callback_frames: u32,
}

/// A playing device stream
///
/// Dropping the stream closes it. Once `pause` returns, the renderer is
/// not called again.
pub trait ActiveStream {
    fn negotiated(&self) -> &NegotiatedStream;

    fn pause(&mut self) -> OutputResult<()>;
}

/// An audio API able to open output streams
pub trait OutputHost: DeviceRegistry {
    /// Check the request against the device and settle the stream format
    fn negotiate(&self, request: &StreamRequest) -> OutputResult<NegotiatedStream>;

    /// Open and start the stream; `renderer` moves into the device context
    ///
    /// Backend errors after this returns are reported through `events`.
    fn open(
        &self,
        stream: &NegotiatedStream,
        renderer: DeviceRenderer,
        events: Option<Sender<Event>>,
    ) -> OutputResult<Box<dyn ActiveStream>>;
}
