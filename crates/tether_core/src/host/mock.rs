//! Mock output host for testing without hardware.
//!
//! The "device" is driven by calling [`MockHost::pump`], which runs one
//! device callback on the calling thread. Clones share state, so a test can
//! keep a handle after moving the host into a session.

use std::sync::Arc;

use crossbeam_channel::Sender;
use parking_lot::Mutex;

use super::{ActiveStream, NegotiatedStream, OutputHost, StreamRequest};
use crate::device::{device_label, DeviceRegistry};
use crate::error::{OutputError, OutputResult};
use crate::message::Event;
use crate::render::DeviceRenderer;

/// A fake output device
#[derive(Debug, Clone, PartialEq)]
pub struct MockDevice {
    pub name: String,
    pub max_channels: u16,
    pub sample_rates: Vec<u32>,
    /// Largest block the device accepts exactly
    pub max_block: u32,
}

impl MockDevice {
    pub fn new(name: &str) -> Self {
        Self {
            name: device_label("Mock", name),
            max_channels: 8,
            sample_rates: vec![44100, 48000, 96000],
            max_block: 4096,
        }
    }
}

#[derive(Default)]
struct MockState {
    devices: Vec<MockDevice>,
    default_index: Option<usize>,
    renderer: Option<DeviceRenderer>,
    events: Option<Sender<Event>>,
    negotiated: Option<NegotiatedStream>,
    fail_next_open: Option<(i32, String)>,
    open_count: usize,
}

/// In-process output host
#[derive(Clone, Default)]
pub struct MockHost {
    state: Arc<Mutex<MockState>>,
}

impl MockHost {
    /// Host with `Mock::Speakers` (the default) and `Mock::Headphones`
    pub fn new() -> Self {
        Self::with_devices(
            vec![MockDevice::new("Speakers"), MockDevice::new("Headphones")],
            Some(0),
        )
    }

    pub fn with_devices(devices: Vec<MockDevice>, default_index: Option<usize>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                devices,
                default_index,
                ..Default::default()
            })),
        }
    }

    /// Make the next `open` fail with a backend error code
    pub fn fail_next_open(&self, code: i32, message: &str) {
        self.state.lock().fail_next_open = Some((code, message.to_string()));
    }

    /// Unplug a device
    pub fn remove_device(&self, name: &str) {
        let mut state = self.state.lock();
        state.devices.retain(|device| device.name != name);
    }

    /// A stream is open and its renderer is live
    pub fn is_streaming(&self) -> bool {
        self.state.lock().renderer.is_some()
    }

    /// Streams opened over the host's lifetime
    pub fn open_count(&self) -> usize {
        self.state.lock().open_count
    }

    /// Format of the open stream
    pub fn negotiated(&self) -> Option<NegotiatedStream> {
        self.state.lock().negotiated.clone()
    }

    /// Run one device callback of `frames` frames
    ///
    /// Returns one buffer per channel, or `None` when no stream is open.
    pub fn pump(&self, frames: usize) -> Option<Vec<Vec<f32>>> {
        let mut state = self.state.lock();
        let renderer = state.renderer.as_mut()?;

        let mut outputs = vec![vec![0.0_f32; frames]; renderer.channels()];
        let mut slices: Vec<&mut [f32]> = outputs.iter_mut().map(|out| out.as_mut_slice()).collect();
        renderer.render_planar(&mut slices);

        Some(outputs)
    }

    /// Run one interleaved device callback of `frames` frames
    pub fn pump_interleaved(&self, frames: usize) -> Option<Vec<f32>> {
        let mut state = self.state.lock();
        let renderer = state.renderer.as_mut()?;

        let mut data = vec![0.0_f32; frames * renderer.channels()];
        renderer.render_interleaved(&mut data);

        Some(data)
    }

    /// Report a backend error the way a device error callback would
    pub fn raise_error(&self, message: &str) {
        let state = self.state.lock();
        if let Some(sender) = &state.events {
            let _ = sender.try_send(Event::error(message));
        }
    }
}

impl DeviceRegistry for MockHost {
    fn list_devices(&self) -> OutputResult<Vec<String>> {
        Ok(self
            .state
            .lock()
            .devices
            .iter()
            .map(|device| device.name.clone())
            .collect())
    }

    fn default_device(&self) -> OutputResult<Option<String>> {
        let state = self.state.lock();
        Ok(state
            .default_index
            .and_then(|index| state.devices.get(index))
            .map(|device| device.name.clone()))
    }
}

impl OutputHost for MockHost {
    fn negotiate(&self, request: &StreamRequest) -> OutputResult<NegotiatedStream> {
        let state = self.state.lock();
        let device = state
            .devices
            .get(request.device_index)
            .ok_or_else(|| OutputError::DeviceNotFound(format!("device #{}", request.device_index)))?;

        if request.channels > device.max_channels {
            return Err(OutputError::StreamOpenFailed {
                code: -9998,
                message: format!("Invalid number of channels: {}", request.channels),
            });
        }
        if !device.sample_rates.contains(&request.sample_rate) {
            return Err(OutputError::StreamOpenFailed {
                code: -9997,
                message: format!("Invalid sample rate: {}", request.sample_rate),
            });
        }

        let fixed_block = request.block_size <= device.max_block;

        Ok(NegotiatedStream {
            device_index: request.device_index,
            device_name: device.name.clone(),
            channels: request.channels,
            sample_rate: request.sample_rate,
            block_size: request.block_size,
            fixed_block,
            max_callback_frames: if fixed_block {
                request.block_size
            } else {
                request.max_callback_frames
            },
        })
    }

    fn open(
        &self,
        stream: &NegotiatedStream,
        renderer: DeviceRenderer,
        events: Option<Sender<Event>>,
    ) -> OutputResult<Box<dyn ActiveStream>> {
        let mut state = self.state.lock();

        if let Some((code, message)) = state.fail_next_open.take() {
            return Err(OutputError::StreamOpenFailed { code, message });
        }
        if state.devices.get(stream.device_index).map(|d| &d.name) != Some(&stream.device_name) {
            return Err(OutputError::DeviceNotFound(stream.device_name.clone()));
        }

        state.renderer = Some(renderer);
        state.events = events;
        state.negotiated = Some(stream.clone());
        state.open_count += 1;

        Ok(Box::new(MockStream {
            state: Arc::clone(&self.state),
            negotiated: stream.clone(),
        }))
    }
}

struct MockStream {
    state: Arc<Mutex<MockState>>,
    negotiated: NegotiatedStream,
}

impl MockStream {
    fn close(&self) {
        let mut state = self.state.lock();
        state.renderer = None;
        state.events = None;
        state.negotiated = None;
    }
}

impl ActiveStream for MockStream {
    fn negotiated(&self) -> &NegotiatedStream {
        &self.negotiated
    }

    fn pause(&mut self) -> OutputResult<()> {
        self.close();
        Ok(())
    }
}

impl Drop for MockStream {
    fn drop(&mut self) {
        self.close();
    }
}
