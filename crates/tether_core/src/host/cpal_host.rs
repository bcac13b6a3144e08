//! cpal-backed output host
//!
//! Devices of every available host API are listed together, each named
//! `"<host>::<device>"`.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, BuildStreamError, Device, SampleFormat, Stream, SupportedBufferSize};
use crossbeam_channel::Sender;
use tracing::{debug, warn};

use super::{ActiveStream, NegotiatedStream, OutputHost, StreamRequest};
use crate::device::{device_label, split_label, AudioDevice, DeviceRegistry};
use crate::error::{OutputError, OutputResult};
use crate::message::Event;
use crate::render::DeviceRenderer;

/// No f32 configuration matches the requested channels and rate
pub const CODE_FORMAT_UNSUPPORTED: i32 = -10;

/// Host backed by cpal
///
/// The device list is read from cpal on every call.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalHost;

impl CpalHost {
    pub fn new() -> Self {
        Self
    }

    /// All output devices of all hosts, in enumeration order
    fn devices(&self) -> OutputResult<Vec<(String, Device)>> {
        let mut devices = Vec::new();

        for host_id in cpal::available_hosts() {
            let host = match cpal::host_from_id(host_id) {
                Ok(host) => host,
                Err(e) => {
                    debug!("Skipping host {}: {}", host_id.name(), e);
                    continue;
                }
            };

            let outputs = host
                .output_devices()
                .map_err(|e| OutputError::Enumeration(e.to_string()))?;

            for device in outputs {
                // Rust pattern: a device whose name can't be read can't be
                // addressed either, so it is left out
                if let Ok(name) = device.name() {
                    devices.push((device_label(host_id.name(), &name), device));
                }
            }
        }

        Ok(devices)
    }

    fn device_at(&self, index: usize) -> OutputResult<(String, Device)> {
        self.devices()?
            .into_iter()
            .nth(index)
            .ok_or_else(|| OutputError::DeviceNotFound(format!("device #{}", index)))
    }

    /// Full description of every output device
    pub fn describe_devices(&self) -> OutputResult<Vec<AudioDevice>> {
        let default_name = self.default_device()?;

        Ok(self
            .devices()?
            .into_iter()
            .enumerate()
            .map(|(index, (name, device))| {
                let (sample_rates, max_channels) = match device.supported_output_configs() {
                    Ok(configs) => extract_config_info(configs),
                    Err(_) => (vec![], 0),
                };
                let host = split_label(&name)
                    .map(|(host, _)| host.to_string())
                    .unwrap_or_default();

                AudioDevice {
                    index,
                    is_default: default_name.as_deref() == Some(name.as_str()),
                    name,
                    host,
                    sample_rates,
                    max_channels,
                }
            })
            .collect())
    }
}

impl DeviceRegistry for CpalHost {
    fn list_devices(&self) -> OutputResult<Vec<String>> {
        Ok(self.devices()?.into_iter().map(|(name, _)| name).collect())
    }

    fn default_device(&self) -> OutputResult<Option<String>> {
        let host = cpal::default_host();
        Ok(host
            .default_output_device()
            .and_then(|device| device.name().ok())
            .map(|name| device_label(host.id().name(), &name)))
    }
}

impl OutputHost for CpalHost {
    fn negotiate(&self, request: &StreamRequest) -> OutputResult<NegotiatedStream> {
        let (device_name, device) = self.device_at(request.device_index)?;

        let configs = device
            .supported_output_configs()
            .map_err(|e| OutputError::StreamOpenFailed {
                code: CODE_FORMAT_UNSUPPORTED,
                message: e.to_string(),
            })?;

        let matching = configs
            .filter(|config| config.sample_format() == SampleFormat::F32)
            .filter(|config| config.channels() == request.channels)
            .find(|config| {
                config.min_sample_rate().0 <= request.sample_rate
                    && request.sample_rate <= config.max_sample_rate().0
            })
            .ok_or_else(|| OutputError::StreamOpenFailed {
                code: CODE_FORMAT_UNSUPPORTED,
                message: format!(
                    "{} has no f32 output with {} channels at {} Hz",
                    device_name, request.channels, request.sample_rate
                ),
            })?;

        let (fixed_block, max_callback_frames) = match matching.buffer_size() {
            SupportedBufferSize::Range { min, max } => {
                if *min <= request.block_size && request.block_size <= *max {
                    (true, request.block_size)
                } else {
                    (false, (*max).min(request.max_callback_frames))
                }
            }
            SupportedBufferSize::Unknown => (false, request.max_callback_frames),
        };

        Ok(NegotiatedStream {
            device_index: request.device_index,
            device_name,
            channels: request.channels,
            sample_rate: request.sample_rate,
            block_size: request.block_size,
            fixed_block,
            max_callback_frames: max_callback_frames.max(request.block_size),
        })
    }

    fn open(
        &self,
        stream: &NegotiatedStream,
        mut renderer: DeviceRenderer,
        events: Option<Sender<Event>>,
    ) -> OutputResult<Box<dyn ActiveStream>> {
        let (device_name, device) = self.device_at(stream.device_index)?;
        if device_name != stream.device_name {
            // The device list changed between negotiation and open
            return Err(OutputError::DeviceNotFound(stream.device_name.clone()));
        }

        let config = cpal::StreamConfig {
            channels: stream.channels,
            sample_rate: cpal::SampleRate(stream.sample_rate),
            buffer_size: if stream.fixed_block {
                BufferSize::Fixed(stream.block_size)
            } else {
                BufferSize::Default
            },
        };

        let err_device = device_name.clone();
        let output = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    // Real-time audio callback - NO allocations allowed here
                    renderer.render_interleaved(data);
                },
                move |err| {
                    if let Some(sender) = &events {
                        let _ = sender.try_send(Event::error(format!("{}: {}", err_device, err)));
                    }
                },
                None, // No timeout
            )
            .map_err(|e| OutputError::StreamOpenFailed {
                code: build_error_code(&e),
                message: e.to_string(),
            })?;

        output
            .play()
            .map_err(|e| OutputError::StreamPlayFailed(e.to_string()))?;

        if !stream.fixed_block {
            warn!(
                "{}: block size {} not supported, using the device default",
                device_name, stream.block_size
            );
        }

        Ok(Box::new(CpalStream {
            stream: output,
            negotiated: stream.clone(),
        }))
    }
}

/// A playing cpal output stream
///
/// Rust pattern: cpal closes the stream and joins its callback thread on drop
struct CpalStream {
    stream: Stream,
    negotiated: NegotiatedStream,
}

impl ActiveStream for CpalStream {
    fn negotiated(&self) -> &NegotiatedStream {
        &self.negotiated
    }

    fn pause(&mut self) -> OutputResult<()> {
        self.stream
            .pause()
            .map_err(|e| OutputError::StreamPlayFailed(e.to_string()))
    }
}

/// Stable numeric code for a cpal build error
#[allow(unreachable_patterns)]
fn build_error_code(err: &BuildStreamError) -> i32 {
    match err {
        BuildStreamError::DeviceNotAvailable => -1,
        BuildStreamError::StreamConfigNotSupported => -2,
        BuildStreamError::InvalidArgument => -3,
        BuildStreamError::StreamIdOverflow => -4,
        BuildStreamError::BackendSpecific { .. } => -5,
        _ => -9,
    }
}

fn extract_config_info(
    configs: impl Iterator<Item = cpal::SupportedStreamConfigRange>,
) -> (Vec<u32>, u16) {
    let mut sample_rates = Vec::new();
    let mut max_channels = 0u16;

    // Common sample rates to check
    const COMMON_RATES: [u32; 7] = [44100, 48000, 88200, 96000, 176400, 192000, 384000];

    for config in configs {
        if config.sample_format() != SampleFormat::F32 {
            continue;
        }
        max_channels = max_channels.max(config.channels());

        let min = config.min_sample_rate().0;
        let max = config.max_sample_rate().0;

        for &rate in &COMMON_RATES {
            if rate >= min && rate <= max && !sample_rates.contains(&rate) {
                sample_rates.push(rate);
            }
        }
    }

    sample_rates.sort_unstable();
    (sample_rates, max_channels)
}
