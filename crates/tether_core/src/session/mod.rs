//! Device Session
//!
//! Ties one producer graph to one output device:
//!
//! ```text
//!   submit() ──▶ Resampler ──▶ BridgeWriter ══ring══▶ BridgeReader ──▶ device
//!   (producer clock)   ▲                                    │ (device clock)
//!                      └──── correction ◀── DriftEstimator ◀┘
//! ```
//!
//! `submit` runs in the producer context and must not block. It reads only
//! atomics and writes only into preallocated buffers.

use std::sync::Arc;

use crossbeam_channel::Sender;
use tracing::{debug, info, warn};

use tether_dsp::Resampler;

use crate::bridge::{BridgeWriter, ChannelBridge};
use crate::config::{BridgeConfig, OutputControls, StreamParams, SAMPLE_SIZE};
use crate::device::DeviceRegistry;
use crate::error::{OutputError, OutputResult};
use crate::host::{ActiveStream, CpalHost, NegotiatedStream, OutputHost, StreamRequest};
use crate::message::Event;
use crate::monitor::{DiagnosticReport, DiagnosticsHandle, SharedState};
use crate::render::DeviceRenderer;


/// Producer-side state of one channel
struct ProducerChannel {
    resampler: Resampler,
    writer: BridgeWriter,
}

/// Everything that exists only while the device is open
///
/// Field order matters: the stream (which owns the device side) is
/// dropped before the producer side.
struct RunningSession {
    stream: Box<dyn ActiveStream>,
    channels: Vec<ProducerChannel>,
    /// Resampler output for one producer block
    scratch: Vec<f32>,
    shared: Arc<SharedState>,
    params: StreamParams,
}

/// One output endpoint
pub struct DeviceSession<H: OutputHost = CpalHost> {
    host: H,
    config: BridgeConfig,
    controls: OutputControls,
    events: Option<Sender<Event>>,
    running: Option<RunningSession>,
}

impl DeviceSession<CpalHost> {
    /// Session on the system's audio hosts
    pub fn with_cpal(config: BridgeConfig) -> OutputResult<Self> {
        Self::new(CpalHost::new(), config)
    }
}

impl<H: OutputHost> DeviceSession<H> {
    pub fn new(host: H, config: BridgeConfig) -> OutputResult<Self> {
        config.validate().map_err(OutputError::ConfigError)?;

        Ok(Self {
            host,
            config,
            controls: OutputControls::default(),
            events: None,
            running: None,
        })
    }

    /// Forward lifecycle, diagnostic and error events to `sender`
    pub fn with_event_sender(mut self, sender: Sender<Event>) -> Self {
        self.events = Some(sender);
        self
    }

    /// Replace the control values; takes effect on the next `start`
    pub fn with_controls(mut self, controls: OutputControls) -> Self {
        self.controls = controls;
        self
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn controls(&self) -> &OutputControls {
        &self.controls
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Format the device agreed to, while running
    pub fn negotiated(&self) -> Option<&NegotiatedStream> {
        self.running.as_ref().map(|running| running.stream.negotiated())
    }

    /// Producer parameters of the running stream
    pub fn params(&self) -> Option<StreamParams> {
        self.running.as_ref().map(|running| running.params)
    }

    /// Frames queued in a channel's bridge, seen from the producer side
    pub fn buffered_frames(&self, channel: usize) -> Option<usize> {
        let running = self.running.as_ref()?;
        let writer = &running.channels.get(channel)?.writer;
        Some((writer.capacity() - writer.free_bytes()) / SAMPLE_SIZE)
    }

    /// All output device names
    pub fn list_devices(&self) -> OutputResult<Vec<String>> {
        self.host.list_devices()
    }

    /// Open `device` and start streaming
    ///
    /// A running session is stopped first. On error the session is left
    /// stopped.
    pub fn start(
        &mut self,
        device: &str,
        channels: u16,
        source_rate: u32,
        producer_block: u32,
    ) -> OutputResult<()> {
        self.controls.device_name = device.to_string();
        self.start_with(StreamParams {
            channels,
            source_rate,
            producer_block,
        })
    }

    /// Start with the current device controls
    pub fn start_with(&mut self, params: StreamParams) -> OutputResult<()> {
        params.validate().map_err(OutputError::ConfigError)?;
        self.controls.validate().map_err(OutputError::ConfigError)?;

        if self.is_running() {
            self.stop();
        }

        let device_index = self.host.resolve_index(&self.controls.device_name)?;
        let request = StreamRequest {
            device_index,
            channels: params.channels,
            sample_rate: self.controls.device_sample_rate,
            block_size: params.device_block(self.controls.device_sample_rate),
            suggested_latency: params.suggested_latency(),
            max_callback_frames: self.config.max_callback_frames as u32,
        };

        let negotiated = self.host.negotiate(&request)?;
        debug!(
            "Negotiated {}: {} ch @ {} Hz, {} frames ({}, up to {})",
            negotiated.device_name,
            negotiated.channels,
            negotiated.sample_rate,
            negotiated.block_size,
            if negotiated.fixed_block { "fixed" } else { "device default" },
            negotiated.max_callback_frames
        );

        let channel_count = params.channels as usize;
        let shared = Arc::new(SharedState::new(
            negotiated.device_name.clone(),
            channel_count,
            self.config.max_drift_ppm,
        ));
        shared.set_drift_trim_ppm(self.controls.drift_trim_ppm);

        let mut channels = Vec::with_capacity(channel_count);
        let mut readers = Vec::with_capacity(channel_count);
        let mut max_output = 0;
        let mut ring_bytes = 0;

        for _ in 0..channel_count {
            let resampler = Resampler::with_drift_limit(
                params.source_rate as f64,
                negotiated.sample_rate as f64,
                self.config.max_drift_ppm,
            )?;
            max_output = resampler.max_output_frames(params.producer_block as usize);

            // A device on its default block may call back with more than we asked for
            let period = max_output.max(negotiated.max_callback_frames as usize);
            ring_bytes = self.config.ring_bytes(period);
            let (writer, reader) = ChannelBridge::with_capacity(ring_bytes);

            channels.push(ProducerChannel { resampler, writer });
            readers.push(reader);
        }

        let renderer = DeviceRenderer::new(
            readers,
            self.config
                .window_callbacks(negotiated.sample_rate, negotiated.block_size),
            self.config.max_drift_ppm,
            self.config.max_callback_frames,
            self.config.auto_drift_correction,
            Arc::clone(&shared),
        );

        let stream = self.host.open(&negotiated, renderer, self.events.clone())?;

        info!(
            "Output started on {}: {} ch, {} Hz -> {} Hz, block {} -> {}, ring {} bytes/ch",
            negotiated.device_name,
            params.channels,
            params.source_rate,
            negotiated.sample_rate,
            params.producer_block,
            negotiated.block_size,
            ring_bytes
        );
        self.send(Event::Started {
            device: negotiated.device_name.clone(),
            channels: negotiated.channels,
            sample_rate: negotiated.sample_rate,
            block_size: negotiated.block_size,
        });

        self.running = Some(RunningSession {
            stream,
            channels,
            scratch: vec![0.0; max_output],
            shared,
            params,
        });

        Ok(())
    }

    /// Close the device; a no-op when already stopped
    pub fn stop(&mut self) {
        let Some(mut running) = self.running.take() else {
            return;
        };

        let device = running.shared.device_name().to_string();
        if let Err(e) = running.stream.pause() {
            warn!("{}: failed to pause stream: {}", device, e);
        }
        // Device side goes first, then the rings and resamplers
        drop(running);

        info!("Output stopped on {}", device);
        self.send(Event::Stopped);
    }

    /// Adapt and enqueue one producer period
    ///
    /// `blocks[c]` holds channel `c`; only the first `frame_count` frames of
    /// each are used. Missing channels are skipped. A block that does not
    /// fit its ring is dropped whole and counted as an overflow.
    ///
    /// # Real-time Safety
    /// No allocations, no locks.
    pub fn submit(&mut self, blocks: &[&[f32]], frame_count: usize) {
        let Some(running) = self.running.as_mut() else {
            return;
        };

        let RunningSession {
            channels,
            scratch,
            shared,
            params,
            ..
        } = running;

        let trim = shared.drift_trim_ppm();
        let period = (params.producer_block as usize).max(1);

        for (index, (channel, block)) in channels.iter_mut().zip(blocks).enumerate() {
            let state = shared.channel(index);
            channel.resampler.set_drift_ppm(state.correction_ppm() + trim);

            let input = &block[..frame_count.min(block.len())];

            // Oversized submissions are handled one period at a time
            for chunk in input.chunks(period) {
                let produced = channel.resampler.process(chunk, scratch);
                if produced == 0 {
                    continue;
                }

                if channel.writer.write_samples(&scratch[..produced]) == 0 {
                    state.record_overflow(channel.writer.capacity() - channel.writer.free_bytes());
                }
            }
        }
    }

    /// Drain, log and forward every channel's figures
    ///
    /// Call periodically (the default control surface uses one second).
    /// Returns nothing when stopped.
    pub fn on_diagnostic_tick(&self) -> Vec<DiagnosticReport> {
        self.diagnostics()
            .map(|handle| handle.tick())
            .unwrap_or_default()
    }

    /// Handle for ticking diagnostics from another thread
    pub fn diagnostics(&self) -> Option<DiagnosticsHandle> {
        self.running
            .as_ref()
            .map(|running| DiagnosticsHandle::new(Arc::clone(&running.shared), self.events.clone()))
    }

    /// Change the device; restarts the stream when running
    pub fn set_device_name(&mut self, name: &str) -> OutputResult<()> {
        self.controls.device_name = name.to_string();
        self.restart()
    }

    /// Change the device rate; restarts the stream when running
    pub fn set_device_sample_rate(&mut self, rate: u32) -> OutputResult<()> {
        self.controls.device_sample_rate = rate;
        self.restart()
    }

    /// Change the manual drift trim; applies from the next `submit`
    pub fn set_drift_trim_ppm(&mut self, ppm: f64) -> OutputResult<()> {
        if !ppm.is_finite() {
            return Err(OutputError::ConfigError(format!("Invalid drift trim: {}", ppm)));
        }

        self.controls.drift_trim_ppm = ppm;
        if let Some(running) = &self.running {
            running.shared.set_drift_trim_ppm(ppm);
        }
        Ok(())
    }

    fn restart(&mut self) -> OutputResult<()> {
        match self.params() {
            Some(params) => self.start_with(params),
            None => Ok(()),
        }
    }

    fn send(&self, event: Event) {
        if let Some(sender) = &self.events {
            let _ = sender.try_send(event);
        }
    }
}

impl<H: OutputHost> Drop for DeviceSession<H> {
    fn drop(&mut self) {
        self.stop();
    }
}
