//! Channel Bridge
//!
//! One wait-free single-producer/single-consumer byte queue per channel,
//! decoupling the producer context from the device callback.
//!
//! Writes are all-or-nothing so that a block is either enqueued whole or
//! dropped whole; a partial write would shift every following frame.

use rtrb::{Consumer, Producer, RingBuffer};

use crate::config::SAMPLE_SIZE;

/// Factory for a bridge's two halves
pub struct ChannelBridge;

impl ChannelBridge {
    /// Create a bridge holding `capacity` bytes
    ///
    /// Note: This allocates. Only call during setup, not in an audio callback.
    pub fn with_capacity(capacity: usize) -> (BridgeWriter, BridgeReader) {
        let (producer, consumer) = RingBuffer::<u8>::new(capacity);
        (BridgeWriter { producer }, BridgeReader { consumer })
    }
}

/// Producer-context half of a bridge
pub struct BridgeWriter {
    producer: Producer<u8>,
}

impl BridgeWriter {
    /// Write `bytes` if they fit entirely, otherwise write nothing
    ///
    /// Returns `bytes.len()` or `0`, never anything in between.
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        if bytes.len() > self.producer.slots() {
            return 0;
        }

        match self.producer.write_chunk(bytes.len()) {
            Ok(mut chunk) => {
                let (first, second) = chunk.as_mut_slices();
                let split = first.len();
                first.copy_from_slice(&bytes[..split]);
                second.copy_from_slice(&bytes[split..]);
                chunk.commit_all();
                bytes.len()
            }
            Err(_) => 0,
        }
    }

    /// Write a block of samples, all or nothing
    ///
    /// Returns the number of bytes written.
    pub fn write_samples(&mut self, samples: &[f32]) -> usize {
        let len = samples.len() * SAMPLE_SIZE;
        if len > self.producer.slots() {
            return 0;
        }

        match self.producer.write_chunk_uninit(len) {
            Ok(chunk) => chunk.fill_from_iter(samples.iter().flat_map(|s| s.to_ne_bytes())),
            Err(_) => 0,
        }
    }

    /// Bytes that can currently be written
    pub fn free_bytes(&self) -> usize {
        self.producer.slots()
    }

    pub fn capacity(&self) -> usize {
        self.producer.buffer().capacity()
    }
}

/// Device-context half of a bridge
pub struct BridgeReader {
    consumer: Consumer<u8>,
}

impl BridgeReader {
    /// Read up to `out.len()` contiguous bytes, returning how many were read
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let count = out.len().min(self.consumer.slots());

        match self.consumer.read_chunk(count) {
            Ok(chunk) => {
                let (first, second) = chunk.as_slices();
                out[..first.len()].copy_from_slice(first);
                out[first.len()..count].copy_from_slice(second);
                chunk.commit_all();
                count
            }
            Err(_) => 0,
        }
    }

    /// Fill `out` completely or not at all
    ///
    /// Returns `false` without consuming anything when fewer than
    /// `out.len()` samples are buffered.
    pub fn read_samples(&mut self, out: &mut [f32]) -> bool {
        let len = out.len() * SAMPLE_SIZE;
        if len > self.consumer.slots() {
            return false;
        }

        match self.consumer.read_chunk(len) {
            Ok(chunk) => {
                let (first, second) = chunk.as_slices();
                let mut bytes = first.iter().chain(second).copied();
                for sample in out.iter_mut() {
                    let mut raw = [0u8; SAMPLE_SIZE];
                    for byte in raw.iter_mut() {
                        *byte = bytes.next().unwrap_or(0);
                    }
                    *sample = f32::from_ne_bytes(raw);
                }
                chunk.commit_all();
                true
            }
            Err(_) => false,
        }
    }

    /// Drop up to `count` buffered bytes, returning how many were dropped
    pub fn discard(&mut self, count: usize) -> usize {
        let count = count.min(self.consumer.slots());
        match self.consumer.read_chunk(count) {
            Ok(chunk) => {
                chunk.commit_all();
                count
            }
            Err(_) => 0,
        }
    }

    /// Bytes currently buffered
    pub fn available_bytes(&self) -> usize {
        self.consumer.slots()
    }

    pub fn capacity(&self) -> usize {
        self.consumer.buffer().capacity()
    }
}
