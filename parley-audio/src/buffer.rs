//! Lock-free circular buffer for audio samples

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::HeapRb;

/// Lock-free circular buffer for audio samples
///
/// Uses `ringbuf` for wait-free single-producer single-consumer operations.
/// The capture callback writes whatever the device delivers and drains it in
/// fixed-size blocks, so the block cadence is independent of the device's
/// own period size.
pub struct CircularBuffer {
    producer: ringbuf::HeapProd<f32>,
    consumer: ringbuf::HeapCons<f32>,
}

impl CircularBuffer {
    /// Create new circular buffer with given capacity
    ///
    /// # Example
    ///
    /// ```
    /// use parley_audio::CircularBuffer;
    ///
    /// let buffer = CircularBuffer::new(16000); // 1 second @ 16kHz
    /// assert_eq!(buffer.available(), 0);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let rb = HeapRb::<f32>::new(capacity);
        let (producer, consumer) = rb.split();

        Self { producer, consumer }
    }

    /// Write samples to the buffer (producer side, called from audio callback)
    ///
    /// Returns number of samples actually written. If buffer is full, the tail
    /// of `samples` is dropped.
    pub fn write(&mut self, samples: &[f32]) -> usize {
        self.producer.push_slice(samples)
    }

    /// Read samples into `output`, returning how many were read.
    pub fn read(&mut self, output: &mut [f32]) -> usize {
        self.consumer.pop_slice(output)
    }

    /// Pop exactly `len` samples if that many are buffered.
    pub fn read_block(&mut self, len: usize) -> Option<Vec<f32>> {
        if len == 0 || self.available() < len {
            return None;
        }
        let mut block = vec![0.0; len];
        let read = self.read(&mut block);
        debug_assert_eq!(read, len);
        Some(block)
    }

    /// Get number of samples currently available for reading
    pub fn available(&self) -> usize {
        self.consumer.occupied_len()
    }
}
