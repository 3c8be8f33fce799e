//! Frame-granular PCM16 sample FIFO
//!
//! Producers and the device callback exchange interleaved samples through
//! this buffer. Capacity is soft: a push that does not fit grows the backing
//! ring instead of overwriting or dropping audio, and everything moves in
//! whole device frames.

use std::sync::{Mutex, MutexGuard};

use ringbuf::HeapRb;
use ringbuf::traits::{Consumer, Observer, Producer};
use tracing::trace;

/// Initial backing capacity in samples (~340ms of stereo at 48kHz)
const INITIAL_CAPACITY: usize = 0x8000;

/// Interleaved sample FIFO shared between a producer and the device callback
pub struct SampleRingBuffer {
    ring: Mutex<HeapRb<i16>>,
    /// Samples per frame (device channel count)
    frame_size: usize,
}

impl SampleRingBuffer {
    /// Create a buffer moving frames of `frame_size` interleaved samples
    pub fn new(frame_size: usize) -> Self {
        Self::with_capacity(frame_size, INITIAL_CAPACITY)
    }

    pub fn with_capacity(frame_size: usize, capacity: usize) -> Self {
        let frame_size = frame_size.max(1);
        let capacity = capacity.max(frame_size);
        Self {
            ring: Mutex::new(HeapRb::new(capacity)),
            frame_size,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HeapRb<i16>> {
        self.ring.lock().unwrap_or_else(|e| {
            tracing::warn!("Sample ring buffer mutex poisoned; continuing");
            e.into_inner()
        })
    }

    /// Round a sample count down to whole frames
    #[inline]
    fn whole_frames(&self, samples: usize) -> usize {
        samples - samples % self.frame_size
    }

    /// Append whole frames, growing the backing store if needed
    ///
    /// A trailing partial frame is discarded.
    pub fn push(&self, samples: &[i16]) {
        let len = self.whole_frames(samples.len());
        if len == 0 {
            return;
        }

        let mut ring = self.lock();
        if ring.vacant_len() < len {
            let needed = ring.occupied_len() + len;
            let new_capacity = needed
                .next_power_of_two()
                .max(ring.capacity().get() * 2);
            trace!(
                "Growing sample ring buffer {} -> {} samples",
                ring.capacity().get(),
                new_capacity
            );
            let mut grown = HeapRb::<i16>::new(new_capacity);
            grown.push_iter(ring.pop_iter());
            *ring = grown;
        }
        ring.push_slice(&samples[..len]);
    }

    /// Pop whole frames into `out`, returning the number of samples written
    ///
    /// Samples of `out` past the returned count are left untouched.
    pub fn pop_into(&self, out: &mut [i16]) -> usize {
        let len = self.whole_frames(out.len());
        if len == 0 {
            return 0;
        }
        self.lock().pop_slice(&mut out[..len])
    }

    /// Pop up to `max_samples` (rounded down to whole frames)
    pub fn pop(&self, max_samples: usize) -> Vec<i16> {
        let mut ring = self.lock();
        let available = self.whole_frames(ring.occupied_len().min(max_samples));
        let mut out = vec![0; available];
        let popped = ring.pop_slice(&mut out);
        out.truncate(popped);
        out
    }

    /// Drop every buffered sample, returning how many were discarded
    pub fn clear(&self) -> usize {
        self.lock().clear()
    }

    /// Buffered samples (always a whole number of frames)
    pub fn len(&self) -> usize {
        self.lock().occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Current backing capacity in samples
    pub fn capacity(&self) -> usize {
        self.lock().capacity().get()
    }
}
