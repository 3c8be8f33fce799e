//! Submission queue of buffer descriptors
//!
//! Each producer submission is tracked by a [`BufferDescriptor`]. The
//! producer enqueues, the device callback dequeues and advances playback
//! progress. Callback periods are milliseconds long, so a mutex-protected
//! FIFO is plenty.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

/// Playback progress for one producer submission
///
/// Invariant: `frames_played <= frames`, and `consumed` is set as soon as
/// the two meet. A consumed descriptor is never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferDescriptor {
    /// Total frames in the submission
    pub frames: u64,
    /// Frames serviced by the device so far
    pub frames_played: u64,
    /// Whether every frame has been serviced
    pub consumed: bool,
    /// Opaque producer identifier (e.g. guest buffer address)
    pub tag: u64,
}

impl BufferDescriptor {
    pub fn new(frames: u64, tag: u64) -> Self {
        Self {
            frames,
            frames_played: 0,
            consumed: false,
            tag,
        }
    }

    /// Empty, already-consumed placeholder used when nothing is playing
    pub fn consumed_sentinel() -> Self {
        Self {
            consumed: true,
            ..Self::default()
        }
    }

    /// Frames left to service
    #[inline]
    pub fn remaining(&self) -> u64 {
        self.frames.saturating_sub(self.frames_played)
    }

    /// Whether the callback must fetch a new descriptor before servicing
    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.consumed || self.frames == 0
    }

    /// Record `frames` more frames as serviced
    pub fn advance(&mut self, frames: u64) {
        self.frames_played = (self.frames_played + frames).min(self.frames);
        if self.frames_played >= self.frames {
            self.consumed = true;
        }
    }
}

/// FIFO of pending submissions
#[derive(Debug, Default)]
pub struct SubmissionQueue {
    inner: Mutex<VecDeque<BufferDescriptor>>,
}

impl SubmissionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<BufferDescriptor>> {
        self.inner.lock().unwrap_or_else(|e| {
            tracing::warn!("Submission queue mutex poisoned; continuing");
            e.into_inner()
        })
    }

    pub fn enqueue(&self, descriptor: BufferDescriptor) {
        self.lock().push_back(descriptor);
    }

    pub fn try_dequeue(&self) -> Option<BufferDescriptor> {
        self.lock().pop_front()
    }

    /// Discard every pending descriptor, returning how many were dropped
    pub fn clear(&self) -> usize {
        let mut queue = self.lock();
        let dropped = queue.len();
        queue.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
