//! Sample ring buffer
//!
//! Fixed-capacity single-producer/single-consumer queue of [`AudioFrame`]s.
//! The producer half lives on the clock worker, the consumer half on the
//! host's real-time audio thread. Only the read/write cursors are shared
//! (atomically), so neither side ever takes a lock.
//!
//! The SPSC discipline is enforced by ownership: [`FrameRing::new`] hands out
//! exactly one [`FrameProducer`] and one [`FrameConsumer`], neither of which
//! is `Clone`. The backing storage is released once both halves are dropped.
//!
//! Only the consumer can remove frames, so the producer drops old audio by
//! raising a shared discard mark: a position in the stream (counted in frames
//! since the ring was created) below which the consumer skips everything on
//! its next read.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::frame::AudioFrame;

/// Constructor for a split frame ring
pub struct FrameRing;

impl FrameRing {
    /// Allocate a ring holding `capacity` frames and split it
    ///
    /// The ring and the producer's overflow backlog are the only
    /// allocations it ever makes.
    pub fn new(capacity: usize) -> (FrameProducer, FrameConsumer) {
        let capacity = capacity.max(1);
        let ring = HeapRb::<AudioFrame>::new(capacity);
        let (producer, consumer) = ring.split();
        let discard_until = Arc::new(AtomicU64::new(0));
        (
            FrameProducer {
                inner: producer,
                written: 0,
                backlog: Vec::with_capacity(capacity),
                discard_until: discard_until.clone(),
            },
            FrameConsumer {
                inner: consumer,
                read: 0,
                discard_until,
            },
        )
    }
}

/// Frames below `mark` not yet consumed by a reader positioned at `read`
#[inline]
fn pending_discard(mark: u64, read: u64, occupied: usize) -> usize {
    (mark.saturating_sub(read) as usize).min(occupied)
}

/// Write half of the frame ring
pub struct FrameProducer {
    inner: HeapProd<AudioFrame>,
    /// Frames pushed into the ring since creation
    written: u64,
    /// Newest frames waiting for the consumer to skip old ones
    backlog: Vec<AudioFrame>,
    discard_until: Arc<AtomicU64>,
}

impl FrameProducer {
    /// Append as many frames as fit, oldest first
    ///
    /// Returns the number written. A short count means the ring is full;
    /// the caller decides what to do with the rest. Never blocks.
    pub fn write(&mut self, frames: &[AudioFrame]) -> usize {
        let written = self.inner.push_slice(frames);
        self.written += written as u64;
        written
    }

    /// Append `frames`, evicting the oldest audio when the ring is full
    ///
    /// Frames that do not fit wait in a backlog (at most one ring's worth)
    /// and the consumer is told to skip as many of the oldest buffered
    /// frames. The backlog goes out first on the next call. Returns the
    /// number of frames this call dropped from the stream. Never blocks.
    pub fn write_evicting(&mut self, frames: &[AudioFrame]) -> usize {
        let capacity = self.capacity();

        if !self.backlog.is_empty() {
            let flushed = self.inner.push_slice(&self.backlog);
            self.written += flushed as u64;
            self.backlog.drain(..flushed);
        }
        let direct = if self.backlog.is_empty() {
            self.write(frames)
        } else {
            0
        };
        let rest = &frames[direct..];
        if rest.is_empty() {
            return 0;
        }

        // Keep only the newest ring's worth waiting
        let mut dropped = rest.len().saturating_sub(capacity);
        let rest = &rest[dropped..];
        let overflow = (self.backlog.len() + rest.len()).saturating_sub(capacity);
        if overflow > 0 {
            self.backlog.drain(..overflow);
            dropped += overflow;
        }
        self.backlog.extend_from_slice(rest);

        let occupied = self.inner.occupied_len();
        let read = self.written - occupied as u64;
        let target = read + self.backlog.len().min(occupied) as u64;
        let previous = self.discard_until.fetch_max(target, Ordering::AcqRel);
        dropped += target.saturating_sub(previous.max(read)) as usize;
        dropped
    }

    /// Mark everything written so far as stale
    ///
    /// The consumer skips it on its next read, so audio written after this
    /// call is played first. Returns the number of frames discarded.
    pub fn discard_buffered(&mut self) -> usize {
        let backlog = self.backlog.len();
        self.backlog.clear();
        let occupied = self.inner.occupied_len();
        let read = self.written - occupied as u64;
        let previous = self.discard_until.fetch_max(self.written, Ordering::AcqRel);
        backlog + self.written.saturating_sub(previous.max(read)) as usize
    }

    /// Frames the consumer will still play, excluding ones marked for discard
    pub fn available(&self) -> usize {
        let occupied = self.inner.occupied_len();
        let read = self.written - occupied as u64;
        let mark = self.discard_until.load(Ordering::Acquire);
        occupied - pending_discard(mark, read, occupied)
    }

    /// Free slots
    pub fn vacant(&self) -> usize {
        self.inner.vacant_len()
    }

    /// Frames held back until the consumer makes room
    pub fn backlog(&self) -> usize {
        self.backlog.len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity().get()
    }
}

/// Read half of the frame ring
pub struct FrameConsumer {
    inner: HeapCons<AudioFrame>,
    /// Frames removed from the ring since creation
    read: u64,
    discard_until: Arc<AtomicU64>,
}

impl FrameConsumer {
    /// Remove up to `out.len()` frames in production order
    ///
    /// Frames below the discard mark are skipped first. Returns the number
    /// read, which is less than requested when the ring runs short. Never
    /// blocks.
    pub fn read(&mut self, out: &mut [AudioFrame]) -> usize {
        self.apply_discard();
        let n = self.inner.pop_slice(out);
        self.read += n as u64;
        n
    }

    /// Skip frames the producer marked as stale, returning how many
    pub fn apply_discard(&mut self) -> usize {
        let mark = self.discard_until.load(Ordering::Acquire);
        let pending = pending_discard(mark, self.read, self.inner.occupied_len());
        if pending == 0 {
            return 0;
        }
        let skipped = self.inner.skip(pending);
        self.read += skipped as u64;
        skipped
    }

    /// Frames that a read would return, excluding ones marked for discard
    pub fn available(&self) -> usize {
        let occupied = self.inner.occupied_len();
        let mark = self.discard_until.load(Ordering::Acquire);
        occupied - pending_discard(mark, self.read, occupied)
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity().get()
    }
}
