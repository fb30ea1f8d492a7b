//! Frame stream plumbing between the capture callback and the pipeline
//!
//! The capture side pushes without ever blocking on the consumer. When the
//! consumer falls behind the queue drops its oldest frame, since stale audio
//! is worthless once an utterance has closed.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;

use super::AudioFrame;

/// Bounded frame queue with drop-oldest overflow
#[derive(Debug)]
pub struct FrameQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

#[derive(Debug, Default)]
struct QueueInner {
    frames: VecDeque<AudioFrame>,
    closed: bool,
}

impl FrameQueue {
    /// Create a queue holding at most `capacity` frames
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(QueueInner {
                frames: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push a frame, evicting the oldest one when full
    ///
    /// Returns true if a frame was dropped. Never blocks on the consumer.
    pub fn push(&self, frame: AudioFrame) -> bool {
        let evicted = {
            let mut inner = self.lock();
            if inner.closed {
                return false;
            }

            let evicted = if inner.frames.len() >= self.capacity {
                inner.frames.pop_front()
            } else {
                None
            };
            inner.frames.push_back(frame);
            evicted
        };

        self.notify.notify_one();

        if let Some(old) = evicted {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::debug!(seq = old.seq(), dropped_total = total, "frame queue full, dropped oldest");
            true
        } else {
            false
        }
    }

    /// Wait for the next frame
    ///
    /// Returns `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<AudioFrame> {
        loop {
            {
                let mut inner = self.lock();
                if let Some(frame) = inner.frames.pop_front() {
                    return Some(frame);
                }
                if inner.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Take the next frame without waiting
    pub fn try_pop(&self) -> Option<AudioFrame> {
        self.lock().frames.pop_front()
    }

    /// Discard all queued frames, returning how many were removed
    pub fn clear(&self) -> usize {
        let mut inner = self.lock();
        let n = inner.frames.len();
        inner.frames.clear();
        n
    }

    /// Stop accepting frames and wake the consumer
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames dropped by overflow since creation
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Slices an arbitrary sample stream into fixed-size, sequenced frames
#[derive(Debug)]
pub struct Framer {
    frame_samples: usize,
    sample_rate: u32,
    pending: Vec<f32>,
    next_seq: u64,
}

impl Framer {
    #[must_use]
    pub fn new(frame_samples: usize, sample_rate: u32) -> Self {
        let frame_samples = frame_samples.max(1);
        Self {
            frame_samples,
            sample_rate,
            pending: Vec::with_capacity(frame_samples * 2),
            next_seq: 0,
        }
    }

    /// Append samples and return every frame completed by them
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioFrame> {
        self.pending.extend_from_slice(samples);

        let mut frames = Vec::with_capacity(self.pending.len() / self.frame_samples);
        while self.pending.len() >= self.frame_samples {
            let rest = self.pending.split_off(self.frame_samples);
            let chunk = std::mem::replace(&mut self.pending, rest);
            frames.push(AudioFrame::new(
                self.next_seq,
                self.sample_rate,
                self.offset_of(self.next_seq),
                chunk,
            ));
            self.next_seq += 1;
        }
        frames
    }

    /// Sequence number the next frame will carry
    #[must_use]
    pub const fn next_seq(&self) -> u64 {
        self.next_seq
    }

    fn offset_of(&self, seq: u64) -> Duration {
        let start_sample = u128::from(seq) * self.frame_samples as u128;
        super::frame::samples_to_duration(start_sample, self.sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(seq: u64) -> AudioFrame {
        AudioFrame::silent(seq, 16_000, Duration::ZERO, 4)
    }

    #[test]
    fn test_drop_oldest_on_overflow() {
        let queue = FrameQueue::new(3);
        for seq in 0..5 {
            queue.push(frame(seq));
        }

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dropped(), 2);
        let seqs: Vec<u64> = std::iter::from_fn(|| queue.try_pop()).map(|f| f.seq()).collect();
        assert_eq!(seqs, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let queue = std::sync::Arc::new(FrameQueue::new(4));
        let producer = std::sync::Arc::clone(&queue);

        let handle = tokio::spawn(async move { producer.push(frame(7)) });
        let got = queue.pop().await.unwrap();
        assert_eq!(got.seq(), 7);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let queue = FrameQueue::new(4);
        queue.push(frame(1));
        queue.close();

        assert_eq!(queue.pop().await.map(|f| f.seq()), Some(1));
        assert!(queue.pop().await.is_none());
        assert!(!queue.push(frame(2)));
    }

    #[test]
    fn test_framer_fixed_size_and_sequence() {
        let mut framer = Framer::new(4, 16_000);
        assert!(framer.push(&[0.0; 3]).is_empty());

        let frames = framer.push(&[0.0; 6]);
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.len() == 4));
        assert_eq!(frames[0].seq(), 0);
        assert_eq!(frames[1].seq(), 1);
        assert_eq!(frames[1].offset(), Duration::from_micros(250));
        assert_eq!(framer.next_seq(), 2);
    }
}
