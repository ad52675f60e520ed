//! Bounded PCM frame queue shared by the loop worker and the stream feeder
//!
//! Insertion never blocks: when the queue is full the oldest frame is
//! evicted to make room (bounded staleness rather than backpressure).
//! Removal can wait for a frame with a timeout.

use bytes::Bytes;
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// One chunk of raw s16le PCM
#[derive(Clone, Debug)]
pub struct PcmFrame {
    pub data: Bytes,
    /// Track position at the start of this frame
    pub timecode_ms: u64,
}

impl PcmFrame {
    pub fn new(data: Bytes, timecode_ms: u64) -> Self {
        Self { data, timecode_ms }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Lock-free drop-oldest ring buffer for PCM frames
pub struct PcmRingBuffer {
    queue: ArrayQueue<PcmFrame>,
    ready: Notify,
    pushed_count: AtomicU64,
    dropped_count: AtomicU64,
}

impl PcmRingBuffer {
    /// Create a new ring buffer with the specified capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            ready: Notify::new(),
            pushed_count: AtomicU64::new(0),
            dropped_count: AtomicU64::new(0),
        }
    }

    /// Push a frame, evicting the oldest one if the buffer is full.
    ///
    /// Returns the evicted frame, if any.
    pub fn push(&self, frame: PcmFrame) -> Option<PcmFrame> {
        let evicted = self.queue.force_push(frame);
        self.pushed_count.fetch_add(1, Ordering::Relaxed);
        if evicted.is_some() {
            self.dropped_count.fetch_add(1, Ordering::Relaxed);
        }
        self.ready.notify_one();
        evicted
    }

    /// Pop a frame without waiting
    pub fn try_pop(&self) -> Option<PcmFrame> {
        self.queue.pop()
    }

    /// Pop a frame, waiting up to `timeout` for one to arrive
    pub async fn pop_timeout(&self, timeout: Duration) -> Option<PcmFrame> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(frame) = self.queue.pop() {
                return Some(frame);
            }
            // notify_one stores a permit when nobody waits, so a push racing
            // with the check above still wakes us.
            if tokio::time::timeout_at(deadline, self.ready.notified())
                .await
                .is_err()
            {
                return self.queue.pop();
            }
        }
    }

    /// Drop every buffered frame
    pub fn clear(&self) -> usize {
        let mut cleared = 0;
        while self.queue.pop().is_some() {
            cleared += 1;
        }
        cleared
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.queue.is_full()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Frames pushed since creation
    pub fn pushed_count(&self) -> u64 {
        self.pushed_count.load(Ordering::Relaxed)
    }

    /// Frames evicted by overflow since creation
    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }

    /// Get fill level as a fraction of capacity
    pub fn fill_level(&self) -> f32 {
        self.len() as f32 / self.capacity() as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn frame(n: u64) -> PcmFrame {
        PcmFrame::new(Bytes::from(n.to_le_bytes().to_vec()), n)
    }

    #[test]
    fn test_ring_buffer_basic() {
        let buffer = PcmRingBuffer::new(4);

        assert!(buffer.push(frame(0)).is_none());
        assert!(buffer.push(frame(1)).is_none());
        assert_eq!(buffer.len(), 2);

        assert_eq!(buffer.try_pop().unwrap().timecode_ms, 0);
        assert_eq!(buffer.try_pop().unwrap().timecode_ms, 1);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_full_buffer_evicts_oldest() {
        let buffer = PcmRingBuffer::new(3);
        for n in 0..3 {
            buffer.push(frame(n));
        }
        assert!(buffer.is_full());

        let evicted = buffer.push(frame(3)).unwrap();
        assert_eq!(evicted.timecode_ms, 0);
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.dropped_count(), 1);

        let remaining: Vec<u64> = std::iter::from_fn(|| buffer.try_pop())
            .map(|f| f.timecode_ms)
            .collect();
        assert_eq!(remaining, vec![1, 2, 3]);
    }

    #[test]
    fn test_clear() {
        let buffer = PcmRingBuffer::new(8);
        for n in 0..5 {
            buffer.push(frame(n));
        }
        assert_eq!(buffer.clear(), 5);
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn test_pop_timeout_expires_on_empty() {
        let buffer = PcmRingBuffer::new(2);
        let started = std::time::Instant::now();
        assert!(buffer.pop_timeout(Duration::from_millis(30)).await.is_none());
        assert!(started.elapsed() >= Duration::from_millis(25));
    }

    #[tokio::test]
    async fn test_pop_timeout_wakes_on_push() {
        let buffer = std::sync::Arc::new(PcmRingBuffer::new(2));
        let producer = buffer.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            producer.push(frame(7));
        });

        let popped = buffer.pop_timeout(Duration::from_secs(2)).await.unwrap();
        assert_eq!(popped.timecode_ms, 7);
    }

    proptest! {
        #[test]
        fn prop_keeps_newest_frames_in_order(capacity in 1usize..32, count in 0u64..128) {
            let buffer = PcmRingBuffer::new(capacity);
            for n in 0..count {
                buffer.push(frame(n));
                prop_assert!(buffer.len() <= capacity);
            }

            let expected: Vec<u64> = (count.saturating_sub(capacity as u64)..count).collect();
            let drained: Vec<u64> = std::iter::from_fn(|| buffer.try_pop())
                .map(|f| f.timecode_ms)
                .collect();
            prop_assert_eq!(drained, expected);
            prop_assert_eq!(buffer.dropped_count(), count.saturating_sub(capacity as u64));
        }
    }
}
