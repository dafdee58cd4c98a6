use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

/// A chunk of interleaved PCM as it arrived from the device. Created by
/// the capture callback, owned by the queue until popped, then consumed
/// by the worker. Never shared.
#[derive(Debug, Clone)]
pub struct PcmChunk {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmChunk {
    /// Duration of this chunk in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0;
        }
        let frames = self.samples.len() as i64 / self.channels as i64;
        frames * 1000 / self.sample_rate as i64
    }
}

struct QueueInner {
    chunks: VecDeque<PcmChunk>,
    closed: bool,
}

/// Bounded hand-off of timestamped PCM chunks between the capture
/// thread and the worker.
///
/// `push` never blocks: at capacity the oldest chunk is discarded and
/// the drop counter incremented. A microphone never throttles itself;
/// when processing falls behind the engine must lose time rather than
/// add latency to the audio source.
pub struct AudioQueue {
    inner: Mutex<QueueInner>,
    available: Condvar,
    capacity: usize,
    dropped: AtomicU64,
}

/// Capacity is expressed in chunks; device callbacks deliver roughly
/// 50 chunks/s, so 500 chunks ≈ 10 s of headroom.
pub const DEFAULT_QUEUE_CAPACITY: usize = 500;

impl AudioQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                chunks: VecDeque::with_capacity(capacity.min(1024)),
                closed: false,
            }),
            available: Condvar::new(),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue a chunk. Never blocks, never fails. At capacity the
    /// oldest chunk is discarded; FIFO order of the rest is preserved.
    pub fn push(&self, chunk: PcmChunk) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        if inner.chunks.len() >= self.capacity {
            inner.chunks.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        inner.chunks.push_back(chunk);
        drop(inner);
        self.available.notify_one();
    }

    /// Dequeue the oldest chunk, blocking until one is available or the
    /// queue has been closed. `None` means closed and drained.
    pub fn pop(&self) -> Option<PcmChunk> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(chunk) = inner.chunks.pop_front() {
                return Some(chunk);
            }
            if inner.closed {
                return None;
            }
            self.available.wait(&mut inner);
        }
    }

    /// Non-blocking variant used by drain loops.
    pub fn try_pop(&self) -> Option<PcmChunk> {
        self.inner.lock().chunks.pop_front()
    }

    /// Close the queue. Idempotent; wakes any blocked `pop`.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        inner.closed = true;
        drop(inner);
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn chunk(tag: i16) -> PcmChunk {
        PcmChunk {
            samples: vec![tag; 320],
            sample_rate: 16_000,
            channels: 1,
        }
    }

    #[test]
    fn fifo_order_preserved() {
        let q = AudioQueue::new(8);
        for i in 0..5 {
            q.push(chunk(i));
        }
        for i in 0..5 {
            assert_eq!(q.pop().unwrap().samples[0], i);
        }
    }

    #[test]
    fn overflow_drops_oldest() {
        let q = AudioQueue::new(3);
        for i in 0..5 {
            q.push(chunk(i));
        }
        assert_eq!(q.dropped_count(), 2);
        assert_eq!(q.len(), 3);
        // Chunks 0 and 1 were discarded; 2..4 remain in order.
        assert_eq!(q.pop().unwrap().samples[0], 2);
        assert_eq!(q.pop().unwrap().samples[0], 3);
        assert_eq!(q.pop().unwrap().samples[0], 4);
    }

    #[test]
    fn push_latency_stays_bounded_at_capacity() {
        let q = AudioQueue::new(4);
        for i in 0..4 {
            q.push(chunk(i));
        }
        let start = Instant::now();
        for i in 0..100 {
            q.push(chunk(i));
        }
        // 100 pushes against a full queue must not take anywhere near a
        // callback period.
        assert!(start.elapsed() < Duration::from_millis(50));
        assert_eq!(q.dropped_count(), 100);
    }

    #[test]
    fn pop_blocks_until_push() {
        let q = Arc::new(AudioQueue::new(8));
        let q2 = Arc::clone(&q);
        let handle = std::thread::spawn(move || q2.pop());
        std::thread::sleep(Duration::from_millis(20));
        q.push(chunk(42));
        let got = handle.join().unwrap().unwrap();
        assert_eq!(got.samples[0], 42);
    }

    #[test]
    fn close_unblocks_pop_and_is_idempotent() {
        let q = Arc::new(AudioQueue::new(8));
        let q2 = Arc::clone(&q);
        let handle = std::thread::spawn(move || q2.pop());
        std::thread::sleep(Duration::from_millis(20));
        q.close();
        q.close();
        assert!(handle.join().unwrap().is_none());
        assert!(q.pop().is_none());
    }

    #[test]
    fn pop_drains_remaining_after_close() {
        let q = AudioQueue::new(8);
        q.push(chunk(1));
        q.push(chunk(2));
        q.close();
        assert_eq!(q.pop().unwrap().samples[0], 1);
        assert_eq!(q.pop().unwrap().samples[0], 2);
        assert!(q.pop().is_none());
    }

    #[test]
    fn push_after_close_is_ignored() {
        let q = AudioQueue::new(8);
        q.close();
        q.push(chunk(1));
        assert!(q.is_empty());
    }

    #[test]
    fn chunk_duration() {
        let c = PcmChunk {
            samples: vec![0; 960],
            sample_rate: 48_000,
            channels: 2,
        };
        assert_eq!(c.duration_ms(), 10);
    }
}
