//! Streaming mode and the buffered-mode sample queue.

use core::cell::RefCell;
use core::sync::atomic::{AtomicU8, Ordering};

use alloc::collections::VecDeque;

use embassy_sync::blocking_mutex::CriticalSectionMutex;

/// Where the Sampler sends each sample besides the latest-sample slot.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamingMode {
    /// Samples are only kept as "latest".
    #[default]
    Stopped = 0,
    /// Every sample is broadcast as a realtime frame.
    RealTime = 1,
    /// Samples are queued for `ReadData` to drain.
    Buffered = 2,
}

impl StreamingMode {
    const fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::RealTime,
            2 => Self::Buffered,
            _ => Self::Stopped,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::RealTime => "realtime",
            Self::Buffered => "buffered",
        }
    }
}

/// Mode shared between the tick interrupt (reader) and the main loop
/// (sole writer).
pub struct ModeCell(AtomicU8);

impl ModeCell {
    pub const fn new(mode: StreamingMode) -> Self {
        Self(AtomicU8::new(mode as u8))
    }

    pub fn get(&self) -> StreamingMode {
        StreamingMode::from_raw(self.0.load(Ordering::Acquire))
    }

    /// Main loop only.
    pub fn set(&self, mode: StreamingMode) {
        self.0.store(mode as u8, Ordering::Release);
    }
}

struct QueueState {
    words: VecDeque<u32>,
    capacity: usize,
}

/// Bounded FIFO of packed sample words for buffered mode.
///
/// Storage for `capacity` words is reserved up front from the main loop, so
/// [`SampleQueue::push`] never allocates in interrupt context. A full queue
/// refuses new samples rather than evicting old ones.
pub struct SampleQueue {
    state: CriticalSectionMutex<RefCell<QueueState>>,
}

impl SampleQueue {
    pub const fn new() -> Self {
        Self {
            state: CriticalSectionMutex::new(RefCell::new(QueueState {
                words: VecDeque::new(),
                capacity: 0,
            })),
        }
    }

    /// Resize the queue, dropping the oldest words if it shrinks.
    ///
    /// Main loop only: this may allocate.
    pub fn set_capacity(&self, capacity: usize) {
        // Allocate and free outside the critical section.
        let mut fresh = VecDeque::with_capacity(capacity);
        let retired = self.state.lock(|state| {
            let mut state = state.borrow_mut();
            let skip = state.words.len().saturating_sub(capacity);
            fresh.extend(state.words.iter().skip(skip).copied());
            state.capacity = capacity;
            core::mem::replace(&mut state.words, fresh)
        });
        drop(retired);
    }

    pub fn capacity(&self) -> usize {
        self.state.lock(|state| state.borrow().capacity)
    }

    /// Queue a word. Returns `false` if the queue is full.
    pub fn push(&self, word: u32) -> bool {
        self.state.lock(|state| {
            let mut state = state.borrow_mut();
            if state.words.len() >= state.capacity {
                return false;
            }
            state.words.push_back(word);
            true
        })
    }

    /// Oldest queued word.
    pub fn pop(&self) -> Option<u32> {
        self.state.lock(|state| state.borrow_mut().words.pop_front())
    }

    pub fn len(&self) -> usize {
        self.state.lock(|state| state.borrow().words.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.state.lock(|state| state.borrow_mut().words.clear());
    }
}

impl Default for SampleQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Effective queue capacity for a `SetBufferSize` argument.
///
/// Zero or anything above `max` falls back to `default`.
pub const fn clamp_buffer_capacity(requested: u32, default: u32, max: u32) -> u32 {
    if requested == 0 || requested > max {
        default
    } else {
        requested
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_defaults_to_stopped() {
        let mode = ModeCell::new(StreamingMode::default());
        assert_eq!(mode.get(), StreamingMode::Stopped);
        mode.set(StreamingMode::Buffered);
        assert_eq!(mode.get(), StreamingMode::Buffered);
    }

    #[test]
    fn test_buffer_capacity_clamping() {
        assert_eq!(clamp_buffer_capacity(0, 8192, 32768), 8192);
        assert_eq!(clamp_buffer_capacity(50_000, 8192, 32768), 8192);
        assert_eq!(clamp_buffer_capacity(4096, 8192, 32768), 4096);
        assert_eq!(clamp_buffer_capacity(32768, 8192, 32768), 32768);
    }

    #[test]
    fn test_full_queue_refuses_new_words() {
        let queue = SampleQueue::new();
        queue.set_capacity(2);
        assert!(queue.push(1));
        assert!(queue.push(2));
        assert!(!queue.push(3));

        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_shrinking_keeps_newest_words() {
        let queue = SampleQueue::new();
        queue.set_capacity(4);
        for word in 10..14 {
            queue.push(word);
        }

        queue.set_capacity(2);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop(), Some(12));
        assert_eq!(queue.pop(), Some(13));
    }
}
