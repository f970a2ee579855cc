//! Frame counter shared by a device and every frame-multiplexed resource it creates.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Maximum number of frames the CPU may record ahead of the GPU.
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

/// Monotonically increasing count of completed frames.
///
/// One counter lives on each device; buffers and the frame pacer hold clones of the same `Arc`,
/// so the uniform slot and the command allocator chosen for a frame always agree.
#[derive(Debug, Clone, Default)]
pub struct FrameCounter {
    value: Arc<AtomicU64>,
}

impl FrameCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of frames ended so far; also the number of the frame currently being recorded.
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    /// Slot in `0..MAX_FRAMES_IN_FLIGHT` for the frame being recorded.
    pub fn frame_index(&self) -> usize {
        (self.get() % MAX_FRAMES_IN_FLIGHT as u64) as usize
    }

    /// Ends the current frame and returns the new counter value.
    pub(crate) fn advance(&self) -> u64 {
        self.value.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn shares_with(&self, other: &FrameCounter) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_index_wraps_at_frames_in_flight() {
        let counter = FrameCounter::new();
        let mut seen = Vec::new();
        for _ in 0..MAX_FRAMES_IN_FLIGHT * 2 {
            seen.push(counter.frame_index());
            counter.advance();
        }
        assert_eq!(seen, vec![0, 1, 2, 0, 1, 2]);
        assert_eq!(counter.get(), 6);
    }

    #[test]
    fn clones_share_one_value() {
        let counter = FrameCounter::new();
        let clone = counter.clone();
        assert_eq!(counter.advance(), 1);
        assert_eq!(clone.get(), 1);
        assert!(clone.shares_with(&counter));
        assert!(!FrameCounter::new().shares_with(&counter));
    }
}
