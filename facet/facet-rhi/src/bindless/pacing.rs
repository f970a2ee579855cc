//! Frame pacing: one command allocator per frame slot and a shared event the GPU signals with the
//! frame counter as each frame completes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::native::{NativeCommandAllocator, NativeCommandQueue, NativeDevice, NativeSharedEvent};
use crate::{FrameCounter, Result, MAX_FRAMES_IN_FLIGHT};

/// Spins between yields while waiting on the GPU.
const SPINS_PER_YIELD: u32 = 1024;

#[derive(Debug)]
pub struct FramePacer {
    counter: FrameCounter,
    event: Arc<dyn NativeSharedEvent>,
    allocators: Vec<Box<dyn NativeCommandAllocator>>,
    frame_open: AtomicBool,
    released: AtomicBool,
}

impl FramePacer {
    pub fn new(device: &dyn NativeDevice, counter: FrameCounter) -> Result<Self> {
        let allocators = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| device.new_command_allocator())
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            counter,
            event: device.new_shared_event()?,
            allocators,
            frame_open: AtomicBool::new(false),
            released: AtomicBool::new(false),
        })
    }

    pub fn counter(&self) -> &FrameCounter {
        &self.counter
    }

    pub fn event(&self) -> &Arc<dyn NativeSharedEvent> {
        &self.event
    }

    pub fn is_frame_open(&self) -> bool {
        self.frame_open.load(Ordering::Acquire)
    }

    /// Open the current frame if it is not open yet: wait until the GPU has finished the frame
    /// that last used this slot, then reset the slot's allocator. Returns the slot index.
    pub fn begin_frame(&self) -> usize {
        let index = self.counter.frame_index();
        if self.frame_open.swap(true, Ordering::AcqRel) {
            return index;
        }
        let frame = self.counter.get();
        let n = MAX_FRAMES_IN_FLIGHT as u64;
        if frame >= n {
            self.wait_for(frame - n + 1);
        }
        self.allocators[index].reset();
        log::debug!("frame {} begins in slot {}", frame, index);
        index
    }

    fn wait_for(&self, value: u64) {
        let mut spins = 0u32;
        while self.event.signaled_value() < value {
            std::hint::spin_loop();
            spins += 1;
            if spins % SPINS_PER_YIELD == 0 {
                std::thread::yield_now();
            }
        }
    }

    /// Close the frame: advance the counter and have the GPU signal the new value once the work
    /// submitted so far completes.
    pub fn end_frame(&self, queue: &dyn NativeCommandQueue) -> Result<u64> {
        self.frame_open.store(false, Ordering::Release);
        let value = self.counter.advance();
        log::debug!("frame {} ended", value - 1);
        queue.signal_event(&self.event, value)?;
        Ok(value)
    }

    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        for allocator in &self.allocators {
            allocator.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindless::software::{SoftwareConfig, SoftwareDevice};
    use std::time::Duration;

    #[test]
    fn begin_frame_runs_once_per_frame() {
        let device = SoftwareDevice::new(SoftwareConfig::default()).unwrap();
        let queue = device.new_command_queue().unwrap();
        let pacer = FramePacer::new(&device, FrameCounter::new()).unwrap();

        assert_eq!(pacer.begin_frame(), 0);
        assert_eq!(pacer.begin_frame(), 0);
        assert_eq!(device.allocator_resets(), 1);
        assert!(pacer.is_frame_open());

        assert_eq!(pacer.end_frame(queue.as_ref()).unwrap(), 1);
        assert!(!pacer.is_frame_open());
        assert_eq!(pacer.begin_frame(), 1);
        assert_eq!(device.allocator_resets(), 2);

        queue.release();
        pacer.release();
        device.release();
    }

    #[test]
    fn slot_reuse_waits_for_gpu() {
        let device = SoftwareDevice::new(SoftwareConfig {
            execution_delay: Duration::from_millis(10),
            ..Default::default()
        })
        .unwrap();
        let queue = device.new_command_queue().unwrap();
        let pacer = FramePacer::new(&device, FrameCounter::new()).unwrap();

        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            pacer.begin_frame();
            queue
                .commit(vec![Default::default()])
                .unwrap();
            pacer.end_frame(queue.as_ref()).unwrap();
        }
        // Frame 3 reuses slot 0, so frame 0 must have completed.
        assert_eq!(pacer.begin_frame(), 0);
        assert!(pacer.event().signaled_value() >= 1);

        queue.wait_until_idle().unwrap();
        assert_eq!(pacer.event().signaled_value(), MAX_FRAMES_IN_FLIGHT as u64);
        queue.release();
        pacer.release();
        device.release();
    }
}
