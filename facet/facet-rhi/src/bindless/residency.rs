//! Residency tracking: every live allocation is a member of the device's residency set, and the
//! set is committed lazily, only when membership changed.

use std::collections::HashSet;

use parking_lot::Mutex;

use super::native::{Allocation, AllocationId, NativeResidencySet};

#[derive(Debug, Default)]
struct ResidencyState {
    members: HashSet<AllocationId>,
    dirty: bool,
    released: bool,
}

#[derive(Debug)]
pub struct ResidencyTracker {
    state: Mutex<ResidencyState>,
    native: Box<dyn NativeResidencySet>,
}

impl ResidencyTracker {
    pub fn new(native: Box<dyn NativeResidencySet>) -> Self {
        Self {
            state: Mutex::new(ResidencyState::default()),
            native,
        }
    }

    pub fn native(&self) -> &dyn NativeResidencySet {
        self.native.as_ref()
    }

    pub fn add(&self, allocation: &Allocation) {
        let mut state = self.state.lock();
        if state.released {
            return;
        }
        if state.members.insert(allocation.id) {
            self.native.add_allocation(allocation);
            state.dirty = true;
        }
    }

    pub fn remove(&self, allocation: &Allocation) {
        let mut state = self.state.lock();
        if state.released {
            return;
        }
        if state.members.remove(&allocation.id) {
            self.native.remove_allocation(allocation);
            state.dirty = true;
        }
    }

    /// Commit pending membership changes. Returns true if the driver was called.
    pub fn commit(&self) -> bool {
        let mut state = self.state.lock();
        if !state.dirty || state.released {
            return false;
        }
        self.native.commit();
        state.dirty = false;
        log::debug!(
            "residency set committed ({} allocations)",
            state.members.len()
        );
        true
    }

    pub fn contains(&self, allocation: &Allocation) -> bool {
        self.state.lock().members.contains(&allocation.id)
    }

    pub fn len(&self) -> usize {
        self.state.lock().members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_dirty(&self) -> bool {
        self.state.lock().dirty
    }

    pub fn release(&self) {
        let mut state = self.state.lock();
        if std::mem::replace(&mut state.released, true) {
            return;
        }
        state.members.clear();
        state.dirty = false;
        self.native.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindless::native::NativeDevice;
    use crate::bindless::software::{SoftwareConfig, SoftwareDevice};

    #[test]
    fn commit_without_changes_skips_driver() {
        let device = SoftwareDevice::new(SoftwareConfig::default()).unwrap();
        let tracker = ResidencyTracker::new(device.new_residency_set(None).unwrap());
        let allocation = device.new_buffer(64, None).unwrap();

        tracker.add(&allocation);
        assert!(tracker.is_dirty());
        assert!(tracker.commit());
        assert!(!tracker.commit());
        assert_eq!(device.residency_commits(), 1);

        // Re-adding a member is not a change.
        tracker.add(&allocation);
        assert!(!tracker.commit());
        assert_eq!(tracker.native().allocation_count(), 1);

        tracker.remove(&allocation);
        assert!(tracker.is_empty());
        assert!(tracker.commit());
        assert_eq!(device.residency_commits(), 2);

        device.release_allocation(&allocation);
        tracker.release();
        device.release();
    }
}
