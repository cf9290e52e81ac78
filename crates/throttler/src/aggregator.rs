//! Cross-sensor request aggregation.
//!
//! One cooling device can be bound to multiple sensors; each sensor holds
//! one vote (its resolved request) per device. The multiset of votes is a
//! fixed-size histogram indexed by state value, so insert, remove and the
//! aggregate maximum are all O(max_state) worst case with no allocation.

/// The multiset of every sensor's current resolved request for one cooling
/// device.
#[derive(Debug, Clone)]
pub(crate) struct RequestVotes {
    counts: Vec<u32>,
}

impl RequestVotes {
    pub fn new(max_state: usize) -> Self {
        Self {
            counts: vec![0; max_state + 1],
        }
    }

    pub fn insert(&mut self, state: usize) {
        let state = state.min(self.counts.len() - 1);
        self.counts[state] += 1;
    }

    pub fn remove(&mut self, state: usize) -> bool {
        let state = state.min(self.counts.len() - 1);
        if self.counts[state] == 0 {
            return false;
        }
        self.counts[state] -= 1;
        true
    }

    /// The aggregate request: the most restrictive (highest) vote.
    pub fn max(&self) -> Option<usize> {
        self.counts
            .iter()
            .rposition(|count| *count > 0)
    }

    /// Replaces one sensor's vote and reports whether the aggregate
    /// changed. This is the signal that a hardware update is required.
    pub fn replace(&mut self, old: usize, new: usize) -> bool {
        let before = self.max();
        self.remove(old);
        self.insert(new);
        self.max() != before
    }
}
