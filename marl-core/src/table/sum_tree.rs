//! Sum tree for prioritized sampling.
use segment_tree::{ops::MinIgnoreNaN, SegmentPoint};

const EPS: f32 = 1e-8;

/// Binary tree of transformed priorities `(p + eps)^alpha`.
///
/// Node `i` has children `2i + 1` and `2i + 2`, and slot `k` is the leaf
/// `k + capacity - 1`. Each inner node holds the sum of its children.
#[derive(Debug)]
pub struct SumTree {
    alpha: f32,
    capacity: usize,
    sums: Vec<f32>,
    mins: SegmentPoint<f32, MinIgnoreNaN>,
}

impl SumTree {
    pub fn new(capacity: usize, alpha: f32) -> Self {
        Self {
            alpha,
            capacity,
            sums: vec![0.0; 2 * capacity - 1],
            mins: SegmentPoint::build(vec![f32::MAX; capacity], MinIgnoreNaN),
        }
    }

    fn leaf_node(&self, slot: usize) -> usize {
        slot + self.capacity - 1
    }

    /// Sum of all transformed priorities.
    pub fn total(&self) -> f32 {
        self.sums[0]
    }

    /// Smallest transformed priority among the first `n` slots.
    pub fn min(&self, n: usize) -> f32 {
        self.mins.query(0, n)
    }

    /// Transformed priority of `slot`.
    pub fn leaf(&self, slot: usize) -> f32 {
        self.sums[self.leaf_node(slot)]
    }

    /// Sets the priority of `slot`.
    pub fn update(&mut self, slot: usize, priority: f32) {
        debug_assert!(slot < self.capacity);

        let value = (priority + EPS).powf(self.alpha);
        self.mins.modify(slot, value);

        let mut node = self.leaf_node(slot);
        let delta = value - self.sums[node];
        self.sums[node] = value;
        while node > 0 {
            node = (node - 1) / 2;
            self.sums[node] += delta;
        }
    }

    /// Slot at which the running sum of transformed priorities reaches `s`.
    pub fn get(&self, mut s: f32) -> usize {
        let mut node = 0;
        loop {
            let left = 2 * node + 1;
            if left >= self.sums.len() {
                break;
            }
            let right = left + 1;
            if s <= self.sums[left] || self.sums[right] == 0.0 {
                node = left;
            } else {
                s -= self.sums[left];
                node = right;
            }
        }
        node + 1 - self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::SumTree;

    #[test]
    fn test_cumulative_lookup() {
        let priorities = [1.0f32, 0.5, 2.0, 0.25, 0.25];
        let mut tree = SumTree::new(8, 1.0);
        for (slot, p) in priorities.iter().enumerate() {
            tree.update(slot, *p);
        }

        for (s, slot) in [(0.0, 0), (0.9, 0), (1.2, 1), (1.6, 2), (3.4, 2), (3.6, 3), (3.9, 4)] {
            assert_eq!(tree.get(s), slot, "s = {}", s);
        }
        assert!((tree.total() - 4.0).abs() < 1e-4);
        assert!((tree.min(priorities.len()) - 0.25).abs() < 1e-4);
        assert!((tree.leaf(2) - 2.0).abs() < 1e-4);

        // Overwriting a slot moves the running sums
        tree.update(0, 0.0);
        assert_eq!(tree.get(0.2), 1);
        assert!((tree.total() - 3.0).abs() < 1e-4);
    }

    #[test]
    fn test_exponent() {
        let mut tree = SumTree::new(2, 0.5);
        tree.update(0, 4.0);
        tree.update(1, 9.0);
        assert!((tree.total() - 5.0).abs() < 1e-4);
    }

    #[test]
    fn test_single_slot() {
        let mut tree = SumTree::new(1, 1.0);
        tree.update(0, 2.0);
        assert_eq!(tree.get(1.0), 0);
        assert!((tree.total() - 2.0).abs() < 1e-6);
    }
}
