//! In-memory prioritized replay tables.
//!
//! A [`PriorityTable`] is a fixed-capacity FIFO of items, each inserted with a priority.
//! Sampling draws item `i` with probability `P(i) = p_i^α / Σ_k p_k^α` and returns
//! importance weights `w_i = (N P(i))^-β`, normalized by the largest possible weight.
mod config;
mod sum_tree;
use crate::error::MarlError;
pub use config::PriorityTableConfig;
use rand::{rngs::StdRng, Rng, SeedableRng};
use sum_tree::SumTree;

/// An item drawn from a [`PriorityTable`].
#[derive(Clone, Debug)]
pub struct SampledItem<T> {
    /// Key assigned at insertion. Keys increase by one per insertion.
    pub key: u64,

    /// The item.
    pub item: T,

    /// Probability with which the item was drawn.
    pub probability: f32,

    /// Normalized importance weight.
    pub weight: f32,
}

/// A fixed-capacity table of items sampled in proportion to their priority.
pub struct PriorityTable<T> {
    name: String,
    capacity: usize,
    items: Vec<T>,
    priorities: Vec<f32>,

    /// Key of the next inserted item. Key `k` lives in slot `k % capacity`.
    next_key: u64,

    sum_tree: SumTree,
    rng: StdRng,
}

fn check_priority(priority: f32) -> Result<(), MarlError> {
    if priority >= 0.0 && priority.is_finite() {
        Ok(())
    } else {
        Err(MarlError::Validation(format!(
            "priority must be finite and non-negative, got {}",
            priority
        )))
    }
}

impl<T> PriorityTable<T> {
    /// Builds an empty table.
    pub fn build(config: &PriorityTableConfig) -> Result<Self, MarlError> {
        if config.capacity == 0 {
            return Err(MarlError::Configuration(format!(
                "capacity of table {} must be positive",
                config.name
            )));
        }

        Ok(Self {
            name: config.name.clone(),
            capacity: config.capacity,
            items: Vec::with_capacity(config.capacity),
            priorities: Vec::with_capacity(config.capacity),
            next_key: 0,
            sum_tree: SumTree::new(config.capacity, config.priority_exponent),
            rng: StdRng::seed_from_u64(config.seed),
        })
    }

    /// Name of the table.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Maximum number of items.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if the table holds no item.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Total number of insertions, including evicted items.
    pub fn num_inserted(&self) -> u64 {
        self.next_key
    }

    fn slot(&self, key: u64) -> Option<usize> {
        let alive = key < self.next_key && self.next_key - key <= self.capacity as u64;
        alive.then(|| (key % self.capacity as u64) as usize)
    }

    /// Inserts an item, evicting the oldest one when full. Returns the key of the item.
    pub fn insert(&mut self, item: T, priority: f32) -> Result<u64, MarlError> {
        check_priority(priority)?;

        let key = self.next_key;
        let ix = (key % self.capacity as u64) as usize;
        if ix < self.items.len() {
            self.items[ix] = item;
            self.priorities[ix] = priority;
        } else {
            self.items.push(item);
            self.priorities.push(priority);
        }
        self.sum_tree.update(ix, priority);
        self.next_key += 1;

        Ok(key)
    }

    /// Items from oldest to newest.
    pub fn items(&self) -> impl Iterator<Item = &T> {
        let split = if self.items.len() < self.capacity {
            0
        } else {
            (self.next_key % self.capacity as u64) as usize
        };
        self.items[split..].iter().chain(self.items[..split].iter())
    }

    /// Priority of the item with the given key, if it is still in the table.
    pub fn priority(&self, key: u64) -> Option<f32> {
        self.slot(key).map(|ix| self.priorities[ix])
    }

    /// Replaces priorities of items. Keys of evicted items are ignored.
    pub fn update_priorities(&mut self, updates: &[(u64, f32)]) -> Result<(), MarlError> {
        for &(key, priority) in updates {
            check_priority(priority)?;
            if let Some(ix) = self.slot(key) {
                self.priorities[ix] = priority;
                self.sum_tree.update(ix, priority);
            }
        }
        Ok(())
    }
}

impl<T: Clone> PriorityTable<T> {
    /// Draws `batch_size` items with replacement.
    ///
    /// `beta` is the exponent of the importance weights.
    pub fn sample(&mut self, batch_size: usize, beta: f32) -> Result<Vec<SampledItem<T>>, MarlError> {
        if self.is_empty() {
            return Err(MarlError::Validation(format!("table {} is empty", self.name)));
        }

        let n = self.len();
        let total = self.sum_tree.total();
        let max_weight = (n as f32 * self.sum_tree.min(n) / total).powf(-beta);

        let mut samples = Vec::with_capacity(batch_size);
        for _ in 0..batch_size {
            let s = total * self.rng.gen::<f32>();
            let ix = self.sum_tree.get(s).min(n - 1);
            let probability = self.sum_tree.leaf(ix) / total;
            samples.push(SampledItem {
                key: self.key_of(ix),
                item: self.items[ix].clone(),
                probability,
                weight: (n as f32 * probability).powf(-beta) / max_weight,
            });
        }
        Ok(samples)
    }

    fn key_of(&self, ix: usize) -> u64 {
        let newest = self.next_key - 1;
        let newest_ix = (newest % self.capacity as u64) as usize;
        if ix <= newest_ix {
            newest - (newest_ix - ix) as u64
        } else {
            newest - (newest_ix + self.capacity - ix) as u64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(capacity: usize) -> PriorityTable<i32> {
        PriorityTable::build(&PriorityTableConfig::default().capacity(capacity)).unwrap()
    }

    #[test]
    fn test_fifo_eviction() {
        let mut t = table(3);
        for i in 0..5 {
            t.insert(i, 1.0).unwrap();
        }
        assert_eq!(t.len(), 3);
        assert_eq!(t.items().copied().collect::<Vec<_>>(), vec![2, 3, 4]);
        assert_eq!(t.priority(1), None);
        assert_eq!(t.priority(4), Some(1.0));
    }

    #[test]
    fn test_sampling_follows_priorities() {
        let mut t = table(4);
        t.insert(0, 0.0).unwrap();
        t.insert(1, 1.0).unwrap();
        let samples = t.sample(100, 1.0).unwrap();
        assert!(samples.iter().all(|s| s.item == 1));
        assert!(samples.iter().all(|s| s.key == 1));
    }

    #[test]
    fn test_update_priorities() {
        let mut t = table(2);
        let k0 = t.insert(10, 1.0).unwrap();
        let k1 = t.insert(11, 1.0).unwrap();
        t.update_priorities(&[(k0, 0.0), (k1, 5.0)]).unwrap();
        let samples = t.sample(50, 0.0).unwrap();
        assert!(samples.iter().all(|s| s.item == 11));
        assert!(samples.iter().all(|s| (s.weight - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_invalid_input() {
        let mut t = table(1);
        assert!(t.sample(1, 1.0).is_err());
        assert!(t.insert(0, f32::NAN).is_err());
        let err = PriorityTable::<i32>::build(&PriorityTableConfig::default().capacity(0));
        assert!(matches!(err, Err(MarlError::Configuration(_))));
    }
}
