//! Configuration of [`PriorityTable`](super::PriorityTable).
use crate::adders::DEFAULT_PRIORITY_TABLE;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    default::Default,
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of [`PriorityTable`](super::PriorityTable).
///
/// ```rust
/// use marl_core::table::PriorityTableConfig;
///
/// let config = PriorityTableConfig::default()
///     .name("trainer_0")
///     .capacity(10_000)
///     .priority_exponent(0.6);
/// ```
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct PriorityTableConfig {
    /// Name under which transitions are routed to the table.
    pub name: String,

    /// Maximum number of items. The oldest item is evicted when full.
    pub capacity: usize,

    /// Exponent applied to priorities. `0.0` gives uniform sampling.
    pub priority_exponent: f32,

    /// Seed of the sampling random number generator.
    pub seed: u64,
}

impl Default for PriorityTableConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_PRIORITY_TABLE.to_string(),
            capacity: 100_000,
            priority_exponent: 1.0,
            seed: 42,
        }
    }
}

impl PriorityTableConfig {
    /// Sets the table name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the capacity.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the priority exponent.
    pub fn priority_exponent(mut self, priority_exponent: f32) -> Self {
        self.priority_exponent = priority_exponent;
        self
    }

    /// Sets the random seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Loads the configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves the configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}
