//! Configuration of [`NStepTransitionAdder`](super::NStepTransitionAdder).
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    default::Default,
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of [`NStepTransitionAdder`](super::NStepTransitionAdder).
///
/// ```rust
/// use marl_core::adders::NStepTransitionAdderConfig;
/// use std::collections::BTreeMap;
///
/// let config = NStepTransitionAdderConfig::default()
///     .n_step(3)
///     .discount(0.99)
///     .table_net_config(Some(BTreeMap::from([(
///         "trainer_0".to_string(),
///         vec!["network_agent".to_string(), "network_agent".to_string()],
///     )])));
/// ```
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct NStepTransitionAdderConfig {
    /// Number of steps collapsed into a transition. Must be at least 1.
    pub n_step: usize,

    /// Discount applied by the agent on top of the environment discount.
    pub discount: f32,

    /// Number of created items allowed to stay queued in the writer.
    pub max_in_flight_items: usize,

    /// Network keys a transition must hold to be written to a table, keyed by table name.
    ///
    /// Tables not listed here receive every transition unchanged.
    pub table_net_config: Option<BTreeMap<String, Vec<String>>>,
}

impl Default for NStepTransitionAdderConfig {
    fn default() -> Self {
        Self {
            n_step: 5,
            discount: 0.99,
            max_in_flight_items: 5,
            table_net_config: None,
        }
    }
}

impl NStepTransitionAdderConfig {
    /// Sets the number of steps.
    pub fn n_step(mut self, n_step: usize) -> Self {
        self.n_step = n_step;
        self
    }

    /// Sets the agent discount.
    pub fn discount(mut self, discount: f32) -> Self {
        self.discount = discount;
        self
    }

    /// Sets the number of items allowed in flight.
    pub fn max_in_flight_items(mut self, max_in_flight_items: usize) -> Self {
        self.max_in_flight_items = max_in_flight_items;
        self
    }

    /// Sets the required network keys per table.
    pub fn table_net_config(mut self, table_net_config: Option<BTreeMap<String, Vec<String>>>) -> Self {
        self.table_net_config = table_net_config;
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
