//! Configuration of [`run_sebulba`](crate::run_sebulba).
use crate::{error::SebulbaError, Device};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    default::Default,
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of [`run_sebulba`](crate::run_sebulba).
///
/// ```rust
/// use marl_sebulba::SebulbaConfig;
///
/// let config = SebulbaConfig::default()
///     .num_envs(8)
///     .rollout_length(16)
///     .num_updates(20)
///     .num_evaluation(4);
/// assert!(config.validate().is_ok());
/// assert_eq!(config.num_updates_per_eval(), 5);
/// assert_eq!(config.steps_per_rollout(), 16 * 8 * 5);
/// ```
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct SebulbaConfig {
    /// Number of environments stepped by each actor thread.
    pub num_envs: usize,

    /// Number of steps of a rollout.
    pub rollout_length: usize,

    /// Total number of learner updates.
    pub num_updates: usize,

    /// Number of evaluation blocks the updates are split into.
    pub num_evaluation: usize,

    /// Number of minibatches of a learner update.
    pub num_minibatches: usize,

    /// Capacity of the pipeline.
    pub pipeline_queue_size: usize,

    /// Number of actor threads per executor device.
    pub n_threads_per_executor: usize,

    /// Devices running actor threads.
    pub executor_device_ids: Vec<usize>,

    /// Devices running the learner.
    pub learner_device_ids: Vec<usize>,

    /// Random seed.
    pub seed: u64,
}

impl Default for SebulbaConfig {
    fn default() -> Self {
        Self {
            num_envs: 16,
            rollout_length: 128,
            num_updates: 100,
            num_evaluation: 10,
            num_minibatches: 2,
            pipeline_queue_size: 10,
            n_threads_per_executor: 2,
            executor_device_ids: vec![0],
            learner_device_ids: vec![0],
            seed: 42,
        }
    }
}

fn configuration_error(msg: impl Into<String>) -> SebulbaError {
    SebulbaError::Configuration(msg.into())
}

impl SebulbaConfig {
    /// Sets the number of environments per actor thread.
    pub fn num_envs(mut self, v: usize) -> Self {
        self.num_envs = v;
        self
    }

    /// Sets the rollout length.
    pub fn rollout_length(mut self, v: usize) -> Self {
        self.rollout_length = v;
        self
    }

    /// Sets the total number of updates.
    pub fn num_updates(mut self, v: usize) -> Self {
        self.num_updates = v;
        self
    }

    /// Sets the number of evaluation blocks.
    pub fn num_evaluation(mut self, v: usize) -> Self {
        self.num_evaluation = v;
        self
    }

    /// Sets the number of minibatches.
    pub fn num_minibatches(mut self, v: usize) -> Self {
        self.num_minibatches = v;
        self
    }

    /// Sets the pipeline capacity.
    pub fn pipeline_queue_size(mut self, v: usize) -> Self {
        self.pipeline_queue_size = v;
        self
    }

    /// Sets the number of actor threads per executor device.
    pub fn n_threads_per_executor(mut self, v: usize) -> Self {
        self.n_threads_per_executor = v;
        self
    }

    /// Sets the executor devices.
    pub fn executor_device_ids(mut self, v: Vec<usize>) -> Self {
        self.executor_device_ids = v;
        self
    }

    /// Sets the learner devices.
    pub fn learner_device_ids(mut self, v: Vec<usize>) -> Self {
        self.learner_device_ids = v;
        self
    }

    /// Sets the random seed.
    pub fn seed(mut self, v: u64) -> Self {
        self.seed = v;
        self
    }

    /// Checks the consistency of the configuration.
    pub fn validate(&self) -> Result<(), SebulbaError> {
        for (name, v) in [
            ("num_envs", self.num_envs),
            ("rollout_length", self.rollout_length),
            ("num_evaluation", self.num_evaluation),
            ("num_minibatches", self.num_minibatches),
            ("pipeline_queue_size", self.pipeline_queue_size),
            ("n_threads_per_executor", self.n_threads_per_executor),
        ] {
            if v == 0 {
                return Err(configuration_error(format!("{} must be positive", name)));
            }
        }
        if self.executor_device_ids.is_empty() || self.learner_device_ids.is_empty() {
            return Err(configuration_error("executor and learner devices must be given"));
        }

        let n_learners = self.learner_device_ids.len();
        if self.num_envs % n_learners != 0 {
            return Err(configuration_error(format!(
                "num_envs {} must be divisible by the number of learners {}",
                self.num_envs, n_learners
            )));
        }
        if (self.num_envs / n_learners) * self.n_threads_per_executor % self.num_minibatches != 0 {
            return Err(configuration_error(format!(
                "num_envs / n_learners * n_threads_per_executor must be divisible by num_minibatches {}",
                self.num_minibatches
            )));
        }
        if self.num_updates <= self.num_evaluation {
            return Err(configuration_error(format!(
                "num_updates {} must be greater than num_evaluation {}",
                self.num_updates, self.num_evaluation
            )));
        }
        Ok(())
    }

    /// Learner updates between two evaluations.
    pub fn num_updates_per_eval(&self) -> usize {
        self.num_updates / self.num_evaluation.max(1)
    }

    /// Environment steps of one actor between two evaluations.
    pub fn steps_per_rollout(&self) -> usize {
        self.rollout_length * self.num_envs * self.num_updates_per_eval()
    }

    /// Total number of actor threads.
    pub fn n_actor_threads(&self) -> usize {
        self.executor_device_ids.len() * self.n_threads_per_executor
    }

    /// Learner devices.
    pub fn learner_devices(&self) -> Vec<Device> {
        self.learner_device_ids.iter().copied().map(Device).collect()
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

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_serde_sebulba_config() -> Result<()> {
        let config = SebulbaConfig::default()
            .num_envs(4)
            .executor_device_ids(vec![0, 1]);
        let dir = TempDir::new("sebulba_config")?;
        let path = dir.path().join("sebulba_config.yaml");
        config.save(&path)?;
        assert_eq!(SebulbaConfig::load(&path)?, config);
        Ok(())
    }

    #[test]
    fn test_validation() {
        assert!(SebulbaConfig::default().validate().is_ok());
        assert_eq!(SebulbaConfig::default().n_actor_threads(), 2);

        let invalid = [
            SebulbaConfig::default().num_envs(15).learner_device_ids(vec![0, 1]),
            SebulbaConfig::default().num_envs(3).n_threads_per_executor(1),
            SebulbaConfig::default().num_updates(10).num_evaluation(10),
            SebulbaConfig::default().pipeline_queue_size(0),
            SebulbaConfig::default().executor_device_ids(vec![]),
        ];
        for config in invalid {
            assert!(matches!(config.validate(), Err(SebulbaError::Configuration(_))));
        }
    }
}
