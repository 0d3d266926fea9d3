//! Assignment of networks to agents.
//!
//! Agents act with the network named by their network key. A sampling setup is a list of
//! samples, each an ordered list of network keys. At the start of an episode samples are drawn
//! at random and their keys are given to the agents in sorted order until every agent holds one.
//!
//! ```rust
//! use marl_core::network_sampling::{NetworkAssignment, NetworkSamplingConfig};
//!
//! let agents = vec!["agent_10".to_string(), "agent_2".to_string(), "agent_1".to_string()];
//! let assignment = NetworkAssignment::build(&NetworkSamplingConfig::default(), &agents).unwrap();
//! assert_eq!(assignment.agents(), ["agent_1", "agent_2", "agent_10"]);
//! assert_eq!(assignment.unique_net_keys(), ["network_agent"]);
//! ```
use crate::{error::MarlError, AgentId};
use anyhow::Result;
use itertools::Itertools;
use log::info;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::{
    cmp::Ordering,
    collections::BTreeMap,
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// How network keys are given to agents.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone)]
pub enum NetworkSampler {
    /// Every agent keeps the same network. With shared weights agents of the same type
    /// (the prefix of the agent id before `_`) share one network.
    FixedAgentNetworks,

    /// One network per agent, drawn with replacement for each agent at every episode.
    RandomAgentNetworks,

    /// Samples of network keys given explicitly.
    Custom(Vec<Vec<String>>),
}

/// Configuration of [`NetworkAssignment`].
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct NetworkSamplingConfig {
    /// Sampling setup.
    pub sampler: NetworkSampler,

    /// Whether agents of the same type share weights.
    pub shared_weights: bool,

    /// Seed of the sampling random number generator.
    pub seed: u64,
}

impl Default for NetworkSamplingConfig {
    fn default() -> Self {
        Self {
            sampler: NetworkSampler::FixedAgentNetworks,
            shared_weights: true,
            seed: 42,
        }
    }
}

impl NetworkSamplingConfig {
    /// Sets the sampler.
    pub fn sampler(mut self, sampler: NetworkSampler) -> Self {
        self.sampler = sampler;
        self
    }

    /// Sets weight sharing.
    pub fn shared_weights(mut self, shared_weights: bool) -> Self {
        self.shared_weights = shared_weights;
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

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Chunk {
    Num(u64),
    Text(String),
}

fn natural_key(s: &str) -> Vec<Chunk> {
    s.chars()
        .group_by(|c| c.is_ascii_digit())
        .into_iter()
        .map(|(is_digit, chars)| {
            let text: String = chars.collect();
            if is_digit {
                text.parse().map(Chunk::Num).unwrap_or(Chunk::Text(text))
            } else {
                Chunk::Text(text)
            }
        })
        .collect()
}

/// Compares strings treating runs of digits as numbers, so `agent_2 < agent_10`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    natural_key(a).cmp(&natural_key(b))
}

/// Sorts strings in natural order.
pub fn sort_str_num<S: AsRef<str>>(items: impl IntoIterator<Item = S>) -> Vec<String> {
    let mut v: Vec<String> = items.into_iter().map(|s| s.as_ref().to_string()).collect();
    v.sort_by(|a, b| natural_cmp(a, b));
    v
}

/// Draws samples from `setup` until every agent holds a network key.
///
/// `agents` are filled in the given order.
pub fn sample_new_agent_keys(
    agents: &[AgentId],
    setup: &[Vec<String>],
    rng: &mut impl Rng,
) -> Result<BTreeMap<AgentId, String>, MarlError> {
    if setup.is_empty() || setup.iter().any(|s| s.is_empty()) {
        return Err(MarlError::Configuration(
            "network sampling setup must hold non-empty samples".to_string(),
        ));
    }

    let mut agent_net_keys = BTreeMap::new();
    let mut slots = agents.iter();
    while agent_net_keys.len() < agents.len() {
        let sample = &setup[rng.gen_range(0..setup.len())];
        for key in sample {
            let agent = slots.next().ok_or_else(|| {
                MarlError::Configuration(format!(
                    "{} agents cannot be filled with samples of length {}",
                    agents.len(),
                    sample.len()
                ))
            })?;
            agent_net_keys.insert(agent.clone(), key.clone());
        }
    }

    Ok(agent_net_keys)
}

/// Network keys of the agents of a system.
#[derive(Debug)]
pub struct NetworkAssignment {
    agents: Vec<AgentId>,
    setup: Vec<Vec<String>>,
    agent_net_keys: BTreeMap<AgentId, String>,
    unique_net_keys: Vec<String>,
    net_keys_to_ids: BTreeMap<String, usize>,
    rng: StdRng,
}

impl NetworkAssignment {
    /// Builds the initial assignment for `agents`.
    pub fn build(config: &NetworkSamplingConfig, agents: &[AgentId]) -> Result<Self, MarlError> {
        let agents = sort_str_num(agents);
        let mut rng = StdRng::seed_from_u64(config.seed);

        let (setup, agent_net_keys) = match &config.sampler {
            NetworkSampler::FixedAgentNetworks => {
                let keys: BTreeMap<_, _> = agents
                    .iter()
                    .map(|agent| {
                        let key = if config.shared_weights {
                            format!("network_{}", agent.split('_').next().unwrap_or(agent.as_str()))
                        } else {
                            format!("network_{}", agent)
                        };
                        (agent.clone(), key)
                    })
                    .collect();
                let sample = agents.iter().map(|a| keys[a].clone()).collect();
                (vec![sample], keys)
            }
            NetworkSampler::RandomAgentNetworks => {
                if config.shared_weights {
                    return Err(MarlError::Configuration(
                        "shared weights cannot be used with random networks per agent".to_string(),
                    ));
                }
                let setup: Vec<Vec<String>> = (0..agents.len())
                    .map(|i| vec![format!("network_{}", i)])
                    .collect();
                let keys = agents
                    .iter()
                    .enumerate()
                    .map(|(i, agent)| (agent.clone(), format!("network_{}", i)))
                    .collect();
                (setup, keys)
            }
            NetworkSampler::Custom(setup) => {
                let keys = sample_new_agent_keys(&agents, setup, &mut rng)?;
                (setup.clone(), keys)
            }
        };

        if agents.len() != agent_net_keys.len() {
            return Err(MarlError::Configuration(format!(
                "{} agents but {} assigned network keys",
                agents.len(),
                agent_net_keys.len()
            )));
        }

        let sample_length = setup.first().map_or(0, Vec::len);
        if sample_length == 0 || agents.len() % sample_length != 0 {
            return Err(MarlError::Configuration(format!(
                "{} agents are not a multiple of the sample length {}",
                agents.len(),
                sample_length
            )));
        }
        if setup.iter().any(|s| s.len() != sample_length) {
            return Err(MarlError::Configuration(
                "all network samples must have the same length".to_string(),
            ));
        }

        let unique_net_keys = sort_str_num(setup.iter().flatten().unique());
        let net_keys_to_ids = unique_net_keys
            .iter()
            .enumerate()
            .map(|(i, k)| (k.clone(), i))
            .collect();
        info!("Network keys of agents: {:?}", agent_net_keys);

        Ok(Self {
            agents,
            setup,
            agent_net_keys,
            unique_net_keys,
            net_keys_to_ids,
            rng,
        })
    }

    /// Agents in natural order.
    pub fn agents(&self) -> &[AgentId] {
        &self.agents
    }

    /// Samples of network keys.
    pub fn setup(&self) -> &[Vec<String>] {
        &self.setup
    }

    /// Current network key of each agent.
    pub fn agent_net_keys(&self) -> &BTreeMap<AgentId, String> {
        &self.agent_net_keys
    }

    /// Every network key of the setup in natural order.
    pub fn unique_net_keys(&self) -> &[String] {
        &self.unique_net_keys
    }

    /// Index of each network key in [`Self::unique_net_keys`].
    pub fn net_keys_to_ids(&self) -> &BTreeMap<String, usize> {
        &self.net_keys_to_ids
    }

    /// Draws new network keys for the agents, typically at the start of an episode.
    pub fn resample(&mut self) -> Result<&BTreeMap<AgentId, String>, MarlError> {
        self.agent_net_keys = sample_new_agent_keys(&self.agents, &self.setup, &mut self.rng)?;
        Ok(&self.agent_net_keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agents(n: usize) -> Vec<AgentId> {
        (0..n).map(|i| format!("agent_{}", i)).collect()
    }

    #[test]
    fn test_natural_order() {
        assert_eq!(
            sort_str_num(["agent_10", "agent_2", "agent_1"]),
            vec!["agent_1", "agent_2", "agent_10"]
        );
    }

    #[test]
    fn test_fixed_without_shared_weights() {
        let config = NetworkSamplingConfig::default().shared_weights(false);
        let a = NetworkAssignment::build(&config, &agents(2)).unwrap();
        assert_eq!(a.agent_net_keys()["agent_1"], "network_agent_1");
        assert_eq!(a.net_keys_to_ids()["network_agent_0"], 0);
    }

    #[test]
    fn test_random_with_shared_weights_fails() {
        let config = NetworkSamplingConfig::default().sampler(NetworkSampler::RandomAgentNetworks);
        assert!(matches!(
            NetworkAssignment::build(&config, &agents(2)),
            Err(MarlError::Configuration(_))
        ));
    }

    #[test]
    fn test_random_resample_uses_known_keys() {
        let config = NetworkSamplingConfig::default()
            .sampler(NetworkSampler::RandomAgentNetworks)
            .shared_weights(false);
        let mut a = NetworkAssignment::build(&config, &agents(3)).unwrap();
        let unique = a.unique_net_keys().to_vec();
        for _ in 0..10 {
            let keys = a.resample().unwrap();
            assert_eq!(keys.len(), 3);
            assert!(keys.values().all(|k| unique.contains(k)));
        }
    }

    #[test]
    fn test_custom_sample_length_must_divide_agents() {
        let setup = vec![vec!["network_0".to_string(), "network_1".to_string()]];
        let config = NetworkSamplingConfig::default().sampler(NetworkSampler::Custom(setup));
        assert!(NetworkAssignment::build(&config, &agents(3)).is_err());
        let a = NetworkAssignment::build(&config, &agents(4)).unwrap();
        assert_eq!(a.agent_net_keys()["agent_2"], "network_0");
    }

    #[test]
    fn test_custom_samples_must_share_length() {
        let setup = vec![vec!["network_0".to_string()], vec!["network_1".to_string(), "network_2".to_string()]];
        let config = NetworkSamplingConfig::default().sampler(NetworkSampler::Custom(setup));
        assert!(NetworkAssignment::build(&config, &agents(2)).is_err());
    }
}
