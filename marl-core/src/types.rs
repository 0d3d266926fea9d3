//! Timesteps, extras and transitions.
use crate::Nest;
use std::collections::BTreeMap;

/// Identifier of an agent, e.g. `agent_0`.
pub type AgentId = String;

/// Position of a timestep in an episode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepType {
    /// The first step, holding the initial observation.
    First,

    /// An intermediate step.
    Mid,

    /// The terminal step.
    Last,
}

/// A step of a multi-agent environment.
///
/// `reward` and `discount` are the values received on transitioning into this step.
/// They are ignored for [`StepType::First`].
#[derive(Clone, Debug, PartialEq)]
pub struct TimeStep {
    /// Position in the episode.
    pub step_type: StepType,

    /// Observations keyed by agent.
    pub observation: Nest,

    /// Rewards keyed by agent.
    pub reward: Nest,

    /// Environment discounts keyed by agent.
    pub discount: Nest,
}

impl TimeStep {
    /// The first step of an episode.
    pub fn first(observation: Nest) -> Self {
        let reward = observation.zeros_like();
        let discount = observation.zeros_like();
        Self {
            step_type: StepType::First,
            observation,
            reward,
            discount,
        }
    }

    /// An intermediate step.
    pub fn mid(observation: Nest, reward: Nest, discount: Nest) -> Self {
        Self {
            step_type: StepType::Mid,
            observation,
            reward,
            discount,
        }
    }

    /// The terminal step.
    pub fn last(observation: Nest, reward: Nest, discount: Nest) -> Self {
        Self {
            step_type: StepType::Last,
            observation,
            reward,
            discount,
        }
    }

    /// Returns `true` for the first step.
    pub fn is_first(&self) -> bool {
        self.step_type == StepType::First
    }

    /// Returns `true` for the terminal step.
    pub fn is_last(&self) -> bool {
        self.step_type == StepType::Last
    }
}

/// Additional data stored with a step.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Extras {
    /// Network key used by each agent in the current episode.
    pub network_keys: BTreeMap<AgentId, String>,

    /// Any other per-step values, e.g. policy states.
    pub values: BTreeMap<String, Nest>,
}

impl Extras {
    /// Extras with the given network keys and no other values.
    pub fn with_network_keys<A, K, I>(keys: I) -> Self
    where
        A: Into<AgentId>,
        K: Into<String>,
        I: IntoIterator<Item = (A, K)>,
    {
        Self {
            network_keys: keys.into_iter().map(|(a, k)| (a.into(), k.into())).collect(),
            values: BTreeMap::new(),
        }
    }

    /// Adds a value.
    pub fn value(mut self, name: impl Into<String>, v: Nest) -> Self {
        self.values.insert(name.into(), v);
        self
    }
}

/// An n-step transition.
///
/// `reward` is the discounted n-step return and `discount` the cumulative discount of the window.
#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    /// Observation at the start of the window.
    pub observation: Nest,

    /// Extras at the start of the window.
    pub extras: Extras,

    /// Action taken at the start of the window.
    pub action: Nest,

    /// N-step return.
    pub reward: Nest,

    /// Cumulative discount.
    pub discount: Nest,

    /// Observation at the end of the window.
    pub next_observation: Nest,

    /// Extras at the end of the window.
    pub next_extras: Extras,
}

fn permute_nest(nest: &Nest, mapping: &BTreeMap<AgentId, AgentId>) -> Nest {
    match nest {
        Nest::Map(m) => Nest::Map(
            mapping
                .iter()
                .filter_map(|(slot, src)| Some((slot.clone(), m.get(src)?.clone())))
                .collect(),
        ),
        leaf => leaf.clone(),
    }
}

fn permute_keys(
    keys: &BTreeMap<AgentId, String>,
    mapping: &BTreeMap<AgentId, AgentId>,
) -> BTreeMap<AgentId, String> {
    mapping
        .iter()
        .filter_map(|(slot, src)| Some((slot.clone(), keys.get(src)?.clone())))
        .collect()
}

impl Transition {
    /// Returns the transition with agent data moved between slots.
    ///
    /// `mapping` maps a destination agent slot to the agent whose data it receives. Slots
    /// absent from `mapping` are dropped. Per-agent maps of the observations, action,
    /// reward, discount and the network keys of both extras are permuted.
    pub fn reindex(&self, mapping: &BTreeMap<AgentId, AgentId>) -> Transition {
        Transition {
            observation: permute_nest(&self.observation, mapping),
            extras: Extras {
                network_keys: permute_keys(&self.extras.network_keys, mapping),
                values: self.extras.values.clone(),
            },
            action: permute_nest(&self.action, mapping),
            reward: permute_nest(&self.reward, mapping),
            discount: permute_nest(&self.discount, mapping),
            next_observation: permute_nest(&self.next_observation, mapping),
            next_extras: Extras {
                network_keys: permute_keys(&self.next_extras.network_keys, mapping),
                values: self.next_extras.values.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reindex_swaps_agents() {
        let obs = Nest::map([("agent_0", Nest::scalar(0.0)), ("agent_1", Nest::scalar(1.0))]);
        let extras = Extras::with_network_keys([("agent_0", "network_b"), ("agent_1", "network_a")]);
        let t = Transition {
            observation: obs.clone(),
            extras: extras.clone(),
            action: obs.clone(),
            reward: obs.clone(),
            discount: obs.clone(),
            next_observation: obs.clone(),
            next_extras: extras,
        };
        let mapping = BTreeMap::from([
            ("agent_0".to_string(), "agent_1".to_string()),
            ("agent_1".to_string(), "agent_0".to_string()),
        ]);
        let r = t.reindex(&mapping);
        assert_eq!(r.action.get("agent_0").and_then(Nest::as_scalar), Some(1.0));
        assert_eq!(r.reward.get("agent_1").and_then(Nest::as_scalar), Some(0.0));
        assert_eq!(r.extras.network_keys["agent_0"], "network_a");
    }

    #[test]
    fn test_reindex_drops_unmapped_slots() {
        let obs = Nest::map([("agent_0", Nest::scalar(0.0)), ("agent_1", Nest::scalar(1.0))]);
        let extras = Extras::with_network_keys([("agent_0", "network_b"), ("agent_1", "network_a")]);
        let t = Transition {
            observation: obs.clone(),
            extras: extras.clone(),
            action: obs.clone(),
            reward: obs.clone(),
            discount: obs.clone(),
            next_observation: obs,
            next_extras: extras,
        };
        let mapping = BTreeMap::from([("agent_0".to_string(), "agent_1".to_string())]);
        let r = t.reindex(&mapping);
        assert_eq!(r.action, Nest::map([("agent_0", Nest::scalar(1.0))]));
        assert_eq!(r.next_observation.keys(), vec!["agent_0".to_string()]);
        assert_eq!(
            r.next_extras.network_keys,
            BTreeMap::from([("agent_0".to_string(), "network_a".to_string())])
        );
    }
}
