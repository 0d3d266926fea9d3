//! Routing of transitions to replay tables.
//!
//! Each destination table is described by a [`TableRoute`]: its name, the network keys a
//! transition must hold to be written to it and the function computing its priority.
//! A table with required keys `[k_0, k_1, ...]` accepts a transition if every `k_i` can be
//! matched to a distinct agent holding it. The transition written to the table is reindexed so
//! that the `i`-th agent (in sorted order) holds the data of the agent matched to `k_i`.
use crate::{AgentId, Transition};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::Arc,
};

/// Computes the priority of a transition.
pub type PriorityFn = Arc<dyn Fn(&Transition) -> f64 + Send + Sync>;

/// Priority functions keyed by table name. `None` gives the uniform priority `1.0`.
pub type PriorityFns = BTreeMap<String, Option<PriorityFn>>;

/// Priority functions giving the uniform priority to each of the given tables.
pub fn uniform_priorities<S: AsRef<str>>(tables: &[S]) -> PriorityFns {
    tables
        .iter()
        .map(|t| (t.as_ref().to_string(), None))
        .collect()
}

/// A destination table of transitions.
#[derive(Clone)]
pub struct TableRoute {
    /// Name of the table.
    pub name: String,

    /// Network keys a transition must hold. `None` accepts every transition unchanged.
    pub required_keys: Option<Vec<String>>,

    /// Priority of transitions written to the table.
    pub priority_fn: Option<PriorityFn>,
}

impl fmt::Debug for TableRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableRoute")
            .field("name", &self.name)
            .field("required_keys", &self.required_keys)
            .field("priority_fn", &self.priority_fn.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl TableRoute {
    /// Priority of `transition` in this table.
    pub fn priority(&self, transition: &Transition) -> f64 {
        self.priority_fn.as_ref().map_or(1.0, |f| f(transition))
    }
}

/// Priority of `transition` for every table.
pub fn calculate_priorities(routes: &[TableRoute], transition: &Transition) -> BTreeMap<String, f64> {
    routes
        .iter()
        .map(|r| (r.name.clone(), r.priority(transition)))
        .collect()
}

/// Agents of a transition in sorted order with their network keys.
///
/// Agents are the keys of the action. Agents without a recorded network key are skipped.
pub fn agent_network_keys(transition: &Transition) -> Vec<(AgentId, String)> {
    // Keys of a `Nest::Map` are already sorted
    transition
        .action
        .keys()
        .into_iter()
        .filter_map(|agent| {
            let key = transition.extras.network_keys.get(&agent)?.clone();
            Some((agent, key))
        })
        .collect()
}

/// Result of matching required network keys against the agents of a transition.
#[derive(Clone, Debug, PartialEq)]
pub struct AgentMatch {
    /// Destination slot to source agent.
    pub mapping: BTreeMap<AgentId, AgentId>,

    /// Required keys held by more agents than the table asks for.
    pub ambiguous_keys: Vec<String>,
}

/// Matches `required` keys to agents.
///
/// Each required key consumes the first agent in sorted order that holds it and was not
/// consumed before. Returns `None` if a required key cannot be matched.
pub fn match_agents(agents: &[(AgentId, String)], required: &[String]) -> Option<AgentMatch> {
    let mut used = vec![false; agents.len()];
    let mut mapping = BTreeMap::new();

    for (i, key) in required.iter().enumerate() {
        let j = agents
            .iter()
            .enumerate()
            .position(|(j, (_, k))| !used[j] && k == key)?;
        used[j] = true;
        let slot = agents.get(i)?.0.clone();
        mapping.insert(slot, agents[j].0.clone());
    }

    let ambiguous_keys = required
        .iter()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .filter(|key| {
            let held = agents.iter().filter(|(_, k)| k == *key).count();
            let asked = required.iter().filter(|k| k == key).count();
            held > asked
        })
        .cloned()
        .collect();

    Some(AgentMatch {
        mapping,
        ambiguous_keys,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agents(keys: &[&str]) -> Vec<(AgentId, String)> {
        keys.iter()
            .enumerate()
            .map(|(i, k)| (format!("agent_{}", i), k.to_string()))
            .collect()
    }

    fn keys(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn test_match_permutes_slots() {
        let m = match_agents(&agents(&["network_b", "network_a"]), &keys(&["network_a", "network_b"]))
            .unwrap();
        assert_eq!(m.mapping["agent_0"], "agent_1");
        assert_eq!(m.mapping["agent_1"], "agent_0");
        assert!(m.ambiguous_keys.is_empty());
    }

    #[test]
    fn test_unmatched_key() {
        let m = match_agents(&agents(&["network_a", "network_a"]), &keys(&["network_a", "network_b"]));
        assert_eq!(m, None);
    }

    #[test]
    fn test_shared_key_is_matched_as_multiset() {
        let m = match_agents(
            &agents(&["network_a", "network_a", "network_b"]),
            &keys(&["network_a", "network_a", "network_b"]),
        )
        .unwrap();
        assert_eq!(m.mapping["agent_0"], "agent_0");
        assert_eq!(m.mapping["agent_1"], "agent_1");
        assert_eq!(m.mapping["agent_2"], "agent_2");
    }

    #[test]
    fn test_ambiguous_key_is_reported() {
        let m = match_agents(&agents(&["network_a", "network_a"]), &keys(&["network_a"])).unwrap();
        assert_eq!(m.ambiguous_keys, vec!["network_a".to_string()]);
        assert_eq!(m.mapping.len(), 1);
    }
}
