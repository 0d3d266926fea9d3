//! N-step transition adder.
use super::{
    routing::{agent_network_keys, calculate_priorities, match_agents, PriorityFns, TableRoute},
    Adder, NStepTransitionAdderConfig, DEFAULT_PRIORITY_TABLE,
};
use crate::{
    error::MarlError,
    writer::{StepRow, TrajectoryWriter},
    Extras, Nest, TimeStep, Transition,
};
use anyhow::Result;
use log::{trace, warn};
use std::collections::HashSet;

/// Collapses sequences of steps into n-step transitions.
///
/// For a window of `k` steps starting at `t` the transition is
/// `(s_t, e_t, a_t, R, D, s_{t+k}, e_{t+k})` with
///
/// * `R = r_t + g d_t r_{t+1} + ... + g^{k-1} d_t ... d_{t+k-2} r_{t+k-1}`
/// * `D = g^{k-1} d_t ... d_{t+k-1}`
///
/// where `g` is the agent discount and `d_i` the environment discounts. `D` carries one
/// application of `g` less than the window length, so a learner bootstrapping with its own
/// discount applies it once.
///
/// At the start of an episode windows of sizes `1, 2, ..., n_step - 1` are written before
/// the window reaches full size. When the last step is added the shrinking tail windows
/// of sizes `n_step - 1, ..., 1` are written and the adder resets.
pub struct NStepTransitionAdder<W> {
    n_step: usize,
    discount: Nest,
    max_in_flight_items: usize,
    routes: Vec<TableRoute>,
    first_idx: usize,
    last_idx: usize,
    started: bool,
    flagged_keys: HashSet<String>,
    writer: W,
}

fn column<'a>(col: &'a Option<Nest>, name: &str, ix: usize) -> Result<&'a Nest, MarlError> {
    col.as_ref()
        .ok_or_else(|| MarlError::Validation(format!("column {} of row {} is unset", name, ix)))
}

impl<W: TrajectoryWriter> NStepTransitionAdder<W> {
    /// Builds an adder writing into `writer`.
    ///
    /// Tables are the keys of `priority_fns`. If it is empty, transitions are written to
    /// [`DEFAULT_PRIORITY_TABLE`] with the uniform priority.
    pub fn build(config: &NStepTransitionAdderConfig, writer: W, priority_fns: PriorityFns) -> Result<Self> {
        if config.n_step < 1 {
            return Err(MarlError::Configuration(format!(
                "n_step must be at least 1, got {}",
                config.n_step
            ))
            .into());
        }

        let priority_fns = if priority_fns.is_empty() {
            PriorityFns::from([(DEFAULT_PRIORITY_TABLE.to_string(), None)])
        } else {
            priority_fns
        };

        if let Some(table_net_config) = &config.table_net_config {
            if let Some(table) = table_net_config.keys().find(|t| !priority_fns.contains_key(*t)) {
                return Err(MarlError::Configuration(format!(
                    "table {} has required network keys but no priority entry",
                    table
                ))
                .into());
            }
        }

        let routes = priority_fns
            .into_iter()
            .map(|(name, priority_fn)| TableRoute {
                required_keys: config
                    .table_net_config
                    .as_ref()
                    .and_then(|c| c.get(&name).cloned()),
                name,
                priority_fn,
            })
            .collect();

        Ok(Self {
            n_step: config.n_step,
            discount: Nest::scalar(config.discount),
            max_in_flight_items: config.max_in_flight_items,
            routes,
            first_idx: 0,
            last_idx: 0,
            started: false,
            flagged_keys: HashSet::new(),
            writer,
        })
    }

    /// Replaces the agent discount with a structure broadcast against rewards and discounts.
    pub fn with_discount(mut self, discount: Nest) -> Self {
        self.discount = discount;
        self
    }

    /// The underlying writer.
    pub fn writer(&self) -> &W {
        &self.writer
    }

    /// The underlying writer.
    pub fn writer_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Destination tables.
    pub fn routes(&self) -> &[TableRoute] {
        &self.routes
    }

    /// Start of the current window.
    pub fn first_idx(&self) -> usize {
        self.first_idx
    }

    /// End of the current window, exclusive for rewards and discounts.
    pub fn last_idx(&self) -> usize {
        self.last_idx
    }

    /// Size of the current window. Smaller than `n_step` at the edges of an episode.
    pub fn n_step_effective(&self) -> usize {
        self.last_idx - self.first_idx
    }

    /// Discounted return and cumulative discount of a window.
    pub fn compute_cumulative_quantities(&self, rewards: &[Nest], discounts: &[Nest]) -> Result<(Nest, Nest)> {
        if rewards.is_empty() || rewards.len() != discounts.len() {
            return Err(MarlError::StructureMismatch(format!(
                "{} rewards and {} discounts in a window",
                rewards.len(),
                discounts.len()
            ))
            .into());
        }

        let b = Nest::broadcast_structures(&[&rewards[0], &discounts[0], &self.discount])?;
        let self_discount = &b[2];
        let mut total_discount = b[1].clone();
        let mut n_step_return = b[0].add(&b[1].zeros_like())?;

        for (r, d) in rewards.iter().zip(discounts.iter()).skip(1) {
            total_discount = total_discount.mul(self_discount)?;
            n_step_return = n_step_return.add(&r.mul(&total_discount)?)?;
            total_discount = total_discount.mul(d)?;
        }

        Ok((n_step_return, total_discount))
    }

    fn write(&mut self) -> Result<()> {
        let (first, last) = (self.first_idx, self.last_idx);
        let history = self.writer.history();
        let (first_row, last_row) = match (history.get(first), history.get(last)) {
            (Some(f), Some(l)) => (f, l),
            _ => {
                return Err(MarlError::Validation(format!(
                    "window [{}, {}] is outside the {} buffered rows",
                    first,
                    last,
                    history.len()
                ))
                .into())
            }
        };

        let observation = column(&first_row.observation, "observation", first)?.clone();
        let action = column(&first_row.action, "action", first)?.clone();
        let extras = first_row.extras.clone().unwrap_or_default();
        let next_observation = column(&last_row.observation, "observation", last)?.clone();
        let next_extras = last_row.extras.clone().unwrap_or_default();

        let mut rewards = Vec::with_capacity(last - first);
        let mut discounts = Vec::with_capacity(last - first);
        for (ix, row) in history[first..last].iter().enumerate() {
            rewards.push(column(&row.reward, "reward", first + ix)?.clone());
            discounts.push(column(&row.discount, "discount", first + ix)?.clone());
        }

        let (n_step_return, total_discount) = self.compute_cumulative_quantities(&rewards, &discounts)?;

        // Inside write_last() the derived fields are the only data of the row
        let partial_step = self.writer.episode_steps() <= last;
        self.writer
            .append(StepRow::derived(n_step_return, total_discount), partial_step)?;

        let row = self.writer.history().last().cloned().unwrap_or_default();
        let last_ix = self.writer.history().len().saturating_sub(1);
        let transition = Transition {
            observation,
            extras,
            action,
            reward: column(&row.n_step_return, "n_step_return", last_ix)?.clone(),
            discount: column(&row.total_discount, "total_discount", last_ix)?.clone(),
            next_observation,
            next_extras,
        };
        trace!("Write window [{}, {})", first, last);

        let priorities = calculate_priorities(&self.routes, &transition);
        let agents = agent_network_keys(&transition);
        let mut created_item = false;

        for route in self.routes.iter() {
            let priority = priorities.get(&route.name).copied().unwrap_or(1.0);
            let item = match &route.required_keys {
                None => Some(transition.clone()),
                Some(required) => match_agents(&agents, required).map(|m| {
                    for key in m.ambiguous_keys {
                        if self.flagged_keys.insert(key.clone()) {
                            warn!(
                                "Network key {} is held by more agents than table {} requires ({:?}); \
                                 agents are matched in sorted order",
                                key, route.name, agents
                            );
                        }
                    }
                    transition.reindex(&m.mapping)
                }),
            };

            if let Some(item) = item {
                self.writer.create_item(&route.name, priority, item)?;
                created_item = true;
            }
        }
        self.writer.flush(self.max_in_flight_items)?;

        if !created_item {
            return Err(MarlError::Validation(format!(
                "transition of agents {:?} with network keys {:?} was not used by any table",
                transition.action.keys(),
                agents.iter().map(|(_, k)| k).collect::<Vec<_>>()
            ))
            .into());
        }

        Ok(())
    }

    fn write_last(&mut self) -> Result<()> {
        self.first_idx += 1;
        while self.first_idx < self.last_idx {
            self.write()?;
            self.first_idx += 1;
        }
        Ok(())
    }
}

impl<W: TrajectoryWriter> Adder for NStepTransitionAdder<W> {
    fn add_first(&mut self, timestep: TimeStep, extras: Extras) -> Result<()> {
        if !timestep.is_first() {
            return Err(MarlError::Configuration(
                "add_first() must be called with the first step of an episode".to_string(),
            )
            .into());
        }
        if self.started {
            self.reset()?;
        }

        self.writer
            .append(StepRow::observation(timestep.observation, extras), true)?;
        self.started = true;
        Ok(())
    }

    fn add(&mut self, action: Nest, next_timestep: TimeStep, next_extras: Extras) -> Result<()> {
        if !self.started {
            return Err(MarlError::Configuration(
                "add_first() must be called before add()".to_string(),
            )
            .into());
        }

        if self.writer.episode_steps() >= self.n_step {
            self.first_idx += 1;
        }
        self.last_idx += 1;

        let is_last = next_timestep.is_last();
        let dummy = is_last.then(|| {
            StepRow::action(
                action.zeros_like(),
                next_timestep.reward.zeros_like(),
                next_timestep.discount.zeros_like(),
            )
        });

        self.writer.append(
            StepRow::action(action, next_timestep.reward, next_timestep.discount),
            false,
        )?;
        self.writer
            .append(StepRow::observation(next_timestep.observation, next_extras), true)?;
        self.write()?;

        if let Some(dummy) = dummy {
            // Closes the row of the final observation
            self.writer.append(dummy, false)?;
            self.write_last()?;
            self.reset()?;
        }

        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.writer.end_episode()?;
        self.first_idx = 0;
        self.last_idx = 0;
        self.started = false;
        Ok(())
    }
}
