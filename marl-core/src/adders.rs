//! Adders turning environment steps into replay items.
//!
//! An [`Adder`] receives the steps of an episode one at a time and writes items built from
//! them to replay tables through a [`TrajectoryWriter`](crate::writer::TrajectoryWriter).
//!
//! ```rust
//! use marl_core::{
//!     adders::{routing::uniform_priorities, Adder, NStepTransitionAdder, NStepTransitionAdderConfig},
//!     table::{PriorityTable, PriorityTableConfig},
//!     writer::EpisodeWriter,
//!     Extras, Nest, TimeStep,
//! };
//! use std::sync::{Arc, Mutex};
//!
//! # fn main() -> anyhow::Result<()> {
//! let table = Arc::new(Mutex::new(PriorityTable::build(&PriorityTableConfig::default())?));
//! let writer = EpisodeWriter::new([table.clone()])?;
//! let config = NStepTransitionAdderConfig::default().n_step(2);
//! let mut adder = NStepTransitionAdder::build(&config, writer, uniform_priorities(&["priority_table"]))?;
//!
//! let obs = |v| Nest::map([("agent_0", Nest::scalar(v))]);
//! adder.add_first(TimeStep::first(obs(0.0)), Extras::default())?;
//! adder.add(obs(0.0), TimeStep::mid(obs(1.0), obs(1.0), obs(1.0)), Extras::default())?;
//! adder.add(obs(0.0), TimeStep::last(obs(2.0), obs(1.0), obs(0.0)), Extras::default())?;
//! assert_eq!(table.lock().unwrap().len(), 3);
//! # Ok(())
//! # }
//! ```
mod config;
pub mod routing;
mod transition;
use crate::{Extras, Nest, TimeStep};
use anyhow::Result;
pub use config::NStepTransitionAdderConfig;
pub use transition::NStepTransitionAdder;

/// Table used when no priority function is given.
pub const DEFAULT_PRIORITY_TABLE: &str = "priority_table";

/// Writes items built from the steps of episodes.
pub trait Adder {
    /// Starts an episode with its first step.
    fn add_first(&mut self, timestep: TimeStep, extras: Extras) -> Result<()>;

    /// Records `action` taken on the previous step and the resulting step.
    ///
    /// The episode ends when `next_timestep` is the last step.
    fn add(&mut self, action: Nest, next_timestep: TimeStep, next_extras: Extras) -> Result<()>;

    /// Drops the current episode after writing queued items.
    fn reset(&mut self) -> Result<()>;
}
