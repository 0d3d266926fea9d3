#![warn(missing_docs)]
//! Actor/learner training with a bounded rollout queue.
//!
//! Actor threads collect rollouts with the latest parameters and put them into a
//! [`Pipeline`]. The learner thread takes rollouts from the pipeline, updates its state and
//! publishes new parameters to one [`ParamsSource`] per actor thread. Each thread owns a
//! [`ThreadLifetime`] used to stop it. [`run_sebulba`] wires everything up.
//!
//! * [`SebulbaConfig`] - Sizes, devices and seed of a run
//! * [`RolloutEnv`], [`RolloutPolicy`] - Environments and action selection of the actors
//! * [`Learn`] - Updates of the learner
//! * [`TimingRecord`] - Timings reported with the learner metrics
pub mod error;

mod actor;
mod config;
mod device;
mod learner;
mod lifetime;
mod params_source;
mod pipeline;
mod system;
mod timing;

pub use actor::{actor_stats_fmt, run_rollout, ActorStat, EnvStep, RolloutEnv, RolloutPolicy, RolloutStep, Trajectory};
pub use config::SebulbaConfig;
pub use device::Device;
pub use error::SebulbaError;
pub use learner::{run_learner, Learn, LearnerReport};
pub use lifetime::ThreadLifetime;
pub use params_source::ParamsSource;
pub use pipeline::{Pipeline, RolloutBatch};
pub use system::{run_sebulba, SebulbaStat};
pub use timing::{RecordTimeTo, TimingRecord};
