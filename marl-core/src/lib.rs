#![warn(missing_docs)]
//! Core data path of multi-agent reinforcement learning systems.
//!
//! * [`Nest`] - Structured numeric containers keyed by agent
//! * [`adders`] - Turning episodes into n-step transitions routed to replay tables
//! * [`writer`] - Episode buffers and delivery of items to tables
//! * [`table`] - In-memory prioritized replay tables
//! * [`network_sampling`] - Assignment of networks to agents
//! * [`record`] - Metrics of rollouts and learner updates
pub mod adders;
pub mod error;
pub mod network_sampling;
pub mod record;
pub mod table;
pub mod writer;

mod nest;
pub use nest::{add_arrays, broadcast_shape, broadcast_to, mul_arrays, Nest};

mod types;
pub use error::MarlError;
pub use types::{AgentId, Extras, StepType, TimeStep, Transition};
