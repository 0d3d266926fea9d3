//! Types and traits for recording metrics of rollouts and learner updates.
//!
//! * [`Record`] - A container of key-value pairs of various data types
//! * [`RecordValue`] - The values that can be stored in a [`Record`]
//! * [`Recorder`] - Writes records to an output destination
//! * [`AggregateRecorder`] - Stores records and writes aggregated values
//! * [`RecordStorage`] - Aggregation of stored records
//! * [`BufferedRecorder`] - Keeps records in memory
//! * [`NullRecorder`] - Discards all records
//!
//! ```rust
//! use marl_core::record::{Record, RecordValue};
//!
//! let mut record = Record::empty();
//! record.insert("total_loss", RecordValue::Scalar(0.25));
//! record.insert("episode_return", RecordValue::Array1(vec![1.0, 2.0]));
//! assert_eq!(record.get_scalar("total_loss").unwrap(), 0.25);
//! ```
mod base;
mod buffered_recorder;
mod null_recorder;
mod recorder;
mod storage;

pub use base::{Record, RecordValue};
pub use buffered_recorder::BufferedRecorder;
pub use null_recorder::NullRecorder;
pub use recorder::{AggregateRecorder, Recorder};
pub use storage::RecordStorage;
