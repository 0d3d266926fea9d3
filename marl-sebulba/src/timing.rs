//! Wall-clock timings of rollouts and learner updates.
use marl_core::record::{Record, RecordValue};
use std::{collections::BTreeMap, time::Instant};

/// Durations in seconds, keyed by what was timed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TimingRecord(BTreeMap<String, Vec<f32>>);

impl<K: Into<String>, const N: usize> From<[(K, Vec<f32>); N]> for TimingRecord {
    fn from(entries: [(K, Vec<f32>); N]) -> Self {
        Self(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl TimingRecord {
    /// Creates an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a duration under `name`.
    pub fn push(&mut self, name: impl Into<String>, secs: f32) {
        self.0.entry(name.into()).or_default().push(secs);
    }

    /// Durations stored under `name`.
    pub fn get(&self, name: &str) -> &[f32] {
        self.0.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Names of the timed sections.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Mean duration under `name`, if any was stored.
    pub fn mean(&self, name: &str) -> Option<f32> {
        let vs = self.get(name);
        (!vs.is_empty()).then(|| vs.iter().sum::<f32>() / vs.len() as f32)
    }

    /// Mean duration of every section.
    pub fn means(&self) -> BTreeMap<String, f32> {
        self.0
            .keys()
            .filter_map(|k| Some((k.clone(), self.mean(k)?)))
            .collect()
    }

    /// Moves all durations of `other` into `self`.
    pub fn extend(&mut self, other: TimingRecord) {
        for (k, vs) in other.0 {
            self.0.entry(k).or_default().extend(vs);
        }
    }

    /// Concatenates the durations of several records.
    pub fn merge(records: impl IntoIterator<Item = TimingRecord>) -> Self {
        let mut merged = Self::new();
        records.into_iter().for_each(|r| merged.extend(r));
        merged
    }

    /// Mean durations as scalar values of a [`Record`].
    pub fn to_record(&self) -> Record {
        let mut record = Record::empty();
        for (k, v) in self.means() {
            record.insert(k, RecordValue::Scalar(v));
        }
        record
    }
}

/// Pushes the time elapsed between its creation and drop into a list of seconds.
///
/// ```rust
/// use marl_sebulba::RecordTimeTo;
///
/// let mut env_step_time = vec![];
/// {
///     let _timer = RecordTimeTo::new(&mut env_step_time);
/// }
/// assert_eq!(env_step_time.len(), 1);
/// ```
pub struct RecordTimeTo<'a> {
    start: Instant,
    target: &'a mut Vec<f32>,
}

impl<'a> RecordTimeTo<'a> {
    /// Starts timing.
    pub fn new(target: &'a mut Vec<f32>) -> Self {
        Self {
            start: Instant::now(),
            target,
        }
    }
}

impl Drop for RecordTimeTo<'_> {
    fn drop(&mut self) {
        self.target.push(self.start.elapsed().as_secs_f32());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_means_and_merge() {
        let a = TimingRecord::from([("single_rollout", vec![1.0, 3.0])]);
        let b = TimingRecord::from([("single_rollout", vec![2.0]), ("env_step_time", vec![0.5])]);
        let merged = TimingRecord::merge([a, b]);

        assert_eq!(merged.mean("single_rollout"), Some(2.0));
        assert_eq!(merged.mean("missing"), None);
        let record = merged.to_record();
        assert_eq!(record.get_scalar("env_step_time").unwrap(), 0.5);
    }

    #[test]
    fn test_nested_timers() {
        let mut outer = vec![];
        let mut inner = vec![];
        {
            let _t = RecordTimeTo::new(&mut outer);
            for _ in 0..3 {
                let _t = RecordTimeTo::new(&mut inner);
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
        }
        assert_eq!(inner.len(), 3);
        assert!(outer[0] >= inner.iter().sum::<f32>() * 0.9);
    }
}
