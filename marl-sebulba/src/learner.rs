//! Learner loop consuming rollouts from the pipeline.
use crate::{error::SebulbaError, ParamsSource, Pipeline, RecordTimeTo, RolloutBatch, TimingRecord};
use anyhow::{anyhow, Result};
use crossbeam_channel::Sender;
use log::{debug, info};
use marl_core::record::Record;
use std::sync::Arc;

/// Updates a learner state with a rollout.
pub trait Learn<T, O> {
    /// State of the learner, including parameters and optimizer state.
    type State: Clone;

    /// Parameters published to actors.
    type Params: Clone;

    /// Runs an update on a rollout and returns the new state with metrics.
    fn learn(&mut self, state: Self::State, batch: RolloutBatch<T, O>) -> Result<(Self::State, Record)>;

    /// Parameters of `state` used by actors.
    fn params(&self, state: &Self::State) -> Self::Params;
}

/// Results of the updates of one evaluation block.
#[derive(Clone, Debug)]
pub struct LearnerReport<S> {
    /// Index of the block.
    pub eval_step: usize,

    /// Metrics of each update.
    pub records: Vec<Record>,

    /// State after the last update of the block.
    pub state: S,

    /// Rollout timings of the consumed batches merged with `learner_blocked_time` and
    /// `learning_time`.
    pub timings: TimingRecord,
}

/// Runs `num_evaluation` blocks of `num_updates_per_eval` updates.
///
/// After each update the new parameters are published to every source. A report is sent at
/// the end of each block. Returns the final state, or `None` if the pipeline was stopped
/// before all updates were done.
pub fn run_learner<L, T, O>(
    learner: &mut L,
    mut state: L::State,
    num_evaluation: usize,
    num_updates_per_eval: usize,
    pipeline: &Pipeline<T, O>,
    params_sources: &[Arc<ParamsSource<L::Params>>],
    reports: &Sender<LearnerReport<L::State>>,
) -> Result<Option<L::State>>
where
    L: Learn<T, O>,
{
    info!("Learner starts");

    for eval_step in 0..num_evaluation {
        let mut records = Vec::with_capacity(num_updates_per_eval);
        let mut rollout_timings = Vec::with_capacity(num_updates_per_eval);
        let mut learner_blocked_time = vec![];
        let mut learning_time = vec![];

        for _ in 0..num_updates_per_eval {
            let batch = {
                let _timer = RecordTimeTo::new(&mut learner_blocked_time);
                pipeline.get(true)
            };
            let mut batch = match batch {
                Ok(Some(batch)) => batch,
                Ok(None) => return Err(anyhow!("blocking get returned no rollout")),
                Err(SebulbaError::PipelineStopped) => {
                    info!("Learner found the pipeline stopped at evaluation step {}", eval_step);
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            };
            rollout_timings.push(std::mem::take(&mut batch.timings));

            let (new_state, record) = {
                let _timer = RecordTimeTo::new(&mut learning_time);
                learner.learn(state, batch)?
            };
            state = new_state;
            records.push(record);

            let params = learner.params(&state);
            for source in params_sources.iter() {
                source.update(params.clone());
            }
        }

        let mut timings = TimingRecord::merge(rollout_timings);
        timings.extend(TimingRecord::from([
            ("learner_blocked_time", learner_blocked_time),
            ("learning_time", learning_time),
        ]));
        debug!("Learner finished evaluation step {}", eval_step);

        reports
            .send(LearnerReport {
                eval_step,
                records,
                state: state.clone(),
                timings,
            })
            .map_err(|_| anyhow!("receiver of learner reports dropped"))?;
    }

    info!("Learner finished");
    Ok(Some(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Device;
    use crossbeam_channel::unbounded;
    use marl_core::record::RecordValue;
    use test_log::test;

    /// Sums the trajectories it sees.
    struct SumLearner;

    impl Learn<Vec<u32>, u32> for SumLearner {
        type State = u32;
        type Params = u32;

        fn learn(&mut self, state: u32, batch: RolloutBatch<Vec<u32>, u32>) -> Result<(u32, Record)> {
            let state = state + batch.trajectory.iter().sum::<u32>();
            Ok((state, Record::from_scalar("state", state as f32)))
        }

        fn params(&self, state: &u32) -> u32 {
            *state
        }
    }

    fn filled_pipeline(n: usize) -> Pipeline<Vec<u32>, u32> {
        let p = Pipeline::new(n, vec![Device(0)]).unwrap();
        p.start();
        for i in 0..n {
            let timings = TimingRecord::from([("single_rollout", vec![0.5])]);
            p.put(vec![i as u32, 1], 0, vec![false], timings).unwrap();
        }
        p
    }

    #[test]
    fn test_reports_and_published_params() -> Result<()> {
        let pipeline = filled_pipeline(4);
        let sources: Vec<_> = (0..2).map(|_| Arc::new(ParamsSource::new(0, Device(0)))).collect();
        let (sender, receiver) = unbounded();

        let state = run_learner(&mut SumLearner, 0, 2, 2, &pipeline, &sources, &sender)?;
        assert_eq!(state, Some(10));
        for source in sources.iter() {
            assert_eq!(*source.get(), 10);
            assert_eq!(source.version(), 4);
        }

        let reports: Vec<_> = receiver.try_iter().collect();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].eval_step, 0);
        assert_eq!(reports[0].state, 3);
        assert_eq!(reports[1].state, 10);
        assert_eq!(reports[1].records[1].get("state"), Some(&RecordValue::Scalar(10.0)));
        assert_eq!(reports[1].timings.get("single_rollout"), &[0.5, 0.5]);
        assert_eq!(reports[1].timings.get("learning_time").len(), 2);
        assert_eq!(reports[1].timings.get("learner_blocked_time").len(), 2);
        Ok(())
    }

    #[test]
    fn test_stopped_pipeline_ends_learner() -> Result<()> {
        let pipeline = filled_pipeline(1);
        pipeline.stop();
        let (sender, receiver) = unbounded();

        let state = run_learner(&mut SumLearner, 0, 2, 2, &pipeline, &[], &sender)?;
        assert_eq!(state, None);
        assert_eq!(receiver.try_iter().count(), 0);
        Ok(())
    }
}
