//! Runs actor threads and a learner thread connected by a [`Pipeline`].
use crate::{
    actor::{run_rollout, ActorStat, RolloutEnv, RolloutPolicy, Trajectory},
    error::SebulbaError,
    learner::{run_learner, Learn, LearnerReport},
    Device, ParamsSource, Pipeline, SebulbaConfig, ThreadLifetime,
};
use anyhow::{anyhow, Result};
use crossbeam_channel::unbounded;
use log::{error, info};
use marl_core::record::{AggregateRecorder, Record, RecordValue};
use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

/// Result of [`run_sebulba`].
#[derive(Debug)]
pub struct SebulbaStat<S> {
    /// Learner state after the last update.
    pub state: S,

    /// Stats of the actor threads, ordered by actor id.
    pub actor_stats: Vec<ActorStat>,

    /// Wall-clock duration of the run.
    pub duration: Duration,
}

fn join<T>(handle: JoinHandle<Result<T>>) -> Result<T> {
    let name = handle.thread().name().unwrap_or("unnamed").to_string();
    handle
        .join()
        .map_err(|_| SebulbaError::ThreadPanicked(name))?
}

/// Stops the pipeline when the thread holding it unwinds.
struct StopOnPanic<T, O>(Arc<Pipeline<T, O>>);

impl<T, O> Drop for StopOnPanic<T, O> {
    fn drop(&mut self) {
        if thread::panicking() {
            error!(
                "Thread {} panicked",
                thread::current().name().unwrap_or("unnamed")
            );
            self.0.stop();
        }
    }
}

/// Stops every thread started so far and waits for them.
fn abort<T, O, R>(
    lifetimes: &[ThreadLifetime],
    pipeline: &Pipeline<T, O>,
    handles: Vec<JoinHandle<Result<R>>>,
) {
    lifetimes.iter().for_each(ThreadLifetime::stop);
    pipeline.stop();
    for handle in handles {
        if let Err(e) = join(handle) {
            error!("{}", e);
        }
    }
}

#[cfg_attr(doc, aquamarine::aquamarine)]
/// Trains with actor threads feeding a learner thread.
///
/// 1. Validates `config` and starts a [`Pipeline`] of capacity `pipeline_queue_size`.
/// 2. For each executor device, spawns `n_threads_per_executor` actor threads named
///    `Actor-<n>`. Each one builds its environment with `env_factory(n)` and its policy with
///    `policy_factory(n)`, owns a [`ParamsSource`] and a [`ThreadLifetime`], and runs
///    [`run_rollout`] with seeds `seed + n * num_envs + i`.
/// 3. Spawns the `Learner` thread running [`run_learner`] for `num_evaluation` blocks of
///    `num_updates_per_eval` updates.
/// 4. For each learner report, stores the update records, the mean timings and
///    `steps_per_second` in `recorder` and flushes it at step
///    `steps_per_rollout * (eval_step + 1)`.
/// 5. Stops all lifetimes, stops the pipeline and joins every thread.
///
/// An actor failing or panicking stops the pipeline, which ends the learner and the run. The
/// first error of a thread is returned after the shutdown. If a thread cannot be spawned, the
/// threads already running are stopped and joined before the error is returned.
///
/// ```mermaid
/// flowchart LR
///   A0[Actor-0] -- put --> P[Pipeline]
///   A1[Actor-1] -- put --> P
///   P -- get --> L[Learner]
///   L -- update --> S0[ParamsSource 0]
///   L -- update --> S1[ParamsSource 1]
///   S0 -- get --> A0
///   S1 -- get --> A1
///   L -- LearnerReport --> M[Main thread]
///   M -- store/flush --> R[AggregateRecorder]
/// ```
pub fn run_sebulba<E, P, L, FE, FP>(
    config: &SebulbaConfig,
    env_factory: FE,
    policy_factory: FP,
    mut learner: L,
    init_state: L::State,
    recorder: &mut impl AggregateRecorder,
) -> Result<SebulbaStat<L::State>>
where
    E: RolloutEnv + 'static,
    E::Obs: Send + 'static,
    E::Act: Send + 'static,
    P: RolloutPolicy<E> + 'static,
    P::Output: Send + 'static,
    P::Params: Clone + Send + Sync + 'static,
    L: Learn<Trajectory<E, P>, E::Obs, Params = P::Params> + Send + 'static,
    L::State: Send + 'static,
    FE: Fn(usize) -> Result<E> + Send + Sync + 'static,
    FP: Fn(usize) -> Result<P> + Send + Sync + 'static,
{
    config.validate()?;
    let start = Instant::now();
    let num_updates_per_eval = config.num_updates_per_eval();
    let steps_per_rollout = config.steps_per_rollout();

    let pipeline = Arc::new(Pipeline::new(
        config.pipeline_queue_size,
        config.learner_devices(),
    )?);
    pipeline.start();

    let env_factory = Arc::new(env_factory);
    let policy_factory = Arc::new(policy_factory);
    let init_params = learner.params(&init_state);
    let n = config.n_threads_per_executor;
    let mut params_sources = vec![];
    let mut lifetimes = vec![];
    let mut actors = vec![];

    for (d_idx, &device_id) in config.executor_device_ids.iter().enumerate() {
        for thread_id in 0..n {
            let actor_id = thread_id + d_idx * n;
            let source = Arc::new(ParamsSource::new(init_params.clone(), Device(device_id)));
            let lifetime = ThreadLifetime::new();
            let seeds: Vec<u64> = (0..config.num_envs)
                .map(|i| config.seed + (actor_id * config.num_envs + i) as u64)
                .collect();
            params_sources.push(source.clone());
            lifetimes.push(lifetime.clone());

            let (actor_pipeline, env_factory, policy_factory) =
                (pipeline.clone(), env_factory.clone(), policy_factory.clone());
            let rollout_length = config.rollout_length;
            let spawned = thread::Builder::new()
                .name(format!("Actor-{}", actor_id))
                .spawn(move || {
                    let _guard = StopOnPanic(actor_pipeline.clone());
                    let result = env_factory(actor_id).and_then(|mut env| {
                        let mut policy = policy_factory(actor_id)?;
                        run_rollout(
                            actor_id,
                            &mut env,
                            &mut policy,
                            rollout_length,
                            &seeds,
                            &actor_pipeline,
                            &source,
                            &lifetime,
                        )
                    });
                    if let Err(e) = &result {
                        error!("Actor {} failed: {}", actor_id, e);
                        actor_pipeline.stop();
                    }
                    result
                });
            match spawned {
                Ok(handle) => actors.push(handle),
                Err(e) => {
                    abort(&lifetimes, &pipeline, actors);
                    return Err(e.into());
                }
            }
        }
    }
    info!("Started {} actor threads", actors.len());

    let (sender, receiver) = unbounded::<LearnerReport<L::State>>();
    let spawned = {
        let pipeline = pipeline.clone();
        let params_sources = params_sources.clone();
        let num_evaluation = config.num_evaluation;
        thread::Builder::new()
            .name("Learner".to_string())
            .spawn(move || {
                let _guard = StopOnPanic(pipeline.clone());
                let result = run_learner(
                    &mut learner,
                    init_state,
                    num_evaluation,
                    num_updates_per_eval,
                    &pipeline,
                    &params_sources,
                    &sender,
                );
                if let Err(e) = &result {
                    error!("Learner failed: {}", e);
                    pipeline.stop();
                }
                result
            })
    };
    let learner_handle = match spawned {
        Ok(handle) => handle,
        Err(e) => {
            abort(&lifetimes, &pipeline, actors);
            return Err(e.into());
        }
    };

    let mut eval_start = Instant::now();
    for report in receiver.iter().take(config.num_evaluation) {
        for record in report.records {
            recorder.store(record);
        }
        let secs = eval_start.elapsed().as_secs_f32();
        let steps_per_second = (steps_per_rollout * config.n_actor_threads()) as f32 / secs;
        let mut record = report.timings.to_record();
        record.insert("steps_per_second", RecordValue::Scalar(steps_per_second));
        recorder.store(record);
        recorder.flush((steps_per_rollout * (report.eval_step + 1)) as i64);
        info!(
            "Evaluation step {}/{} done, {:.1} steps/sec",
            report.eval_step + 1,
            config.num_evaluation,
            steps_per_second
        );
        eval_start = Instant::now();
    }

    info!("Shutting down");
    lifetimes.iter().for_each(ThreadLifetime::stop);
    pipeline.stop();

    let state = join(learner_handle);
    let actor_stats: Vec<_> = actors.into_iter().map(join).collect();
    let actor_stats = actor_stats.into_iter().collect::<Result<Vec<_>>>()?;
    let state = state?.ok_or_else(|| anyhow!("learner stopped before the last update"))?;

    let duration = start.elapsed();
    let mut record = Record::empty();
    record.insert("duration", RecordValue::Scalar(duration.as_secs_f32()));
    recorder.store(record);
    recorder.flush((steps_per_rollout * config.num_evaluation) as i64);
    info!("Finished in {:.1} sec", duration.as_secs_f32());

    Ok(SebulbaStat {
        state,
        actor_stats,
        duration,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TimingRecord;
    use test_log::test;

    #[test]
    fn test_abort_stops_and_joins_running_threads() {
        let pipeline = Arc::new(Pipeline::<u32, u32>::new(1, vec![Device(0)]).unwrap());
        pipeline.start();
        let lifetimes: Vec<_> = (0..2).map(|_| ThreadLifetime::new()).collect();

        // One thread waits on its lifetime, the other blocks on a full pipeline
        let handles: Vec<JoinHandle<Result<usize>>> = lifetimes
            .iter()
            .cloned()
            .enumerate()
            .map(|(i, lifetime)| {
                let pipeline = pipeline.clone();
                thread::spawn(move || {
                    let mut n = 0;
                    while !lifetime.should_stop() {
                        if i == 1 && pipeline.put(0, 0, vec![], TimingRecord::new()).is_err() {
                            break;
                        }
                        n += 1;
                        thread::yield_now();
                    }
                    Ok::<_, anyhow::Error>(n)
                })
            })
            .collect();

        abort(&lifetimes, &pipeline, handles);
        assert!(lifetimes.iter().all(ThreadLifetime::should_stop));
        assert!(!pipeline.is_running());
    }

    #[test]
    fn test_stop_on_panic() {
        let pipeline = Arc::new(Pipeline::<u32, u32>::new(1, vec![]).unwrap());
        pipeline.start();

        let handle = {
            let pipeline = pipeline.clone();
            thread::spawn(move || {
                let _guard = StopOnPanic(pipeline);
                panic!("worker failed");
            })
        };
        assert!(handle.join().is_err());
        assert!(!pipeline.is_running());

        // Dropping the guard without a panic keeps the pipeline running
        let running = Arc::new(Pipeline::<u32, u32>::new(1, vec![]).unwrap());
        running.start();
        drop(StopOnPanic(running.clone()));
        assert!(running.is_running());
    }
}
