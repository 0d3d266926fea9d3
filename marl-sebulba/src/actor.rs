//! Rollout collection on actor threads.
use crate::{error::SebulbaError, ParamsSource, Pipeline, RecordTimeTo, ThreadLifetime, TimingRecord};
use anyhow::Result;
use log::info;
use std::time::{Duration, Instant};

/// Output of resetting or stepping a batch of environments.
#[derive(Clone, Debug, PartialEq)]
pub struct EnvStep<O> {
    /// Observations of all environments.
    pub observation: O,

    /// Rewards, one per environment and agent.
    pub reward: Vec<f32>,

    /// Done flags, one per environment and agent.
    pub dones: Vec<bool>,
}

/// A batch of environments stepped together.
pub trait RolloutEnv {
    /// Observation of all environments.
    type Obs: Clone;

    /// Action for all environments.
    type Act;

    /// Resets the environments with one seed each.
    fn reset(&mut self, seeds: &[u64]) -> Result<EnvStep<Self::Obs>>;

    /// Steps the environments. Finished environments reset themselves.
    fn step(&mut self, act: &Self::Act) -> Result<EnvStep<Self::Obs>>;
}

/// Selects actions with the latest parameters.
pub trait RolloutPolicy<E: RolloutEnv> {
    /// Parameters published by the learner.
    type Params;

    /// Values stored with each step besides the action, e.g. log-probabilities.
    type Output;

    /// Selects actions for an observation.
    fn act(&mut self, params: &Self::Params, obs: &E::Obs) -> Result<(E::Act, Self::Output)>;
}

/// A step of a rollout.
#[derive(Clone, Debug, PartialEq)]
pub struct RolloutStep<O, A, X> {
    /// Done flags on which the action was selected.
    pub done: Vec<bool>,

    /// Observation on which the action was selected.
    pub observation: O,

    /// Selected action.
    pub action: A,

    /// Policy output stored with the action.
    pub policy_output: X,

    /// Reward received after the action.
    pub reward: Vec<f32>,
}

/// Steps of a rollout of environment `E` with policy `P`.
pub type Trajectory<E, P> = Vec<
    RolloutStep<
        <E as RolloutEnv>::Obs,
        <E as RolloutEnv>::Act,
        <P as RolloutPolicy<E>>::Output,
    >,
>;

/// Stats of an actor thread.
#[derive(Clone, Debug)]
pub struct ActorStat {
    /// Number of calls of [`RolloutEnv::step`].
    pub env_steps: usize,

    /// Number of rollouts accepted by the pipeline.
    pub rollouts: usize,

    /// Duration of the rollout loop.
    pub duration: Duration,
}

/// Returns a formatted string of the set of [`ActorStat`] for reporting.
pub fn actor_stats_fmt(stats: &[ActorStat]) -> String {
    let mut s = "actor id, env steps, rollouts, duration [sec], env steps per sec\n".to_string();
    for (i, stat) in stats.iter().enumerate() {
        let d = stat.duration.as_secs_f32();
        let p = stat.env_steps as f32 / d;
        s += format!("{}, {}, {}, {}, {}\n", i, stat.env_steps, stat.rollouts, d, p).as_str();
    }
    s
}

/// Collects rollouts until `lifetime` is stopped or the pipeline refuses them.
///
/// Each rollout has `rollout_length` steps. The latest parameters are read before every step,
/// so a rollout may mix parameter versions. The loop checks `lifetime` only between
/// rollouts. Timings are recorded under `single_rollout` and `env_step_time`.
#[allow(clippy::too_many_arguments)]
pub fn run_rollout<E, P>(
    actor_id: usize,
    env: &mut E,
    policy: &mut P,
    rollout_length: usize,
    seeds: &[u64],
    pipeline: &Pipeline<Trajectory<E, P>, E::Obs>,
    params_source: &ParamsSource<P::Params>,
    lifetime: &ThreadLifetime,
) -> Result<ActorStat>
where
    E: RolloutEnv,
    P: RolloutPolicy<E>,
{
    let start = Instant::now();
    let mut env_steps = 0;
    let mut rollouts = 0;

    let mut timestep = env.reset(seeds)?;
    let mut next_dones = timestep.dones.clone();
    info!("Actor {} starts rollouts", actor_id);

    while !lifetime.should_stop() {
        let mut trajectory = Vec::with_capacity(rollout_length);
        let mut single_rollout = vec![];
        let mut env_step_time = vec![];

        {
            let _timer = RecordTimeTo::new(&mut single_rollout);
            for _ in 0..rollout_length {
                let params = params_source.get();
                let observation = timestep.observation.clone();
                let done = std::mem::take(&mut next_dones);
                let (action, policy_output) = policy.act(&params, &observation)?;

                timestep = {
                    let _timer = RecordTimeTo::new(&mut env_step_time);
                    env.step(&action)?
                };
                env_steps += 1;
                next_dones = timestep.dones.clone();

                trajectory.push(RolloutStep {
                    done,
                    observation,
                    action,
                    policy_output,
                    reward: timestep.reward.clone(),
                });
            }
        }

        let timings = TimingRecord::from([
            ("single_rollout", single_rollout),
            ("env_step_time", env_step_time),
        ]);
        match pipeline.put(trajectory, timestep.observation.clone(), next_dones.clone(), timings) {
            Ok(()) => rollouts += 1,
            Err(SebulbaError::PipelineStopped) => {
                info!("Actor {} found the pipeline stopped", actor_id);
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }

    info!("Actor {} stopped after {} rollouts", actor_id, rollouts);
    Ok(ActorStat {
        env_steps,
        rollouts,
        duration: start.elapsed(),
    })
}
