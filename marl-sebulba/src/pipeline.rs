//! Bounded queue of rollouts between actor threads and the learner.
use crate::{error::SebulbaError, Device, TimingRecord};
use crossbeam_channel::{bounded, select, Receiver, Sender, TryRecvError};
use log::info;
use std::sync::{
    atomic::{AtomicU8, Ordering},
    Mutex, PoisonError,
};

/// A rollout handed from an actor to the learner.
#[derive(Clone, Debug, PartialEq)]
pub struct RolloutBatch<T, O> {
    /// Steps of the rollout.
    pub trajectory: T,

    /// Observation following the last step, used for bootstrapping.
    pub last_observation: O,

    /// Done flags following the last step, one per environment and agent.
    pub last_dones: Vec<bool>,

    /// Timings of the rollout.
    pub timings: TimingRecord,
}

const CREATED: u8 = 0;
const RUNNING: u8 = 1;
const STOPPED: u8 = 2;

/// A bounded FIFO of [`RolloutBatch`]es shared by actor threads and the learner thread.
///
/// [`Pipeline::put`] blocks while the queue is full and [`Pipeline::get`] blocks while it is
/// empty. [`Pipeline::stop`] wakes up every blocked call. After a stop, `put` fails and `get`
/// returns the items still queued before failing with [`SebulbaError::PipelineStopped`].
pub struct Pipeline<T, O> {
    capacity: usize,
    sender: Sender<RolloutBatch<T, O>>,
    receiver: Receiver<RolloutBatch<T, O>>,

    /// Dropped on stop, which disconnects `shutdown_receiver`.
    shutdown_sender: Mutex<Option<Sender<()>>>,
    shutdown_receiver: Receiver<()>,

    state: AtomicU8,
    learner_devices: Vec<Device>,
}

impl<T, O> Pipeline<T, O> {
    /// Creates a pipeline holding at most `capacity` items.
    pub fn new(capacity: usize, learner_devices: Vec<Device>) -> Result<Self, SebulbaError> {
        if capacity == 0 {
            return Err(SebulbaError::Configuration(
                "capacity of the pipeline must be positive".to_string(),
            ));
        }
        let (sender, receiver) = bounded(capacity);
        let (shutdown_sender, shutdown_receiver) = bounded(0);

        Ok(Self {
            capacity,
            sender,
            receiver,
            shutdown_sender: Mutex::new(Some(shutdown_sender)),
            shutdown_receiver,
            state: AtomicU8::new(CREATED),
            learner_devices,
        })
    }

    /// Starts accepting items.
    pub fn start(&self) {
        if self
            .state
            .compare_exchange(CREATED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            info!("Started pipeline with capacity {}", self.capacity);
        }
    }

    /// Stops the pipeline and wakes up blocked calls.
    pub fn stop(&self) {
        if self.state.swap(STOPPED, Ordering::AcqRel) != STOPPED {
            let sender = self
                .shutdown_sender
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            drop(sender);
            info!("Stopped pipeline with {} items queued", self.len());
        }
    }

    /// Returns `true` between [`Pipeline::start`] and [`Pipeline::stop`].
    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) == RUNNING
    }

    fn check_state(&self) -> Result<(), SebulbaError> {
        match self.state.load(Ordering::Acquire) {
            CREATED => Err(SebulbaError::PipelineNotStarted),
            RUNNING => Ok(()),
            _ => Err(SebulbaError::PipelineStopped),
        }
    }

    /// Enqueues a rollout, blocking while the pipeline is full.
    pub fn put(
        &self,
        trajectory: T,
        last_observation: O,
        last_dones: Vec<bool>,
        timings: TimingRecord,
    ) -> Result<(), SebulbaError> {
        self.check_state()?;
        let batch = RolloutBatch {
            trajectory,
            last_observation,
            last_dones,
            timings,
        };

        select! {
            send(self.sender, batch) -> res => res.map_err(|_| SebulbaError::PipelineStopped),
            recv(self.shutdown_receiver) -> _ => Err(SebulbaError::PipelineStopped),
        }
    }

    /// Dequeues the oldest rollout.
    ///
    /// With `block` the call waits for an item and never returns `Ok(None)`. Without it
    /// `Ok(None)` is returned when the pipeline is empty.
    pub fn get(&self, block: bool) -> Result<Option<RolloutBatch<T, O>>, SebulbaError> {
        match self.check_state() {
            Err(SebulbaError::PipelineStopped) => return self.drain_one(),
            other => other?,
        }

        if !block {
            return match self.receiver.try_recv() {
                Ok(batch) => Ok(Some(batch)),
                Err(TryRecvError::Empty) => Ok(None),
                Err(TryRecvError::Disconnected) => Err(SebulbaError::PipelineStopped),
            };
        }

        select! {
            recv(self.receiver) -> batch => batch.map(Some).map_err(|_| SebulbaError::PipelineStopped),
            recv(self.shutdown_receiver) -> _ => self.drain_one(),
        }
    }

    fn drain_one(&self) -> Result<Option<RolloutBatch<T, O>>, SebulbaError> {
        self.receiver
            .try_recv()
            .map(Some)
            .map_err(|_| SebulbaError::PipelineStopped)
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Returns `true` if no item is queued.
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Maximum number of queued items.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Devices of the learner consuming the items.
    pub fn learner_devices(&self) -> &[Device] {
        &self.learner_devices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        thread,
        time::Duration,
    };
    use test_log::test;

    fn pipeline(capacity: usize) -> Arc<Pipeline<Vec<u32>, u32>> {
        let p = Arc::new(Pipeline::new(capacity, vec![Device(0)]).unwrap());
        p.start();
        p
    }

    fn timings() -> TimingRecord {
        TimingRecord::from([("single_rollout", vec![0.1])])
    }

    #[test]
    fn test_put_then_get() {
        let p = pipeline(1);
        p.put(vec![1, 2, 3], 4, vec![false, true], timings()).unwrap();
        let batch = p.get(true).unwrap().unwrap();
        assert_eq!(
            batch,
            RolloutBatch {
                trajectory: vec![1, 2, 3],
                last_observation: 4,
                last_dones: vec![false, true],
                timings: timings(),
            }
        );
        assert_eq!(p.get(false).unwrap(), None);
    }

    #[test]
    fn test_use_before_start() {
        let p = Pipeline::<u32, u32>::new(1, vec![]).unwrap();
        assert_eq!(p.put(0, 0, vec![], timings()), Err(SebulbaError::PipelineNotStarted));
        assert!(Pipeline::<u32, u32>::new(0, vec![]).is_err());
    }

    #[test]
    fn test_get_blocks_until_put() {
        let p = pipeline(1);
        let received = Arc::new(AtomicBool::new(false));

        let handle = {
            let (p, received) = (p.clone(), received.clone());
            thread::spawn(move || {
                let batch = p.get(true).unwrap().unwrap();
                received.store(true, Ordering::SeqCst);
                batch.last_observation
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!received.load(Ordering::SeqCst));
        p.put(vec![], 7, vec![], timings()).unwrap();
        assert_eq!(handle.join().unwrap(), 7);
    }

    #[test]
    fn test_put_blocks_when_full() {
        let p = pipeline(2);
        p.put(vec![], 0, vec![], timings()).unwrap();
        p.put(vec![], 1, vec![], timings()).unwrap();
        let done = Arc::new(AtomicBool::new(false));

        let handle = {
            let (p, done) = (p.clone(), done.clone());
            thread::spawn(move || {
                p.put(vec![], 2, vec![], timings()).unwrap();
                done.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!done.load(Ordering::SeqCst));
        assert_eq!(p.len(), 2);

        let order: Vec<_> = (0..3)
            .map(|_| p.get(true).unwrap().unwrap().last_observation)
            .collect();
        handle.join().unwrap();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn test_stop_unblocks_put_and_get() {
        let full = pipeline(1);
        full.put(vec![], 0, vec![], timings()).unwrap();
        let empty = pipeline(1);

        let put = {
            let p = full.clone();
            thread::spawn(move || p.put(vec![], 1, vec![], timings()))
        };
        let get = {
            let p = empty.clone();
            thread::spawn(move || p.get(true))
        };

        thread::sleep(Duration::from_millis(50));
        full.stop();
        empty.stop();
        assert_eq!(put.join().unwrap(), Err(SebulbaError::PipelineStopped));
        assert_eq!(get.join().unwrap(), Err(SebulbaError::PipelineStopped));

        // Items queued before the stop are still delivered
        assert_eq!(full.get(true).unwrap().unwrap().last_observation, 0);
        assert_eq!(full.get(true), Err(SebulbaError::PipelineStopped));
        assert_eq!(full.put(vec![], 2, vec![], timings()), Err(SebulbaError::PipelineStopped));
    }
}
