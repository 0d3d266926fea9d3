//! Latest parameters published by the learner.
use crate::Device;
use log::trace;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, PoisonError, RwLock,
};

/// A single slot holding the latest parameter snapshot for one actor thread.
///
/// The learner overwrites the slot with [`ParamsSource::update`] and never waits for the
/// actor. A snapshot not read before the next update is lost, so actors may act on slightly
/// stale parameters. Readers get an [`Arc`] of a complete snapshot and never observe a
/// partially written one.
#[derive(Debug)]
pub struct ParamsSource<P> {
    slot: RwLock<Arc<P>>,
    version: AtomicUsize,
    read_version: AtomicUsize,
    device: Device,
}

impl<P> ParamsSource<P> {
    /// Creates a slot holding `initial`, used by an actor on `device`.
    pub fn new(initial: P, device: Device) -> Self {
        Self {
            slot: RwLock::new(Arc::new(initial)),
            version: AtomicUsize::new(0),
            read_version: AtomicUsize::new(0),
            device,
        }
    }

    /// Replaces the snapshot.
    pub fn update(&self, params: P) {
        let params = Arc::new(params);
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        *slot = params;
        let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
        drop(slot);

        if self.read_version.load(Ordering::Acquire) + 1 < version {
            trace!(
                "Params version {} on {} overwritten before being read",
                version - 1,
                self.device
            );
        }
    }

    /// The latest snapshot, or the initial one before any update.
    pub fn get(&self) -> Arc<P> {
        let slot = self.slot.read().unwrap_or_else(PoisonError::into_inner);
        self.read_version
            .store(self.version.load(Ordering::Acquire), Ordering::Release);
        slot.clone()
    }

    /// Number of updates so far.
    pub fn version(&self) -> usize {
        self.version.load(Ordering::Acquire)
    }

    /// Device of the actor reading the slot.
    pub fn device(&self) -> Device {
        self.device
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_initial_then_latest() {
        let source = ParamsSource::new(vec![0u32; 4], Device(0));
        assert_eq!(*source.get(), vec![0; 4]);
        assert_eq!(source.version(), 0);

        source.update(vec![1; 4]);
        source.update(vec![2; 4]);
        assert_eq!(*source.get(), vec![2; 4]);
        assert_eq!(*source.get(), vec![2; 4]);
        assert_eq!(source.version(), 2);
    }

    #[test]
    fn test_no_torn_reads() {
        let source = Arc::new(ParamsSource::new(vec![0usize; 256], Device(1)));

        let writer = {
            let source = source.clone();
            thread::spawn(move || {
                for i in 1..=500 {
                    source.update(vec![i; 256]);
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let source = source.clone();
                thread::spawn(move || {
                    let mut last = 0;
                    for _ in 0..500 {
                        let params = source.get();
                        assert!(params.iter().all(|&v| v == params[0]));
                        assert!(params[0] >= last);
                        last = params[0];
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        readers.into_iter().for_each(|r| r.join().unwrap());
        assert_eq!(*source.get(), vec![500; 256]);
    }
}
