//! Hardware accumulation slots and their lifetime.
//!
//! A slot holds the running maximum and sum of one vector between the
//! accumulation and normalization phases. Its life is
//! `Free -> Reserved -> Finalizing -> Settled -> Free`:
//!
//! * `Reserved` from the first accumulation job (flagged ACQUIRE_SLOT),
//! * `Finalizing` once the LAST accumulation job has been accepted,
//! * `Settled` once the completion of that LAST job has been observed, at
//!   which point the divisor is final and divide jobs may read it,
//! * `Free` again once the LAST divide job has been accepted.
//!
//! Each state after `Free` is represented by a lease that is neither `Clone`
//! nor `Copy` and is consumed by the transition out of it. Divide jobs can
//! only be built from a [`Settled`] lease, so a divide before completion is
//! not expressible.

use crate::command::SlotId;
use crate::{MAX_SLOTS, SoftexError};

/// Sequence number of a job that raises a completion event, starting at 1.
pub type JobSeq = u64;

/// Caller-chosen tag identifying the vector a slot is associated with.
pub type VectorTag = u32;

/// Bookkeeping state of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Free,
    Reserved { vector: VectorTag },
    Finalizing { vector: VectorTag, last: JobSeq },
    Settled { vector: VectorTag },
}

/// Lease on a slot whose accumulation is in progress.
#[derive(Debug)]
pub struct Accumulating {
    slot: SlotId,
    vector: VectorTag,
    fresh: bool,
    cache: Option<CacheRegion>,
}

impl Accumulating {
    pub fn slot(&self) -> SlotId {
        self.slot
    }

    pub fn vector(&self) -> VectorTag {
        self.vector
    }

    /// Whether the next accumulation job is the slot's first, which must
    /// carry ACQUIRE_SLOT.
    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    /// Folds the cache configuration into the slot's first accumulation
    /// job instead of issuing a dedicated configuration job.
    pub fn attach_cache(&mut self, region: CacheRegion) {
        self.cache = Some(region);
    }

    /// Marks the first job as issued and hands out the cache region once.
    pub(crate) fn take_first(&mut self) -> (bool, Option<CacheRegion>) {
        let fresh = core::mem::replace(&mut self.fresh, false);
        (fresh, self.cache.take())
    }
}

/// Lease on a slot whose LAST accumulation job has been accepted but not
/// yet observed to complete.
#[derive(Debug)]
pub struct Finalizing {
    slot: SlotId,
    vector: VectorTag,
    last: JobSeq,
}

impl Finalizing {
    pub fn slot(&self) -> SlotId {
        self.slot
    }

    pub fn vector(&self) -> VectorTag {
        self.vector
    }

    /// Sequence number of the LAST accumulation job.
    pub fn last_job(&self) -> JobSeq {
        self.last
    }
}

/// Lease on a slot whose divisor is final.
#[derive(Debug)]
pub struct Settled {
    slot: SlotId,
    vector: VectorTag,
}

impl Settled {
    pub fn slot(&self) -> SlotId {
        self.slot
    }

    pub fn vector(&self) -> VectorTag {
        self.vector
    }
}

/// Claim on the cache/spill address for the current run.
#[derive(Debug)]
pub struct CacheRegion {
    addr: u32,
}

impl CacheRegion {
    pub fn addr(&self) -> u32 {
        self.addr
    }
}

/// Tracks the slot pool and the per-run cache configuration.
pub struct SlotManager {
    states: [SlotState; MAX_SLOTS],
    count: usize,
    cache: Option<u32>,
}

impl SlotManager {
    pub fn new(count: usize) -> Result<Self, SoftexError> {
        if count == 0 || count > MAX_SLOTS {
            return Err(SoftexError::InvalidDepth {
                depth: 0,
                slots: count,
            });
        }
        Ok(Self {
            states: [SlotState::Free; MAX_SLOTS],
            count,
            cache: None,
        })
    }

    pub fn slot_count(&self) -> usize {
        self.count
    }

    pub fn state(&self, slot: SlotId) -> SlotState {
        self.states[slot.index()]
    }

    /// Number of slots not in the `Free` state.
    pub fn in_use(&self) -> usize {
        self.states[..self.count]
            .iter()
            .filter(|s| **s != SlotState::Free)
            .count()
    }

    /// Associates the lowest free slot with `vector`.
    pub fn reserve(&mut self, vector: VectorTag) -> Result<Accumulating, SoftexError> {
        let index = self.states[..self.count]
            .iter()
            .position(|s| *s == SlotState::Free)
            .ok_or(SoftexError::SlotsExhausted)?;

        self.states[index] = SlotState::Reserved { vector };
        log::trace!("slot{} reserved for vector {}", index, vector);

        Ok(Accumulating {
            slot: SlotId(index as u16),
            vector,
            fresh: true,
            cache: None,
        })
    }

    /// Records acceptance of the LAST accumulation job `last`.
    pub(crate) fn finalize(&mut self, lease: Accumulating, last: JobSeq) -> Finalizing {
        let Accumulating { slot, vector, .. } = lease;
        debug_assert_eq!(self.states[slot.index()], SlotState::Reserved { vector });

        self.states[slot.index()] = SlotState::Finalizing { vector, last };
        Finalizing { slot, vector, last }
    }

    /// Promotes a finalizing slot once job `completed` has completed.
    ///
    /// Completions are observed in issue order, so the LAST job is done
    /// when the completed count has reached its sequence number.
    pub(crate) fn settle(
        &mut self,
        lease: Finalizing,
        completed: JobSeq,
    ) -> Result<Settled, Finalizing> {
        if completed < lease.last {
            return Err(lease);
        }

        let Finalizing { slot, vector, .. } = lease;
        self.states[slot.index()] = SlotState::Settled { vector };
        Ok(Settled { slot, vector })
    }

    /// Returns the slot to the pool after its LAST divide job was accepted.
    pub(crate) fn release(&mut self, lease: Settled) {
        debug_assert_eq!(
            self.states[lease.slot.index()],
            SlotState::Settled {
                vector: lease.vector
            }
        );
        self.states[lease.slot.index()] = SlotState::Free;
        log::trace!("{} released by vector {}", lease.slot, lease.vector);
    }

    /// Claims the cache address for the current run. Only one claim is
    /// allowed until [`SlotManager::end_run`].
    pub fn claim_cache(&mut self, addr: u32) -> Result<CacheRegion, SoftexError> {
        if self.cache.is_some() {
            return Err(SoftexError::CacheAlreadyConfigured);
        }
        self.cache = Some(addr);
        Ok(CacheRegion { addr })
    }

    pub fn cache_addr(&self) -> Option<u32> {
        self.cache
    }

    /// Ends the current run, allowing a new cache configuration.
    pub fn end_run(&mut self) {
        self.cache = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_lifecycle() {
        let mut slots = SlotManager::new(2).unwrap();

        let lease = slots.reserve(7).unwrap();
        let slot = lease.slot();
        assert_eq!(slots.state(slot), SlotState::Reserved { vector: 7 });

        let fin = slots.finalize(lease, 3);
        assert_eq!(slots.state(slot), SlotState::Finalizing { vector: 7, last: 3 });

        let fin = slots.settle(fin, 2).unwrap_err();
        assert_eq!(slots.state(slot), SlotState::Finalizing { vector: 7, last: 3 });

        let settled = slots.settle(fin, 3).unwrap();
        assert_eq!(slots.state(slot), SlotState::Settled { vector: 7 });

        slots.release(settled);
        assert_eq!(slots.state(slot), SlotState::Free);
        assert_eq!(slots.in_use(), 0);
    }

    #[test]
    fn pool_is_bounded() {
        let mut slots = SlotManager::new(2).unwrap();
        let a = slots.reserve(0).unwrap();
        let b = slots.reserve(1).unwrap();
        assert_ne!(a.slot(), b.slot());
        assert_eq!(slots.reserve(2).unwrap_err(), SoftexError::SlotsExhausted);

        let fin = slots.finalize(a, 1);
        let settled = slots.settle(fin, 1).unwrap();
        slots.release(settled);

        let c = slots.reserve(2).unwrap();
        assert_eq!(c.slot(), SlotId(0));
    }

    #[test]
    fn first_job_flag_is_consumed_once() {
        let mut slots = SlotManager::new(1).unwrap();
        let mut lease = slots.reserve(0).unwrap();
        let region = slots.claim_cache(0x4000).unwrap();
        lease.attach_cache(region);

        let (fresh, cache) = lease.take_first();
        assert!(fresh);
        assert_eq!(cache.map(|c| c.addr()), Some(0x4000));

        let (fresh, cache) = lease.take_first();
        assert!(!fresh);
        assert!(cache.is_none());
    }

    #[test]
    fn cache_is_single_use_per_run() {
        let mut slots = SlotManager::new(2).unwrap();
        slots.claim_cache(0x1000).unwrap();
        assert_eq!(
            slots.claim_cache(0x2000).unwrap_err(),
            SoftexError::CacheAlreadyConfigured
        );
        slots.end_run();
        assert!(slots.claim_cache(0x2000).is_ok());
    }
}
