//! Per-market persistence state shared between clearing and the flush worker.
//!
//! The only state both sides touch is the queue of pending thunks and the
//! store itself; each sits behind its own lock. A flush holds the store lock
//! for the whole write but the queue lock only while draining, so the next
//! round can push its thunk while an earlier round is being written.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};
use rayon::prelude::*;
use tracing::{debug, error};

use crate::engine::thunk::Thunk;
use crate::error::EngineError;
use crate::persistence::reconcile::write_thunks;
use crate::persistence::store::{OfferStore, WriteBatch};
use crate::types::Offer;

/// Pending thunks of one market, ascending by round.
#[derive(Debug, Default)]
pub struct ThunkQueue {
    pending: Vec<Thunk>,
    /// Round preceding `pending[0]`: the last drained or loaded round
    base_round: u64,
}

impl ThunkQueue {
    /// Round of the newest pending thunk, or the base round.
    pub fn last_round(&self) -> u64 {
        self.pending.last().map(|t| t.round).unwrap_or(self.base_round)
    }

    #[inline]
    pub fn base_round(&self) -> u64 {
        self.base_round
    }

    /// Append a thunk for the round after [`ThunkQueue::last_round`].
    pub fn push(&mut self, thunk: Thunk) -> Result<(), EngineError> {
        let expected_after = self.last_round();
        if thunk.round != expected_after + 1 {
            return Err(EngineError::ThunkOrder {
                expected_after,
                found: thunk.round,
            });
        }
        self.pending.push(thunk);
        Ok(())
    }

    /// The newest thunk, if it belongs to `round`.
    pub fn top_mut(&mut self, round: u64) -> Option<&mut Thunk> {
        self.pending.last_mut().filter(|t| t.round == round)
    }

    pub fn top(&self) -> Option<&Thunk> {
        self.pending.last()
    }

    pub fn pop(&mut self) -> Option<Thunk> {
        self.pending.pop()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Restart the queue after the store was loaded at `round`.
    pub fn reset(&mut self, round: u64) {
        self.pending.clear();
        self.base_round = round;
    }

    fn drain_through(&mut self, round: u64) -> Vec<Thunk> {
        let split = self.pending.partition_point(|t| t.round <= round);
        let drained: Vec<Thunk> = self.pending.drain(..split).collect();
        if let Some(last) = drained.last() {
            self.base_round = last.round;
        }
        drained
    }

    fn restore(&mut self, mut drained: Vec<Thunk>, base_round: u64) {
        drained.append(&mut self.pending);
        self.pending = drained;
        self.base_round = base_round;
    }
}

/// Thunk queue and store of one market.
pub struct UnitPersistence {
    queue: Mutex<ThunkQueue>,
    store: Mutex<Box<dyn OfferStore>>,
}

impl UnitPersistence {
    pub fn new(store: Box<dyn OfferStore>) -> Self {
        let base_round = store.persisted_round();
        Self {
            queue: Mutex::new(ThunkQueue {
                pending: Vec::new(),
                base_round,
            }),
            store: Mutex::new(store),
        }
    }

    /// Persistence for a market opened after `round` already happened.
    ///
    /// Moves the store's watermark up to `round` so the market's first thunk
    /// is the one for `round + 1`.
    pub fn starting_at(mut store: Box<dyn OfferStore>, round: u64) -> Result<Self, EngineError> {
        if store.persisted_round() < round {
            store.commit(WriteBatch::new(), round)?;
        }
        Ok(Self::new(store))
    }

    /// Lock the pending-thunk queue.
    pub fn queue(&self) -> MutexGuard<'_, ThunkQueue> {
        self.queue.lock()
    }

    pub fn persisted_round(&self) -> u64 {
        self.store.lock().persisted_round()
    }

    /// Every stored offer, ascending by key.
    pub fn scan(&self) -> Result<Vec<Offer>, EngineError> {
        Ok(self.store.lock().scan()?)
    }

    /// Write every pending thunk with round `<= round` to the store.
    ///
    /// On failure the drained thunks go back on the queue.
    pub fn flush(&self, round: u64) -> Result<(), EngineError> {
        let mut store = self.store.lock();
        let persisted = store.persisted_round();

        let (drained, previous_base) = {
            let mut queue = self.queue.lock();
            let previous_base = queue.base_round;
            (queue.drain_through(round), previous_base)
        };

        if drained.is_empty() {
            if persisted >= round {
                return Ok(());
            }
            return Err(EngineError::MissingThunks { round, persisted });
        }

        match write_thunks(store.as_mut(), &drained) {
            Ok(()) => {
                debug!(round, thunks = drained.len(), "flushed work unit");
                Ok(())
            }
            Err(e) => {
                error!(round, error = %e, "failed to flush work unit");
                self.queue.lock().restore(drained, previous_base);
                Err(e)
            }
        }
    }
}

/// Shared list of every market's persistence state.
///
/// Handed to the persistence worker; the manager replaces the list when the
/// set of markets changes.
#[derive(Clone, Default)]
pub struct UnitRegistry {
    units: Arc<RwLock<Vec<Arc<UnitPersistence>>>>,
}

impl UnitRegistry {
    pub fn new(units: Vec<Arc<UnitPersistence>>) -> Self {
        Self {
            units: Arc::new(RwLock::new(units)),
        }
    }

    pub fn replace(&self, units: Vec<Arc<UnitPersistence>>) {
        *self.units.write() = units;
    }

    pub fn len(&self) -> usize {
        self.units.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.read().is_empty()
    }

    /// Flush every market through `round`, in parallel.
    pub fn flush_all(&self, round: u64) -> Result<(), EngineError> {
        let units = self.units.read().clone();
        units.par_iter().try_for_each(|unit| unit.flush(round))
    }

    pub fn min_persisted_round(&self) -> u64 {
        self.units
            .read()
            .iter()
            .map(|u| u.persisted_round())
            .min()
            .unwrap_or(0)
    }

    pub fn max_persisted_round(&self) -> u64 {
        self.units
            .read()
            .iter()
            .map(|u| u.persisted_round())
            .max()
            .unwrap_or(0)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
