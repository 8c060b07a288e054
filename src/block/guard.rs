//! Scope guards for tentatively applied rounds.
//!
//! Every subsystem a block touches implements [`TentativeState`]. Wrapping it
//! in a [`Tentative`] guard makes rollback the default: unless
//! [`Tentative::finalize`] consumes the guard, dropping it rolls the round
//! back. Guards declared in one scope drop in reverse order, so subsystems
//! roll back in reverse of the order they were opened.

use std::ops::{Deref, DerefMut};

use tracing::error;

use crate::error::EngineError;

/// A subsystem whose per-round changes can be kept or discarded.
pub trait TentativeState {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Keep every change made in `round`.
    fn finalize_round(&mut self, round: u64) -> Result<(), EngineError>;

    /// Discard every change made in `round`.
    fn rollback_round(&mut self, round: u64) -> Result<(), EngineError>;
}

/// Exclusive access to a subsystem for one round, rolled back on drop.
pub struct Tentative<'a, T: TentativeState> {
    state: &'a mut T,
    round: u64,
    finalized: bool,
}

impl<'a, T: TentativeState> Tentative<'a, T> {
    pub fn new(state: &'a mut T, round: u64) -> Self {
        Self {
            state,
            round,
            finalized: false,
        }
    }

    #[inline]
    pub fn round(&self) -> u64 {
        self.round
    }

    /// Keep the round. If finalizing fails the guard still rolls back.
    pub fn finalize(mut self) -> Result<(), EngineError> {
        self.state.finalize_round(self.round)?;
        self.finalized = true;
        Ok(())
    }
}

impl<T: TentativeState> Deref for Tentative<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.state
    }
}

impl<T: TentativeState> DerefMut for Tentative<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.state
    }
}

impl<T: TentativeState> Drop for Tentative<'_, T> {
    fn drop(&mut self) {
        if self.finalized {
            return;
        }
        if let Err(e) = self.state.rollback_round(self.round) {
            error!(
                subsystem = self.state.name(),
                round = self.round,
                error = %e,
                "rollback failed"
            );
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
