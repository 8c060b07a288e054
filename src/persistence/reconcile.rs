//! Folding pending thunks into a market's durable store.
//!
//! ## Phases
//!
//! Given thunks for consecutive rounds `r+1 ..= r+k` (the store is at `r`):
//!
//! 1. Stage every cancelled key as a delete.
//! 2. Find the maximum clearing threshold over all rounds and delete every
//!    stored key below it (every key when some round cleared the market).
//! 3. Walk rounds newest first, keeping the running maximum threshold, and
//!    insert each round's new offers that sit at or above it. Offers
//!    cancelled within the batch are skipped.
//! 4. In round order, subtract each partial execution from the stored
//!    offer (read through the batch). An offer reaching zero is deleted.
//! 5. Delete partial keys that a later round's threshold has overtaken.
//! 6. Commit the batch atomically with the watermark at `r+k`.
//!
//! Step 3 relies on round order: an offer added in round `i` survived only
//! if every later round's threshold stayed at or below it.

use tracing::debug;

use crate::engine::thunk::{ClearingRecord, ClearingThreshold, Thunk};
use crate::error::EngineError;
use crate::persistence::store::{OfferStore, WriteBatch};

/// Reconcile `thunks` (ascending, consecutive rounds) into `store`.
///
/// # Errors
///
/// * `ThunkOrder` - the first round does not follow the watermark, or a gap
/// * `AmountUnderflow` - a partial execution takes more than the stored offer holds
/// * `Store` - encoding or commit failure; the store is left untouched
pub fn write_thunks(store: &mut dyn OfferStore, thunks: &[Thunk]) -> Result<(), EngineError> {
    let Some(last) = thunks.last() else {
        return Ok(());
    };

    let mut expected_after = store.persisted_round();
    for thunk in thunks {
        if thunk.round != expected_after + 1 {
            return Err(EngineError::ThunkOrder {
                expected_after,
                found: thunk.round,
            });
        }
        expected_after = thunk.round;
    }

    let mut batch = WriteBatch::new();

    // Phase 1: cancellations
    for thunk in thunks {
        for (key, _) in &thunk.deleted {
            batch.delete(*key);
        }
    }

    // Phase 2: everything below the highest threshold was cleared
    let max_threshold = thunks
        .iter()
        .map(Thunk::clearing_threshold)
        .max()
        .unwrap_or(ClearingThreshold::Everything);
    let cleared_keys = match max_threshold {
        ClearingThreshold::Everything => store.keys(),
        ClearingThreshold::Key(key) => store.keys_below(&key),
    };
    let num_cleared = cleared_keys.len();
    for key in cleared_keys {
        batch.delete(key);
    }

    // Phase 3: surviving additions, newest round first
    let mut running = ClearingThreshold::Key(crate::types::OrderKey::ZERO);
    let mut num_inserted = 0usize;
    for thunk in thunks.iter().rev() {
        running = running.max(thunk.clearing_threshold());
        let ClearingThreshold::Key(threshold) = running else {
            break;
        };
        for offer in thunk.new_offers.iter().rev() {
            let key = offer.key();
            if key < threshold {
                break;
            }
            if batch.is_deleted(&key) {
                continue;
            }
            batch.put(offer.clone());
            num_inserted += 1;
        }
    }

    // Phase 4: partial executions, oldest first
    for thunk in thunks {
        let ClearingRecord::Partial(partial) = &thunk.clearing else {
            continue;
        };
        let Some(mut offer) = batch.read(&*store, &partial.key)? else {
            continue;
        };
        offer.amount = offer
            .amount
            .checked_sub(partial.sell_amount)
            .ok_or(EngineError::AmountUnderflow {
                key: partial.key,
                amount: offer.amount,
                consumed: partial.sell_amount,
            })?;
        if offer.amount == 0 {
            batch.delete(partial.key);
        } else {
            batch.put(offer);
        }
    }

    // Phase 5: partial keys overtaken by a later round's threshold.
    // Earlier rounds never overtake a partial.
    let mut later: Option<ClearingThreshold> = None;
    for thunk in thunks.iter().rev() {
        if let (ClearingRecord::Partial(partial), Some(later)) = (&thunk.clearing, later) {
            if ClearingThreshold::Key(partial.key) < later {
                batch.delete(partial.key);
            }
        }
        let own = thunk.clearing_threshold();
        later = Some(later.map_or(own, |l| l.max(own)));
    }

    debug!(
        rounds = thunks.len(),
        last_round = last.round,
        cleared = num_cleared,
        inserted = num_inserted,
        ops = batch.len(),
        "reconciled thunks"
    );

    // Phase 6
    store.commit(batch, last.round)?;
    Ok(())
}

// ============================================================================
// Unit Tests
// ============================================================================
