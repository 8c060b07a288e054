//! Producing and validating blocks across every subsystem.
//!
//! ## Validation Sequence
//!
//! ```text
//! preconditions (no mutation)    number, prev hash, price count, unit count, fee
//!        |
//! open guards                    database -> manager -> log -> header map
//!        |
//! apply offer batch              reject on the first invalid entry
//! tentative commit               every market pushes its thunk
//! replay clearing claim          per market, in parallel
//! recompute header hash          compare with the proposer's
//!        |
//! finalize guards                same order as opened
//! ```
//!
//! Any failure before the last step drops the guards, rolling the four
//! subsystems back in reverse order. A rejected block leaves no trace.

use tracing::{error, info, warn};

use crate::block::account_log::AccountModificationLog;
use crate::block::batch::{apply_offer_batch, BatchMode, OfferBatch};
use crate::block::database::AccountDatabase;
use crate::block::guard::{Tentative, TentativeState};
use crate::block::header::{Block, BlockHeader, HashedBlock};
use crate::block::header_map::BlockHeaderHashMap;
use crate::config::EngineConfig;
use crate::engine::{StoreFactory, WorkUnitManager};
use crate::error::{ClearingError, EngineError};
use crate::persistence::PersistenceWorker;
use crate::types::{ClearingParams, Price};

/// Result of validating a proposed block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockOutcome {
    /// Applied and finalized; carries the block hash
    Accepted([u8; 32]),
    /// The block's claims do not hold; nothing was applied
    Rejected(ClearingError),
}

impl BlockOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, BlockOutcome::Accepted(_))
    }
}

impl TentativeState for WorkUnitManager {
    fn name(&self) -> &'static str {
        "work unit manager"
    }

    fn finalize_round(&mut self, round: u64) -> Result<(), EngineError> {
        self.finalize_validation(round)
    }

    fn rollback_round(&mut self, round: u64) -> Result<(), EngineError> {
        self.rollback_validation(round)
    }
}

/// Every subsystem a block touches, plus the chain tip.
pub struct LedgerState {
    database: AccountDatabase,
    manager: WorkUnitManager,
    modification_log: AccountModificationLog,
    header_map: BlockHeaderHashMap,
    tax_rate: u8,
    last_block_number: u64,
    last_block_hash: [u8; 32],
    worker: Option<PersistenceWorker>,
}

impl LedgerState {
    pub fn new(config: EngineConfig, store_factory: StoreFactory) -> Result<Self, EngineError> {
        let tax_rate = config.tax_rate;
        let num_assets = config.num_assets;
        let manager = WorkUnitManager::new(config, store_factory)?;
        Ok(Self {
            database: AccountDatabase::new(num_assets),
            manager,
            modification_log: AccountModificationLog::new(),
            header_map: BlockHeaderHashMap::new(),
            tax_rate,
            last_block_number: 0,
            last_block_hash: [0u8; 32],
            worker: None,
        })
    }

    pub fn in_memory(config: EngineConfig) -> Result<Self, EngineError> {
        let tax_rate = config.tax_rate;
        let num_assets = config.num_assets;
        let manager = WorkUnitManager::in_memory(config)?;
        Ok(Self {
            database: AccountDatabase::new(num_assets),
            manager,
            modification_log: AccountModificationLog::new(),
            header_map: BlockHeaderHashMap::new(),
            tax_rate,
            last_block_number: 0,
            last_block_hash: [0u8; 32],
            worker: None,
        })
    }

    /// Flush finalized rounds on a background thread from now on.
    pub fn enable_background_persistence(&mut self) -> Result<(), EngineError> {
        if self.worker.is_none() {
            self.worker = Some(PersistenceWorker::spawn(self.manager.registry())?);
        }
        Ok(())
    }

    pub fn database(&self) -> &AccountDatabase {
        &self.database
    }

    /// For opening genesis accounts between blocks.
    pub fn database_mut(&mut self) -> &mut AccountDatabase {
        &mut self.database
    }

    pub fn manager(&self) -> &WorkUnitManager {
        &self.manager
    }

    pub fn header_map(&self) -> &BlockHeaderHashMap {
        &self.header_map
    }

    pub fn modification_log(&self) -> &AccountModificationLog {
        &self.modification_log
    }

    #[inline]
    pub fn last_block_number(&self) -> u64 {
        self.last_block_number
    }

    #[inline]
    pub fn last_block_hash(&self) -> [u8; 32] {
        self.last_block_hash
    }

    /// Flush every market through `round` on the calling thread.
    pub fn persist(&self, round: u64) -> Result<(), EngineError> {
        self.manager.persist(round)
    }

    /// Wait for the background flush, if any, and report its error.
    pub fn wait_for_persistence(&self) -> Result<(), EngineError> {
        match &self.worker {
            Some(worker) => worker.wait_for_async_task(),
            None => Ok(()),
        }
    }

    fn after_finalize(&mut self, hash: [u8; 32]) {
        self.last_block_number += 1;
        self.last_block_hash = hash;
        if let Some(worker) = &self.worker {
            worker.persist_async(self.last_block_number);
        }
    }

    // ========================================================================
    // Production
    // ========================================================================

    /// Build the next block from `batch`, clearing at `prices` with the
    /// supply activations in `params`.
    ///
    /// Invalid transactions are dropped from the block. Every error is
    /// structural and leaves all subsystems at their previous state.
    pub fn produce_block(
        &mut self,
        batch: &OfferBatch,
        prices: Vec<Price>,
        params: &ClearingParams,
    ) -> Result<HashedBlock, EngineError> {
        let round = self.last_block_number + 1;
        if params.tax_rate != self.tax_rate {
            return Err(EngineError::Invariant(format!(
                "clearing fee rate {} differs from configured {}",
                params.tax_rate, self.tax_rate
            )));
        }
        if prices.len() != self.manager.num_assets() as usize {
            return Err(EngineError::Invariant(format!(
                "{} prices for {} assets",
                prices.len(),
                self.manager.num_assets()
            )));
        }
        let prev_block_hash = self.last_block_hash;

        let mut database = Tentative::new(&mut self.database, round);
        let mut manager = Tentative::new(&mut self.manager, round);
        let log = Tentative::new(&mut self.modification_log, round);
        let mut header_map = Tentative::new(&mut self.header_map, round);

        header_map.insert_tentative(round - 1, prev_block_hash)?;
        let accepted = apply_offer_batch(batch, BatchMode::Production, &mut database, &mut manager)?;
        manager.commit_for_production(round)?;
        let (clearing, stats) =
            manager.clear_offers_for_production(params, &prices, round, &*database, &*log)?;

        let header = BlockHeader {
            block_number: round,
            prev_block_hash,
            batch_hash: accepted.hash(),
            prices,
            tax_rate: params.tax_rate,
            clearing,
            database_hash: database.state_hash(),
            modification_log_hash: log.hash(),
            header_map_hash: header_map.hash(),
        };
        let hashed = HashedBlock::new(Block {
            header,
            offers: accepted,
        });

        database.finalize()?;
        manager.finalize()?;
        log.finalize()?;
        header_map.finalize()?;

        info!(
            block = round,
            hash = %hashed.hash_hex(),
            new = stats.new_offer_count,
            cleared = stats.fully_clear_offer_count,
            partial = stats.partial_clear_offer_count,
            "produced block"
        );
        self.after_finalize(hashed.hash);
        Ok(hashed)
    }

    // ========================================================================
    // Validation
    // ========================================================================

    /// Apply `proposed` if every claim in it holds.
    ///
    /// `Ok(Rejected)` leaves every subsystem untouched. `Err` is structural;
    /// the subsystems are rolled back as well.
    pub fn validate_block(&mut self, proposed: &HashedBlock) -> Result<BlockOutcome, EngineError> {
        let number = proposed.block_number();
        if let Err(reason) = self.check_preconditions(&proposed.block.header) {
            warn!(block = number, reason = %reason, "block rejected before applying");
            return Ok(BlockOutcome::Rejected(reason));
        }

        match self.apply_and_verify(proposed) {
            Ok(()) => {
                info!(block = number, hash = %proposed.hash_hex(), "accepted block");
                self.after_finalize(proposed.hash);
                Ok(BlockOutcome::Accepted(proposed.hash))
            }
            Err(EngineError::Clearing(reason)) => {
                warn!(block = number, reason = %reason, "block rejected, rolled back");
                Ok(BlockOutcome::Rejected(reason))
            }
            Err(e) => {
                error!(block = number, error = %e, "structural failure while validating block");
                Err(e)
            }
        }
    }

    fn check_preconditions(&self, header: &BlockHeader) -> Result<(), ClearingError> {
        let expected = self.last_block_number + 1;
        if header.block_number != expected {
            return Err(ClearingError::InvalidHeader(format!(
                "block number {} where {} was expected",
                header.block_number, expected
            )));
        }
        if header.prev_block_hash != self.last_block_hash {
            return Err(ClearingError::InvalidHeader(
                "previous block hash does not match the chain tip".to_string(),
            ));
        }
        if header.prices.len() != self.manager.num_assets() as usize {
            return Err(ClearingError::InvalidHeader(format!(
                "{} prices for {} assets",
                header.prices.len(),
                self.manager.num_assets()
            )));
        }
        if header.clearing.units.len() != self.manager.num_units() {
            return Err(ClearingError::InvalidHeader(format!(
                "{} commitment entries for {} markets",
                header.clearing.units.len(),
                self.manager.num_units()
            )));
        }
        if header.tax_rate != self.tax_rate {
            return Err(ClearingError::InvalidHeader(format!(
                "fee rate {} is not accepted",
                header.tax_rate
            )));
        }
        Ok(())
    }

    fn apply_and_verify(&mut self, proposed: &HashedBlock) -> Result<(), EngineError> {
        let header = &proposed.block.header;
        let round = header.block_number;

        let mut database = Tentative::new(&mut self.database, round);
        let mut manager = Tentative::new(&mut self.manager, round);
        let log = Tentative::new(&mut self.modification_log, round);
        let mut header_map = Tentative::new(&mut self.header_map, round);

        header_map.insert_tentative(round - 1, header.prev_block_hash)?;
        apply_offer_batch(
            &proposed.block.offers,
            BatchMode::Validation,
            &mut database,
            &mut manager,
        )?;
        manager.tentative_commit_for_validation(round)?;
        manager.tentative_clear_offers_for_validation(
            &header.clearing,
            &header.prices,
            header.tax_rate,
            round,
            &*database,
            &*log,
        )?;

        let mut clearing = header.clearing.clone();
        manager.freeze_and_hash(&mut clearing)?;
        let recomputed = BlockHeader {
            block_number: round,
            prev_block_hash: header.prev_block_hash,
            batch_hash: proposed.block.offers.hash(),
            prices: header.prices.clone(),
            tax_rate: header.tax_rate,
            clearing,
            database_hash: database.state_hash(),
            modification_log_hash: log.hash(),
            header_map_hash: header_map.hash(),
        };
        let computed = recomputed.hash();
        if computed != proposed.hash {
            return Err(ClearingError::HashMismatch {
                claimed: hex::encode(proposed.hash),
                computed: hex::encode(computed),
            }
            .into());
        }

        database.finalize()?;
        manager.finalize()?;
        log.finalize()?;
        header_map.finalize()?;
        Ok(())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
