//! Sharded Clearing - Binary Entry Point
//!
//! Runs a short producer/validator session on in-memory stores: a few
//! accounts trade every asset pair, the producer clears each pair at equal
//! prices and a second ledger validates every block.

use tracing::{info, warn};

use sharded_clearing::block::{Cancellation, LedgerState, OfferBatch};
use sharded_clearing::config::EngineConfig;
use sharded_clearing::error::EngineError;
use sharded_clearing::types::price::PRICE_ONE;
use sharded_clearing::types::{ClearingParams, FractionalAsset, Offer, OfferCategory, Price};

const ACCOUNTS: u64 = 4;
const BLOCKS: u64 = 3;

fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    // Load configuration
    let config = match EngineConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(config) {
        eprintln!("Session failed: {}", e);
        std::process::exit(1);
    }
}

fn run(config: EngineConfig) -> Result<(), EngineError> {
    let num_assets = config.num_assets;
    let mut producer = LedgerState::in_memory(config.clone())?;
    let mut validator = LedgerState::in_memory(config.clone())?;
    producer.enable_background_persistence()?;

    let grants: Vec<(u32, u128)> = (0..num_assets).map(|a| (a, 1_000_000)).collect();
    for owner in 1..=ACCOUNTS {
        producer.database_mut().genesis_account(owner, &grants)?;
        validator.database_mut().genesis_account(owner, &grants)?;
    }

    let mut next_offer_id = 1u64;
    let mut resting: Vec<Offer> = Vec::new();
    let prices: Vec<Price> = vec![PRICE_ONE; num_assets as usize];

    for _ in 0..BLOCKS {
        let mut batch = OfferBatch::default();
        for unit in 0..OfferCategory::num_units(num_assets) {
            let Some(category) = OfferCategory::from_unit_index(unit, num_assets) else {
                continue;
            };
            let owner = next_offer_id % ACCOUNTS + 1;
            let amount = 10 + (next_offer_id * 37) % 490;
            let min_price = PRICE_ONE - (next_offer_id * 4099) % (PRICE_ONE / 8);
            batch
                .new_offers
                .push(Offer::new(category, next_offer_id, owner, amount, min_price));
            next_offer_id += 1;
        }
        let cancelled = resting.pop();
        if let Some(stale) = &cancelled {
            batch.cancellations.push(Cancellation::of(stale));
        }

        // Activations are sized from what rests before the round, less the
        // cancellation; the batch's new offers only add supply.
        let params = symmetric_activation(&producer, &prices, cancelled.as_ref(), config.tax_rate)?;
        let block = producer.produce_block(&batch, prices.clone(), &params)?;
        resting.extend(block.block.offers.new_offers.iter().cloned());

        let outcome = validator.validate_block(&block)?;
        if outcome.is_accepted() {
            info!(block = block.block_number(), hash = %block.hash_hex(), "validator accepted");
        } else {
            warn!(block = block.block_number(), outcome = ?outcome, "validator rejected");
        }
    }

    producer.wait_for_persistence()?;
    info!(
        open_offers = producer.manager().num_open_offers(),
        persisted = producer.manager().min_persisted_round(),
        "session finished"
    );
    Ok(())
}

/// Activate, in both directions of every pair, the smaller of the two
/// fully clearing supplies. At equal prices this keeps taxed demand within
/// supply for every asset.
fn symmetric_activation(
    ledger: &LedgerState,
    prices: &[Price],
    cancelled: Option<&Offer>,
    tax_rate: u8,
) -> Result<ClearingParams, EngineError> {
    let manager = ledger.manager();
    let num_assets = manager.num_assets();
    let mut bounds = manager.get_supply_bounds(prices, 0)?;
    if let Some(offer) = cancelled {
        if let Some(slot) = bounds.get_mut(offer.category().unit_index(num_assets)) {
            slot.0 = slot.0.saturating_sub(offer.amount as u128);
        }
    }

    let mut supply_activated = vec![FractionalAsset::ZERO; bounds.len()];
    for (idx, slot) in supply_activated.iter_mut().enumerate() {
        let Some(category) = OfferCategory::from_unit_index(idx, num_assets) else {
            continue;
        };
        let reverse = OfferCategory::new(category.buy_asset, category.sell_asset).unit_index(num_assets);
        let amount = bounds[idx].0.min(bounds[reverse].0);
        *slot = FractionalAsset::try_from_integral(amount).unwrap_or(FractionalAsset::ZERO);
    }
    Ok(ClearingParams {
        supply_activated,
        tax_rate,
    })
}
