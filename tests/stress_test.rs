//! Stress tests for the sharded clearing engine.
//!
//! These tests verify:
//! 1. Producer and validator agree over many seeded blocks
//! 2. Identical inputs produce identical roots, different inputs do not
//! 3. Large markets index, split and hash without drifting from their contents
//!
//! ## Running Stress Tests
//!
//! ```bash
//! # Run all stress tests (release mode recommended)
//! cargo test --release --test stress_test -- --nocapture
//!
//! # Run specific test
//! cargo test --release --test stress_test stress_many_blocks -- --nocapture
//! ```

use std::time::Instant;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use sharded_clearing::block::{Cancellation, LedgerState, OfferBatch};
use sharded_clearing::config::EngineConfig;
use sharded_clearing::orderbook::{MetadataIndex, OrderIndex};
use sharded_clearing::types::price::PRICE_ONE;
use sharded_clearing::types::{ClearingParams, FractionalAsset, Offer, OfferCategory, Price};

// ============================================================================
// TEST CONSTANTS
// ============================================================================

const NUM_ASSETS: u32 = 4;
const ACCOUNTS: u64 = 50;
const BLOCKS: u64 = 40;
const OFFERS_PER_BLOCK: usize = 200;

/// Offers in the single-index stress test
const INDEX_OFFER_COUNT: usize = 100_000;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn config() -> EngineConfig {
    EngineConfig {
        num_assets: NUM_ASSETS,
        worker_threads: 4,
        ..Default::default()
    }
}

fn funded_ledger() -> LedgerState {
    let mut ledger = LedgerState::in_memory(config()).unwrap();
    let grants: Vec<(u32, u128)> = (0..NUM_ASSETS).map(|a| (a, 1_000_000_000)).collect();
    for owner in 1..=ACCOUNTS {
        ledger.database_mut().genesis_account(owner, &grants).unwrap();
    }
    ledger
}

/// Generate one block's worth of offers and cancellations. Returns the
/// batch and the offers it cancels, as they were when placed.
///
/// Uses a seeded RNG for reproducibility. Same seed = same batches.
fn generate_batch(
    rng: &mut ChaCha8Rng,
    next_id: &mut u64,
    resting: &mut Vec<Offer>,
) -> (OfferBatch, Vec<Offer>) {
    let mut batch = OfferBatch::default();
    let mut cancelled = Vec::new();
    for _ in 0..OFFERS_PER_BLOCK {
        let sell = rng.gen_range(0..NUM_ASSETS);
        let mut buy = rng.gen_range(0..NUM_ASSETS - 1);
        if buy >= sell {
            buy += 1;
        }
        // Minimum prices between 0.5 and 1.0
        let min_price: Price = PRICE_ONE / 2 + rng.gen_range(0..PRICE_ONE / 2);
        batch.new_offers.push(Offer::new(
            OfferCategory::new(sell, buy),
            *next_id,
            rng.gen_range(1..=ACCOUNTS),
            rng.gen_range(1..1_000),
            min_price,
        ));
        *next_id += 1;
    }
    for _ in 0..rng.gen_range(0..10) {
        if resting.is_empty() {
            break;
        }
        let idx = rng.gen_range(0..resting.len());
        let offer = resting.swap_remove(idx);
        batch.cancellations.push(Cancellation::of(&offer));
        cancelled.push(offer);
    }
    (batch, cancelled)
}

/// Activate the same share of each pair in both directions. At equal prices
/// this keeps taxed demand within supply for every asset.
///
/// Supply is sized from the resting offers less whatever the batch cancels;
/// the batch's new offers only add to it.
fn balanced_params(ledger: &LedgerState, cancelled: &[Offer], rng: &mut ChaCha8Rng) -> ClearingParams {
    let manager = ledger.manager();
    let prices = vec![PRICE_ONE; NUM_ASSETS as usize];
    let mut bounds = manager.get_supply_bounds(&prices, 0).unwrap();
    for offer in cancelled {
        let slot = &mut bounds[offer.category().unit_index(NUM_ASSETS)].0;
        *slot = slot.saturating_sub(offer.amount as u128);
    }
    let mut supply_activated = vec![FractionalAsset::ZERO; bounds.len()];
    for sell in 0..NUM_ASSETS {
        for buy in (sell + 1)..NUM_ASSETS {
            let forward = OfferCategory::new(sell, buy).unit_index(NUM_ASSETS);
            let backward = OfferCategory::new(buy, sell).unit_index(NUM_ASSETS);
            let available = bounds[forward].0.min(bounds[backward].0);
            let amount = if available == 0 { 0 } else { rng.gen_range(0..=available) };
            let fraction = FractionalAsset::from_integral(amount as u64);
            supply_activated[forward] = fraction;
            supply_activated[backward] = fraction;
        }
    }
    ClearingParams {
        supply_activated,
        tax_rate: config().tax_rate,
    }
}

/// Run `BLOCKS` seeded blocks through a producer and return the final tip.
fn run_chain(seed: u64) -> [u8; 32] {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut producer = funded_ledger();
    let mut next_id = 1;
    let mut resting = Vec::new();
    for _ in 0..BLOCKS {
        let (batch, cancelled) = generate_batch(&mut rng, &mut next_id, &mut resting);
        let params = balanced_params(&producer, &cancelled, &mut rng);
        let block = producer
            .produce_block(&batch, vec![PRICE_ONE; NUM_ASSETS as usize], &params)
            .unwrap();
        resting.extend(block.block.offers.new_offers.iter().cloned());
    }
    producer.last_block_hash()
}

// ============================================================================
// STRESS TESTS
// ============================================================================

/// Producer and validator agree over many blocks of random traffic.
#[test]
fn stress_many_blocks() {
    println!("\n=== STRESS TEST: {} blocks x {} offers ===\n", BLOCKS, OFFERS_PER_BLOCK);

    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let mut producer = funded_ledger();
    let mut validator = funded_ledger();
    let mut next_id = 1;
    let mut resting = Vec::new();

    let start = Instant::now();
    for _ in 0..BLOCKS {
        let (batch, cancelled) = generate_batch(&mut rng, &mut next_id, &mut resting);
        let params = balanced_params(&producer, &cancelled, &mut rng);
        let block = producer
            .produce_block(&batch, vec![PRICE_ONE; NUM_ASSETS as usize], &params)
            .unwrap();
        resting.extend(block.block.offers.new_offers.iter().cloned());

        let outcome = validator.validate_block(&block).unwrap();
        assert!(outcome.is_accepted(), "block {} rejected: {:?}", block.block_number(), outcome);
    }
    let elapsed = start.elapsed();

    println!("  Blocks:            {:>12}", BLOCKS);
    println!("  Open offers:       {:>12}", producer.manager().num_open_offers());
    println!("  Elapsed time:      {:>12.2?}", elapsed);
    println!("  Tip:               {}", hex::encode(producer.last_block_hash()));

    assert_eq!(validator.last_block_hash(), producer.last_block_hash());
    assert_eq!(validator.database().state_hash(), producer.database().state_hash());
    assert_eq!(validator.manager().num_open_offers(), producer.manager().num_open_offers());

    println!("\n=== STRESS TEST PASSED ===\n");
}

/// Same seed, same chain; a different seed diverges.
#[test]
fn verify_determinism() {
    println!("\n=== DETERMINISM TEST ===\n");

    const SEED: u64 = 12345;
    let tip1 = run_chain(SEED);
    let tip2 = run_chain(SEED);
    println!("  Run 1 tip:        {}", hex::encode(tip1));
    println!("  Run 2 tip:        {}", hex::encode(tip2));
    assert_eq!(tip1, tip2, "Chain tips must match for determinism");

    let tip3 = run_chain(SEED + 1);
    println!("  Different seed:   {}", hex::encode(tip3));
    assert_ne!(tip1, tip3, "Different seeds should produce different tips");

    println!("\n=== DETERMINISM VERIFIED ===\n");
}

/// A large index keeps its totals and metadata consistent through inserts,
/// staged deletions and repeated splits.
#[test]
fn stress_index_split_and_hash() {
    println!("\n=== INDEX STRESS TEST ===\n");

    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let category = OfferCategory::new(0, 1);
    let mut index = OrderIndex::with_capacity(INDEX_OFFER_COUNT);
    let mut total: u128 = 0;

    let start = Instant::now();
    for id in 0..INDEX_OFFER_COUNT as u64 {
        let amount = rng.gen_range(1..10_000u64);
        let price = rng.gen_range(1..=4 * PRICE_ONE);
        index
            .insert(Offer::new(category, id, rng.gen_range(1..=ACCOUNTS), amount, price))
            .unwrap();
        total += amount as u128;
    }
    let insert_time = start.elapsed();
    assert_eq!(index.size(), INDEX_OFFER_COUNT as u64);
    assert_eq!(index.get_root_metadata().endow, total);

    let metadata = MetadataIndex::generate(&index).unwrap();
    assert_eq!(metadata.total().endow, total);

    // Peel off slices until the index is empty
    let mut peeled: u128 = 0;
    let mut root = index.root_hash();
    while !index.is_empty() {
        let remaining = index.get_root_metadata().endow;
        let threshold = rng.gen_range(1..=remaining.min(5_000_000));
        let split = index.endow_split(threshold).unwrap();
        let taken = split.get_root_metadata().endow;
        assert!(taken <= threshold);
        peeled += taken;
        if taken == 0 {
            // threshold below the cheapest offer; take it whole
            let key = index.get_lowest_key().unwrap();
            peeled += index.remove(&key).unwrap().amount as u128;
        }
        let next_root = index.root_hash();
        assert_ne!(next_root, root);
        root = next_root;
    }
    assert_eq!(peeled, total);

    println!("  Offers:            {:>12}", INDEX_OFFER_COUNT);
    println!("  Insert time:       {:>12.2?}", insert_time);
    println!("  Total time:        {:>12.2?}", start.elapsed());

    println!("\n=== INDEX STRESS TEST PASSED ===\n");
}
