//! Durable storage of committed offers.
//!
//! ## Architecture
//!
//! - **Store**: one [`OfferStore`] namespace per market, keyed by order key
//! - **Thunks**: each round leaves a [`Thunk`](crate::engine::Thunk) on the
//!   market's [`ThunkQueue`]; nothing is written while the round is open
//! - **Reconciliation**: [`write_thunks`] folds any number of consecutive
//!   pending rounds into the store in one atomic batch
//! - **Worker**: [`PersistenceWorker`] runs flushes off the block pipeline
//!
//! Persistence only ever sees finalized rounds. A rollback touches the
//! newest, unfinalized thunk, which a flush never drains.

pub mod reconcile;
pub mod store;
pub mod unit;
pub mod worker;

pub use reconcile::write_thunks;
pub use store::{MemoryOfferStore, OfferStore, WriteBatch};
pub use unit::{ThunkQueue, UnitPersistence, UnitRegistry};
pub use worker::PersistenceWorker;
