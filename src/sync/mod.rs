//! Position reconciliation: the copy ledger, the engine, and the per-pair
//! worker.

pub mod engine;
pub mod ledger;
pub mod worker;

pub use engine::{CycleReport, SyncEngine};
pub use ledger::{CopyLink, CopyTag, Ledger};
pub use worker::PairWorker;
