//! Promotion reconciliation engine.
//!
//! Runs multi-step, partially failable transitions against the marketplace
//! for one shop at a time and keeps the local mirror in step with whatever
//! the marketplace actually accepted. Per-item failures land in reports;
//! only not-found and whole-operation failures surface as `EngineError`.

mod cancel;
mod engine;
mod error;
mod locks;
mod query;
mod store;
mod sync;
mod types;
mod workflow;

pub use cancel::{CancelFlag, CancelOnDrop};
pub use engine::{Engine, EngineConfig};
pub use error::{EngineError, EngineResult};
pub use locks::{KeyedLocks, ProductGuard};
pub use store::{MirrorStore, PgMirror};
pub use types::*;
