use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

type Slot = Arc<tokio::sync::Mutex<()>>;

/// In-process async mutex per (shop, product).
///
/// Held for a product's whole step sequence inside one workflow, so two
/// workflows touching the same product in this process never interleave.
/// Cross-process duplicates are stopped by the ledger's unique index.
#[derive(Debug, Clone, Default)]
pub struct KeyedLocks {
    slots: Arc<Mutex<HashMap<(i64, i64), Slot>>>,
}

#[derive(Debug)]
pub struct ProductGuard {
    _guard: OwnedMutexGuard<()>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, shop_id: i64, product_id: i64) -> ProductGuard {
        let slot = {
            let mut map = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            // Drop slots nobody holds or waits on.
            map.retain(|_, s| Arc::strong_count(s) > 1);
            map.entry((shop_id, product_id)).or_default().clone()
        };
        ProductGuard {
            _guard: slot.lock_owned().await,
        }
    }

    /// Number of live slots (held or awaited).
    pub fn live_slots(&self) -> usize {
        let map = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        map.values().filter(|s| Arc::strong_count(s) > 1).count()
    }
}
