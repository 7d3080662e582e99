//! Test fixtures for the promotion desk.
//!
//! `Desk` wires an `Engine` to an in-memory mirror and the paper
//! marketplace for one shop, so scenario tests need neither a database nor
//! a network.

use std::sync::Arc;

use pdk_market_paper::PaperMarketplace;
use pdk_reconcile::{Engine, EngineConfig};
use pdk_schemas::{ActionStatus, Price, Product, PromotionAction, PromotionKind};

mod memory;

pub use memory::MemoryMirror;

/// Whole units to a `Price`.
pub fn units(n: i64) -> Price {
    Price::from_minor(n * 100)
}

pub fn remote_type_code(kind: PromotionKind) -> &'static str {
    match kind {
        PromotionKind::ElasticBoost => "ELASTIC_BOOST",
        PromotionKind::Discount => "DISCOUNT",
        PromotionKind::Other => "MARKETPLACE_MULTI_LEVEL_DISCOUNT_ON_AMOUNT",
    }
}

pub struct Desk {
    pub mirror: MemoryMirror,
    pub market: PaperMarketplace,
    pub engine: Engine,
    pub shop_id: i64,
}

impl Default for Desk {
    fn default() -> Self {
        Self::new()
    }
}

impl Desk {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(cfg: EngineConfig) -> Self {
        let mirror = MemoryMirror::new();
        let market = PaperMarketplace::new();
        let shop_id = mirror.add_shop("client-1", "key-1");
        let engine = Engine::new(Arc::new(mirror.clone()), Arc::new(market.clone()), cfg);
        Self {
            mirror,
            market,
            engine,
            shop_id,
        }
    }

    /// A product known to both the marketplace and the mirror.
    pub fn product(&self, remote_id: i64, source_sku: &str, price: Price) -> Product {
        self.market
            .add_product(remote_id, source_sku, &format!("product {source_sku}"), price);
        self.mirror.add_product(self.shop_id, remote_id, source_sku, price)
    }

    /// An active campaign known to both sides.
    pub fn campaign(&self, action_id: i64, kind: PromotionKind) -> PromotionAction {
        self.market
            .add_campaign(action_id, &format!("campaign {action_id}"), remote_type_code(kind));
        self.mirror.add_action(self.shop_id, action_id, kind, ActionStatus::Active)
    }

    /// Enrollment price for `price` under the desk's engine config.
    pub fn action_price(&self, price: Price) -> Price {
        self.engine.action_price(price)
    }
}
