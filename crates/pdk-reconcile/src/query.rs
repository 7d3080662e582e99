use std::collections::HashMap;

use pdk_schemas::{
    LossProduct, ProductListItem, ProductPage, ProductQuery, PromotedProduct, PromotionAction, StatsOverview,
};

use crate::engine::Engine;
use crate::error::EngineResult;

impl Engine {
    pub async fn stats(&self, shop_id: i64) -> EngineResult<StatsOverview> {
        self.require_shop(shop_id).await?;
        Ok(self.store.stats_overview(shop_id).await?)
    }

    /// One page of products, each with its active enrollments.
    pub async fn list_products(&self, q: &ProductQuery) -> EngineResult<ProductPage> {
        self.require_shop(q.shop_id).await?;
        let (products, total) = self.store.list_products(q).await?;

        let ids: Vec<i64> = products.iter().map(|p| p.id).collect();
        let mut by_product: HashMap<i64, Vec<PromotedProduct>> = HashMap::new();
        if !ids.is_empty() {
            for e in self.store.active_enrollments_for(&ids).await? {
                by_product.entry(e.product_id).or_default().push(e);
            }
        }

        let (limit, _) = q.limit_offset();
        Ok(ProductPage {
            total,
            page: q.page.max(1),
            page_size: limit,
            items: products
                .into_iter()
                .map(|product| ProductListItem {
                    active_enrollments: by_product.remove(&product.id).unwrap_or_default(),
                    product,
                })
                .collect(),
        })
    }

    pub async fn unprocessed_loss(&self, shop_id: i64) -> EngineResult<Vec<LossProduct>> {
        self.require_shop(shop_id).await?;
        Ok(self.store.unprocessed_loss_products(shop_id).await?)
    }

    pub async fn list_actions(&self, shop_id: i64) -> EngineResult<Vec<PromotionAction>> {
        self.require_shop(shop_id).await?;
        Ok(self.store.list_actions(shop_id).await?)
    }
}
