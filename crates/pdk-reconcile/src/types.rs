use pdk_schemas::{CampaignSelector, Price};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Attached to an item whose remote step succeeded but whose follow-up
/// mirror write failed. The step still counts as a success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemWarning {
    PersistenceDegraded { step: String, message: String },
}

impl ItemWarning {
    pub fn degraded(step: &str, err: &anyhow::Error) -> Self {
        ItemWarning::PersistenceDegraded {
            step: step.to_string(),
            message: format!("{err:#}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Success,
    Failed,
}

// ---------------------------------------------------------------------------
// Batch enroll
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchEnrollRequest {
    pub shop_id: i64,
    #[serde(default)]
    pub action_ids: CampaignSelector,
    #[serde(default)]
    pub exclude_loss: bool,
    #[serde(default)]
    pub exclude_promoted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollDetail {
    pub product_id: i64,
    pub source_sku: String,
    pub status: ItemStatus,
    /// Per-campaign failures, joined; present even when another campaign succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<ItemWarning>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchEnrollReport {
    pub enrolled_count: u32,
    pub failed_count: u32,
    pub details: Vec<EnrollDetail>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unresolved_action_ids: Vec<i64>,
    /// Products that stopped matching the filters between listing and
    /// their turn under the product lock. Not attempted, not counted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_product_ids: Vec<i64>,
    pub cancelled: bool,
}

// ---------------------------------------------------------------------------
// Process loss
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessLossRequest {
    pub shop_id: i64,
    pub loss_product_ids: Vec<i64>,
    #[serde(default)]
    pub rejoin_action_id: Option<i64>,
    /// Skip steps already marked complete on the loss row.
    #[serde(default)]
    pub skip_completed: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepCounter {
    pub success: u32,
    pub failed: u32,
    pub skipped: u32,
}

impl StepCounter {
    pub fn record(&mut self, outcome: StepOutcome) {
        match outcome {
            StepOutcome::Success => self.success += 1,
            StepOutcome::Failed => self.failed += 1,
            StepOutcome::Skipped => self.skipped += 1,
            StepOutcome::NotApplicable => {}
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LossSteps {
    pub exit: StepCounter,
    pub reprice: StepCounter,
    pub rejoin: StepCounter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Success,
    Failed,
    Skipped,
    NotApplicable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LossItemReport {
    pub loss_product_id: i64,
    pub product_id: i64,
    pub exit: StepOutcome,
    pub reprice: StepOutcome,
    pub rejoin: StepOutcome,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<ItemWarning>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessLossReport {
    pub processed_count: u32,
    pub steps: LossSteps,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_ids: Vec<i64>,
    pub items: Vec<LossItemReport>,
    pub cancelled: bool,
}

// ---------------------------------------------------------------------------
// Remove, reprice, re-enroll
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepriceItem {
    pub source_sku: String,
    pub new_price: Price,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveRepriceRequest {
    pub shop_id: i64,
    pub products: Vec<RepriceItem>,
    #[serde(default, alias = "action_ids")]
    pub reenroll_action_ids: CampaignSelector,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepriceItemReport {
    pub source_sku: String,
    pub product_id: i64,
    pub exit_ok: bool,
    pub price_updated: bool,
    pub enrolled: Vec<i64>,
    pub enroll_failed: Vec<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<ItemWarning>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveRepriceReport {
    pub processed_count: u32,
    pub not_found_skus: Vec<String>,
    /// SKUs whose mirror lookup failed; nothing was sent for them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_skus: Vec<SkuFailure>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unresolved_action_ids: Vec<i64>,
    pub items: Vec<RepriceItemReport>,
    pub cancelled: bool,
}

/// A SKU a batch could not handle because of a local store failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkuFailure {
    pub source_sku: String,
    pub error: String,
}

impl SkuFailure {
    pub fn store(source_sku: &str, step: &str, e: &anyhow::Error) -> Self {
        Self {
            source_sku: source_sku.to_string(),
            error: format!("{step}: {e:#}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Sync, sweep, import
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSyncReport {
    pub listed: u32,
    pub synced: u32,
    pub failed_batches: u32,
    pub failed_upserts: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub examined: u32,
    pub confirmed: u32,
    pub rejected: u32,
    pub unresolved: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LossImportItem {
    pub source_sku: String,
    pub new_price: Price,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportLossRequest {
    pub shop_id: i64,
    pub items: Vec<LossImportItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportLossReport {
    pub imported_ids: Vec<i64>,
    pub not_found_skus: Vec<String>,
    pub skipped_skus: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_skus: Vec<SkuFailure>,
}
