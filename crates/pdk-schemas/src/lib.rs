//! Shared data model for the promotion desk.
//!
//! Every crate in the workspace speaks these types. Status enums carry a
//! stable lowercase string form used both in the database and on the wire.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

mod price;

pub use price::{Price, PriceError, BPS_DENOMINATOR, MINOR_PER_UNIT};

/// Returned by the `parse` helpers on status enums.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {}", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

fn unknown(kind: &'static str, value: &str) -> UnknownVariant {
    UnknownVariant {
        kind,
        value: value.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Product
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductStatus {
    Active,
    Inactive,
    Archived,
}

impl ProductStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductStatus::Active => "active",
            ProductStatus::Inactive => "inactive",
            ProductStatus::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Result<Self, UnknownVariant> {
        match s {
            "active" => Ok(ProductStatus::Active),
            "inactive" => Ok(ProductStatus::Inactive),
            "archived" => Ok(ProductStatus::Archived),
            other => Err(unknown("product status", other)),
        }
    }
}

/// One marketplace catalog item of one shop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub shop_id: i64,
    pub remote_product_id: i64,
    pub remote_sku: i64,
    pub source_sku: String,
    pub name: String,
    pub current_price: Price,
    pub status: ProductStatus,
    pub is_loss: bool,
    pub is_promoted: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// Fields refreshed by catalog sync. Flags are deliberately absent: only the
/// reconciliation engine mutates them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductUpsert {
    pub shop_id: i64,
    pub remote_product_id: i64,
    pub remote_sku: i64,
    pub source_sku: String,
    pub name: String,
    pub current_price: Price,
    pub synced_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Campaigns
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Active,
    Expired,
    Disabled,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Active => "active",
            ActionStatus::Expired => "expired",
            ActionStatus::Disabled => "disabled",
        }
    }

    pub fn parse(s: &str) -> Result<Self, UnknownVariant> {
        match s {
            "active" => Ok(ActionStatus::Active),
            "expired" => Ok(ActionStatus::Expired),
            "disabled" => Ok(ActionStatus::Disabled),
            other => Err(unknown("action status", other)),
        }
    }
}

/// Campaign category. Resolved once, when the campaign is registered or
/// synced; titles are never inspected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionKind {
    ElasticBoost,
    Discount,
    Other,
}

impl PromotionKind {
    pub const ALL: [PromotionKind; 3] = [
        PromotionKind::ElasticBoost,
        PromotionKind::Discount,
        PromotionKind::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PromotionKind::ElasticBoost => "elastic_boost",
            PromotionKind::Discount => "discount",
            PromotionKind::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Result<Self, UnknownVariant> {
        match s {
            "elastic_boost" => Ok(PromotionKind::ElasticBoost),
            "discount" => Ok(PromotionKind::Discount),
            "other" => Ok(PromotionKind::Other),
            other => Err(unknown("promotion kind", other)),
        }
    }

    /// Map the marketplace's stable campaign-type code.
    pub fn from_remote_type(code: &str) -> Self {
        match code.trim().to_ascii_uppercase().as_str() {
            "ELASTIC_BOOST" => PromotionKind::ElasticBoost,
            "DISCOUNT" | "STOCK_DISCOUNT" | "DISCOUNT_WITH_CONDITION" => PromotionKind::Discount,
            _ => PromotionKind::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionAction {
    pub id: i64,
    pub shop_id: i64,
    pub action_id: i64,
    pub title: String,
    pub action_type: String,
    pub kind: PromotionKind,
    pub date_start: Option<DateTime<Utc>>,
    pub date_end: Option<DateTime<Utc>>,
    pub participating_count: i32,
    pub potential_count: i32,
    pub is_manual: bool,
    pub status: ActionStatus,
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// A campaign as reported by the marketplace, before it touches the mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCampaign {
    pub action_id: i64,
    pub title: String,
    pub action_type: String,
    pub date_start: Option<DateTime<Utc>>,
    pub date_end: Option<DateTime<Utc>>,
    pub participating_count: i32,
    pub potential_count: i32,
}

/// Operator-registered campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualAction {
    pub shop_id: i64,
    pub action_id: i64,
    pub title: String,
    pub kind: PromotionKind,
    #[serde(default)]
    pub date_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub date_end: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Enrollment ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrollmentStatus {
    /// Written before the remote call; resolved by confirm/reject or the sweep.
    Pending,
    Active,
    Exited,
    Rejected,
}

impl EnrollmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentStatus::Pending => "pending",
            EnrollmentStatus::Active => "active",
            EnrollmentStatus::Exited => "exited",
            EnrollmentStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Result<Self, UnknownVariant> {
        match s {
            "pending" => Ok(EnrollmentStatus::Pending),
            "active" => Ok(EnrollmentStatus::Active),
            "exited" => Ok(EnrollmentStatus::Exited),
            "rejected" => Ok(EnrollmentStatus::Rejected),
            other => Err(unknown("enrollment status", other)),
        }
    }

    /// Rows in these states occupy the (product, kind, action) slot.
    pub fn holds_slot(&self) -> bool {
        matches!(self, EnrollmentStatus::Pending | EnrollmentStatus::Active)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotedProduct {
    pub id: i64,
    pub product_id: i64,
    pub promotion_kind: PromotionKind,
    pub action_id: i64,
    pub action_price: Price,
    pub status: EnrollmentStatus,
    pub created_at: DateTime<Utc>,
    pub enrolled_at: Option<DateTime<Utc>>,
    pub exited_at: Option<DateTime<Utc>>,
}

/// Result of writing the `pending` marker ahead of a remote enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentClaim {
    /// New pending row; the caller owns it and must confirm or reject.
    Claimed(i64),
    /// An active row already holds the slot.
    AlreadyEnrolled,
    /// Another pending row holds the slot (concurrent or crashed attempt).
    InFlight,
}

/// A pending ledger row joined with what the sweep needs to re-query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEnrollment {
    pub enrollment: PromotedProduct,
    pub shop_id: i64,
    pub remote_product_id: i64,
}

// ---------------------------------------------------------------------------
// Loss ledger
// ---------------------------------------------------------------------------

/// Outcome of importing one loss row for (product, date).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossUpsert {
    Inserted(i64),
    /// Existing unprocessed row; `new_price` refreshed.
    Refreshed(i64),
    /// Existing row already processed; left untouched.
    AlreadyProcessed(i64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LossProduct {
    pub id: i64,
    pub product_id: i64,
    pub loss_date: NaiveDate,
    pub original_price: Price,
    pub new_price: Price,
    pub price_updated: bool,
    pub promotion_exited: bool,
    pub promotion_rejoined: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Individually written step booleans of a loss row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossStep {
    PromotionExited,
    PriceUpdated,
    PromotionRejoined,
}

impl LossStep {
    pub fn column(&self) -> &'static str {
        match self {
            LossStep::PromotionExited => "promotion_exited",
            LossStep::PriceUpdated => "price_updated",
            LossStep::PromotionRejoined => "promotion_rejoined",
        }
    }

    pub fn is_done(&self, row: &LossProduct) -> bool {
        match self {
            LossStep::PromotionExited => row.promotion_exited,
            LossStep::PriceUpdated => row.price_updated,
            LossStep::PromotionRejoined => row.promotion_rejoined,
        }
    }
}

// ---------------------------------------------------------------------------
// Campaign selection
// ---------------------------------------------------------------------------

/// Which campaigns a workflow targets.
///
/// On the wire this is the optional `action_ids` field: absent or `null`
/// selects every active campaign of the shop, an array selects exactly those.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CampaignSelector {
    #[default]
    AllActive,
    Explicit(Vec<i64>),
}

impl CampaignSelector {
    pub fn from_ids(ids: Option<Vec<i64>>) -> Self {
        match ids {
            Some(ids) => CampaignSelector::Explicit(ids),
            None => CampaignSelector::AllActive,
        }
    }
}

impl Serialize for CampaignSelector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CampaignSelector::AllActive => serializer.serialize_none(),
            CampaignSelector::Explicit(ids) => serializer.serialize_some(ids),
        }
    }
}

impl<'de> Deserialize<'de> for CampaignSelector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let ids = Option::<Vec<i64>>::deserialize(deserializer)?;
        Ok(CampaignSelector::from_ids(ids))
    }
}

// ---------------------------------------------------------------------------
// Queries and stats
// ---------------------------------------------------------------------------

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 200;

/// Product listing filter. `page` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductQuery {
    pub shop_id: i64,
    #[serde(default)]
    pub is_loss: Option<bool>,
    #[serde(default)]
    pub is_promoted: Option<bool>,
    /// Case-insensitive substring on name or source SKU.
    #[serde(default)]
    pub keyword: Option<String>,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

fn default_page() -> i64 {
    1
}

fn default_page_size() -> i64 {
    DEFAULT_PAGE_SIZE
}

impl ProductQuery {
    pub fn for_shop(shop_id: i64) -> Self {
        Self {
            shop_id,
            is_loss: None,
            is_promoted: None,
            keyword: None,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// (limit, offset) with page and size clamped to sane bounds.
    pub fn limit_offset(&self) -> (i64, i64) {
        let size = self.page_size.clamp(1, MAX_PAGE_SIZE);
        let page = self.page.max(1);
        (size, (page - 1) * size)
    }

    pub fn matches(&self, p: &Product) -> bool {
        if p.shop_id != self.shop_id {
            return false;
        }
        if self.is_loss.is_some_and(|v| v != p.is_loss) {
            return false;
        }
        if self.is_promoted.is_some_and(|v| v != p.is_promoted) {
            return false;
        }
        match self.keyword.as_deref().map(str::trim) {
            Some(k) if !k.is_empty() => {
                let k = k.to_lowercase();
                p.name.to_lowercase().contains(&k) || p.source_sku.to_lowercase().contains(&k)
            }
            _ => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductListItem {
    #[serde(flatten)]
    pub product: Product,
    pub active_enrollments: Vec<PromotedProduct>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductPage {
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub items: Vec<ProductListItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KindCount {
    pub elastic_boost: i64,
    pub discount: i64,
    pub other: i64,
}

impl KindCount {
    pub fn add(&mut self, kind: PromotionKind, n: i64) {
        match kind {
            PromotionKind::ElasticBoost => self.elastic_boost += n,
            PromotionKind::Discount => self.discount += n,
            PromotionKind::Other => self.other += n,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatsOverview {
    pub shop_id: i64,
    pub total_products: i64,
    pub loss_products: i64,
    pub promoted_products: i64,
    /// active, not loss, not promoted
    pub promotable_products: i64,
    pub active_enrollments: KindCount,
    pub unprocessed_loss: i64,
    pub active_actions: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_comes_from_type_code_not_title() {
        assert_eq!(
            PromotionKind::from_remote_type("ELASTIC_BOOST"),
            PromotionKind::ElasticBoost
        );
        assert_eq!(
            PromotionKind::from_remote_type("discount_with_condition"),
            PromotionKind::Discount
        );
        assert_eq!(
            PromotionKind::from_remote_type("STOCK_DISCOUNT"),
            PromotionKind::Discount
        );
        assert_eq!(PromotionKind::from_remote_type("MARKETPLACE_MULTI_LEVEL_DISCOUNT_ON_AMOUNT"), PromotionKind::Other);
        assert_eq!(PromotionKind::from_remote_type(""), PromotionKind::Other);
    }

    #[test]
    fn status_strings_round_trip() {
        for s in ["pending", "active", "exited", "rejected"] {
            assert_eq!(EnrollmentStatus::parse(s).unwrap().as_str(), s);
        }
        for k in PromotionKind::ALL {
            assert_eq!(PromotionKind::parse(k.as_str()).unwrap(), k);
        }
        let err = ActionStatus::parse("paused").unwrap_err();
        assert_eq!(err.to_string(), "invalid action status: paused");
    }

    #[derive(Deserialize)]
    struct Req {
        #[serde(default)]
        action_ids: CampaignSelector,
    }

    #[test]
    fn selector_missing_or_null_means_all_active() {
        let a: Req = serde_json::from_str("{}").unwrap();
        let b: Req = serde_json::from_str(r#"{"action_ids":null}"#).unwrap();
        let c: Req = serde_json::from_str(r#"{"action_ids":[7,9]}"#).unwrap();
        let d: Req = serde_json::from_str(r#"{"action_ids":[]}"#).unwrap();
        assert_eq!(a.action_ids, CampaignSelector::AllActive);
        assert_eq!(b.action_ids, CampaignSelector::AllActive);
        assert_eq!(c.action_ids, CampaignSelector::Explicit(vec![7, 9]));
        assert_eq!(d.action_ids, CampaignSelector::Explicit(vec![]));
    }

    #[test]
    fn only_pending_and_active_hold_the_slot() {
        assert!(EnrollmentStatus::Pending.holds_slot());
        assert!(EnrollmentStatus::Active.holds_slot());
        assert!(!EnrollmentStatus::Exited.holds_slot());
        assert!(!EnrollmentStatus::Rejected.holds_slot());
    }
}
