//! Product and promotion mirror statements.
//!
//! Each function is one statement and commits on its own. Workflows compose
//! them step by step; nothing here opens a multi-step transaction.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use pdk_schemas::{
    ActionStatus, EnrollmentClaim, EnrollmentStatus, ManualAction, PendingEnrollment, Price,
    Product, ProductQuery, ProductStatus, ProductUpsert, PromotedProduct, PromotionAction,
    PromotionKind, RemoteCampaign,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::enum_col;

const PRODUCT_COLS: &str = r#"
    id, shop_id, remote_product_id, remote_sku, source_sku, name,
    current_price_minor, status, is_loss, is_promoted, last_synced_at
"#;

const ACTION_COLS: &str = r#"
    id, shop_id, action_id, title, action_type, promotion_kind, date_start, date_end,
    participating_count, potential_count, is_manual, status, last_synced_at
"#;

const ENROLLMENT_COLS: &str = r#"
    id, product_id, promotion_kind, action_id, action_price_minor, status,
    created_at, enrolled_at, exited_at
"#;

fn product_from_row(r: &PgRow) -> Result<Product> {
    let status: String = r.try_get("status")?;
    Ok(Product {
        id: r.try_get("id")?,
        shop_id: r.try_get("shop_id")?,
        remote_product_id: r.try_get("remote_product_id")?,
        remote_sku: r.try_get("remote_sku")?,
        source_sku: r.try_get("source_sku")?,
        name: r.try_get("name")?,
        current_price: Price::from_minor(r.try_get("current_price_minor")?),
        status: enum_col(ProductStatus::parse(&status), "products.status")?,
        is_loss: r.try_get("is_loss")?,
        is_promoted: r.try_get("is_promoted")?,
        last_synced_at: r.try_get("last_synced_at")?,
    })
}

fn action_from_row(r: &PgRow) -> Result<PromotionAction> {
    let kind: String = r.try_get("promotion_kind")?;
    let status: String = r.try_get("status")?;
    Ok(PromotionAction {
        id: r.try_get("id")?,
        shop_id: r.try_get("shop_id")?,
        action_id: r.try_get("action_id")?,
        title: r.try_get("title")?,
        action_type: r.try_get("action_type")?,
        kind: enum_col(PromotionKind::parse(&kind), "promotion_actions.promotion_kind")?,
        date_start: r.try_get("date_start")?,
        date_end: r.try_get("date_end")?,
        participating_count: r.try_get("participating_count")?,
        potential_count: r.try_get("potential_count")?,
        is_manual: r.try_get("is_manual")?,
        status: enum_col(ActionStatus::parse(&status), "promotion_actions.status")?,
        last_synced_at: r.try_get("last_synced_at")?,
    })
}

pub(crate) fn enrollment_from_row(r: &PgRow) -> Result<PromotedProduct> {
    let kind: String = r.try_get("promotion_kind")?;
    let status: String = r.try_get("status")?;
    Ok(PromotedProduct {
        id: r.try_get("id")?,
        product_id: r.try_get("product_id")?,
        promotion_kind: enum_col(PromotionKind::parse(&kind), "promoted_products.promotion_kind")?,
        action_id: r.try_get("action_id")?,
        action_price: Price::from_minor(r.try_get("action_price_minor")?),
        status: enum_col(EnrollmentStatus::parse(&status), "promoted_products.status")?,
        created_at: r.try_get("created_at")?,
        enrolled_at: r.try_get("enrolled_at")?,
        exited_at: r.try_get("exited_at")?,
    })
}

// ---------------------------------------------------------------------------
// Products
// ---------------------------------------------------------------------------

pub async fn fetch_product(pool: &PgPool, shop_id: i64, product_id: i64) -> Result<Option<Product>> {
    let sql = format!("select {PRODUCT_COLS} from products where shop_id = $1 and id = $2");
    let row = sqlx::query(&sql)
        .bind(shop_id)
        .bind(product_id)
        .fetch_optional(pool)
        .await
        .context("fetch_product failed")?;
    row.as_ref().map(product_from_row).transpose()
}

pub async fn fetch_product_by_source_sku(
    pool: &PgPool,
    shop_id: i64,
    source_sku: &str,
) -> Result<Option<Product>> {
    let sql = format!("select {PRODUCT_COLS} from products where shop_id = $1 and source_sku = $2");
    let row = sqlx::query(&sql)
        .bind(shop_id)
        .bind(source_sku)
        .fetch_optional(pool)
        .await
        .context("fetch_product_by_source_sku failed")?;
    row.as_ref().map(product_from_row).transpose()
}

/// Active products of a shop, optionally without loss and/or promoted ones.
pub async fn eligible_products(
    pool: &PgPool,
    shop_id: i64,
    exclude_loss: bool,
    exclude_promoted: bool,
) -> Result<Vec<Product>> {
    let sql = format!(
        r#"
        select {PRODUCT_COLS}
        from products
        where shop_id = $1
          and status = 'active'
          and ($2 = false or is_loss = false)
          and ($3 = false or is_promoted = false)
        order by id
        "#
    );
    let rows = sqlx::query(&sql)
        .bind(shop_id)
        .bind(exclude_loss)
        .bind(exclude_promoted)
        .fetch_all(pool)
        .await
        .context("eligible_products failed")?;
    rows.iter().map(product_from_row).collect()
}

/// Upsert on (shop, remote id). Flags are left alone on update.
pub async fn upsert_product(pool: &PgPool, p: &ProductUpsert) -> Result<i64> {
    let (id,): (i64,) = sqlx::query_as::<_, (i64,)>(
        r#"
        insert into products (
          shop_id, remote_product_id, remote_sku, source_sku, name,
          current_price_minor, status, last_synced_at
        ) values (
          $1, $2, $3, $4, $5, $6, 'active', $7
        )
        on conflict (shop_id, remote_product_id) do update set
          remote_sku = excluded.remote_sku,
          source_sku = excluded.source_sku,
          name = excluded.name,
          current_price_minor = excluded.current_price_minor,
          status = 'active',
          last_synced_at = excluded.last_synced_at,
          updated_at = now()
        returning id
        "#,
    )
    .bind(p.shop_id)
    .bind(p.remote_product_id)
    .bind(p.remote_sku)
    .bind(&p.source_sku)
    .bind(&p.name)
    .bind(p.current_price.minor())
    .bind(p.synced_at)
    .fetch_one(pool)
    .await
    .with_context(|| format!("upsert_product failed remote_id={}", p.remote_product_id))?;
    Ok(id)
}

pub async fn set_product_price(pool: &PgPool, product_id: i64, price: Price) -> Result<()> {
    sqlx::query("update products set current_price_minor = $2, updated_at = now() where id = $1")
        .bind(product_id)
        .bind(price.minor())
        .execute(pool)
        .await
        .context("set_product_price failed")?;
    Ok(())
}

pub async fn set_product_promoted(pool: &PgPool, product_id: i64, promoted: bool) -> Result<()> {
    sqlx::query("update products set is_promoted = $2, updated_at = now() where id = $1")
        .bind(product_id)
        .bind(promoted)
        .execute(pool)
        .await
        .context("set_product_promoted failed")?;
    Ok(())
}

pub async fn set_product_loss(pool: &PgPool, product_id: i64, is_loss: bool) -> Result<()> {
    sqlx::query("update products set is_loss = $2, updated_at = now() where id = $1")
        .bind(product_id)
        .bind(is_loss)
        .execute(pool)
        .await
        .context("set_product_loss failed")?;
    Ok(())
}

/// Filtered page plus total count of matching rows.
pub async fn list_products(pool: &PgPool, q: &ProductQuery) -> Result<(Vec<Product>, i64)> {
    let (limit, offset) = q.limit_offset();
    let keyword = q
        .keyword
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(|k| format!("%{}%", k.to_lowercase()));

    const FILTER: &str = r#"
        where shop_id = $1
          and ($2::boolean is null or is_loss = $2)
          and ($3::boolean is null or is_promoted = $3)
          and ($4::text is null or lower(name) like $4 or lower(source_sku) like $4)
    "#;

    let (total,): (i64,) =
        sqlx::query_as::<_, (i64,)>(&format!("select count(*)::bigint from products {FILTER}"))
            .bind(q.shop_id)
            .bind(q.is_loss)
            .bind(q.is_promoted)
            .bind(keyword.as_deref())
            .fetch_one(pool)
            .await
            .context("list_products count failed")?;

    let sql = format!("select {PRODUCT_COLS} from products {FILTER} order by id limit $5 offset $6");
    let rows = sqlx::query(&sql)
        .bind(q.shop_id)
        .bind(q.is_loss)
        .bind(q.is_promoted)
        .bind(keyword.as_deref())
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
        .context("list_products failed")?;

    let items = rows.iter().map(product_from_row).collect::<Result<Vec<_>>>()?;
    Ok((items, total))
}

// ---------------------------------------------------------------------------
// Promotion actions
// ---------------------------------------------------------------------------

pub async fn fetch_action(pool: &PgPool, shop_id: i64, action_id: i64) -> Result<Option<PromotionAction>> {
    let sql = format!("select {ACTION_COLS} from promotion_actions where shop_id = $1 and action_id = $2");
    let row = sqlx::query(&sql)
        .bind(shop_id)
        .bind(action_id)
        .fetch_optional(pool)
        .await
        .context("fetch_action failed")?;
    row.as_ref().map(action_from_row).transpose()
}

/// Rows for the given remote ids, in the order of `action_ids`; unknown ids
/// are simply absent.
pub async fn actions_by_ids(pool: &PgPool, shop_id: i64, action_ids: &[i64]) -> Result<Vec<PromotionAction>> {
    let sql = format!(
        r#"
        select {ACTION_COLS}
        from promotion_actions
        where shop_id = $1 and action_id = any($2)
        order by array_position($2, action_id)
        "#
    );
    let rows = sqlx::query(&sql)
        .bind(shop_id)
        .bind(action_ids)
        .fetch_all(pool)
        .await
        .context("actions_by_ids failed")?;
    rows.iter().map(action_from_row).collect()
}

pub async fn active_actions(pool: &PgPool, shop_id: i64) -> Result<Vec<PromotionAction>> {
    let sql = format!(
        "select {ACTION_COLS} from promotion_actions where shop_id = $1 and status = 'active' order by action_id"
    );
    let rows = sqlx::query(&sql)
        .bind(shop_id)
        .fetch_all(pool)
        .await
        .context("active_actions failed")?;
    rows.iter().map(action_from_row).collect()
}

pub async fn list_actions(pool: &PgPool, shop_id: i64) -> Result<Vec<PromotionAction>> {
    let sql = format!(
        "select {ACTION_COLS} from promotion_actions where shop_id = $1 order by is_manual, action_id"
    );
    let rows = sqlx::query(&sql)
        .bind(shop_id)
        .fetch_all(pool)
        .await
        .context("list_actions failed")?;
    rows.iter().map(action_from_row).collect()
}

/// Upsert a synced campaign on (shop, action id).
///
/// Manual rows keep title, type, kind and the manual flag; only counts,
/// dates and `last_synced_at` are refreshed. A synced row that reappears
/// remotely is reactivated unless an operator disabled it.
pub async fn upsert_synced_action(
    pool: &PgPool,
    shop_id: i64,
    c: &RemoteCampaign,
    kind: PromotionKind,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        insert into promotion_actions (
          shop_id, action_id, title, action_type, promotion_kind, date_start, date_end,
          participating_count, potential_count, is_manual, status, last_synced_at
        ) values (
          $1, $2, $3, $4, $5, $6, $7, $8, $9, false, 'active', $10
        )
        on conflict (shop_id, action_id) do update set
          title = case when promotion_actions.is_manual then promotion_actions.title else excluded.title end,
          action_type = case when promotion_actions.is_manual then promotion_actions.action_type else excluded.action_type end,
          promotion_kind = case when promotion_actions.is_manual then promotion_actions.promotion_kind else excluded.promotion_kind end,
          date_start = excluded.date_start,
          date_end = excluded.date_end,
          participating_count = excluded.participating_count,
          potential_count = excluded.potential_count,
          status = case when promotion_actions.status = 'disabled' then 'disabled' else 'active' end,
          last_synced_at = excluded.last_synced_at
        "#,
    )
    .bind(shop_id)
    .bind(c.action_id)
    .bind(&c.title)
    .bind(&c.action_type)
    .bind(kind.as_str())
    .bind(c.date_start)
    .bind(c.date_end)
    .bind(c.participating_count)
    .bind(c.potential_count)
    .bind(now)
    .execute(pool)
    .await
    .with_context(|| format!("upsert_synced_action failed action_id={}", c.action_id))?;
    Ok(())
}

/// Mark synced active campaigns missing from `seen_action_ids` as expired.
pub async fn expire_missing_actions(pool: &PgPool, shop_id: i64, seen_action_ids: &[i64]) -> Result<u64> {
    let res = sqlx::query(
        r#"
        update promotion_actions
        set status = 'expired'
        where shop_id = $1
          and is_manual = false
          and status = 'active'
          and not (action_id = any($2))
        "#,
    )
    .bind(shop_id)
    .bind(seen_action_ids)
    .execute(pool)
    .await
    .context("expire_missing_actions failed")?;
    Ok(res.rows_affected())
}

/// Register an operator campaign. Returns `None` if (shop, action id) exists.
pub async fn insert_manual_action(pool: &PgPool, m: &ManualAction) -> Result<Option<PromotionAction>> {
    let sql = format!(
        r#"
        insert into promotion_actions (
          shop_id, action_id, title, action_type, promotion_kind, date_start, date_end,
          is_manual, status
        ) values (
          $1, $2, $3, 'MANUAL', $4, $5, $6, true, 'active'
        )
        on conflict (shop_id, action_id) do nothing
        returning {ACTION_COLS}
        "#
    );
    let row = sqlx::query(&sql)
        .bind(m.shop_id)
        .bind(m.action_id)
        .bind(&m.title)
        .bind(m.kind.as_str())
        .bind(m.date_start)
        .bind(m.date_end)
        .fetch_optional(pool)
        .await
        .context("insert_manual_action failed")?;
    row.as_ref().map(action_from_row).transpose()
}

pub async fn set_action_status(
    pool: &PgPool,
    shop_id: i64,
    action_id: i64,
    status: ActionStatus,
) -> Result<bool> {
    let res = sqlx::query("update promotion_actions set status = $3 where shop_id = $1 and action_id = $2")
        .bind(shop_id)
        .bind(action_id)
        .bind(status.as_str())
        .execute(pool)
        .await
        .context("set_action_status failed")?;
    Ok(res.rows_affected() > 0)
}

pub async fn delete_action(pool: &PgPool, shop_id: i64, action_id: i64) -> Result<bool> {
    let res = sqlx::query("delete from promotion_actions where shop_id = $1 and action_id = $2")
        .bind(shop_id)
        .bind(action_id)
        .execute(pool)
        .await
        .context("delete_action failed")?;
    Ok(res.rows_affected() > 0)
}

// ---------------------------------------------------------------------------
// Enrollment ledger
// ---------------------------------------------------------------------------

/// Write the `pending` marker for (product, kind, action).
///
/// The partial unique index makes this the cross-process guard: if a live
/// row already exists the insert is a no-op and the existing row's status
/// decides the outcome.
pub async fn begin_enrollment(
    pool: &PgPool,
    product_id: i64,
    kind: PromotionKind,
    action_id: i64,
    action_price: Price,
) -> Result<EnrollmentClaim> {
    let inserted: Option<(i64,)> = sqlx::query_as::<_, (i64,)>(
        r#"
        insert into promoted_products (
          product_id, promotion_kind, action_id, action_price_minor, status
        ) values (
          $1, $2, $3, $4, 'pending'
        )
        on conflict (product_id, promotion_kind, action_id)
          where status in ('pending','active')
          do nothing
        returning id
        "#,
    )
    .bind(product_id)
    .bind(kind.as_str())
    .bind(action_id)
    .bind(action_price.minor())
    .fetch_optional(pool)
    .await
    .context("begin_enrollment insert failed")?;

    if let Some((id,)) = inserted {
        return Ok(EnrollmentClaim::Claimed(id));
    }

    let existing: Option<(String,)> = sqlx::query_as::<_, (String,)>(
        r#"
        select status
        from promoted_products
        where product_id = $1 and promotion_kind = $2 and action_id = $3
          and status in ('pending','active')
        limit 1
        "#,
    )
    .bind(product_id)
    .bind(kind.as_str())
    .bind(action_id)
    .fetch_optional(pool)
    .await
    .context("begin_enrollment lookup failed")?;

    Ok(match existing {
        Some((s,)) if s == "active" => EnrollmentClaim::AlreadyEnrolled,
        // Either pending, or the slot was freed between the two statements;
        // in both cases another attempt owns the outcome.
        _ => EnrollmentClaim::InFlight,
    })
}

pub async fn confirm_enrollment(pool: &PgPool, enrollment_id: i64, now: DateTime<Utc>) -> Result<()> {
    sqlx::query(
        "update promoted_products set status = 'active', enrolled_at = $2 where id = $1 and status = 'pending'",
    )
    .bind(enrollment_id)
    .bind(now)
    .execute(pool)
    .await
    .context("confirm_enrollment failed")?;
    Ok(())
}

pub async fn reject_enrollment(pool: &PgPool, enrollment_id: i64) -> Result<()> {
    sqlx::query("update promoted_products set status = 'rejected' where id = $1 and status = 'pending'")
        .bind(enrollment_id)
        .execute(pool)
        .await
        .context("reject_enrollment failed")?;
    Ok(())
}

pub async fn active_enrollments(pool: &PgPool, product_id: i64) -> Result<Vec<PromotedProduct>> {
    let sql = format!(
        "select {ENROLLMENT_COLS} from promoted_products where product_id = $1 and status = 'active' order by id"
    );
    let rows = sqlx::query(&sql)
        .bind(product_id)
        .fetch_all(pool)
        .await
        .context("active_enrollments failed")?;
    rows.iter().map(enrollment_from_row).collect()
}

/// Active rows for many products at once (listing).
pub async fn active_enrollments_for(pool: &PgPool, product_ids: &[i64]) -> Result<Vec<PromotedProduct>> {
    let sql = format!(
        "select {ENROLLMENT_COLS} from promoted_products where product_id = any($1) and status = 'active' order by product_id, id"
    );
    let rows = sqlx::query(&sql)
        .bind(product_ids)
        .fetch_all(pool)
        .await
        .context("active_enrollments_for failed")?;
    rows.iter().map(enrollment_from_row).collect()
}

pub async fn mark_enrollment_exited(pool: &PgPool, enrollment_id: i64, now: DateTime<Utc>) -> Result<()> {
    sqlx::query(
        "update promoted_products set status = 'exited', exited_at = $2 where id = $1 and status = 'active'",
    )
    .bind(enrollment_id)
    .bind(now)
    .execute(pool)
    .await
    .context("mark_enrollment_exited failed")?;
    Ok(())
}

/// Pending rows of a shop created at or before `cutoff`, oldest first.
pub async fn pending_enrollments(
    pool: &PgPool,
    shop_id: i64,
    cutoff: DateTime<Utc>,
) -> Result<Vec<PendingEnrollment>> {
    let rows = sqlx::query(
        r#"
        select pp.id, pp.product_id, pp.promotion_kind, pp.action_id, pp.action_price_minor,
               pp.status, pp.created_at, pp.enrolled_at, pp.exited_at,
               p.shop_id, p.remote_product_id
        from promoted_products pp
        join products p on p.id = pp.product_id
        where p.shop_id = $1
          and pp.status = 'pending'
          and pp.created_at <= $2
        order by pp.created_at, pp.id
        "#,
    )
    .bind(shop_id)
    .bind(cutoff)
    .fetch_all(pool)
    .await
    .context("pending_enrollments failed")?;

    rows.iter()
        .map(|r| {
            Ok(PendingEnrollment {
                enrollment: enrollment_from_row(r)?,
                shop_id: r.try_get("shop_id")?,
                remote_product_id: r.try_get("remote_product_id")?,
            })
        })
        .collect()
}
