use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use pdk_schemas::{LossProduct, LossStep, LossUpsert, Price};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

const LOSS_COLS: &str = r#"
    lp.id, lp.product_id, lp.loss_date, lp.original_price_minor, lp.new_price_minor,
    lp.price_updated, lp.promotion_exited, lp.promotion_rejoined, lp.processed_at, lp.created_at
"#;

fn loss_from_row(r: &PgRow) -> Result<LossProduct> {
    Ok(LossProduct {
        id: r.try_get("id")?,
        product_id: r.try_get("product_id")?,
        loss_date: r.try_get("loss_date")?,
        original_price: Price::from_minor(r.try_get("original_price_minor")?),
        new_price: Price::from_minor(r.try_get("new_price_minor")?),
        price_updated: r.try_get("price_updated")?,
        promotion_exited: r.try_get("promotion_exited")?,
        promotion_rejoined: r.try_get("promotion_rejoined")?,
        processed_at: r.try_get("processed_at")?,
        created_at: r.try_get("created_at")?,
    })
}

/// Insert the (product, date) row, or refresh `new_price` if it exists and
/// has not been processed yet.
pub async fn upsert_loss_product(
    pool: &PgPool,
    product_id: i64,
    loss_date: NaiveDate,
    original_price: Price,
    new_price: Price,
) -> Result<LossUpsert> {
    let inserted: Option<(i64,)> = sqlx::query_as::<_, (i64,)>(
        r#"
        insert into loss_products (product_id, loss_date, original_price_minor, new_price_minor)
        values ($1, $2, $3, $4)
        on conflict (product_id, loss_date) do nothing
        returning id
        "#,
    )
    .bind(product_id)
    .bind(loss_date)
    .bind(original_price.minor())
    .bind(new_price.minor())
    .fetch_optional(pool)
    .await
    .context("upsert_loss_product insert failed")?;

    if let Some((id,)) = inserted {
        return Ok(LossUpsert::Inserted(id));
    }

    let refreshed: Option<(i64,)> = sqlx::query_as::<_, (i64,)>(
        r#"
        update loss_products
        set new_price_minor = $3
        where product_id = $1 and loss_date = $2 and processed_at is null
        returning id
        "#,
    )
    .bind(product_id)
    .bind(loss_date)
    .bind(new_price.minor())
    .fetch_optional(pool)
    .await
    .context("upsert_loss_product refresh failed")?;

    if let Some((id,)) = refreshed {
        return Ok(LossUpsert::Refreshed(id));
    }

    let (id,): (i64,) = sqlx::query_as::<_, (i64,)>(
        "select id from loss_products where product_id = $1 and loss_date = $2",
    )
    .bind(product_id)
    .bind(loss_date)
    .fetch_one(pool)
    .await
    .context("upsert_loss_product lookup failed")?;
    Ok(LossUpsert::AlreadyProcessed(id))
}

/// Loss rows whose product belongs to `shop_id`. Foreign ids are dropped.
pub async fn loss_products_by_ids(pool: &PgPool, shop_id: i64, ids: &[i64]) -> Result<Vec<LossProduct>> {
    let sql = format!(
        r#"
        select {LOSS_COLS}
        from loss_products lp
        join products p on p.id = lp.product_id
        where p.shop_id = $1 and lp.id = any($2)
        order by array_position($2, lp.id)
        "#
    );
    let rows = sqlx::query(&sql)
        .bind(shop_id)
        .bind(ids)
        .fetch_all(pool)
        .await
        .context("loss_products_by_ids failed")?;
    rows.iter().map(loss_from_row).collect()
}

pub async fn unprocessed_loss_products(pool: &PgPool, shop_id: i64) -> Result<Vec<LossProduct>> {
    let sql = format!(
        r#"
        select {LOSS_COLS}
        from loss_products lp
        join products p on p.id = lp.product_id
        where p.shop_id = $1 and lp.processed_at is null
        order by lp.loss_date, lp.id
        "#
    );
    let rows = sqlx::query(&sql)
        .bind(shop_id)
        .fetch_all(pool)
        .await
        .context("unprocessed_loss_products failed")?;
    rows.iter().map(loss_from_row).collect()
}

/// Set one step boolean. The column name comes from a closed enum.
pub async fn mark_loss_step(pool: &PgPool, loss_id: i64, step: LossStep) -> Result<()> {
    let sql = format!("update loss_products set {} = true where id = $1", step.column());
    sqlx::query(&sql)
        .bind(loss_id)
        .execute(pool)
        .await
        .with_context(|| format!("mark_loss_step failed step={}", step.column()))?;
    Ok(())
}

pub async fn mark_loss_processed(pool: &PgPool, loss_id: i64, now: DateTime<Utc>) -> Result<()> {
    sqlx::query("update loss_products set processed_at = $2 where id = $1")
        .bind(loss_id)
        .bind(now)
        .execute(pool)
        .await
        .context("mark_loss_processed failed")?;
    Ok(())
}
