use anyhow::{Context, Result};
use pdk_schemas::{KindCount, PromotionKind, StatsOverview};
use sqlx::PgPool;

pub async fn stats_overview(pool: &PgPool, shop_id: i64) -> Result<StatsOverview> {
    let (total, loss, promoted, promotable): (i64, i64, i64, i64) =
        sqlx::query_as::<_, (i64, i64, i64, i64)>(
            r#"
            select
              count(*)::bigint,
              count(*) filter (where is_loss)::bigint,
              count(*) filter (where is_promoted)::bigint,
              count(*) filter (where status = 'active' and not is_loss and not is_promoted)::bigint
            from products
            where shop_id = $1
            "#,
        )
        .bind(shop_id)
        .fetch_one(pool)
        .await
        .context("stats products query failed")?;

    let kinds: Vec<(String, i64)> = sqlx::query_as::<_, (String, i64)>(
        r#"
        select pp.promotion_kind, count(*)::bigint
        from promoted_products pp
        join products p on p.id = pp.product_id
        where p.shop_id = $1 and pp.status = 'active'
        group by pp.promotion_kind
        "#,
    )
    .bind(shop_id)
    .fetch_all(pool)
    .await
    .context("stats enrollments query failed")?;

    let mut active_enrollments = KindCount::default();
    for (kind, n) in kinds {
        let kind = PromotionKind::parse(&kind).unwrap_or(PromotionKind::Other);
        active_enrollments.add(kind, n);
    }

    let (unprocessed_loss,): (i64,) = sqlx::query_as::<_, (i64,)>(
        r#"
        select count(*)::bigint
        from loss_products lp
        join products p on p.id = lp.product_id
        where p.shop_id = $1 and lp.processed_at is null
        "#,
    )
    .bind(shop_id)
    .fetch_one(pool)
    .await
    .context("stats loss query failed")?;

    let (active_actions,): (i64,) = sqlx::query_as::<_, (i64,)>(
        "select count(*)::bigint from promotion_actions where shop_id = $1 and status = 'active'",
    )
    .bind(shop_id)
    .fetch_one(pool)
    .await
    .context("stats actions query failed")?;

    Ok(StatsOverview {
        shop_id,
        total_products: total,
        loss_products: loss,
        promoted_products: promoted,
        promotable_products: promotable,
        active_enrollments,
        unprocessed_loss,
        active_actions,
    })
}
