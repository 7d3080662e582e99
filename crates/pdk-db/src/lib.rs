use anyhow::{anyhow, Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};
use sqlx::Row;

pub mod loss;
pub mod mirror;
pub mod stats;

pub use loss::*;
pub use mirror::*;
pub use stats::*;

pub const ENV_DB_URL: &str = "PDK_DATABASE_URL";

/// Connect to Postgres using PDK_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL)
        .with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url).await
}

pub async fn connect(url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(pool)
}

/// Pool for DB-backed tests: connect and migrate.
pub async fn testkit_db_pool() -> Result<PgPool> {
    let pool = connect_from_env().await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Connectivity plus schema presence.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='promoted_products'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_ledger_tables: exists,
    })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_ledger_tables: bool,
}

// ---------------------------------------------------------------------------
// Shops
// ---------------------------------------------------------------------------

/// Shop row including the marketplace API key. Never log this struct.
#[derive(Clone)]
pub struct ShopRow {
    pub id: i64,
    pub name: String,
    pub client_id: String,
    pub api_key: String,
}

impl std::fmt::Debug for ShopRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShopRow")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("client_id", &self.client_id)
            .field("api_key", &"<REDACTED>")
            .finish()
    }
}

pub async fn insert_shop(pool: &PgPool, name: &str, client_id: &str, api_key: &str) -> Result<i64> {
    let (id,): (i64,) = sqlx::query_as::<_, (i64,)>(
        r#"
        insert into shops (name, client_id, api_key)
        values ($1, $2, $3)
        returning id
        "#,
    )
    .bind(name)
    .bind(client_id)
    .bind(api_key)
    .fetch_one(pool)
    .await
    .context("insert_shop failed")?;
    Ok(id)
}

pub async fn fetch_shop(pool: &PgPool, shop_id: i64) -> Result<Option<ShopRow>> {
    let row = sqlx::query(
        r#"
        select id, name, client_id, api_key
        from shops
        where id = $1
        "#,
    )
    .bind(shop_id)
    .fetch_optional(pool)
    .await
    .context("fetch_shop failed")?;

    row.map(|r| -> Result<ShopRow> {
        Ok(ShopRow {
            id: r.try_get("id")?,
            name: r.try_get("name")?,
            client_id: r.try_get("client_id")?,
            api_key: r.try_get("api_key")?,
        })
    })
    .transpose()
}

pub(crate) fn enum_col<T, E: std::fmt::Display>(
    parsed: std::result::Result<T, E>,
    column: &str,
) -> Result<T> {
    parsed.map_err(|e| anyhow!("column {column}: {e}"))
}
