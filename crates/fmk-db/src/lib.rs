use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub mod pg;
pub mod store;

pub use pg::PgStore;
pub use store::{AcceptOutcome, MarketStore, StoreError, StoreResult};

pub const ENV_DB_URL: &str = "FMK_DATABASE_URL";

/// Connect to Postgres using FMK_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url =
        std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url).await
}

/// Connect to Postgres at an explicit URL.
pub async fn connect(url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;

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

/// Simple status query (connectivity + schema presence).
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;
    let ok = one == 1;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='shipments'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok,
        has_shipments_table: exists,
    })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_shipments_table: bool,
}

/// Count shipments that are mid-workflow: ASSIGNED or IN_TRANSIT.
/// Used by CLI guardrails to prevent accidental migration of a busy market.
pub async fn count_in_progress_shipments(pool: &PgPool) -> Result<i64> {
    // If schema doesn't exist yet, treat as 0 (safe) rather than failing.
    let st = status(pool).await?;
    if !st.has_shipments_table {
        return Ok(0);
    }

    let (n,): (i64,) = sqlx::query_as::<_, (i64,)>(
        r#"
        select count(*)::bigint
        from shipments
        where status in ('assigned','in_transit')
        "#,
    )
    .fetch_one(pool)
    .await
    .context("count_in_progress_shipments failed")?;

    Ok(n)
}

/// Convenience boolean.
pub async fn has_in_progress_shipments(pool: &PgPool) -> Result<bool> {
    Ok(count_in_progress_shipments(pool).await? > 0)
}
