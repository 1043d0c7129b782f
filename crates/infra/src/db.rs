//! Database wiring: connection pool and schema setup.

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, instrument};

const SCHEMA: &[(&str, &str)] = &[
    ("0001_accounts", include_str!("../migrations/0001_accounts.sql")),
    ("0002_replicas", include_str!("../migrations/0002_replicas.sql")),
    (
        "0003_product_categories",
        include_str!("../migrations/0003_product_categories.sql"),
    ),
];

#[instrument(skip(database_url), err)]
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Apply the bundled schema. Every statement is idempotent.
#[instrument(skip(pool), err)]
pub async fn apply_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    for (name, sql) in SCHEMA {
        sqlx::raw_sql(sql).execute(pool).await?;
        info!(schema = *name, "schema applied");
    }
    Ok(())
}
