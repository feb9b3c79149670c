use anyhow::{Context, Result};
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;
use tracing::info;

/// PostgreSQL connection options
#[derive(Clone, Debug)]
pub struct PoolOpts {
    /// PostgreSQL connection URI
    pub database_url: String,
    /// Maximum number of pooled connections
    pub max_connections: usize,
}

/// Create a connection pool and check that the database is reachable.
pub async fn new_postgresql_pool(opts: &PoolOpts) -> Result<Pool> {
    let mut config = Config::new();
    config.url = Some(opts.database_url.clone());
    config.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });
    config.pool = Some(PoolConfig::new(opts.max_connections.max(1)));

    let pool = config
        .create_pool(Some(Runtime::Tokio1), NoTls)
        .context("Failed to create PostgreSQL connection pool")?;

    let client = pool
        .get()
        .await
        .context("Failed to connect to PostgreSQL")?;
    let row = client
        .query_one("SELECT current_database(), current_schema()", &[])
        .await
        .context("PostgreSQL connectivity check failed")?;
    let database: String = row.get(0);
    let schema: Option<String> = row.get(1);
    info!(
        "Connected to PostgreSQL database '{}' (schema {}), pool size {}",
        database,
        schema.as_deref().unwrap_or("<none>"),
        opts.max_connections
    );
    Ok(pool)
}
