//! Database pool and schema
//!
//! The order tables belong to the storefront; analytics services only read
//! them. `customer_segments` is owned by the segmentation service.

pub mod orders;

pub use orders::{fetch_orders, insert_order, OrderRecord, OrderStatus, PaymentStatus};

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// SQLite busy timeout applied to every pooled connection
pub const BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Open (creating if needed) the shared database and ensure the schema exists
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // mode=rwc: read, write, create
    // WAL lets dashboard readers keep their snapshot while a run replaces segments
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let options = SqliteConnectOptions::from_str(&db_url)?
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create tables and indexes if they don't exist (idempotent)
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS orders (
            order_id TEXT PRIMARY KEY,
            customer_id TEXT NOT NULL,
            total_amount REAL NOT NULL CHECK (total_amount >= 0),
            status TEXT NOT NULL,
            payment_status TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_orders_customer ON orders(customer_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_orders_created_at ON orders(created_at)")
        .execute(pool)
        .await?;

    // One active segment per customer
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS customer_segments (
            customer_id TEXT PRIMARY KEY,
            recency INTEGER NOT NULL,
            frequency INTEGER NOT NULL,
            sales REAL NOT NULL,
            is_outlier INTEGER NOT NULL,
            cluster INTEGER NOT NULL,
            outlier_segment INTEGER,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_customer_segments_cluster ON customer_segments(cluster)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_customer_segments_outlier ON customer_segments(is_outlier)",
    )
    .execute(pool)
    .await?;

    add_outlier_segment_column(pool).await?;

    tracing::debug!("Database tables initialized (orders, customer_segments)");

    Ok(())
}

/// Databases created before outlier sub-segments lack the column
async fn add_outlier_segment_column(pool: &SqlitePool) -> Result<()> {
    let has_column: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM pragma_table_info('customer_segments') WHERE name = 'outlier_segment'",
    )
    .fetch_one(pool)
    .await?;

    if has_column == 0 {
        sqlx::query("ALTER TABLE customer_segments ADD COLUMN outlier_segment INTEGER")
            .execute(pool)
            .await?;
        info!("Added outlier_segment column to customer_segments");
    }

    Ok(())
}
