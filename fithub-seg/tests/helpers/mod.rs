//! Shared fixtures for fithub-seg integration tests

#![allow(dead_code)]

use chrono::{Duration, Utc};
use fithub_common::db::{init_database_pool, insert_order, OrderRecord, OrderStatus, PaymentStatus};
use fithub_seg::config::{Bounds, OutlierRule, SegmentationConfig};
use fithub_seg::db::SegmentStore;
use fithub_seg::services::{JobRunner, OrderHistoryReader};
use sqlx::SqlitePool;
use tempfile::TempDir;

/// File-backed database that lives as long as the fixture
pub struct TestDb {
    pub dir: TempDir,
    pub pool: SqlitePool,
}

pub async fn test_db() -> TestDb {
    let dir = TempDir::new().unwrap();
    let pool = init_database_pool(&dir.path().join("fithub.db")).await.unwrap();
    TestDb { dir, pool }
}

/// Fewer restarts keep the suite quick; everything else is the default
pub fn test_config() -> SegmentationConfig {
    SegmentationConfig {
        restarts: 3,
        ..SegmentationConfig::default()
    }
}

/// Config flagging anyone who spent more than 10,000
pub fn sales_cap_config(clusters: usize) -> SegmentationConfig {
    SegmentationConfig {
        clusters,
        outliers: OutlierRule::Thresholds {
            sales: Bounds {
                lower: None,
                upper: Some(10_000.0),
            },
            frequency: Bounds::default(),
            recency: Bounds::default(),
        },
        ..test_config()
    }
}

pub fn runner(pool: &SqlitePool, config: SegmentationConfig) -> JobRunner {
    let reader = OrderHistoryReader::new(pool.clone(), config.qualifying.clone());
    JobRunner::new(reader, SegmentStore::new(pool.clone()), config)
}

/// Insert a delivered, paid order placed `days_ago` days before now
pub async fn seed_order(pool: &SqlitePool, order_id: &str, customer: &str, amount: f64, days_ago: i64) {
    seed_order_with_status(pool, order_id, customer, amount, days_ago, OrderStatus::Delivered).await;
}

pub async fn seed_order_with_status(
    pool: &SqlitePool,
    order_id: &str,
    customer: &str,
    amount: f64,
    days_ago: i64,
    status: OrderStatus,
) {
    let order = OrderRecord {
        order_id: order_id.to_string(),
        customer_id: customer.to_string(),
        total_amount: amount,
        status,
        payment_status: PaymentStatus::Completed,
        created_at: Utc::now() - Duration::days(days_ago) - Duration::hours(1),
    };
    insert_order(pool, &order).await.unwrap();
}

/// `n` orders for one customer, one per day, splitting `total` evenly
pub async fn seed_customer(pool: &SqlitePool, customer: &str, n: usize, total: f64, last_days_ago: i64) {
    for i in 0..n {
        seed_order(
            pool,
            &format!("{}-{}", customer, i),
            customer,
            total / n as f64,
            last_days_ago + i as i64,
        )
        .await;
    }
}

/// A spread-out population of eight regular customers
pub async fn seed_population(pool: &SqlitePool) {
    seed_customer(pool, "cust-01", 1, 40.0, 90).await;
    seed_customer(pool, "cust-02", 1, 55.0, 80).await;
    seed_customer(pool, "cust-03", 2, 120.0, 60).await;
    seed_customer(pool, "cust-04", 2, 140.0, 45).await;
    seed_customer(pool, "cust-05", 3, 300.0, 20).await;
    seed_customer(pool, "cust-06", 3, 320.0, 15).await;
    seed_customer(pool, "cust-07", 4, 520.0, 3).await;
    seed_customer(pool, "cust-08", 4, 560.0, 1).await;
}
