//! End-to-end segmentation runs against file-backed SQLite databases

mod helpers;

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::Utc;
use fithub_common::db::{init_database_pool, OrderStatus};
use fithub_seg::config::{QualifyingPolicy, SegmentationConfig};
use fithub_seg::db::{SegmentStore, SegmentSummaryReader};
use fithub_seg::models::{JobState, RunTrigger, OUTLIER_CLUSTER};
use fithub_seg::services::{JobRunner, OrderHistoryReader};
use fithub_seg::SegmentationError;
use helpers::*;

fn cluster_map(assignments: &[fithub_seg::models::SegmentAssignment]) -> HashMap<String, i64> {
    assignments
        .iter()
        .map(|a| (a.customer_id.clone(), a.cluster))
        .collect()
}

#[tokio::test]
async fn test_customers_without_qualifying_orders_are_not_segmented() {
    let db = test_db().await;
    seed_population(&db.pool).await;
    seed_order_with_status(&db.pool, "x-1", "cust-cancelled", 80.0, 5, OrderStatus::Cancelled).await;
    seed_order_with_status(&db.pool, "x-2", "cust-pending", 80.0, 5, OrderStatus::Pending).await;

    let report = runner(&db.pool, test_config())
        .trigger(RunTrigger::Manual)
        .await
        .unwrap();
    assert!(report.success);
    assert_eq!(report.customers, 8);

    let stored = SegmentStore::new(db.pool.clone()).query_all().await.unwrap();
    let ids: HashSet<&str> = stored.iter().map(|a| a.customer_id.as_str()).collect();
    assert_eq!(ids.len(), 8);
    assert!(!ids.contains("cust-cancelled"));
    assert!(!ids.contains("cust-pending"));
}

#[tokio::test]
async fn test_feature_vectors_respect_bounds() {
    let db = test_db().await;
    seed_population(&db.pool).await;
    seed_order(&db.pool, "free-1", "cust-free", 0.0, 0).await;

    let reader = OrderHistoryReader::new(db.pool.clone(), QualifyingPolicy::default());
    let features = reader.extract(Utc::now()).await.unwrap();

    assert_eq!(features.len(), 9);
    for f in &features {
        assert!(f.recency >= 0, "{} has negative recency", f.customer_id);
        assert!(f.frequency >= 1, "{} has no orders", f.customer_id);
        assert!(f.sales >= 0.0, "{} has negative sales", f.customer_id);
    }

    let c4 = features.iter().find(|f| f.customer_id == "cust-04").unwrap();
    assert_eq!(c4.frequency, 2);
    assert!((c4.sales - 140.0).abs() < 1e-9);
    assert_eq!(c4.recency, 45);
}

#[tokio::test]
async fn test_one_assignment_per_customer_after_repeated_runs() {
    let db = test_db().await;
    seed_population(&db.pool).await;
    let runner = runner(&db.pool, test_config());

    runner.trigger(RunTrigger::Manual).await.unwrap();
    seed_order(&db.pool, "late-1", "cust-01", 75.0, 0).await;
    seed_order(&db.pool, "late-2", "cust-09", 60.0, 2).await;
    runner.trigger(RunTrigger::Manual).await.unwrap();

    let stored = SegmentStore::new(db.pool.clone()).query_all().await.unwrap();
    let ids: HashSet<&str> = stored.iter().map(|a| a.customer_id.as_str()).collect();
    assert_eq!(ids.len(), stored.len());
    assert_eq!(stored.len(), 9);

    let c1 = stored.iter().find(|a| a.customer_id == "cust-01").unwrap();
    assert_eq!(c1.frequency, 2);
    assert_eq!(c1.recency, 0);
}

#[tokio::test]
async fn test_repeated_runs_are_deterministic() {
    let first = test_db().await;
    seed_population(&first.pool).await;
    seed_customer(&first.pool, "cust-whale", 1, 100_000.0, 10).await;

    // Same data inserted in a different order
    let second = test_db().await;
    seed_customer(&second.pool, "cust-whale", 1, 100_000.0, 10).await;
    seed_customer(&second.pool, "cust-08", 4, 560.0, 1).await;
    seed_customer(&second.pool, "cust-07", 4, 520.0, 3).await;
    seed_customer(&second.pool, "cust-06", 3, 320.0, 15).await;
    seed_customer(&second.pool, "cust-05", 3, 300.0, 20).await;
    seed_customer(&second.pool, "cust-04", 2, 140.0, 45).await;
    seed_customer(&second.pool, "cust-03", 2, 120.0, 60).await;
    seed_customer(&second.pool, "cust-02", 1, 55.0, 80).await;
    seed_customer(&second.pool, "cust-01", 1, 40.0, 90).await;

    let runner_a = runner(&first.pool, test_config());
    runner_a.trigger(RunTrigger::Manual).await.unwrap();
    let run_one = cluster_map(&SegmentStore::new(first.pool.clone()).query_all().await.unwrap());
    runner_a.trigger(RunTrigger::Manual).await.unwrap();
    let run_two = cluster_map(&SegmentStore::new(first.pool.clone()).query_all().await.unwrap());

    runner(&second.pool, test_config())
        .trigger(RunTrigger::Manual)
        .await
        .unwrap();
    let reordered = cluster_map(&SegmentStore::new(second.pool.clone()).query_all().await.unwrap());

    assert_eq!(run_one, run_two);
    assert_eq!(run_one, reordered);
}

#[tokio::test]
async fn test_outliers_only_use_sentinel_cluster() {
    let db = test_db().await;
    seed_population(&db.pool).await;
    seed_customer(&db.pool, "cust-whale", 1, 100_000.0, 10).await;

    let report = runner(&db.pool, test_config())
        .trigger(RunTrigger::Manual)
        .await
        .unwrap();
    assert_eq!(report.outliers, 1);

    let stored = SegmentStore::new(db.pool.clone()).query_all().await.unwrap();
    for assignment in &stored {
        if assignment.is_outlier {
            assert_eq!(assignment.cluster, OUTLIER_CLUSTER);
        } else {
            assert!((0..4).contains(&assignment.cluster));
        }
    }

    let whale = stored.iter().find(|a| a.customer_id == "cust-whale").unwrap();
    assert!(whale.is_outlier);
}

#[tokio::test]
async fn test_outliers_are_split_into_sub_segments() {
    let db = test_db().await;
    seed_population(&db.pool).await;
    seed_customer(&db.pool, "whale-a", 1, 100_000.0, 10).await;
    seed_customer(&db.pool, "whale-b", 1, 80_000.0, 30).await;

    let report = runner(&db.pool, test_config())
        .trigger(RunTrigger::Manual)
        .await
        .unwrap();
    assert_eq!(report.outliers, 2);
    let segments: Vec<(i64, usize)> = report
        .outlier_segments
        .iter()
        .map(|c| (c.cluster_id, c.count))
        .collect();
    assert_eq!(segments, vec![(0, 1), (1, 1)]);

    let stored = SegmentStore::new(db.pool.clone()).query_all().await.unwrap();
    for assignment in &stored {
        if assignment.is_outlier {
            assert_eq!(assignment.cluster, OUTLIER_CLUSTER);
            assert!(assignment.outlier_segment.is_some());
        } else {
            assert_eq!(assignment.outlier_segment, None);
        }
    }

    // Sub-segments are ordered by spend like the main clusters
    let segment_of = |id: &str| {
        stored
            .iter()
            .find(|a| a.customer_id == id)
            .and_then(|a| a.outlier_segment)
    };
    assert_eq!(segment_of("whale-b"), Some(0));
    assert_eq!(segment_of("whale-a"), Some(1));
}

#[tokio::test]
async fn test_outlier_sub_segments_can_be_disabled() {
    let db = test_db().await;
    seed_population(&db.pool).await;
    seed_customer(&db.pool, "whale-a", 1, 100_000.0, 10).await;
    seed_customer(&db.pool, "whale-b", 1, 80_000.0, 30).await;

    let config = SegmentationConfig {
        outlier_clusters: 0,
        ..test_config()
    };
    let report = runner(&db.pool, config).trigger(RunTrigger::Manual).await.unwrap();
    assert_eq!(report.outliers, 2);
    assert!(report.outlier_segments.is_empty());

    let stored = SegmentStore::new(db.pool.clone()).query_all().await.unwrap();
    assert!(stored.iter().all(|a| a.outlier_segment.is_none()));
}

#[tokio::test]
async fn test_extreme_spender_scenario() {
    let db = test_db().await;
    seed_customer(&db.pool, "A", 1, 50.0, 7).await;
    seed_customer(&db.pool, "B", 1, 50.0, 7).await;
    seed_customer(&db.pool, "C", 20, 50_000.0, 1).await;

    let report = runner(&db.pool, sales_cap_config(2))
        .trigger(RunTrigger::Manual)
        .await
        .unwrap();
    assert!(report.success);
    assert_eq!(report.outliers, 1);

    let store = SegmentStore::new(db.pool.clone());
    let stored = cluster_map(&store.query_all().await.unwrap());
    assert_eq!(stored["A"], 0);
    assert_eq!(stored["B"], 0);
    assert_eq!(stored["C"], OUTLIER_CLUSTER);

    let summary = SegmentSummaryReader::new(db.pool.clone()).summarize().await.unwrap();
    assert_eq!(summary.len(), 2);

    assert_eq!(summary[0].cluster_id, OUTLIER_CLUSTER);
    assert_eq!(summary[0].count, 1);
    assert!((summary[0].avg_sales - 50_000.0).abs() < 1e-6);

    assert_eq!(summary[1].cluster_id, 0);
    assert_eq!(summary[1].count, 2);
    assert!((summary[1].avg_sales - 50.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_empty_order_history_empties_store() {
    let db = test_db().await;
    seed_order_with_status(&db.pool, "x-1", "cust-cancelled", 80.0, 5, OrderStatus::Cancelled).await;

    // Leftovers from an earlier run must be cleared
    seed_customer(&db.pool, "cust-old", 1, 10.0, 3).await;
    let runner = runner(&db.pool, test_config());
    runner.trigger(RunTrigger::Manual).await.unwrap();
    sqlx::query("DELETE FROM orders WHERE customer_id = 'cust-old'")
        .execute(&db.pool)
        .await
        .unwrap();

    let report = runner.trigger(RunTrigger::Manual).await.unwrap();
    assert!(report.success);
    assert_eq!(report.customers, 0);
    assert!(report
        .warnings
        .as_deref()
        .unwrap_or_default()
        .contains("No customers with qualifying orders"));

    assert_eq!(SegmentStore::new(db.pool.clone()).count().await.unwrap(), 0);
    let summary = SegmentSummaryReader::new(db.pool.clone()).summarize().await.unwrap();
    assert!(summary.is_empty());
}

#[tokio::test]
async fn test_second_trigger_rejected_while_running() {
    let db = test_db().await;
    seed_population(&db.pool).await;
    let runner = runner(&db.pool, test_config());
    let store = SegmentStore::new(db.pool.clone());

    runner.trigger(RunTrigger::Manual).await.unwrap();
    let before = store.query_all().await.unwrap();
    seed_customer(&db.pool, "cust-new", 2, 90.0, 4).await;

    // Hold the write lock so the next run cannot finish
    let mut lock = db.pool.acquire().await.unwrap();
    sqlx::query("BEGIN IMMEDIATE").execute(&mut *lock).await.unwrap();

    let background = runner.clone();
    let in_flight = tokio::spawn(async move { background.trigger(RunTrigger::Scheduled).await });

    for _ in 0..200 {
        if runner.is_running() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(runner.is_running());
    assert_eq!(runner.status().state, JobState::Running);

    let rejected = runner.trigger(RunTrigger::Manual).await;
    assert!(matches!(rejected, Err(SegmentationError::ConcurrentRunRejected)));
    assert_eq!(store.query_all().await.unwrap(), before);

    sqlx::query("ROLLBACK").execute(&mut *lock).await.unwrap();
    drop(lock);

    let report = in_flight.await.unwrap().unwrap();
    assert!(report.success);
    assert_eq!(report.customers, 9);
    assert_eq!(store.count().await.unwrap(), 9);
    assert_eq!(runner.status().state, JobState::Idle);
}

#[tokio::test]
async fn test_summarize_is_idempotent() {
    let db = test_db().await;
    seed_population(&db.pool).await;
    seed_customer(&db.pool, "cust-whale", 1, 100_000.0, 10).await;
    runner(&db.pool, test_config())
        .trigger(RunTrigger::Manual)
        .await
        .unwrap();

    let reader = SegmentSummaryReader::new(db.pool.clone());
    let first = reader.summarize().await.unwrap();
    let second = reader.summarize().await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.iter().map(|s| s.count).sum::<i64>(), 9);
}

#[tokio::test]
async fn test_unavailable_order_source_leaves_store_untouched() {
    let db = test_db().await;
    seed_population(&db.pool).await;
    runner(&db.pool, test_config())
        .trigger(RunTrigger::Manual)
        .await
        .unwrap();
    let store = SegmentStore::new(db.pool.clone());
    let before = store.query_all().await.unwrap();

    let orders_pool = init_database_pool(&db.dir.path().join("orders.db")).await.unwrap();
    orders_pool.close().await;

    let config = test_config();
    let failing = JobRunner::new(
        OrderHistoryReader::new(orders_pool, config.qualifying.clone()),
        store.clone(),
        config,
    );

    let result = failing.trigger(RunTrigger::Manual).await;
    assert!(matches!(result, Err(SegmentationError::DataSourceUnavailable(_))));
    assert_eq!(store.query_all().await.unwrap(), before);

    let status = failing.status();
    assert_eq!(status.state, JobState::Idle);
    let last = status.last_run.unwrap();
    assert!(!last.success);
    assert_eq!(last.state, JobState::Failed);
    assert!(failing.last_error().is_some());
}

#[tokio::test]
async fn test_timeout_abandons_run() {
    let db = test_db().await;
    seed_population(&db.pool).await;
    runner(&db.pool, test_config())
        .trigger(RunTrigger::Manual)
        .await
        .unwrap();
    let store = SegmentStore::new(db.pool.clone());
    let before = store.query_all().await.unwrap();
    seed_customer(&db.pool, "cust-new", 2, 90.0, 4).await;

    // Writer blocked behind the lock until the deadline passes
    let mut lock = db.pool.acquire().await.unwrap();
    sqlx::query("BEGIN IMMEDIATE").execute(&mut *lock).await.unwrap();

    let hasty = runner(&db.pool, test_config()).with_timeout(Duration::from_millis(200));
    let result = hasty.trigger(RunTrigger::Manual).await;

    sqlx::query("ROLLBACK").execute(&mut *lock).await.unwrap();
    drop(lock);

    assert!(matches!(result, Err(SegmentationError::Timeout(_))));
    assert_eq!(store.query_all().await.unwrap(), before);
    assert!(!hasty.is_running());
    assert_eq!(hasty.status().last_run.unwrap().state, JobState::Failed);
}

#[tokio::test]
async fn test_dropped_trigger_returns_runner_to_idle() {
    let db = test_db().await;
    seed_population(&db.pool).await;
    let runner = runner(&db.pool, test_config());

    // Writer blocked behind the lock; the caller gives up first
    let mut lock = db.pool.acquire().await.unwrap();
    sqlx::query("BEGIN IMMEDIATE").execute(&mut *lock).await.unwrap();

    let abandoned =
        tokio::time::timeout(Duration::from_millis(200), runner.trigger(RunTrigger::Manual)).await;
    assert!(abandoned.is_err());

    let status = runner.status();
    assert_eq!(status.state, JobState::Idle);
    assert_eq!(status.current_run, None);
    assert!(status.last_run.is_none());
    assert!(!runner.is_running());

    sqlx::query("ROLLBACK").execute(&mut *lock).await.unwrap();
    drop(lock);

    let report = runner.trigger(RunTrigger::Manual).await.unwrap();
    assert!(report.success);
    assert_eq!(runner.status().last_run.unwrap().run_id, report.run_id);
}

#[tokio::test]
async fn test_report_counts_match_store() {
    let db = test_db().await;
    seed_population(&db.pool).await;
    seed_customer(&db.pool, "cust-whale", 1, 100_000.0, 10).await;

    let report = runner(&db.pool, test_config())
        .trigger(RunTrigger::Manual)
        .await
        .unwrap();

    assert_eq!(report.state, JobState::Succeeded);
    assert_eq!(report.customers, 9);
    assert!(!report.logs.is_empty());

    let summary = SegmentSummaryReader::new(db.pool.clone()).summarize().await.unwrap();
    let from_report: Vec<(i64, i64)> = report
        .clusters
        .iter()
        .map(|c| (c.cluster_id, c.count as i64))
        .collect();
    let from_store: Vec<(i64, i64)> = summary.iter().map(|s| (s.cluster_id, s.count)).collect();
    assert_eq!(from_report, from_store);
}
