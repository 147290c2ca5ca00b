//! Daily segmentation schedule
//!
//! Optionally runs once at startup, then once per day at the configured
//! local wall-clock time. Scheduled triggers that collide with a manual run
//! are rejected by the runner like any other trigger and simply logged.

use chrono::{DateTime, Duration as ChronoDuration, Local, TimeZone};
use tokio::task::JoinHandle;

use crate::config::ScheduleConfig;
use crate::error::SegmentationError;
use crate::models::RunTrigger;
use crate::services::JobRunner;

/// First occurrence of `hour:minute` strictly after `now`
///
/// Wall-clock times skipped by a DST transition fall through to the next day;
/// ambiguous times resolve to the earlier instant.
pub fn next_run_after<Tz: TimeZone>(now: &DateTime<Tz>, hour: u32, minute: u32) -> DateTime<Tz> {
    let (hour, minute) = (hour.min(23), minute.min(59));
    let tz = now.timezone();
    let mut date = now.date_naive();

    // Two DST gaps on consecutive days do not occur; a few days is ample
    for _ in 0..4 {
        let candidate = date
            .and_hms_opt(hour, minute, 0)
            .and_then(|local| tz.from_local_datetime(&local).earliest());
        if let Some(candidate) = candidate {
            if candidate > *now {
                return candidate;
            }
        }
        date = date.succ_opt().unwrap_or(date);
    }

    now.clone() + ChronoDuration::days(1)
}

pub struct Scheduler;

impl Scheduler {
    /// Start the schedule loop in the background
    ///
    /// Returns `None` when scheduling is disabled.
    pub fn spawn(runner: JobRunner, config: ScheduleConfig) -> Option<JoinHandle<()>> {
        if !config.enabled {
            tracing::info!("Daily segmentation schedule disabled");
            return None;
        }

        Some(tokio::spawn(async move {
            if config.run_on_startup {
                run_logged(&runner, RunTrigger::Startup).await;
            }

            loop {
                let now = Local::now();
                let next = next_run_after(&now, config.hour, config.minute);
                let wait = (next - now).to_std().unwrap_or_default();
                tracing::info!(next_run = %next.to_rfc3339(), "Next scheduled segmentation run");

                tokio::time::sleep(wait).await;
                run_logged(&runner, RunTrigger::Scheduled).await;
            }
        }))
    }
}

async fn run_logged(runner: &JobRunner, trigger: RunTrigger) {
    match runner.trigger(trigger).await {
        Ok(report) => tracing::info!(
            ?trigger,
            customers = report.customers,
            outliers = report.outliers,
            duration_ms = report.duration_ms,
            "Segmentation run finished"
        ),
        Err(SegmentationError::ConcurrentRunRejected) => {
            tracing::info!(?trigger, "Skipped segmentation run: another run in progress")
        }
        // Runner already logged the failure and recorded it in its status
        Err(_) => {}
    }
}
