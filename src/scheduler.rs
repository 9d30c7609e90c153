use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, NaiveTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::engine::CompletionSweeper;
use crate::observability::SWEEP_FAILURES_TOTAL;
use crate::settings::{keys, SettingsProvider};
use crate::store::Store;

/// Delay before a failed completion sweep is tried again.
pub const RETRY_AFTER_SECS: i64 = 3600;

/// How often the compactor checks the WAL size.
pub const COMPACT_CHECK_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

/// Local time of day of the daily completion sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleTime {
    pub hour: u32,
    pub minute: u32,
}

impl Default for ScheduleTime {
    fn default() -> Self {
        Self { hour: 2, minute: 0 }
    }
}

impl ScheduleTime {
    pub fn clamped(hour: i64, minute: i64) -> Self {
        Self {
            hour: hour.clamp(0, 23) as u32,
            minute: minute.clamp(0, 59) as u32,
        }
    }

    pub async fn load(settings: &SettingsProvider) -> Self {
        let defaults = Self::default();
        let values = settings
            .get(&[keys::AUTO_COMPLETE_HOUR, keys::AUTO_COMPLETE_MINUTE])
            .await;
        let int = |key: &str, fallback: u32| {
            values
                .get(key)
                .and_then(|v| v.as_i64())
                .unwrap_or(fallback as i64)
        };
        Self::clamped(
            int(keys::AUTO_COMPLETE_HOUR, defaults.hour),
            int(keys::AUTO_COMPLETE_MINUTE, defaults.minute),
        )
    }

    /// The first occurrence of this local time strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
        let at = NaiveTime::from_hms_opt(self.hour, self.minute, 0).unwrap_or(NaiveTime::MIN);
        let local_today = now.with_timezone(&offset).date_naive();
        let candidate =
            (local_today.and_time(at) - Duration::seconds(offset.local_minus_utc() as i64)).and_utc();
        if candidate > now {
            candidate
        } else {
            candidate + Duration::days(1)
        }
    }
}

/// Runs the completion sweep once a day at the configured local time.
/// The time is re-read from settings before every wait.
pub async fn run_completion_scheduler(
    sweeper: Arc<CompletionSweeper>,
    settings: Arc<SettingsProvider>,
    offset: FixedOffset,
    shutdown: CancellationToken,
) {
    let mut retry_at: Option<DateTime<Utc>> = None;
    loop {
        let now = sweeper.clock().now();
        let next = match retry_at.take() {
            Some(at) => at,
            None => ScheduleTime::load(&settings).await.next_after(now, offset),
        };
        let wait = (next - now).to_std().unwrap_or_default();
        info!(next_run = %next, "completion sweep scheduled");

        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("completion scheduler stopped");
                return;
            }
            _ = tokio::time::sleep(wait) => {}
        }

        let now = sweeper.clock().now();
        match sweeper.complete_expired(now).await {
            Ok(completed) => info!(completed, "scheduled completion sweep done"),
            Err(e) => {
                metrics::counter!(SWEEP_FAILURES_TOTAL).increment(1);
                error!(error = %e, "scheduled completion sweep failed, retrying in one hour");
                retry_at = Some(now + Duration::seconds(RETRY_AFTER_SECS));
            }
        }
    }
}

/// Rewrites the WAL as a snapshot once it has grown past `threshold` frames.
pub async fn run_compactor(store: Arc<Store>, threshold: u64, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = interval.tick() => {}
        }
        let appends = store.appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match store.compact().await {
            Ok(()) => info!(appends, "WAL compacted"),
            Err(e) => error!(error = %e, "WAL compaction failed"),
        }
    }
}
