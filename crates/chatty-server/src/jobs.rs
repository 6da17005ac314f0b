use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use chatty_api::settings::auto_delete_minutes;
use chatty_db::Database;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Minute sweep: re-reads the configured auto-delete interval each tick
/// so setting changes take effect without a restart, then deletes
/// messages older than the interval. 0 disables the sweep.
pub async fn run_auto_delete_loop(db: Arc<Database>) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);

    loop {
        interval.tick().await;

        let db = Arc::clone(&db);
        let result = tokio::task::spawn_blocking(move || {
            let minutes = auto_delete_minutes(&db)?;
            if minutes == 0 {
                return Ok::<usize, anyhow::Error>(0);
            }
            db.purge_messages_older_than_minutes(minutes)
        })
        .await;

        match result {
            Ok(Ok(count)) => {
                if count > 0 {
                    info!("Auto-delete sweep: purged {} expired messages", count);
                }
            }
            Ok(Err(e)) => warn!("Auto-delete sweep error: {}", e),
            Err(e) => warn!("Auto-delete sweep join error: {}", e),
        }
    }
}

/// Daily purge: wipes all messages at the configured UTC hour.
pub async fn run_daily_purge_loop(db: Arc<Database>, hour: u32) {
    loop {
        tokio::time::sleep(until_next_occurrence(hour)).await;

        let db_task = Arc::clone(&db);
        let result = tokio::task::spawn_blocking(move || db_task.purge_all_messages()).await;

        match result {
            Ok(Ok(count)) => info!("Daily purge: removed {} messages", count),
            Ok(Err(e)) => warn!("Daily purge error: {}", e),
            Err(e) => warn!("Daily purge join error: {}", e),
        }
    }
}

fn until_next_occurrence(hour: u32) -> Duration {
    let now = Utc::now();
    let target_time = chrono::NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or_default();
    let mut next = now.date_naive().and_time(target_time).and_utc();
    if next <= now {
        next += chrono::Duration::days(1);
    }
    (next - now).to_std().unwrap_or(SWEEP_INTERVAL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_occurrence_is_within_a_day() {
        for hour in 0..24 {
            let wait = until_next_occurrence(hour);
            assert!(wait <= Duration::from_secs(24 * 60 * 60));
            assert!(wait > Duration::ZERO);
        }
    }
}
