// Sliding-window rate limiter against a pinned clock.

use std::sync::Arc;

use chrono::Duration;
use sparkdrop::clock::{Clock, ManualClock};
use sparkdrop::local::rate_limiter::{
    format_reset_time, SparkRateLimiter, MAX_SPARKS_PER_HOUR, RATE_LIMIT_KEY,
};
use sparkdrop::local::{FileKvStore, LocalStore, MemoryKvStore};

const T0: i64 = 1_700_000_000_000;
const MINUTE_MS: i64 = 60_000;

fn limiter(store: Arc<dyn LocalStore>, clock: &Arc<ManualClock>) -> SparkRateLimiter {
    let clock: Arc<dyn Clock> = clock.clone();
    SparkRateLimiter::new(store, clock)
}

/// Record one creation per minute, starting at T0.
async fn record_five(limiter: &SparkRateLimiter, clock: &ManualClock) {
    for i in 0..5 {
        clock.set(sparkdrop::clock::from_millis(T0 + i * MINUTE_MS));
        limiter.record().await;
    }
}

#[tokio::test]
async fn sixth_creation_within_the_hour_is_blocked() {
    let clock = Arc::new(ManualClock::at_ms(T0));
    let limiter = limiter(Arc::new(MemoryKvStore::default()), &clock);
    record_five(&limiter, &clock).await;

    clock.set(sparkdrop::clock::from_millis(T0 + 5 * MINUTE_MS));
    let status = limiter.check().await;
    assert!(!status.allowed);
    assert_eq!(status.remaining_count, 0);
    assert_eq!(status.reset_time, Some(T0 + 60 * MINUTE_MS));
    assert_eq!(
        format_reset_time(status.reset_time.unwrap(), clock.now_ms()),
        "55m"
    );
}

#[tokio::test]
async fn window_slides_as_entries_age_out() {
    let clock = Arc::new(ManualClock::at_ms(T0));
    let limiter = limiter(Arc::new(MemoryKvStore::default()), &clock);
    record_five(&limiter, &clock).await;

    // t and t+1m have aged out; t+2m..t+4m are still inside the hour.
    clock.set(sparkdrop::clock::from_millis(T0 + 61 * MINUTE_MS));
    let status = limiter.check().await;
    assert!(status.allowed);
    assert_eq!(status.remaining_count, 2);
    assert_eq!(status.reset_time, None);

    clock.set(sparkdrop::clock::from_millis(T0 + 64 * MINUTE_MS));
    let status = limiter.check().await;
    assert!(status.allowed);
    assert_eq!(status.remaining_count, MAX_SPARKS_PER_HOUR);
}

#[tokio::test]
async fn entry_exactly_one_hour_old_no_longer_counts() {
    let clock = Arc::new(ManualClock::at_ms(T0));
    let limiter = limiter(Arc::new(MemoryKvStore::default()), &clock);
    limiter.record().await;

    clock.advance(Duration::milliseconds(60 * MINUTE_MS - 1));
    assert_eq!(limiter.check().await.remaining_count, MAX_SPARKS_PER_HOUR - 1);

    clock.advance(Duration::milliseconds(1));
    assert_eq!(limiter.check().await.remaining_count, MAX_SPARKS_PER_HOUR);
}

#[tokio::test]
async fn corrupt_state_fails_open() {
    let clock = Arc::new(ManualClock::at_ms(T0));
    let store = Arc::new(MemoryKvStore::default());
    store.set_item(RATE_LIMIT_KEY, "not json").await.unwrap();
    let limiter = limiter(store.clone(), &clock);

    let status = limiter.check().await;
    assert!(status.allowed);
    assert_eq!(status.remaining_count, MAX_SPARKS_PER_HOUR);

    // Recording over corrupt state starts a fresh window.
    limiter.record().await;
    assert_eq!(limiter.check().await.remaining_count, MAX_SPARKS_PER_HOUR - 1);
    let stored = store.get_item(RATE_LIMIT_KEY).await.unwrap().unwrap();
    assert_eq!(stored, format!(r#"[{{"timestamp":{T0}}}]"#));
}

#[tokio::test]
async fn out_of_range_timestamps_are_dropped() {
    let clock = Arc::new(ManualClock::at_ms(T0));
    let store = Arc::new(MemoryKvStore::default());
    let far_past = format!(r#"{{"timestamp":{}}}"#, i64::MIN);
    let far_future = format!(r#"{{"timestamp":{}}}"#, i64::MAX);
    let entries = [far_past.as_str(), far_future.as_str()].repeat(3).join(",");
    store
        .set_item(RATE_LIMIT_KEY, &format!("[{entries}]"))
        .await
        .unwrap();
    let limiter = limiter(store.clone(), &clock);

    let status = limiter.check().await;
    assert!(status.allowed);
    assert_eq!(status.remaining_count, MAX_SPARKS_PER_HOUR);
    assert_eq!(status.reset_time, None);

    limiter.record().await;
    assert_eq!(limiter.check().await.remaining_count, MAX_SPARKS_PER_HOUR - 1);
    let stored = store.get_item(RATE_LIMIT_KEY).await.unwrap().unwrap();
    assert_eq!(stored, format!(r#"[{{"timestamp":{T0}}}]"#));
}

#[tokio::test]
async fn window_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::at_ms(T0));

    {
        let store = Arc::new(FileKvStore::in_dir(dir.path()).unwrap());
        let limiter = limiter(store, &clock);
        record_five(&limiter, &clock).await;
    }

    let store = Arc::new(FileKvStore::in_dir(dir.path()).unwrap());
    let limiter = limiter(store, &clock);
    assert!(!limiter.check().await.allowed);
}
