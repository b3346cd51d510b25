// Composition tests: the SparkService flow end to end over in-memory backends.
//
// These tests exercise the data flow between modules:
//   validate -> rate check -> photo -> factory -> store -> feed -> record
// with a pinned clock so expiry and the rate window are exact.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use sparkdrop::clock::{from_millis, Clock, ManualClock};
use sparkdrop::db::{self, SparkStore};
use sparkdrop::error::SparkError;
use sparkdrop::local::rate_limiter::MAX_SPARKS_PER_HOUR;
use sparkdrop::local::{LocalStore, MemoryKvStore};
use sparkdrop::photos::{LocalPhotoStore, PhotoStore};
use sparkdrop::service::{SparkService, SubmitSpark};
use sparkdrop::spark::lifecycle::{Countdown, Remaining};
use sparkdrop::spark::Coordinates;

const T0: i64 = 1_700_000_000_000;

struct Harness {
    clock: Arc<ManualClock>,
    store: Arc<dyn SparkStore>,
    local: Arc<MemoryKvStore>,
    service: SparkService,
}

fn harness() -> Harness {
    let clock = Arc::new(ManualClock::at_ms(T0));
    let dyn_clock: Arc<dyn Clock> = clock.clone();
    let store = db::in_memory_sqlite(dyn_clock.clone()).unwrap();
    let local = Arc::new(MemoryKvStore::default());
    let service = SparkService::new(store.clone(), local.clone(), dyn_clock);
    Harness {
        clock,
        store,
        local,
        service,
    }
}

fn here() -> Coordinates {
    Coordinates::new(35.6762, 139.6503).unwrap()
}

fn submit(text: &str) -> SubmitSpark {
    SubmitSpark {
        text: text.to_string(),
        location: Some(here()),
        photo: None,
    }
}

/// Counts uploads so tests can check nothing was stored on rejected submits.
#[derive(Default)]
struct CountingPhotos {
    uploads: std::sync::atomic::AtomicUsize,
}

#[async_trait]
impl PhotoStore for CountingPhotos {
    async fn upload(&self, _bytes: Vec<u8>) -> anyhow::Result<String> {
        let n = self
            .uploads
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(format!("https://photos.test/sparks/{n}.jpg"))
    }
}

// ============================================================
// Submit
// ============================================================

#[tokio::test]
async fn submit_trims_text_and_sets_lifetime() {
    let h = harness();
    let spark = h.service.submit(submit("  ramen stall is open late  ")).await.unwrap();

    assert_eq!(spark.text, "ramen stall is open late");
    assert_eq!(spark.created_at, from_millis(T0));
    assert_eq!(spark.expires_at - spark.created_at, Duration::hours(48));
    assert_eq!(spark.warmed_count, 0);
    assert_eq!(spark.photo_url, None);
    assert_eq!(h.service.quota().await.remaining_count, MAX_SPARKS_PER_HOUR - 1);
}

#[tokio::test]
async fn text_length_boundary() {
    let h = harness();
    let limit: String = "あ".repeat(120);
    assert!(h.service.submit(submit(&limit)).await.is_ok());

    let over: String = "あ".repeat(121);
    let err = h.service.submit(submit(&over)).await.unwrap_err();
    assert!(matches!(err, SparkError::Validation(_)));
}

#[tokio::test]
async fn empty_text_and_missing_location_are_rejected_without_side_effects() {
    let h = harness();

    let err = h.service.submit(submit("   ")).await.unwrap_err();
    assert_eq!(err.user_message(), "Please enter some text for your spark");

    let err = h
        .service
        .submit(SubmitSpark {
            text: "somewhere".to_string(),
            location: None,
            photo: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SparkError::Validation(_)));

    assert_eq!(h.service.counts().await.unwrap().total, 0);
    assert_eq!(h.service.quota().await.remaining_count, MAX_SPARKS_PER_HOUR);
}

#[tokio::test]
async fn sixth_submit_in_an_hour_is_rate_limited() {
    let h = harness();
    let photos = Arc::new(CountingPhotos::default());
    let dyn_clock: Arc<dyn Clock> = h.clock.clone();
    let service = SparkService::new(h.store.clone(), h.local.clone(), dyn_clock)
        .with_photo_store(photos.clone());

    for i in 0..5 {
        service.submit(submit(&format!("spark {i}"))).await.unwrap();
        h.clock.advance(Duration::minutes(1));
    }

    let err = service
        .submit(SubmitSpark {
            photo: Some(vec![1, 2, 3]),
            ..submit("one too many")
        })
        .await
        .unwrap_err();
    match err {
        SparkError::RateLimitExceeded { reset_in, reset_at } => {
            assert_eq!(reset_in, "55m");
            assert_eq!(reset_at, Some(from_millis(T0 + 3_600_000)));
        }
        other => panic!("expected rate limit, got {other:?}"),
    }

    // Nothing was written for the rejected submit.
    assert_eq!(photos.uploads.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert_eq!(service.counts().await.unwrap().total, 5);

    h.clock.advance(Duration::minutes(56));
    assert!(service.submit(submit("back again")).await.is_ok());
}

#[tokio::test]
async fn photo_is_uploaded_and_linked() {
    let h = harness();
    let dir = tempfile::tempdir().unwrap();
    let dyn_clock: Arc<dyn Clock> = h.clock.clone();
    let photos = Arc::new(LocalPhotoStore::new(
        dir.path(),
        Some("https://cdn.test".to_string()),
        dyn_clock.clone(),
    ));
    let service =
        SparkService::new(h.store.clone(), h.local.clone(), dyn_clock).with_photo_store(photos);

    let spark = service
        .submit(SubmitSpark {
            photo: Some(vec![0xff, 0xd8]),
            ..submit("look at this sunset")
        })
        .await
        .unwrap();

    let url = spark.photo_url.unwrap();
    let prefix = format!("https://cdn.test/sparks/{T0}_");
    assert!(url.starts_with(&prefix), "unexpected url {url}");
    assert_eq!(std::fs::read_dir(dir.path().join("sparks")).unwrap().count(), 1);
}

#[tokio::test]
async fn photo_without_a_photo_store_is_rejected() {
    let h = harness();
    let err = h
        .service
        .submit(SubmitSpark {
            photo: Some(vec![1]),
            ..submit("pic")
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SparkError::Validation(_)));
    assert_eq!(h.service.quota().await.remaining_count, MAX_SPARKS_PER_HOUR);
}

// ============================================================
// Warm / detail / reap
// ============================================================

#[tokio::test]
async fn warm_and_detail_countdown() {
    let h = harness();
    let spark = h.service.submit(submit("warm this")).await.unwrap();

    assert_eq!(h.service.warm(&spark.id).await.unwrap(), 1);
    assert_eq!(h.service.warm(&spark.id).await.unwrap(), 2);

    h.clock.advance(Duration::hours(48) - Duration::seconds(1));
    let detail = h.service.detail(&spark.id).await.unwrap();
    assert_eq!(detail.spark.warmed_count, 2);
    assert_eq!(
        detail.countdown,
        Countdown::Active(Remaining {
            hours: 0,
            minutes: 0,
            seconds: 1
        })
    );

    h.clock.advance(Duration::seconds(1));
    let detail = h.service.detail(&spark.id).await.unwrap();
    assert_eq!(detail.countdown, Countdown::Expired);
    assert_eq!(detail.countdown.to_string(), "Expired");
}

#[tokio::test]
async fn unknown_ids_are_not_found() {
    let h = harness();
    assert!(matches!(
        h.service.detail("nope").await.unwrap_err(),
        SparkError::NotFound(_)
    ));
    let err = h.service.warm("nope").await.unwrap_err();
    assert_eq!(err.kind(), "not_found");
}

#[tokio::test]
async fn expired_sparks_leave_nearby_and_can_be_reaped() {
    let h = harness();
    let spark = h.service.submit(submit("soon gone")).await.unwrap();
    assert_eq!(h.service.nearby(here()).await.unwrap().len(), 1);

    h.clock.advance(Duration::hours(48));
    assert!(h.service.nearby(here()).await.unwrap().is_empty());
    // Still resolvable for the detail view until reaped.
    assert!(h.service.detail(&spark.id).await.is_ok());

    assert_eq!(h.service.reap().await.unwrap(), 1);
    assert!(h.service.detail(&spark.id).await.is_err());
}

#[tokio::test]
async fn onboarding_flag_lives_next_to_the_rate_window() {
    let h = harness();
    let local: Arc<dyn LocalStore> = h.local.clone();
    let onboarding = sparkdrop::local::onboarding::OnboardingState::new(local.clone());

    onboarding.complete().await.unwrap();
    h.service.submit(submit("hi")).await.unwrap();

    assert!(onboarding.has_completed().await);
    assert!(local.get_item("spark_rate_limit").await.unwrap().is_some());
    assert_eq!(
        local.get_item("hasCompletedOnboarding").await.unwrap().as_deref(),
        Some("true")
    );
}
