// SparkService: the operations the app exposes, wired from explicit parts.
//
// Everything is injected: store, clock, local state, and an optional photo
// store. `main` builds one of these per run; tests build them over in-memory
// backends.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::db::{SparkCounts, SparkStore};
use crate::error::{Result, SparkError};
use crate::geo::index::DEFAULT_RADIUS_KM;
use crate::geo::{GeoIndex, NearbySubscription, SparkEvent};
use crate::local::rate_limiter::{format_reset_time, RateLimitStatus, SparkRateLimiter};
use crate::local::LocalStore;
use crate::photos::PhotoStore;
use crate::spark::factory::{validate_text, SparkFactory};
use crate::spark::lifecycle::{self, Countdown};
use crate::spark::{Coordinates, Spark};

/// What the compose screen hands over.
#[derive(Debug, Clone, Default)]
pub struct SubmitSpark {
    pub text: String,
    /// None when the device has no location fix.
    pub location: Option<Coordinates>,
    /// Raw image bytes, if a photo was attached.
    pub photo: Option<Vec<u8>>,
}

/// A spark plus its countdown at the time of the lookup.
#[derive(Debug, Clone, Serialize)]
pub struct SparkDetail {
    pub spark: Spark,
    pub countdown: Countdown,
}

pub struct SparkService {
    store: Arc<dyn SparkStore>,
    index: GeoIndex,
    limiter: SparkRateLimiter,
    factory: SparkFactory,
    photos: Option<Arc<dyn PhotoStore>>,
    clock: Arc<dyn Clock>,
    radius_km: f64,
}

impl SparkService {
    pub fn new(
        store: Arc<dyn SparkStore>,
        local: Arc<dyn LocalStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            index: GeoIndex::new(store.clone(), clock.clone()),
            limiter: SparkRateLimiter::new(local, clock.clone()),
            factory: SparkFactory::new(clock.clone()),
            store,
            photos: None,
            clock,
            radius_km: DEFAULT_RADIUS_KM,
        }
    }

    pub fn with_photo_store(mut self, photos: Arc<dyn PhotoStore>) -> Self {
        self.photos = Some(photos);
        self
    }

    pub fn with_radius_km(mut self, radius_km: f64) -> Self {
        if radius_km.is_finite() && radius_km > 0.0 {
            self.radius_km = radius_km;
        } else {
            warn!(radius_km, "Ignoring invalid discovery radius");
        }
        self
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.index = self.index.with_refresh_interval(interval);
        self
    }

    pub fn radius_km(&self) -> f64 {
        self.radius_km
    }

    pub fn index(&self) -> &GeoIndex {
        &self.index
    }

    /// Create a spark at the given location.
    ///
    /// Nothing is written (photo included) unless text, location and the
    /// rate limit all pass. The creation only counts against the limit once
    /// the insert has committed.
    pub async fn submit(&self, request: SubmitSpark) -> Result<Spark> {
        let text = validate_text(&request.text)?;
        let coordinates = request.location.ok_or_else(|| {
            SparkError::Validation(
                "Location not available. Please enable location services.".to_string(),
            )
        })?;

        let status = self.limiter.check().await;
        if !status.allowed {
            let now_ms = self.clock.now_ms();
            let reset_in = status
                .reset_time
                .map(|reset| format_reset_time(reset, now_ms))
                .unwrap_or_else(|| "0m".to_string());
            info!(reset_in = %reset_in, "Spark creation rate limited");
            return Err(SparkError::RateLimitExceeded {
                reset_in,
                reset_at: status.reset_at(),
            });
        }

        let photo_url = match (request.photo, &self.photos) {
            (Some(bytes), Some(photos)) => Some(photos.upload(bytes).await?),
            (Some(_), None) => {
                return Err(SparkError::Validation(
                    "Photo uploads are not configured".to_string(),
                ))
            }
            (None, _) => None,
        };

        let draft = self.factory.build(&text, coordinates, photo_url);
        let spark = self.store.insert(draft).await?;
        self.index.publish(SparkEvent::Inserted(spark.clone()));
        self.limiter.record().await;

        info!(
            spark_id = %spark.id,
            lat = spark.coordinates.latitude,
            lng = spark.coordinates.longitude,
            has_photo = spark.photo_url.is_some(),
            "Spark dropped"
        );
        Ok(spark)
    }

    /// Add one warm. Returns the new count.
    pub async fn warm(&self, id: &str) -> Result<u64> {
        let count = self.store.warm(id).await?;
        info!(spark_id = id, warmed_count = count, "Spark warmed");

        // Subscribers also catch this on their next refresh, so a failed
        // re-read is not an error for the caller.
        match self.store.get(id).await {
            Ok(Some(spark)) => self.index.publish(SparkEvent::Warmed(spark)),
            Ok(None) => {}
            Err(e) => warn!(spark_id = id, error = %e, "Failed to re-read warmed spark"),
        }
        Ok(count)
    }

    /// Look up a spark for the detail view. Expired sparks are still returned.
    pub async fn detail(&self, id: &str) -> Result<SparkDetail> {
        let spark = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| SparkError::NotFound(id.to_string()))?;
        let countdown = lifecycle::remaining(spark.expires_at, self.clock.now());
        Ok(SparkDetail { spark, countdown })
    }

    /// Active sparks within the configured radius, nearest first.
    pub async fn nearby(&self, center: Coordinates) -> Result<Vec<Spark>> {
        self.index.nearby(center, self.radius_km).await
    }

    pub async fn subscribe_nearby(&self, center: Coordinates) -> Result<NearbySubscription> {
        self.index.subscribe_nearby(center, self.radius_km).await
    }

    pub async fn quota(&self) -> RateLimitStatus {
        self.limiter.check().await
    }

    /// Delete every expired spark. Returns how many were removed.
    pub async fn reap(&self) -> Result<usize> {
        let removed = self.store.reap_expired(self.clock.now()).await?;
        info!(removed, "Expired sparks reaped");
        Ok(removed)
    }

    pub async fn counts(&self) -> Result<SparkCounts> {
        self.store.counts(self.clock.now()).await
    }
}
