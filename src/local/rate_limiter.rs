// Sliding-window limit on spark creation, per device.
//
// Creation timestamps live in the local store under `spark_rate_limit` as a
// JSON array of `{"timestamp": <epoch ms>}`. Every access drops entries older
// than the window. This is an abuse deterrent, not a quota: if the stored
// state can't be read, creation is allowed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::LocalStore;
use crate::clock::{from_millis, Clock};

pub const RATE_LIMIT_KEY: &str = "spark_rate_limit";
pub const MAX_SPARKS_PER_HOUR: usize = 5;
pub const WINDOW_MS: i64 = 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct SparkTimestamp {
    timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitStatus {
    pub allowed: bool,
    pub remaining_count: usize,
    /// Epoch ms at which the oldest in-window creation ages out. Only set
    /// when creation is blocked.
    pub reset_time: Option<i64>,
}

impl RateLimitStatus {
    pub fn reset_at(&self) -> Option<DateTime<Utc>> {
        self.reset_time.map(from_millis)
    }
}

pub struct SparkRateLimiter {
    store: Arc<dyn LocalStore>,
    clock: Arc<dyn Clock>,
    max_per_window: usize,
    window_ms: i64,
}

impl SparkRateLimiter {
    pub fn new(store: Arc<dyn LocalStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            max_per_window: MAX_SPARKS_PER_HOUR,
            window_ms: WINDOW_MS,
        }
    }

    /// Load the stored window and drop entries that have aged out. Entries
    /// stamped after `now` can't have come from this clock and are dropped too.
    async fn load_window(&self, now_ms: i64) -> anyhow::Result<Vec<SparkTimestamp>> {
        let Some(stored) = self.store.get_item(RATE_LIMIT_KEY).await? else {
            return Ok(Vec::new());
        };
        let mut timestamps: Vec<SparkTimestamp> = serde_json::from_str(&stored)?;
        timestamps.retain(|t| {
            now_ms
                .checked_sub(t.timestamp)
                .is_some_and(|age| (0..self.window_ms).contains(&age))
        });
        Ok(timestamps)
    }

    /// May this device create a spark right now?
    pub async fn check(&self) -> RateLimitStatus {
        let now_ms = self.clock.now_ms();
        let timestamps = match self.load_window(now_ms).await {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "Rate limit state unreadable, allowing creation");
                return RateLimitStatus {
                    allowed: true,
                    remaining_count: self.max_per_window,
                    reset_time: None,
                };
            }
        };

        if timestamps.len() >= self.max_per_window {
            let oldest = timestamps
                .iter()
                .map(|t| t.timestamp)
                .min()
                .unwrap_or(now_ms);
            return RateLimitStatus {
                allowed: false,
                remaining_count: 0,
                reset_time: Some(oldest.saturating_add(self.window_ms)),
            };
        }

        RateLimitStatus {
            allowed: true,
            remaining_count: self.max_per_window - timestamps.len(),
            reset_time: None,
        }
    }

    /// Note a successful creation. Failures are logged, not returned: losing
    /// one record only under-counts.
    pub async fn record(&self) {
        let now_ms = self.clock.now_ms();
        let mut timestamps = match self.load_window(now_ms).await {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "Rate limit state unreadable, starting a fresh window");
                Vec::new()
            }
        };
        timestamps.push(SparkTimestamp { timestamp: now_ms });

        let json = match serde_json::to_string(&timestamps) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Failed to encode rate limit state");
                return;
            }
        };
        if let Err(e) = self.store.set_item(RATE_LIMIT_KEY, &json).await {
            warn!(error = %e, "Failed to persist rate limit state");
            return;
        }
        info!(count = timestamps.len(), "Spark creation recorded");
    }
}

/// Human-readable wait until `reset_time`: "45m", "1h 30m", or "0m" once passed.
/// Partial minutes round up.
pub fn format_reset_time(reset_time_ms: i64, now_ms: i64) -> String {
    let diff = reset_time_ms.saturating_sub(now_ms);
    if diff <= 0 {
        return "0m".to_string();
    }
    let minutes = diff / 60_000 + i64::from(diff % 60_000 != 0);
    if minutes < 60 {
        return format!("{minutes}m");
    }
    format!("{}h {}m", minutes / 60, minutes % 60)
}
