// Spark data model: the types that flow between the store, the geo index,
// and the service. Separate from the database code so other modules can use
// them without depending on rusqlite directly.

pub mod factory;
pub mod lifecycle;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SparkError};

/// How long a spark lives after creation.
pub const SPARK_LIFETIME_HOURS: i64 = 48;

/// Maximum spark text length, in characters.
pub const MAX_TEXT_CHARS: usize = 120;

pub fn spark_lifetime() -> Duration {
    Duration::hours(SPARK_LIFETIME_HOURS)
}

/// A WGS84 point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    /// Validated constructor; rejects NaN, infinities, and out-of-range values.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
        if !latitude.is_finite() || !longitude.is_finite() {
            return Err(SparkError::Validation(
                "Location coordinates must be finite numbers".to_string(),
            ));
        }
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(SparkError::Validation(format!(
                "Latitude {latitude} is outside [-90, 90]"
            )));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(SparkError::Validation(format!(
                "Longitude {longitude} is outside [-180, 180]"
            )));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }
}

/// A stored spark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spark {
    pub id: String,
    pub text: String,
    pub photo_url: Option<String>,
    pub coordinates: Coordinates,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub warmed_count: u64,
}

impl Spark {
    /// True once `now` has reached the expiry instant.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// A spark that has not been inserted yet, so it has no id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSpark {
    pub text: String,
    pub photo_url: Option<String>,
    pub coordinates: Coordinates,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub warmed_count: u64,
}

impl NewSpark {
    /// Replace the draft timestamps with ones taken from a trusted clock.
    ///
    /// Stores call this on insert so a device with a skewed clock cannot mint
    /// sparks that live longer or shorter than 48 hours from the store's view.
    pub fn stamped_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self.expires_at = created_at + spark_lifetime();
        self
    }

    pub fn into_spark(self, id: String) -> Spark {
        Spark {
            id,
            text: self.text,
            photo_url: self.photo_url,
            coordinates: self.coordinates,
            created_at: self.created_at,
            expires_at: self.expires_at,
            warmed_count: self.warmed_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::from_millis;

    #[test]
    fn coordinates_reject_out_of_range() {
        assert!(Coordinates::new(90.0, 180.0).is_ok());
        assert!(Coordinates::new(-90.0, -180.0).is_ok());
        assert!(matches!(
            Coordinates::new(90.0001, 0.0),
            Err(SparkError::Validation(_))
        ));
        assert!(Coordinates::new(0.0, -180.5).is_err());
        assert!(Coordinates::new(f64::NAN, 0.0).is_err());
        assert!(Coordinates::new(0.0, f64::INFINITY).is_err());
    }

    #[test]
    fn stamping_keeps_lifetime() {
        let draft = NewSpark {
            text: "hi".to_string(),
            photo_url: None,
            coordinates: Coordinates::new(1.0, 2.0).unwrap(),
            created_at: from_millis(0),
            expires_at: from_millis(5),
            warmed_count: 0,
        };
        let stamped = draft.stamped_at(from_millis(10_000));
        assert_eq!(stamped.created_at, from_millis(10_000));
        assert_eq!(stamped.expires_at - stamped.created_at, spark_lifetime());
    }
}
