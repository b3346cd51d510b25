// Error taxonomy for spark operations.
//
// Infrastructure code (SQL, files, migrations) works in anyhow and gets
// wrapped as `Unavailable` at the store boundary. Everything a caller needs
// to branch on has its own variant.

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SparkError {
    /// Empty or over-length text, missing or invalid location.
    #[error("validation error: {0}")]
    Validation(String),

    /// The device has used its hourly quota.
    #[error("rate limit exceeded, try again in {reset_in}")]
    RateLimitExceeded {
        reset_in: String,
        reset_at: Option<DateTime<Utc>>,
    },

    /// No spark with this id exists at transaction time.
    #[error("spark not found with ID {0}")]
    NotFound(String),

    /// Backend unreachable or a write failed.
    #[error("storage unavailable: {0:#}")]
    Unavailable(#[from] anyhow::Error),

    /// The optimistic warm transaction kept conflicting.
    #[error("transaction failed after {attempts} attempts")]
    TransactionFailed { attempts: u32 },
}

impl SparkError {
    /// Short label for logs and telemetry.
    pub fn kind(&self) -> &'static str {
        match self {
            SparkError::Validation(_) => "validation",
            SparkError::RateLimitExceeded { .. } => "rate_limit",
            SparkError::NotFound(_) => "not_found",
            SparkError::Unavailable(_) => "unavailable",
            SparkError::TransactionFailed { .. } => "transaction_failed",
        }
    }

    /// Message suitable for showing to the person who triggered the action.
    pub fn user_message(&self) -> String {
        match self {
            SparkError::Validation(msg) => msg.clone(),
            SparkError::RateLimitExceeded { reset_in, reset_at } => {
                let at = reset_at
                    .map(|t| format!(" (at {})", t.format("%H:%M UTC")))
                    .unwrap_or_default();
                format!(
                    "You can only create {} sparks per hour. Try again in {reset_in}{at}.",
                    crate::local::rate_limiter::MAX_SPARKS_PER_HOUR
                )
            }
            SparkError::NotFound(_) => "That spark no longer exists.".to_string(),
            SparkError::Unavailable(_) | SparkError::TransactionFailed { .. } => {
                "Something went wrong. Please check your connection and try again.".to_string()
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, SparkError>;
