// SparkFactory: builds the record that gets handed to the store.
//
// No I/O. The only dependency is the clock, so the output is fully
// determined by the inputs plus `clock.now()`.

use std::sync::Arc;

use crate::clock::Clock;
use crate::error::{Result, SparkError};

use super::{spark_lifetime, Coordinates, NewSpark, MAX_TEXT_CHARS};

#[derive(Clone)]
pub struct SparkFactory {
    clock: Arc<dyn Clock>,
}

impl SparkFactory {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Build a new spark record with a fresh 48-hour lifetime and zero warms.
    ///
    /// Input is expected to have passed `validate_text` already; anything else
    /// is stored as given.
    pub fn build(
        &self,
        text: &str,
        coordinates: Coordinates,
        photo_url: Option<String>,
    ) -> NewSpark {
        let created_at = self.clock.now();
        NewSpark {
            text: text.to_string(),
            photo_url,
            coordinates,
            created_at,
            expires_at: created_at + spark_lifetime(),
            warmed_count: 0,
        }
    }
}

/// Trim and check spark text at the caller boundary.
///
/// Returns the trimmed text. Length is counted in characters, not bytes.
pub fn validate_text(text: &str) -> Result<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(SparkError::Validation(
            "Please enter some text for your spark".to_string(),
        ));
    }
    let chars = trimmed.chars().count();
    if chars > MAX_TEXT_CHARS {
        return Err(SparkError::Validation(format!(
            "Spark text is {chars} characters; the limit is {MAX_TEXT_CHARS}"
        )));
    }
    Ok(trimmed.to_string())
}
