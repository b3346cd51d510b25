use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::geo::index::{DEFAULT_RADIUS_KM, DEFAULT_REFRESH_INTERVAL};

/// Central configuration loaded from environment variables.
///
/// The .env file is loaded automatically at startup via dotenvy. Every
/// setting has a default, so a bare `sparkdrop init` works out of the box.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    /// PostgreSQL connection URL (when set and starts with postgres://, uses Postgres backend)
    pub database_url: Option<String>,
    /// Where device-local state (rate limit window, onboarding flag) is kept
    pub state_dir: PathBuf,
    /// Photo uploads are disabled unless this is set
    pub photo_dir: Option<PathBuf>,
    /// Public prefix for stored photo URLs (defaults to a file:// URL of photo_dir)
    pub photo_base_url: Option<String>,
    pub radius_km: f64,
    /// How often live views re-query the store
    pub refresh_interval: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        let radius_km = match env::var("SPARKDROP_RADIUS_KM") {
            Ok(raw) => {
                let value: f64 = raw
                    .parse()
                    .with_context(|| format!("SPARKDROP_RADIUS_KM is not a number: {raw}"))?;
                if !value.is_finite() || value <= 0.0 {
                    anyhow::bail!("SPARKDROP_RADIUS_KM must be a positive number, got {raw}");
                }
                value
            }
            Err(_) => DEFAULT_RADIUS_KM,
        };

        let refresh_interval = match env::var("SPARKDROP_REFRESH_SECS") {
            Ok(raw) => {
                let secs: f64 = raw
                    .parse()
                    .with_context(|| format!("SPARKDROP_REFRESH_SECS is not a number: {raw}"))?;
                Duration::try_from_secs_f64(secs).with_context(|| {
                    format!("SPARKDROP_REFRESH_SECS must be a non-negative number, got {raw}")
                })?
            }
            Err(_) => DEFAULT_REFRESH_INTERVAL,
        };

        Ok(Self {
            db_path: env::var("SPARKDROP_DB_PATH")
                .unwrap_or_else(|_| "./sparkdrop.db".to_string()),
            database_url: env::var("DATABASE_URL").ok().filter(|url| !url.is_empty()),
            state_dir: env::var("SPARKDROP_STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_state_dir()),
            photo_dir: env::var("SPARKDROP_PHOTO_DIR").ok().map(PathBuf::from),
            photo_base_url: env::var("SPARKDROP_PHOTO_BASE_URL").ok(),
            radius_km,
            refresh_interval,
        })
    }

    /// True when DATABASE_URL selects the PostgreSQL backend.
    pub fn uses_postgres(&self) -> bool {
        self.database_url
            .as_deref()
            .is_some_and(|url| url.starts_with("postgres://") || url.starts_with("postgresql://"))
    }
}

/// Platform data directory (e.g. ~/.local/share/sparkdrop), or ./.sparkdrop
/// when the platform has none.
pub fn default_state_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("sparkdrop"))
        .unwrap_or_else(|| PathBuf::from(".sparkdrop"))
}
