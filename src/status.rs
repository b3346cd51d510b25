// System status display: store stats, local state, and quota.

use anyhow::Result;
use std::path::Path;

use crate::config::Config;
use crate::local::onboarding::OnboardingState;
use crate::output::terminal;
use crate::service::SparkService;

/// Display system status to the terminal.
pub async fn show(
    service: &SparkService,
    onboarding: &OnboardingState,
    config: &Config,
    now_ms: i64,
) -> Result<()> {
    if config.uses_postgres() {
        println!("Database: PostgreSQL");
    } else {
        let file_size = std::fs::metadata(&config.db_path)
            .map(|m| format_bytes(m.len()))
            .unwrap_or_else(|_| "unknown".to_string());
        println!("Database: {} ({})", config.db_path, file_size);
    }

    let counts = service.counts().await?;
    println!(
        "Sparks: {} stored, {} active, {} expired",
        counts.total,
        counts.active,
        counts.total.saturating_sub(counts.active)
    );
    if counts.total > counts.active {
        println!("  Run `sparkdrop reap` to delete expired sparks");
    }

    println!("Local state: {}", config.state_dir.display());
    println!(
        "Onboarding: {}",
        if onboarding.has_completed().await {
            "completed"
        } else {
            "not completed"
        }
    );

    match config.photo_dir {
        Some(ref dir) => println!("Photos: {}", dir.display()),
        None => println!("Photos: disabled (set SPARKDROP_PHOTO_DIR to enable)"),
    }
    println!("Discovery radius: {} km", service.radius_km());

    terminal::display_quota(&service.quota().await, now_ms);
    Ok(())
}

/// Whether the SQLite file exists yet. Postgres is always considered present.
pub fn store_initialized(config: &Config) -> bool {
    config.uses_postgres() || Path::new(&config.db_path).exists()
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
