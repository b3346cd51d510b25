// Colored terminal output for spark lists, details, and live updates.
//
// main.rs does the I/O and hands the results here for display.

use chrono::{DateTime, Utc};
use colored::Colorize;

use super::{format_distance, truncate_chars};
use crate::geo::distance::haversine_km;
use crate::geo::NearbyUpdate;
use crate::local::rate_limiter::{format_reset_time, RateLimitStatus, MAX_SPARKS_PER_HOUR};
use crate::service::SparkDetail;
use crate::spark::lifecycle::{self, Countdown};
use crate::spark::{Coordinates, Spark};

const LIST_TEXT_CHARS: usize = 48;

/// Display the sparks around `center`, nearest first.
pub fn display_nearby(sparks: &[Spark], center: Coordinates, radius_km: f64, now: DateTime<Utc>) {
    if sparks.is_empty() {
        println!(
            "No sparks within {}. Drop one with `sparkdrop drop`.",
            format_distance(radius_km)
        );
        return;
    }

    println!(
        "\n{}",
        format!(
            "=== {} spark(s) within {} ===",
            sparks.len(),
            format_distance(radius_km)
        )
        .bold()
    );
    println!();
    println!(
        "  {:<36}  {:>8}  {:>5}  {:<12}  {}",
        "ID".dimmed(),
        "Distance".dimmed(),
        "Warms".dimmed(),
        "Expires in".dimmed(),
        "Text".dimmed(),
    );
    println!("  {}", "-".repeat(100).dimmed());

    for spark in sparks {
        print_row(spark, center, now);
    }
    println!();
}

fn print_row(spark: &Spark, center: Coordinates, now: DateTime<Utc>) {
    let distance = haversine_km(center, spark.coordinates);
    let countdown = lifecycle::remaining(spark.expires_at, now);
    let photo = if spark.photo_url.is_some() { " [photo]" } else { "" };
    println!(
        "  {:<36}  {:>8}  {:>5}  {:<12}  {}{}",
        spark.id,
        format_distance(distance),
        spark.warmed_count,
        colorize_countdown(&countdown),
        truncate_chars(&spark.text, LIST_TEXT_CHARS),
        photo.dimmed(),
    );
}

/// Display one spark with its countdown.
pub fn display_detail(detail: &SparkDetail) {
    let spark = &detail.spark;
    println!("\n{}", format!("=== Spark {} ===", spark.id).bold());
    println!();
    println!("  {}", spark.text);
    println!();
    if let Some(ref url) = spark.photo_url {
        println!("  Photo:     {url}");
    }
    println!(
        "  Location:  {:.5}, {:.5}",
        spark.coordinates.latitude, spark.coordinates.longitude
    );
    println!("  Dropped:   {}", spark.created_at.format("%Y-%m-%d %H:%M UTC"));
    println!("  Warms:     {}", spark.warmed_count.to_string().bright_yellow());
    println!("  Time left: {}", colorize_countdown(&detail.countdown));
    println!();
}

/// Rewrite the countdown line in place.
pub fn display_countdown_tick(countdown: &Countdown) {
    use std::io::Write;
    print!("\r  Time left: {}   ", colorize_countdown(countdown));
    let _ = std::io::stdout().flush();
}

/// One line per live update.
pub fn display_update(update: &NearbyUpdate, center: Coordinates, now: DateTime<Utc>) {
    match update {
        NearbyUpdate::Snapshot(sparks) => {
            println!("{} {} spark(s) in view", "=".dimmed(), sparks.len());
            for spark in sparks {
                print_row(spark, center, now);
            }
        }
        NearbyUpdate::Added(spark) => {
            print!("{} ", "+".green().bold());
            print_row(spark, center, now);
        }
        NearbyUpdate::Modified(spark) => {
            println!(
                "{} {} warmed ({})",
                "~".yellow().bold(),
                spark.id,
                spark.warmed_count
            );
        }
        NearbyUpdate::Removed(id) => {
            println!("{} {} faded", "-".red().bold(), id);
        }
    }
}

/// Display how many sparks this device may still drop this hour.
pub fn display_quota(status: &RateLimitStatus, now_ms: i64) {
    if status.allowed {
        println!(
            "Sparks left this hour: {}/{}",
            status.remaining_count.to_string().green().bold(),
            MAX_SPARKS_PER_HOUR
        );
    } else {
        let wait = status
            .reset_time
            .map(|reset| format_reset_time(reset, now_ms))
            .unwrap_or_else(|| "0m".to_string());
        println!(
            "{} Hourly limit reached. Next spark in {}",
            "!".red().bold(),
            wait.bold()
        );
    }
}

fn colorize_countdown(countdown: &Countdown) -> colored::ColoredString {
    match countdown {
        Countdown::Expired => "Expired".red(),
        Countdown::Active(left) if left.hours < 1 => countdown.to_string().bright_red(),
        Countdown::Active(left) if left.hours < 6 => countdown.to_string().yellow(),
        Countdown::Active(_) => countdown.to_string().green(),
    }
}
