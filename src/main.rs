use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use sparkdrop::clock::{Clock, SystemClock};
use sparkdrop::config::Config;
use sparkdrop::db::SparkStore;
use sparkdrop::error::SparkError;
use sparkdrop::local::onboarding::OnboardingState;
use sparkdrop::local::{FileKvStore, LocalStore};
use sparkdrop::output::terminal;
use sparkdrop::photos::LocalPhotoStore;
use sparkdrop::service::{SparkService, SubmitSpark};
use sparkdrop::spark::lifecycle;
use sparkdrop::spark::Coordinates;

/// Sparkdrop: short messages pinned to a place, gone after 48 hours.
#[derive(Parser)]
#[command(name = "sparkdrop", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database and local state
    Init,

    /// Drop a spark at your location
    Drop {
        /// What the spark says (up to 120 characters)
        text: String,

        /// Latitude of your location
        #[arg(long, allow_negative_numbers = true)]
        lat: Option<f64>,

        /// Longitude of your location
        #[arg(long, allow_negative_numbers = true)]
        lng: Option<f64>,

        /// Attach a JPEG photo
        #[arg(long)]
        photo: Option<PathBuf>,
    },

    /// List active sparks near a location
    Nearby {
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,

        #[arg(long, allow_negative_numbers = true)]
        lng: f64,

        /// Search radius in km (default: SPARKDROP_RADIUS_KM or 0.5)
        #[arg(long)]
        radius: Option<f64>,

        /// Keep watching and print changes as they happen
        #[arg(long)]
        watch: bool,
    },

    /// Show one spark and its countdown
    Show {
        id: String,

        /// Keep the countdown ticking until it expires
        #[arg(long)]
        live: bool,
    },

    /// Warm a spark
    Warm { id: String },

    /// Show how many sparks you can still drop this hour
    Quota,

    /// Delete expired sparks from the database
    Reap,

    /// Inspect or change the onboarding flag
    Onboarding {
        #[command(subcommand)]
        action: OnboardingAction,
    },

    /// Show system status (DB stats, local state, quota)
    Status,
}

#[derive(Subcommand)]
enum OnboardingAction {
    Status,
    Complete,
    Reset,
}

#[tokio::main]
async fn main() {
    // Load .env file if present (silently ignore if missing)
    let _ = dotenvy::dotenv();

    // Set up structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sparkdrop=info")),
        )
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        match e.downcast_ref::<SparkError>() {
            Some(spark_err) => {
                tracing::debug!(kind = spark_err.kind(), error = %spark_err, "Command failed");
                eprintln!("{} {}", "Error:".red().bold(), spark_err.user_message());
            }
            None => eprintln!("{} {e:#}", "Error:".red().bold()),
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    match cli.command {
        Commands::Init => {
            info!("Initializing Sparkdrop database...");
            let store = init_store(&config, clock.clone()).await?;
            let table_count = store.table_count().await?;
            let local = open_local(&config)?;
            if config.uses_postgres() {
                println!("Database initialized (PostgreSQL)");
            } else {
                println!("Database initialized at: {}", config.db_path);
            }
            println!("Tables created: {table_count}");
            println!("Local state: {}", config.state_dir.display());

            if !OnboardingState::new(local).has_completed().await {
                println!("\nSparkdrop is ready. Drop your first spark with:");
                println!("  sparkdrop drop \"hello from here\" --lat 52.52 --lng 13.40");
            }
        }

        Commands::Drop {
            text,
            lat,
            lng,
            photo,
        } => {
            let store = open_store(&config, clock.clone()).await?;
            let local = open_local(&config)?;
            let onboarding = OnboardingState::new(local.clone());
            if !onboarding.has_completed().await {
                print_onboarding();
                onboarding.complete().await?;
            }

            let location = match (lat, lng) {
                (Some(lat), Some(lng)) => Some(Coordinates::new(lat, lng)?),
                _ => None,
            };
            let photo = match photo {
                Some(path) => Some(
                    tokio::fs::read(&path)
                        .await
                        .with_context(|| format!("Failed to read photo {}", path.display()))?,
                ),
                None => None,
            };

            let service = build_service(&config, store, local, clock.clone());
            let spark = service
                .submit(SubmitSpark {
                    text,
                    location,
                    photo,
                })
                .await?;

            println!("{} Spark dropped: {}", "*".bright_yellow().bold(), spark.id);
            println!(
                "  Fades {}",
                spark.expires_at.format("%Y-%m-%d %H:%M UTC").to_string().dimmed()
            );
            let quota = service.quota().await;
            terminal::display_quota(&quota, clock.now_ms());
        }

        Commands::Nearby {
            lat,
            lng,
            radius,
            watch,
        } => {
            let center = Coordinates::new(lat, lng)?;
            let store = open_store(&config, clock.clone()).await?;
            let local = open_local(&config)?;
            let mut service = build_service(&config, store, local, clock.clone());
            if let Some(radius) = radius {
                service = service.with_radius_km(radius);
            }

            if !watch {
                let sparks = service.nearby(center).await?;
                terminal::display_nearby(&sparks, center, service.radius_km(), clock.now());
                return Ok(());
            }

            let mut subscription = service.subscribe_nearby(center).await?;
            println!("{}", "Watching for sparks (Ctrl-C to stop)...".dimmed());
            loop {
                tokio::select! {
                    update = subscription.next() => match update {
                        Some(update) => terminal::display_update(&update, center, clock.now()),
                        None => break,
                    },
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            subscription.unsubscribe();
        }

        Commands::Show { id, live } => {
            let store = open_store(&config, clock.clone()).await?;
            let local = open_local(&config)?;
            let service = build_service(&config, store, local, clock.clone());
            let detail = service.detail(&id).await?;
            terminal::display_detail(&detail);

            if live && !detail.countdown.is_expired() {
                let mut ticker = tokio::time::interval(std::time::Duration::from_secs(1));
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let countdown = lifecycle::remaining(detail.spark.expires_at, clock.now());
                            terminal::display_countdown_tick(&countdown);
                            if countdown.is_expired() {
                                break;
                            }
                        }
                        _ = tokio::signal::ctrl_c() => break,
                    }
                }
                println!();
            }
        }

        Commands::Warm { id } => {
            let store = open_store(&config, clock.clone()).await?;
            let local = open_local(&config)?;
            let service = build_service(&config, store, local, clock.clone());
            let count = service.warm(&id).await?;
            println!(
                "{} Warmed. This spark has {} warm(s).",
                "^".bright_red().bold(),
                count
            );
        }

        Commands::Quota => {
            let local = open_local(&config)?;
            let limiter = sparkdrop::local::rate_limiter::SparkRateLimiter::new(local, clock.clone());
            terminal::display_quota(&limiter.check().await, clock.now_ms());
        }

        Commands::Reap => {
            let store = open_store(&config, clock.clone()).await?;
            let local = open_local(&config)?;
            let service = build_service(&config, store, local, clock.clone());
            let removed = service.reap().await?;
            println!("Deleted {removed} expired spark(s)");
        }

        Commands::Onboarding { action } => {
            let onboarding = OnboardingState::new(open_local(&config)?);
            match action {
                OnboardingAction::Status => {
                    if onboarding.has_completed().await {
                        println!("Onboarding: completed");
                    } else {
                        println!("Onboarding: not completed");
                    }
                }
                OnboardingAction::Complete => {
                    onboarding.complete().await?;
                    println!("Onboarding marked as completed");
                }
                OnboardingAction::Reset => {
                    onboarding.reset().await?;
                    println!("Onboarding reset");
                }
            }
        }

        Commands::Status => {
            if !sparkdrop::status::store_initialized(&config) {
                println!("Database: not initialized");
                println!("\nRun `sparkdrop init` to set up the database.");
                return Ok(());
            }
            let store = open_store(&config, clock.clone()).await?;
            let local = open_local(&config)?;
            let onboarding = OnboardingState::new(local.clone());
            let service = build_service(&config, store, local, clock.clone());
            sparkdrop::status::show(&service, &onboarding, &config, clock.now_ms()).await?;
        }
    }

    Ok(())
}

fn print_onboarding() {
    println!("{}", "Welcome to Sparkdrop".bold());
    println!("  Sparks are short notes left at a place. Anyone nearby can find and warm them.");
    println!("  Every spark fades 48 hours after it is dropped.");
    println!();
}

fn build_service(
    config: &Config,
    store: Arc<dyn SparkStore>,
    local: Arc<dyn LocalStore>,
    clock: Arc<dyn Clock>,
) -> SparkService {
    let mut service = SparkService::new(store, local, clock.clone())
        .with_radius_km(config.radius_km)
        .with_refresh_interval(config.refresh_interval);
    if let Some(ref dir) = config.photo_dir {
        service = service.with_photo_store(Arc::new(LocalPhotoStore::new(
            dir.clone(),
            config.photo_base_url.clone(),
            clock,
        )));
    }
    service
}

fn open_local(config: &Config) -> Result<Arc<dyn LocalStore>> {
    Ok(Arc::new(FileKvStore::in_dir(&config.state_dir)?))
}

/// Open the store for an already-initialized deployment.
async fn open_store(config: &Config, clock: Arc<dyn Clock>) -> Result<Arc<dyn SparkStore>> {
    if config.uses_postgres() {
        return connect_postgres(config, clock).await;
    }
    sparkdrop::db::open_sqlite(&config.db_path, clock)
}

/// Initialize the store (create if needed).
async fn init_store(config: &Config, clock: Arc<dyn Clock>) -> Result<Arc<dyn SparkStore>> {
    if config.uses_postgres() {
        return connect_postgres(config, clock).await;
    }
    sparkdrop::db::initialize_sqlite(&config.db_path, clock)
}

#[cfg(feature = "postgres")]
async fn connect_postgres(config: &Config, clock: Arc<dyn Clock>) -> Result<Arc<dyn SparkStore>> {
    let url = config.database_url.as_deref().unwrap_or_default();
    info!("Using PostgreSQL backend");
    sparkdrop::db::connect_postgres(url, clock).await
}

#[cfg(not(feature = "postgres"))]
async fn connect_postgres(_config: &Config, _clock: Arc<dyn Clock>) -> Result<Arc<dyn SparkStore>> {
    anyhow::bail!(
        "DATABASE_URL points to PostgreSQL but the 'postgres' feature is not compiled in.\n\
         Rebuild with: cargo build --features postgres"
    );
}
