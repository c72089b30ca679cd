//! CLI commands implementation.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use console::style;
use rand::RngCore;

use crate::config::Settings;
use crate::events::EventBus;
use crate::models::{ScrapeConfig, ScrapeStatus};
use crate::repository::{AlertRepository, ScrapeConfigRepository, ScrapeDataRepository};
use crate::scheduler::{Scheduler, SchedulerContext};
use crate::services::{RunOutcome, ScrapeService};
use crate::vault::Vault;

#[derive(Parser)]
#[command(name = "scbadash")]
#[command(about = "SCBA fleet dashboard: portal scraper, alerts, and scheduler")]
#[command(version)]
pub struct Cli {
    /// Data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory, settings file, and database
    Init,

    /// Run the background scheduler until interrupted
    Run,

    /// Run one scrape immediately
    Scrape {
        /// Fetch the gear list instead of the open-alerts dataset
        #[arg(long)]
        gear: bool,
    },

    /// Show system status
    Status,

    /// Manage the portal scrape configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Manage broadcast alerts
    Alert {
        #[command(subcommand)]
        command: AlertCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the current configuration (passwords are never printed)
    Show,

    /// Update configuration fields
    Set {
        /// Portal username
        #[arg(long)]
        username: Option<String>,
        /// Portal password (stored encrypted)
        #[arg(long)]
        password: Option<String>,
        /// Portal base URL
        #[arg(long)]
        base_url: Option<String>,
        /// Scrape interval in minutes
        #[arg(long)]
        interval: Option<u32>,
    },
}

#[derive(Subcommand)]
enum AlertCommands {
    /// Add an alert (activation is applied by the scheduler sweep)
    Add {
        /// Alert message
        message: String,
        /// End of the active window (RFC 3339)
        end: DateTime<Utc>,
        /// Start of the active window (RFC 3339, defaults to now)
        #[arg(long)]
        start: Option<DateTime<Utc>>,
    },

    /// List all alerts
    List,
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.data_dir.as_deref())?;

    match cli.command {
        Commands::Init => cmd_init(&settings),
        Commands::Run => cmd_run(&settings).await,
        Commands::Scrape { gear } => cmd_scrape(&settings, gear).await,
        Commands::Status => cmd_status(&settings),
        Commands::Config { command } => match command {
            ConfigCommands::Show => cmd_config_show(&settings),
            ConfigCommands::Set {
                username,
                password,
                base_url,
                interval,
            } => cmd_config_set(&settings, username, password, base_url, interval),
        },
        Commands::Alert { command } => match command {
            AlertCommands::Add {
                message,
                end,
                start,
            } => cmd_alert_add(&settings, &message, start, end),
            AlertCommands::List => cmd_alert_list(&settings),
        },
    }
}

fn open_vault(settings: &Settings) -> anyhow::Result<Vault> {
    let secret = settings.vault_secret();
    if secret.is_empty() {
        anyhow::bail!(
            "no secret configured; run `scbadash init` or set SCBADASH_SECRET_KEY"
        );
    }
    Ok(Vault::from_secret(secret))
}

fn build_service(settings: &Settings) -> anyhow::Result<ScrapeService> {
    let db = settings.database_path();
    Ok(ScrapeService::new(
        ScrapeConfigRepository::new(&db)?,
        ScrapeDataRepository::new(&db)?,
        open_vault(settings)?,
        EventBus::new(),
    ))
}

fn cmd_init(settings: &Settings) -> anyhow::Result<()> {
    std::fs::create_dir_all(&settings.data_dir)?;

    let settings_path = settings.data_dir.join("scbadash.toml");
    if settings_path.exists() {
        println!(
            "{} Settings file already exists: {}",
            style("!").yellow(),
            settings_path.display()
        );
    } else {
        let mut seeded = settings.clone();
        if seeded.secret_key.is_empty() {
            seeded.secret_key = generate_secret();
        }
        std::fs::write(&settings_path, toml::to_string_pretty(&seeded)?)?;
        println!(
            "  {} Wrote settings with a fresh secret: {}",
            style("✓").green(),
            settings_path.display()
        );
    }

    // Constructing the repositories creates the schema.
    let db = settings.database_path();
    ScrapeConfigRepository::new(&db)?;
    ScrapeDataRepository::new(&db)?;
    AlertRepository::new(&db)?;
    println!(
        "  {} Database initialized: {}",
        style("✓").green(),
        db.display()
    );
    Ok(())
}

fn generate_secret() -> String {
    use base64::Engine;
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

async fn cmd_run(settings: &Settings) -> anyhow::Result<()> {
    let db = settings.database_path();
    let events = EventBus::new();
    let scrape = ScrapeService::new(
        ScrapeConfigRepository::new(&db)?,
        ScrapeDataRepository::new(&db)?,
        open_vault(settings)?,
        events.clone(),
    );
    let ctx = SchedulerContext {
        scrape: Arc::new(scrape),
        alert_repo: Arc::new(AlertRepository::new(&db)?),
        config_repo: Arc::new(ScrapeConfigRepository::new(&db)?),
        events,
    };

    let config_repo = ScrapeConfigRepository::new(&db)?;
    let mut current_interval = config_repo
        .get()?
        .map(|config| config.scrape_interval_minutes)
        .unwrap_or(crate::config::DEFAULT_SCRAPE_INTERVAL_MINUTES);

    let scheduler = Arc::new(Scheduler::start(ctx).await?);
    println!(
        "{} Scheduler running, press Ctrl-C to stop",
        style("✓").green()
    );

    // Pick up interval changes made by `config set` without a restart.
    let watcher = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(60));
            tick.tick().await;
            loop {
                tick.tick().await;
                let stored = match config_repo.get() {
                    Ok(Some(config)) => config.scrape_interval_minutes,
                    _ => continue,
                };
                if stored != current_interval
                    && scheduler.reschedule_scrape(stored).await.is_ok()
                {
                    current_interval = stored;
                }
            }
        })
    };

    tokio::signal::ctrl_c().await?;
    println!("\n{} Shutting down", style("!").yellow());
    watcher.abort();
    scheduler.shutdown().await?;
    Ok(())
}

async fn cmd_scrape(settings: &Settings, gear: bool) -> anyhow::Result<()> {
    let service = build_service(settings)?;
    let outcome = if gear {
        service.run_gear().await?
    } else {
        service.run().await?
    };

    match outcome {
        RunOutcome::Skipped => {
            println!(
                "{} Scrape skipped: configure credentials with `scbadash config set`",
                style("!").yellow()
            );
            Ok(())
        }
        RunOutcome::Completed(ScrapeStatus::Success) => {
            println!("{} Scrape succeeded", style("✓").green());
            Ok(())
        }
        RunOutcome::Completed(ScrapeStatus::Error) => {
            let latest = ScrapeDataRepository::new(&settings.database_path())?.latest()?;
            let reason = latest
                .and_then(|record| record.envelope.error)
                .unwrap_or_else(|| "unknown error".to_string());
            println!("{} Scrape failed: {}", style("✗").red(), reason);
            anyhow::bail!("scrape failed");
        }
    }
}

fn cmd_status(settings: &Settings) -> anyhow::Result<()> {
    let db = settings.database_path();
    let config_repo = ScrapeConfigRepository::new(&db)?;
    let data_repo = ScrapeDataRepository::new(&db)?;
    let alert_repo = AlertRepository::new(&db)?;

    println!("\n{}", style("SCBA Dashboard Status").bold());
    println!("  Data directory: {}", settings.data_dir.display());
    println!("  Database:       {}", db.display());

    match config_repo.get()? {
        Some(config) => {
            println!("  Portal:         {}", config.effective_base_url());
            println!(
                "  Credentials:    {}",
                if config.has_credentials() {
                    style("configured").green().to_string()
                } else {
                    style("missing").yellow().to_string()
                }
            );
            println!("  Interval:       {} min", config.scrape_interval_minutes);
            match config.last_scrape {
                Some(at) => println!("  Last scrape:    {}", at.to_rfc3339()),
                None => println!("  Last scrape:    never"),
            }
        }
        None => println!(
            "  Portal:         {} (not configured)",
            style("—").dim()
        ),
    }

    println!("  Records:        {}", data_repo.count()?);
    if let Some(latest) = data_repo.latest()? {
        println!(
            "  Latest:         {} at {}",
            match latest.envelope.status {
                ScrapeStatus::Success => style("success").green().to_string(),
                ScrapeStatus::Error => style("error").red().to_string(),
            },
            latest.scraped_at.to_rfc3339()
        );
    }
    match alert_repo.active()? {
        Some(alert) => println!("  Active alert:   {}", alert.message),
        None => println!("  Active alert:   none"),
    }
    Ok(())
}

fn cmd_config_show(settings: &Settings) -> anyhow::Result<()> {
    let config_repo = ScrapeConfigRepository::new(&settings.database_path())?;
    match config_repo.get()? {
        Some(config) => {
            println!("\n{}", style("Scrape Configuration").bold());
            println!("  Base URL: {}", config.effective_base_url());
            println!(
                "  Username: {}",
                config.username.as_deref().unwrap_or("(not set)")
            );
            println!(
                "  Password: {}",
                if config.password_encrypted.is_some() {
                    "(set, encrypted)"
                } else {
                    "(not set)"
                }
            );
            println!("  Interval: {} min", config.scrape_interval_minutes);
            println!("  Updated:  {}", config.updated_at.to_rfc3339());
        }
        None => println!(
            "{} No configuration yet; use `scbadash config set`",
            style("!").yellow()
        ),
    }
    Ok(())
}

fn cmd_config_set(
    settings: &Settings,
    username: Option<String>,
    password: Option<String>,
    base_url: Option<String>,
    interval: Option<u32>,
) -> anyhow::Result<()> {
    if username.is_none() && password.is_none() && base_url.is_none() && interval.is_none() {
        anyhow::bail!("nothing to set; pass at least one of --username/--password/--base-url/--interval");
    }

    let config_repo = ScrapeConfigRepository::new(&settings.database_path())?;
    let mut config = config_repo
        .get()?
        .unwrap_or_else(|| ScrapeConfig::new(&settings.default_base_url));

    if let Some(username) = username {
        config.username = Some(username);
    }
    if let Some(password) = password {
        let vault = open_vault(settings)?;
        config.password_encrypted = Some(vault.encrypt(&password)?);
    }
    if let Some(base_url) = base_url {
        config.base_url = base_url;
    }
    if let Some(interval) = interval {
        if interval == 0 {
            anyhow::bail!("interval must be at least 1 minute");
        }
        config.scrape_interval_minutes = interval;
    }

    config_repo.upsert(&config)?;
    println!("{} Configuration saved", style("✓").green());
    if interval.is_some() {
        println!(
            "  {} A running scheduler picks up the new interval within a minute",
            style("!").yellow()
        );
    }
    Ok(())
}

fn cmd_alert_add(
    settings: &Settings,
    message: &str,
    start: Option<DateTime<Utc>>,
    end: DateTime<Utc>,
) -> anyhow::Result<()> {
    if let Some(start) = start {
        if end <= start {
            anyhow::bail!("end time must be after start time");
        }
    }
    let repo = AlertRepository::new(&settings.database_path())?;
    let alert = repo.add(message, start, end)?;
    println!(
        "  {} Added alert #{} (active from {} to {})",
        style("✓").green(),
        alert.id,
        alert.effective_start().to_rfc3339(),
        alert.end_time.to_rfc3339()
    );
    Ok(())
}

fn cmd_alert_list(settings: &Settings) -> anyhow::Result<()> {
    let repo = AlertRepository::new(&settings.database_path())?;
    let alerts = repo.all()?;
    if alerts.is_empty() {
        println!("{} No alerts", style("!").yellow());
        return Ok(());
    }

    println!("\n{}", style("Alerts").bold());
    for alert in alerts {
        let marker = if alert.is_active {
            style("●").green()
        } else {
            style("○").dim()
        };
        println!(
            "  {} #{} {} ({} → {})",
            marker,
            alert.id,
            alert.message,
            alert.effective_start().to_rfc3339(),
            alert.end_time.to_rfc3339()
        );
    }
    Ok(())
}
