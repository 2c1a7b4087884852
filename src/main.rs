//! IronLens CLI
//!
//! Inspect classification, credits, the result cache and settings.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ironlens::billing::{CreditLedger, JsonLedgerStore, UsageStats, cost_class_for};
use ironlens::cache::ResultCache;
use ironlens::clock::SystemClock;
use ironlens::edit::{EditTask, classify};
use ironlens::settings::Settings;
use ironlens::Tier;

#[derive(Parser)]
#[command(name = "ironlens")]
#[command(about = "IronLens - cost-aware image edit routing", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Settings file (.json or .toml)
    #[arg(long, global = true, env = "IRONLENS_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify a prompt and show its cost class for the configured tier
    Classify {
        /// Free-text edit prompt
        prompt: String,
        /// Explicit task, skipping keyword classification
        #[arg(short, long)]
        task: Option<EditTask>,
    },

    /// Show credit usage for the current month
    Usage,

    /// Addon credit management
    #[command(subcommand)]
    Credits(CreditCommands),

    /// Subscription tier
    #[command(subcommand)]
    Tier(TierCommands),

    /// Result cache maintenance
    #[command(subcommand)]
    Cache(CacheCommands),

    /// Read and edit settings by dotted path
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum CreditCommands {
    /// Add purchased premium credits
    Grant {
        /// Number of credits
        credits: u32,
    },
}

#[derive(Subcommand)]
enum TierCommands {
    /// Show the configured tier
    Show,
    /// Set the tier: free, pro
    Set { tier: Tier },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Delete every cached result
    Clear,
    /// Delete expired and unreadable entries
    Purge,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print one setting
    Get { path: String },
    /// Change one setting
    Set { path: String, value: String },
    /// Restore one setting to its default
    Reset { path: String },
    /// Print every setting
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.json);

    let settings_path = cli.config.clone().unwrap_or_else(Settings::default_path);
    // Edits are written back without env overrides baked in.
    let file_settings = Settings::load_from(&settings_path)
        .with_context(|| format!("failed to load settings from {}", settings_path.display()))?;
    let mut settings = file_settings.clone();
    settings.apply_env();

    match cli.command {
        Commands::Classify { prompt, task } => {
            let task = classify(&prompt, task);
            let tier = settings.account.tier;
            println!("task:       {}", task);
            println!("cost class: {} ({} tier)", cost_class_for(task, tier), tier);
        }

        Commands::Usage => {
            let ledger = open_ledger(&settings).await?;
            print_usage(&ledger.usage_stats());
        }

        Commands::Credits(CreditCommands::Grant { credits }) => {
            let ledger = open_ledger(&settings).await?;
            ledger.grant_addon(credits).await;
            ledger.flush().await.context("failed to save ledger")?;
            println!("Addon balance: {}", ledger.addon_balance());
        }

        Commands::Tier(TierCommands::Show) => {
            println!("{}", settings.account.tier);
        }

        Commands::Tier(TierCommands::Set { tier }) => {
            let mut file_settings = file_settings;
            file_settings.account.tier = tier;
            save(&file_settings, &settings_path)?;
            println!("Tier set to {}", tier);
        }

        Commands::Cache(CacheCommands::Clear) => {
            let cache = open_cache(&settings);
            cache.clear_all().await.context("failed to clear cache")?;
            println!("Cache cleared");
        }

        Commands::Cache(CacheCommands::Purge) => {
            let cache = open_cache(&settings);
            let purged = cache.purge_expired().await.context("failed to purge cache")?;
            println!("Purged {} entries", purged);
        }

        Commands::Config(command) => run_config(command, file_settings, &settings_path)?,
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ironlens=info"));
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn open_ledger(settings: &Settings) -> anyhow::Result<CreditLedger> {
    let path = settings.ledger_path();
    let store = Arc::new(JsonLedgerStore::new(&path));
    CreditLedger::open(
        store,
        Arc::new(SystemClock),
        settings.entitlements.clone(),
        settings.account.tier,
    )
    .await
    .with_context(|| format!("failed to open ledger at {}", path.display()))
}

fn open_cache(settings: &Settings) -> ResultCache {
    ResultCache::new(settings.cache_config(), Arc::new(SystemClock))
}

fn save(settings: &Settings, path: &std::path::Path) -> anyhow::Result<()> {
    settings
        .save_to(path)
        .with_context(|| format!("failed to save settings to {}", path.display()))
}

fn print_usage(stats: &UsageStats) {
    println!("Tier:   {}", stats.tier);
    println!("Period: {}", stats.period);
    println!(
        "Budget:  {} used, {} remaining of {}",
        stats.budget.used, stats.budget.remaining, stats.budget.capacity
    );
    println!(
        "Premium: {} used, {} remaining of {}",
        stats.premium.used, stats.premium.remaining, stats.premium.capacity
    );
    println!("Addon:   {}", stats.addon_premium_balance);
}

fn run_config(command: ConfigCommands, mut settings: Settings, path: &std::path::Path) -> anyhow::Result<()> {
    match command {
        ConfigCommands::Get { path: key } => match settings.get(&key) {
            Some(value) => println!("{}", value),
            None => anyhow::bail!("Unknown setting: {}", key),
        },
        ConfigCommands::Set { path: key, value } => {
            settings.set(&key, &value)?;
            save(&settings, path)?;
            println!("{} = {}", key, settings.get(&key).unwrap_or_default());
        }
        ConfigCommands::Reset { path: key } => {
            settings.reset(&key)?;
            save(&settings, path)?;
            println!("{} = {}", key, settings.get(&key).unwrap_or_default());
        }
        ConfigCommands::List => {
            for (key, value) in settings.list() {
                println!("{} = {}", key, value);
            }
        }
    }
    Ok(())
}
