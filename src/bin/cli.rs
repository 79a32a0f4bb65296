//! Tether CLI
//!
//! Manual and lifecycle sync runs against an S3-compatible remote.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tether::error::{Result, TetherError};
use tether::remote::S3RemoteStore;
use tether::settings::{SettingsStore, SyncSettings};
use tether::sync::{LifecyclePolicy, ManualSync, ProgressSink, SyncOrchestrator, SyncResult};
use tether::types::Category;

#[derive(Parser)]
#[command(name = "tether")]
#[command(about = "Keep application data in sync with cloud storage")]
#[command(version)]
struct Cli {
    /// Settings file (JSON)
    #[arg(long, env = "TETHER_SETTINGS")]
    settings: Option<String>,

    /// Application data root holding one folder per category
    #[arg(long, env = "TETHER_DATA_ROOT")]
    data_root: Option<String>,

    /// Remote store URI (s3://bucket/prefix)
    #[arg(long, env = "TETHER_REMOTE")]
    remote: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Push every enabled category (full)
    Push,
    /// Pull every enabled category (full)
    Pull,
    /// Push then pull every enabled category (full)
    Sync,
    /// Run the application-start hook (templates first, then the rest)
    Start,
    /// Run the application-stop hook (incremental push)
    Stop,
    /// Show settings and watermarks
    Status,
    /// Enable sync, or one category
    Enable {
        /// Category name, or "all"
        category: Option<String>,
        /// Also pull on start and push on stop
        #[arg(long)]
        auto: bool,
    },
    /// Disable sync, or one category
    Disable {
        /// Category name, or "all"
        category: Option<String>,
    },
    /// Store an access token
    Login {
        #[arg(long, env = "TETHER_TOKEN")]
        token: String,
        /// Account label
        #[arg(long)]
        account: Option<String>,
    },
    /// Revoke the stored token and sign out
    Logout,
    /// Test the connection to the remote store
    Check,
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).to_string())
}

fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tether")
        .join("settings.json")
}

fn default_data_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tether")
}

fn parse_categories(name: Option<&str>) -> Result<Vec<Category>> {
    match name {
        None => Ok(Vec::new()),
        Some(n) if n.eq_ignore_ascii_case("all") => Ok(Category::ALL.to_vec()),
        Some(n) => n
            .parse::<Category>()
            .map(|c| vec![c])
            .map_err(TetherError::Config),
    }
}

async fn open_policy(cli: &Cli) -> Result<LifecyclePolicy> {
    let uri = cli.remote.as_deref().ok_or_else(|| {
        TetherError::Config("No remote configured; pass --remote or set TETHER_REMOTE".to_string())
    })?;
    let store = S3RemoteStore::from_uri(uri).await?;
    let data_root = cli
        .data_root
        .as_deref()
        .map(expand)
        .unwrap_or_else(default_data_root);

    let orchestrator = SyncOrchestrator::new(Arc::new(store), data_root);
    Ok(LifecyclePolicy::new(Arc::new(orchestrator)))
}

fn print_result(result: &SyncResult) {
    println!("{}", result.message);
    for (category, report) in &result.categories {
        println!(
            "  {}: {} uploaded, {} downloaded, {} skipped, {} failed",
            category, report.uploaded, report.downloaded, report.skipped, report.failed
        );
    }
    for (category, outcome) in result.failed_files() {
        println!(
            "  ! {}/{}: {}",
            category,
            outcome.relative_path,
            outcome.reason.as_deref().unwrap_or("unknown error")
        );
    }
    if let Some(details) = &result.detailed_error {
        eprintln!("{}", details);
    }
}

fn print_status(settings: &SyncSettings, store: &SettingsStore) {
    let fmt_time = |t: Option<chrono::DateTime<chrono::Utc>>| {
        t.map(|t| t.to_rfc3339()).unwrap_or_else(|| "never".to_string())
    };

    println!("Settings:      {}", store.path().display());
    println!("Enabled:       {}", settings.enabled);
    println!(
        "Signed in:     {}{}",
        settings.is_authenticated(),
        settings
            .account_name
            .as_deref()
            .map(|a| format!(" ({})", a))
            .unwrap_or_default()
    );
    println!("Sync on start: {}", settings.sync_on_start);
    println!("Sync on stop:  {}", settings.sync_on_stop);
    println!("Last sync:     {}", fmt_time(settings.last_sync_time));
    println!("Last push:     {}", fmt_time(settings.last_push_time));
    println!("Last pull:     {}", fmt_time(settings.last_pull_time));
    println!("Categories:");
    for category in Category::ALL {
        let mark = if settings.is_category_enabled(category) {
            "x"
        } else {
            " "
        };
        println!("  [{}] {}", mark, category);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries command output
    let registry =
        tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::from_default_env());
    if cli.json_logs {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .init();
    }

    let store = SettingsStore::new(
        cli.settings
            .as_deref()
            .map(expand)
            .unwrap_or_else(default_settings_path),
    );
    let mut settings = store.load()?;

    match &cli.command {
        Commands::Push | Commands::Pull | Commands::Sync => {
            let action = match cli.command {
                Commands::Push => ManualSync::Push,
                Commands::Pull => ManualSync::Pull,
                _ => ManualSync::Both,
            };
            let policy = open_policy(&cli).await?;
            let progress = |message: &str| eprintln!("{}", message);
            let progress: &dyn ProgressSink = &progress;
            let result = policy
                .sync_now(&mut settings, action, Some(progress))
                .await;
            print_result(&result);
            if result.success {
                store.save(&settings)?;
            } else {
                std::process::exit(1);
            }
        }

        Commands::Start => {
            let policy = open_policy(&cli).await?;
            let report = policy.on_start(&mut settings).await;
            for result in &report.results {
                print_result(result);
            }
            if report.success {
                store.save(&settings)?;
            }
        }

        Commands::Stop => {
            let policy = open_policy(&cli).await?;
            let report = policy.on_stop(&mut settings).await;
            for result in &report.results {
                print_result(result);
            }
            if report.success {
                store.save(&settings)?;
            }
        }

        Commands::Status => print_status(&settings, &store),

        Commands::Enable { category, auto } => {
            let categories = parse_categories(category.as_deref())?;
            if categories.is_empty() {
                settings.enabled = true;
            }
            for c in categories {
                settings.set_category_enabled(c, true);
            }
            if *auto {
                settings.sync_on_start = true;
                settings.sync_on_stop = true;
            }
            store.save(&settings)?;
            print_status(&settings, &store);
        }

        Commands::Disable { category } => {
            let categories = parse_categories(category.as_deref())?;
            if categories.is_empty() {
                settings.enabled = false;
            }
            for c in categories {
                settings.set_category_enabled(c, false);
            }
            store.save(&settings)?;
            print_status(&settings, &store);
        }

        Commands::Login { token, account } => {
            settings.auth_token = Some(token.clone());
            settings.account_name = account.clone();
            store.save(&settings)?;
            println!("Credentials saved to {}", store.path().display());
        }

        Commands::Logout => {
            let revoked = match open_policy(&cli).await {
                Ok(policy) => policy.disconnect(&mut settings).await,
                Err(e) => {
                    settings.sign_out();
                    Err(e)
                }
            };
            store.save(&settings)?;
            match revoked {
                Ok(()) => println!("Signed out"),
                Err(e) => println!("Signed out locally; remote revoke failed: {}", e),
            }
        }

        Commands::Check => {
            let policy = open_policy(&cli).await?;
            if policy.check_connection().await {
                println!("Connection OK");
            } else {
                println!("Connection failed");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
