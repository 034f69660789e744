//! SyncDrop CLI
//!
//! Thin wrapper around syncdrop-core for command-line usage.
//!
//! ## Usage
//!
//! ```bash
//! # Drop some text; type and collection are guessed
//! syncdrop add "https://example.com/article"
//!
//! # Drop into a specific collection
//! syncdrop add "fn main() {}" --collection code --type snippet
//!
//! # List active drops, a collection, or the trash
//! syncdrop list
//! syncdrop list --filter work --query standup
//! syncdrop list --filter trash
//!
//! # Trash, restore, move and purge
//! syncdrop rm <id>
//! syncdrop restore <id>
//! syncdrop move <id> personal
//! syncdrop purge <id>
//!
//! # Follow an account's view live (remote only)
//! syncdrop --owner <uuid> watch --filter inbox
//!
//! # Work against an account instead of the local store
//! SYNCDROP_REMOTE_URL=... SYNCDROP_API_KEY=... syncdrop --owner <uuid> list
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use syncdrop_core::config::default_data_dir;
use syncdrop_core::{
    AuthState, Classifier, CollectionFilter, CollectionId, Drop, DropId, DropType, Principal,
    RemoteConfig, SessionAuth, SyncConfig, SyncDrop, ViewFilter,
};

/// Longest content shown on one list line
const PREVIEW_CHARS: usize = 60;

/// SyncDrop - local-first drops with optional account sync
#[derive(Parser)]
#[command(name = "syncdrop")]
#[command(version)]
#[command(about = "SyncDrop - local-first drops with optional account sync")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Data directory (default: platform data dir/syncdrop)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// REST endpoint of the remote backend
    #[arg(long, global = true, env = "SYNCDROP_REMOTE_URL")]
    remote_url: Option<String>,

    /// Project API key for the remote backend
    #[arg(long, global = true, env = "SYNCDROP_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Session token of the signed-in user
    #[arg(long, global = true, env = "SYNCDROP_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// Act as this signed-in owner (requires a remote)
    #[arg(long, global = true, env = "SYNCDROP_OWNER")]
    owner: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show where drops are stored and who is signed in
    Status,

    /// Add a drop
    Add {
        /// Text, link or snippet to store
        content: String,

        /// Collection to file it in (default: suggested by the classifier)
        #[arg(short, long)]
        collection: Option<String>,

        /// Force a drop type
        #[arg(short = 't', long = "type")]
        drop_type: Option<String>,

        /// Extra tags
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// List drops
    List {
        /// "all", "trash", or a collection name
        #[arg(short, long, default_value = "all")]
        filter: String,

        /// Only show drops whose content, tags or title contain this
        #[arg(short, long)]
        query: Option<String>,
    },

    /// Move a drop to the trash
    Rm { id: String },

    /// Restore a drop from the trash
    Restore { id: String },

    /// Delete a drop permanently
    Purge { id: String },

    /// Move a drop to another collection
    Move { id: String, collection: String },

    /// Print an account's view every time it changes, until Ctrl+C
    ///
    /// Needs --owner: the local store is locked by whichever process has it
    /// open, so only the remote backend can be followed from here.
    Watch {
        #[arg(short, long, default_value = "all")]
        filter: String,
    },

    /// Copy local guest drops into the signed-in account
    Migrate,

    /// Remember (or forget) that this device continues without an account
    Guest {
        #[arg(value_enum)]
        mode: GuestMode,
    },

    /// Show this device's id
    Device,
}

#[derive(Clone, Copy, ValueEnum)]
enum GuestMode {
    On,
    Off,
}

fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();
}

fn build_config(cli: &Cli) -> Result<SyncConfig> {
    let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);
    let mut config = SyncConfig::new(data_dir);

    if let Some(url) = &cli.remote_url {
        let api_key = cli
            .api_key
            .clone()
            .context("--api-key is required with --remote-url")?;
        config = config.with_remote(RemoteConfig {
            url: url.clone(),
            api_key,
            access_token: cli.access_token.clone(),
            ..Default::default()
        });
    } else if cli.owner.is_some() {
        anyhow::bail!("--owner requires --remote-url");
    }

    Ok(config)
}

fn parse_filter(s: &str) -> Result<CollectionFilter> {
    s.parse()
        .map_err(|e| anyhow::anyhow!("Invalid filter '{}': {}", s, e))
}

fn parse_collection(s: &str) -> Result<CollectionId> {
    s.parse()
        .map_err(|e| anyhow::anyhow!("Invalid collection '{}': {}", s, e))
}

fn parse_drop_type(s: &str) -> Result<DropType> {
    s.parse()
        .map_err(|e| anyhow::anyhow!("Invalid drop type '{}': {}", s, e))
}

fn format_time(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|t| t.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ms.to_string())
}

fn preview(content: &str) -> String {
    let line = content.lines().next().unwrap_or_default();
    if line.chars().count() > PREVIEW_CHARS || line.len() < content.len() {
        let cut: String = line.chars().take(PREVIEW_CHARS).collect();
        format!("{}…", cut)
    } else {
        line.to_string()
    }
}

fn print_drops(drops: &[Drop], empty: &str) {
    if drops.is_empty() {
        println!("{}", empty);
        return;
    }

    println!("Drops ({}):", drops.len());
    println!();
    for drop in drops {
        let marker = if drop.is_trashed() { "✗" } else { "○" };
        println!(
            "  {} {} {:<9} {:<8} {}  {}",
            marker,
            drop.id,
            drop.collection_id.as_str(),
            drop.drop_type.as_str(),
            format_time(drop.created_at),
            preview(&drop.content)
        );
        if !drop.tags.is_empty() {
            println!("      tags: {}", drop.tags.join(", "));
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let config = build_config(&cli)?;
    let data_dir = config.data_dir.clone();
    if matches!(cli.command, Commands::Watch { .. }) && cli.owner.is_none() {
        anyhow::bail!("watch needs a signed-in account: pass --owner and --remote-url");
    }

    let auth = match &cli.owner {
        Some(owner) => SessionAuth::signed_in(Principal::new(owner.clone())),
        None => SessionAuth::new(),
    };
    let engine = SyncDrop::builder(config)
        .auth(std::sync::Arc::new(auth))
        .migrate_on_sign_in(false)
        .build()?;

    match cli.command {
        Commands::Status => {
            println!("SyncDrop v{}", env!("CARGO_PKG_VERSION"));
            println!();
            println!("Data directory: {}", data_dir.display());
            println!("Device: {}", engine.device_id().await?);
            let state = engine.auth_state().await?;
            match &state {
                AuthState::Authenticated(principal) => println!("Account: {}", principal),
                AuthState::Guest => println!("Account: guest"),
                AuthState::Unknown => println!("Account: not signed in"),
            }
            let backend = if state.principal().is_some() {
                "remote"
            } else {
                "local"
            };
            println!("Backend: {}", backend);
            let active = engine.list(CollectionFilter::All).await?;
            let trash = engine.list(CollectionFilter::Trash).await?;
            println!("Active drops: {}", active.len());
            println!("Trash: {}", trash.len());
        }

        Commands::Add {
            content,
            collection,
            drop_type,
            tags,
        } => {
            let forced = drop_type.as_deref().map(parse_drop_type).transpose()?;
            let mut classification = Classifier::offline().classify(&content, forced).await;
            if let Some(t) = forced {
                classification.drop_type = t;
            }
            if let Some(c) = collection.as_deref() {
                classification.suggested_collection = parse_collection(c)?;
            }
            classification.tags.extend(tags);

            let drop = classification.into_drop(content);
            engine.add_drop(drop.clone()).await?;

            println!("Added drop: {}", preview(&drop.content));
            println!("  ID: {}", drop.id);
            println!("  Collection: {}", drop.collection_id.display_name());
            println!("  Type: {}", drop.drop_type);
        }

        Commands::List { filter, query } => {
            let mut view = ViewFilter::new(parse_filter(&filter)?);
            if let Some(q) = query {
                view = view.with_query(q);
            }
            let drops = engine.list(view).await?;
            let empty = match parse_filter(&filter)? {
                CollectionFilter::Trash => "Trash is empty.",
                _ => "No drops.",
            };
            print_drops(&drops, empty);
        }

        Commands::Rm { id } => {
            engine.remove_drop(&DropId::from_string(id.as_str())).await?;
            println!("Moved to trash: {}", id);
        }

        Commands::Restore { id } => {
            engine.restore_drop(&DropId::from_string(id.as_str())).await?;
            println!("Restored: {}", id);
        }

        Commands::Purge { id } => {
            engine
                .permanently_delete(&DropId::from_string(id.as_str()))
                .await?;
            println!("Deleted permanently: {}", id);
        }

        Commands::Move { id, collection } => {
            let target = parse_collection(&collection)?;
            engine
                .move_drop(&DropId::from_string(id.as_str()), target)
                .await?;
            println!("Moved {} to {}", id, target.display_name());
        }

        Commands::Watch { filter } => {
            let filter = parse_filter(&filter)?;
            engine.start();

            println!("Watching {}. Press Ctrl+C to stop.", filter);
            println!();
            let _subscription = engine
                .subscribe(filter, |drops| {
                    print_drops(drops, "No drops.");
                    println!();
                })
                .await;

            tokio::signal::ctrl_c().await?;
            engine.shutdown();
            println!("Stopped.");
        }

        Commands::Migrate => {
            let count = engine.migrate_guest_data().await?;
            if count == 0 {
                println!("No guest drops to migrate.");
            } else {
                println!("Migrated {} drops to your account.", count);
            }
        }

        Commands::Guest { mode } => {
            let guest = matches!(mode, GuestMode::On);
            engine.set_guest(guest).await?;
            if guest {
                println!("Continuing as guest on this device.");
            } else {
                println!("Guest mode cleared.");
            }
        }

        Commands::Device => {
            println!("Device:");
            println!("  ID: {}", engine.device_id().await?);
        }
    }

    Ok(())
}
