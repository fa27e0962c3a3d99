use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

use timelock_core::background::spawn_unlock_loop;
use timelock_core::models::Countdown;
use timelock_core::paths::{data_dir, VaultPaths};
use timelock_core::settings::{KeyBackend, VaultSettings};
use timelock_core::{ItemId, ItemStatus, MediaType, NewItem, TimeVault, VaultItem};

mod notifier;

use crate::notifier::LogNotifier;

#[derive(Parser, Debug)]
#[command(author, version, about = "Timelock vault", long_about = None)]
struct Cli {
    /// Vault data directory (defaults to $TIMELOCK_DATA_DIR or the platform data dir)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BackendArg {
    Keyring,
    File,
}

impl From<BackendArg> for KeyBackend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Keyring => KeyBackend::Keyring,
            BackendArg::File => KeyBackend::File,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the data directory and settings file
    Init {
        #[arg(long, value_enum, default_value = "keyring")]
        key_backend: BackendArg,
    },
    /// Seal new content until a future time
    Seal {
        #[arg(long = "type")]
        media_type: MediaType,
        #[arg(long, conflicts_with = "file", required_unless_present = "file")]
        text: Option<String>,
        #[arg(long)]
        file: Option<PathBuf>,
        /// RFC 3339 timestamp
        #[arg(long, conflicts_with = "in_hours", required_unless_present = "in_hours")]
        unlock_at: Option<DateTime<Utc>>,
        #[arg(long)]
        in_hours: Option<i64>,
        #[arg(long)]
        message: Option<String>,
        /// Preview image for image or video items
        #[arg(long)]
        thumbnail: Option<PathBuf>,
    },
    /// Decrypt an unlocked item
    Open {
        id: ItemId,
        /// Write content here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// List items
    List {
        #[arg(long)]
        status: Option<ItemStatus>,
        #[arg(long = "type")]
        media_type: Option<MediaType>,
        #[arg(long)]
        json: bool,
    },
    /// Find items by media type label
    Search {
        text: String,
        #[arg(long)]
        json: bool,
    },
    /// Change the unlock date or message of an item
    Edit {
        id: ItemId,
        #[arg(long)]
        unlock_at: Option<DateTime<Utc>>,
        /// Empty string clears the message
        #[arg(long)]
        message: Option<String>,
    },
    /// Archive an unlocked item
    Archive { id: ItemId },
    /// Delete an item with its content and key
    Delete { id: ItemId },
    /// Run one unlock scan
    Unlock,
    /// Keep unlocking items in the background until interrupted
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let paths = VaultPaths::new(match cli.data_dir {
        Some(dir) => dir,
        None => data_dir()?,
    });

    match cli.command {
        Commands::Init { key_backend } => init_command(&paths, key_backend.into()),
        Commands::Run => run_command(&paths).await,
        command => {
            let (vault, _) = open_vault(&paths)?;
            dispatch(&vault, command)
        }
    }
}

fn init_command(paths: &VaultPaths, backend: KeyBackend) -> Result<()> {
    let settings_path = paths.settings_path();
    if settings_path.exists() {
        bail!("vault already initialised at {}", paths.root().display());
    }
    fs::create_dir_all(paths.root())?;
    let mut settings = VaultSettings::default();
    settings.keys.backend = backend;
    settings.save(&settings_path)?;
    open_vault(paths)?;
    println!("Vault initialised at {}", paths.root().display());
    Ok(())
}

fn open_vault(paths: &VaultPaths) -> Result<(TimeVault, VaultSettings)> {
    let settings = VaultSettings::load(&paths.settings_path())
        .with_context(|| format!("loading {}", paths.settings_path().display()))?;
    let vault = TimeVault::open(paths, &settings, Arc::new(LogNotifier))?;
    Ok((vault, settings))
}

async fn run_command(paths: &VaultPaths) -> Result<()> {
    let (vault, settings) = open_vault(paths)?;
    let (task, handle) = spawn_unlock_loop(
        vault.scheduler(),
        settings.unlock_interval(),
        |report| {
            if !report.unlocked.is_empty() {
                info!(count = report.unlocked.len(), "background unlock run");
            }
        },
    );

    info!(data_dir = %paths.root().display(), "service started");
    signal::ctrl_c().await?;
    info!("service stopping");
    handle.shutdown();
    task.await?;
    Ok(())
}

fn dispatch(vault: &TimeVault, command: Commands) -> Result<()> {
    match command {
        Commands::Seal {
            media_type,
            text,
            file,
            unlock_at,
            in_hours,
            message,
            thumbnail,
        } => {
            let content = match (text, file) {
                (Some(text), _) => Zeroizing::new(text.into_bytes()),
                (None, Some(path)) => Zeroizing::new(
                    fs::read(&path).with_context(|| format!("reading {}", path.display()))?,
                ),
                (None, None) => bail!("either --text or --file is required"),
            };
            let unlock_at = match (unlock_at, in_hours) {
                (Some(at), _) => at,
                (None, Some(hours)) => Duration::try_hours(hours)
                    .and_then(|delta| vault.now().checked_add_signed(delta))
                    .ok_or_else(|| anyhow!("--in-hours out of range: {hours}"))?,
                (None, None) => bail!("either --unlock-at or --in-hours is required"),
            };
            let thumbnail = thumbnail
                .map(|path| fs::read(&path).with_context(|| format!("reading {}", path.display())))
                .transpose()?
                .map(Zeroizing::new);

            let item = vault.create(NewItem {
                media_type,
                content,
                unlock_at,
                custom_message: message,
                metadata: None,
                thumbnail,
            })?;
            println!("{}", item.id);
        }
        Commands::Open { id, out } => {
            let content = vault.open_content(&id)?;
            match out {
                Some(path) => fs::write(&path, content.bytes())?,
                None => match content.as_text() {
                    Some(text) => println!("{text}"),
                    None => bail!("{} content is binary; use --out", content.item.media_type),
                },
            }
        }
        Commands::List {
            status,
            media_type,
            json,
        } => {
            let mut items = match status {
                Some(ItemStatus::Locked) => vault.list_locked()?,
                Some(ItemStatus::Unlocked) => vault.list_unlocked()?,
                Some(ItemStatus::Archived) => vault.list_archived()?,
                None => {
                    let mut all = vault.list_locked()?;
                    all.extend(vault.list_unlocked()?);
                    all.extend(vault.list_archived()?);
                    all
                }
            };
            if let Some(media_type) = media_type {
                items.retain(|item| item.media_type == media_type);
            }
            print_items(vault, items, json)?;
        }
        Commands::Search { text, json } => print_items(vault, vault.search(&text)?, json)?,
        Commands::Edit {
            id,
            unlock_at,
            message,
        } => {
            if unlock_at.is_none() && message.is_none() {
                bail!("nothing to change; pass --unlock-at and/or --message");
            }
            if let Some(at) = unlock_at {
                vault.edit_unlock_date(&id, at)?;
            }
            if let Some(message) = message {
                vault.set_custom_message(&id, Some(message))?;
            }
            print_items(vault, vec![vault.get(&id)?], false)?;
        }
        Commands::Archive { id } => {
            vault.archive(&id)?;
            println!("archived {id}");
        }
        Commands::Delete { id } => {
            if !vault.delete(&id)? {
                return Err(anyhow!("no item {id}"));
            }
            println!("deleted {id}");
        }
        Commands::Unlock => {
            let report = vault.startup()?;
            for id in &report.unlocked {
                println!("unlocked {id}");
            }
        }
        Commands::Init { .. } | Commands::Run => bail!("init and run open the vault themselves"),
    }
    Ok(())
}

#[derive(Serialize)]
struct ItemRow<'a> {
    #[serde(flatten)]
    item: &'a VaultItem,
    countdown: Option<Countdown>,
}

fn print_items(vault: &TimeVault, items: Vec<VaultItem>, json: bool) -> Result<()> {
    let rows: Vec<ItemRow<'_>> = items
        .iter()
        .map(|item| ItemRow {
            item,
            countdown: vault.countdown(item),
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    for row in rows {
        let when = match row.countdown {
            Some(c) => format!("unlocks in {}d {}h {}m", c.days, c.hours, c.minutes),
            None => format!("unlock {}", row.item.unlock_at.format("%Y-%m-%d %H:%M")),
        };
        println!(
            "{}  {:<8}  {:<10}  {}{}",
            row.item.id,
            row.item.status,
            row.item.media_type.display_name(),
            when,
            row.item
                .custom_message
                .as_deref()
                .map(|m| format!("  \"{m}\""))
                .unwrap_or_default(),
        );
    }
    Ok(())
}
