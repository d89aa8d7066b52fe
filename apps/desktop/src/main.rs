use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{FolderApi, HttpFolderApi, ListingEvent, SyncClient, SyncConfig};
use config::{Config, Environment, File};
use shared::domain::{FolderRef, Item, ItemId, ItemKind};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Args {
    /// Optional settings file; `SYNC__*` environment variables override it.
    #[arg(long, default_value = "sync.toml")]
    config: String,
    #[arg(long)]
    server_url: Option<String>,
    /// Client whose tree is watched and edited; defaults to the shared tree.
    #[arg(long)]
    client_id: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow a folder live and print every change to its listing.
    Watch {
        #[arg(long, default_value = shared::domain::ROOT_FOLDER_ID)]
        folder_id: String,
        /// Path of the folder; empty for the root.
        #[arg(long, default_value = "")]
        path: String,
    },
    List {
        #[arg(default_value = shared::domain::ROOT_FOLDER_ID)]
        folder_id: String,
    },
    Create {
        parent_id: String,
        name: String,
        #[arg(long, default_value = "file")]
        kind: String,
    },
    Rename {
        item_id: String,
        name: String,
    },
    Delete {
        item_id: String,
    },
}

fn load_sync_config(args: &Args) -> Result<SyncConfig> {
    Config::builder()
        .set_default("server_url", "http://127.0.0.1:8000")?
        .add_source(File::with_name(&args.config).required(false))
        .add_source(
            Environment::with_prefix("SYNC")
                .separator("__")
                .try_parsing(true),
        )
        .set_override_option("server_url", args.server_url.clone())?
        .set_override_option("client_id", args.client_id.clone())?
        .build()
        .context("failed to load sync settings")?
        .try_deserialize()
        .context("invalid sync settings")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = load_sync_config(&args)?;
    info!(server_url = %config.server_url, client_id = %config.client_id, "using folder service");

    match args.command {
        Command::Watch { folder_id, path } => {
            watch(&config, FolderRef::new(ItemId::new(folder_id), path)).await?;
        }
        Command::List { folder_id } => {
            let api = HttpFolderApi::new(&config)?;
            for item in api.list_folder(&ItemId::new(folder_id)).await? {
                println!("{}", describe(&item));
            }
        }
        Command::Create {
            parent_id,
            name,
            kind,
        } => {
            let Some(kind) = ItemKind::parse(&kind) else {
                bail!("unknown item kind `{kind}`, expected file or folder");
            };
            let api = HttpFolderApi::new(&config)?;
            let item = api.create_item(&ItemId::new(parent_id), &name, kind).await?;
            println!("created {}", describe(&item));
        }
        Command::Rename { item_id, name } => {
            let api = HttpFolderApi::new(&config)?;
            let item = api.rename_item(&ItemId::new(item_id), &name).await?;
            println!("renamed {}", describe(&item));
        }
        Command::Delete { item_id } => {
            let api = HttpFolderApi::new(&config)?;
            let response = api.delete_item(&ItemId::new(item_id)).await?;
            println!("{} ({})", response.message, response.item_id);
        }
    }

    Ok(())
}

async fn watch(config: &SyncConfig, folder: FolderRef) -> Result<()> {
    let client = SyncClient::from_config(config)?;
    let mut events = client.subscribe_listing();

    let client_id = config.client_id.clone();
    client.open(client_id.clone())?;
    info!(%client_id, folder_id = %folder.id, path = %folder.path, "watching folder");
    if let Err(err) = client.navigate(folder).await {
        warn!(%err, "initial listing unavailable, waiting for live updates");
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(ListingEvent::Reset { folder, items }) => {
                    println!("== {} ({} items)", display_path(&folder.path), items.len());
                    for item in &items {
                        println!("   {}", describe(item));
                    }
                }
                Ok(ListingEvent::Added(item)) => println!("+  {}", describe(&item)),
                Ok(ListingEvent::Renamed(item)) => println!("~  {}", describe(&item)),
                Ok(ListingEvent::Removed(item_id)) => println!("-  {item_id}"),
                Ok(ListingEvent::ConnectionFailed) => {
                    client.close()?;
                    bail!("connection to {} failed; rerun to retry", config.server_url);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "listing events lagged, printing snapshot");
                    for item in client.listing() {
                        println!("   {}", describe(&item));
                    }
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    client.close()?;
    Ok(())
}

fn display_path(path: &str) -> &str {
    if path.is_empty() {
        "/"
    } else {
        path
    }
}

fn describe(item: &Item) -> String {
    let marker = if item.is_folder() { "/" } else { "" };
    format!("{}{marker}  [{}]", item.name, item.id)
}
