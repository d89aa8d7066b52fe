use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use server_api::ApiContext;
use shared::{
    domain::{ClientId, ItemId, ItemKind, DEFAULT_CLIENT_ID, ROOT_FOLDER_ID},
    error::ApiError,
    protocol::{CreateItemRequest, RenameItemRequest},
};
use storage::Storage;

/// Maintenance commands run directly against the item store. Changes made
/// here are not pushed to connected clients.
#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/folders.db")]
    database_url: String,
    /// Client whose tree the command operates on.
    #[arg(long, default_value = DEFAULT_CLIENT_ID)]
    client_id: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    List {
        #[arg(default_value = ROOT_FOLDER_ID)]
        folder_id: String,
    },
    Create {
        parent_id: String,
        name: String,
        #[arg(long, default_value = "folder")]
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

fn rejected(err: ApiError) -> anyhow::Error {
    anyhow!("{:?}: {}", err.code, err.message)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let ctx = ApiContext {
        storage: Storage::new(&cli.database_url).await?,
    };
    let owner = ClientId::new(cli.client_id);

    match cli.command {
        Command::List { folder_id } => {
            let items = server_api::list_folder(&ctx, &owner, &ItemId::new(folder_id))
                .await
                .map_err(rejected)?;
            for item in items {
                println!(
                    "{}\t{}\t{}\t{}",
                    item.id,
                    item.kind.as_str(),
                    item.depth,
                    item.path
                );
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
            let applied = server_api::create_item(
                &ctx,
                &owner,
                &ItemId::new(parent_id),
                CreateItemRequest { name, kind },
            )
            .await
            .map_err(rejected)?;
            println!("created item_id={} path={}", applied.response.id, applied.response.path);
        }
        Command::Rename { item_id, name } => {
            let applied = server_api::rename_item(
                &ctx,
                &owner,
                &ItemId::new(item_id),
                RenameItemRequest { name },
            )
            .await
            .map_err(rejected)?;
            println!("renamed item_id={} path={}", applied.response.id, applied.response.path);
        }
        Command::Delete { item_id } => {
            let applied = server_api::delete_item(&ctx, &owner, &ItemId::new(item_id))
                .await
                .map_err(rejected)?;
            println!("{} item_id={}", applied.response.message, applied.response.item_id);
        }
    }

    Ok(())
}
