use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use highlighter::cache::{FileStorage, LocalCache};
use highlighter::config::{Config, resolve_paths};
use highlighter::model::Color;
use highlighter::page::{PageAgent, ReplicationOutcome, TextDocument};
use highlighter::popup::{PopupSession, preview};
use highlighter::remote::SyncClient;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "highlighter-cli")]
#[command(about = "Manages highlights for one page from the terminal", long_about = None)]
struct Args {
    #[arg(short = 'c', long = "config")]
    config_path: Option<String>,

    /// Page the highlights belong to
    #[arg(short, long)]
    url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Lists the page's highlights, newest first
    List,
    /// Saves a new highlight
    Add {
        #[arg(long)]
        text: String,
        #[arg(long, default_value = "yellow")]
        color: String,
    },
    /// Deletes a highlight by the id shown in `list`
    Delete { id: String },
    /// Writes the page's highlights to a text file
    Export {
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let (config_path, data_dir) = resolve_paths(args.config_path);
    let cfg = Config::new(&config_path)?;
    let client = cfg.client;

    let cache_file = client.cache_file(&data_dir);
    if let Some(parent) = cache_file.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let cache = Arc::new(LocalCache::new(FileStorage::new(cache_file)));
    let remote = SyncClient::from_config(&client);

    match args.command {
        Command::Add { text, color } => {
            let color: Color = color.parse()?;
            let mut document = TextDocument::new(text.clone());
            document.select(0, text.len());

            let agent = PageAgent::new(client.user_id.as_str(), args.url.as_str(), document, cache, remote);
            let applied = agent.apply_highlight(color)?;
            println!("saved {} ({})", applied.highlight.id, applied.highlight.color);

            match applied.replication.await? {
                ReplicationOutcome::Replicated { store_id, .. } => println!("synced as {}", store_id),
                ReplicationOutcome::Failed { reason, .. } => println!("kept offline: {}", reason),
                ReplicationOutcome::Discarded { .. } => println!("deleted before it synced"),
                ReplicationOutcome::Skipped { .. } => {}
            }
        }
        Command::List => {
            let session = open_session(&args.url, &client.user_id, cache, remote).await;
            for h in session.entries() {
                println!(
                    "{}\t{}\t{}\t{}",
                    h.id,
                    h.color,
                    h.created_at.format("%Y-%m-%d %H:%M:%S"),
                    preview(&h.text)
                );
            }
        }
        Command::Delete { id } => {
            let mut session = open_session(&args.url, &client.user_id, cache, remote).await;
            let deletion = session.delete(&id)?;
            println!("deleted {}", deletion.id);
            if let Some(remote) = deletion.remote {
                if !remote.await? {
                    eprintln!("server copy not deleted; it may reappear when online");
                }
            }
        }
        Command::Export { out } => {
            let mut session = open_session(&args.url, &client.user_id, cache, remote).await;
            let Some(file) = session.export(&chrono::Local::now()) else {
                bail!("no highlights to export for {}", args.url);
            };
            let path = file.save(&out)?;
            println!("{}", path.display());
        }
    }

    Ok(())
}

async fn open_session(
    url: &str,
    user_id: &str,
    cache: Arc<LocalCache<FileStorage>>,
    remote: Option<SyncClient>,
) -> PopupSession<FileStorage> {
    let agent = PageAgent::new(user_id, url, TextDocument::default(), cache.clone(), remote.clone());
    let session = PopupSession::open(url, agent.spawn(), cache, remote).await;
    if let Some(status) = session.status() {
        eprintln!("{}", status.message);
    }
    session
}
