#![deny(clippy::mod_module_files)]
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use git_mirror::{
    BarProgress, ContentId, Error, FsDestination, Mirror, MirrorConfig, ProgressSink, Silent,
};

#[derive(Parser)]
#[command(name = "git-mirror", about = "Mirror remote git repositories into local directories", version)]
struct Cli {
    /// Config file (default: ~/.config/git-mirror/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Route fetches through this CORS relay
    #[arg(long, global = true)]
    cors_proxy: Option<String>,

    /// Relay profile from the config file
    #[arg(long, global = true)]
    relay: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Synchronize, then bring DEST up to date
    Update { url: String, dest: PathBuf },
    /// Clone or pull into the local store
    Sync { url: String },
    /// Write the stored snapshot into DEST without touching the network
    Copy {
        url: String,
        dest: PathBuf,
        /// Only write files changed since this tree id
        #[arg(long)]
        since: Option<String>,
    },
    /// Print the commit history of the mirrored branch
    History {
        url: String,
        #[arg(long)]
        json: bool,
    },
    /// Print the current checkpoint
    Head { url: String },
    /// Delete the local store
    Clear { url: String },
}

fn load_config(cli: &Cli) -> Result<MirrorConfig> {
    let mut config = match &cli.config {
        Some(path) => MirrorConfig::load_with_env(path)?,
        None => MirrorConfig::load()?,
    };
    if let Some(url) = &cli.cors_proxy {
        config.cors_proxy = Some(url.clone());
    }
    if let Some(name) = &cli.relay {
        config.relay = Some(name.clone());
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = load_config(&cli)?;
    let result = run(&config, cli.command).await;
    if let Err(e) = &result {
        if Error::is_network(e) {
            tracing::error!("Remote unreachable: {:#}", e);
        }
    }
    result
}

fn open(config: &MirrorConfig, url: &str, progress: Arc<dyn ProgressSink>) -> Result<Mirror> {
    Mirror::open(config, url, progress, Arc::new(Silent))
        .with_context(|| format!("Failed to open mirror of {}", url))
}

async fn run(config: &MirrorConfig, command: Command) -> Result<()> {
    match command {
        Command::Update { url, dest } => {
            let bar = Arc::new(BarProgress::new()?);
            let mirror = open(config, &url, bar.clone())?;
            let outcome = mirror.update(&dest).await?;
            bar.finish(format!(
                "{} {}: {}/{} file(s) written",
                outcome.mode,
                if outcome.incremental { "incremental" } else { "full" },
                outcome.report.written,
                outcome.report.total
            ));
            if let Some(checkpoint) = outcome.checkpoint {
                println!("{}", checkpoint);
            }
        }
        Command::Sync { url } => {
            let bar = Arc::new(BarProgress::new()?);
            let mirror = open(config, &url, bar.clone())?;
            let mode = mirror.synchronize().await?;
            bar.finish("done");
            println!("{}", mode);
        }
        Command::Copy { url, dest, since } => {
            let bar = Arc::new(BarProgress::new()?);
            let mirror = open(config, &url, bar.clone())?;
            let destination = FsDestination::create(&dest)?;
            let report = match since {
                Some(since) => {
                    let since = ContentId::parse(&since)?;
                    mirror.copy_incremental(destination, since).await?
                }
                None => mirror.copy_full(destination).await?,
            };
            bar.finish(format!("{}/{} file(s) written", report.written, report.total));
        }
        Command::History { url, json } => {
            let mirror = open(config, &url, Arc::new(Silent))?;
            let history = mirror.history();
            if json {
                println!("{}", serde_json::to_string_pretty(&history)?);
            } else {
                for commit in &history {
                    let summary = commit.message.lines().next().unwrap_or_default();
                    println!(
                        "{} {} {} {}",
                        commit.commit_id,
                        commit.tree_id,
                        commit.time.to_rfc3339(),
                        summary
                    );
                }
            }
        }
        Command::Head { url } => {
            let mirror = open(config, &url, Arc::new(Silent))?;
            if let Some(checkpoint) = mirror.head_checkpoint() {
                println!("{}", checkpoint);
            }
        }
        Command::Clear { url } => {
            let mirror = open(config, &url, Arc::new(Silent))?;
            if !mirror.clear().await {
                anyhow::bail!("Failed to clear the local store of {}", url);
            }
        }
    }
    Ok(())
}
