//! act-ripper command-line entry point.

use std::path::PathBuf;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use act_ripper::status::{self, StatusKind, StatusReceiver};
use act_ripper::{RipError, Ripper, RipperConfig};
use act_ripper_cli::{doctor, ChromiumHost, HttpFetcher};

#[derive(Parser)]
#[command(
    name = "act-ripper",
    about = "Extract spine animations and assets from bundled event pages into a zip",
    version
)]
struct Cli {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract every resource of an event page into {eventId}.zip.
    Rip {
        /// Event page URL.
        url: String,

        /// Directory the archive is written to.
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Maximum number of concurrent fetches.
        #[arg(long)]
        concurrency: Option<usize>,

        /// Show the browser window; on an early failure it stays open until Ctrl-C.
        #[arg(long)]
        headful: bool,
    },

    /// Load the page and print the mined manifests as JSON without fetching.
    Inspect {
        /// Event page URL.
        url: String,

        /// Show the browser window.
        #[arg(long)]
        headful: bool,
    },

    /// Check that Chromium and the network are usable.
    Doctor,

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   act-ripper completions bash > ~/.local/share/bash-completion/completions/act-ripper
    ///   act-ripper completions zsh > ~/.zfunc/_act-ripper
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = RipperConfig::from_env();

    match cli.command {
        Commands::Rip {
            url,
            out,
            concurrency,
            headful,
        } => {
            if let Some(out) = out {
                config.output_dir = out;
            }
            if let Some(n) = concurrency {
                config.fetch_concurrency = n.max(1);
            }
            config.headful = headful;
            rip(&url, config).await
        }
        Commands::Inspect { url, headful } => {
            config.headful = headful;
            inspect(&url, config).await
        }
        Commands::Doctor => doctor::run(&config).await,
        Commands::Completions { shell } => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "act-ripper",
                &mut std::io::stdout(),
            );
            Ok(())
        }
    }
}

async fn rip(url: &str, config: RipperConfig) -> anyhow::Result<()> {
    let (ripper, printer) = build(config).await?;

    let result = ripper.rip(url).await;
    let outcome = match result {
        Ok(archive) => {
            let path = ripper.config().archive_path(&archive.file_name);
            tokio::fs::create_dir_all(&ripper.config().output_dir)
                .await
                .with_context(|| format!("creating {}", ripper.config().output_dir.display()))?;
            tokio::fs::write(&path, &archive.bytes)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            println!(
                "{} ({} entries, {} bytes)",
                path.display(),
                archive.entries.len(),
                archive.bytes.len()
            );
            Ok(())
        }
        Err(e) => {
            if e.is_early() && ripper.config().headful && !matches!(e, RipError::InvalidUrl(_)) {
                eprintln!("page left open for inspection; press Ctrl-C to close");
                let _ = tokio::signal::ctrl_c().await;
            }
            Err(anyhow::Error::new(e))
        }
    };

    ripper.clear().await?;
    drop(ripper);
    let _ = printer.await;
    outcome
}

async fn inspect(url: &str, config: RipperConfig) -> anyhow::Result<()> {
    let (ripper, printer) = build(config).await?;

    let result = ripper.inspect(url).await;
    ripper.clear().await?;
    drop(ripper);
    let _ = printer.await;

    let extraction = result?;
    println!("{}", serde_json::to_string_pretty(&extraction)?);
    Ok(())
}

async fn build(
    config: RipperConfig,
) -> anyhow::Result<(Ripper<ChromiumHost, HttpFetcher>, tokio::task::JoinHandle<()>)> {
    let host = ChromiumHost::launch(&config)
        .await
        .context("starting Chromium (try `act-ripper doctor`)")?;
    let fetcher = HttpFetcher::new(config.fetch_timeout_ms);
    let (tx, rx) = status::channel();
    let printer = tokio::spawn(print_status(rx));
    Ok((Ripper::new(host, fetcher, config).with_status(tx), printer))
}

/// One line per status event on stderr; alerts stand out.
async fn print_status(mut rx: StatusReceiver) {
    use tokio::sync::broadcast::error::RecvError;
    loop {
        match rx.recv().await {
            Ok(event) => match &event.kind {
                StatusKind::Alert { .. } => eprintln!("!! [{}] {}", event.event_id, event.kind),
                StatusKind::Warning { .. } => eprintln!(" ! [{}] {}", event.event_id, event.kind),
                _ => eprintln!("   [{}] {}", event.event_id, event.kind),
            },
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        }
    }
}
