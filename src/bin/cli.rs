use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use rs_fileshare::{
    ChunkStore, Config, Result, TrackerClient, download, run_tracker, serve_chunk_requests,
    share_file,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

/// Share files with other peers through a central tracker
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    timeouts: TimeoutArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the tracker until interrupted.
    Tracker {
        #[arg(short, long, default_value = "0.0.0.0:5000")]
        bind: String,
    },
    /// Serve the files of a directory to other peers.
    Serve {
        #[arg(short, long)]
        port: u16,
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,
    },
    /// Serve a directory and advertise one of its files to the tracker.
    Share {
        #[arg(short, long)]
        tracker: String,
        #[arg(short, long)]
        port: u16,
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,
        /// File to advertise; a random file of the directory when omitted.
        #[arg(short, long)]
        file: Option<String>,
    },
    /// Download a file from whichever peer the tracker names.
    Fetch {
        #[arg(short, long)]
        tracker: String,
        #[arg(short, long)]
        file: String,
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,
        /// Number of chunks to request; derived from the file size when omitted.
        #[arg(short, long)]
        chunks: Option<u64>,
    },
}

#[derive(Args, Debug)]
struct TimeoutArgs {
    /// Seconds to wait for a connection to be established.
    #[arg(long, env = "FILESHARE_CONNECT_TIMEOUT", default_value_t = 10, global = true)]
    connect_timeout: u64,
    /// Seconds to wait for any single read or write.
    #[arg(long, env = "FILESHARE_IO_TIMEOUT", default_value_t = 30, global = true)]
    io_timeout: u64,
    /// Seconds an idle peer session is kept open.
    #[arg(long, env = "FILESHARE_IDLE_TIMEOUT", default_value_t = 60, global = true)]
    idle_timeout: u64,
}

impl TimeoutArgs {
    fn config(&self) -> Config {
        Config::with_timeouts(
            Duration::from_secs(self.connect_timeout),
            Duration::from_secs(self.io_timeout),
            Duration::from_secs(self.idle_timeout),
        )
    }
}

/// Cancels the returned token on Ctrl-C.
fn shutdown_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutting down"),
            Err(e) => warn!("cannot listen for Ctrl-C: {e}"),
        }
        token.cancel();
    });
    cancel
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .try_init();

    let cli = Cli::parse();
    let config = cli.timeouts.config();

    match cli.command {
        Command::Tracker { bind } => run_tracker(bind, config, shutdown_on_ctrl_c()).await?,
        Command::Serve { port, dir } => {
            serve_chunk_requests(port, dir, config, shutdown_on_ctrl_c()).await?
        }
        Command::Share {
            tracker,
            port,
            dir,
            file,
        } => share(tracker, port, dir, file, config).await?,
        Command::Fetch {
            tracker,
            file,
            dir,
            chunks,
        } => fetch(tracker, file, dir, chunks, config).await?,
    }

    Ok(())
}

async fn share(
    tracker: String,
    port: u16,
    dir: PathBuf,
    file: Option<String>,
    config: Config,
) -> Result<()> {
    let store = ChunkStore::new(&dir);
    let file = match file {
        Some(file) => file,
        None => match store.pick_random_file().await? {
            Some(file) => file,
            None => {
                warn!(dir = %dir.display(), "no file to share");
                return Ok(());
            }
        },
    };

    let cancel = shutdown_on_ctrl_c();
    let client = TrackerClient::new(tracker, config.clone());
    let (port, server) = share_file(store, port, &file, &client, config, cancel.clone()).await?;
    println!("Sharing {file} on port {port}");

    cancel.cancelled().await;
    if let Err(e) = client.exit(port).await {
        warn!("cannot notify tracker: {e}");
    }
    match server.await {
        Ok(result) => result,
        Err(e) => {
            warn!("peer server task failed: {e}");
            Ok(())
        }
    }
}

async fn fetch(
    tracker: String,
    file: String,
    dir: PathBuf,
    chunks: Option<u64>,
    config: Config,
) -> Result<()> {
    let client = TrackerClient::new(tracker, config.clone());
    let Some(holder) = client.request_file(&file).await? else {
        println!("No peer has {file}");
        return Ok(());
    };

    tokio::fs::create_dir_all(&dir).await?;
    let store = ChunkStore::new(&dir);
    let report = download(holder, &file, chunks, &store, &config).await?;
    println!(
        "Downloaded {file} from {holder}: {} chunks, {} bytes ({} empty chunks skipped)",
        report.chunks_written, report.bytes_written, report.empty_chunks
    );
    Ok(())
}
