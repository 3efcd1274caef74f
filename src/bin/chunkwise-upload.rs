//! Upload a file to a Chunkwise server.
//!
//! Hashes the file, resumes whatever the server already has and sends the
//! rest in parallel chunks. Ctrl+C aborts cleanly; running the same command
//! again resumes from the chunks the server acknowledged.
//!
//! ```bash
//! chunkwise-upload --server http://localhost:3000 --user alice ./video.mp4
//! chunkwise-upload --status
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chunkwise::config::Config;
use chunkwise::upload::{
    ByteSource, ChunkUploader, FileSource, HttpTransport, InitOutcome, RateLimitedEvent, UploadObserver,
    UploadProgress,
};

/// Resumable chunked upload client
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// File to upload
    #[arg(required_unless_present = "status")]
    path: Option<PathBuf>,

    /// Server base URL (defaults to UPLOAD_SERVER_URL)
    #[arg(long)]
    server: Option<String>,

    /// Identity sent as X-User-Id
    #[arg(long, env = "UPLOAD_USER_ID")]
    user: Option<String>,

    /// Chunk size in bytes
    #[arg(long)]
    chunk_size: Option<u64>,

    /// Chunk requests in flight
    #[arg(long)]
    concurrency: Option<usize>,

    /// Retry budget per chunk
    #[arg(long)]
    max_retries: Option<u32>,

    /// Print the server's rate limit status for this client and exit
    #[arg(long)]
    status: bool,
}

/// Logs upload events at info level
struct LogObserver;

impl UploadObserver for LogObserver {
    fn on_hash_progress(&self, percent: u8) {
        if percent % 10 == 0 {
            info!(percent = percent, "Hashing");
        }
    }

    fn on_progress(&self, progress: UploadProgress) {
        info!(
            percent = progress.percent,
            uploaded = progress.uploaded,
            total = progress.total,
            "Uploading"
        );
    }

    fn on_rate_limited(&self, event: &RateLimitedEvent) {
        warn!(
            chunk_index = event.chunk_index,
            retry_after_ms = event.retry_after_ms,
            retry_count = event.retry_count,
            blocked_by = %event.blocked_by,
            "Rate limited, waiting"
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "chunkwise=info,chunkwise_upload=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut client = Config::from_env().context("invalid configuration")?.client;
    if let Some(server) = args.server {
        client.server_url = server;
    }
    if let Some(chunk_size) = args.chunk_size {
        client.chunk_size = chunk_size;
    }
    if let Some(concurrency) = args.concurrency {
        client.concurrency = concurrency;
    }
    if let Some(max_retries) = args.max_retries {
        client.max_retries = max_retries;
    }
    if client.chunk_size == 0 || client.concurrency == 0 {
        bail!("chunk size and concurrency must be greater than zero");
    }

    let mut transport = HttpTransport::new(&client.server_url);
    if let Some(user) = args.user {
        transport = transport.with_identity(user);
    }

    if args.status {
        let status = transport.rate_limit_status().await?;
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let Some(path) = args.path else {
        bail!("no file given");
    };
    let source = FileSource::open(&path)
        .await
        .with_context(|| format!("cannot open {}", path.display()))?;
    let file_name = source.file_name();

    info!(
        file = %path.display(),
        size = source.len(),
        server = %client.server_url,
        "Starting upload"
    );

    let uploader = Arc::new(
        ChunkUploader::new(
            Arc::new(source),
            file_name,
            Arc::new(transport),
            client.upload_options(),
        )
        .with_observer(Arc::new(LogObserver)),
    );

    let canceller = uploader.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl+C received, aborting upload");
            canceller.abort();
        }
    });

    match uploader.init().await? {
        InitOutcome::Exists { url } => {
            info!(url = %url, "Server already has this file");
            println!("{}", url);
            return Ok(());
        }
        InitOutcome::Ready {
            total_chunks,
            uploaded_chunks,
        } => {
            info!(
                total_chunks = total_chunks,
                resumed = uploaded_chunks,
                "Server state checked"
            );
        }
    }

    let url = uploader.upload().await?;
    info!(url = %url, "Upload complete");
    println!("{}", url);
    Ok(())
}
