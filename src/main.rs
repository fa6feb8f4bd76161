//! Verity Uploadr - verification upload client
//!
//! Uploads a local file to the configured bucket, reports progress on stderr,
//! and prints the public URL on stdout.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::info;
use verity_uploadr::config::Config;
use verity_uploadr::session::{ModelSession, Session, SessionController};
use verity_uploadr::store::http::{HttpObjectStore, HttpRecordStore};
use verity_uploadr::store::{ObjectStore, RecordRef};
use verity_uploadr::upload::{
    destination_path, IntakeError, ProgressEnd, ProgressEvent, ProgressSink, UploadControl,
    UploadPipeline, UploadRequest,
};
use verity_uploadr::{logging, metrics};

/// Verity Uploadr - resilient verification uploads
#[derive(Parser, Debug)]
#[command(name = "verity-uploadr")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log filter, overrides the configured level (RUST_LOG still wins)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a file and print its public URL
    Upload {
        /// File to upload
        file: PathBuf,

        /// Sign in as this model before uploading
        #[arg(long)]
        as_model: Option<String>,

        /// Skip writing the URL onto the model's record
        #[arg(long)]
        no_attach: bool,
    },
    /// Check that the bucket answers a list request
    Probe,
    /// Show the signed-in session
    Whoami,
    /// Forget the signed-in session
    Logout,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let runtime = tokio::runtime::Runtime::new().context("starting async runtime")?;
    let outcome = runtime.block_on(run(args));
    // an unanswered cancel prompt still holds a blocking stdin read
    runtime.shutdown_background();
    outcome
}

async fn run(args: Args) -> anyhow::Result<()> {

    let config = Config::load(&args.config)
        .with_context(|| format!("loading configuration from {:?}", args.config))?;

    logging::init_subscriber(&config.logging, args.log_level.as_deref())?;
    info!("Starting Verity Uploadr v{}", verity_uploadr::VERSION);

    let sessions = match &config.session {
        Some(session) => SessionController::persistent(&session.path)?,
        None => SessionController::new(),
    };

    let outcome = match args.command {
        Command::Upload {
            file,
            as_model,
            no_attach,
        } => upload(&config, &sessions, &file, as_model, no_attach).await,
        Command::Probe => probe(&config).await,
        Command::Whoami => whoami(&sessions),
        Command::Logout => sessions.sign_out().map_err(Into::into),
    };

    if config.metrics.enabled {
        eprint!("{}", metrics::render());
    }

    outcome
}

async fn upload(
    config: &Config,
    sessions: &SessionController,
    file: &Path,
    as_model: Option<String>,
    no_attach: bool,
) -> anyhow::Result<()> {
    if let Some(model_id) = as_model {
        sessions.sign_in(Session::Model(ModelSession {
            model_id,
            display_name: None,
        }))?;
    }
    let model = sessions.require_model()?;

    let file_name = file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload");
    let destination = destination_path(&model.model_id, file_name, chrono::Utc::now());
    let policy = config.upload_policy();
    let request = match UploadRequest::from_file(file, destination, &policy.constraints).await {
        Ok(request) => request,
        Err(IntakeError::Rejected(failure)) => {
            eprintln!("{}", failure.user_message());
            return Err(failure.into());
        }
        Err(e) => return Err(e.into()),
    };

    let store = HttpObjectStore::new(&config.store.endpoint, &config.store.api_key)?;
    let pipeline = UploadPipeline::new(Arc::new(store), &config.store.bucket, policy);

    let control = Arc::new(UploadControl::new());
    let (sink, mut events) = ProgressSink::channel();

    let renderer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ProgressEvent::Percent(percent) => eprint!("\rUploading... {:>3}%", percent),
                ProgressEvent::Finished(end) => {
                    let label = match end {
                        ProgressEnd::Succeeded => "done",
                        ProgressEnd::Failed(_) => "failed",
                        ProgressEnd::Cancelled => "cancelled",
                    };
                    eprintln!("\rUpload {}.         ", label);
                    break;
                }
            }
        }
    });

    let interrupt = {
        let control = Arc::clone(&control);
        tokio::spawn(async move {
            let mut input = BufReader::new(tokio::io::stdin());
            while tokio::signal::ctrl_c().await.is_ok() {
                let confirmed = !control.is_in_flight() || confirm_cancel(&mut input).await;
                if confirmed && control.request_cancel(|| true) {
                    break;
                }
            }
        })
    };

    let result = match (&config.records, no_attach) {
        (Some(records), false) => {
            let record_store = HttpRecordStore::new(&config.store.endpoint, &config.store.api_key)?;
            let target = RecordRef {
                table: records.table.clone(),
                key_column: records.key_column.clone(),
                key: model.model_id.clone(),
                column: records.reference_column.clone(),
            };
            pipeline
                .upload_and_attach(request, &record_store, &target, &sink, &control)
                .await
        }
        _ => pipeline.upload(request, &sink, &control).await,
    };

    interrupt.abort();
    drop(sink);
    let _ = renderer.await;

    match result {
        Ok(done) => {
            println!("{}", done.public_reference);
            Ok(())
        }
        Err(failure) => {
            eprintln!("{}", failure.user_message());
            Err(failure.into())
        }
    }
}

/// Ask whether to abandon an in-flight upload
async fn confirm_cancel<R>(input: &mut R) -> bool
where
    R: AsyncBufRead + Unpin,
{
    eprint!("\nAn upload is in progress. Cancel it? [y/N] ");
    let _ = std::io::stderr().flush();

    let mut answer = String::new();
    match input.read_line(&mut answer).await {
        Ok(0) | Err(_) => false,
        Ok(_) => matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
    }
}

async fn probe(config: &Config) -> anyhow::Result<()> {
    let store = HttpObjectStore::new(&config.store.endpoint, &config.store.api_key)?;
    let entries = store
        .list(&config.store.bucket, "", 1)
        .await
        .with_context(|| format!("bucket '{}' is not reachable", config.store.bucket))?;

    println!(
        "bucket '{}' reachable ({} object(s) sampled)",
        config.store.bucket,
        entries.len()
    );
    Ok(())
}

fn whoami(sessions: &SessionController) -> anyhow::Result<()> {
    match sessions.current() {
        Some(session) => println!("{}", serde_json::to_string_pretty(&session)?),
        None => println!("not signed in"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_confirm_cancel_answers() {
        assert!(confirm_cancel(&mut &b"y\n"[..]).await);
        assert!(confirm_cancel(&mut &b"YES\n"[..]).await);
        assert!(!confirm_cancel(&mut &b"n\n"[..]).await);
        assert!(!confirm_cancel(&mut &b"\n"[..]).await);
        assert!(!confirm_cancel(&mut &b""[..]).await);
    }

    #[tokio::test]
    async fn test_unanswered_prompt_can_be_aborted() {
        // writer stays open, so the read never completes on its own
        let (_writer, reader) = tokio::io::duplex(64);
        let prompt = tokio::spawn(async move { confirm_cancel(&mut BufReader::new(reader)).await });
        tokio::task::yield_now().await;

        prompt.abort();
        assert!(prompt.await.unwrap_err().is_cancelled());
    }

    #[test]
    fn test_shutdown_does_not_wait_for_blocked_reads() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let (tx, rx) = std::sync::mpsc::channel::<()>();
        runtime.spawn_blocking(move || {
            let _ = rx.recv();
        });

        let started = std::time::Instant::now();
        runtime.shutdown_background();
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
        drop(tx);
    }
}
