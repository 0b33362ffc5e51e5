use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use request_recorder::{
    capture::CapturedRequest,
    config::{Config, DatabaseConfig},
    host::{Addon, Harness, HarnessError},
    logging,
    postgres::PgStore,
    recorder::{RecorderError, RequestRecorder},
    run::RUN_OPTION_HINT,
    sqlite::{SqliteConfig, SqliteStore},
};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

#[derive(Debug, Parser)]
#[command(name = "request-recorder")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Record captured requests, one JSON document per line, for a run.
    Ingest {
        /// Optional path to config TOML.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Read captured requests from this file instead of stdin.
        #[arg(long)]
        input: Option<PathBuf>,
        /// Set a host option (`name=value`), e.g. `--set run=42`.
        #[arg(long = "set", value_name = "NAME=VALUE")]
        set: Vec<String>,
        /// Override log level (trace, debug, info, warn, error, off).
        #[arg(long)]
        log_level: Option<String>,
    },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct IngestSummary {
    recorded: usize,
    failed: usize,
    skipped: usize,
}

async fn open_input(input: Option<&Path>) -> anyhow::Result<Box<dyn AsyncBufRead + Unpin + Send>> {
    Ok(match input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("open input {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    })
}

/// Feeds every line to the harness until the input ends or `stop` resolves.
/// `stop` is polled for the whole ingest, so a stop requested while a request
/// is being recorded takes effect before the next line is read.
async fn pump<A, F>(
    harness: &mut Harness<A>,
    reader: Box<dyn AsyncBufRead + Unpin + Send>,
    stop: F,
    summary: &mut IngestSummary,
) -> anyhow::Result<()>
where
    A: Addon,
    F: Future<Output = ()>,
{
    let mut lines = reader.lines();
    let mut line_number = 0_usize;
    tokio::pin!(stop);

    loop {
        let line = tokio::select! {
            biased;
            _ = &mut stop => {
                tracing::info!(lines = line_number, "interrupted; shutting down");
                return Ok(());
            }
            line = lines.next_line() => line.context("read captured requests")?,
        };
        let Some(line) = line else {
            return Ok(());
        };
        line_number += 1;
        if line.trim().is_empty() {
            continue;
        }

        let request = match CapturedRequest::from_json(&line) {
            Ok(request) => request,
            Err(err) => {
                tracing::error!(line = line_number, error = %err, "skipping malformed captured request");
                summary.skipped += 1;
                continue;
            }
        };

        match harness.dispatch(&request).await {
            Ok(()) => summary.recorded += 1,
            Err(err) => {
                tracing::error!(
                    line = line_number,
                    method = %request.method,
                    host = %request.host,
                    path = %request.path,
                    error = %err,
                    "failed to record request"
                );
                summary.failed += 1;
            }
        }
    }
}

async fn interrupted() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "cannot listen for Ctrl-C; reading until end of input");
        std::future::pending::<()>().await;
    }
}

async fn ingest<A>(
    addon: A,
    input: Option<&Path>,
    assignments: &[String],
) -> anyhow::Result<IngestSummary>
where
    A: Addon<Error = RecorderError>,
{
    let mut harness = match Harness::start(addon, assignments).await {
        Ok(harness) => harness,
        Err(HarnessError::Addon(RecorderError::RunId(err))) => {
            eprintln!("ID of the current run not specified, shutting down.. ({RUN_OPTION_HINT})");
            eprintln!("{err}");
            std::process::exit(1);
        }
        Err(err) => return Err(anyhow::Error::new(err).context("start recorder")),
    };

    let mut summary = IngestSummary::default();
    let pumped = match open_input(input).await {
        Ok(reader) => pump(&mut harness, reader, interrupted(), &mut summary).await,
        Err(err) => Err(err),
    };

    harness.shutdown().await.context("shut down recorder")?;
    pumped?;
    Ok(summary)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Ingest {
            config,
            input,
            set,
            log_level,
        } => {
            // A missing .env file is fine; the variables may come from the environment.
            let _ = dotenvy::dotenv();
            let config = Config::load(config.as_deref())?;
            logging::init(config.logging.as_ref(), log_level.as_deref())?;

            let summary = match config.sqlite_path() {
                Some(path) => {
                    let recorder = RequestRecorder::<SqliteStore>::new(SqliteConfig {
                        path: path.to_owned(),
                    });
                    ingest(recorder, input.as_deref(), &set).await?
                }
                None => {
                    let database = DatabaseConfig::from_env()?;
                    let recorder = RequestRecorder::<PgStore>::new(database);
                    ingest(recorder, input.as_deref(), &set).await?
                }
            };
            eprintln!("{}", summary_line(&summary));
        }
    }

    Ok(())
}

fn summary_line(summary: &IngestSummary) -> String {
    format!(
        "recorded {} request(s); {} failed, {} malformed line(s) skipped",
        summary.recorded, summary.failed, summary.skipped
    )
}
