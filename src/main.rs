use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use gh_ccimg::claude::ClaudeCli;
use gh_ccimg::cli::Cli;
use gh_ccimg::error::AppError;
use gh_ccimg::fetch::Fetcher;
use gh_ccimg::github::GhClient;
use gh_ccimg::pipeline::{Pipeline, StorageMode};
use gh_ccimg::progress::{ConsoleReporter, NoopReporter, ProgressReporter};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_filter().into()),
        )
        .init();

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, cancelling");
                cancel.cancel();
            }
        });
    }

    match run(&cli, &cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e.report());
            ExitCode::from(e.exit_code().clamp(1, 255) as u8)
        }
    }
}

async fn run(cli: &Cli, cancel: &CancellationToken) -> Result<(), AppError> {
    let reporter: Arc<dyn ProgressReporter> = if cli.quiet {
        Arc::new(NoopReporter)
    } else {
        Arc::new(ConsoleReporter::new(std::io::stderr(), cli.detailed_progress()))
    };

    let fetcher = Fetcher::with_config(cli.fetch_config())
        .map_err(|e| {
            AppError::validation(
                format!("Failed to initialize downloader: {e}"),
                "Check the --max-size, --timeout and --concurrency values",
            )
        })?
        .with_reporter(reporter);

    let pipeline = Pipeline::new(
        GhClient::new(Duration::from_secs(cli.timeout)),
        ClaudeCli::new(),
        fetcher,
        cli.pipeline_options(),
    );

    let report = pipeline.run(&cli.target, cancel).await?;

    if report.mode == StorageMode::Memory {
        for (i, encoded) in report.stored.iter().enumerate() {
            println!("Image {} (base64): {}", i + 1, encoded);
        }
    }
    tracing::info!(
        found = report.found,
        downloaded = report.downloaded,
        failed = report.failures.len(),
        "operation completed successfully"
    );
    Ok(())
}
