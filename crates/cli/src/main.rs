mod cli;
mod logging;

use std::future::Future;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use vetbot_core::Config;
use vetbot_notify::{DryRunSink, GithubIssueSink, IssueReporter, ReportSink};
use vetbot_ratelimit::{GithubTransport, RateLimitedClient};
use vetbot_sampler::RepositorySampler;
use vetbot_scan::{CommandAnalyzer, ScanLoop, StopReason};

use crate::cli::CliArgs;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    vetbot_core::config::load_dotenv();
    let args = CliArgs::parse();
    let config = args.config();

    // Held until main returns so buffered log lines reach the file.
    let _log_guard = logging::init(&config.storage.log_dir, args.stderr)?;

    info!(version = env!("CARGO_PKG_VERSION"), dry_run = args.dry_run, "vetbot starting");
    config.log_summary();

    match run(&config, args.dry_run).await {
        Ok(code) => Ok(code),
        Err(e) => {
            error!(error = %format!("{e:#}"), "vetbot failed to start");
            eprintln!("vetbot: {e:#}");
            Ok(ExitCode::from(2))
        }
    }
}

async fn run(config: &Config, dry_run: bool) -> Result<ExitCode> {
    let token = config.github.token().context("cannot start without credentials")?;
    let analyzer = config
        .scan
        .analyzer_cmd
        .as_deref()
        .and_then(CommandAnalyzer::from_command_line)
        .context("no analyzer configured (set ANALYZER_CMD or --analyzer-cmd)")?;

    let transport = GithubTransport::new(
        &config.github.api_url,
        token,
        Duration::from_secs(config.github.timeout_secs),
    )
    .context("failed to build GitHub client")?;
    let client = Arc::new(RateLimitedClient::new(
        Arc::new(transport),
        config.ratelimit.clone(),
    ));
    if let Err(e) = client.prime().await {
        if e.is_fatal() {
            return Err(e).context("GitHub rejected the configured token");
        }
        warn!(error = %e, "could not read rate budget, starting with defaults");
    }

    let mut sampler = RepositorySampler::open(&config.storage.backlog_path, &config.storage.visited_path)
        .context("failed to open backlog")?;
    if dry_run {
        sampler = sampler.without_recording();
    }

    let sink: Arc<dyn ReportSink> = if dry_run {
        Arc::new(DryRunSink)
    } else {
        Arc::new(GithubIssueSink::new(
            client.clone(),
            config.github.findings_owner.clone(),
            config.github.findings_repo.clone(),
            config.github.labels.clone(),
        ))
    };
    let reporter = IssueReporter::open(sink, &config.storage.reported_path)
        .context("failed to open reported set")?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_on_signals(os_signal, signal_token).await;
        std::process::exit(130);
    });

    let summary = ScanLoop::new(sampler, Arc::new(analyzer), client.clone(), reporter, shutdown)
        .with_policy(config.scan.stop_policy)
        .run()
        .await;

    info!(
        run_id = %summary.run_id,
        api_calls = client.calls_issued(),
        "vetbot exiting"
    );
    Ok(match summary.stop {
        StopReason::Exhausted | StopReason::Shutdown => ExitCode::SUCCESS,
        StopReason::ItemFailed { .. } => ExitCode::from(1),
        StopReason::Fatal(_) => ExitCode::from(2),
    })
}

/// Cancel `token` on the first signal so the loop drains. Returns on the
/// second, after which the caller exits without waiting.
async fn shutdown_on_signals<F, Fut>(mut next_signal: F, token: CancellationToken)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    next_signal().await;
    info!("shutdown signal received, finishing current repository");
    token.cancel();

    next_signal().await;
    warn!("second signal received, exiting without draining");
}

/// Wait for SIGINT or SIGTERM (Unix) or Ctrl+C elsewhere.
async fn os_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        ) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => {}
                    _ = sigterm.recv() => {}
                }
            }
            _ => {
                warn!("failed to register signal handlers, falling back to ctrl_c");
                if tokio::signal::ctrl_c().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_err() {
            warn!("failed to listen for ctrl_c");
            std::future::pending::<()>().await;
        }
    }
}
