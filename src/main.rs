//! Stream Audit CLI
//!
//! Run the Solana DEXTrades stream; press Ctrl+C to stop. The same time range
//! is then fetched via the batch query and every trade the query returned but
//! the stream never delivered is written to the mismatch report.
//!
//! Usage:
//!   stream_audit                       # live audit (needs BITQUERY_TOKEN)
//!   stream_audit --max-duration-secs 300
//!   stream_audit reconcile             # re-diff existing CSV logs offline
//!
//! Environment:
//!   BITQUERY_TOKEN      - Access token (also read from .env)
//!   BITQUERY_WS_URL     - Subscription endpoint override
//!   BITQUERY_HTTP_URL   - Query endpoint override
//!   STREAM_AUDIT_CONFIG - Optional TOML config (default: stream_audit.toml)

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::{Args as ClapArgs, Parser, Subcommand};
use dotenv::dotenv;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stream_audit::audit::summary::AuditSummary;
use stream_audit::config::AuditConfig;
use stream_audit::scrapers::{BitqueryQueryClient, BitqueryStream};
use stream_audit::{reconcile_logs, run_audit, AuditError, StopSignal};

#[derive(Parser, Debug)]
#[command(name = "stream_audit")]
#[command(about = "Check a Bitquery DEXTrades stream for missed trades against the batch query")]
struct Args {
    /// Optional TOML config file
    #[arg(long, env = "STREAM_AUDIT_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Print the final summary as JSON instead of the text report
    #[arg(long, global = true)]
    json: bool,

    #[command(flatten)]
    outputs: OutputArgs,

    #[command(flatten)]
    live: LiveArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(ClapArgs, Debug)]
struct OutputArgs {
    /// Stream log (append order = arrival order)
    #[arg(long, env = "STREAM_AUDIT_STREAM_CSV", global = true)]
    stream_csv: Option<PathBuf>,

    /// Query log
    #[arg(long, env = "STREAM_AUDIT_QUERY_CSV", global = true)]
    query_csv: Option<PathBuf>,

    /// Mismatch report
    #[arg(long, env = "STREAM_AUDIT_MISMATCH_CSV", global = true)]
    mismatch_csv: Option<PathBuf>,
}

#[derive(ClapArgs, Debug)]
struct LiveArgs {
    /// Bitquery access token
    #[arg(long, env = "BITQUERY_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    #[arg(long, env = "BITQUERY_WS_URL", global = true)]
    ws_url: Option<String>,

    #[arg(long, env = "BITQUERY_HTTP_URL", global = true)]
    http_url: Option<String>,

    /// Records per query page
    #[arg(long, env = "STREAM_AUDIT_PAGE_SIZE", global = true)]
    page_size: Option<usize>,

    /// Stop the stream automatically after this many seconds
    #[arg(long, env = "STREAM_AUDIT_MAX_DURATION_SECS", global = true)]
    max_duration_secs: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Stream until Ctrl+C, then query and reconcile (default)
    Run,

    /// Reconcile existing stream and query logs without network access
    Reconcile,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    init_tracing();

    let args = Args::parse();

    match execute(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(audit_err) = e.downcast_ref::<AuditError>() {
                error!("Audit aborted: {}", audit_err);
            } else {
                error!("Audit failed: {:#}", e);
            }
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stream_audit=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn execute(args: Args) -> Result<()> {
    let mut config = AuditConfig::resolve(args.config.as_deref())?;
    apply_overrides(&mut config, &args);

    let summary = match args.command.unwrap_or(Commands::Run) {
        Commands::Run => run_live(&config, args.live.token.as_deref()).await?,
        Commands::Reconcile => {
            info!("Reconciling existing logs");
            reconcile_logs(&config.paths())?
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{}", summary.render());
    }
    Ok(())
}

fn apply_overrides(config: &mut AuditConfig, args: &Args) {
    if let Some(p) = &args.outputs.stream_csv {
        config.outputs.stream_csv = p.clone();
    }
    if let Some(p) = &args.outputs.query_csv {
        config.outputs.query_csv = p.clone();
    }
    if let Some(p) = &args.outputs.mismatch_csv {
        config.outputs.mismatch_csv = p.clone();
    }
    if let Some(url) = &args.live.ws_url {
        config.ws_url = url.clone();
    }
    if let Some(url) = &args.live.http_url {
        config.http_url = url.clone();
    }
    if let Some(size) = args.live.page_size {
        config.query.page_size = size;
    }
    if let Some(secs) = args.live.max_duration_secs {
        config.stream.max_duration_secs = Some(secs);
    }
}

async fn run_live(config: &AuditConfig, token: Option<&str>) -> Result<AuditSummary> {
    let token = token
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuditError::MissingToken)?;

    let (signal, listener) = StopSignal::new();

    // First Ctrl+C ends the stream phase; a second one aborts the run
    let ctrl_c_signal = signal.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            warn!("Could not install Ctrl+C handler");
            return;
        }
        info!("Stopping stream (Ctrl+C)...");
        ctrl_c_signal.stop();

        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Second Ctrl+C, aborting");
            std::process::exit(130);
        }
    });

    if let Some(secs) = config.stream.max_duration_secs {
        signal.stop_after(Duration::from_secs(secs));
    }

    let query = BitqueryQueryClient::new(
        &config.http_url,
        token,
        config.request_timeout(),
        config.retry_policy(),
    )?;
    let mut stream = BitqueryStream::connect(&config.ws_url, token).await?;
    println!("Stream connected. Collecting Solana DEXTrades. Press Ctrl+C to stop.\n");

    run_audit(&config.audit_options(), &mut stream, &query, listener).await
}
