//! Stream completeness audit
//!
//! Pipeline: collect stream -> derive window -> fetch query range ->
//! reconcile -> write mismatch report. The phases run strictly one after the
//! other; each TradeSet is owned by its phase until handed to the reconciler.

pub mod collector;
pub mod fetcher;
pub mod reconciler;
pub mod summary;
pub mod trade_log;
pub mod window;

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::info;

use crate::models::{RecordSource, TradeSet};
use collector::{StopListener, StreamCollector, TradeSubscription};
use fetcher::{QueryPageSource, RangeQueryFetcher, DEFAULT_PAGE_SIZE};
use reconciler::reconcile;
use summary::{AuditPaths, AuditSummary};
use trade_log::{read_trades, write_trades, TradeLogWriter};
use window::extract_window;

pub use collector::{StopSignal, StreamOutcome};
pub use reconciler::{ReconcileStats, Reconciliation};

#[derive(Debug, Clone)]
pub struct AuditOptions {
    pub paths: AuditPaths,
    pub page_size: usize,
    pub page_pause: Duration,
    pub progress_every: Duration,
}

impl Default for AuditOptions {
    fn default() -> Self {
        Self {
            paths: AuditPaths::default(),
            page_size: DEFAULT_PAGE_SIZE,
            page_pause: Duration::from_secs(2),
            progress_every: Duration::from_secs(10),
        }
    }
}

/// Full live audit. Errors are `AuditError` (wrapped in anyhow) for the
/// empty-stream and transport cases.
pub async fn run_audit<S, Q>(
    options: &AuditOptions,
    subscription: &mut S,
    query_source: &Q,
    stop: StopListener,
) -> Result<AuditSummary>
where
    S: TradeSubscription + ?Sized,
    Q: QueryPageSource + ?Sized,
{
    let paths = &options.paths;

    let log = TradeLogWriter::create(&paths.stream_csv)?;
    let stream = StreamCollector::new(log)
        .with_progress_every(options.progress_every)
        .run(subscription, stop)
        .await?;

    let window = extract_window(&stream.trades)?;
    info!("Stream window (UTC): {}", window);

    let fetched = RangeQueryFetcher::new(query_source)
        .with_page_size(options.page_size)
        .with_page_pause(options.page_pause)
        .fetch(&window)
        .await?;
    fetched
        .persist(&paths.query_csv)
        .context("Failed to write query log")?;

    let result = reconcile(&stream.trades, &fetched.trades, &window);
    write_trades(&paths.mismatch_csv, &result.mismatches)
        .context("Failed to write mismatch report")?;

    let mut summary = AuditSummary::new(&result.window, result.stats, paths.clone());
    summary.stream_wall_clock_secs = Some(stream.wall_clock.as_secs_f64());
    summary.stop_reason = Some(stream.stop_reason);
    summary.malformed_stream = stream.stats.malformed;
    summary.malformed_query = fetched.stats.malformed;
    summary.stream = Some(stream.stats);
    summary.fetch = Some(fetched.stats);
    Ok(summary)
}

/// Re-run reconciliation from existing stream and query logs, without any
/// network access. Query rows outside the stream window are ignored.
pub fn reconcile_logs(paths: &AuditPaths) -> Result<AuditSummary> {
    let stream_rows = read_trades(&paths.stream_csv, RecordSource::Stream)?;
    let stream: TradeSet = stream_rows.trades.into_iter().collect();
    let window = extract_window(&stream)?;

    let query_rows = read_trades(&paths.query_csv, RecordSource::Query)?;
    let total_query_rows = query_rows.trades.len();
    let mut query = TradeSet::new();
    for trade in query_rows.trades.into_iter().filter(|t| window.contains(t.block_time)) {
        query.merge(trade);
    }
    if query.len() < total_query_rows {
        info!(
            "Ignored {} query log rows outside window or duplicated",
            total_query_rows - query.len()
        );
    }

    let result = reconcile(&stream, &query, &window);
    write_trades(&paths.mismatch_csv, &result.mismatches)
        .context("Failed to write mismatch report")?;

    let mut summary = AuditSummary::new(&result.window, result.stats, paths.clone());
    summary.malformed_stream = stream_rows.malformed;
    summary.malformed_query = query_rows.malformed;
    Ok(summary)
}
