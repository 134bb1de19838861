//! Integration tests for the stream audit pipeline
//!
//! Drive `run_audit` end to end with an in-memory subscription and query
//! source, then check the three CSV outputs and the summary.

use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use stream_audit::audit::collector::{StreamBatch, TradeSubscription};
use stream_audit::audit::fetcher::{QueryPage, QueryPageSource};
use stream_audit::audit::summary::AuditPaths;
use stream_audit::models::{parse_block_time, RecordSource};
use stream_audit::scrapers::dex_trades::parse_trades;
use stream_audit::{reconcile_logs, run_audit, AuditError, AuditOptions, StopSignal, TradeRecord, Window};

fn trade(time: &str, sig: &str, txn: u64, idx: u64) -> TradeRecord {
    TradeRecord::new(parse_block_time(time).unwrap(), sig, txn, idx)
}

fn dex_row(time: &str, sig: &str, txn: u64, idx: u64) -> serde_json::Value {
    json!({
        "Block": { "Time": time, "Slot": 1 },
        "Transaction": { "Signature": sig, "Index": txn, "Result": { "Success": true } },
        "Trade": { "Index": idx }
    })
}

/// Subscription that replays graphql-ws data frames and then ends.
struct ReplayFeed {
    frames: VecDeque<serde_json::Value>,
}

#[async_trait]
impl TradeSubscription for ReplayFeed {
    async fn next_batch(&mut self) -> Result<Option<StreamBatch>> {
        Ok(self
            .frames
            .pop_front()
            .map(|frame| parse_trades(&frame, RecordSource::Stream)))
    }

    async fn unsubscribe(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Batch source returning every trade inside the requested window.
struct MemoryQuery {
    trades: Vec<TradeRecord>,
}

#[async_trait]
impl QueryPageSource for MemoryQuery {
    async fn fetch_page(&self, window: &Window, limit: usize, offset: u64) -> Result<QueryPage> {
        Ok(self
            .trades
            .iter()
            .filter(|t| window.contains(t.block_time))
            .skip(offset as usize)
            .take(limit)
            .cloned()
            .map(Ok)
            .collect())
    }
}

fn options(dir: &Path) -> AuditOptions {
    AuditOptions {
        paths: AuditPaths {
            stream_csv: dir.join("stream_trades.csv"),
            query_csv: dir.join("query_trades.csv"),
            mismatch_csv: dir.join("mismatches.csv"),
        },
        page_size: 2,
        page_pause: Duration::ZERO,
        progress_every: Duration::from_secs(60),
    }
}

fn data_frame(rows: Vec<serde_json::Value>) -> serde_json::Value {
    json!({ "type": "data", "id": "1", "payload": { "data": { "Solana": { "DEXTrades": rows } } } })
}

#[tokio::test]
async fn test_full_audit_reports_gap() {
    let dir = tempfile::tempdir().unwrap();
    let opts = options(dir.path());

    // Blocks arrive out of order; one row is malformed, one is a duplicate
    let mut feed = ReplayFeed {
        frames: VecDeque::from(vec![
            data_frame(vec![dex_row("2025-03-01T12:00:05Z", "B", 2, 0)]),
            data_frame(vec![
                dex_row("2025-03-01T12:00:00Z", "A", 1, 0),
                json!({ "Block": { "Time": "2025-03-01T12:00:01Z" } }),
            ]),
            data_frame(vec![
                dex_row("2025-03-01T12:00:03Z", "D", 4, 1),
                dex_row("2025-03-01T12:00:05Z", "B", 2, 0),
            ]),
        ]),
    };

    let query = MemoryQuery {
        trades: vec![
            trade("2025-03-01T11:59:59Z", "before", 0, 0),
            trade("2025-03-01T12:00:00Z", "A", 1, 0),
            trade("2025-03-01T12:00:00Z", "edge", 9, 0),
            trade("2025-03-01T12:00:02Z", "C", 3, 0),
            trade("2025-03-01T12:00:03Z", "D", 4, 1),
            trade("2025-03-01T12:00:05Z", "B", 2, 0),
        ],
    };

    let (_signal, listener) = StopSignal::new();
    let summary = run_audit(&opts, &mut feed, &query, listener).await.unwrap();

    let r = &summary.reconcile;
    assert_eq!(r.stream_count, 3);
    assert_eq!(r.query_count, 5);
    assert_eq!(r.boundary_count, 3);
    assert_eq!(r.matched_count, 1);
    assert_eq!(r.mismatch_count, 1);
    assert!((r.missing_share - 20.0).abs() < 1e-9);
    assert_eq!(summary.malformed_stream, 1);
    assert_eq!(summary.stream.as_ref().unwrap().duplicates, 1);
    assert_eq!(summary.window_start, "2025-03-01T12:00:00Z");
    assert_eq!(summary.window_end, "2025-03-01T12:00:05Z");

    let mismatches = std::fs::read_to_string(&opts.paths.mismatch_csv).unwrap();
    assert_eq!(
        mismatches,
        "blocktime,signature,txn_index,trade_index\n2025-03-01T12:00:02Z,C,3,0\n"
    );

    let stream_log = std::fs::read_to_string(&opts.paths.stream_csv).unwrap();
    assert_eq!(stream_log.lines().count(), 4);
    assert!(stream_log.lines().nth(1).unwrap().contains(",B,"));

    let query_log = std::fs::read_to_string(&opts.paths.query_csv).unwrap();
    assert_eq!(query_log.lines().count(), 6);
}

#[tokio::test]
async fn test_empty_stream_skips_query() {
    struct NeverCalled;

    #[async_trait]
    impl QueryPageSource for NeverCalled {
        async fn fetch_page(&self, _window: &Window, _limit: usize, _offset: u64) -> Result<QueryPage> {
            panic!("query must not run without a window");
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let opts = options(dir.path());
    let mut feed = ReplayFeed { frames: VecDeque::new() };
    let (_signal, listener) = StopSignal::new();

    let err = run_audit(&opts, &mut feed, &NeverCalled, listener).await.unwrap_err();
    assert!(matches!(err.downcast_ref::<AuditError>(), Some(AuditError::EmptyStream)));
    assert!(!opts.paths.mismatch_csv.exists());
}

#[tokio::test]
async fn test_query_failure_produces_no_report() {
    struct Down;

    #[async_trait]
    impl QueryPageSource for Down {
        async fn fetch_page(&self, _window: &Window, _limit: usize, _offset: u64) -> Result<QueryPage> {
            Err(anyhow::anyhow!("connection refused"))
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let opts = options(dir.path());
    let mut feed = ReplayFeed {
        frames: VecDeque::from(vec![data_frame(vec![dex_row("2025-03-01T12:00:00Z", "A", 1, 0)])]),
    };
    let (_signal, listener) = StopSignal::new();

    let err = run_audit(&opts, &mut feed, &Down, listener).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<AuditError>(),
        Some(AuditError::QueryTransport { offset: 0, .. })
    ));
    assert!(!opts.paths.mismatch_csv.exists());
    assert!(opts.paths.stream_csv.exists());
}

#[tokio::test]
async fn test_offline_reconcile_matches_live_run() {
    let dir = tempfile::tempdir().unwrap();
    let opts = options(dir.path());

    let mut feed = ReplayFeed {
        frames: VecDeque::from(vec![data_frame(vec![
            dex_row("2025-03-01T12:00:10Z", "Z", 1, 0),
            dex_row("2025-03-01T12:00:00Z", "A", 1, 0),
            dex_row("2025-03-01T12:00:04Z", "M", 1, 0),
        ])]),
    };
    let query = MemoryQuery {
        trades: vec![
            trade("2025-03-01T12:00:00Z", "A", 1, 0),
            trade("2025-03-01T12:00:02Z", "gap1", 1, 0),
            trade("2025-03-01T12:00:04Z", "M", 1, 0),
            trade("2025-03-01T12:00:07Z", "gap2", 1, 3),
            trade("2025-03-01T12:00:10Z", "Z", 1, 0),
        ],
    };

    let (_signal, listener) = StopSignal::new();
    let live = run_audit(&opts, &mut feed, &query, listener).await.unwrap();
    let live_report = std::fs::read_to_string(&opts.paths.mismatch_csv).unwrap();

    let offline = reconcile_logs(&opts.paths).unwrap();
    let offline_report = std::fs::read_to_string(&opts.paths.mismatch_csv).unwrap();

    assert_eq!(live.reconcile, offline.reconcile);
    assert_eq!(live_report, offline_report);
    assert_eq!(offline.reconcile.mismatch_count, 2);
    assert!(offline.stream_wall_clock_secs.is_none());
}
