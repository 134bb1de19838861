//! Human-readable and JSON run summary

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::audit::collector::{CollectorStats, StopReason};
use crate::audit::fetcher::FetchStats;
use crate::audit::reconciler::ReconcileStats;
use crate::models::{format_block_time, Window};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditPaths {
    pub stream_csv: PathBuf,
    pub query_csv: PathBuf,
    pub mismatch_csv: PathBuf,
}

impl Default for AuditPaths {
    fn default() -> Self {
        Self {
            stream_csv: PathBuf::from("stream_trades.csv"),
            query_csv: PathBuf::from("query_trades.csv"),
            mismatch_csv: PathBuf::from("mismatches.csv"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSummary {
    /// `None` when reconciling existing logs offline
    pub stream_wall_clock_secs: Option<f64>,
    pub stop_reason: Option<StopReason>,
    pub window_start: String,
    pub window_end: String,
    pub stream: Option<CollectorStats>,
    pub fetch: Option<FetchStats>,
    pub reconcile: ReconcileStats,
    pub malformed_stream: u64,
    pub malformed_query: u64,
    pub outputs: AuditPaths,
}

impl AuditSummary {
    pub fn new(window: &Window, reconcile: ReconcileStats, outputs: AuditPaths) -> Self {
        Self {
            stream_wall_clock_secs: None,
            stop_reason: None,
            window_start: format_block_time(&window.start()),
            window_end: format_block_time(&window.end()),
            stream: None,
            fetch: None,
            reconcile,
            malformed_stream: 0,
            malformed_query: 0,
            outputs,
        }
    }

    pub fn render(&self) -> String {
        let r = &self.reconcile;
        let rule = "=".repeat(60);
        let mut lines = vec![String::new(), rule.clone(), "FINAL STATS".to_string(), rule.clone()];

        if let Some(secs) = self.stream_wall_clock_secs {
            lines.push(format!("Stream wall-clock duration: {:.1} seconds", secs));
        }
        if let Some(reason) = &self.stop_reason {
            lines.push(format!("Stream stopped by: {}", describe_stop(reason)));
        }
        lines.push(format!(
            "Stream time range (UTC): since = {}, till = {}",
            self.window_start, self.window_end
        ));
        lines.push(format!("Count of trades received in stream: {}", r.stream_count));
        if let Some(stream) = &self.stream {
            if stream.duplicates > 0 {
                lines.push(format!("Duplicate stream deliveries ignored: {}", stream.duplicates));
            }
        }
        lines.push(format!("Count of trades from query in same time range: {}", r.query_count));
        lines.push(format!(
            "Excluded as boundary (opening/closing timestamp): {}",
            r.boundary_count
        ));
        lines.push(format!("Matched: {}", r.matched_count));
        lines.push(format!(
            "Mismatches (in query but NOT in subscription): {}",
            r.mismatch_count
        ));
        lines.push(format!(
            "Missing share: {:.2}% of query trades were not in stream",
            r.missing_share
        ));
        if self.malformed_stream > 0 || self.malformed_query > 0 {
            lines.push(format!(
                "Malformed records skipped: {} stream, {} query",
                self.malformed_stream, self.malformed_query
            ));
        }
        if r.block_time_conflicts > 0 {
            lines.push(format!(
                "Block time conflicts (query time used): {}",
                r.block_time_conflicts
            ));
        }
        lines.push(format!("Stream trades written to: {}", self.outputs.stream_csv.display()));
        lines.push(format!("Query trades written to: {}", self.outputs.query_csv.display()));
        lines.push(format!("Mismatch rows written to: {}", self.outputs.mismatch_csv.display()));
        lines.push(rule);

        lines.join("\n")
    }
}

fn describe_stop(reason: &StopReason) -> String {
    match reason {
        StopReason::Signal => "stop signal".to_string(),
        StopReason::FeedEnded => "feed ended".to_string(),
        StopReason::FeedError(e) => format!("feed error ({})", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::parse_block_time;

    #[test]
    fn test_render_includes_core_counts() {
        let window = Window::new(
            parse_block_time("2025-03-01T12:00:00Z").unwrap(),
            parse_block_time("2025-03-01T12:05:00Z").unwrap(),
        )
        .unwrap();
        let stats = ReconcileStats {
            stream_count: 2,
            query_count: 3,
            boundary_count: 2,
            matched_count: 0,
            mismatch_count: 1,
            block_time_conflicts: 0,
            missing_share: 100.0 / 3.0,
        };

        let mut summary = AuditSummary::new(&window, stats, AuditPaths::default());
        summary.stream_wall_clock_secs = Some(12.34);
        summary.malformed_query = 4;

        let text = summary.render();
        assert!(text.contains("Stream wall-clock duration: 12.3 seconds"));
        assert!(text.contains("since = 2025-03-01T12:00:00Z, till = 2025-03-01T12:05:00Z"));
        assert!(text.contains("Mismatches (in query but NOT in subscription): 1"));
        assert!(text.contains("Missing share: 33.33%"));
        assert!(text.contains("Malformed records skipped: 0 stream, 4 query"));
        assert!(!text.contains("Block time conflicts"));
    }

    #[test]
    fn test_summary_serializes() {
        let window = Window::new(
            parse_block_time("2025-03-01T12:00:00Z").unwrap(),
            parse_block_time("2025-03-01T12:00:00Z").unwrap(),
        )
        .unwrap();
        let summary = AuditSummary::new(&window, ReconcileStats::default(), AuditPaths::default());
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["reconcile"]["missing_share"], 0.0);
        assert_eq!(json["outputs"]["mismatch_csv"], "mismatches.csv");
    }
}
