//! Reconciler
//!
//! Diffs the authoritative query set against the stream set. A query trade
//! at the opening or closing timestamp of the window is a boundary trade and
//! never a mismatch: the stream starts and stops mid-second, and blocks arrive
//! out of order, so those seconds are only partially observed.
//!
//! When both sides carry a key with different block times, the query's block
//! time is used for classification and the conflict is counted.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::{chronological, Classification, TradeRecord, TradeSet, Window};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconcileStats {
    pub stream_count: u64,
    pub query_count: u64,
    pub boundary_count: u64,
    pub matched_count: u64,
    pub mismatch_count: u64,
    /// Keys present on both sides with different block times
    pub block_time_conflicts: u64,
    /// `mismatch_count / query_count * 100`, 0 for an empty query set
    pub missing_share: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub window: Window,
    /// Sorted by block time, then identity key
    pub mismatches: Vec<TradeRecord>,
    pub stats: ReconcileStats,
}

pub fn classify(query_trade: &TradeRecord, stream: &TradeSet, window: &Window) -> Classification {
    if window.is_boundary(query_trade.block_time) {
        Classification::Boundary
    } else if !stream.contains(&query_trade.key()) {
        Classification::Mismatch
    } else {
        Classification::Matched
    }
}

pub fn reconcile(stream: &TradeSet, query: &TradeSet, window: &Window) -> Reconciliation {
    let mut stats = ReconcileStats {
        stream_count: stream.len() as u64,
        query_count: query.len() as u64,
        ..Default::default()
    };
    let mut mismatches = Vec::new();

    for q in query.iter() {
        if let Some(seen) = stream.get(&q.key()) {
            if seen.block_time != q.block_time {
                warn!(
                    "Block time conflict for {}: stream {} vs query {}",
                    q.key(),
                    seen.block_time_str(),
                    q.block_time_str()
                );
                stats.block_time_conflicts += 1;
            }
        }

        match classify(q, stream, window) {
            Classification::Boundary => stats.boundary_count += 1,
            Classification::Matched => stats.matched_count += 1,
            Classification::Mismatch => {
                stats.mismatch_count += 1;
                mismatches.push(q.clone());
            }
        }
    }

    mismatches.sort_by(chronological);
    stats.missing_share = missing_share(stats.mismatch_count, stats.query_count);

    Reconciliation {
        window: *window,
        mismatches,
        stats,
    }
}

pub fn missing_share(mismatch_count: u64, query_count: u64) -> f64 {
    if query_count == 0 {
        0.0
    } else {
        100.0 * mismatch_count as f64 / query_count as f64
    }
}
