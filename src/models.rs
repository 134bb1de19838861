use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::{self, Entry};
use std::collections::HashMap;
use std::fmt;

/// Identity of a trade: transaction signature plus in-transaction indices.
///
/// Block time is deliberately not part of the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TradeKey {
    pub signature: String,
    pub txn_index: u64,
    pub trade_index: u64,
}

impl fmt::Display for TradeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}/{}", self.signature, self.txn_index, self.trade_index)
    }
}

/// One observed (stream) or queried (batch) DEX trade
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub block_time: DateTime<Utc>,
    pub signature: String,
    pub txn_index: u64,
    pub trade_index: u64,
}

impl TradeRecord {
    pub fn new(
        block_time: DateTime<Utc>,
        signature: impl Into<String>,
        txn_index: u64,
        trade_index: u64,
    ) -> Self {
        Self {
            block_time,
            signature: signature.into(),
            txn_index,
            trade_index,
        }
    }

    pub fn key(&self) -> TradeKey {
        TradeKey {
            signature: self.signature.clone(),
            txn_index: self.txn_index,
            trade_index: self.trade_index,
        }
    }

    /// Block time as RFC 3339 with a `Z` suffix, the format used in every log
    pub fn block_time_str(&self) -> String {
        format_block_time(&self.block_time)
    }
}

pub fn format_block_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Parse a Bitquery `Block.Time` value ("2025-01-01T00:00:01Z").
pub fn parse_block_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Unordered keyed collection of trades from a single source.
#[derive(Debug, Clone, Default)]
pub struct TradeSet {
    trades: HashMap<TradeKey, TradeRecord>,
}

impl TradeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unless the key is already present. Returns `false` for a
    /// duplicate, in which case the first record is kept untouched.
    pub fn insert_first_seen(&mut self, record: TradeRecord) -> bool {
        match self.trades.entry(record.key()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(record);
                true
            }
        }
    }

    /// Idempotent merge. Returns `true` if the key was new.
    pub fn merge(&mut self, record: TradeRecord) -> bool {
        self.trades.insert(record.key(), record).is_none()
    }

    pub fn len(&self) -> usize {
        self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }

    pub fn contains(&self, key: &TradeKey) -> bool {
        self.trades.contains_key(key)
    }

    pub fn get(&self, key: &TradeKey) -> Option<&TradeRecord> {
        self.trades.get(key)
    }

    pub fn iter(&self) -> hash_map::Values<'_, TradeKey, TradeRecord> {
        self.trades.values()
    }

    /// Min and max block time, `None` when empty
    pub fn block_time_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        self.trades.values().fold(None, |acc, t| match acc {
            None => Some((t.block_time, t.block_time)),
            Some((lo, hi)) => Some((lo.min(t.block_time), hi.max(t.block_time))),
        })
    }

    /// Records ordered by block time, then by identity key.
    pub fn sorted(&self) -> Vec<&TradeRecord> {
        let mut out: Vec<&TradeRecord> = self.trades.values().collect();
        out.sort_by(|a, b| chronological(a, b));
        out
    }
}

impl FromIterator<TradeRecord> for TradeSet {
    fn from_iter<I: IntoIterator<Item = TradeRecord>>(iter: I) -> Self {
        let mut set = TradeSet::new();
        for record in iter {
            set.insert_first_seen(record);
        }
        set
    }
}

/// Total order used by every sorted output: block time, then key.
pub fn chronological(a: &TradeRecord, b: &TradeRecord) -> std::cmp::Ordering {
    a.block_time
        .cmp(&b.block_time)
        .then_with(|| a.signature.cmp(&b.signature))
        .then_with(|| a.txn_index.cmp(&b.txn_index))
        .then_with(|| a.trade_index.cmp(&b.trade_index))
}

/// Inclusive time window observed by the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl Window {
    /// Returns `None` if `start > end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t <= self.end
    }

    /// Trades at the opening or closing timestamp are never mismatches.
    pub fn is_boundary(&self, t: DateTime<Utc>) -> bool {
        t == self.start || t == self.end
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}]",
            format_block_time(&self.start),
            format_block_time(&self.end)
        )
    }
}

/// How the reconciler classified one query record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Boundary,
    Mismatch,
    Matched,
}

impl Classification {
    pub fn as_str(&self) -> &str {
        match self {
            Classification::Boundary => "boundary",
            Classification::Mismatch => "mismatch",
            Classification::Matched => "matched",
        }
    }
}

/// Which side of the audit produced a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordSource {
    Stream,
    Query,
}

impl RecordSource {
    pub fn as_str(&self) -> &str {
        match self {
            RecordSource::Stream => "stream",
            RecordSource::Query => "query",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_first_seen_wins() {
        let mut set = TradeSet::new();
        assert!(set.insert_first_seen(TradeRecord::new(ts(100), "A", 1, 0)));
        assert!(!set.insert_first_seen(TradeRecord::new(ts(200), "A", 1, 0)));

        assert_eq!(set.len(), 1);
        let key = TradeRecord::new(ts(0), "A", 1, 0).key();
        assert_eq!(set.get(&key).unwrap().block_time, ts(100));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut set = TradeSet::new();
        assert!(set.merge(TradeRecord::new(ts(100), "A", 1, 0)));
        assert!(!set.merge(TradeRecord::new(ts(100), "A", 1, 0)));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_key_ignores_block_time() {
        let a = TradeRecord::new(ts(1), "sig", 3, 4);
        let b = TradeRecord::new(ts(2), "sig", 3, 4);
        assert_eq!(a.key(), b.key());
        assert_ne!(a.key(), TradeRecord::new(ts(1), "sig", 3, 5).key());
    }

    #[test]
    fn test_block_time_range() {
        let set: TradeSet = vec![
            TradeRecord::new(ts(105), "B", 0, 0),
            TradeRecord::new(ts(100), "A", 0, 0),
            TradeRecord::new(ts(103), "C", 0, 0),
        ]
        .into_iter()
        .collect();

        assert_eq!(set.block_time_range(), Some((ts(100), ts(105))));
        assert_eq!(TradeSet::new().block_time_range(), None);
    }

    #[test]
    fn test_sorted_breaks_ties_by_key() {
        let set: TradeSet = vec![
            TradeRecord::new(ts(100), "B", 0, 0),
            TradeRecord::new(ts(100), "A", 2, 0),
            TradeRecord::new(ts(100), "A", 1, 1),
            TradeRecord::new(ts(99), "Z", 0, 0),
        ]
        .into_iter()
        .collect();

        let order: Vec<String> = set.sorted().iter().map(|t| t.key().to_string()).collect();
        assert_eq!(order, vec!["Z#0/0", "A#1/1", "A#2/0", "B#0/0"]);
    }

    #[test]
    fn test_window_boundary() {
        let w = Window::new(ts(100), ts(105)).unwrap();
        assert!(w.is_boundary(ts(100)));
        assert!(w.is_boundary(ts(105)));
        assert!(!w.is_boundary(ts(102)));
        assert!(w.contains(ts(102)));
        assert!(!w.contains(ts(106)));
        assert!(Window::new(ts(2), ts(1)).is_none());
    }

    #[test]
    fn test_block_time_parse_and_format() {
        let t = parse_block_time("2025-03-01T12:00:01Z").unwrap();
        assert_eq!(format_block_time(&t), "2025-03-01T12:00:01Z");

        let frac = parse_block_time("2025-03-01T12:00:01.250Z").unwrap();
        assert_eq!(format_block_time(&frac), "2025-03-01T12:00:01.250Z");

        assert!(parse_block_time("not a time").is_none());
    }
}
