//! Delimited trade logs (stream log, query log, mismatch report)
//!
//! Every file has the header `blocktime,signature,txn_index,trade_index`.
//! Rows are flushed one at a time so an interrupted run never leaves a
//! half-written record behind.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tracing::warn;

use crate::error::AuditError;
use crate::models::{parse_block_time, RecordSource, TradeRecord};

pub const CSV_COLUMNS: [&str; 4] = ["blocktime", "signature", "txn_index", "trade_index"];

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TradeRow {
    blocktime: String,
    signature: String,
    txn_index: u64,
    trade_index: u64,
}

impl From<&TradeRecord> for TradeRow {
    fn from(t: &TradeRecord) -> Self {
        Self {
            blocktime: t.block_time_str(),
            signature: t.signature.clone(),
            txn_index: t.txn_index,
            trade_index: t.trade_index,
        }
    }
}

pub struct TradeLogWriter<W: Write> {
    writer: csv::Writer<W>,
    rows: u64,
}

impl TradeLogWriter<File> {
    /// Create (truncate) a log file and write the header.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("Failed to create trade log: {}", path.display()))?;
        Self::from_writer(file)
    }
}

impl<W: Write> TradeLogWriter<W> {
    pub fn from_writer(inner: W) -> Result<Self> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(inner);
        writer
            .write_record(CSV_COLUMNS)
            .context("Failed to write trade log header")?;
        writer.flush().context("Failed to flush trade log header")?;
        Ok(Self { writer, rows: 0 })
    }

    /// Append one record and flush it.
    pub fn append(&mut self, trade: &TradeRecord) -> Result<()> {
        self.writer
            .serialize(TradeRow::from(trade))
            .context("Failed to write trade row")?;
        self.writer.flush().context("Failed to flush trade row")?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn finish(mut self) -> Result<W> {
        self.writer.flush().context("Failed to flush trade log")?;
        self.writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("Failed to finalize trade log: {}", e.error()))
    }
}

/// Write a whole collection in the given order.
pub fn write_trades<'a>(
    path: impl AsRef<Path>,
    trades: impl IntoIterator<Item = &'a TradeRecord>,
) -> Result<u64> {
    let mut log = TradeLogWriter::create(path)?;
    for trade in trades {
        log.append(trade)?;
    }
    let rows = log.rows();
    log.finish()?;
    Ok(rows)
}

/// Trades read back from a log, with the rows that could not be parsed
#[derive(Debug, Default)]
pub struct LoadedTrades {
    pub trades: Vec<TradeRecord>,
    pub malformed: u64,
}

pub fn read_trades(path: impl AsRef<Path>, origin: RecordSource) -> Result<LoadedTrades> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("Failed to open trade log: {}", path.display()))?;
    read_trades_from(file, origin)
}

pub fn read_trades_from<R: std::io::Read>(inner: R, origin: RecordSource) -> Result<LoadedTrades> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(inner);
    let mut loaded = LoadedTrades::default();

    for (line, row) in reader.deserialize::<TradeRow>().enumerate() {
        let parsed = row
            .map_err(|e| AuditError::malformed(origin, e.to_string()))
            .and_then(|row| {
                let block_time = parse_block_time(&row.blocktime).ok_or_else(|| {
                    AuditError::malformed(origin, format!("unparsable blocktime {:?}", row.blocktime))
                })?;
                Ok(TradeRecord::new(block_time, row.signature, row.txn_index, row.trade_index))
            });

        match parsed {
            Ok(trade) => loaded.trades.push(trade),
            Err(e) => {
                warn!("Skipping log row {}: {}", line + 2, e);
                loaded.malformed += 1;
            }
        }
    }

    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::parse_block_time;
    use tempfile::tempdir;

    fn trade(time: &str, sig: &str, txn: u64, idx: u64) -> TradeRecord {
        TradeRecord::new(parse_block_time(time).unwrap(), sig, txn, idx)
    }

    #[test]
    fn test_header_written_for_empty_log() {
        let log = TradeLogWriter::from_writer(Vec::new()).unwrap();
        let bytes = log.finish().unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), "blocktime,signature,txn_index,trade_index\n");
    }

    #[test]
    fn test_rows_are_visible_after_each_append() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stream_trades.csv");

        let mut log = TradeLogWriter::create(&path).unwrap();
        log.append(&trade("2025-03-01T12:00:01Z", "sigA", 3, 0)).unwrap();

        // Not finished yet: the row must already be on disk
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents,
            "blocktime,signature,txn_index,trade_index\n2025-03-01T12:00:01Z,sigA,3,0\n"
        );
        assert_eq!(log.rows(), 1);
    }

    #[test]
    fn test_read_skips_bad_rows() {
        let raw = "blocktime,signature,txn_index,trade_index\n\
                   2025-03-01T12:00:01Z,sigA,3,0\n\
                   garbage,sigB,1,1\n\
                   2025-03-01T12:00:02Z,sigC,,1\n\
                   2025-03-01T12:00:03Z,sigD,9,2\n";

        let loaded = read_trades_from(raw.as_bytes(), RecordSource::Stream).unwrap();
        assert_eq!(loaded.trades.len(), 2);
        assert_eq!(loaded.malformed, 2);
        assert_eq!(loaded.trades[1].signature, "sigD");
    }

    #[test]
    fn test_write_then_read_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("query_trades.csv");
        let trades = vec![
            trade("2025-03-01T12:00:01Z", "sigA", 3, 0),
            trade("2025-03-01T12:00:01.500Z", "sigB", 4, 1),
        ];

        assert_eq!(write_trades(&path, &trades).unwrap(), 2);
        let loaded = read_trades(&path, RecordSource::Query).unwrap();
        assert_eq!(loaded.trades, trades);
        assert_eq!(loaded.malformed, 0);
    }
}
