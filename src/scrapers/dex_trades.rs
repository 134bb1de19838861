//! Bitquery Solana DEXTrades payloads
//!
//! Shared by the subscription and the batch query: both return
//! `{ Solana { DEXTrades [...] } }`, optionally wrapped in `data` / `payload`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AuditError;
use crate::models::{parse_block_time, RecordSource, TradeRecord};

pub const DEX_TRADES_SUBSCRIPTION: &str = r#"
subscription {
  Solana {
    DEXTrades {
      Block { Time Slot }
      Transaction { Signature Index Result { Success } }
      Trade { Index }
    }
  }
}
"#;

pub const DEX_TRADES_RANGE_QUERY: &str = r#"
query DexTradesInWindow($since: DateTime!, $till: DateTime!, $limit: Int!, $offset: Int) {
  Solana {
    DEXTrades(
      limit: { count: $limit, offset: $offset }
      orderBy: { ascending: Block_Time }
      where: { Block: { Time: { since: $since, till: $till } } }
    ) {
      Block { Time Slot }
      Transaction { Signature Index Result { Success } }
      Trade { Index }
    }
  }
}
"#;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DexTradeRow {
    #[serde(rename = "Block", default)]
    pub block: Option<DexBlock>,
    #[serde(rename = "Transaction", default)]
    pub transaction: Option<DexTransaction>,
    #[serde(rename = "Trade", default)]
    pub trade: Option<DexTrade>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DexBlock {
    #[serde(rename = "Time", default)]
    pub time: Option<String>,
    #[serde(rename = "Slot", default)]
    pub slot: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DexTransaction {
    #[serde(rename = "Signature", default)]
    pub signature: Option<String>,
    #[serde(rename = "Index", default)]
    pub index: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DexTrade {
    #[serde(rename = "Index", default)]
    pub index: Option<u64>,
}

impl DexTradeRow {
    pub fn into_record(self, origin: RecordSource) -> Result<TradeRecord, AuditError> {
        let block = self.block.unwrap_or_default();
        let tx = self.transaction.unwrap_or_default();
        let trade = self.trade.unwrap_or_default();

        let time = block
            .time
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| AuditError::malformed(origin, "missing Block.Time"))?;
        let block_time = parse_block_time(&time).ok_or_else(|| {
            AuditError::malformed(origin, format!("unparsable Block.Time {:?}", time))
        })?;
        let signature = tx
            .signature
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AuditError::malformed(origin, "missing Transaction.Signature"))?;
        let txn_index = tx
            .index
            .ok_or_else(|| AuditError::malformed(origin, format!("missing Transaction.Index for {}", signature)))?;
        let trade_index = trade
            .index
            .ok_or_else(|| AuditError::malformed(origin, format!("missing Trade.Index for {}", signature)))?;

        Ok(TradeRecord {
            block_time,
            signature,
            txn_index,
            trade_index,
        })
    }
}

/// Locate the `DEXTrades` rows inside a GraphQL result.
///
/// Accepts a full response (`{"data": ...}`), a graphql-ws frame payload
/// (`{"payload": {"data": ...}}`) or the bare data object. A single object in
/// place of a list is treated as one row.
pub fn extract_rows(result: &Value) -> Vec<Value> {
    let mut data = result;
    if let Some(payload) = data.get("payload") {
        data = payload;
    }
    if let Some(inner) = data.get("data").filter(|d| !d.is_null()) {
        data = inner;
    }

    match data.get("Solana").and_then(|s| s.get("DEXTrades")) {
        Some(Value::Array(rows)) => rows.clone(),
        Some(Value::Null) | None => Vec::new(),
        Some(row) => vec![row.clone()],
    }
}

/// Parse every row of a result, keeping per-row failures so callers can
/// skip and count them.
pub fn parse_trades(result: &Value, origin: RecordSource) -> Vec<Result<TradeRecord, AuditError>> {
    extract_rows(result)
        .into_iter()
        .map(|row| {
            serde_json::from_value::<DexTradeRow>(row)
                .map_err(|e| AuditError::malformed(origin, format!("bad row shape: {}", e)))
                .and_then(|r| r.into_record(origin))
        })
        .collect()
}
