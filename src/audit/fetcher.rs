//! Range Query Fetcher
//!
//! Pages through the authoritative batch query for `[start, end]` until a
//! short or empty page. Never retries on its own; a page error is fatal.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::audit::trade_log::write_trades;
use crate::error::AuditError;
use crate::models::{TradeRecord, TradeSet, Window};

pub const DEFAULT_PAGE_SIZE: usize = 25_000;

/// One page of rows; malformed rows keep their slot so the page length
/// still reflects what the source returned.
pub type QueryPage = Vec<Result<TradeRecord, AuditError>>;

/// Paginated read of trades with `start <= block_time <= end`
#[async_trait]
pub trait QueryPageSource: Send + Sync {
    async fn fetch_page(&self, window: &Window, limit: usize, offset: u64) -> Result<QueryPage>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchStats {
    pub pages: u64,
    pub rows: u64,
    pub malformed: u64,
    /// Keys seen on more than one page
    pub overlapping: u64,
}

#[derive(Debug)]
pub struct FetchOutcome {
    pub trades: TradeSet,
    pub stats: FetchStats,
}

impl FetchOutcome {
    /// Write the full query result, ordered by block time then key.
    pub fn persist(&self, path: impl AsRef<Path>) -> Result<u64> {
        write_trades(path, self.trades.sorted())
    }
}

pub struct RangeQueryFetcher<'a, S: QueryPageSource + ?Sized> {
    source: &'a S,
    page_size: usize,
    page_pause: Duration,
}

impl<'a, S: QueryPageSource + ?Sized> RangeQueryFetcher<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self {
            source,
            page_size: DEFAULT_PAGE_SIZE,
            page_pause: Duration::ZERO,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Pause between pages; the upstream API tends to drop connections on
    /// back-to-back large pages.
    pub fn with_page_pause(mut self, pause: Duration) -> Self {
        self.page_pause = pause;
        self
    }

    pub async fn fetch(&self, window: &Window) -> Result<FetchOutcome, AuditError> {
        let mut trades = TradeSet::new();
        let mut stats = FetchStats::default();
        let mut offset: u64 = 0;

        info!("Query time range: {} (page size {})", window, self.page_size);

        loop {
            let page = self
                .source
                .fetch_page(window, self.page_size, offset)
                .await
                .map_err(|source| AuditError::QueryTransport { offset, source })?;

            let page_len = page.len();
            if page_len == 0 {
                break;
            }
            stats.pages += 1;
            stats.rows += page_len as u64;

            for row in page {
                match row {
                    Ok(trade) => {
                        if !trades.merge(trade) {
                            stats.overlapping += 1;
                        }
                    }
                    Err(e) => {
                        warn!("Skipping query record: {}", e);
                        stats.malformed += 1;
                    }
                }
            }

            info!(
                "  Query offset {}: got {} trades (total so far: {})",
                offset,
                page_len,
                trades.len()
            );

            if page_len < self.page_size {
                break;
            }
            offset += self.page_size as u64;

            if !self.page_pause.is_zero() {
                tokio::time::sleep(self.page_pause).await;
            }
        }

        Ok(FetchOutcome { trades, stats })
    }
}
