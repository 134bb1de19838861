//! Stream Collector
//!
//! Records every trade the subscription delivers into the stream TradeSet and
//! appends first-seen trades to the stream log. Arrival order carries no
//! meaning: the feed delivers blocks out of block-time order.
//!
//! The Ctrl+C handler only owns a [`StopSignal`]; it flips the phase to
//! `Stopped` and the collector notices between events, so the log is never
//! touched from two places.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::audit::trade_log::TradeLogWriter;
use crate::error::AuditError;
use crate::models::{TradeRecord, TradeSet};

/// One delivery from the subscription; malformed rows stay in place so the
/// collector can count them.
pub type StreamBatch = Vec<Result<TradeRecord, AuditError>>;

/// Push-based trade feed
#[async_trait]
pub trait TradeSubscription: Send {
    /// Wait for the next delivery. `None` once the feed has ended.
    async fn next_batch(&mut self) -> Result<Option<StreamBatch>>;

    /// Cancel the subscription and close the connection.
    async fn unsubscribe(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectorPhase {
    Collecting,
    Stopped,
}

/// Sender half of the stop signal. Cheap to clone into signal handlers.
#[derive(Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<CollectorPhase>>,
}

/// Receiver half, owned by the collector
pub struct StopListener {
    rx: watch::Receiver<CollectorPhase>,
}

impl StopSignal {
    pub fn new() -> (Self, StopListener) {
        let (tx, rx) = watch::channel(CollectorPhase::Collecting);
        (Self { tx: Arc::new(tx) }, StopListener { rx })
    }

    pub fn stop(&self) {
        self.tx.send_replace(CollectorPhase::Stopped);
    }

    pub fn phase(&self) -> CollectorPhase {
        *self.tx.borrow()
    }

    /// Stop automatically once `after` has elapsed.
    pub fn stop_after(&self, after: Duration) -> tokio::task::JoinHandle<()> {
        let signal = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if signal.phase() == CollectorPhase::Collecting {
                info!("Max stream duration ({:?}) reached", after);
                signal.stop();
            }
        })
    }
}

impl StopListener {
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow() == CollectorPhase::Stopped
    }

    /// Resolves once the phase is `Stopped`. Never resolves if every sender
    /// is dropped without stopping.
    pub async fn stopped(&mut self) {
        loop {
            if self.is_stopped() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorStats {
    /// Well-formed trades delivered, duplicates included
    pub received: u64,
    /// First-seen trades kept in the set and the log
    pub recorded: u64,
    pub duplicates: u64,
    pub malformed: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Signal,
    FeedEnded,
    FeedError(String),
}

#[derive(Debug)]
pub struct StreamOutcome {
    pub trades: TradeSet,
    pub stats: CollectorStats,
    pub wall_clock: Duration,
    pub stop_reason: StopReason,
}

pub struct StreamCollector<W: Write> {
    trades: TradeSet,
    log: TradeLogWriter<W>,
    stats: CollectorStats,
    progress_every: Duration,
}

impl<W: Write> StreamCollector<W> {
    pub fn new(log: TradeLogWriter<W>) -> Self {
        Self {
            trades: TradeSet::new(),
            log,
            stats: CollectorStats::default(),
            progress_every: Duration::from_secs(10),
        }
    }

    /// Progress log period, at least one millisecond.
    pub fn with_progress_every(mut self, every: Duration) -> Self {
        self.progress_every = every.max(Duration::from_millis(1));
        self
    }

    pub fn stats(&self) -> &CollectorStats {
        &self.stats
    }

    /// Handle one arrival. Only log write failures are returned as errors.
    pub fn record(&mut self, item: Result<TradeRecord, AuditError>) -> Result<()> {
        let trade = match item {
            Ok(trade) => trade,
            Err(e) => {
                warn!("Skipping stream record: {}", e);
                self.stats.malformed += 1;
                return Ok(());
            }
        };

        self.stats.received += 1;
        if self.trades.contains(&trade.key()) {
            debug!("Duplicate stream trade {}", trade.key());
            self.stats.duplicates += 1;
            return Ok(());
        }

        // Log first so the set never holds a trade the log is missing
        self.log.append(&trade)?;
        self.trades.insert_first_seen(trade);
        self.stats.recorded += 1;
        Ok(())
    }

    /// Collect until the stop signal fires or the feed ends, then unsubscribe.
    pub async fn run<S>(mut self, source: &mut S, mut stop: StopListener) -> Result<StreamOutcome>
    where
        S: TradeSubscription + ?Sized,
    {
        let started = Instant::now();
        let mut progress = tokio::time::interval(self.progress_every);
        progress.tick().await;

        info!("Collecting stream trades until stopped");

        let reason: Result<StopReason> = loop {
            tokio::select! {
                biased;
                _ = stop.stopped() => break Ok(StopReason::Signal),
                batch = source.next_batch() => match batch {
                    Ok(Some(items)) => {
                        if let Err(e) = items.into_iter().try_for_each(|item| self.record(item)) {
                            break Err(e);
                        }
                    }
                    Ok(None) => break Ok(StopReason::FeedEnded),
                    Err(e) => {
                        error!("Stream error: {:#}", e);
                        break Ok(StopReason::FeedError(format!("{:#}", e)));
                    }
                },
                _ = progress.tick() => {
                    info!(
                        "📈 Stream progress: {} trades ({} duplicates, {} malformed)",
                        self.stats.recorded, self.stats.duplicates, self.stats.malformed
                    );
                }
            }
        };

        if let Err(e) = source.unsubscribe().await {
            warn!("Unsubscribe failed: {:#}", e);
        }

        let stop_reason = reason?;
        self.log.finish()?;
        let wall_clock = started.elapsed();

        info!(
            "Stream stopped ({:?}) after {:.1}s with {} trades",
            stop_reason,
            wall_clock.as_secs_f64(),
            self.stats.recorded
        );

        Ok(StreamOutcome {
            trades: self.trades,
            stats: self.stats,
            wall_clock,
            stop_reason,
        })
    }
}
