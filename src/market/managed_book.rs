//! Managed order book — the Binance depth-synchronization protocol FSM.
//!
//! The hardest piece in the core. Grounded in
//! `examples/original_source/libs/market/include/veloz/market/managed_order_book.h`'s
//! `SyncState`/`ManagedOrderBookStats`/`SnapshotFetcher`/`OrderBookUpdateCallback`
//! shape, ported from the kj-async original to tokio: the FSM transitions are pure
//! synchronous methods (directly testable, matching E1/E2 in spec.md §8), and
//! `run()` is a thin tokio-driven loop that calls them in response to a delta
//! channel and an injected snapshot fetcher, the same split
//! `binance_hardened_ingest.rs`'s `ingest_loop` uses between state transitions and
//! the I/O driving them.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

use crate::error::CoreError;

use super::book::{DeltaApplyResult, OrderBook};
use super::event::BookData;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Disconnected,
    Buffering,
    FetchingSnapshot,
    Synchronizing,
    Synchronized,
    Resynchronizing,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ManagedOrderBookStats {
    pub snapshot_count: i64,
    pub delta_count: i64,
    pub dropped_delta_count: i64,
    pub resync_count: i64,
    pub gap_count: i64,
    pub last_sync_time_ns: i64,
}

#[derive(Debug, Clone)]
pub struct ManagedOrderBookConfig {
    pub max_buffer_size: usize,
    pub max_depth_levels: usize,
    pub buffering_period: Duration,
    pub snapshot_timeout: Duration,
}

impl Default for ManagedOrderBookConfig {
    fn default() -> Self {
        Self {
            max_buffer_size: 10_000,
            max_depth_levels: 100,
            buffering_period: Duration::from_millis(100),
            snapshot_timeout: Duration::from_millis(5000),
        }
    }
}

pub struct ManagedOrderBook {
    symbol: String,
    state: SyncState,
    book: OrderBook,
    buffer: Vec<BookData>,
    config: ManagedOrderBookConfig,
    stats: ManagedOrderBookStats,
}

impl ManagedOrderBook {
    pub fn new(symbol: impl Into<String>, config: ManagedOrderBookConfig) -> Self {
        Self {
            symbol: symbol.into(),
            state: SyncState::Disconnected,
            book: OrderBook::new(),
            buffer: Vec::new(),
            config,
            stats: ManagedOrderBookStats::default(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn is_synchronized(&self) -> bool {
        self.state == SyncState::Synchronized
    }

    pub fn order_book(&self) -> &OrderBook {
        &self.book
    }

    pub fn stats(&self) -> ManagedOrderBookStats {
        self.stats
    }

    fn transition_to(&mut self, new_state: SyncState) {
        info!(symbol = %self.symbol, from = ?self.state, to = ?new_state, "managed book transition");
        self.state = new_state;
    }

    pub fn start(&mut self) {
        self.transition_to(SyncState::Buffering);
    }

    pub fn stop(&mut self) {
        self.transition_to(SyncState::Disconnected);
        self.buffer.clear();
    }

    /// Buffers a delta received while not yet synchronized. Overflow drops the
    /// oldest buffered delta and counts it.
    fn buffer_delta(&mut self, delta: BookData) {
        if self.buffer.len() >= self.config.max_buffer_size {
            self.buffer.remove(0);
            self.stats.dropped_delta_count += 1;
        }
        self.buffer.push(delta);
    }

    /// Feeds one incoming delta from the WebSocket stream. Buffered while not yet
    /// synchronized; applied directly (with continuity checking) once Synchronized.
    pub fn on_delta(&mut self, delta: BookData) {
        match self.state {
            SyncState::Disconnected | SyncState::Resynchronizing => {
                self.stats.dropped_delta_count += 1;
            }
            SyncState::Buffering | SyncState::FetchingSnapshot | SyncState::Synchronizing => {
                self.buffer_delta(delta);
            }
            SyncState::Synchronized => self.apply_live_delta(delta),
        }
    }

    fn apply_live_delta(&mut self, delta: BookData) {
        match self
            .book
            .apply_deltas(&delta.bids, &delta.asks, delta.first_update_id, delta.final_update_id)
        {
            DeltaApplyResult::Applied => self.stats.delta_count += 1,
            DeltaApplyResult::Stale => self.stats.dropped_delta_count += 1,
            DeltaApplyResult::Gap { expected, got } => {
                warn!(symbol = %self.symbol, expected, got, "sequence gap, resynchronizing");
                self.trigger_resync();
            }
        }
    }

    fn trigger_resync(&mut self) {
        self.stats.gap_count += 1;
        self.stats.resync_count += 1;
        self.transition_to(SyncState::Resynchronizing);
        self.book.clear();
        self.buffer.clear();
        self.transition_to(SyncState::Buffering);
    }

    /// Forces resynchronization even without a detected gap.
    pub fn request_resync(&mut self) {
        self.stats.resync_count += 1;
        self.transition_to(SyncState::Resynchronizing);
        self.book.clear();
        self.buffer.clear();
        self.transition_to(SyncState::Buffering);
    }

    /// Transitions Buffering → FetchingSnapshot. Returns `false` if not currently
    /// Buffering (caller should not fetch).
    pub fn begin_snapshot_fetch(&mut self) -> bool {
        if self.state != SyncState::Buffering {
            return false;
        }
        self.transition_to(SyncState::FetchingSnapshot);
        true
    }

    /// Snapshot fetch timed out or returned an error; returns to Buffering to
    /// retry after the caller's backoff.
    pub fn on_snapshot_failed(&mut self) {
        if self.state == SyncState::FetchingSnapshot {
            self.transition_to(SyncState::Buffering);
        }
    }

    /// Applies a freshly fetched snapshot against the buffered deltas per the
    /// spec §4.5 continuity rule, reusing `OrderBook::apply_deltas`'s own gap/stale
    /// classification for each buffered delta in `first_update_id` order.
    pub fn on_snapshot_received(&mut self, snapshot: BookData) {
        if self.state != SyncState::FetchingSnapshot {
            return;
        }
        self.transition_to(SyncState::Synchronizing);
        self.stats.snapshot_count += 1;

        let last_update_id = snapshot.final_update_id;
        self.book.apply_snapshot(&snapshot.bids, &snapshot.asks, last_update_id);

        let mut buffered = std::mem::take(&mut self.buffer);
        buffered.sort_by_key(|d| d.first_update_id);

        let mut gap = false;
        for delta in buffered {
            match self
                .book
                .apply_deltas(&delta.bids, &delta.asks, delta.first_update_id, delta.final_update_id)
            {
                DeltaApplyResult::Applied => self.stats.delta_count += 1,
                DeltaApplyResult::Stale => self.stats.dropped_delta_count += 1,
                DeltaApplyResult::Gap { .. } => {
                    gap = true;
                    break;
                }
            }
        }

        if gap {
            self.trigger_resync();
        } else {
            self.stats.last_sync_time_ns = now_ns();
            self.transition_to(SyncState::Synchronized);
        }
    }

    /// Drives the FSM end-to-end: buffers incoming deltas off `deltas`, fetches a
    /// snapshot via `fetch_snapshot` after the buffering period, and retries on
    /// failure/timeout. Returns when the channel closes or `stop()` disconnects.
    pub async fn run<F, Fut>(&mut self, mut deltas: UnboundedReceiver<BookData>, mut fetch_snapshot: F)
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<BookData, CoreError>>,
    {
        self.start();
        loop {
            match self.state {
                SyncState::Disconnected => return,
                SyncState::Buffering => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.buffering_period) => {
                            self.begin_snapshot_fetch();
                        }
                        maybe_delta = deltas.recv() => {
                            match maybe_delta {
                                Some(delta) => self.on_delta(delta),
                                None => return,
                            }
                        }
                    }
                }
                SyncState::FetchingSnapshot => {
                    let fetch = fetch_snapshot(self.symbol.clone());
                    match tokio::time::timeout(self.config.snapshot_timeout, fetch).await {
                        Ok(Ok(snapshot)) => self.on_snapshot_received(snapshot),
                        Ok(Err(err)) => {
                            warn!(symbol = %self.symbol, %err, "snapshot fetch failed");
                            self.on_snapshot_failed();
                        }
                        Err(_) => {
                            warn!(symbol = %self.symbol, "snapshot fetch timed out");
                            self.on_snapshot_failed();
                        }
                    }
                }
                SyncState::Synchronizing | SyncState::Synchronized | SyncState::Resynchronizing => {
                    match deltas.recv().await {
                        Some(delta) => self.on_delta(delta),
                        None => return,
                    }
                }
            }
        }
    }
}

fn now_ns() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::event::BookLevel;

    fn delta(u: i64, final_u: i64) -> BookData {
        BookData {
            bids: vec![BookLevel { price: 100.0, qty: 1.0 }],
            asks: vec![],
            first_update_id: u,
            final_update_id: final_u,
            is_snapshot: false,
        }
    }

    fn snapshot(last_update_id: i64) -> BookData {
        BookData {
            bids: vec![BookLevel { price: 100.0, qty: 1.0 }],
            asks: vec![BookLevel { price: 101.0, qty: 1.0 }],
            first_update_id: 0,
            final_update_id: last_update_id,
            is_snapshot: true,
        }
    }

    #[test]
    fn e1_book_sync_happy_path() {
        let mut mob = ManagedOrderBook::new("BTCUSDT", ManagedOrderBookConfig::default());
        mob.start();
        mob.on_delta(delta(99, 100));
        mob.on_delta(delta(101, 103));
        mob.on_delta(delta(104, 106));

        assert!(mob.begin_snapshot_fetch());
        mob.on_snapshot_received(snapshot(100));

        assert!(mob.is_synchronized());
        assert_eq!(mob.order_book().sequence(), 106);
        assert_eq!(mob.stats().dropped_delta_count, 1);
        assert_eq!(mob.stats().delta_count, 2);
    }

    #[test]
    fn e2_book_sync_gap_triggers_resync() {
        let mut mob = ManagedOrderBook::new("BTCUSDT", ManagedOrderBookConfig::default());
        mob.start();
        mob.on_delta(delta(101, 103));
        mob.on_delta(delta(108, 110));

        mob.begin_snapshot_fetch();
        mob.on_snapshot_received(snapshot(100));

        assert_eq!(mob.stats().gap_count, 1);
        assert_eq!(mob.state(), SyncState::Buffering);
        assert!(!mob.is_synchronized());
    }

    #[test]
    fn synchronized_delta_gap_clears_book_and_resyncs() {
        let mut mob = ManagedOrderBook::new("BTCUSDT", ManagedOrderBookConfig::default());
        mob.start();
        mob.begin_snapshot_fetch();
        mob.on_snapshot_received(snapshot(100));
        assert!(mob.is_synchronized());

        mob.on_delta(delta(105, 106)); // expected 101, gap
        assert_eq!(mob.state(), SyncState::Buffering);
        assert_eq!(mob.stats().gap_count, 1);
        assert!(mob.order_book().empty());
    }

    #[test]
    fn snapshot_failure_returns_to_buffering() {
        let mut mob = ManagedOrderBook::new("BTCUSDT", ManagedOrderBookConfig::default());
        mob.start();
        mob.begin_snapshot_fetch();
        mob.on_snapshot_failed();
        assert_eq!(mob.state(), SyncState::Buffering);
    }

    #[test]
    fn buffer_overflow_drops_oldest_and_counts() {
        let mut config = ManagedOrderBookConfig::default();
        config.max_buffer_size = 2;
        let mut mob = ManagedOrderBook::new("BTCUSDT", config);
        mob.start();
        mob.on_delta(delta(1, 2));
        mob.on_delta(delta(3, 4));
        mob.on_delta(delta(5, 6));
        assert_eq!(mob.stats().dropped_delta_count, 1);
    }

    #[tokio::test]
    async fn run_drives_through_to_synchronized() {
        let mut mob = ManagedOrderBook::new(
            "BTCUSDT",
            ManagedOrderBookConfig {
                buffering_period: Duration::from_millis(5),
                ..Default::default()
            },
        );
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = tokio::spawn(async move {
            mob.run(rx, |_symbol| async { Ok(snapshot(0)) }).await;
            mob
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(tx);
        let mob = handle.await.unwrap();
        assert!(mob.is_synchronized());
    }
}
