//! Multi-interval K-line (candlestick) aggregation from trades.
//!
//! Grounded in
//! `examples/original_source/libs/market/include/veloz/market/kline_aggregator.h`:
//! seven fixed intervals, a bounded ring of closed candles per interval, VWAP and
//! buy/sell volume attribution carried over from the header even though spec.md's
//! prose only sketches the update formula.

use std::collections::VecDeque;

use super::event::{KlineData, MarketEvent, MarketPayload, TradeData};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KlineInterval {
    Min1,
    Min5,
    Min15,
    Min30,
    Hour1,
    Hour4,
    Day1,
}

impl KlineInterval {
    pub const ALL: [KlineInterval; 7] = [
        KlineInterval::Min1,
        KlineInterval::Min5,
        KlineInterval::Min15,
        KlineInterval::Min30,
        KlineInterval::Hour1,
        KlineInterval::Hour4,
        KlineInterval::Day1,
    ];

    pub fn as_millis(self) -> i64 {
        match self {
            KlineInterval::Min1 => 60_000,
            KlineInterval::Min5 => 5 * 60_000,
            KlineInterval::Min15 => 15 * 60_000,
            KlineInterval::Min30 => 30 * 60_000,
            KlineInterval::Hour1 => 60 * 60_000,
            KlineInterval::Hour4 => 4 * 60 * 60_000,
            KlineInterval::Day1 => 24 * 60 * 60_000,
        }
    }

    fn index(self) -> usize {
        match self {
            KlineInterval::Min1 => 0,
            KlineInterval::Min5 => 1,
            KlineInterval::Min15 => 2,
            KlineInterval::Min30 => 3,
            KlineInterval::Hour1 => 4,
            KlineInterval::Hour4 => 5,
            KlineInterval::Day1 => 6,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            KlineInterval::Min1 => "1m",
            KlineInterval::Min5 => "5m",
            KlineInterval::Min15 => "15m",
            KlineInterval::Min30 => "30m",
            KlineInterval::Hour1 => "1h",
            KlineInterval::Hour4 => "4h",
            KlineInterval::Day1 => "1d",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregatedKline {
    pub kline: KlineData,
    pub vwap: f64,
    pub trade_count: i64,
    pub buy_volume: f64,
    pub sell_volume: f64,
    pub is_closed: bool,
}

impl AggregatedKline {
    fn opening(price: f64, start_ms: i64, close_ms: i64) -> Self {
        Self {
            kline: KlineData {
                open: price,
                high: price,
                low: price,
                close: price,
                volume: 0.0,
                start_ms,
                close_ms,
            },
            vwap: price,
            trade_count: 0,
            buy_volume: 0.0,
            sell_volume: 0.0,
            is_closed: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct KlineAggregatorConfig {
    pub max_history_per_interval: usize,
    pub emit_on_update: bool,
    pub emit_on_close: bool,
}

impl Default for KlineAggregatorConfig {
    fn default() -> Self {
        Self {
            max_history_per_interval: 1000,
            emit_on_update: true,
            emit_on_close: true,
        }
    }
}

struct IntervalState {
    enabled: bool,
    current: Option<AggregatedKline>,
    history: VecDeque<AggregatedKline>,
}

impl Default for IntervalState {
    fn default() -> Self {
        Self {
            enabled: false,
            current: None,
            history: VecDeque::new(),
        }
    }
}

/// Event emitted on every candle update (or only on close, per config).
#[derive(Debug, Clone, Copy)]
pub struct KlineUpdate {
    pub interval: KlineInterval,
    pub kline: AggregatedKline,
    pub is_close: bool,
}

pub struct KlineAggregator {
    config: KlineAggregatorConfig,
    states: [IntervalState; 7],
    total_trades: i64,
    total_candles_closed: i64,
    pending_updates: Vec<KlineUpdate>,
}

impl KlineAggregator {
    pub fn new() -> Self {
        Self::with_config(KlineAggregatorConfig::default())
    }

    pub fn with_config(config: KlineAggregatorConfig) -> Self {
        Self {
            config,
            states: std::array::from_fn(|_| IntervalState::default()),
            total_trades: 0,
            total_candles_closed: 0,
            pending_updates: Vec::new(),
        }
    }

    pub fn enable_interval(&mut self, interval: KlineInterval) {
        self.states[interval.index()].enabled = true;
    }

    pub fn disable_interval(&mut self, interval: KlineInterval) {
        self.states[interval.index()].enabled = false;
    }

    pub fn is_interval_enabled(&self, interval: KlineInterval) -> bool {
        self.states[interval.index()].enabled
    }

    pub fn enabled_intervals(&self) -> Vec<KlineInterval> {
        KlineInterval::ALL
            .into_iter()
            .filter(|i| self.is_interval_enabled(*i))
            .collect()
    }

    fn align_to_interval(timestamp_ms: i64, interval: KlineInterval) -> i64 {
        let span = interval.as_millis();
        (timestamp_ms / span) * span
    }

    /// Drains and returns the updates emitted by the most recent `process_*` call,
    /// respecting `emit_on_update`/`emit_on_close`.
    pub fn take_updates(&mut self) -> Vec<KlineUpdate> {
        std::mem::take(&mut self.pending_updates)
    }

    pub fn process_event(&mut self, event: &MarketEvent) {
        if let MarketPayload::Trade(trade) = &event.payload {
            let ts_ms = event.ts_exchange_ns / 1_000_000;
            self.process_trade(trade, ts_ms);
        }
    }

    pub fn process_trade(&mut self, trade: &TradeData, ts_ms: i64) {
        self.total_trades += 1;
        for interval in KlineInterval::ALL {
            if !self.is_interval_enabled(interval) {
                continue;
            }
            self.process_trade_for_interval(interval, trade, ts_ms);
        }
    }

    fn process_trade_for_interval(&mut self, interval: KlineInterval, trade: &TradeData, ts_ms: i64) {
        let candle_start = Self::align_to_interval(ts_ms, interval);
        let close_ms = candle_start + interval.as_millis();
        let idx = interval.index();

        let needs_new = match &self.states[idx].current {
            None => true,
            Some(c) => candle_start > c.kline.start_ms,
        };

        if needs_new {
            if let Some(mut closed) = self.states[idx].current.take() {
                closed.is_closed = true;
                self.total_candles_closed += 1;
                self.push_history(idx, closed);
                if self.config.emit_on_close {
                    self.pending_updates.push(KlineUpdate {
                        interval,
                        kline: closed,
                        is_close: true,
                    });
                }
            }
            self.states[idx].current =
                Some(AggregatedKline::opening(trade.price, candle_start, close_ms));
        }

        let candle = self.states[idx].current.as_mut().expect("just set");
        Self::update_candle(candle, trade);

        if self.config.emit_on_update {
            self.pending_updates.push(KlineUpdate {
                interval,
                kline: *candle,
                is_close: false,
            });
        }
    }

    fn update_candle(candle: &mut AggregatedKline, trade: &TradeData) {
        candle.kline.high = candle.kline.high.max(trade.price);
        candle.kline.low = candle.kline.low.min(trade.price);
        candle.kline.close = trade.price;

        let vol_before = candle.kline.volume;
        let vol_after = vol_before + trade.qty;
        candle.vwap = if vol_after > 0.0 {
            (candle.vwap * vol_before + trade.price * trade.qty) / vol_after
        } else {
            trade.price
        };
        candle.kline.volume = vol_after;
        candle.trade_count += 1;

        if trade.is_buyer_maker {
            candle.sell_volume += trade.qty;
        } else {
            candle.buy_volume += trade.qty;
        }
    }

    fn push_history(&mut self, idx: usize, candle: AggregatedKline) {
        let history = &mut self.states[idx].history;
        history.push_front(candle);
        while history.len() > self.config.max_history_per_interval {
            history.pop_back();
        }
    }

    pub fn current_kline(&self, interval: KlineInterval) -> Option<AggregatedKline> {
        self.states[interval.index()].current
    }

    /// Historical closed candles, newest first. `count == 0` returns all.
    pub fn history(&self, interval: KlineInterval, count: usize) -> Vec<AggregatedKline> {
        let history = &self.states[interval.index()].history;
        if count == 0 {
            history.iter().copied().collect()
        } else {
            history.iter().take(count).copied().collect()
        }
    }

    pub fn range(&self, interval: KlineInterval, start_ms: i64, end_ms: i64) -> Vec<AggregatedKline> {
        self.states[interval.index()]
            .history
            .iter()
            .filter(|c| c.kline.start_ms >= start_ms && c.kline.start_ms <= end_ms)
            .copied()
            .collect()
    }

    pub fn clear(&mut self, interval: KlineInterval) {
        let state = &mut self.states[interval.index()];
        state.current = None;
        state.history.clear();
    }

    pub fn clear_all(&mut self) {
        for state in &mut self.states {
            state.current = None;
            state.history.clear();
        }
    }

    pub fn total_trades_processed(&self) -> i64 {
        self.total_trades
    }

    pub fn total_candles_closed(&self) -> i64 {
        self.total_candles_closed
    }
}

impl Default for KlineAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(price: f64, qty: f64, is_buyer_maker: bool) -> TradeData {
        TradeData {
            price,
            qty,
            is_buyer_maker,
            trade_id: 1,
        }
    }

    #[test]
    fn candle_closes_on_interval_boundary() {
        let mut agg = KlineAggregator::new();
        agg.enable_interval(KlineInterval::Min1);

        agg.process_trade(&trade(100.0, 1.0, false), 59_500);
        let updates = agg.take_updates();
        assert!(!updates.iter().any(|u| u.is_close));

        agg.process_trade(&trade(100.0, 1.0, false), 60_500);
        let updates = agg.take_updates();
        assert!(updates.iter().any(|u| u.is_close));

        let history = agg.history(KlineInterval::Min1, 0);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kline.volume, 1.0);
        assert_eq!(history[0].kline.start_ms, 0);

        let current = agg.current_kline(KlineInterval::Min1).unwrap();
        assert_eq!(current.kline.start_ms, 60_000);
        assert_eq!(current.kline.volume, 1.0);
    }

    #[test]
    fn high_low_close_track_trade_stream() {
        let mut agg = KlineAggregator::new();
        agg.enable_interval(KlineInterval::Min1);

        for price in [100.0, 105.0, 95.0, 102.0] {
            agg.process_trade(&trade(price, 1.0, false), 1_000);
        }
        let candle = agg.current_kline(KlineInterval::Min1).unwrap();
        assert_eq!(candle.kline.open, 100.0);
        assert_eq!(candle.kline.high, 105.0);
        assert_eq!(candle.kline.low, 95.0);
        assert_eq!(candle.kline.close, 102.0);
    }

    #[test]
    fn volume_conserved_across_closed_and_current_candles() {
        let mut agg = KlineAggregator::new();
        agg.enable_interval(KlineInterval::Min1);

        let mut total_qty = 0.0;
        for (ts, qty) in [(1_000, 1.0), (30_000, 2.0), (65_000, 1.5), (130_000, 3.0)] {
            agg.process_trade(&trade(100.0, qty, false), ts);
            total_qty += qty;
        }

        let history_vol: f64 = agg.history(KlineInterval::Min1, 0).iter().map(|c| c.kline.volume).sum();
        let current_vol = agg.current_kline(KlineInterval::Min1).map(|c| c.kline.volume).unwrap_or(0.0);
        assert!((history_vol + current_vol - total_qty).abs() < 1e-9);
    }

    #[test]
    fn buy_sell_volume_attributed_by_taker_side() {
        let mut agg = KlineAggregator::new();
        agg.enable_interval(KlineInterval::Min1);
        agg.process_trade(&trade(100.0, 1.0, false), 1_000); // taker buy
        agg.process_trade(&trade(100.0, 2.0, true), 1_000); // taker sell

        let candle = agg.current_kline(KlineInterval::Min1).unwrap();
        assert_eq!(candle.buy_volume, 1.0);
        assert_eq!(candle.sell_volume, 2.0);
    }

    #[test]
    fn vwap_reflects_volume_weighted_price() {
        let mut agg = KlineAggregator::new();
        agg.enable_interval(KlineInterval::Min1);
        agg.process_trade(&trade(100.0, 1.0, false), 1_000);
        agg.process_trade(&trade(110.0, 1.0, false), 1_000);

        let candle = agg.current_kline(KlineInterval::Min1).unwrap();
        assert!((candle.vwap - 105.0).abs() < 1e-9);
    }

    #[test]
    fn disabled_interval_is_not_tracked() {
        let mut agg = KlineAggregator::new();
        agg.process_trade(&trade(100.0, 1.0, false), 1_000);
        assert!(agg.current_kline(KlineInterval::Min1).is_none());
    }

    #[test]
    fn history_trimmed_to_max_per_interval() {
        let mut agg = KlineAggregator::with_config(KlineAggregatorConfig {
            max_history_per_interval: 2,
            emit_on_update: false,
            emit_on_close: true,
        });
        agg.enable_interval(KlineInterval::Min1);
        for minute in 0..5i64 {
            agg.process_trade(&trade(100.0, 1.0, false), minute * 60_000);
        }
        assert_eq!(agg.history(KlineInterval::Min1, 0).len(), 2);
    }
}
