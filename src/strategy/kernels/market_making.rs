//! Market-making kernel: inventory-skewed two-sided quoting.
//!
//! Grounded in
//! `examples/original_source/libs/strategy/include/veloz/strategy/market_making_strategy.h`.
//! Quotes are modeled as paired `Limit`/`Gtx` `PlaceOrderRequest`s (no exchange
//! cancel primitive exists in this crate's order-sink contract, so a refresh simply
//! emits a fresh pair; the sink is expected to replace resting quotes by
//! `client_order_id`).

use std::collections::{HashMap, VecDeque};

use crate::market::{MarketEvent, MarketEventKind, MarketPayload};
use crate::strategy::{
    OrderSide, OrderType, PlaceOrderRequest, Position, Strategy, StrategyConfig, StrategyMetrics,
    StrategyMetricsSnapshot, StrategyState, StrategyType, TimeInForce,
};

use super::indicators::std_dev;

pub struct MarketMakingStrategy {
    id: String,
    name: String,
    running: bool,

    mid_price: f64,
    best_bid: f64,
    best_ask: f64,
    last_trade_price: f64,
    current_spread: f64,
    bid_price: f64,
    ask_price: f64,
    inventory: f64,

    returns: VecDeque<f64>,
    last_mid_for_returns: f64,
    last_quote_mid: f64,
    last_quote_ms: i64,

    base_spread: f64,
    order_size: f64,
    max_inventory: f64,
    inventory_skew_factor: f64,
    quote_refresh_interval_ms: i64,
    min_spread: f64,
    max_spread: f64,
    volatility_adjustment: bool,

    signals: Vec<PlaceOrderRequest>,
    metrics: StrategyMetrics,
    client_order_seq: u64,
}

impl MarketMakingStrategy {
    pub fn new(config: &StrategyConfig) -> Self {
        Self {
            id: String::new(),
            name: config.name.clone(),
            running: false,
            mid_price: 0.0,
            best_bid: 0.0,
            best_ask: 0.0,
            last_trade_price: 0.0,
            current_spread: 0.0,
            bid_price: 0.0,
            ask_price: 0.0,
            inventory: 0.0,
            returns: VecDeque::new(),
            last_mid_for_returns: 0.0,
            last_quote_mid: 0.0,
            last_quote_ms: i64::MIN,
            base_spread: config.param("base_spread", 0.001),
            order_size: config.param("order_size", 0.1),
            max_inventory: config.param("max_inventory", 10.0),
            inventory_skew_factor: config.param("inventory_skew_factor", 0.5),
            quote_refresh_interval_ms: config.param("quote_refresh_interval_ms", 1000.0) as i64,
            min_spread: config.param("min_spread", 0.0005),
            max_spread: config.param("max_spread", 0.01),
            volatility_adjustment: config.param("volatility_adjustment", 1.0) >= 0.5,
            signals: Vec::new(),
            metrics: StrategyMetrics::default(),
            client_order_seq: 0,
        }
    }

    fn next_client_order_id(&mut self) -> String {
        self.client_order_seq += 1;
        format!("{}-{}", self.id, self.client_order_seq)
    }

    fn volatility(&self) -> f64 {
        if !self.volatility_adjustment || self.returns.len() < 2 {
            return 0.0;
        }
        let mean = self.returns.iter().sum::<f64>() / self.returns.len() as f64;
        std_dev(&self.returns.iter().copied().collect::<Vec<_>>(), mean)
    }

    fn order_size_for_side(&self, side: OrderSide) -> f64 {
        let headroom = match side {
            OrderSide::Buy => (self.max_inventory - self.inventory).max(0.0),
            OrderSide::Sell => (self.max_inventory + self.inventory).max(0.0),
        };
        let shrink = (headroom / self.max_inventory).clamp(0.0, 1.0);
        self.order_size * shrink
    }

    fn emit_quote(&mut self, side: OrderSide, price: f64, symbol: &str) {
        let qty = self.order_size_for_side(side);
        if qty <= 0.0 {
            return;
        }
        let client_order_id = self.next_client_order_id();
        self.signals.push(PlaceOrderRequest {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Limit,
            tif: TimeInForce::Gtx,
            qty,
            price,
            client_order_id,
            strategy_id: self.id.clone(),
        });
        self.metrics.record_signal();
    }

    fn refresh_quotes(&mut self, symbol: &str, now_ms: i64) {
        if self.mid_price <= 0.0 {
            return;
        }
        let skew = -(self.inventory / self.max_inventory) * self.inventory_skew_factor;
        let vol = self.volatility();
        let spread = (self.base_spread + vol * 2.0 + skew.abs() * self.base_spread)
            .clamp(self.min_spread, self.max_spread);
        self.current_spread = spread;
        let half_spread = spread / 2.0 * self.mid_price;

        self.bid_price = self.mid_price - half_spread + skew * self.mid_price * self.base_spread;
        self.ask_price = self.mid_price + half_spread + skew * self.mid_price * self.base_spread;

        self.emit_quote(OrderSide::Buy, self.bid_price, symbol);
        self.emit_quote(OrderSide::Sell, self.ask_price, symbol);

        self.last_quote_mid = self.mid_price;
        self.last_quote_ms = now_ms;
    }

    fn update_mid(&mut self, mid: f64) {
        if self.last_mid_for_returns > 0.0 && mid > 0.0 {
            self.returns.push_back((mid - self.last_mid_for_returns) / self.last_mid_for_returns);
            while self.returns.len() > 100 {
                self.returns.pop_front();
            }
        }
        self.last_mid_for_returns = mid;
        self.mid_price = mid;
    }

    fn should_refresh(&self, now_ms: i64) -> bool {
        if self.last_quote_mid <= 0.0 {
            return true;
        }
        let elapsed = now_ms.saturating_sub(self.last_quote_ms);
        if elapsed >= self.quote_refresh_interval_ms {
            return true;
        }
        let moved = (self.mid_price - self.last_quote_mid).abs();
        moved > self.current_spread.max(self.min_spread) * self.mid_price / 2.0
    }
}

impl Strategy for MarketMakingStrategy {
    fn id(&self) -> &str {
        &self.id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn kind(&self) -> StrategyType {
        StrategyType::MarketMaking
    }

    fn initialize(&mut self, config: &StrategyConfig) -> bool {
        self.id = format!("mm_{}", config.name);
        self.base_spread > 0.0 && self.max_inventory > 0.0 && self.min_spread <= self.max_spread
    }

    fn on_start(&mut self) {
        self.running = true;
    }
    fn on_stop(&mut self) {
        self.running = false;
    }

    fn on_event(&mut self, event: &MarketEvent) {
        let start = std::time::Instant::now();
        let now_ms = event.ts_exchange_ns / 1_000_000;
        match &event.payload {
            MarketPayload::Book(book) if event.kind == MarketEventKind::BookTop => {
                if let (Some(bid), Some(ask)) = (book.bids.first(), book.asks.first()) {
                    self.best_bid = bid.price;
                    self.best_ask = ask.price;
                    self.update_mid((bid.price + ask.price) / 2.0);
                }
            }
            MarketPayload::Trade(trade) => {
                self.last_trade_price = trade.price;
                if self.mid_price <= 0.0 {
                    self.update_mid(trade.price);
                }
            }
            _ => {}
        }

        if self.should_refresh(now_ms) {
            let symbol = event.symbol.clone();
            self.refresh_quotes(&symbol, now_ms);
        }
        self.metrics.record_event(start.elapsed().as_nanos() as u64);
    }

    fn on_position_update(&mut self, position: &Position) {
        self.inventory = position.qty;
    }

    fn on_timer(&mut self, timestamp_ms: i64) {
        if self.should_refresh(timestamp_ms) {
            let symbol = String::new();
            self.refresh_quotes(&symbol, timestamp_ms);
        }
    }

    fn get_state(&self) -> StrategyState {
        StrategyState {
            strategy_id: self.id.clone(),
            strategy_name: self.name.clone(),
            is_running: self.running,
            ..Default::default()
        }
    }

    fn get_signals(&mut self) -> Vec<PlaceOrderRequest> {
        std::mem::take(&mut self.signals)
    }

    fn reset(&mut self) {
        self.mid_price = 0.0;
        self.inventory = 0.0;
        self.returns.clear();
        self.last_mid_for_returns = 0.0;
        self.last_quote_mid = 0.0;
        self.last_quote_ms = i64::MIN;
        self.signals.clear();
    }

    fn supports_hot_reload(&self) -> bool {
        true
    }

    fn update_parameters(&mut self, parameters: &HashMap<String, f64>) -> bool {
        let min_spread = parameters.get("min_spread").copied().unwrap_or(self.min_spread);
        let max_spread = parameters.get("max_spread").copied().unwrap_or(self.max_spread);
        if min_spread <= 0.0 || max_spread < min_spread {
            return false;
        }
        self.min_spread = min_spread;
        self.max_spread = max_spread;
        if let Some(&base) = parameters.get("base_spread") {
            self.base_spread = base;
        }
        if let Some(&inv) = parameters.get("max_inventory") {
            if inv > 0.0 {
                self.max_inventory = inv;
            }
        }
        true
    }

    fn get_metrics(&self) -> StrategyMetricsSnapshot {
        self.metrics.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> StrategyConfig {
        StrategyConfig {
            name: "mm".to_string(),
            kind: StrategyType::MarketMaking,
            risk_per_trade: 1.0,
            max_position_size: 10.0,
            stop_loss: 0.02,
            take_profit: 0.04,
            symbols: vec!["BTCUSDT".to_string()],
            parameters: std::collections::HashMap::new(),
        }
    }

    fn book_top(symbol: &str, bid: f64, ask: f64, ts_ns: i64) -> MarketEvent {
        crate::market::MarketEvent {
            kind: crate::market::MarketEventKind::BookTop,
            venue: crate::market::Venue::Binance,
            market_kind: crate::market::MarketKind::Spot,
            symbol: symbol.to_string(),
            ts_exchange_ns: ts_ns,
            ts_recv_ns: ts_ns,
            ts_pub_ns: ts_ns,
            payload: crate::market::MarketPayload::Book(crate::market::BookData {
                bids: vec![crate::market::BookLevel { price: bid, qty: 1.0 }],
                asks: vec![crate::market::BookLevel { price: ask, qty: 1.0 }],
                first_update_id: 0,
                final_update_id: 0,
                is_snapshot: false,
            }),
        }
    }

    #[test]
    fn quotes_straddle_mid_price() {
        let cfg = config();
        let mut s = MarketMakingStrategy::new(&cfg);
        s.initialize(&cfg);
        s.on_event(&book_top("BTCUSDT", 99.9, 100.1, 0));
        let signals = s.get_signals();
        assert_eq!(signals.len(), 2);
        let buy = signals.iter().find(|r| r.side == OrderSide::Buy).unwrap();
        let sell = signals.iter().find(|r| r.side == OrderSide::Sell).unwrap();
        assert!(buy.price < 100.0);
        assert!(sell.price > 100.0);
    }

    #[test]
    fn inventory_skew_shrinks_buy_size_when_long() {
        let cfg = config();
        let mut s = MarketMakingStrategy::new(&cfg);
        s.initialize(&cfg);
        s.on_position_update(&Position { symbol: "BTCUSDT".to_string(), qty: 8.0, avg_price: 100.0 });
        s.on_event(&book_top("BTCUSDT", 99.9, 100.1, 0));
        let signals = s.get_signals();
        let buy = signals.iter().find(|r| r.side == OrderSide::Buy).unwrap();
        assert!(buy.qty < 0.1);
    }

    #[test]
    fn invalid_spread_bounds_rejected() {
        let cfg = config();
        let mut s = MarketMakingStrategy::new(&cfg);
        s.initialize(&cfg);
        let mut bad = std::collections::HashMap::new();
        bad.insert("min_spread".to_string(), 0.02);
        bad.insert("max_spread".to_string(), 0.01);
        assert!(!s.update_parameters(&bad));
    }
}
