//! Momentum kernel: ROC + Wilder RSI.
//!
//! Grounded in
//! `examples/original_source/libs/strategy/include/veloz/strategy/momentum_strategy.h`.

use std::collections::{HashMap, VecDeque};

use crate::market::{MarketEvent, MarketPayload};
use crate::strategy::{
    OrderSide, OrderType, PlaceOrderRequest, Position, Strategy, StrategyConfig, StrategyMetrics,
    StrategyMetricsSnapshot, StrategyState, StrategyType, TimeInForce,
};

use super::indicators::{rate_of_change, wilder_rsi_update};

pub struct MomentumStrategy {
    id: String,
    name: String,
    running: bool,

    price_buffer: VecDeque<f64>,
    current_roc: f64,
    current_rsi: f64,
    last_price: f64,
    avg_gain: f64,
    avg_loss: f64,
    rsi_seeded: bool,

    in_position: bool,
    position_side: OrderSide,
    position_size: f64,
    stop_loss_price: f64,
    take_profit_price: f64,

    roc_period: usize,
    rsi_period: usize,
    rsi_overbought: f64,
    rsi_oversold: f64,
    momentum_threshold: f64,
    position_size_multiplier: f64,
    use_rsi_filter: bool,
    allow_short: bool,
    risk_per_trade: f64,
    max_position_size: f64,

    signals: Vec<PlaceOrderRequest>,
    metrics: StrategyMetrics,
    client_order_seq: u64,
}

const DEFAULT_STOP_PCT: f64 = 0.02;
const DEFAULT_TAKE_PROFIT_PCT: f64 = 0.04;

impl MomentumStrategy {
    pub fn new(config: &StrategyConfig) -> Self {
        Self {
            id: String::new(),
            name: config.name.clone(),
            running: false,
            price_buffer: VecDeque::new(),
            current_roc: 0.0,
            current_rsi: 50.0,
            last_price: 0.0,
            avg_gain: 0.0,
            avg_loss: 0.0,
            rsi_seeded: false,
            in_position: false,
            position_side: OrderSide::Buy,
            position_size: 0.0,
            stop_loss_price: 0.0,
            take_profit_price: 0.0,
            roc_period: config.param("roc_period", 14.0) as usize,
            rsi_period: config.param("rsi_period", 14.0) as usize,
            rsi_overbought: config.param("rsi_overbought", 70.0),
            rsi_oversold: config.param("rsi_oversold", 30.0),
            momentum_threshold: config.param("momentum_threshold", 0.02),
            position_size_multiplier: config.param("position_size", 1.0),
            use_rsi_filter: config.param("use_rsi_filter", 1.0) >= 0.5,
            allow_short: config.param("allow_short", 0.0) >= 0.5,
            risk_per_trade: config.risk_per_trade,
            max_position_size: config.max_position_size,
            signals: Vec::new(),
            metrics: StrategyMetrics::default(),
            client_order_seq: 0,
        }
    }

    fn next_client_order_id(&mut self) -> String {
        self.client_order_seq += 1;
        format!("{}-{}", self.id, self.client_order_seq)
    }

    fn push_price(&mut self, price: f64) {
        self.price_buffer.push_back(price);
        let cap = self.roc_period.max(self.rsi_period) + 1;
        while self.price_buffer.len() > cap {
            self.price_buffer.pop_front();
        }
    }

    fn position_quantity(&self, price: f64) -> f64 {
        if price <= 0.0 {
            return 0.0;
        }
        let scale = 1.0 + self.current_roc.abs().min(0.1) * 10.0;
        let notional = self.max_position_size * self.risk_per_trade * self.position_size_multiplier * scale;
        (notional / price).min(self.max_position_size)
    }

    fn emit(&mut self, side: OrderSide, qty: f64, price: f64, symbol: &str) {
        let client_order_id = self.next_client_order_id();
        self.signals.push(PlaceOrderRequest {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            tif: TimeInForce::Gtc,
            qty,
            price,
            client_order_id,
            strategy_id: self.id.clone(),
        });
        self.metrics.record_signal();
    }

    fn enter(&mut self, side: OrderSide, price: f64, symbol: &str) {
        let qty = self.position_quantity(price);
        if qty <= 0.0 {
            return;
        }
        self.in_position = true;
        self.position_side = side;
        self.position_size = qty;
        self.stop_loss_price = match side {
            OrderSide::Buy => price * (1.0 - DEFAULT_STOP_PCT),
            OrderSide::Sell => price * (1.0 + DEFAULT_STOP_PCT),
        };
        self.take_profit_price = match side {
            OrderSide::Buy => price * (1.0 + DEFAULT_TAKE_PROFIT_PCT),
            OrderSide::Sell => price * (1.0 - DEFAULT_TAKE_PROFIT_PCT),
        };
        self.emit(side, qty, price, symbol);
    }

    fn exit(&mut self, price: f64, symbol: &str) {
        if !self.in_position {
            return;
        }
        let closing_side = match self.position_side {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        };
        let qty = self.position_size;
        self.emit(closing_side, qty, price, symbol);
        self.in_position = false;
        self.position_size = 0.0;
    }

    fn on_price(&mut self, price: f64, symbol: &str) {
        self.push_price(price);

        let prices: Vec<f64> = self.price_buffer.iter().copied().collect();
        self.current_roc = rate_of_change(&prices, self.roc_period);

        if self.last_price > 0.0 {
            if !self.rsi_seeded {
                self.avg_gain = (price - self.last_price).max(0.0);
                self.avg_loss = (self.last_price - price).max(0.0);
                self.current_rsi = 50.0;
                self.rsi_seeded = true;
            } else {
                let (rsi, gain, loss) =
                    wilder_rsi_update(self.last_price, price, self.avg_gain, self.avg_loss, self.rsi_period);
                self.current_rsi = rsi;
                self.avg_gain = gain;
                self.avg_loss = loss;
            }
        }
        self.last_price = price;

        if self.in_position {
            let stop_hit = match self.position_side {
                OrderSide::Buy => price <= self.stop_loss_price || price >= self.take_profit_price,
                OrderSide::Sell => price >= self.stop_loss_price || price <= self.take_profit_price,
            };
            let rsi_reverses = match self.position_side {
                OrderSide::Buy => self.current_rsi >= self.rsi_overbought,
                OrderSide::Sell => self.current_rsi <= self.rsi_oversold,
            };
            let momentum_reverses = match self.position_side {
                OrderSide::Buy => self.current_roc < 0.0,
                OrderSide::Sell => self.current_roc > 0.0,
            };
            if stop_hit || rsi_reverses || momentum_reverses {
                self.exit(price, symbol);
            }
            return;
        }

        if self.price_buffer.len() <= self.roc_period {
            return;
        }

        let rsi_allows_long = !self.use_rsi_filter || self.current_rsi < self.rsi_overbought;
        let rsi_allows_short = !self.use_rsi_filter || self.current_rsi > self.rsi_oversold;

        if self.current_roc > self.momentum_threshold && rsi_allows_long {
            self.enter(OrderSide::Buy, price, symbol);
        } else if self.allow_short && self.current_roc < -self.momentum_threshold && rsi_allows_short {
            self.enter(OrderSide::Sell, price, symbol);
        }
    }
}

impl Strategy for MomentumStrategy {
    fn id(&self) -> &str {
        &self.id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn kind(&self) -> StrategyType {
        StrategyType::Momentum
    }

    fn initialize(&mut self, config: &StrategyConfig) -> bool {
        self.id = format!("momentum_{}", config.name);
        self.roc_period > 0 && self.rsi_period > 0
    }

    fn on_start(&mut self) {
        self.running = true;
    }
    fn on_stop(&mut self) {
        self.running = false;
    }

    fn on_event(&mut self, event: &MarketEvent) {
        let start = std::time::Instant::now();
        if let MarketPayload::Trade(trade) = &event.payload {
            self.on_price(trade.price, &event.symbol);
        }
        self.metrics.record_event(start.elapsed().as_nanos() as u64);
    }

    fn on_position_update(&mut self, _position: &Position) {}
    fn on_timer(&mut self, _timestamp_ms: i64) {}

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
        self.price_buffer.clear();
        self.current_roc = 0.0;
        self.current_rsi = 50.0;
        self.last_price = 0.0;
        self.rsi_seeded = false;
        self.in_position = false;
        self.position_size = 0.0;
        self.signals.clear();
    }

    fn supports_hot_reload(&self) -> bool {
        true
    }

    fn update_parameters(&mut self, parameters: &HashMap<String, f64>) -> bool {
        let threshold = parameters.get("momentum_threshold").copied().unwrap_or(self.momentum_threshold);
        if threshold <= 0.0 {
            return false;
        }
        self.momentum_threshold = threshold;
        if let Some(&ob) = parameters.get("rsi_overbought") {
            self.rsi_overbought = ob;
        }
        if let Some(&os) = parameters.get("rsi_oversold") {
            self.rsi_oversold = os;
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
            name: "mom".to_string(),
            kind: StrategyType::Momentum,
            risk_per_trade: 1.0,
            max_position_size: 10.0,
            stop_loss: 0.02,
            take_profit: 0.04,
            symbols: vec!["BTCUSDT".to_string()],
            parameters: {
                let mut p = std::collections::HashMap::new();
                p.insert("roc_period".to_string(), 3.0);
                p.insert("rsi_period".to_string(), 3.0);
                p.insert("momentum_threshold".to_string(), 0.01);
                p
            },
        }
    }

    fn trade_event(price: f64) -> MarketEvent {
        crate::market::MarketEvent {
            kind: crate::market::MarketEventKind::Trade,
            venue: crate::market::Venue::Binance,
            market_kind: crate::market::MarketKind::Spot,
            symbol: "BTCUSDT".to_string(),
            ts_exchange_ns: 0,
            ts_recv_ns: 0,
            ts_pub_ns: 0,
            payload: crate::market::MarketPayload::Trade(crate::market::TradeData {
                price,
                qty: 1.0,
                is_buyer_maker: false,
                trade_id: 0,
            }),
        }
    }

    #[test]
    fn positive_roc_triggers_long_entry() {
        let mut cfg = config();
        cfg.parameters.insert("use_rsi_filter".to_string(), 0.0);
        let mut s = MomentumStrategy::new(&cfg);
        s.initialize(&cfg);
        for p in [100.0, 101.0, 102.0, 110.0] {
            s.on_event(&trade_event(p));
        }
        let signals = s.get_signals();
        assert!(signals.iter().any(|r| r.side == OrderSide::Buy));
    }

    #[test]
    fn rsi_filter_blocks_overbought_long_entry() {
        let mut cfg = config();
        cfg.parameters.insert("rsi_overbought".to_string(), 50.0);
        let mut s = MomentumStrategy::new(&cfg);
        s.initialize(&cfg);
        for p in [100.0, 105.0, 110.0, 120.0] {
            s.on_event(&trade_event(p));
        }
        let signals = s.get_signals();
        assert!(signals.iter().all(|r| r.side != OrderSide::Buy));
    }

    #[test]
    fn rejects_nonpositive_threshold_update() {
        let cfg = config();
        let mut s = MomentumStrategy::new(&cfg);
        s.initialize(&cfg);
        let mut bad = std::collections::HashMap::new();
        bad.insert("momentum_threshold".to_string(), 0.0);
        assert!(!s.update_parameters(&bad));
    }
}
