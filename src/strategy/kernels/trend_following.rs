//! Trend-following kernel: moving-average crossover.
//!
//! Grounded in
//! `examples/original_source/libs/strategy/include/veloz/strategy/trend_following_strategy.h`:
//! golden/death cross entries sized by `risk_per_trade`, optional ATR-based stops,
//! otherwise a flat percentage of price.

use std::collections::{HashMap, VecDeque};

use crate::market::{MarketEvent, MarketPayload};
use crate::strategy::{
    OrderSide, OrderType, PlaceOrderRequest, Position, Strategy, StrategyConfig, StrategyMetrics,
    StrategyMetricsSnapshot, StrategyState, StrategyType, TimeInForce,
};

use super::indicators::{ema, sma};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MaType {
    Sma,
    Ema,
}

pub struct TrendFollowingStrategy {
    id: String,
    name: String,
    running: bool,

    price_buffer: VecDeque<f64>,
    high_buffer: VecDeque<f64>,
    low_buffer: VecDeque<f64>,
    prev_fast_ma: f64,
    prev_slow_ma: f64,
    ma_initialized: bool,
    current_atr: f64,

    in_position: bool,
    position_side: OrderSide,
    position_size: f64,
    entry_price: f64,
    stop_loss_price: f64,
    take_profit_price: f64,

    fast_period: usize,
    slow_period: usize,
    ma_type: MaType,
    position_size_multiplier: f64,
    use_atr_stop: bool,
    atr_period: usize,
    atr_multiplier: f64,
    risk_per_trade: f64,
    max_position_size: f64,
    stop_loss_pct: f64,
    take_profit_pct: f64,

    signals: Vec<PlaceOrderRequest>,
    metrics: StrategyMetrics,
    client_order_seq: u64,
}

impl TrendFollowingStrategy {
    pub fn new(config: &StrategyConfig) -> Self {
        let ma_type = if config.param("ma_type_ema", 1.0) >= 0.5 {
            MaType::Ema
        } else {
            MaType::Sma
        };
        Self {
            id: String::new(),
            name: config.name.clone(),
            running: false,
            price_buffer: VecDeque::new(),
            high_buffer: VecDeque::new(),
            low_buffer: VecDeque::new(),
            prev_fast_ma: 0.0,
            prev_slow_ma: 0.0,
            ma_initialized: false,
            current_atr: 0.0,
            in_position: false,
            position_side: OrderSide::Buy,
            position_size: 0.0,
            entry_price: 0.0,
            stop_loss_price: 0.0,
            take_profit_price: 0.0,
            fast_period: config.param("fast_period", 10.0) as usize,
            slow_period: config.param("slow_period", 20.0) as usize,
            ma_type,
            position_size_multiplier: config.param("position_size", 1.0),
            use_atr_stop: config.param("use_atr_stop", 0.0) >= 0.5,
            atr_period: config.param("atr_period", 14.0) as usize,
            atr_multiplier: config.param("atr_multiplier", 2.0),
            risk_per_trade: config.risk_per_trade,
            max_position_size: config.max_position_size,
            stop_loss_pct: config.stop_loss,
            take_profit_pct: config.take_profit,
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
        let cap = self.slow_period + 1;
        while self.price_buffer.len() > cap {
            self.price_buffer.pop_front();
        }
    }

    fn push_high_low(&mut self, high: f64, low: f64) {
        self.high_buffer.push_back(high);
        self.low_buffer.push_back(low);
        let cap = self.atr_period + 1;
        while self.high_buffer.len() > cap {
            self.high_buffer.pop_front();
            self.low_buffer.pop_front();
        }
    }

    fn update_atr(&mut self) {
        if self.high_buffer.len() < 2 {
            return;
        }
        let n = self.high_buffer.len();
        let high = self.high_buffer[n - 1];
        let low = self.low_buffer[n - 1];
        let prev_close = self.price_buffer.get(self.price_buffer.len().saturating_sub(2)).copied().unwrap_or(low);
        let tr = (high - low).max((high - prev_close).abs()).max((low - prev_close).abs());
        if !self.current_atr.is_finite() || self.current_atr == 0.0 {
            self.current_atr = tr;
        } else {
            let period = self.atr_period as f64;
            self.current_atr = (self.current_atr * (period - 1.0) + tr) / period;
        }
    }

    fn moving_average(&self, period: usize) -> f64 {
        let prices: Vec<f64> = self.price_buffer.iter().copied().collect();
        let window = if prices.len() >= period { &prices[prices.len() - period..] } else { &prices[..] };
        match self.ma_type {
            MaType::Sma => sma(window),
            MaType::Ema => ema(&prices, period),
        }
    }

    fn position_quantity(&self, price: f64) -> f64 {
        if price <= 0.0 {
            return 0.0;
        }
        let notional = self.max_position_size * self.risk_per_trade * self.position_size_multiplier;
        (notional / price).min(self.max_position_size)
    }

    fn stop_distance(&self, price: f64) -> f64 {
        if self.use_atr_stop && self.current_atr > 0.0 {
            self.current_atr * self.atr_multiplier
        } else {
            price * self.stop_loss_pct
        }
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
        let distance = self.stop_distance(price);
        self.in_position = true;
        self.position_side = side;
        self.position_size = qty;
        self.entry_price = price;
        self.stop_loss_price = match side {
            OrderSide::Buy => price - distance,
            OrderSide::Sell => price + distance,
        };
        self.take_profit_price = match side {
            OrderSide::Buy => price * (1.0 + self.take_profit_pct),
            OrderSide::Sell => price * (1.0 - self.take_profit_pct),
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

    fn check_stop_and_target(&mut self, price: f64, symbol: &str) {
        if !self.in_position {
            return;
        }
        let breached = match self.position_side {
            OrderSide::Buy => price <= self.stop_loss_price || price >= self.take_profit_price,
            OrderSide::Sell => price >= self.stop_loss_price || price <= self.take_profit_price,
        };
        if breached {
            self.exit(price, symbol);
        }
    }

    fn on_price(&mut self, price: f64, symbol: &str, high: f64, low: f64) {
        self.push_price(price);
        self.push_high_low(high, low);
        self.update_atr();

        self.check_stop_and_target(price, symbol);

        if self.price_buffer.len() <= self.slow_period {
            return;
        }

        let fast_ma = self.moving_average(self.fast_period);
        let slow_ma = self.moving_average(self.slow_period);

        if self.ma_initialized {
            let golden_cross = self.prev_fast_ma <= self.prev_slow_ma && fast_ma > slow_ma;
            let death_cross = self.prev_fast_ma >= self.prev_slow_ma && fast_ma < slow_ma;

            if golden_cross {
                if self.in_position && self.position_side == OrderSide::Sell {
                    self.exit(price, symbol);
                }
                if !self.in_position {
                    self.enter(OrderSide::Buy, price, symbol);
                }
            } else if death_cross {
                if self.in_position && self.position_side == OrderSide::Buy {
                    self.exit(price, symbol);
                }
                if !self.in_position {
                    self.enter(OrderSide::Sell, price, symbol);
                }
            }
        }

        self.prev_fast_ma = fast_ma;
        self.prev_slow_ma = slow_ma;
        self.ma_initialized = true;
    }
}

impl Strategy for TrendFollowingStrategy {
    fn id(&self) -> &str {
        &self.id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn kind(&self) -> StrategyType {
        StrategyType::TrendFollowing
    }

    fn initialize(&mut self, config: &StrategyConfig) -> bool {
        self.id = format!("trend_{}", config.name);
        self.fast_period > 0 && self.slow_period > self.fast_period
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
            self.on_price(trade.price, &event.symbol, trade.price, trade.price);
        }
        self.metrics.record_event(start.elapsed().as_nanos() as u64);
    }

    fn on_position_update(&mut self, _position: &Position) {}

    fn on_timer(&mut self, _timestamp_ms: i64) {
        if let Some(&price) = self.price_buffer.back() {
            let symbol = String::new();
            self.check_stop_and_target(price, &symbol);
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
        self.price_buffer.clear();
        self.high_buffer.clear();
        self.low_buffer.clear();
        self.ma_initialized = false;
        self.in_position = false;
        self.position_size = 0.0;
        self.signals.clear();
    }

    fn supports_hot_reload(&self) -> bool {
        true
    }

    fn update_parameters(&mut self, parameters: &HashMap<String, f64>) -> bool {
        let fast = parameters.get("fast_period").copied().unwrap_or(self.fast_period as f64);
        let slow = parameters.get("slow_period").copied().unwrap_or(self.slow_period as f64);
        if fast <= 0.0 || slow <= fast {
            return false;
        }
        self.fast_period = fast as usize;
        self.slow_period = slow as usize;
        if let Some(&mult) = parameters.get("position_size") {
            self.position_size_multiplier = mult;
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
    use std::collections::HashMap as Map;

    fn config() -> StrategyConfig {
        let mut parameters = Map::new();
        parameters.insert("fast_period".to_string(), 2.0);
        parameters.insert("slow_period".to_string(), 4.0);
        StrategyConfig {
            name: "tf".to_string(),
            kind: StrategyType::TrendFollowing,
            risk_per_trade: 1.0,
            max_position_size: 10.0,
            stop_loss: 0.02,
            take_profit: 0.04,
            symbols: vec!["BTCUSDT".to_string()],
            parameters,
        }
    }

    fn trade_event(symbol: &str, price: f64) -> MarketEvent {
        crate::market::MarketEvent {
            kind: crate::market::MarketEventKind::Trade,
            venue: crate::market::Venue::Binance,
            market_kind: crate::market::MarketKind::Spot,
            symbol: symbol.to_string(),
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
    fn golden_cross_enters_long_exactly_once() {
        let cfg = config();
        let mut s = TrendFollowingStrategy::new(&cfg);
        assert!(s.initialize(&cfg));
        s.on_start();

        for p in [100.0, 100.0, 100.0, 100.0, 105.0, 110.0] {
            s.on_event(&trade_event("BTCUSDT", p));
        }

        let signals = s.get_signals();
        assert!(signals.iter().any(|r| r.side == OrderSide::Buy));
    }

    #[test]
    fn deterministic_given_same_price_stream() {
        let cfg = config();
        let mut a = TrendFollowingStrategy::new(&cfg);
        let mut b = TrendFollowingStrategy::new(&cfg);
        a.initialize(&cfg);
        b.initialize(&cfg);
        let prices = [100.0, 100.0, 100.0, 100.0, 105.0, 110.0, 95.0, 90.0];
        for &p in &prices {
            a.on_event(&trade_event("BTCUSDT", p));
            b.on_event(&trade_event("BTCUSDT", p));
        }
        assert_eq!(a.get_signals().len(), b.get_signals().len());
    }

    #[test]
    fn hot_reload_rejects_invalid_period_ordering() {
        let cfg = config();
        let mut s = TrendFollowingStrategy::new(&cfg);
        s.initialize(&cfg);
        let mut bad = Map::new();
        bad.insert("fast_period".to_string(), 20.0);
        bad.insert("slow_period".to_string(), 10.0);
        assert!(!s.update_parameters(&bad));
    }
}
