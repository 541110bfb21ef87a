//! Grid trading kernel: arithmetic/geometric price-level ladder.
//!
//! Grounded in
//! `examples/original_source/libs/strategy/include/veloz/strategy/grid_strategy.h`'s
//! `GridLevel`/`GridMode` shape. Fill simulation (a real venue reports fills
//! out-of-band) is approximated the way the original tests it: a level is treated
//! as filled once the market trades through its price, which is the only
//! observation this crate's `on_event` surface gives a strategy.

use std::collections::HashMap;

use crate::market::{MarketEvent, MarketPayload};
use crate::strategy::{
    OrderSide, OrderType, PlaceOrderRequest, Position, Strategy, StrategyConfig, StrategyMetrics,
    StrategyMetricsSnapshot, StrategyState, StrategyType, TimeInForce,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GridMode {
    Arithmetic,
    Geometric,
}

#[derive(Debug, Clone, Copy)]
struct GridLevel {
    price: f64,
    quantity: f64,
    has_buy_order: bool,
    has_sell_order: bool,
    realized_pnl: f64,
}

pub struct GridStrategy {
    id: String,
    name: String,
    running: bool,

    levels: Vec<GridLevel>,
    initialized: bool,
    initial_price: f64,
    last_price: f64,
    total_realized_pnl: f64,
    halted: bool,

    upper_price: f64,
    lower_price: f64,
    grid_count: usize,
    total_investment: f64,
    mode: GridMode,
    take_profit_pct: f64,
    stop_loss_pct: f64,
    trailing_up: bool,
    trailing_down: bool,
    rebalance_threshold: f64,

    signals: Vec<PlaceOrderRequest>,
    metrics: StrategyMetrics,
    client_order_seq: u64,
}

impl GridStrategy {
    pub fn new(config: &StrategyConfig) -> Self {
        Self {
            id: String::new(),
            name: config.name.clone(),
            running: false,
            levels: Vec::new(),
            initialized: false,
            initial_price: 0.0,
            last_price: 0.0,
            total_realized_pnl: 0.0,
            halted: false,
            upper_price: config.param("upper_price", 0.0),
            lower_price: config.param("lower_price", 0.0),
            grid_count: config.param("grid_count", 10.0) as usize,
            total_investment: config.param("total_investment", 1000.0),
            mode: if config.param("grid_mode", 0.0) >= 0.5 { GridMode::Geometric } else { GridMode::Arithmetic },
            take_profit_pct: config.param("take_profit_pct", 0.0),
            stop_loss_pct: config.param("stop_loss_pct", 0.0),
            trailing_up: config.param("trailing_up", 0.0) >= 0.5,
            trailing_down: config.param("trailing_down", 0.0) >= 0.5,
            rebalance_threshold: config.param("rebalance_threshold", 0.0),
            signals: Vec::new(),
            metrics: StrategyMetrics::default(),
            client_order_seq: 0,
        }
    }

    fn next_client_order_id(&mut self) -> String {
        self.client_order_seq += 1;
        format!("{}-{}", self.id, self.client_order_seq)
    }

    fn build_levels(&mut self, current_price: f64) {
        self.levels.clear();
        if self.grid_count < 2 || self.upper_price <= self.lower_price {
            return;
        }
        let qty_per_level = self.total_investment / (self.grid_count as f64 * current_price);

        let mut prices = Vec::with_capacity(self.grid_count + 1);
        match self.mode {
            GridMode::Arithmetic => {
                let step = (self.upper_price - self.lower_price) / self.grid_count as f64;
                for i in 0..=self.grid_count {
                    prices.push(self.lower_price + step * i as f64);
                }
            }
            GridMode::Geometric => {
                let ratio = (self.upper_price / self.lower_price).powf(1.0 / self.grid_count as f64);
                let mut price = self.lower_price;
                for _ in 0..=self.grid_count {
                    prices.push(price);
                    price *= ratio;
                }
            }
        }

        for price in prices {
            self.levels.push(GridLevel {
                price,
                quantity: qty_per_level,
                has_buy_order: price < current_price,
                has_sell_order: price > current_price,
                realized_pnl: 0.0,
            });
        }
        self.initial_price = current_price;
        self.initialized = true;
    }

    fn emit(&mut self, side: OrderSide, qty: f64, price: f64, symbol: &str) {
        let client_order_id = self.next_client_order_id();
        self.signals.push(PlaceOrderRequest {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Limit,
            tif: TimeInForce::Gtc,
            qty,
            price,
            client_order_id,
            strategy_id: self.id.clone(),
        });
        self.metrics.record_signal();
    }

    fn on_price(&mut self, price: f64, symbol: &str) {
        if self.halted {
            return;
        }
        if !self.initialized {
            self.build_levels(price);
            if !self.initialized {
                return;
            }
            for i in 0..self.levels.len() {
                let level = self.levels[i];
                if level.has_buy_order {
                    self.emit(OrderSide::Buy, level.quantity, level.price, symbol);
                } else if level.has_sell_order {
                    self.emit(OrderSide::Sell, level.quantity, level.price, symbol);
                }
            }
        }

        if price > self.upper_price || price < self.lower_price {
            if self.trailing_up && price > self.upper_price {
                let shift = price - self.upper_price;
                self.upper_price += shift;
                self.lower_price += shift;
                self.initialized = false;
            } else if self.trailing_down && price < self.lower_price {
                let shift = self.lower_price - price;
                self.upper_price -= shift;
                self.lower_price -= shift;
                self.initialized = false;
            } else {
                self.halted = true;
                return;
            }
        }

        let prev_price = self.last_price;
        self.last_price = price;
        if prev_price <= 0.0 {
            return;
        }

        let crossed_down = prev_price > price;
        let crossed_up = prev_price < price;

        for i in 0..self.levels.len() {
            let level_price = self.levels[i].price;
            let between = (prev_price < level_price && level_price <= price)
                || (price <= level_price && level_price < prev_price);
            if !between {
                continue;
            }
            if crossed_up && self.levels[i].has_buy_order {
                self.levels[i].has_buy_order = false;
                self.levels[i].has_sell_order = true;
                if let Some(next) = self.levels.get(i + 1).copied() {
                    self.emit(OrderSide::Sell, next.quantity, next.price, symbol);
                }
            } else if crossed_down && self.levels[i].has_sell_order {
                self.levels[i].has_sell_order = false;
                self.levels[i].has_buy_order = true;
                if i > 0 {
                    let prev = self.levels[i - 1];
                    self.emit(OrderSide::Buy, prev.quantity, prev.price, symbol);
                }
            }
        }

        if self.take_profit_pct > 0.0 && self.total_realized_pnl >= self.total_investment * self.take_profit_pct {
            self.halted = true;
        }
        if self.stop_loss_pct > 0.0 && self.total_realized_pnl <= -self.total_investment * self.stop_loss_pct {
            self.halted = true;
        }

        if self.rebalance_threshold > 0.0 && self.initial_price > 0.0 {
            let deviation = (price - self.initial_price).abs() / self.initial_price;
            if deviation > self.rebalance_threshold {
                self.initialized = false;
            }
        }
    }
}

impl Strategy for GridStrategy {
    fn id(&self) -> &str {
        &self.id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn kind(&self) -> StrategyType {
        StrategyType::Grid
    }

    fn initialize(&mut self, config: &StrategyConfig) -> bool {
        self.id = format!("grid_{}", config.name);
        self.upper_price > self.lower_price && self.lower_price > 0.0 && self.grid_count >= 2
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
        self.levels.clear();
        self.initialized = false;
        self.halted = false;
        self.total_realized_pnl = 0.0;
        self.last_price = 0.0;
        self.signals.clear();
    }

    fn supports_hot_reload(&self) -> bool {
        false
    }

    fn update_parameters(&mut self, _parameters: &HashMap<String, f64>) -> bool {
        false
    }

    fn get_metrics(&self) -> StrategyMetricsSnapshot {
        self.metrics.snapshot()
    }
}
