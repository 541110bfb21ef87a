//! Strategy capability set and built-in kernels (§4.12).
//!
//! `Strategy` is the trait-object capability set named in spec.md §3 directly,
//! grounded in
//! `examples/original_source/libs/strategy/include/veloz/strategy/strategy.h`'s
//! `IStrategy`/`BaseStrategy` split and
//! `trend_following_strategy.h`'s `supports_hot_reload`/`update_parameters`/
//! `get_metrics` additions. Position tracking is simplified to the fields every
//! kernel actually reads (`symbol`, `qty`, `avg_price`) rather than the full OMS
//! position type the original links against, since that type lives outside this
//! crate's scope.

pub mod host;
pub mod kernels;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::market::MarketEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyType {
    TrendFollowing,
    MeanReversion,
    Momentum,
    MarketMaking,
    Grid,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeInForce {
    Gtc,
    Ioc,
    Fok,
    Gtx,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaceOrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub tif: TimeInForce,
    pub qty: f64,
    pub price: f64,
    pub client_order_id: String,
    pub strategy_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct Position {
    pub symbol: String,
    pub qty: f64,
    pub avg_price: f64,
}

#[derive(Debug, Clone)]
pub struct StrategyConfig {
    pub name: String,
    pub kind: StrategyType,
    pub risk_per_trade: f64,
    pub max_position_size: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub symbols: Vec<String>,
    pub parameters: HashMap<String, f64>,
}

impl StrategyConfig {
    pub fn param(&self, key: &str, default: f64) -> f64 {
        self.parameters.get(key).copied().unwrap_or(default)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyState {
    pub strategy_id: String,
    pub strategy_name: String,
    pub is_running: bool,
    pub pnl: f64,
    pub total_pnl: f64,
    pub max_drawdown: f64,
    pub trade_count: u64,
    pub win_count: u64,
    pub lose_count: u64,
    pub win_rate: f64,
    pub profit_factor: f64,
}

/// Lock-free per-strategy counters.
#[derive(Debug, Default)]
pub struct StrategyMetrics {
    pub events_processed: AtomicU64,
    pub signals_generated: AtomicU64,
    pub execution_time_ns: AtomicU64,
    pub errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StrategyMetricsSnapshot {
    pub events_processed: u64,
    pub signals_generated: u64,
    pub execution_time_ns: u64,
    pub errors: u64,
}

impl StrategyMetrics {
    pub fn snapshot(&self) -> StrategyMetricsSnapshot {
        StrategyMetricsSnapshot {
            events_processed: self.events_processed.load(Ordering::Relaxed),
            signals_generated: self.signals_generated.load(Ordering::Relaxed),
            execution_time_ns: self.execution_time_ns.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    pub fn record_event(&self, elapsed_ns: u64) {
        self.events_processed.fetch_add(1, Ordering::Relaxed);
        self.execution_time_ns.fetch_add(elapsed_ns, Ordering::Relaxed);
    }

    pub fn record_signal(&self) {
        self.signals_generated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }
}

/// The capability set every strategy kernel implements.
///
/// Callbacks borrow `&mut self` only for the duration of one dispatch; nothing is
/// retained beyond the call.
pub trait Strategy: Send {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn kind(&self) -> StrategyType;

    fn initialize(&mut self, config: &StrategyConfig) -> bool;
    fn on_start(&mut self);
    fn on_stop(&mut self);
    fn on_pause(&mut self) {}
    fn on_resume(&mut self) {}

    fn on_event(&mut self, event: &MarketEvent);
    fn on_position_update(&mut self, position: &Position);
    fn on_timer(&mut self, timestamp_ms: i64);

    fn get_state(&self) -> StrategyState;
    /// Drains and returns the pending signal list, leaving it empty.
    fn get_signals(&mut self) -> Vec<PlaceOrderRequest>;
    fn reset(&mut self);

    fn supports_hot_reload(&self) -> bool {
        false
    }
    fn update_parameters(&mut self, _parameters: &HashMap<String, f64>) -> bool {
        false
    }

    fn get_metrics(&self) -> StrategyMetricsSnapshot;
}

/// Creates strategy instances of one type. Registered with the host by type name.
pub trait StrategyFactory: Send + Sync {
    fn create(&self, config: &StrategyConfig) -> Box<dyn Strategy>;
    fn type_name(&self) -> &'static str;
}
