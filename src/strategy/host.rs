//! Strategy registry and lifecycle host.
//!
//! Ported from
//! `examples/original_source/libs/strategy/include/veloz/strategy/strategy.h`'s
//! `StrategyManager`, resolving spec.md §9's reference-counted-vs-arena open
//! question in favor of `Arc<Mutex<dyn Strategy>>` — this corpus reaches for
//! `Arc`/`parking_lot` throughout (`risk.rs`, `route_quality/`) rather than
//! slab/generation-index registries. Insertion order is kept in a side `Vec`
//! since `HashMap` iteration order is not the fan-out order spec.md §4.11
//! requires.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{error, warn};

use crate::market::MarketEvent;

use super::{PlaceOrderRequest, Position, Strategy, StrategyConfig, StrategyFactory, StrategyMetricsSnapshot, StrategyState};

#[derive(Debug, Default)]
pub struct HostStats {
    pub load_failures: AtomicU64,
    pub strategy_panics: AtomicU64,
}

struct Entry {
    id: String,
    name: String,
    strategy: Arc<Mutex<dyn Strategy>>,
}

/// Thread-safe registry mapping `strategy_id → Strategy` and
/// `type-name → Factory`. Fan-out (`on_market_event`/`on_position_update`/
/// `on_timer`) runs single-threaded from the dispatcher; registry mutations take
/// an exclusive lock.
pub struct StrategyHost {
    entries: RwLock<Vec<Entry>>,
    factories: RwLock<HashMap<String, Box<dyn StrategyFactory>>>,
    next_id: AtomicU64,
    stats: Arc<HostStats>,
}

impl StrategyHost {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            factories: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            stats: Arc::new(HostStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<HostStats> {
        self.stats.clone()
    }

    /// Idempotent by type name; a duplicate registration is a warning, not an
    /// error.
    pub fn register_factory(&self, factory: Box<dyn StrategyFactory>) {
        let mut factories = self.factories.write();
        let name = factory.type_name().to_string();
        if factories.contains_key(&name) {
            warn!(type_name = %name, "duplicate factory registration ignored");
            return;
        }
        factories.insert(name, factory);
    }

    fn generate_id(&self, name: &str) -> String {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        format!("{name}_{n}")
    }

    /// Creates and initializes a strategy from `config`. Returns `None` on
    /// factory-missing, `initialize` returning false, or a duplicate strategy
    /// name already loaded.
    pub fn load_strategy(&self, config: StrategyConfig) -> Option<String> {
        let type_name = match config.kind {
            super::StrategyType::TrendFollowing => "trend_following",
            super::StrategyType::MeanReversion => "mean_reversion",
            super::StrategyType::Momentum => "momentum",
            super::StrategyType::MarketMaking => "market_making",
            super::StrategyType::Grid => "grid",
            super::StrategyType::Custom => config.name.as_str(),
        };

        {
            let entries = self.entries.read();
            if entries.iter().any(|e| e.name == config.name) {
                warn!(name = %config.name, "duplicate strategy name");
                self.stats.load_failures.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        }

        let factory = {
            let factories = self.factories.read();
            match factories.get(type_name) {
                Some(f) => f.create(&config),
                None => {
                    warn!(type_name, "no factory registered for strategy type");
                    self.stats.load_failures.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        };

        let mut strategy = factory;
        if !strategy.initialize(&config) {
            warn!(name = %config.name, "strategy initialize() returned false");
            self.stats.load_failures.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        strategy.on_start();

        let id = self.generate_id(&config.name);
        let mut entries = self.entries.write();
        entries.push(Entry {
            id: id.clone(),
            name: config.name,
            strategy: Arc::new(Mutex::new(strategy)),
        });
        Some(id)
    }

    pub fn unload_strategy(&self, id: &str) -> bool {
        let mut entries = self.entries.write();
        if let Some(pos) = entries.iter().position(|e| e.id == id) {
            entries[pos].strategy.lock().on_stop();
            entries.remove(pos);
            true
        } else {
            false
        }
    }

    pub fn reload_parameters(&self, id: &str, params: &HashMap<String, f64>) -> bool {
        let entries = self.entries.read();
        match entries.iter().find(|e| e.id == id) {
            Some(entry) => {
                let mut strategy = entry.strategy.lock();
                if !strategy.supports_hot_reload() {
                    return false;
                }
                strategy.update_parameters(params)
            }
            None => false,
        }
    }

    fn for_each_strategy(&self, mut f: impl FnMut(&mut dyn Strategy)) {
        let entries = self.entries.read();
        for entry in entries.iter() {
            let mut strategy = entry.strategy.lock();
            let id = entry.id.clone();
            let result = catch_unwind(AssertUnwindSafe(|| f(&mut *strategy)));
            if result.is_err() {
                error!(strategy_id = %id, "strategy callback panicked");
                self.stats.strategy_panics.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn on_market_event(&self, event: &MarketEvent) {
        self.for_each_strategy(|s| s.on_event(event));
    }

    pub fn on_position_update(&self, position: &Position) {
        self.for_each_strategy(|s| s.on_position_update(position));
    }

    pub fn on_timer(&self, timestamp_ms: i64) {
        self.for_each_strategy(|s| s.on_timer(timestamp_ms));
    }

    /// Drains every loaded strategy's pending signals in insertion order and
    /// delivers the aggregate to `sink`.
    pub fn process_and_route_signals(&self, sink: &dyn Fn(Vec<PlaceOrderRequest>)) {
        let mut aggregated = Vec::new();
        let entries = self.entries.read();
        for entry in entries.iter() {
            let mut strategy = entry.strategy.lock();
            let id = entry.id.clone();
            let result = catch_unwind(AssertUnwindSafe(|| strategy.get_signals()));
            match result {
                Ok(signals) => aggregated.extend(signals),
                Err(_) => {
                    error!(strategy_id = %id, "get_signals panicked");
                    self.stats.strategy_panics.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        if !aggregated.is_empty() {
            sink(aggregated);
        }
    }

    pub fn get_strategy_state(&self, id: &str) -> Option<StrategyState> {
        let entries = self.entries.read();
        entries.iter().find(|e| e.id == id).map(|e| e.strategy.lock().get_state())
    }

    pub fn strategy_ids(&self) -> Vec<String> {
        self.entries.read().iter().map(|e| e.id.clone()).collect()
    }

    pub fn get_metrics_summary(&self) -> HashMap<String, StrategyMetricsSnapshot> {
        let entries = self.entries.read();
        entries
            .iter()
            .map(|e| (e.id.clone(), e.strategy.lock().get_metrics()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for StrategyHost {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::{OrderSide, OrderType, StrategyMetrics, StrategyType, TimeInForce};
    use std::collections::HashMap as Map;

    struct EchoStrategy {
        id: String,
        name: String,
        running: bool,
        hot_reload: bool,
        pending: Vec<PlaceOrderRequest>,
        metrics: StrategyMetrics,
    }

    impl Strategy for EchoStrategy {
        fn id(&self) -> &str {
            &self.id
        }
        fn name(&self) -> &str {
            &self.name
        }
        fn kind(&self) -> StrategyType {
            StrategyType::Custom
        }
        fn initialize(&mut self, _config: &StrategyConfig) -> bool {
            true
        }
        fn on_start(&mut self) {
            self.running = true;
        }
        fn on_stop(&mut self) {
            self.running = false;
        }
        fn on_event(&mut self, _event: &MarketEvent) {
            self.metrics.record_event(1);
            self.pending.push(PlaceOrderRequest {
                symbol: "BTCUSDT".to_string(),
                side: OrderSide::Buy,
                order_type: OrderType::Market,
                tif: TimeInForce::Gtc,
                qty: 1.0,
                price: 0.0,
                client_order_id: "c1".to_string(),
                strategy_id: self.id.clone(),
            });
            self.metrics.record_signal();
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
            std::mem::take(&mut self.pending)
        }
        fn reset(&mut self) {
            self.pending.clear();
        }
        fn supports_hot_reload(&self) -> bool {
            self.hot_reload
        }
        fn update_parameters(&mut self, _parameters: &Map<String, f64>) -> bool {
            self.hot_reload
        }
        fn get_metrics(&self) -> StrategyMetricsSnapshot {
            self.metrics.snapshot()
        }
    }

    fn config(name: &str) -> StrategyConfig {
        StrategyConfig {
            name: name.to_string(),
            kind: StrategyType::Custom,
            risk_per_trade: 0.01,
            max_position_size: 1.0,
            stop_loss: 0.02,
            take_profit: 0.04,
            symbols: vec!["BTCUSDT".to_string()],
            parameters: Map::new(),
        }
    }

    fn event() -> MarketEvent {
        crate::market::MarketEvent {
            kind: crate::market::MarketEventKind::Trade,
            venue: crate::market::Venue::Binance,
            market_kind: crate::market::MarketKind::Spot,
            symbol: "BTCUSDT".to_string(),
            ts_exchange_ns: 1,
            ts_recv_ns: 1,
            ts_pub_ns: 1,
            payload: crate::market::MarketPayload::Empty,
        }
    }

    #[test]
    fn load_unload_leaves_host_empty() {
        let host = StrategyHost::new();
        // type_name resolution for Custom uses config.name, so register under
        // the strategy's own name to exercise the Custom branch.
        host.register_factory(Box::new(NamedFactory));
        let id = host.load_strategy(named_config("alpha")).expect("loads");
        assert_eq!(host.len(), 1);
        assert!(host.unload_strategy(&id));
        assert_eq!(host.len(), 0);
    }

    struct NamedFactory;
    impl StrategyFactory for NamedFactory {
        fn create(&self, config: &StrategyConfig) -> Box<dyn Strategy> {
            Box::new(EchoStrategy {
                id: String::new(),
                name: config.name.clone(),
                running: false,
                hot_reload: true,
                pending: Vec::new(),
                metrics: StrategyMetrics::default(),
            })
        }
        fn type_name(&self) -> &'static str {
            "alpha"
        }
    }

    fn named_config(name: &str) -> StrategyConfig {
        let mut c = config(name);
        c.name = name.to_string();
        c
    }

    #[test]
    fn duplicate_name_refused() {
        let host = StrategyHost::new();
        host.register_factory(Box::new(NamedFactory));
        assert!(host.load_strategy(named_config("alpha")).is_some());
        assert!(host.load_strategy(named_config("alpha")).is_none());
    }

    #[test]
    fn fan_out_then_route_signals_drains_pending() {
        let host = StrategyHost::new();
        host.register_factory(Box::new(NamedFactory));
        host.load_strategy(named_config("alpha")).unwrap();

        let ev = event();
        host.on_market_event(&ev);

        let routed = std::sync::Arc::new(Mutex::new(Vec::new()));
        let routed2 = routed.clone();
        host.process_and_route_signals(&move |signals| {
            routed2.lock().extend(signals);
        });
        assert_eq!(routed.lock().len(), 1);

        // Second drain call with no new events should route nothing.
        let routed3 = std::sync::Arc::new(Mutex::new(Vec::new()));
        let routed4 = routed3.clone();
        host.process_and_route_signals(&move |signals| {
            routed4.lock().extend(signals);
        });
        assert!(routed3.lock().is_empty());
    }

    #[test]
    fn hot_reload_refused_when_unsupported() {
        let host = StrategyHost::new();
        struct NoReloadFactory;
        impl StrategyFactory for NoReloadFactory {
            fn create(&self, config: &StrategyConfig) -> Box<dyn Strategy> {
                Box::new(EchoStrategy {
                    id: String::new(),
                    name: config.name.clone(),
                    running: false,
                    hot_reload: false,
                    pending: Vec::new(),
                    metrics: StrategyMetrics::default(),
                })
            }
            fn type_name(&self) -> &'static str {
                "noreload"
            }
        }
        host.register_factory(Box::new(NoReloadFactory));
        let id = host.load_strategy(named_config("noreload")).unwrap();
        assert!(!host.reload_parameters(&id, &Map::new()));
    }
}
