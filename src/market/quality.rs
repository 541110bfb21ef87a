//! Market data quality scoring and anomaly detection.
//!
//! Defaults and scoring weights taken verbatim from
//! `examples/original_source/libs/market/include/veloz/market/market_quality.h`'s
//! `Config`. Spread-widening severity resolves spec.md §9's open question as
//! `((spread_bps - max_bps) / max_bps).clamp(0, 1)`.

use std::collections::VecDeque;

use super::event::{MarketEvent, MarketEventKind, MarketPayload};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnomalyType {
    PriceSpike,
    VolumeSpike,
    VolumeDrop,
    SpreadWidening,
    StaleData,
    SequenceGap,
    TimestampAnomaly,
}

#[derive(Debug, Clone)]
pub struct Anomaly {
    pub kind: AnomalyType,
    pub severity: f64,
    pub expected: f64,
    pub actual: f64,
    pub timestamp_ns: i64,
    pub description: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QualityScore {
    pub overall: f64,
    pub freshness: f64,
    pub completeness: f64,
    pub consistency: f64,
    pub reliability: f64,
    pub anomaly_count: i64,
    pub sample_count: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct QualityConfig {
    pub price_spike_threshold: f64,
    pub price_lookback_count: usize,
    pub volume_spike_multiplier: f64,
    pub volume_drop_threshold: f64,
    pub volume_lookback_count: usize,
    pub max_spread_bps: f64,
    pub stale_threshold_ms: i64,
    pub max_clock_skew_ms: i64,
    pub freshness_weight: f64,
    pub completeness_weight: f64,
    pub consistency_weight: f64,
    pub reliability_weight: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            price_spike_threshold: 0.05,
            price_lookback_count: 100,
            volume_spike_multiplier: 5.0,
            volume_drop_threshold: 0.1,
            volume_lookback_count: 100,
            max_spread_bps: 100.0,
            stale_threshold_ms: 5000,
            max_clock_skew_ms: 1000,
            freshness_weight: 0.3,
            completeness_weight: 0.25,
            consistency_weight: 0.25,
            reliability_weight: 0.2,
        }
    }
}

const MAX_ANOMALY_HISTORY: usize = 1000;

pub struct MarketQualityAnalyzer {
    config: QualityConfig,
    recent_prices: VecDeque<f64>,
    price_sum: f64,
    recent_volumes: VecDeque<f64>,
    volume_sum: f64,
    last_event_time_ns: Option<i64>,
    anomaly_history: VecDeque<Anomaly>,
    total_events: i64,
    total_anomalies: i64,
    stale_count: i64,
    gap_count: i64,
}

impl MarketQualityAnalyzer {
    pub fn new() -> Self {
        Self::with_config(QualityConfig::default())
    }

    pub fn with_config(config: QualityConfig) -> Self {
        Self {
            config,
            recent_prices: VecDeque::new(),
            price_sum: 0.0,
            recent_volumes: VecDeque::new(),
            volume_sum: 0.0,
            last_event_time_ns: None,
            anomaly_history: VecDeque::new(),
            total_events: 0,
            total_anomalies: 0,
            stale_count: 0,
            gap_count: 0,
        }
    }

    fn record_anomaly(&mut self, anomaly: Anomaly) {
        self.total_anomalies += 1;
        self.anomaly_history.push_front(anomaly);
        while self.anomaly_history.len() > MAX_ANOMALY_HISTORY {
            self.anomaly_history.pop_back();
        }
    }

    fn check_price_spike(&mut self, price: f64, timestamp_ns: i64) -> Option<Anomaly> {
        let anomaly = if !self.recent_prices.is_empty() {
            let mean = self.price_sum / self.recent_prices.len() as f64;
            if mean > 0.0 {
                let deviation = (price - mean).abs() / mean;
                if deviation > self.config.price_spike_threshold {
                    Some(Anomaly {
                        kind: AnomalyType::PriceSpike,
                        severity: (deviation / self.config.price_spike_threshold).min(1.0),
                        expected: mean,
                        actual: price,
                        timestamp_ns,
                        description: format!("price {price} deviates {deviation:.4} from mean {mean:.4}"),
                    })
                } else {
                    None
                }
            } else {
                None
            }
        } else {
            None
        };

        self.recent_prices.push_back(price);
        self.price_sum += price;
        if self.recent_prices.len() > self.config.price_lookback_count {
            if let Some(old) = self.recent_prices.pop_front() {
                self.price_sum -= old;
            }
        }
        anomaly
    }

    fn check_volume_anomaly(&mut self, qty: f64, timestamp_ns: i64) -> Option<Anomaly> {
        let anomaly = if !self.recent_volumes.is_empty() {
            let mean = self.volume_sum / self.recent_volumes.len() as f64;
            if mean > 0.0 {
                if qty > mean * self.config.volume_spike_multiplier {
                    Some(Anomaly {
                        kind: AnomalyType::VolumeSpike,
                        severity: ((qty / mean) / self.config.volume_spike_multiplier - 1.0).clamp(0.0, 1.0),
                        expected: mean,
                        actual: qty,
                        timestamp_ns,
                        description: format!("volume {qty} exceeds {}x mean {mean:.4}", self.config.volume_spike_multiplier),
                    })
                } else if qty < mean * self.config.volume_drop_threshold {
                    Some(Anomaly {
                        kind: AnomalyType::VolumeDrop,
                        severity: (1.0 - qty / (mean * self.config.volume_drop_threshold)).clamp(0.0, 1.0),
                        expected: mean,
                        actual: qty,
                        timestamp_ns,
                        description: format!("volume {qty} below {}x mean {mean:.4}", self.config.volume_drop_threshold),
                    })
                } else {
                    None
                }
            } else {
                None
            }
        } else {
            None
        };

        self.recent_volumes.push_back(qty);
        self.volume_sum += qty;
        if self.recent_volumes.len() > self.config.volume_lookback_count {
            if let Some(old) = self.recent_volumes.pop_front() {
                self.volume_sum -= old;
            }
        }
        anomaly
    }

    fn check_spread(&self, bid: f64, ask: f64, timestamp_ns: i64) -> Option<Anomaly> {
        if bid <= 0.0 || ask <= 0.0 {
            return None;
        }
        let mid = (bid + ask) / 2.0;
        if mid <= 0.0 {
            return None;
        }
        let spread_bps = (ask - bid) / mid * 10_000.0;
        if spread_bps > self.config.max_spread_bps {
            let severity = ((spread_bps - self.config.max_spread_bps) / self.config.max_spread_bps).clamp(0.0, 1.0);
            Some(Anomaly {
                kind: AnomalyType::SpreadWidening,
                severity,
                expected: self.config.max_spread_bps,
                actual: spread_bps,
                timestamp_ns,
                description: format!("spread {spread_bps:.2}bps exceeds max {:.2}bps", self.config.max_spread_bps),
            })
        } else {
            None
        }
    }

    fn check_timestamp(&self, event_ts_ns: i64, current_ts_ns: i64) -> Option<Anomaly> {
        let skew_ms = (current_ts_ns - event_ts_ns).abs() / 1_000_000;
        if skew_ms > self.config.max_clock_skew_ms {
            Some(Anomaly {
                kind: AnomalyType::TimestampAnomaly,
                severity: (skew_ms as f64 / self.config.max_clock_skew_ms as f64 - 1.0).clamp(0.0, 1.0),
                expected: self.config.max_clock_skew_ms as f64,
                actual: skew_ms as f64,
                timestamp_ns: current_ts_ns,
                description: format!("clock skew {skew_ms}ms exceeds max {}ms", self.config.max_clock_skew_ms),
            })
        } else {
            None
        }
    }

    pub fn analyze_trade(&mut self, price: f64, qty: f64, timestamp_ns: i64) -> Vec<Anomaly> {
        self.total_events += 1;
        self.last_event_time_ns = Some(timestamp_ns);
        let mut anomalies = Vec::new();
        if let Some(a) = self.check_price_spike(price, timestamp_ns) {
            anomalies.push(a);
        }
        if let Some(a) = self.check_volume_anomaly(qty, timestamp_ns) {
            anomalies.push(a);
        }
        for a in anomalies.iter().cloned() {
            self.record_anomaly(a);
        }
        anomalies
    }

    pub fn analyze_book(&mut self, best_bid: f64, best_ask: f64, timestamp_ns: i64) -> Vec<Anomaly> {
        self.total_events += 1;
        self.last_event_time_ns = Some(timestamp_ns);
        let mut anomalies = Vec::new();
        if let Some(a) = self.check_spread(best_bid, best_ask, timestamp_ns) {
            anomalies.push(a);
        }
        for a in anomalies.iter().cloned() {
            self.record_anomaly(a);
        }
        anomalies
    }

    pub fn analyze_event(&mut self, event: &MarketEvent) -> Vec<Anomaly> {
        let mut anomalies = match &event.payload {
            MarketPayload::Trade(t) => self.analyze_trade(t.price, t.qty, event.ts_exchange_ns),
            MarketPayload::Book(b) => {
                if event.kind == MarketEventKind::BookTop {
                    let bid = b.bids.first().map(|l| l.price).unwrap_or(0.0);
                    let ask = b.asks.first().map(|l| l.price).unwrap_or(0.0);
                    self.analyze_book(bid, ask, event.ts_exchange_ns)
                } else {
                    self.total_events += 1;
                    self.last_event_time_ns = Some(event.ts_exchange_ns);
                    Vec::new()
                }
            }
            _ => {
                self.total_events += 1;
                self.last_event_time_ns = Some(event.ts_exchange_ns);
                Vec::new()
            }
        };

        if let Some(a) = self.check_timestamp(event.ts_exchange_ns, event.ts_recv_ns) {
            self.record_anomaly(a.clone());
            anomalies.push(a);
        }
        anomalies
    }

    pub fn check_staleness(&mut self, current_time_ns: i64) -> Option<Anomaly> {
        let Some(last_event_time_ns) = self.last_event_time_ns else {
            return None;
        };
        let age_ms = (current_time_ns - last_event_time_ns) / 1_000_000;
        if age_ms > self.config.stale_threshold_ms {
            self.stale_count += 1;
            let anomaly = Anomaly {
                kind: AnomalyType::StaleData,
                severity: (age_ms as f64 / self.config.stale_threshold_ms as f64 - 1.0).clamp(0.0, 1.0),
                expected: self.config.stale_threshold_ms as f64,
                actual: age_ms as f64,
                timestamp_ns: current_time_ns,
                description: format!("no data for {age_ms}ms, threshold {}ms", self.config.stale_threshold_ms),
            };
            self.record_anomaly(anomaly.clone());
            Some(anomaly)
        } else {
            None
        }
    }

    /// Forwarded from the managed order book on sequence gap.
    pub fn record_sequence_gap(&mut self, timestamp_ns: i64) {
        self.gap_count += 1;
        self.record_anomaly(Anomaly {
            kind: AnomalyType::SequenceGap,
            severity: 1.0,
            expected: 0.0,
            actual: 0.0,
            timestamp_ns,
            description: "sequence gap reported by managed order book".to_string(),
        });
    }

    pub fn quality_score(&self) -> QualityScore {
        let sample_count = self.total_events;
        if sample_count == 0 {
            return QualityScore {
                overall: 1.0,
                freshness: 1.0,
                completeness: 1.0,
                consistency: 1.0,
                reliability: 1.0,
                anomaly_count: 0,
                sample_count: 0,
            };
        }

        let freshness = 1.0; // caller combines with check_staleness separately
        let completeness = 1.0 - (self.gap_count as f64 / sample_count as f64).min(1.0);
        let consistency = 1.0 - (self.total_anomalies as f64 / sample_count as f64).min(1.0);
        let reliability = 1.0 - (self.stale_count as f64 / sample_count as f64).min(1.0);

        let overall = freshness * self.config.freshness_weight
            + completeness * self.config.completeness_weight
            + consistency * self.config.consistency_weight
            + reliability * self.config.reliability_weight;

        QualityScore {
            overall: overall.clamp(0.0, 1.0),
            freshness,
            completeness,
            consistency,
            reliability,
            anomaly_count: self.total_anomalies,
            sample_count,
        }
    }

    pub fn recent_anomalies(&self, count: usize) -> Vec<Anomaly> {
        if count == 0 {
            self.anomaly_history.iter().cloned().collect()
        } else {
            self.anomaly_history.iter().take(count).cloned().collect()
        }
    }

    pub fn reset(&mut self) {
        self.recent_prices.clear();
        self.price_sum = 0.0;
        self.recent_volumes.clear();
        self.volume_sum = 0.0;
        self.last_event_time_ns = None;
        self.anomaly_history.clear();
        self.total_events = 0;
        self.total_anomalies = 0;
        self.stale_count = 0;
        self.gap_count = 0;
    }

    pub fn total_events_analyzed(&self) -> i64 {
        self.total_events
    }

    pub fn total_anomalies_detected(&self) -> i64 {
        self.total_anomalies
    }
}

impl Default for MarketQualityAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_spike_detected_beyond_threshold() {
        let mut analyzer = MarketQualityAnalyzer::new();
        for _ in 0..10 {
            analyzer.analyze_trade(100.0, 1.0, 1);
        }
        let anomalies = analyzer.analyze_trade(120.0, 1.0, 2);
        assert!(anomalies.iter().any(|a| a.kind == AnomalyType::PriceSpike));
    }

    #[test]
    fn no_spike_within_threshold() {
        let mut analyzer = MarketQualityAnalyzer::new();
        for _ in 0..10 {
            analyzer.analyze_trade(100.0, 1.0, 1);
        }
        let anomalies = analyzer.analyze_trade(101.0, 1.0, 2);
        assert!(!anomalies.iter().any(|a| a.kind == AnomalyType::PriceSpike));
    }

    #[test]
    fn volume_spike_and_drop_detected() {
        let mut analyzer = MarketQualityAnalyzer::new();
        for _ in 0..10 {
            analyzer.analyze_trade(100.0, 1.0, 1);
        }
        let spike = analyzer.analyze_trade(100.0, 10.0, 2);
        assert!(spike.iter().any(|a| a.kind == AnomalyType::VolumeSpike));

        let mut analyzer2 = MarketQualityAnalyzer::new();
        for _ in 0..10 {
            analyzer2.analyze_trade(100.0, 1.0, 1);
        }
        let drop = analyzer2.analyze_trade(100.0, 0.01, 2);
        assert!(drop.iter().any(|a| a.kind == AnomalyType::VolumeDrop));
    }

    #[test]
    fn spread_widening_uses_open_question_severity_formula() {
        let mut config = QualityConfig::default();
        config.max_spread_bps = 10.0;
        let mut analyzer = MarketQualityAnalyzer::with_config(config);
        let anomalies = analyzer.analyze_book(100.0, 100.2, 1); // 20bps spread
        let anomaly = anomalies.iter().find(|a| a.kind == AnomalyType::SpreadWidening).unwrap();
        assert!((anomaly.severity - 1.0).abs() < 1e-9);
    }

    #[test]
    fn staleness_detected_after_threshold() {
        let mut config = QualityConfig::default();
        config.stale_threshold_ms = 100;
        let mut analyzer = MarketQualityAnalyzer::with_config(config);
        analyzer.analyze_trade(100.0, 1.0, 0);
        assert!(analyzer.check_staleness(200_000_000).is_some());
        assert!(analyzer.check_staleness(50_000_000).is_none());
    }

    #[test]
    fn staleness_works_when_last_event_timestamp_is_literally_zero() {
        // timestamp 0 is a legitimate event time, not a "no event yet" marker.
        let mut config = QualityConfig::default();
        config.stale_threshold_ms = 100;
        let mut analyzer = MarketQualityAnalyzer::with_config(config);
        analyzer.analyze_trade(100.0, 1.0, 0);
        assert!(analyzer.check_staleness(150_000_000).is_some());
    }

    #[test]
    fn staleness_is_none_before_any_event_seen() {
        let mut analyzer = MarketQualityAnalyzer::new();
        assert!(analyzer.check_staleness(1_000_000_000).is_none());
    }

    #[test]
    fn timestamp_anomaly_flagged_for_clock_skew() {
        let mut config = QualityConfig::default();
        config.max_clock_skew_ms = 10;
        let mut analyzer = MarketQualityAnalyzer::with_config(config);
        let event = MarketEvent {
            kind: MarketEventKind::Trade,
            venue: super::super::event::Venue::Binance,
            market_kind: super::super::event::MarketKind::Spot,
            symbol: "BTCUSDT".to_string(),
            ts_exchange_ns: 0,
            ts_recv_ns: 50_000_000,
            ts_pub_ns: 50_000_000,
            payload: MarketPayload::Trade(super::super::event::TradeData {
                price: 100.0,
                qty: 1.0,
                is_buyer_maker: false,
                trade_id: 1,
            }),
        };
        let anomalies = analyzer.analyze_event(&event);
        assert!(anomalies.iter().any(|a| a.kind == AnomalyType::TimestampAnomaly));
    }

    #[test]
    fn quality_score_degrades_with_anomalies() {
        let mut analyzer = MarketQualityAnalyzer::new();
        for _ in 0..10 {
            analyzer.analyze_trade(100.0, 1.0, 1);
        }
        let before = analyzer.quality_score();
        analyzer.analyze_trade(500.0, 1.0, 2);
        let after = analyzer.quality_score();
        assert!(after.consistency <= before.consistency);
    }
}
