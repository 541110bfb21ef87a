//! Data sampler for reducing market event rate.
//!
//! Named in `market_quality.h` as `DataSampler` but absent from spec.md's prose;
//! supplemented here per the original header's four strategies.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingStrategy {
    None,
    TimeInterval,
    CountInterval,
    Adaptive,
}

#[derive(Debug, Clone, Copy)]
pub struct SamplerConfig {
    pub strategy: SamplingStrategy,
    pub time_interval_ms: i64,
    pub count_interval: usize,
    pub volatility_threshold: f64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            strategy: SamplingStrategy::None,
            time_interval_ms: 100,
            count_interval: 10,
            volatility_threshold: 0.01,
        }
    }
}

pub struct DataSampler {
    config: SamplerConfig,
    last_sample_time_ns: i64,
    event_count: usize,
    last_price: f64,
    total_events: i64,
    sampled_events: i64,
}

impl DataSampler {
    pub fn new() -> Self {
        Self::with_config(SamplerConfig::default())
    }

    pub fn with_config(config: SamplerConfig) -> Self {
        Self {
            config,
            last_sample_time_ns: 0,
            event_count: 0,
            last_price: 0.0,
            total_events: 0,
            sampled_events: 0,
        }
    }

    pub fn should_sample(&mut self, timestamp_ns: i64, price: Option<f64>) -> bool {
        self.total_events += 1;
        self.event_count += 1;

        let keep = match self.config.strategy {
            SamplingStrategy::None => true,
            SamplingStrategy::TimeInterval => {
                let elapsed_ms = (timestamp_ns - self.last_sample_time_ns) / 1_000_000;
                elapsed_ms >= self.config.time_interval_ms
            }
            SamplingStrategy::CountInterval => {
                self.config.count_interval > 0 && self.event_count % self.config.count_interval == 0
            }
            SamplingStrategy::Adaptive => match price {
                Some(p) if self.last_price > 0.0 => {
                    let delta = (p - self.last_price).abs() / self.last_price;
                    delta > self.config.volatility_threshold
                }
                _ => true,
            },
        };

        if keep {
            self.sampled_events += 1;
            self.last_sample_time_ns = timestamp_ns;
            if let Some(p) = price {
                self.last_price = p;
            }
        }
        keep
    }

    pub fn reset(&mut self) {
        self.last_sample_time_ns = 0;
        self.event_count = 0;
        self.last_price = 0.0;
        self.total_events = 0;
        self.sampled_events = 0;
    }

    pub fn total_events(&self) -> i64 {
        self.total_events
    }

    pub fn sampled_events(&self) -> i64 {
        self.sampled_events
    }

    pub fn sample_rate(&self) -> f64 {
        if self.total_events > 0 {
            self.sampled_events as f64 / self.total_events as f64
        } else {
            1.0
        }
    }
}

impl Default for DataSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_strategy_keeps_everything() {
        let mut sampler = DataSampler::new();
        for i in 0..5 {
            assert!(sampler.should_sample(i, None));
        }
        assert_eq!(sampler.sample_rate(), 1.0);
    }

    #[test]
    fn count_interval_keeps_every_nth() {
        let mut sampler = DataSampler::with_config(SamplerConfig {
            strategy: SamplingStrategy::CountInterval,
            count_interval: 3,
            ..Default::default()
        });
        let kept: Vec<bool> = (1..=6).map(|i| sampler.should_sample(i, None)).collect();
        assert_eq!(kept, vec![false, false, true, false, false, true]);
    }

    #[test]
    fn time_interval_respects_minimum_spacing() {
        let mut sampler = DataSampler::with_config(SamplerConfig {
            strategy: SamplingStrategy::TimeInterval,
            time_interval_ms: 100,
            ..Default::default()
        });
        assert!(sampler.should_sample(0, None));
        assert!(!sampler.should_sample(50_000_000, None));
        assert!(sampler.should_sample(150_000_000, None));
    }

    #[test]
    fn adaptive_samples_on_volatility() {
        let mut sampler = DataSampler::with_config(SamplerConfig {
            strategy: SamplingStrategy::Adaptive,
            volatility_threshold: 0.05,
            ..Default::default()
        });
        assert!(sampler.should_sample(0, Some(100.0)));
        assert!(!sampler.should_sample(1, Some(101.0)));
        assert!(sampler.should_sample(2, Some(110.0)));
    }
}
