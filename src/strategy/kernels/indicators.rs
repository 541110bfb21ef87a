//! Shared indicator math for the built-in kernels.
//!
//! Every kernel header (`trend_following_strategy.h`, `mean_reversion_strategy.h`,
//! `momentum_strategy.h`) declares its own private `calculate_sma`/`calculate_ema`/
//! `calculate_std_dev` helpers with identical formulas; factored out once here
//! since Rust has no private-per-class method duplication to mirror.

pub fn sma(prices: &[f64]) -> f64 {
    if prices.is_empty() {
        return 0.0;
    }
    prices.iter().sum::<f64>() / prices.len() as f64
}

/// Standard recursive EMA seeded with the SMA of the first `period` prices.
pub fn ema(prices: &[f64], period: usize) -> f64 {
    if prices.is_empty() || period == 0 {
        return 0.0;
    }
    if prices.len() <= period {
        return sma(prices);
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut value = sma(&prices[..period]);
    for &p in &prices[period..] {
        value = alpha * p + (1.0 - alpha) * value;
    }
    value
}

pub fn mean(values: &[f64]) -> f64 {
    sma(values)
}

pub fn std_dev(values: &[f64], mean_value: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let variance =
        values.iter().map(|v| (v - mean_value).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

pub fn zscore(price: f64, mean_value: f64, std_dev_value: f64) -> f64 {
    if std_dev_value <= f64::EPSILON {
        0.0
    } else {
        (price - mean_value) / std_dev_value
    }
}

/// Rate of change over `period` samples, expressed as a fraction (0.02 == 2%).
pub fn rate_of_change(prices: &[f64], period: usize) -> f64 {
    if prices.len() <= period || period == 0 {
        return 0.0;
    }
    let current = prices[prices.len() - 1];
    let past = prices[prices.len() - 1 - period];
    if past.abs() <= f64::EPSILON {
        0.0
    } else {
        (current - past) / past
    }
}

/// Wilder-smoothed RSI update. Call once per new price with the running
/// `avg_gain`/`avg_loss` state; returns the updated RSI plus the new averages.
pub fn wilder_rsi_update(
    prev_price: f64,
    price: f64,
    avg_gain: f64,
    avg_loss: f64,
    period: usize,
) -> (f64, f64, f64) {
    let change = price - prev_price;
    let gain = change.max(0.0);
    let loss = (-change).max(0.0);
    let n = period as f64;
    let new_avg_gain = (avg_gain * (n - 1.0) + gain) / n;
    let new_avg_loss = (avg_loss * (n - 1.0) + loss) / n;
    let rsi = if new_avg_loss.abs() <= f64::EPSILON {
        100.0
    } else {
        let rs = new_avg_gain / new_avg_loss;
        100.0 - (100.0 / (1.0 + rs))
    };
    (rsi, new_avg_gain, new_avg_loss)
}
