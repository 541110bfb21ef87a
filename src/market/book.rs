//! Plain sorted order book.
//!
//! Bid/ask sides as price-ordered maps, using the same `OrderedPrice` newtype
//! pattern as `cooprefr-bettersys/rust-backend/src/backtest_v2/book.rs`
//! (there: `BTreeMap<OrderedPrice, BookLevel>` with a custom `Ord` flipping bids to
//! descending order). The full query surface — depth, VWAP, market impact,
//! liquidity profile — parallels `veloz/market/order_book.h`.

use std::collections::BTreeMap;

use super::event::BookLevel;

/// Outcome of applying a batched delta against the book's continuity contract.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeltaApplyResult {
    Applied,
    /// `first_update_id` is ahead of `expected`; caller must resync.
    Gap { expected: i64, got: i64 },
    /// `final_sequence <= current sequence`; batch was a replay and was dropped.
    Stale,
}

/// Price wrapper for `BTreeMap` ordering: bids sort descending (best first), asks
/// ascending (best first). Same approach as `backtest_v2::book`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct OrderedPrice {
    price: f64,
    is_bid: bool,
}

impl Eq for OrderedPrice {}

impl PartialOrd for OrderedPrice {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedPrice {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        if self.is_bid {
            other.price.partial_cmp(&self.price).unwrap_or(std::cmp::Ordering::Equal)
        } else {
            self.price.partial_cmp(&other.price).unwrap_or(std::cmp::Ordering::Equal)
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct OrderBook {
    bids: BTreeMap<OrderedPrice, f64>,
    asks: BTreeMap<OrderedPrice, f64>,
    sequence: i64,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces book contents. Levels with `qty <= 0.0` are skipped.
    pub fn apply_snapshot(&mut self, bids: &[BookLevel], asks: &[BookLevel], sequence: i64) {
        self.bids.clear();
        self.asks.clear();
        for level in bids {
            if level.qty > 0.0 {
                self.bids.insert(OrderedPrice { price: level.price, is_bid: true }, level.qty);
            }
        }
        for level in asks {
            if level.qty > 0.0 {
                self.asks.insert(OrderedPrice { price: level.price, is_bid: false }, level.qty);
            }
        }
        self.sequence = sequence;
    }

    fn apply_level(&mut self, level: BookLevel, is_bid: bool) {
        if is_bid {
            if level.qty <= 0.0 {
                self.bids.remove(&OrderedPrice { price: level.price, is_bid: true });
            } else {
                self.bids.insert(OrderedPrice { price: level.price, is_bid: true }, level.qty);
            }
        } else if level.qty <= 0.0 {
            self.asks.remove(&OrderedPrice { price: level.price, is_bid: false });
        } else {
            self.asks.insert(OrderedPrice { price: level.price, is_bid: false }, level.qty);
        }
    }

    /// Applies a single level update. Idempotent for `sequence <= self.sequence`.
    pub fn apply_delta(&mut self, level: BookLevel, is_bid: bool, sequence: i64) {
        if sequence <= self.sequence {
            return;
        }
        self.apply_level(level, is_bid);
        self.sequence = sequence;
    }

    /// Applies a whole delta batch, checking continuity against `self.sequence`
    ///. Expected next `first_update_id` is `self.sequence + 1`.
    pub fn apply_deltas(
        &mut self,
        bids: &[BookLevel],
        asks: &[BookLevel],
        first_update_id: i64,
        final_sequence: i64,
    ) -> DeltaApplyResult {
        if final_sequence <= self.sequence {
            return DeltaApplyResult::Stale;
        }
        let expected = self.sequence + 1;
        if first_update_id > expected {
            return DeltaApplyResult::Gap {
                expected,
                got: first_update_id,
            };
        }
        for &level in bids {
            self.apply_level(level, true);
        }
        for &level in asks {
            self.apply_level(level, false);
        }
        self.sequence = final_sequence;
        DeltaApplyResult::Applied
    }

    pub fn sequence(&self) -> i64 {
        self.sequence
    }

    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.sequence = 0;
    }

    pub fn empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    pub fn best_bid(&self) -> Option<BookLevel> {
        self.bids
            .iter()
            .next()
            .map(|(k, &qty)| BookLevel { price: k.price, qty })
    }

    pub fn best_ask(&self) -> Option<BookLevel> {
        self.asks
            .iter()
            .next()
            .map(|(k, &qty)| BookLevel { price: k.price, qty })
    }

    pub fn spread(&self) -> f64 {
        match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => a.price - b.price,
            _ => 0.0,
        }
    }

    pub fn mid_price(&self) -> f64 {
        match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => (a.price + b.price) / 2.0,
            _ => 0.0,
        }
    }

    pub fn top_bids(&self, n: usize) -> Vec<BookLevel> {
        self.bids
            .iter()
            .take(n)
            .map(|(k, &qty)| BookLevel { price: k.price, qty })
            .collect()
    }

    pub fn top_asks(&self, n: usize) -> Vec<BookLevel> {
        self.asks
            .iter()
            .take(n)
            .map(|(k, &qty)| BookLevel { price: k.price, qty })
            .collect()
    }

    pub fn level_count(&self, is_bid: bool) -> usize {
        if is_bid {
            self.bids.len()
        } else {
            self.asks.len()
        }
    }

    pub fn total_depth(&self, is_bid: bool) -> f64 {
        if is_bid {
            self.bids.values().sum()
        } else {
            self.asks.values().sum()
        }
    }

    pub fn average_level_size(&self, is_bid: bool) -> f64 {
        let count = self.level_count(is_bid);
        if count == 0 {
            0.0
        } else {
            self.total_depth(is_bid) / count as f64
        }
    }

    /// Quantity resting exactly at `price` on the given side.
    pub fn depth_at_price(&self, price: f64, is_bid: bool) -> f64 {
        if is_bid {
            self.bids.get(&OrderedPrice { price, is_bid: true }).copied().unwrap_or(0.0)
        } else {
            self.asks.get(&OrderedPrice { price, is_bid: false }).copied().unwrap_or(0.0)
        }
    }

    /// Cumulative quantity at prices at-least-as-good as `price` (bids: `>= price`;
    /// asks: `<= price`).
    pub fn cumulative_depth(&self, price: f64, is_bid: bool) -> f64 {
        if is_bid {
            self.bids
                .iter()
                .take_while(|(k, _)| k.price >= price)
                .map(|(_, &qty)| qty)
                .sum()
        } else {
            self.asks
                .iter()
                .take_while(|(k, _)| k.price <= price)
                .map(|(_, &qty)| qty)
                .sum()
        }
    }

    /// Price-step → cumulative quantity profile out to `price_range` from the
    /// touch, walking in increments of `step`.
    pub fn liquidity_profile(&self, is_bid: bool, price_range: f64, step: f64) -> Vec<(f64, f64)> {
        if step <= 0.0 {
            return Vec::new();
        }
        let touch = if is_bid {
            self.best_bid().map(|l| l.price)
        } else {
            self.best_ask().map(|l| l.price)
        };
        let Some(touch) = touch else { return Vec::new() };

        let steps = (price_range / step).floor() as i64;
        let mut profile = Vec::with_capacity(steps.max(0) as usize + 1);
        for i in 0..=steps.max(0) {
            let offset = i as f64 * step;
            let price = if is_bid { touch - offset } else { touch + offset };
            profile.push((price, self.cumulative_depth(price, is_bid)));
        }
        profile
    }

    /// Average fill price for consuming `qty` starting from the touch on `is_bid`'s
    /// *contra* side is the caller's concern; this walks the given side directly
    /// (a market sell walks bids, a market buy walks asks — pass the side being
    /// consumed).
    pub fn volume_weighted_average_price(&self, is_bid: bool, depth: f64) -> f64 {
        if depth <= 0.0 {
            return 0.0;
        }
        let mut remaining = depth;
        let mut notional = 0.0;
        let levels: Box<dyn Iterator<Item = (f64, f64)>> = if is_bid {
            Box::new(self.bids.iter().map(|(k, &qty)| (k.price, qty)))
        } else {
            Box::new(self.asks.iter().map(|(k, &qty)| (k.price, qty)))
        };
        let mut filled = 0.0;
        for (price, qty) in levels {
            if remaining <= 0.0 {
                break;
            }
            let take = qty.min(remaining);
            notional += price * take;
            filled += take;
            remaining -= take;
        }
        if filled <= 0.0 {
            0.0
        } else {
            notional / filled
        }
    }

    /// Price impact (distance from touch) of consuming `qty` from the given side.
    pub fn market_impact(&self, qty: f64, is_bid: bool) -> f64 {
        let touch = if is_bid {
            self.best_bid().map(|l| l.price)
        } else {
            self.best_ask().map(|l| l.price)
        };
        let Some(touch) = touch else { return 0.0 };
        let vwap = self.volume_weighted_average_price(is_bid, qty);
        if vwap == 0.0 {
            0.0
        } else {
            (vwap - touch).abs()
        }
    }
}
