//! Market event data model.
//!
//! Grounded in `examples/original_source/libs/market/include/veloz/market/market_event.h`;
//! the original's `std::variant<monostate, TradeData, BookData, KlineData>` plus a
//! raw-JSON `payload` string "for backward compatibility" becomes a plain Rust enum
//! with no compatibility payload, since nothing in this crate needs it.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Venue {
    Binance,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketKind {
    Spot,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub qty: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeData {
    pub price: f64,
    pub qty: f64,
    pub is_buyer_maker: bool,
    pub trade_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookData {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    /// First update id (`U`) for a delta; unused for snapshots.
    pub first_update_id: i64,
    /// Final update id (`u`) for a delta, or `lastUpdateId` for a snapshot.
    pub final_update_id: i64,
    pub is_snapshot: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KlineData {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub start_ms: i64,
    pub close_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MarketPayload {
    Trade(TradeData),
    Book(BookData),
    Kline(KlineData),
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketEventKind {
    Unknown,
    Trade,
    BookTop,
    BookDelta,
    Kline,
    Ticker,
    FundingRate,
    MarkPrice,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketEvent {
    pub kind: MarketEventKind,
    pub venue: Venue,
    pub market_kind: MarketKind,
    pub symbol: String,
    pub ts_exchange_ns: i64,
    pub ts_recv_ns: i64,
    pub ts_pub_ns: i64,
    pub payload: MarketPayload,
}

impl MarketEvent {
    pub fn exchange_to_pub_ns(&self) -> i64 {
        self.ts_pub_ns - self.ts_exchange_ns
    }

    pub fn recv_to_pub_ns(&self) -> i64 {
        self.ts_pub_ns - self.ts_recv_ns
    }
}
