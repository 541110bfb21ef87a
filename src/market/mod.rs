//! Market data model and processing pipeline.

pub mod book;
pub mod event;
pub mod kline;
pub mod managed_book;
pub mod quality;
pub mod sampler;

pub use book::{DeltaApplyResult, OrderBook};
pub use event::{
    BookData, BookLevel, KlineData, MarketEvent, MarketEventKind, MarketKind, MarketPayload,
    TradeData, Venue,
};
pub use kline::{AggregatedKline, KlineAggregator, KlineInterval};
pub use managed_book::{ManagedOrderBook, ManagedOrderBookStats, SyncState};
pub use quality::{Anomaly, AnomalyType, MarketQualityAnalyzer, QualityScore};
pub use sampler::{DataSampler, SamplingStrategy};
