//! REST snapshot client: `GET /api/v3/depth` against the Binance spot REST API.
//!
//! Uses `reqwest` the same way it's used elsewhere in this dependency
//! stack; this client is deliberately simple — one request per snapshot,
//! parsed into the same `BookData` the WebSocket delta stream produces so a
//! `ManagedOrderBook` can't tell the difference between the two sources.

use serde::Deserialize;

use crate::error::{CoreError, CoreResult};
use crate::market::{BookData, BookLevel};

#[derive(Debug, Clone)]
pub struct RestClientConfig {
    pub base_url: String,
    pub depth_limit: u32,
}

impl Default for RestClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.binance.com".to_string(),
            depth_limit: 1000,
        }
    }
}

impl RestClientConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            base_url: std::env::var("VELOZ_BINANCE_REST_BASE").unwrap_or(default.base_url),
            depth_limit: std::env::var("VELOZ_DEPTH_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.depth_limit),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DepthResponse {
    #[serde(rename = "lastUpdateId")]
    last_update_id: u64,
    bids: Vec<[String; 2]>,
    asks: Vec<[String; 2]>,
}

pub struct RestClient {
    config: RestClientConfig,
    http: reqwest::Client,
}

impl RestClient {
    pub fn new(config: RestClientConfig) -> Self {
        Self { config, http: reqwest::Client::new() }
    }

    /// Fetches a full depth snapshot for `symbol`.
    ///
    /// Returns a `BookData` with `is_snapshot=true`, `first_update_id=0` (the
    /// REST endpoint doesn't report one) and `final_update_id=lastUpdateId`,
    /// matching the field `ManagedOrderBook::on_snapshot_received` expects.
    pub async fn fetch_depth_snapshot(&self, symbol: &str) -> CoreResult<BookData> {
        let url = format!(
            "{}/api/v3/depth?symbol={}&limit={}",
            self.config.base_url,
            symbol.to_uppercase(),
            self.config.depth_limit
        );

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| CoreError::SnapshotFetchFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(CoreError::SnapshotFetchFailed(format!(
                "unexpected status {} from {}",
                response.status(),
                url
            )));
        }

        let body: DepthResponse = response
            .json()
            .await
            .map_err(|e| CoreError::SnapshotFetchFailed(e.to_string()))?;

        parse_depth_response(body)
    }
}

fn parse_level(raw: &[String; 2]) -> CoreResult<BookLevel> {
    let price: f64 = raw[0]
        .parse()
        .map_err(|_| CoreError::ParseError(format!("bad price field: {}", raw[0])))?;
    let qty: f64 = raw[1]
        .parse()
        .map_err(|_| CoreError::ParseError(format!("bad qty field: {}", raw[1])))?;
    Ok(BookLevel { price, qty })
}

fn parse_depth_response(body: DepthResponse) -> CoreResult<BookData> {
    let bids = body.bids.iter().map(parse_level).collect::<CoreResult<Vec<_>>>()?;
    let asks = body.asks.iter().map(parse_level).collect::<CoreResult<Vec<_>>>()?;
    Ok(BookData {
        bids,
        asks,
        first_update_id: 0,
        final_update_id: body.last_update_id,
        is_snapshot: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_depth_response_into_snapshot_book_data() {
        let body = DepthResponse {
            last_update_id: 42,
            bids: vec![["100.0".to_string(), "1.5".to_string()]],
            asks: vec![["101.0".to_string(), "2.0".to_string()]],
        };
        let book = parse_depth_response(body).unwrap();
        assert!(book.is_snapshot);
        assert_eq!(book.final_update_id, 42);
        assert_eq!(book.bids[0].price, 100.0);
        assert_eq!(book.asks[0].qty, 2.0);
    }

    #[test]
    fn rejects_malformed_price_field() {
        let body = DepthResponse {
            last_update_id: 1,
            bids: vec![["not-a-number".to_string(), "1.0".to_string()]],
            asks: vec![],
        };
        assert!(parse_depth_response(body).is_err());
    }
}
