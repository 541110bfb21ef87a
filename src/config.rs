//! Process-wide configuration loaded from the environment.
//!
//! Each component additionally exposes its own `Config` with a `from_env()`
//! constructor (dispatcher, exchange client, quality analyzer, persistence); this
//! type only covers settings that don't belong to one specific component.

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub binance_ws_host: String,
    pub binance_rest_base: String,
    pub snapshot_dir: String,
    pub max_snapshots: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            binance_ws_host: "stream.binance.com:9443".to_string(),
            binance_rest_base: "https://api.binance.com".to_string(),
            snapshot_dir: "./snapshots".to_string(),
            max_snapshots: 10,
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        let default = Self::default();
        Self {
            binance_ws_host: env_or("VELOZ_BINANCE_WS_HOST", &default.binance_ws_host),
            binance_rest_base: env_or("VELOZ_BINANCE_REST_BASE", &default.binance_rest_base),
            snapshot_dir: env_or("VELOZ_SNAPSHOT_DIR", &default.snapshot_dir),
            max_snapshots: env_parsed("VELOZ_MAX_SNAPSHOTS", default.max_snapshots),
        }
    }
}
