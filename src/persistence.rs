//! Versioned, sequenced state snapshot persistence.
//!
//! Grounded in `edge/wire.rs`'s `crc32_fast` hand-roll for the rolling checksum
//! (the same "cheap integrity check over a byte buffer" primitive, reused rather
//! than re-invented) and in the `serde_json`-to-file pattern used throughout
//! `backtest_v2`. Files are named `snapshot_{seq:010}.snapshot.json`;
//! `max_snapshots` retention and monotonic sequence numbering resume from the
//! highest sequence found on disk at startup. Per-strategy side files
//! (`strategy_<id>.json`) let a strategy reload its own state without
//! reparsing the whole snapshot.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::strategy::StrategyState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub free: f64,
    pub locked: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingOrder {
    pub client_order_id: String,
    pub symbol: String,
    pub side: String,
    pub qty: f64,
    pub price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub version: u32,
    pub ts_ns: i64,
    pub sequence_num: u64,
    pub checksum: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub meta: SnapshotMeta,
    pub balances: Vec<Balance>,
    pub pending_orders: Vec<PendingOrder>,
    pub price: f64,
    pub venue_counter: u64,
    pub strategies: Vec<StrategyState>,
}

/// Fields the checksum is computed over; recomputed identically on load so
/// `verify_checksum` can detect truncation/corruption.
#[derive(Serialize)]
struct ChecksumBody<'a> {
    version: u32,
    sequence_num: u64,
    balances: &'a [Balance],
    pending_orders: &'a [PendingOrder],
    price: f64,
    venue_counter: u64,
    strategies: &'a [StrategyState],
}

const SNAPSHOT_VERSION: u32 = 1;

const fn generate_crc32_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0usize;
    while i < 256 {
        let mut crc = i as u32;
        let mut j = 0;
        while j < 8 {
            if crc & 1 != 0 {
                crc = 0xEDB88320 ^ (crc >> 1);
            } else {
                crc >>= 1;
            }
            j += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

fn crc32_fast(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = generate_crc32_table();
    let mut crc = 0xFFFFFFFF_u32;
    for &byte in data {
        let idx = ((crc ^ byte as u32) & 0xFF) as usize;
        crc = CRC32_TABLE[idx] ^ (crc >> 8);
    }
    !crc
}

fn checksum_of(
    sequence_num: u64,
    balances: &[Balance],
    pending_orders: &[PendingOrder],
    price: f64,
    venue_counter: u64,
    strategies: &[StrategyState],
) -> u32 {
    let body = ChecksumBody {
        version: SNAPSHOT_VERSION,
        sequence_num,
        balances,
        pending_orders,
        price,
        venue_counter,
        strategies,
    };
    let bytes = serde_json::to_vec(&body).unwrap_or_default();
    crc32_fast(&bytes)
}

impl StateSnapshot {
    pub fn new(
        sequence_num: u64,
        balances: Vec<Balance>,
        pending_orders: Vec<PendingOrder>,
        price: f64,
        venue_counter: u64,
        strategies: Vec<StrategyState>,
    ) -> Self {
        let checksum = checksum_of(sequence_num, &balances, &pending_orders, price, venue_counter, &strategies);
        Self {
            meta: SnapshotMeta {
                version: SNAPSHOT_VERSION,
                ts_ns: now_ns(),
                sequence_num,
                checksum,
            },
            balances,
            pending_orders,
            price,
            venue_counter,
            strategies,
        }
    }

    /// Recomputes the checksum over the recorded fields and compares against
    /// `meta.checksum`.
    pub fn verify_checksum(&self) -> bool {
        let expected = checksum_of(
            self.meta.sequence_num,
            &self.balances,
            &self.pending_orders,
            self.price,
            self.venue_counter,
            &self.strategies,
        );
        expected == self.meta.checksum
    }
}

fn now_ns() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    pub snapshot_dir: PathBuf,
    pub max_snapshots: usize,
    /// No compression format is mandated; currently a no-op toggle. Left in
    /// place so a future codec can be wired in without changing the on-disk
    /// schema, without pulling in a compression crate nothing else needs yet.
    pub enable_compression: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            snapshot_dir: PathBuf::from("./snapshots"),
            max_snapshots: 10,
            enable_compression: false,
        }
    }
}

impl PersistenceConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            snapshot_dir: std::env::var("VELOZ_SNAPSHOT_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.snapshot_dir),
            max_snapshots: std::env::var("VELOZ_MAX_SNAPSHOTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_snapshots),
            enable_compression: std::env::var("VELOZ_SNAPSHOT_COMPRESSION")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(default.enable_compression),
        }
    }
}

/// Manages the `snapshot_{seq:010}.snapshot.json` family in `config.snapshot_dir`,
/// plus per-strategy `strategy_<id>.json` side files.
pub struct SnapshotManager {
    config: PersistenceConfig,
    next_sequence: u64,
}

impl SnapshotManager {
    /// Scans `config.snapshot_dir` for the highest existing sequence number and
    /// resumes numbering from there.
    pub fn new(config: PersistenceConfig) -> CoreResult<Self> {
        std::fs::create_dir_all(&config.snapshot_dir)?;
        let max_existing = Self::scan_max_sequence(&config.snapshot_dir);
        Ok(Self {
            config,
            next_sequence: max_existing + 1,
        })
    }

    fn scan_max_sequence(dir: &Path) -> u64 {
        let mut max_seq = 0u64;
        let Ok(entries) = std::fs::read_dir(dir) else {
            return 0;
        };
        for entry in entries.flatten() {
            if let Some(seq) = parse_sequence_from_filename(&entry.file_name().to_string_lossy()) {
                max_seq = max_seq.max(seq);
            }
        }
        max_seq
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    fn snapshot_path(&self, sequence_num: u64) -> PathBuf {
        self.config.snapshot_dir.join(format!("snapshot_{sequence_num:010}.snapshot.json"))
    }

    fn strategy_path(&self, strategy_id: &str) -> PathBuf {
        self.config.snapshot_dir.join(format!("strategy_{strategy_id}.json"))
    }

    /// Writes `snapshot` to disk and runs retention cleanup. The snapshot's own
    /// `sequence_num` is used for the filename; callers typically build it from
    /// `next_sequence()` then call this.
    pub fn save_snapshot(&mut self, snapshot: &StateSnapshot) -> CoreResult<PathBuf> {
        let path = self.snapshot_path(snapshot.meta.sequence_num);
        let body = serde_json::to_vec_pretty(snapshot).map_err(|e| CoreError::ParseError(e.to_string()))?;
        write_file(&path, &body)?;

        for strategy in &snapshot.strategies {
            let strategy_path = self.strategy_path(&strategy.strategy_id);
            let body = serde_json::to_vec_pretty(strategy).map_err(|e| CoreError::ParseError(e.to_string()))?;
            write_file(&strategy_path, &body)?;
        }

        self.next_sequence = self.next_sequence.max(snapshot.meta.sequence_num + 1);
        self.cleanup()?;
        Ok(path)
    }

    /// Builds and saves a snapshot in one call, stamping `sequence_num` from the
    /// manager's own counter.
    pub fn save(
        &mut self,
        balances: Vec<Balance>,
        pending_orders: Vec<PendingOrder>,
        price: f64,
        venue_counter: u64,
        strategies: Vec<StrategyState>,
    ) -> CoreResult<StateSnapshot> {
        let seq = self.next_sequence;
        let snapshot = StateSnapshot::new(seq, balances, pending_orders, price, venue_counter, strategies);
        self.save_snapshot(&snapshot)?;
        Ok(snapshot)
    }

    /// Removes all but the `max_snapshots` most recent snapshot files.
    fn cleanup(&self) -> CoreResult<()> {
        let mut files: Vec<(u64, PathBuf)> = std::fs::read_dir(&self.config.snapshot_dir)?
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                parse_sequence_from_filename(&name).map(|seq| (seq, entry.path()))
            })
            .collect();

        if files.len() <= self.config.max_snapshots {
            return Ok(());
        }

        files.sort_by_key(|(seq, _)| *seq);
        let excess = files.len() - self.config.max_snapshots;
        for (_, path) in files.into_iter().take(excess) {
            let _ = std::fs::remove_file(path);
        }
        Ok(())
    }

    /// Loads the highest-sequence snapshot file in `snapshot_dir`, or `None` if
    /// no snapshot exists.
    pub fn load_latest_snapshot(&self) -> CoreResult<Option<StateSnapshot>> {
        let mut files: Vec<(u64, PathBuf)> = std::fs::read_dir(&self.config.snapshot_dir)?
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                parse_sequence_from_filename(&name).map(|seq| (seq, entry.path()))
            })
            .collect();

        files.sort_by_key(|(seq, _)| *seq);
        let Some((_, path)) = files.pop() else {
            return Ok(None);
        };

        let body = read_file(&path)?;
        let snapshot: StateSnapshot =
            serde_json::from_slice(&body).map_err(|e| CoreError::ParseError(e.to_string()))?;
        Ok(Some(snapshot))
    }

    pub fn load_strategy_state(&self, strategy_id: &str) -> CoreResult<Option<StrategyState>> {
        let path = self.strategy_path(strategy_id);
        if !path.exists() {
            return Ok(None);
        }
        let body = read_file(&path)?;
        let state: StrategyState =
            serde_json::from_slice(&body).map_err(|e| CoreError::ParseError(e.to_string()))?;
        Ok(Some(state))
    }
}

fn write_file(path: &Path, body: &[u8]) -> CoreResult<()> {
    let mut file = std::fs::File::create(path)?;
    file.write_all(body)?;
    Ok(())
}

fn read_file(path: &Path) -> CoreResult<Vec<u8>> {
    let mut file = std::fs::File::open(path)?;
    let mut body = Vec::new();
    file.read_to_end(&mut body)?;
    Ok(body)
}

fn parse_sequence_from_filename(name: &str) -> Option<u64> {
    let rest = name.strip_prefix("snapshot_")?;
    let digits = rest.strip_suffix(".snapshot.json")?;
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strategies() -> Vec<StrategyState> {
        vec![StrategyState {
            strategy_id: "s1".to_string(),
            strategy_name: "alpha".to_string(),
            is_running: true,
            ..Default::default()
        }]
    }

    fn config(dir: &Path) -> PersistenceConfig {
        PersistenceConfig {
            snapshot_dir: dir.to_path_buf(),
            max_snapshots: 3,
            enable_compression: false,
        }
    }

    #[test]
    fn save_then_load_roundtrips_all_fields() {
        let tmp = tempfile::tempdir().unwrap();
        let mut manager = SnapshotManager::new(config(tmp.path())).unwrap();

        let saved = manager
            .save(
                vec![Balance { asset: "BTC".to_string(), free: 1.0, locked: 0.0 }],
                vec![PendingOrder {
                    client_order_id: "c1".to_string(),
                    symbol: "BTCUSDT".to_string(),
                    side: "Buy".to_string(),
                    qty: 1.0,
                    price: 50_000.0,
                }],
                50_100.0,
                7,
                strategies(),
            )
            .unwrap();

        let loaded = manager.load_latest_snapshot().unwrap().expect("a snapshot exists");
        assert_eq!(loaded.meta.sequence_num, saved.meta.sequence_num);
        assert_eq!(loaded.price, saved.price);
        assert_eq!(loaded.venue_counter, saved.venue_counter);
        assert_eq!(loaded.balances[0].asset, "BTC");
        assert_eq!(loaded.strategies[0].strategy_id, "s1");
        assert!(loaded.verify_checksum());
    }

    #[test]
    fn sequence_is_monotonic_and_resumes_after_restart() {
        let tmp = tempfile::tempdir().unwrap();
        let mut manager = SnapshotManager::new(config(tmp.path())).unwrap();
        manager.save(vec![], vec![], 1.0, 0, vec![]).unwrap();
        manager.save(vec![], vec![], 2.0, 0, vec![]).unwrap();
        assert_eq!(manager.next_sequence(), 3);

        let resumed = SnapshotManager::new(config(tmp.path())).unwrap();
        assert_eq!(resumed.next_sequence(), 3);
    }

    #[test]
    fn cleanup_keeps_only_max_snapshots_most_recent() {
        let tmp = tempfile::tempdir().unwrap();
        let mut manager = SnapshotManager::new(config(tmp.path())).unwrap();
        for i in 0..5 {
            manager.save(vec![], vec![], i as f64, 0, vec![]).unwrap();
        }
        let remaining: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().starts_with("snapshot_"))
            .collect();
        assert_eq!(remaining.len(), 3);
    }

    #[test]
    fn corrupted_checksum_is_detected() {
        let mut snapshot = StateSnapshot::new(1, vec![], vec![], 1.0, 0, vec![]);
        assert!(snapshot.verify_checksum());
        snapshot.price = 999.0;
        assert!(!snapshot.verify_checksum());
    }

    #[test]
    fn per_strategy_file_loads_independently() {
        let tmp = tempfile::tempdir().unwrap();
        let mut manager = SnapshotManager::new(config(tmp.path())).unwrap();
        manager.save(vec![], vec![], 1.0, 0, strategies()).unwrap();

        let state = manager.load_strategy_state("s1").unwrap().expect("strategy file exists");
        assert_eq!(state.strategy_name, "alpha");
        assert!(manager.load_strategy_state("missing").unwrap().is_none());
    }
}
