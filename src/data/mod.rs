//! Ingestion boundary: JSONL files and record sources.

mod normalize;

pub use normalize::{
    normalize_symbol, parse_aggressor, parse_record, parse_timestamp, RawCandle, RawFunding, RawTrade,
};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines, Read};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::logging::{log_skipped_record, ts_epoch_ms, Domain};
use crate::types::MarketRecord;

/// Symbol assumed for rows that carry none.
pub const DEFAULT_SYMBOL: &str = "BTC";

/// Record counts at the ingestion and extraction boundaries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestStats {
    pub trades: usize,
    pub funding: usize,
    pub candles: usize,
    pub events: usize,
    pub oi_drops: usize,
    pub skipped_malformed: usize,
    pub skipped_symbol: usize,
    /// Qualifying trades whose liquidation side could not be decided.
    pub skipped_unattributed: usize,
}

impl IngestStats {
    pub fn skipped(&self) -> usize {
        self.skipped_malformed + self.skipped_symbol + self.skipped_unattributed
    }

    fn count(&mut self, record: &MarketRecord) {
        match record {
            MarketRecord::Trade(_) => self.trades += 1,
            MarketRecord::Funding(_) => self.funding += 1,
            MarketRecord::Candle(_) => self.candles += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetManifest {
    pub path: String,
    pub hash_sha256: String,
    pub row_count: u64,
    pub bad_rows: u64,
    pub stats: IngestStats,
    pub ts_min: Option<u64>,
    pub ts_max: Option<u64>,
    pub warnings: Vec<String>,
    pub generated_at_epoch: u64,
}

/// Read a JSONL file of loosely-typed rows. Blank lines and `#` comments are
/// ignored; rows that fail to normalise are skipped and counted.
pub fn read_records_jsonl(path: &Path) -> Result<(Vec<MarketRecord>, DatasetManifest)> {
    let hash = file_sha256(path)?;
    let reader = BufReader::new(File::open(path)?);

    let mut records = Vec::new();
    let mut stats = IngestStats::default();
    let mut warnings = Vec::new();
    let mut bad_rows = 0u64;
    let mut ts_min: Option<u64> = None;
    let mut ts_max: Option<u64> = None;
    let mut prev_ts: Option<u64> = None;
    let mut non_monotonic = 0u64;

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        match parse_line(trimmed) {
            Ok(rec) => {
                let ts = rec.ts_ms();
                ts_min = Some(ts_min.map(|v| v.min(ts)).unwrap_or(ts));
                ts_max = Some(ts_max.map(|v| v.max(ts)).unwrap_or(ts));
                if prev_ts.is_some_and(|p| ts < p) {
                    non_monotonic += 1;
                }
                prev_ts = Some(ts);
                stats.count(&rec);
                records.push(rec);
            }
            Err(err) => {
                bad_rows += 1;
                stats.skipped_malformed += 1;
                log_skipped_record(Domain::Ingest, "row", &err, 0);
                if warnings.len() < 20 {
                    warnings.push(format!("bad_row line {}: {}", idx + 1, err));
                }
            }
        }
    }
    if non_monotonic > 0 {
        warnings.push(format!("non_monotonic_ts: {} rows out of order", non_monotonic));
    }

    let manifest = DatasetManifest {
        path: path.display().to_string(),
        hash_sha256: hash,
        row_count: records.len() as u64,
        bad_rows,
        stats,
        ts_min,
        ts_max,
        warnings,
        generated_at_epoch: ts_epoch_ms() / 1000,
    };
    Ok((records, manifest))
}

fn parse_line(line: &str) -> std::result::Result<MarketRecord, String> {
    let value: serde_json::Value = serde_json::from_str(line).map_err(|e| e.to_string())?;
    parse_record(&value, DEFAULT_SYMBOL)
}

pub fn file_sha256(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn default_manifest_path(dataset_path: &Path) -> PathBuf {
    let mut p = dataset_path.to_path_buf();
    let fname = dataset_path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("records.jsonl");
    p.set_file_name(format!("{}.manifest.json", fname));
    p
}

// =============================================================================
// Record sources
// =============================================================================

/// Anything that delivers normalised records in batches.
pub trait RecordSource {
    fn name(&self) -> &str;

    /// Next batch; an empty batch means the source is exhausted.
    fn next_batch(&mut self) -> std::result::Result<Vec<MarketRecord>, String>;
}

/// Pre-built batches, mostly for tests and replays.
#[derive(Debug, Clone, Default)]
pub struct VecSource {
    batches: VecDeque<Vec<MarketRecord>>,
}

impl VecSource {
    pub fn new(batches: Vec<Vec<MarketRecord>>) -> Self {
        Self { batches: batches.into() }
    }
}

impl RecordSource for VecSource {
    fn name(&self) -> &str {
        "vec"
    }

    fn next_batch(&mut self) -> std::result::Result<Vec<MarketRecord>, String> {
        Ok(self.batches.pop_front().unwrap_or_default())
    }
}

/// Streams a JSONL file in fixed-size batches of normalised records.
pub struct JsonlSource {
    name: String,
    lines: Lines<BufReader<File>>,
    batch_size: usize,
    stats: IngestStats,
}

impl JsonlSource {
    pub fn open(path: &Path, batch_size: usize) -> Result<Self> {
        Ok(Self {
            name: path.display().to_string(),
            lines: BufReader::new(File::open(path)?).lines(),
            batch_size: batch_size.max(1),
            stats: IngestStats::default(),
        })
    }

    pub fn stats(&self) -> &IngestStats {
        &self.stats
    }
}

impl RecordSource for JsonlSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_batch(&mut self) -> std::result::Result<Vec<MarketRecord>, String> {
        let mut batch = Vec::with_capacity(self.batch_size);
        while batch.len() < self.batch_size {
            let Some(line) = self.lines.next() else {
                break;
            };
            let line = line.map_err(|e| e.to_string())?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            match parse_line(trimmed) {
                Ok(rec) => {
                    self.stats.count(&rec);
                    batch.push(rec);
                }
                Err(err) => {
                    self.stats.skipped_malformed += 1;
                    log_skipped_record(Domain::Ingest, "row", &err, 0);
                }
            }
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Aggressor, TradeRecord};

    #[test]
    fn test_vec_source_drains() {
        let rec = MarketRecord::Trade(TradeRecord::new("BTC", 1.0, 1.0, Aggressor::Buy, 1));
        let mut src = VecSource::new(vec![vec![rec.clone()], vec![rec]]);
        assert_eq!(src.next_batch().unwrap().len(), 1);
        assert_eq!(src.next_batch().unwrap().len(), 1);
        assert!(src.next_batch().unwrap().is_empty());
    }

    #[test]
    fn test_manifest_path() {
        let p = default_manifest_path(Path::new("/tmp/trades.jsonl"));
        assert_eq!(p, PathBuf::from("/tmp/trades.jsonl.manifest.json"));
    }
}
