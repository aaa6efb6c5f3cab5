use anyhow::{Context, Result};
use serde_json::json;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use liqzones::data::{default_manifest_path, read_records_jsonl, JsonlSource};
use liqzones::indicators::vwap;
use liqzones::logging::counter_snapshot;
use liqzones::{MarketRecord, MultiTimeframeAggregator, Pipeline, StreamEngine, Zone, ZoneConfig};

/// Replay a JSONL capture of trades, funding/OI samples and candles.
///
///   liqzones-replay <file.jsonl>            batch zones (multi-timeframe if TIMEFRAMES is set)
///   liqzones-replay <file.jsonl> --stream   feed the stream engine in batches of BATCH_SIZE
fn main() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let path = args
        .iter()
        .find(|a| !a.starts_with("--"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("data/records.jsonl"));
    let stream = args.iter().any(|a| a == "--stream");
    let cfg = ZoneConfig::from_env().context("invalid configuration")?;

    let zones = if stream {
        run_stream(cfg, &path)?
    } else {
        run_batch(cfg, &path)?
    };

    for z in &zones {
        println!("{}", serde_json::to_string(z)?);
    }
    eprintln!("zones={} counters={:?}", zones.len(), counter_snapshot());
    Ok(())
}

fn run_batch(cfg: ZoneConfig, path: &Path) -> Result<Vec<Zone>> {
    let (records, manifest) =
        read_records_jsonl(path).with_context(|| format!("failed to read {}", path.display()))?;
    eprintln!(
        "data_quality rows={} bad_rows={} trades={} funding={} candles={}",
        manifest.row_count, manifest.bad_rows, manifest.stats.trades, manifest.stats.funding, manifest.stats.candles
    );
    if !manifest.warnings.is_empty() {
        eprintln!("data_warnings: {:?}", manifest.warnings);
    }
    let out_path = default_manifest_path(path);
    fs::write(&out_path, serde_json::to_string_pretty(&json!({ "manifest": manifest }))?)
        .with_context(|| format!("failed to write {}", out_path.display()))?;
    eprintln!("wrote manifest {}", out_path.display());

    if records.is_empty() {
        eprintln!("no records parsed");
        return Ok(Vec::new());
    }
    let candles: Vec<_> = records
        .iter()
        .filter_map(|r| match r {
            MarketRecord::Candle(c) => Some(c.clone()),
            _ => None,
        })
        .collect();
    if let Some(v) = vwap(&candles, None).last().filter(|v| **v > 0.0) {
        eprintln!("session_vwap={:.4}", v);
    }
    let multi = env::var("TIMEFRAMES").is_ok();
    let pipeline = Pipeline::new(cfg)?;
    if multi {
        Ok(MultiTimeframeAggregator::new(pipeline).aggregate_configured(&records, None)?)
    } else {
        Ok(pipeline.compute_zones(&records, None))
    }
}

fn run_stream(cfg: ZoneConfig, path: &Path) -> Result<Vec<Zone>> {
    let batch_size = env::var("BATCH_SIZE").ok().and_then(|v| v.parse().ok()).unwrap_or(500);
    let mut source = JsonlSource::open(path, batch_size)?;
    let mut engine = StreamEngine::new(cfg)?;
    engine.on_zone_formed(|z| {
        eprintln!("formed {} {:.2} usd={:.0}", z.dominant_side, z.price_mean, z.total_usd);
        Ok(())
    });
    engine.on_zone_broken(|z| {
        eprintln!("broken {} {:.2} touches={}", z.dominant_side, z.price_mean, z.touch_count);
        Ok(())
    });
    let zones = engine.drain(&mut source).map_err(anyhow::Error::msg)?;
    eprintln!(
        "stream rows={} bad_rows={} events={} unattributed={}",
        source.stats().trades + source.stats().funding + source.stats().candles,
        source.stats().skipped_malformed,
        engine.stats().events,
        engine.stats().skipped_unattributed
    );
    if let Some(m) = engine.ledger().metrics() {
        eprintln!(
            "outcomes n={} win_rate={:.1}% expectancy={:.2} sqn={:.2} ({})",
            m.n_zones, m.win_rate, m.expectancy, m.sqn_score, m.interpretation
        );
    }
    Ok(zones)
}
