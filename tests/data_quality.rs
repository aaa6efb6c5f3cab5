use liqzones::data::{default_manifest_path, file_sha256, read_records_jsonl, JsonlSource, RecordSource};
use liqzones::{Aggressor, MarketRecord};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write_jsonl(path: &Path, rows: &[&str]) {
    let mut out = String::new();
    for row in rows {
        out.push_str(row);
        out.push('\n');
    }
    fs::write(path, out).unwrap();
}

const MIXED: &[&str] = &[
    "# capture of 2023-11-14",
    r#"{"kind":"trade","symbol":"BTC","price":83975.0,"size":0.5,"side":"sell","ts_ms":1700000000000}"#,
    r#"{"coin":"BTC","px":"83980.5","sz":"0.25","side":"B","time":1700000001}"#,
    r#"{"market":"BTC-PERP","price":83990,"qty":0.1,"side":"ask","timestamp":"2023-11-14T22:13:22Z"}"#,
    "",
    r#"{"channel":"funding","data":{"coin":"BTC","fundingRate":"0.0021","openInterest":"1200000","time":1700000003000}}"#,
    r#"{"t":1700000060000,"o":83970,"h":83995,"l":83960,"c":83980,"v":12.5}"#,
    r#"{"price":"not a number","size":1,"ts":1}"#,
    "not json at all",
];

#[test]
fn mixed_rows_normalise_to_canonical_records() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mixed.jsonl");
    write_jsonl(&path, MIXED);

    let (records, manifest) = read_records_jsonl(&path).unwrap();
    assert_eq!(records.len(), 5);
    assert_eq!(manifest.row_count, 5);
    assert_eq!(manifest.bad_rows, 2);
    assert_eq!(manifest.stats.trades, 3);
    assert_eq!(manifest.stats.funding, 1);
    assert_eq!(manifest.stats.candles, 1);
    assert_eq!(manifest.ts_min, Some(1_700_000_000_000));
    assert_eq!(manifest.ts_max, Some(1_700_000_060_000));
    assert_eq!(manifest.warnings.len(), 2);

    match &records[1] {
        MarketRecord::Trade(t) => {
            assert_eq!(t.ts_ms, 1_700_000_001_000);
            assert_eq!(t.side, Aggressor::Buy);
        }
        other => panic!("expected trade, got {:?}", other),
    }
    match &records[2] {
        MarketRecord::Trade(t) => {
            assert_eq!(t.ts_ms, 1_700_000_002_000);
            assert_eq!(t.symbol, "BTC-PERP");
        }
        other => panic!("expected trade, got {:?}", other),
    }
    match &records[3] {
        MarketRecord::Funding(f) => {
            assert!((f.funding_rate - 0.0021).abs() < 1e-12);
            assert_eq!(f.open_interest, Some(1_200_000.0));
        }
        other => panic!("expected funding, got {:?}", other),
    }
}

#[test]
fn manifest_hash_matches_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("hash.jsonl");
    write_jsonl(&path, MIXED);
    let (_, manifest) = read_records_jsonl(&path).unwrap();
    assert_eq!(manifest.hash_sha256, file_sha256(&path).unwrap());
    assert_eq!(manifest.hash_sha256.len(), 64);

    write_jsonl(&path, &MIXED[..3]);
    assert_ne!(manifest.hash_sha256, file_sha256(&path).unwrap());
    assert!(default_manifest_path(&path).ends_with("hash.jsonl.manifest.json"));
}

#[test]
fn out_of_order_rows_are_flagged() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("order.jsonl");
    write_jsonl(
        &path,
        &[
            r#"{"price":100,"size":1,"side":"sell","ts_ms":2000000000000}"#,
            r#"{"price":100,"size":1,"side":"sell","ts_ms":1900000000000}"#,
        ],
    );
    let (records, manifest) = read_records_jsonl(&path).unwrap();
    assert_eq!(records.len(), 2);
    assert!(manifest.warnings.iter().any(|w| w.starts_with("non_monotonic_ts")));
}

#[test]
fn missing_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    assert!(read_records_jsonl(&dir.path().join("absent.jsonl")).is_err());
}

#[test]
fn jsonl_source_batches_and_counts() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("batches.jsonl");
    write_jsonl(&path, MIXED);

    let mut source = JsonlSource::open(&path, 2).unwrap();
    let mut sizes = Vec::new();
    loop {
        let batch = source.next_batch().unwrap();
        if batch.is_empty() {
            break;
        }
        sizes.push(batch.len());
    }
    assert_eq!(sizes, vec![2, 2, 1]);
    assert_eq!(source.stats().skipped_malformed, 2);
    assert_eq!(source.stats().trades, 3);
}
