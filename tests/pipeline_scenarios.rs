use liqzones::cluster::cluster;
use liqzones::signals::extract;
use liqzones::{
    Aggressor, FundingRecord, LiqSide, MarketRecord, Pipeline, QualityLabel, TradeRecord, ZoneConfig,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn trade(symbol: &str, price: f64, size: f64, side: Aggressor, ts_ms: u64) -> MarketRecord {
    MarketRecord::Trade(TradeRecord::new(symbol, price, size, side, ts_ms))
}

fn funding(rate: f64, oi: Option<f64>, ts_ms: u64) -> MarketRecord {
    funding_for("BTC", rate, oi, ts_ms)
}

fn funding_for(symbol: &str, rate: f64, oi: Option<f64>, ts_ms: u64) -> MarketRecord {
    MarketRecord::Funding(FundingRecord {
        symbol: symbol.to_string(),
        funding_rate: rate,
        open_interest: oi,
        ts_ms,
    })
}

fn pipeline() -> Pipeline {
    Pipeline::new(ZoneConfig::default()).unwrap()
}

#[test]
fn single_sell_cluster_among_noise() {
    let mut rng = StdRng::seed_from_u64(42);
    let center = 83_975.0;
    let mut records = Vec::with_capacity(1000);
    for i in 0..1000u64 {
        let ts = i * 1000;
        if i % 50 == 7 {
            let price = center * (1.0 + rng.gen_range(-0.001..0.001));
            records.push(trade("BTC", price, 0.5, Aggressor::Sell, ts));
        } else {
            // small prints well below the size threshold and never twice the average
            let price = center * (1.0 + rng.gen_range(-0.0003..0.0003));
            let size = rng.gen_range(0.01..0.015);
            let side = if rng.gen_bool(0.5) { Aggressor::Buy } else { Aggressor::Sell };
            records.push(trade("BTC", price, size, side, ts));
        }
    }

    let zones = pipeline().compute_zones(&records, None);
    assert_eq!(zones.len(), 1);
    let z = &zones[0];
    assert_eq!(z.dominant_side, LiqSide::Long);
    assert_eq!(z.count, 20);
    assert!((z.price_mean - center).abs() / center < 0.003);
    assert_eq!(z.quality_label, QualityLabel::from_score(z.quality_score));
    assert!(z.entry_low < z.price_mean && z.price_mean < z.entry_high);
}

#[test]
fn empty_input_yields_no_zones() {
    assert!(cluster(&[], 0.003).is_empty());
    assert!(extract(&[], &Default::default()).is_empty());
    let run = pipeline().run(&[], 3_600_000, None);
    assert!(run.zones.is_empty());
    assert!(run.reference_time_ms.is_none());
}

#[test]
fn extreme_funding_scales_usd_by_multiplier() {
    let trades: Vec<MarketRecord> = (1..=5)
        .map(|i| trade("BTC", 100.0 + i as f64 * 0.01, 0.5, Aggressor::Sell, i * 1000))
        .collect();
    let plain = pipeline().compute_zones(&trades, None);

    let mut with_funding = vec![funding(0.002, None, 0)];
    with_funding.extend(trades.iter().cloned());
    let boosted = pipeline().compute_zones(&with_funding, None);

    assert_eq!(plain.len(), 1);
    assert_eq!(boosted.len(), 1);
    assert!((boosted[0].total_usd / plain[0].total_usd - 1.5).abs() < 1e-9);
    assert!((boosted[0].price_mean - plain[0].price_mean).abs() < 1e-9);
}

#[test]
fn moderate_funding_changes_nothing() {
    let trades: Vec<MarketRecord> = (1..=3).map(|i| trade("BTC", 100.0, 0.5, Aggressor::Sell, i * 1000)).collect();
    let mut records = vec![funding(0.0005, None, 0)];
    records.extend(trades.iter().cloned());
    let a = pipeline().compute_zones(&trades, None);
    let b = pipeline().compute_zones(&records, None);
    assert!((a[0].total_usd - b[0].total_usd).abs() < 1e-9);
}

#[test]
fn oi_drop_doubles_recent_events_once() {
    let trades: Vec<MarketRecord> = (1..=4).map(|i| trade("BTC", 100.0, 0.5, Aggressor::Sell, i * 1000)).collect();
    let mut records = vec![funding(0.0, Some(1_000_000.0), 0)];
    records.extend(trades.iter().cloned());
    // two consecutive drops; the second must not boost the same events again
    records.push(funding(0.0, Some(900_000.0), 10_000));
    records.push(funding(0.0, Some(800_000.0), 11_000));

    let plain = pipeline().compute_zones(&trades, None);
    let confirmed = pipeline().compute_zones(&records, None);
    assert!((confirmed[0].total_usd / plain[0].total_usd - 2.0).abs() < 1e-9);
}

#[test]
fn oi_drop_on_another_market_leaves_events_alone() {
    let records = vec![
        funding_for("ETH", 0.0, Some(1000.0), 0),
        trade("BTC", 100.0, 0.5, Aggressor::Sell, 60_000),
        funding_for("ETH", 0.0, Some(800.0), 120_000),
    ];
    let events = extract(&records, &ZoneConfig::default().thresholds);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].weight, 1.0);

    let zones = pipeline().compute_zones(&records, None);
    assert_eq!(zones.len(), 1);
    assert!((zones[0].total_usd - 50.0).abs() < 1e-9);
}

#[test]
fn symbol_filter_uses_normalised_names() {
    let records = vec![
        trade("BTC-USDT", 100.0, 0.5, Aggressor::Sell, 0),
        trade("ETHUSDT", 3000.0, 5.0, Aggressor::Sell, 1),
    ];
    let cfg = ZoneConfig { symbol: Some("btcusdt".to_string()), ..Default::default() };
    let run = Pipeline::new(cfg).unwrap().run(&records, 3_600_000, None);
    assert_eq!(run.zones.len(), 1);
    assert_eq!(run.zones[0].price_mean, 100.0);
    assert_eq!(run.stats.skipped_symbol, 1);
}

#[test]
fn output_zones_are_not_mergeable() {
    let mut rng = StdRng::seed_from_u64(7);
    let records: Vec<MarketRecord> = (0..400u64)
        .map(|i| {
            let price = 100.0 + rng.gen_range(0.0..5.0);
            let side = if rng.gen_bool(0.5) { Aggressor::Buy } else { Aggressor::Sell };
            trade("BTC", price, rng.gen_range(0.1..2.0), side, i * 100)
        })
        .collect();
    let zones = pipeline().compute_zones(&records, None);
    assert!(!zones.is_empty());
    for side in [LiqSide::Long, LiqSide::Short] {
        let mut means: Vec<f64> = zones.iter().filter(|z| z.dominant_side == side).map(|z| z.price_mean).collect();
        means.sort_by(f64::total_cmp);
        for w in means.windows(2) {
            assert!((w[1] - w[0]) > 0.003 * w[0], "{} and {} should have merged", w[0], w[1]);
        }
    }
}

#[test]
fn heavier_and_newer_zones_rank_higher_in_quality() {
    let hour = 3_600_000;
    let cfg = ZoneConfig { window_minutes: 24 * 60, ..Default::default() };
    let records = vec![
        // heavy and recent
        trade("BTC", 100.0, 50.0, Aggressor::Sell, 10 * hour),
        // light and recent
        trade("BTC", 120.0, 0.2, Aggressor::Sell, 10 * hour),
        // heavy and old
        trade("BTC", 140.0, 50.0 * 100.0 / 140.0, Aggressor::Sell, hour),
    ];
    let zones = Pipeline::new(cfg).unwrap().compute_zones(&records, None);
    let q = |mean: f64| {
        zones
            .iter()
            .find(|z| (z.price_mean - mean).abs() < 1e-9)
            .map(|z| z.quality_score)
            .unwrap()
    };
    assert!(q(100.0) > q(120.0));
    assert!(q(100.0) > q(140.0));
}

#[test]
fn reference_time_defaults_to_latest_record() {
    let records = vec![
        trade("BTC", 100.0, 0.5, Aggressor::Sell, 5_000),
        trade("BTC", 101.0, 0.5, Aggressor::Sell, 9_000),
    ];
    let p = pipeline();
    assert_eq!(p.reference_time(&records), Some(9_000));
    // a reference before the second trade hides it
    let zones = p.compute_zones(&records, Some(6_000));
    assert_eq!(zones.len(), 1);
    assert_eq!(zones[0].price_mean, 100.0);
}
