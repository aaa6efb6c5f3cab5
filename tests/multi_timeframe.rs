use liqzones::{
    Aggressor, Candle, MarketRecord, MultiTimeframeAggregator, Pipeline, Timeframe, TradeRecord, ZoneConfig,
    ZoneError,
};

const MIN: u64 = 60_000;

fn sell(price: f64, ts_ms: u64) -> MarketRecord {
    MarketRecord::Trade(TradeRecord::new("BTC", price, 0.5, Aggressor::Sell, ts_ms))
}

fn aggregator() -> MultiTimeframeAggregator {
    MultiTimeframeAggregator::new(Pipeline::new(ZoneConfig::default()).unwrap())
}

#[test]
fn unknown_timeframe_is_rejected() {
    let records = vec![sell(100.0, 0)];
    let err = aggregator().aggregate_named(&records, &["5m", "13m"], None).unwrap_err();
    assert!(matches!(err, ZoneError::UnknownTimeframe(ref t) if t == "13m"));
    assert!(matches!(aggregator().aggregate(&records, &[], None), Err(ZoneError::NoTimeframes)));
}

#[test]
fn zones_seen_on_several_timeframes_rank_first() {
    let records = vec![sell(150.0, 0), sell(100.0, 30 * MIN), sell(100.05, 30 * MIN + 30_000)];
    let zones = aggregator().aggregate_named(&records, &["1m", "1h"], None).unwrap();

    assert_eq!(zones.len(), 3);
    assert_eq!(zones[0].alignment_score, Some(100.0));
    assert_eq!(zones[1].alignment_score, Some(100.0));
    assert!((zones[0].price_mean - 100.0).abs() < 0.1);
    assert!((zones[1].price_mean - 100.0).abs() < 0.1);

    let lone = &zones[2];
    assert_eq!(lone.price_mean, 150.0);
    assert_eq!(lone.alignment_score, Some(0.0));
    assert_eq!(lone.timeframe, Some(Timeframe::H1));
}

#[test]
fn empty_window_contributes_nothing() {
    let quiet = MarketRecord::Candle(Candle {
        symbol: None,
        ts_ms: 30 * MIN,
        open: 150.0,
        high: 150.5,
        low: 149.5,
        close: 150.0,
        volume: 1.0,
    });
    let records = vec![sell(150.0, 0), quiet];
    let zones = aggregator().aggregate_named(&records, &["1m", "1h"], None).unwrap();
    assert_eq!(zones.len(), 1);
    assert_eq!(zones[0].timeframe, Some(Timeframe::H1));
    assert_eq!(zones[0].alignment_score, Some(0.0));
}

#[test]
fn repeated_timeframes_count_once() {
    let records = vec![sell(100.0, 30 * MIN), sell(100.05, 30 * MIN + 30_000)];
    let deduped = aggregator().aggregate(&records, &[Timeframe::H1, Timeframe::H1, Timeframe::H4], None).unwrap();
    let plain = aggregator().aggregate(&records, &[Timeframe::H1, Timeframe::H4], None).unwrap();

    assert_eq!(deduped, plain);
    assert_eq!(deduped.len(), 2);
    assert!(deduped.iter().all(|z| z.alignment_score == Some(100.0)));
    assert_eq!(deduped.iter().filter(|z| z.timeframe == Some(Timeframe::H1)).count(), 1);
}

#[test]
fn single_timeframe_has_zero_alignment() {
    let records = vec![sell(100.0, 0)];
    let zones = aggregator().aggregate(&records, &[Timeframe::H4], None).unwrap();
    assert_eq!(zones.len(), 1);
    assert_eq!(zones[0].alignment_score, Some(0.0));
}

#[test]
fn no_records_no_zones() {
    assert!(aggregator().aggregate(&[], &Timeframe::ALL, None).unwrap().is_empty());
}
