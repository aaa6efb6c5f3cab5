//! Loosely-typed collector rows to canonical records.
//!
//! Collectors disagree on key names, number encodings and timestamp
//! formats. Everything is funnelled through `parse_record` so the core only
//! ever sees `MarketRecord`.

use chrono::DateTime;
use serde::Deserialize;
use serde_json::Value;

use crate::types::{Aggressor, Candle, FundingRecord, MarketRecord, TradeRecord};

/// Canonical market name: upper-case base asset without quote or
/// contract suffixes. `BTC-USDT`, `btcusdt`, `BTC-PERP` and `XBTUSD` all
/// map to `BTC`.
pub fn normalize_symbol(symbol: &str) -> String {
    let mut s: String = symbol
        .trim()
        .to_uppercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    for suffix in ["PERP", "SWAP", "USDT", "USDC", "USD"] {
        if s.len() > suffix.len() && s.ends_with(suffix) {
            s.truncate(s.len() - suffix.len());
        }
    }
    if s == "XBT" {
        s = "BTC".to_string();
    }
    s
}

pub fn parse_aggressor(side: &str) -> Aggressor {
    match side.trim().to_lowercase().as_str() {
        "a" | "ask" | "sell" | "s" | "short" => Aggressor::Sell,
        "b" | "bid" | "buy" | "long" => Aggressor::Buy,
        _ => Aggressor::Unknown,
    }
}

/// Number or numeric string.
fn number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Epoch milliseconds from epoch seconds, epoch milliseconds or RFC3339.
pub fn parse_timestamp(v: &Value) -> Option<u64> {
    if let Value::String(s) = v {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s.trim()) {
            return u64::try_from(dt.timestamp_millis()).ok();
        }
    }
    let raw = number(v)?;
    if !raw.is_finite() || raw < 0.0 {
        return None;
    }
    // Anything below 1e11 cannot be a plausible millisecond epoch.
    if raw < 1e11 {
        Some((raw * 1000.0).round() as u64)
    } else {
        Some(raw.round() as u64)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTrade {
    #[serde(default, alias = "coin", alias = "market")]
    pub symbol: Option<String>,
    #[serde(alias = "px", alias = "p")]
    pub price: Value,
    #[serde(alias = "sz", alias = "qty")]
    pub size: Value,
    #[serde(default)]
    pub side: Option<String>,
    #[serde(alias = "time", alias = "timestamp", alias = "t")]
    pub ts_ms: Value,
}

impl RawTrade {
    pub fn normalize(&self, default_symbol: &str) -> Result<TradeRecord, String> {
        let price = number(&self.price).ok_or("bad price")?;
        let size = number(&self.size).ok_or("bad size")?;
        let ts_ms = parse_timestamp(&self.ts_ms).ok_or("bad timestamp")?;
        let side = self.side.as_deref().map(parse_aggressor).unwrap_or(Aggressor::Unknown);
        let symbol = self.symbol.as_deref().unwrap_or(default_symbol);
        Ok(TradeRecord::new(symbol, price, size, side, ts_ms))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawFunding {
    #[serde(default, alias = "coin", alias = "market")]
    pub symbol: Option<String>,
    #[serde(alias = "fundingRate", alias = "funding")]
    pub funding_rate: Value,
    #[serde(default, alias = "openInterest", alias = "oi")]
    pub open_interest: Option<Value>,
    #[serde(alias = "time", alias = "timestamp", alias = "t")]
    pub ts_ms: Value,
}

impl RawFunding {
    pub fn normalize(&self, default_symbol: &str) -> Result<FundingRecord, String> {
        let funding_rate = number(&self.funding_rate).ok_or("bad funding_rate")?;
        let open_interest = match &self.open_interest {
            None | Some(Value::Null) => None,
            Some(v) => Some(number(v).ok_or("bad open_interest")?),
        };
        let ts_ms = parse_timestamp(&self.ts_ms).ok_or("bad timestamp")?;
        let symbol = self.symbol.as_deref().unwrap_or(default_symbol);
        Ok(FundingRecord {
            symbol: symbol.to_string(),
            funding_rate,
            open_interest,
            ts_ms,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawCandle {
    #[serde(default, alias = "coin", alias = "market")]
    pub symbol: Option<String>,
    #[serde(alias = "time", alias = "timestamp", alias = "t")]
    pub ts_ms: Value,
    #[serde(alias = "o")]
    pub open: Value,
    #[serde(alias = "h")]
    pub high: Value,
    #[serde(alias = "l")]
    pub low: Value,
    #[serde(alias = "c")]
    pub close: Value,
    #[serde(default, alias = "v")]
    pub volume: Option<Value>,
}

impl RawCandle {
    pub fn normalize(&self) -> Result<Candle, String> {
        Ok(Candle {
            symbol: self.symbol.clone(),
            ts_ms: parse_timestamp(&self.ts_ms).ok_or("bad timestamp")?,
            open: number(&self.open).ok_or("bad open")?,
            high: number(&self.high).ok_or("bad high")?,
            low: number(&self.low).ok_or("bad low")?,
            close: number(&self.close).ok_or("bad close")?,
            volume: self.volume.as_ref().and_then(number).unwrap_or(0.0),
        })
    }
}

/// Which record a keyed object most likely is. An explicit `kind` wins.
fn record_kind(obj: &serde_json::Map<String, Value>) -> &'static str {
    match obj.get("kind").and_then(Value::as_str) {
        Some("trade") => return "trade",
        Some("funding") => return "funding",
        Some("candle") => return "candle",
        _ => {}
    }
    if ["funding_rate", "fundingRate", "funding"].iter().any(|k| obj.contains_key(*k)) {
        "funding"
    } else if ["open", "o"].iter().any(|k| obj.contains_key(*k)) && ["close", "c"].iter().any(|k| obj.contains_key(*k)) {
        "candle"
    } else {
        "trade"
    }
}

/// Normalise one JSON object. `default_symbol` fills rows without one.
pub fn parse_record(value: &Value, default_symbol: &str) -> Result<MarketRecord, String> {
    let obj = match value {
        Value::Object(obj) => obj,
        _ => return Err("not an object".to_string()),
    };
    // Some collectors wrap the payload: {"channel": .., "data": {..}}
    if let Some(inner) = obj.get("data").filter(|v| v.is_object()) {
        return parse_record(inner, default_symbol);
    }
    // Canonical rows keep their millisecond timestamps verbatim.
    if obj.contains_key("kind") {
        if let Ok(rec) = serde_json::from_value::<MarketRecord>(value.clone()) {
            return Ok(rec);
        }
    }
    let mut fields = obj.clone();
    let kind = record_kind(&fields);
    fields.remove("kind");
    let value = Value::Object(fields);
    let de_err = |e: serde_json::Error| e.to_string();
    match kind {
        "funding" => {
            let raw: RawFunding = serde_json::from_value(value).map_err(de_err)?;
            raw.normalize(default_symbol).map(MarketRecord::Funding)
        }
        "candle" => {
            let raw: RawCandle = serde_json::from_value(value).map_err(de_err)?;
            raw.normalize().map(MarketRecord::Candle)
        }
        _ => {
            let raw: RawTrade = serde_json::from_value(value).map_err(de_err)?;
            raw.normalize(default_symbol).map(MarketRecord::Trade)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_symbol() {
        assert_eq!(normalize_symbol("BTC-USDT"), "BTC");
        assert_eq!(normalize_symbol("btcusdt"), "BTC");
        assert_eq!(normalize_symbol("BTC-PERP"), "BTC");
        assert_eq!(normalize_symbol("XBTUSD"), "BTC");
        assert_eq!(normalize_symbol("ETH"), "ETH");
        assert_eq!(normalize_symbol("USDT"), "USDT");
    }

    #[test]
    fn test_parse_aggressor() {
        assert_eq!(parse_aggressor("A"), Aggressor::Sell);
        assert_eq!(parse_aggressor("B"), Aggressor::Buy);
        assert_eq!(parse_aggressor("Sell"), Aggressor::Sell);
        assert_eq!(parse_aggressor("bid"), Aggressor::Buy);
        assert_eq!(parse_aggressor("?"), Aggressor::Unknown);
    }

    #[test]
    fn test_timestamp_formats() {
        assert_eq!(parse_timestamp(&json!(1_700_000_000)), Some(1_700_000_000_000));
        assert_eq!(parse_timestamp(&json!(1_700_000_000_123u64)), Some(1_700_000_000_123));
        assert_eq!(parse_timestamp(&json!("2023-11-14T22:13:20Z")), Some(1_700_000_000_000));
        assert_eq!(parse_timestamp(&json!("yesterday")), None);
    }

    #[test]
    fn test_trade_key_variants() {
        let rec = parse_record(
            &json!({"coin": "BTC", "px": "83975.5", "sz": "0.25", "side": "A", "time": 1_700_000_000_000u64}),
            "UNKNOWN",
        )
        .unwrap();
        match rec {
            MarketRecord::Trade(t) => {
                assert_eq!(t.symbol, "BTC");
                assert!((t.price - 83975.5).abs() < 1e-9);
                assert_eq!(t.side, Aggressor::Sell);
            }
            other => panic!("expected trade, got {:?}", other),
        }

        let rec = parse_record(&json!({"price": 10, "qty": 1, "t": 5}), "ETH").unwrap();
        assert!(matches!(rec, MarketRecord::Trade(ref t) if t.symbol == "ETH" && t.side == Aggressor::Unknown));
    }

    #[test]
    fn test_funding_and_candle_detection() {
        let rec = parse_record(
            &json!({"symbol": "BTC", "fundingRate": "0.0012", "openInterest": 1000.0, "timestamp": 1}),
            "BTC",
        )
        .unwrap();
        assert!(matches!(rec, MarketRecord::Funding(ref f) if f.open_interest == Some(1000.0)));

        let rec = parse_record(&json!({"t": 1, "o": 1, "h": 2, "l": 0.5, "c": 1.5}), "BTC").unwrap();
        assert!(matches!(rec, MarketRecord::Candle(ref c) if c.volume == 0.0 && c.symbol.is_none()));

        let rec = parse_record(&json!({"coin": "ETH", "t": 1, "o": 1, "h": 2, "l": 0.5, "c": 1.5}), "BTC").unwrap();
        assert!(matches!(rec, MarketRecord::Candle(ref c) if c.symbol.as_deref() == Some("ETH")));
    }

    #[test]
    fn test_wrapped_and_tagged_rows() {
        let rec = parse_record(&json!({"channel": "trades", "data": {"p": 1, "sz": 2, "t": 3}}), "BTC").unwrap();
        assert_eq!(rec.ts_ms(), 3000);
        let rec = parse_record(
            &json!({"kind": "trade", "symbol": "BTC", "price": 1.0, "size": 2.0, "side": "buy", "ts_ms": 1_700_000_000_000u64}),
            "BTC",
        )
        .unwrap();
        assert!(matches!(rec, MarketRecord::Trade(ref t) if t.side == Aggressor::Buy));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse_record(&json!([1, 2]), "BTC").is_err());
        assert!(parse_record(&json!({"price": "abc", "size": 1, "t": 1}), "BTC").is_err());
        assert!(parse_record(&json!({"size": 1, "t": 1}), "BTC").is_err());
    }
}
