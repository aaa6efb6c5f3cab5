use thiserror::Error;

/// Structural and configuration errors. Data-quality problems never surface
/// here; they are skipped and counted instead.
#[derive(Debug, Error)]
pub enum ZoneError {
    #[error("unknown timeframe '{0}' (valid: 1m 3m 5m 15m 30m 1h 2h 4h 6h 8h 12h 1d 3d 1w 1M)")]
    UnknownTimeframe(String),

    #[error("unknown quality level '{0}' (valid: none, weak, medium, strong)")]
    UnknownQuality(String),

    #[error("invalid config `{field}`: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    #[error("no timeframes requested")]
    NoTimeframes,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ZoneError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ZoneError::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ZoneError>;
