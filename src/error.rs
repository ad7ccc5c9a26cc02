use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpikeWatchError {
    #[error("catalog fetch failed: {0}")]
    Catalog(#[from] reqwest::Error),

    #[error("catalog contained no tradable USDT perpetuals")]
    EmptyCatalog,

    #[error("WebSocket connection failed: {0}")]
    Handshake(#[source] tokio_tungstenite::tungstenite::Error),

    #[error("WebSocket stream error: {0}")]
    Stream(#[source] tokio_tungstenite::tungstenite::Error),

    #[error("JSON parsing error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid {field} price {value:?} for {symbol}")]
    InvalidPrice {
        symbol: String,
        field: &'static str,
        value: String,
    },

    #[error("zero open price in closed bar for {symbol}")]
    ZeroOpenPrice { symbol: String },

    #[error("threshold must be a finite non-negative percentage, got {0}")]
    InvalidThreshold(f64),
}
