use log::info;
use serde::Deserialize;

use crate::error::SpikeWatchError;
use crate::types::Instrument;

const BINANCE_FUTURES_API_URL: &str = "https://fapi.binance.com";

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    #[serde(default)]
    quote_asset: String,
    #[serde(default)]
    contract_type: String,
    #[serde(default)]
    status: String,
}

/// Resolves the set of instruments eligible for monitoring: every
/// USDT-margined perpetual currently open for trading.
#[derive(Debug, Clone)]
pub struct InstrumentCatalog {
    client: reqwest::Client,
    base_url: String,
}

impl Default for InstrumentCatalog {
    fn default() -> Self {
        Self::new(BINANCE_FUTURES_API_URL)
    }
}

impl InstrumentCatalog {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// One-shot metadata fetch. Any network, status, or decode failure is
    /// fatal to the caller's start attempt; a partial catalog is never
    /// returned.
    pub async fn resolve(&self) -> Result<Vec<Instrument>, SpikeWatchError> {
        let url = format!("{}/fapi/v1/exchangeInfo", self.base_url.trim_end_matches('/'));
        info!("fetching exchange info from {}", url);

        let info: ExchangeInfo = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let instruments = filter_tradable(info);
        if instruments.is_empty() {
            return Err(SpikeWatchError::EmptyCatalog);
        }

        info!("resolved {} tradable USDT perpetuals", instruments.len());
        Ok(instruments)
    }
}

fn filter_tradable(info: ExchangeInfo) -> Vec<Instrument> {
    let mut instruments: Vec<Instrument> = info
        .symbols
        .into_iter()
        .filter(|s| {
            s.quote_asset == "USDT" && s.contract_type == "PERPETUAL" && s.status == "TRADING"
        })
        .map(|s| Instrument::new(s.symbol))
        .collect();

    instruments.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    instruments.dedup();
    instruments
}
