use std::fmt;
use std::str::FromStr;

/// A tradable USDT-margined perpetual contract. The symbol is held
/// lowercase, the form Binance expects in combined-stream paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Instrument(String);

impl Instrument {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Uppercase form used in operator-facing lines.
    pub fn display_symbol(&self) -> String {
        self.0.to_uppercase()
    }

    /// Name of this instrument's kline channel on the combined stream.
    pub fn stream_name(&self, timeframe: Timeframe) -> String {
        format!("{}@kline_{}", self.0, timeframe)
    }
}

/// Supported bar durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeframe {
    M1,
    M3,
    M5,
}

impl Timeframe {
    pub const ALL: [Timeframe; 3] = [Timeframe::M1, Timeframe::M3, Timeframe::M5];

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M3 => "3m",
            Timeframe::M5 => "5m",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Timeframe::M1),
            "3m" => Ok(Timeframe::M3),
            "5m" => Ok(Timeframe::M5),
            other => Err(format!(
                "unsupported timeframe {:?} (expected 1m, 3m or 5m)",
                other
            )),
        }
    }
}

/// One incremental kline update, prices already parsed. Lives only for the
/// duration of one message.
#[derive(Debug, Clone, PartialEq)]
pub struct BarUpdate {
    pub symbol: String,
    pub timeframe: String,
    pub open: f64,
    pub close: f64,
    pub closed: bool,
}

/// A closed bar whose upward move met the threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertEvent {
    pub symbol: String,
    pub timeframe: String,
    pub percent_change: f64,
    pub open: f64,
    pub close: f64,
}

impl fmt::Display for AlertEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ALERT {} | {}: {:.2}% | O: {}, C: {}",
            self.symbol, self.timeframe, self.percent_change, self.open, self.close
        )
    }
}
