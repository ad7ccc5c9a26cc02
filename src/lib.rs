//! spikewatch - spike detection over Binance USDT perpetual futures.
//!
//! The engine keeps one multiplexed kline WebSocket subscription open
//! across the whole tradable catalog, evaluates every closed bar against a
//! percentage threshold, and pushes human-readable status and alert lines
//! into an [`AlertSink`] consumed by whatever front-end hosts it.

pub mod api;
pub mod error;
pub mod monitor;
pub mod sink;
pub mod types;

// Re-export the types a host needs to drive a monitoring session.
pub use api::binance::catalog::InstrumentCatalog;
pub use api::binance::ws::{SessionState, StreamConfig, StreamSession};
pub use error::SpikeWatchError;
pub use monitor::controller::Monitor;
pub use monitor::evaluator::evaluate;
pub use sink::AlertSink;
pub use types::{AlertEvent, BarUpdate, Instrument, Timeframe};
