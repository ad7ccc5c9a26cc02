use crate::error::SpikeWatchError;
use crate::types::{AlertEvent, BarUpdate};

/// Decide whether one bar update is a spike at or beyond `threshold`
/// percent. Only closed bars are considered; bars still in progress never
/// alert, whatever their partial move. The comparison is on the signed
/// change, so a drop never alerts either.
pub fn evaluate(
    bar: &BarUpdate,
    threshold: f64,
) -> Result<Option<AlertEvent>, SpikeWatchError> {
    if !bar.closed {
        return Ok(None);
    }

    if bar.open == 0.0 {
        return Err(SpikeWatchError::ZeroOpenPrice {
            symbol: bar.symbol.clone(),
        });
    }

    let percent_change = (bar.close - bar.open) / bar.open * 100.0;
    if percent_change >= threshold {
        Ok(Some(AlertEvent {
            symbol: bar.symbol.to_uppercase(),
            timeframe: bar.timeframe.clone(),
            percent_change,
            open: bar.open,
            close: bar.close,
        }))
    } else {
        Ok(None)
    }
}
