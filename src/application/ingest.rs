//! Candle ingestion with integrity validation.
//!
//! Each poll fetches the trailing window of klines for one
//! (symbol, timeframe), validates the series as a whole, and persists
//! finalized bars that are not yet stored. Any integrity defect aborts
//! the poll for that symbol without persisting anything.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::bus::{Event, EventBus};
use crate::domain::{AuditEvent, AuditLevel, Candle, Symbol, Timeframe};
use crate::error::{Error, Result};
use crate::port::exchange::Exchange;
use crate::port::store::{CandleStore, Stores};

/// Ingest tuning.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Number of klines fetched per poll.
    pub poll_limit: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self { poll_limit: 50 }
    }
}

/// Polls the exchange and feeds `candle.closed` into the pipeline.
pub struct CandleIngest {
    exchange: Arc<dyn Exchange>,
    stores: Stores,
    bus: Arc<EventBus>,
    config: IngestConfig,
}

impl CandleIngest {
    pub fn new(
        exchange: Arc<dyn Exchange>,
        stores: Stores,
        bus: Arc<EventBus>,
        config: IngestConfig,
    ) -> Self {
        Self {
            exchange,
            stores,
            bus,
            config,
        }
    }

    /// Run one poll for a symbol and timeframe. Returns the number of
    /// `candle.closed` events published.
    ///
    /// # Errors
    ///
    /// [`Error::Integrity`] when the fetched series has duplicates, gaps
    /// or out-of-order close times (an audit event is published first);
    /// [`Error::Validation`] when a single bar violates its invariants.
    pub async fn poll(&self, symbol: &Symbol, timeframe: Timeframe) -> Result<usize> {
        let candles = self
            .exchange
            .get_klines(symbol, timeframe, self.config.poll_limit)
            .await?;
        let now = Utc::now().timestamp_millis();

        if let Err(defect) = validate_series(&candles, timeframe) {
            warn!(symbol = %symbol, timeframe = %timeframe, defect = %defect, "Rejecting poll");
            let audit = AuditEvent::new(
                now,
                "market_data_integrity.poll",
                AuditLevel::Error,
                defect.clone(),
            )
            .with_reason("market_data_integrity")
            .with_metadata(serde_json::json!({
                "symbol": symbol,
                "timeframe": timeframe,
                "fetched": candles.len(),
            }));
            self.bus.publish(Event::AuditEvent(audit)).await;
            return Err(Error::Integrity(defect));
        }

        let mut published = 0usize;
        for candle in &candles {
            if let Err(err) = candle.validate() {
                let audit = AuditEvent::new(
                    now,
                    "market_data_integrity.validate",
                    AuditLevel::Error,
                    err.to_string(),
                )
                .with_reason("market_data_integrity")
                .with_metadata(serde_json::json!({
                    "symbol": symbol,
                    "timeframe": timeframe,
                    "close_time": candle.close_time,
                }));
                self.bus.publish(Event::AuditEvent(audit)).await;
                return Err(err);
            }
            // The trailing bar may still be forming; skip it so the final
            // version is the one that lands under the unique key.
            if !candle.is_closed(now) {
                continue;
            }
            let inserted = self.stores.candles.upsert(candle).await?;
            if inserted {
                self.bus.publish(Event::CandleClosed(candle.clone())).await;
                published += 1;
            }
        }
        debug!(
            symbol = %symbol,
            timeframe = %timeframe,
            fetched = candles.len(),
            published,
            "Poll complete"
        );
        Ok(published)
    }
}

/// Whole-series integrity check: duplicates, ordering, gaps.
fn validate_series(candles: &[Candle], timeframe: Timeframe) -> std::result::Result<(), String> {
    for pair in candles.windows(2) {
        let (prev, curr) = (&pair[0], &pair[1]);
        if curr.close_time == prev.close_time {
            return Err(format!(
                "Duplicate candle for {} {} at {}",
                curr.symbol, timeframe, curr.close_time
            ));
        }
        if curr.close_time < prev.close_time {
            return Err(format!(
                "Out-of-order candle for {} {}: {} after {}",
                curr.symbol, timeframe, curr.close_time, prev.close_time
            ));
        }
        let delta = curr.close_time - prev.close_time;
        if delta > timeframe.interval_ms() {
            return Err(format!(
                "Gap detected for {} {}: {} -> {} ({}ms > {}ms)",
                curr.symbol,
                timeframe,
                prev.close_time,
                curr.close_time,
                delta,
                timeframe.interval_ms()
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(close_time: i64) -> Candle {
        Candle {
            symbol: Symbol::new("BTCUSDT"),
            timeframe: Timeframe::M1,
            close_time,
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.0,
            volume: 1.0,
        }
    }

    #[test]
    fn contiguous_series_passes() {
        let series = vec![candle(60_000), candle(120_000), candle(180_000)];
        assert!(validate_series(&series, Timeframe::M1).is_ok());
    }

    #[test]
    fn gap_is_detected() {
        let series = vec![candle(60_000), candle(240_000)];
        let defect = validate_series(&series, Timeframe::M1).unwrap_err();
        assert!(defect.contains("Gap detected"));
    }

    #[test]
    fn duplicate_is_detected() {
        let series = vec![candle(60_000), candle(60_000)];
        let defect = validate_series(&series, Timeframe::M1).unwrap_err();
        assert!(defect.contains("Duplicate"));
    }

    #[test]
    fn out_of_order_is_detected() {
        let series = vec![candle(120_000), candle(60_000)];
        let defect = validate_series(&series, Timeframe::M1).unwrap_err();
        assert!(defect.contains("Out-of-order"));
    }

    #[test]
    fn empty_and_single_pass() {
        assert!(validate_series(&[], Timeframe::M1).is_ok());
        assert!(validate_series(&[candle(60_000)], Timeframe::M1).is_ok());
    }
}
