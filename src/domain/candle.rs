//! Candlestick bars and timeframes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::id::Symbol;
use crate::error::{Error, Result};

/// Candle timeframe consumed by the pipeline.
///
/// Only polled, finalized candles are ingested; the regime engine runs on
/// the 5m stream, the breakout engine on the 1m stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
}

impl Timeframe {
    /// Bar interval in milliseconds.
    #[must_use]
    pub const fn interval_ms(self) -> i64 {
        match self {
            Self::M1 => 60_000,
            Self::M5 => 300_000,
        }
    }

    /// EWMA variance decay used for this timeframe's log returns.
    #[must_use]
    pub const fn ewma_lambda(self) -> f64 {
        match self {
            Self::M1 => 0.94,
            Self::M5 => 0.97,
        }
    }

    /// The interval string used on the exchange wire (`1m`, `5m`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M5 => "5m",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "1m" => Ok(Self::M1),
            "5m" => Ok(Self::M5),
            other => Err(Error::Config(format!("unknown timeframe: {other}"))),
        }
    }
}

/// A single finalized or in-progress candlestick bar.
///
/// Uniquely keyed by (symbol, timeframe, close_time). All prices are
/// non-negative finite floats; `close_time` is epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: Symbol,
    pub timeframe: Timeframe,
    /// Epoch milliseconds at which this bar closes.
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Validate the bar invariants: low ≤ open, close ≤ high and volume ≥ 0,
    /// with every field finite.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] describing the violated invariant.
    pub fn validate(&self) -> Result<()> {
        let fields = [self.open, self.high, self.low, self.close, self.volume];
        if fields.iter().any(|v| !v.is_finite()) {
            return Err(Error::Validation(format!(
                "non-finite candle field for {} {} at {}",
                self.symbol, self.timeframe, self.close_time
            )));
        }
        if self.low > self.open
            || self.low > self.close
            || self.high < self.open
            || self.high < self.close
        {
            return Err(Error::Validation(format!(
                "candle range violated for {} {} at {}: low {} high {} open {} close {}",
                self.symbol,
                self.timeframe,
                self.close_time,
                self.low,
                self.high,
                self.open,
                self.close
            )));
        }
        if self.volume < 0.0 {
            return Err(Error::Validation(format!(
                "negative volume for {} {} at {}",
                self.symbol, self.timeframe, self.close_time
            )));
        }
        Ok(())
    }

    /// A bar is closed once its close time has passed.
    #[must_use]
    pub const fn is_closed(&self, now_ms: i64) -> bool {
        self.close_time <= now_ms
    }
}
