//! Shared helpers for the integration suites.
#![allow(dead_code)]

use std::sync::Arc;

use regent::adapter::memory::MemoryBackend;
use regent::adapter::paper::{LimitFillMode, PaperExchange};
use regent::app::{Config, Pipeline};
use regent::bus::DispatchMode;
use regent::domain::{Candle, Symbol, Timeframe};

pub struct TestRig {
    pub backend: MemoryBackend,
    pub exchange: Arc<PaperExchange>,
    pub pipeline: Arc<Pipeline>,
}

/// A wired pipeline over the paper exchange and in-memory stores.
pub fn rig(limit_fill_mode: LimitFillMode, dispatch: DispatchMode) -> TestRig {
    let backend = MemoryBackend::new();
    let exchange = Arc::new(PaperExchange::new(limit_fill_mode));
    let pipeline = Pipeline::new(
        &Config::default(),
        exchange.clone(),
        backend.stores(),
        dispatch,
    );
    pipeline.wire();
    TestRig {
        backend,
        exchange,
        pipeline,
    }
}

/// A contiguous 5m candle series with gentle oscillation, 1-indexed by bar.
pub fn m5_series(symbol: &str, bars: std::ops::RangeInclusive<i64>) -> Vec<Candle> {
    bars.map(|i| {
        let base = 100.0 + (i as f64) * 0.05 + ((i as f64) * 0.7).sin();
        Candle {
            symbol: Symbol::new(symbol),
            timeframe: Timeframe::M5,
            close_time: i * 300_000,
            open: base - 0.1,
            high: base + 0.5,
            low: base - 0.5,
            close: base,
            volume: 10.0 + ((i as f64) * 1.3).cos().abs() * 5.0,
        }
    })
    .collect()
}

/// A 1m candle with explicit close time and close price.
pub fn m1_candle(symbol: &str, close_time: i64, close: f64) -> Candle {
    Candle {
        symbol: Symbol::new(symbol),
        timeframe: Timeframe::M1,
        close_time,
        open: close,
        high: close + 0.2,
        low: close - 0.2,
        close,
        volume: 5.0,
    }
}
