//! Wire-format parsing for exchange responses.
//!
//! Kline rows arrive either tuple-shaped
//! (`[openTime, open, high, low, close, volume, closeTime]`) or
//! object-shaped with the same field names, and numbers may be strings.

use serde_json::Value;

use crate::domain::{Candle, Symbol, Timeframe};
use crate::error::{Error, Result};

/// Parse one kline row of either shape into a candle.
pub fn parse_kline(row: &Value, symbol: &Symbol, timeframe: Timeframe) -> Result<Candle> {
    match row {
        Value::Array(fields) => {
            if fields.len() < 7 {
                return Err(Error::Validation(format!(
                    "kline tuple has {} fields, expected 7",
                    fields.len()
                )));
            }
            Ok(Candle {
                symbol: symbol.clone(),
                timeframe,
                close_time: int_field(&fields[6], "closeTime")?,
                open: num_field(&fields[1], "open")?,
                high: num_field(&fields[2], "high")?,
                low: num_field(&fields[3], "low")?,
                close: num_field(&fields[4], "close")?,
                volume: num_field(&fields[5], "volume")?,
            })
        }
        Value::Object(map) => Ok(Candle {
            symbol: symbol.clone(),
            timeframe,
            close_time: int_field(required(map, "closeTime")?, "closeTime")?,
            open: num_field(required(map, "open")?, "open")?,
            high: num_field(required(map, "high")?, "high")?,
            low: num_field(required(map, "low")?, "low")?,
            close: num_field(required(map, "close")?, "close")?,
            volume: num_field(required(map, "volume")?, "volume")?,
        }),
        other => Err(Error::Validation(format!(
            "kline row is neither tuple nor object: {other}"
        ))),
    }
}

fn required<'a>(
    map: &'a serde_json::Map<String, Value>,
    name: &str,
) -> Result<&'a Value> {
    map.get(name)
        .ok_or_else(|| Error::Validation(format!("kline object missing field: {name}")))
}

/// A float that may arrive as a JSON number or a numeric string.
fn num_field(value: &Value, name: &str) -> Result<f64> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| Error::Validation(format!("non-finite {name}: {n}"))),
        Value::String(s) => s
            .parse::<f64>()
            .map_err(|_| Error::Validation(format!("unparseable {name}: {s}"))),
        other => Err(Error::Validation(format!(
            "unexpected {name} value: {other}"
        ))),
    }
}

fn int_field(value: &Value, name: &str) -> Result<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| Error::Validation(format!("non-integer {name}: {n}"))),
        Value::String(s) => s
            .parse::<i64>()
            .map_err(|_| Error::Validation(format!("unparseable {name}: {s}"))),
        other => Err(Error::Validation(format!(
            "unexpected {name} value: {other}"
        ))),
    }
}
