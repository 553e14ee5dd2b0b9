//! Signal-to-position flow through risk, execution, and the manager.

mod support;

use regent::adapter::paper::LimitFillMode;
use regent::bus::{DispatchMode, Event};
use regent::domain::{Engine, LifecycleState, Side, Symbol, TpModel, TradePlan};
use regent::port::store::PositionStore;
use support::{m1_candle, rig};

fn plan(symbol: &str, entry: f64) -> TradePlan {
    TradePlan {
        symbol: Symbol::new(symbol),
        side: Side::Long,
        engine: Engine::Breakout,
        entry_price: entry,
        stop_pct: 1.0,
        atr_pct: 1.0,
        tp_model: TpModel::A,
        leverage: 5.0,
        margin_pct: 10.0,
        expires_at: i64::MAX,
        reason: "test".to_string(),
        params_version_id: "baseline".to_string(),
        confidence: 0.7,
    }
}

#[tokio::test]
async fn approved_signal_opens_a_managed_position() {
    let rig = rig(LimitFillMode::Immediate, DispatchMode::Queued);
    let symbol = Symbol::new("BTCUSDT");

    rig.pipeline
        .bus
        .publish(Event::SignalGenerated(plan("BTCUSDT", 100.0)))
        .await;

    // Risk sized it, execution filled it, the manager adopted it.
    assert_eq!(rig.exchange.limit_placements(), 1);
    assert_eq!(rig.backend.positions.count_open().await.unwrap(), 1);
    assert_eq!(rig.pipeline.positions.managed_count(), 1);
    assert_eq!(
        rig.pipeline.positions.lifecycle_state(&symbol),
        LifecycleState::InPosition
    );

    let open = rig.backend.positions.open_for(&symbol).await.unwrap();
    assert_eq!(open.len(), 1);
    assert!((open[0].entry_price - 100.0).abs() < 1e-9);
    assert!((open[0].initial_stop_price - 99.0).abs() < 1e-9);
    // Sizing: 10_000 equity · 10% margin · 5x / 100 = 50.
    assert!((open[0].qty - 50.0).abs() < 1e-9);
}

#[tokio::test]
async fn same_signal_twice_places_one_exchange_order() {
    let rig = rig(LimitFillMode::Immediate, DispatchMode::Queued);
    let symbol = Symbol::new("BTCUSDT");

    rig.pipeline
        .bus
        .publish(Event::SignalGenerated(plan("BTCUSDT", 100.0)))
        .await;
    rig.pipeline
        .bus
        .publish(Event::SignalGenerated(plan("BTCUSDT", 100.0)))
        .await;

    // The second pass dies at the risk gate (position already open), and
    // even a direct re-execution would be suppressed by the idempotency
    // key; either way the exchange saw exactly one limit order.
    assert_eq!(rig.exchange.limit_placements(), 1);
    assert_eq!(rig.backend.positions.count_open_for(&symbol).await.unwrap(), 1);
}

#[tokio::test]
async fn price_ladder_scales_out_and_trails_through_candle_updates() {
    let rig = rig(LimitFillMode::Immediate, DispatchMode::Queued);
    let symbol = Symbol::new("BTCUSDT");

    rig.pipeline
        .bus
        .publish(Event::SignalGenerated(plan("BTCUSDT", 100.0)))
        .await;

    // +1R then +2R bars, then a strong bar whose high drags the trail.
    let t = 1_700_000_060_000;
    for (i, (close, high)) in [(101.0, 101.2), (102.0, 102.2), (103.0, 103.5)]
        .into_iter()
        .enumerate()
    {
        let mut candle = m1_candle("BTCUSDT", t + i as i64 * 60_000, close);
        candle.high = high;
        rig.pipeline.bus.publish(Event::CandleClosed(candle)).await;
    }

    let open = rig.backend.positions.open_for(&symbol).await.unwrap();
    assert_eq!(open.len(), 1);
    let position = &open[0];
    assert!(position.took_1r && position.took_2r);
    // 50 → 25 (+1R) → 10 remaining after the 0.3-of-qty +2R exit.
    assert!((position.remaining_qty - 10.0).abs() < 1e-6);
    // realized_r = 1·0.5 + 2·0.3 = 1.1.
    assert!((position.realized_r - 1.1).abs() < 1e-6);
    // Trail: anchor 103.5 − 1.0 ATR of entry = 102.5.
    assert!((position.stop_price - 102.5).abs() < 1e-6);

    // Stop-out bar closes the remainder and starts the cooldown.
    rig.pipeline
        .bus
        .publish(Event::CandleClosed(m1_candle("BTCUSDT", t + 3 * 60_000, 102.0)))
        .await;
    assert_eq!(rig.backend.positions.count_open_for(&symbol).await.unwrap(), 0);
    assert_eq!(
        rig.pipeline.positions.lifecycle_state(&symbol),
        LifecycleState::Cooldown
    );
    assert!(rig
        .backend
        .positions
        .last_closed_at(&symbol)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn candles_for_other_symbols_do_not_touch_the_position() {
    let rig = rig(LimitFillMode::Immediate, DispatchMode::Queued);
    let symbol = Symbol::new("BTCUSDT");

    rig.pipeline
        .bus
        .publish(Event::SignalGenerated(plan("BTCUSDT", 100.0)))
        .await;
    rig.pipeline
        .bus
        .publish(Event::CandleClosed(m1_candle(
            "ETHUSDT",
            1_700_000_060_000,
            101.0,
        )))
        .await;

    let open = rig.backend.positions.open_for(&symbol).await.unwrap();
    assert_eq!(open.len(), 1);
    assert!(!open[0].took_1r);
    assert!((open[0].remaining_qty - open[0].qty).abs() < 1e-12);
}
