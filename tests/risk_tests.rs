//! Risk gate behavior through the wired pipeline.

mod support;

use regent::adapter::paper::LimitFillMode;
use regent::bus::{DispatchMode, Event, EventName};
use regent::domain::{Engine, Side, Symbol, TpModel, TradePlan};
use regent::port::store::PositionStore;
use support::rig;

use parking_lot::Mutex;
use std::sync::Arc;

fn plan(symbol: &str, engine: Engine) -> TradePlan {
    TradePlan {
        symbol: Symbol::new(symbol),
        side: Side::Long,
        engine,
        entry_price: 100.0,
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

fn capture_rejections(
    rig: &support::TestRig,
) -> Arc<Mutex<Vec<String>>> {
    let rejections = Arc::new(Mutex::new(Vec::new()));
    let captured = rejections.clone();
    rig.pipeline.bus.subscribe(
        EventName::RiskRejected,
        Arc::new(move |event| {
            let captured = captured.clone();
            Box::pin(async move {
                if let Event::RiskRejected(rejection) = event {
                    captured.lock().push(rejection.reason);
                }
                Ok(())
            })
        }),
    );
    rejections
}

#[tokio::test]
async fn symbol_uniqueness_rejects_second_entry() {
    let rig = rig(LimitFillMode::Immediate, DispatchMode::Queued);
    let rejections = capture_rejections(&rig);

    rig.pipeline
        .bus
        .publish(Event::SignalGenerated(plan("BTCUSDT", Engine::Breakout)))
        .await;
    rig.pipeline
        .bus
        .publish(Event::SignalGenerated(plan("BTCUSDT", Engine::Reversal)))
        .await;

    let reasons = rejections.lock().clone();
    assert_eq!(reasons.len(), 1);
    assert!(reasons[0].contains("symbol"), "got: {}", reasons[0]);
}

#[tokio::test]
async fn portfolio_cap_rejects_when_full() {
    let rig = rig(LimitFillMode::Immediate, DispatchMode::Queued);
    let rejections = capture_rejections(&rig);

    // Baseline cap is 3 open positions; engines differ to dodge the
    // engine cooldown.
    let entries = [
        ("BTCUSDT", Engine::Breakout),
        ("ETHUSDT", Engine::Continuation),
        ("SOLUSDT", Engine::Reversal),
    ];
    for (symbol, engine) in entries {
        rig.pipeline
            .bus
            .publish(Event::SignalGenerated(plan(symbol, engine)))
            .await;
    }
    assert_eq!(rig.backend.positions.count_open().await.unwrap(), 3);
    assert!(rejections.lock().is_empty());

    // Fourth symbol, any engine: the portfolio is full.
    rig.pipeline
        .bus
        .publish(Event::SignalGenerated(plan("XRPUSDT", Engine::Breakout)))
        .await;

    let reasons = rejections.lock().clone();
    assert_eq!(reasons.len(), 1);
    assert!(
        reasons[0].contains("max open positions"),
        "got: {}",
        reasons[0]
    );
}

#[tokio::test]
async fn engine_cooldown_rejects_rapid_reentry_on_other_symbol() {
    let rig = rig(LimitFillMode::Immediate, DispatchMode::Queued);
    let rejections = capture_rejections(&rig);

    rig.pipeline
        .bus
        .publish(Event::SignalGenerated(plan("BTCUSDT", Engine::Breakout)))
        .await;
    rig.pipeline
        .bus
        .publish(Event::SignalGenerated(plan("ETHUSDT", Engine::Breakout)))
        .await;

    let reasons = rejections.lock().clone();
    assert_eq!(reasons.len(), 1);
    assert_eq!(reasons[0], "engine cooldown active");
    // Only the first signal reached the exchange.
    assert_eq!(rig.exchange.limit_placements(), 1);
}

#[tokio::test]
async fn every_decision_is_audited_with_hashes() {
    let rig = rig(LimitFillMode::Immediate, DispatchMode::Queued);

    rig.pipeline
        .bus
        .publish(Event::SignalGenerated(plan("BTCUSDT", Engine::Breakout)))
        .await;
    rig.pipeline
        .bus
        .publish(Event::SignalGenerated(plan("BTCUSDT", Engine::Reversal)))
        .await;

    let audits: Vec<_> = rig
        .backend
        .audits
        .events()
        .into_iter()
        .filter(|a| a.step == "risk.gate")
        .collect();
    assert_eq!(audits.len(), 2);
    for audit in &audits {
        assert!(audit.inputs_hash.is_some());
        assert!(audit.outputs_hash.is_some());
        let symbol = audit.metadata.get("symbol").and_then(|v| v.as_str());
        assert_eq!(symbol, Some("BTCUSDT"));
        assert!(audit.metadata.get("engine").is_some());
    }
}
