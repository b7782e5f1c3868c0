//! Hard desync pause and resume across reconciliation cycles.

use std::sync::Arc;
use std::time::Duration;

use quoter_core::{ClientOrderId, ManualClock, OrderSide, Price, Size};
use quoter_executor::{AdmissionError, Collaborators, LifecycleConfig, OrderLifecycleManager, PlaceParams};
use quoter_gateway::PaperGateway;
use quoter_reconcile::{ReconcileAction, ReconcileConfig, ReconciliationEngine};
use quoter_risk::{ThrottleConfig, ThrottleGuard};
use rust_decimal_macros::dec;
use tokio_util::sync::CancellationToken;

fn manager(paper: Arc<PaperGateway>, clock: Arc<ManualClock>) -> Arc<OrderLifecycleManager> {
    Arc::new(
        OrderLifecycleManager::new(LifecycleConfig::default(), paper, clock).with_collaborators(
            Collaborators {
                throttle: Arc::new(ThrottleGuard::new(ThrottleConfig {
                    max_creates_per_sec: 1_000,
                    ..Default::default()
                })),
                ..Default::default()
            },
        ),
    )
}

fn bid() -> PlaceParams {
    PlaceParams::limit("SOLUSDT", OrderSide::Buy, Size::new(dec!(1)), Price::new(dec!(150)))
}

#[tokio::test]
async fn test_hard_desync_pauses_then_clean_cycle_resumes() {
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let paper = Arc::new(PaperGateway::with_clock(clock.clone()));
    let manager = manager(paper.clone(), clock);
    let engine = ReconciliationEngine::new(Arc::clone(&manager), ReconcileConfig::default());

    let mut ids: Vec<ClientOrderId> = Vec::new();
    for _ in 0..100 {
        ids.push(manager.place(bid()).await.expect("place"));
    }
    for id in ids.iter().take(20) {
        assert!(paper.forget(id));
    }

    let first = engine.reconcile_once().await;
    assert_eq!(first.local_count, 100);
    assert_eq!(first.remote_count, 80);
    assert!((first.mismatch_ratio - 0.2).abs() < 1e-9);
    assert!(first.risk_paused);
    assert_eq!(first.actions[0], ReconcileAction::PauseQuoting);
    assert_eq!(first.orders_fixed, 20);
    assert!(ids[..20].iter().all(|id| manager.get_order(id).is_none()));

    let blocked = manager.place(bid()).await.unwrap_err();
    assert!(matches!(
        blocked.admission(),
        Some(AdmissionError::Paused { .. })
    ));

    let second = engine.reconcile_once().await;
    assert_eq!(second.mismatch_ratio, 0.0);
    assert_eq!(second.actions, vec![ReconcileAction::ResumeQuoting]);
    assert!(!second.risk_paused);
    assert!(manager.place(bid()).await.is_ok());
}

#[tokio::test]
async fn test_loop_stops_on_shutdown() {
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let paper = Arc::new(PaperGateway::with_clock(clock.clone()));
    let engine = Arc::new(ReconciliationEngine::new(
        manager(paper, clock),
        ReconcileConfig {
            interval_ms: 5,
            ..Default::default()
        },
    ));

    let shutdown = CancellationToken::new();
    let handle = Arc::clone(&engine).spawn(shutdown.clone());
    tokio::time::sleep(Duration::from_millis(30)).await;
    shutdown.cancel();
    let stats = handle.await.expect("join");

    assert!(stats.iterations >= 1);
    assert_eq!(stats.errors, 0);
    assert!(engine.cycles() >= 1);
}
