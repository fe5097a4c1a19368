use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use common::{InterfaceDecl, LifecycleState, LogicRef, StrategyDescriptor};
use integrator::{AutoIntegrator, DescriptorStatus, IntegratorSettings, MemoryDescriptorStore};
use paper::Ledger;
use strategy::{StrategyCatalog, StrategyRegistry};

fn descriptor(descriptor_id: &str, strategy_id: &str, interface: InterfaceDecl) -> StrategyDescriptor {
    StrategyDescriptor {
        descriptor_id: descriptor_id.into(),
        strategy_id: strategy_id.into(),
        name: "wallet pattern".into(),
        logic: Some(LogicRef {
            kind: "momentum".into(),
            params: BTreeMap::new(),
        }),
        interface,
        cooldown_seconds: Some(60),
        max_notional_per_trade: 5.0,
        hypothesis_confidence: 0.7,
        source: Some("0xwallet".into()),
    }
}

struct Harness {
    registry: Arc<StrategyRegistry>,
    ledger: Arc<Ledger>,
    store: Arc<MemoryDescriptorStore>,
    integrator: AutoIntegrator,
}

fn harness() -> Harness {
    let registry = Arc::new(StrategyRegistry::new());
    let ledger = Arc::new(Ledger::new());
    let store = Arc::new(MemoryDescriptorStore::new());
    let integrator = AutoIntegrator::new(
        registry.clone(),
        ledger.clone(),
        StrategyCatalog::builtin(),
        store.clone(),
        IntegratorSettings {
            initial_balance: 100.0,
            min_hypothesis_confidence: 0.5,
            default_cooldown: Duration::from_secs(30),
            min_trade_size: 5.0,
        },
    );
    Harness {
        registry,
        ledger,
        store,
        integrator,
    }
}

#[tokio::test]
async fn descriptor_without_evaluate_capability_is_rejected_for_good() {
    let h = harness();
    let no_capability = InterfaceDecl {
        capabilities: vec![],
        ..InterfaceDecl::evaluator()
    };
    h.store.submit(descriptor("d-bad", "bad", no_capability));

    let report = h.integrator.run_once().await.unwrap();
    assert!(report.admitted.is_empty());
    assert_eq!(report.rejected.len(), 1);
    assert!(matches!(
        h.store.status("d-bad"),
        Some(DescriptorStatus::Rejected(_))
    ));

    // Repeated polls never admit it.
    for _ in 0..5 {
        let report = h.integrator.run_once().await.unwrap();
        assert!(report.admitted.is_empty() && report.rejected.is_empty());
        let snapshot = h.registry.snapshot();
        assert!(snapshot.get("bad").is_none());
        assert_eq!(snapshot.active().count(), 0);
    }
    assert!(h.ledger.account("bad").await.is_none());
    assert_eq!(h.registry.rejections().len(), 1);
}

#[tokio::test]
async fn valid_descriptor_becomes_active_with_capital() {
    let h = harness();
    h.store
        .submit(descriptor("d-good", "good", InterfaceDecl::evaluator()));

    let report = h.integrator.run_once().await.unwrap();
    assert_eq!(report.admitted, vec!["good".to_string()]);
    assert_eq!(h.registry.state("good"), Some(LifecycleState::Active));
    assert_eq!(h.store.status("d-good"), Some(DescriptorStatus::Admitted));

    let account = h.ledger.account("good").await.unwrap();
    assert_eq!(account.initial_balance, 100.0);
    assert_eq!(account.available_balance, 100.0);

    let entry = h.registry.snapshot().get("good").cloned().unwrap();
    assert_eq!(entry.profile.cooldown, Duration::from_secs(60));
    assert_eq!(entry.profile.max_notional_per_trade, 5.0);
}

#[tokio::test]
async fn new_descriptor_version_is_an_unrelated_candidate() {
    let h = harness();
    h.store.submit(descriptor(
        "d-v1",
        "wallet",
        InterfaceDecl {
            input: "tweets".into(),
            ..InterfaceDecl::evaluator()
        },
    ));
    h.integrator.run_once().await.unwrap();
    assert!(h.registry.snapshot().get("wallet").is_none());

    h.store
        .submit(descriptor("d-v2", "wallet", InterfaceDecl::evaluator()));
    let report = h.integrator.run_once().await.unwrap();
    assert_eq!(report.admitted, vec!["wallet".to_string()]);
    assert_eq!(h.registry.state("wallet"), Some(LifecycleState::Active));
}
