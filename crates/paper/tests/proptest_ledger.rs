use chrono::{Duration, Utc};
use common::{Direction, Signal};
use paper::Ledger;
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Open { strategy: usize, up: bool, notional: f64, entry: f64 },
    Close { strategy: usize, exit: f64 },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0usize..3, any::<bool>(), 0.01f64..200.0, 0.001f64..1.0).prop_map(
            |(strategy, up, notional, entry)| Op::Open { strategy, up, notional, entry }
        ),
        (0usize..3, 0.0f64..1.0).prop_map(|(strategy, exit)| Op::Close { strategy, exit }),
    ]
}

const IDS: [&str; 3] = ["a", "b", "c"];

proptest! {
    /// Any interleaving of opens and closes keeps every account's balance
    /// identity intact and never drives a balance negative.
    #[test]
    fn conservation_holds_for_any_operation_sequence(
        balances in proptest::collection::vec(0.0f64..500.0, 3),
        ops in proptest::collection::vec(op(), 1..60),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let ledger = Ledger::new();
            for (id, balance) in IDS.iter().zip(&balances) {
                ledger.open_account(id, *balance).await.unwrap();
            }

            let t0 = Utc::now();
            for (step, op) in ops.into_iter().enumerate() {
                let at = t0 + Duration::seconds(step as i64);
                match op {
                    Op::Open { strategy, up, notional, entry } => {
                        let signal = Signal {
                            strategy_id: IDS[strategy].into(),
                            direction: if up { Direction::Up } else { Direction::Down },
                            confidence: 0.7,
                            reason: "prop".into(),
                            timestamp: at,
                        };
                        // Refusals are expected; they must leave the account intact.
                        let _ = ledger.open_position(&signal, "m", entry, notional).await;
                    }
                    Op::Close { strategy, exit } => {
                        if let Some(pos) = ledger.position(IDS[strategy]).await {
                            ledger.close_position(&pos, exit, "prop", at).await.unwrap();
                        }
                    }
                }

                ledger.check_conservation().await.unwrap();
                for account in ledger.accounts().await {
                    assert!(account.available_balance >= -1e-9);
                }
            }
        });
    }
}
