use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use common::{Error, LifecycleState};

use crate::{auth::require_auth, AppState};

/// Protected inspection routes. `state` is only used by the auth layer.
pub fn api_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/api/strategies", get(get_strategies))
        .route("/api/accounts", get(get_accounts))
        .route("/api/positions", get(get_positions))
        .route("/api/trades", get(get_trades))
        .route("/api/strategies/:id/pause", post(post_pause))
        .route("/api/strategies/:id/activate", post(post_activate))
        .route("/api/strategies/:id/retire", post(post_retire))
        .route("/api/engine/resume", post(post_resume))
        .route_layer(middleware::from_fn_with_state(state, require_auth))
}

// ─── Strategies ───────────────────────────────────────────────────────────────

async fn get_strategies(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.registry.snapshot();
    let strategies: Vec<Value> = snapshot
        .entries()
        .iter()
        .map(|e| {
            json!({
                "id": e.id(),
                "name": e.profile.name,
                "kind": e.strategy.kind(),
                "state": e.state,
                "cooldown_seconds": e.profile.cooldown.as_secs(),
                "max_notional_per_trade": e.profile.max_notional_per_trade,
                "origin": e.profile.origin,
                "last_signal_at": e.last_signal_at,
                "registered_at": e.registered_at,
            })
        })
        .collect();

    Json(json!({
        "version": snapshot.version,
        "strategies": strategies,
        "rejected": state.registry.rejections(),
    }))
}

async fn post_pause(State(state): State<AppState>, Path(id): Path<String>) -> (StatusCode, Json<Value>) {
    lifecycle_response(&state, &id, state.control.pause(&id))
}

async fn post_activate(State(state): State<AppState>, Path(id): Path<String>) -> (StatusCode, Json<Value>) {
    lifecycle_response(&state, &id, state.control.activate(&id))
}

async fn post_retire(State(state): State<AppState>, Path(id): Path<String>) -> (StatusCode, Json<Value>) {
    let result = state.control.retire(&id).await;
    lifecycle_response(&state, &id, result)
}

fn lifecycle_response(
    state: &AppState,
    id: &str,
    result: common::Result<LifecycleState>,
) -> (StatusCode, Json<Value>) {
    match result {
        Ok(new_state) => (StatusCode::OK, Json(json!({ "id": id, "state": new_state }))),
        Err(e) => {
            let status = match e {
                Error::UnknownStrategy(_) => StatusCode::NOT_FOUND,
                _ => StatusCode::CONFLICT,
            };
            (
                status,
                Json(json!({
                    "id": id,
                    "error": e.to_string(),
                    "state": state.registry.state(id),
                })),
            )
        }
    }
}

// ─── Capital ──────────────────────────────────────────────────────────────────

async fn get_accounts(State(state): State<AppState>) -> Json<Value> {
    let summary = state.ledger.summary(state.min_trade_size).await;
    Json(json!({
        "generated_at": summary.generated_at,
        "total_realized_pnl": summary.total_realized_pnl(),
        "accounts": summary.strategies,
    }))
}

async fn get_positions(State(state): State<AppState>) -> Json<Value> {
    let positions = state.ledger.open_positions().await;
    Json(json!({
        "total_open": positions.len(),
        "positions": positions,
    }))
}

// ─── Trades ───────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct TradesQuery {
    strategy_id: Option<String>,
    limit: Option<usize>,
}

async fn get_trades(State(state): State<AppState>, Query(q): Query<TradesQuery>) -> Json<Value> {
    let limit = q.limit.unwrap_or(50).clamp(1, 200);
    let trades = match &q.strategy_id {
        Some(id) => {
            let mut history = state.ledger.history(id).await;
            history.reverse();
            history.truncate(limit);
            history
        }
        None => state.ledger.recent_entries(limit).await,
    };
    Json(json!({
        "trades": trades,
        "limit": limit,
    }))
}

// ─── Engine control ───────────────────────────────────────────────────────────

async fn post_resume(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let resumed = state.engine.resume().await;
    let status = if resumed {
        StatusCode::OK
    } else {
        StatusCode::CONFLICT
    };
    (
        status,
        Json(json!({
            "resumed": resumed,
            "engine": state.engine.state().await.to_string(),
        })),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use chrono::Utc;
    use common::{Direction, MarketState, Proposal, Signal, StrategyProfile};
    use engine::{EngineHandle, StrategyControl};
    use paper::Ledger;
    use strategy::{EvaluationError, Strategy, StrategyRegistry};
    use tower::ServiceExt;

    use super::*;
    use crate::router;

    struct Idle;

    impl Strategy for Idle {
        fn kind(&self) -> &str {
            "idle"
        }

        fn evaluate(&self, _: &MarketState) -> Result<Option<Proposal>, EvaluationError> {
            Ok(None)
        }
    }

    async fn state() -> AppState {
        let registry = Arc::new(StrategyRegistry::new());
        let ledger = Arc::new(Ledger::new());
        registry
            .register(
                StrategyProfile {
                    id: "a".into(),
                    name: "Alpha".into(),
                    cooldown: Duration::from_secs(30),
                    max_notional_per_trade: 0.0,
                    origin: "config:a".into(),
                },
                Arc::new(Idle),
            )
            .unwrap();
        ledger.open_account("a", 100.0).await.unwrap();
        registry.activate("a").unwrap();

        AppState {
            control: StrategyControl::new(registry.clone(), ledger.clone()),
            registry,
            ledger,
            engine: EngineHandle::new(),
            dashboard_token: Some("secret".into()),
            min_trade_size: 1.0,
        }
    }

    async fn call(state: AppState, method: &str, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        let resp = router(state)
            .oneshot(req.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn healthz_needs_no_token() {
        let (status, body) = call(state().await, "GET", "/healthz", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["engine"], "running");
        assert_eq!(body["strategies"], 1);
    }

    #[tokio::test]
    async fn protected_routes_require_the_token() {
        let (status, _) = call(state().await, "GET", "/api/strategies", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = call(state().await, "GET", "/api/strategies", Some("wrong")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let mut unset = state().await;
        unset.dashboard_token = None;
        let (status, _) = call(unset, "GET", "/api/accounts", Some("")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn strategies_and_accounts_are_listed() {
        let s = state().await;
        let (status, body) = call(s.clone(), "GET", "/api/strategies", Some("secret")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["strategies"][0]["id"], "a");
        assert_eq!(body["strategies"][0]["state"], "active");
        assert_eq!(body["strategies"][0]["kind"], "idle");

        let (_, body) = call(s, "GET", "/api/accounts", Some("secret")).await;
        assert_eq!(body["accounts"][0]["available_balance"], 100.0);
        assert_eq!(body["accounts"][0]["depleted"], false);
    }

    #[tokio::test]
    async fn trades_are_filtered_by_strategy() {
        let s = state().await;
        let signal = Signal {
            strategy_id: "a".into(),
            direction: Direction::Up,
            confidence: 0.9,
            reason: "test".into(),
            timestamp: Utc::now(),
        };
        let pos = s.ledger.open_position(&signal, "m", 0.5, 5.0).await.unwrap();
        s.ledger.close_position(&pos, 0.6, "take_profit", Utc::now()).await.unwrap();

        let (_, body) = call(s.clone(), "GET", "/api/trades?strategy_id=a&limit=10", Some("secret")).await;
        assert_eq!(body["trades"].as_array().unwrap().len(), 1);
        assert_eq!(body["trades"][0]["exit_reason"], "take_profit");

        let (_, body) = call(s, "GET", "/api/trades?strategy_id=zzz", Some("secret")).await;
        assert!(body["trades"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn lifecycle_routes_pause_activate_and_retire() {
        let s = state().await;
        let (status, body) = call(s.clone(), "POST", "/api/strategies/a/pause", Some("secret")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "paused");

        let (status, body) = call(s.clone(), "POST", "/api/strategies/a/activate", Some("secret")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "active");

        let (status, _) = call(s.clone(), "POST", "/api/strategies/zzz/pause", Some("secret")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(s.clone(), "POST", "/api/strategies/a/retire", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = call(s, "POST", "/api/strategies/a/retire", Some("secret")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "retired");
    }

    #[tokio::test]
    async fn retire_with_open_position_is_a_conflict() {
        let s = state().await;
        let signal = Signal {
            strategy_id: "a".into(),
            direction: Direction::Up,
            confidence: 0.9,
            reason: "test".into(),
            timestamp: Utc::now(),
        };
        s.ledger.open_position(&signal, "m", 0.5, 5.0).await.unwrap();

        let (status, body) = call(s.clone(), "POST", "/api/strategies/a/retire", Some("secret")).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["state"], "active");
        assert_eq!(s.registry.state("a"), Some(LifecycleState::Active));

        call(s.clone(), "POST", "/api/strategies/a/pause", Some("secret")).await;
        let (status, body) = call(s, "POST", "/api/strategies/a/retire", Some("secret")).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["state"], "paused");
    }

    #[tokio::test]
    async fn resume_only_succeeds_when_halted() {
        let s = state().await;
        let (status, body) = call(s.clone(), "POST", "/api/engine/resume", Some("secret")).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["resumed"], false);

        s.engine.halt("test").await;
        let (status, body) = call(s.clone(), "POST", "/api/engine/resume", Some("secret")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["engine"], "running");
    }
}
