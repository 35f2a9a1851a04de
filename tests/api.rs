//! HTTP handlers driven directly with extracted inputs.

mod common;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::Request;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use common::*;
use relayer::api::{self, AppState, ExecuteBody, HistoryQuery, PrepareBody};
use relayer::error::RelayerError;
use relayer::types::OperationStatus;
use serde_json::json;
use tower::ServiceExt;

fn state(h: &Harness) -> AppState {
    AppState::new(h.manager.clone())
}

fn prepare_body(key_hex: String, amount: u64) -> PrepareBody {
    PrepareBody {
        public_key: key_hex,
        operation_type: "transfer".to_string(),
        params: json!({ "destination": address(200), "amount": amount }),
        timestamp: None,
    }
}

#[tokio::test]
async fn test_router_builds() {
    let h = Harness::new(FakeChain::default());
    let _ = api::router(state(&h));
}

#[tokio::test]
async fn test_prepare_execute_status() {
    let key = origin_key(1);
    let h = Harness::new(FakeChain::default().with_account(&key, 2));

    let Json(prepared) = api::prepare_operation(
        State(state(&h)),
        Ok(Json(prepare_body(key.to_hex(), 25))),
    )
    .await
    .unwrap();
    assert_eq!(prepared.expected_nonce, 3);

    let Json(executed) = api::execute_operation(
        State(state(&h)),
        Ok(Json(ExecuteBody {
            operation_id: prepared.operation_id.0.clone(),
            signature: signature_hex(),
        })),
    )
    .await
    .unwrap();
    assert_eq!(executed.operation_id, prepared.operation_id);

    let Json(view) = api::get_operation(State(state(&h)), Path(prepared.operation_id.0))
        .await
        .unwrap();
    assert_eq!(view.status, OperationStatus::Executed);
    assert_eq!(view.result_tx_ref, Some(executed.tx_reference));
}

#[tokio::test]
async fn test_prepare_response_is_camel_case() {
    let key = origin_key(2);
    let h = Harness::new(FakeChain::default().with_account(&key, 0));

    let Json(prepared) = api::prepare_operation(
        State(state(&h)),
        Ok(Json(prepare_body(key.to_hex(), 1))),
    )
    .await
    .unwrap();
    let body = serde_json::to_value(&prepared).unwrap();
    assert!(body.get("operationId").is_some());
    assert!(body.get("canonicalMessage").is_some());
    assert_eq!(body["expectedNonce"], 1);
}

#[tokio::test]
async fn test_prepare_rejects_bad_input() {
    let key = origin_key(3);
    let h = Harness::new(FakeChain::default().with_account(&key, 0));

    let bad_key = api::prepare_operation(
        State(state(&h)),
        Ok(Json(prepare_body("xyz".to_string(), 1))),
    )
    .await
    .unwrap_err();
    assert_eq!(bad_key.status_code(), StatusCode::BAD_REQUEST);

    let mut body = prepare_body(key.to_hex(), 1);
    body.operation_type = "stake".to_string();
    let bad_kind = api::prepare_operation(State(state(&h)), Ok(Json(body)))
        .await
        .unwrap_err();
    assert!(matches!(bad_kind, RelayerError::Client(_)));

    let mut body = prepare_body(key.to_hex(), 1);
    body.params = json!({ "destination": address(200), "amount": 1, "memo": "x" });
    let unknown_field = api::prepare_operation(State(state(&h)), Ok(Json(body)))
        .await
        .unwrap_err();
    assert!(matches!(unknown_field, RelayerError::Client(_)));
}

#[tokio::test]
async fn test_execute_unknown_operation() {
    let h = Harness::new(FakeChain::default());
    let err = api::execute_operation(
        State(state(&h)),
        Ok(Json(ExecuteBody {
            operation_id: "nope".to_string(),
            signature: signature_hex(),
        })),
    )
    .await
    .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    assert_eq!(err.code(), "not_found");
}

#[tokio::test]
async fn test_account_lookup_and_existence() {
    let key = origin_key(4);
    let h = Harness::new(FakeChain::default().with_account(&key, 9));

    let Json(account) = api::get_account(State(state(&h)), Path(key.to_hex()))
        .await
        .unwrap();
    assert_eq!(account.nonce, 9);

    let found = api::account_exists(State(state(&h)), Path(key.to_hex())).await;
    assert_eq!(found.status(), StatusCode::OK);

    let missing = api::account_exists(State(state(&h)), Path(origin_key(5).to_hex())).await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let malformed = api::account_exists(State(state(&h)), Path("zz".to_string())).await;
    assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);

    let err = api::get_account(State(state(&h)), Path(origin_key(5).to_hex()))
        .await
        .unwrap_err();
    assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_balance_and_history() {
    let key = origin_key(6);
    let h = Harness::new(FakeChain::default().with_account(&key, 0));

    let Json(balance) = api::get_balance(State(state(&h)), Path(key.to_hex()))
        .await
        .unwrap();
    assert_eq!(balance.lamports, 2_039_280);

    let Json(page) = api::get_history(
        State(state(&h)),
        Path(key.to_hex()),
        Ok(Query(HistoryQuery {
            page: None,
            limit: None,
        })),
    )
    .await
    .unwrap();
    assert_eq!(page.total, 0);
    assert_eq!(page.page, 1);
    assert_eq!(page.page_size, 10);
}

#[tokio::test]
async fn test_history_rejects_malformed_query() {
    let key = origin_key(7);
    let h = Harness::new(FakeChain::default().with_account(&key, 0));
    let app = api::router(state(&h));

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/accounts/{}/history?page=abc", key.to_hex()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["code"], "invalid_request");
    assert!(body["error"].as_str().is_some());
}
