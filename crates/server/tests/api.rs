use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use sea_orm::{ConnectOptions, Database};
use serde_json::{Value, json};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};
use tower::ServiceExt;

use engine::Engine;
use migration::MigratorTrait;
use server::types::{
    ErrorResponse,
    allocation::{AllocationDetailResponse, AllocationListResponse, AllocationView},
    source::{SourceSummaryView, SourceView},
    stats::Statistics,
    target::TargetView,
};

async fn engine() -> Engine {
    // In-memory SQLite lives and dies with its single connection.
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1).sqlx_logging(false);
    let db = Database::connect(options).await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    Engine::builder().database(db).build().await.unwrap()
}

async fn app() -> Router {
    server::router(Arc::new(engine().await))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
    send_with_key(app, method, uri, body, None).await
}

async fn send_with_key(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    key: Option<&str>,
) -> (StatusCode, Vec<u8>) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(key) = key {
        request = request.header("idempotency-key", key);
    }
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, bytes.to_vec())
}

async fn credit_note(app: &Router, total_minor: i64, currency: &str) -> SourceView {
    let (status, body) = send(
        app,
        "POST",
        "/sources",
        Some(json!({
            "kind": "credit_note",
            "currency": currency,
            "total_minor": total_minor,
            "reference": "CN-1"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    serde_json::from_slice(&body).unwrap()
}

async fn invoice(app: &Router, outstanding_minor: i64, currency: &str) -> TargetView {
    let (status, body) = send(
        app,
        "POST",
        "/targets",
        Some(json!({
            "kind": "invoice",
            "currency": currency,
            "outstanding_minor": outstanding_minor
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn allocate_and_reverse_over_http() {
    let app = app().await;
    let source = credit_note(&app, 50_000, "USD").await;
    let target = invoice(&app, 30_000, "USD").await;

    let (status, body) = send(
        &app,
        "POST",
        "/allocations",
        Some(json!({
            "source_id": source.id,
            "target_id": target.id,
            "amount_minor": 20_000,
            "currency": "USD"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let allocation: AllocationView = serde_json::from_slice(&body).unwrap();

    let (status, body) = send(&app, "GET", &format!("/sources/{}", source.id), None).await;
    assert_eq!(status, StatusCode::OK);
    let summary: SourceSummaryView = serde_json::from_slice(&body).unwrap();
    assert_eq!(summary.remaining_minor, 30_000);
    assert_eq!(summary.applied_minor, 20_000);

    let (status, body) = send(
        &app,
        "POST",
        &format!("/allocations/{}/reverse", allocation.id),
        Some(json!({ "amount_minor": 5_000, "reason": "dispute" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let reversed: AllocationView = serde_json::from_slice(&body).unwrap();
    assert_eq!(reversed.reversed_minor, 5_000);

    let (status, body) = send(&app, "GET", &format!("/allocations/{}", allocation.id), None).await;
    assert_eq!(status, StatusCode::OK);
    let detail: AllocationDetailResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(detail.reversals.len(), 1);
    assert_eq!(detail.reversals[0].reason.as_deref(), Some("dispute"));

    let (status, body) = send(&app, "GET", &format!("/targets/{}", target.id), None).await;
    assert_eq!(status, StatusCode::OK);
    let target: TargetView = serde_json::from_slice(&body).unwrap();
    assert_eq!(target.outstanding_minor, 15_000);
}

#[tokio::test]
async fn over_allocation_is_422_with_kind() {
    let app = app().await;
    let source = credit_note(&app, 50_000, "USD").await;
    let target = invoice(&app, 10_000, "USD").await;

    let (status, body) = send(
        &app,
        "POST",
        "/allocations",
        Some(json!({
            "source_id": source.id,
            "target_id": target.id,
            "amount_minor": 15_000,
            "currency": "USD"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let error: ErrorResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(error.kind.as_deref(), Some("target_over_allocation"));
}

#[tokio::test]
async fn batch_rejection_reports_index() {
    let app = app().await;
    let source = credit_note(&app, 10_000, "EUR").await;
    let first = invoice(&app, 10_000, "EUR").await;
    let second = invoice(&app, 10_000, "EUR").await;

    let (status, body) = send(
        &app,
        "POST",
        "/allocations/batch",
        Some(json!({
            "items": [
                { "source_id": source.id, "target_id": first.id, "amount_minor": 4_000, "currency": "EUR" },
                { "source_id": source.id, "target_id": second.id, "amount_minor": 7_000, "currency": "EUR" }
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let error: ErrorResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(error.kind.as_deref(), Some("insufficient_source_balance"));
    assert_eq!(error.index, Some(1));

    let (_, body) = send(&app, "GET", &format!("/sources/{}/allocations", source.id), None).await;
    let list: AllocationListResponse = serde_json::from_slice(&body).unwrap();
    assert!(list.allocations.is_empty());
}

#[tokio::test]
async fn idempotency_key_header_deduplicates() {
    let app = app().await;
    let source = credit_note(&app, 10_000, "USD").await;
    let target = invoice(&app, 10_000, "USD").await;
    let body = json!({
        "source_id": source.id,
        "target_id": target.id,
        "amount_minor": 1_000,
        "currency": "USD"
    });

    let (status, first) =
        send_with_key(&app, "POST", "/allocations", Some(body.clone()), Some("req-1")).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, second) =
        send_with_key(&app, "POST", "/allocations", Some(body), Some("req-1")).await;
    assert_eq!(status, StatusCode::CREATED);

    let first: AllocationView = serde_json::from_slice(&first).unwrap();
    let second: AllocationView = serde_json::from_slice(&second).unwrap();
    assert_eq!(first.id, second.id);

    let (status, body) = send_with_key(
        &app,
        "POST",
        "/allocations",
        Some(json!({
            "source_id": source.id,
            "target_id": target.id,
            "amount_minor": 2_000,
            "currency": "USD"
        })),
        Some("req-1"),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    let error: ErrorResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(error.kind.as_deref(), Some("idempotency_key_reused"));
}

#[tokio::test]
async fn void_and_target_lifecycle() {
    let app = app().await;
    let source = credit_note(&app, 10_000, "USD").await;
    let target = invoice(&app, 10_000, "USD").await;

    let (status, body) = send(&app, "POST", &format!("/targets/{}/close", target.id), None).await;
    assert_eq!(status, StatusCode::OK);
    let closed: TargetView = serde_json::from_slice(&body).unwrap();
    assert_eq!(closed.status, server::types::target::TargetStatus::Closed);

    let (status, _) = send(&app, "POST", &format!("/targets/{}/reopen", target.id), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, "POST", &format!("/sources/{}/void", source.id), None).await;
    assert_eq!(status, StatusCode::OK);
    let voided: SourceView = serde_json::from_slice(&body).unwrap();
    assert!(voided.voided_at.is_some());

    let (status, _) = send(&app, "POST", &format!("/sources/{}/void", source.id), None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn unknown_and_malformed_requests() {
    let app = app().await;

    let (status, body) = send(
        &app,
        "GET",
        "/sources/00000000-0000-0000-0000-000000000000",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let error: ErrorResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(error.kind.as_deref(), Some("not_found"));

    let (status, _) = send(&app, "GET", "/sources/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, "POST", "/sources", Some(json!({ "kind": "credit_note" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn stats_with_rates_in_body() {
    let app = app().await;
    let usd = credit_note(&app, 10_000, "USD").await;
    credit_note(&app, 5_000, "EUR").await;
    let target = invoice(&app, 10_000, "USD").await;
    send(
        &app,
        "POST",
        "/allocations",
        Some(json!({
            "source_id": usd.id,
            "target_id": target.id,
            "amount_minor": 6_000,
            "currency": "USD"
        })),
    )
    .await;

    let (status, body) = send(
        &app,
        "POST",
        "/stats",
        Some(json!({
            "display_currency": "EUR",
            "rates": [{ "from": "USD", "to": "EUR", "rate": "0.9" }]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let stats: Statistics = serde_json::from_slice(&body).unwrap();
    assert_eq!(stats.breakdown.len(), 2);
    let converted = stats.converted.unwrap();
    assert_eq!(converted.total_minor, 14_000);
    assert_eq!(converted.applied_minor, 5_400);
    assert_eq!(converted.remaining_minor, 8_600);

    let (status, body) = send(
        &app,
        "POST",
        "/stats",
        Some(json!({ "display_currency": "GBP" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let error: ErrorResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(error.kind.as_deref(), Some("rate_unavailable"));
}

#[tokio::test]
async fn serves_requests_on_a_listener() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server::run_with_listener(engine().await, listener));

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /sources/not-a-uuid HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 400"), "{response}");
}
