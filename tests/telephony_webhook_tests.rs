//! Integration tests for the telephony webhook surface: idempotent
//! merge-upserts, derived metrics, and tenant isolation.

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use chrono::Utc;
use serde_json::{Value, json};
use tower::util::ServiceExt;

use leadwire::config::{ConnectionHeuristic, ServerConfig};
use leadwire::ingest::call::CallState;
use leadwire::{AppState, MemStore, routes};

const SECRET: &str = "wh_test_secret";
const SLUG: &str = "acme";
const PHONE: &str = "12125551234";

fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        database_url: "postgres://unused".to_string(),
        database_max_connections: 1,
        speed_to_lead_max_secs: 86_400,
        connection: ConnectionHeuristic::default(),
    }
}

fn test_app() -> (Router, Arc<MemStore>) {
    let store = Arc::new(MemStore::new());
    let tenant_id = store.add_tenant(SLUG);
    store.add_endpoint(tenant_id, SECRET, true);
    let state = AppState::new(test_config(), store.clone());
    (routes::create_app(state), store)
}

async fn post_json(app: &Router, uri: String, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&bytes).unwrap();
    (status, json)
}

async fn post_call(app: &Router, slug: &str, body: Value) -> (StatusCode, Value) {
    post_json(app, format!("/webhooks/telephony/{slug}"), body).await
}

/// Seeds a contact+lead pair through the lead webhook, as production would.
async fn seed_lead(app: &Router, phone: &str) {
    let (status, _) = post_json(
        app,
        format!("/webhooks/lead/{SECRET}"),
        json!({"contact": {"phone": phone}, "lead": {"source": "web"}}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn unknown_tenant_slug_is_rejected_without_writes() {
    let (app, store) = test_app();

    let (status, body) = post_call(
        &app,
        "no-such-tenant",
        json!({"call_id": "CA1", "event_type": "ringing"}),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["code"], json!("unknown_tenant"));
    assert_eq!(store.call_count(), 0);
}

#[tokio::test]
async fn ringing_event_creates_a_call() {
    let (app, store) = test_app();

    let (status, body) = post_call(
        &app,
        SLUG,
        json!({
            "call_id": "CA1",
            "event_type": "ringing",
            "direction": "outbound",
            "to_number": PHONE,
            "start_time": 1_700_000_000
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));

    let calls = store.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].external_id, "CA1");
    assert_eq!(calls[0].state, CallState::Ringing);
    assert_eq!(calls[0].started_at.unwrap().timestamp(), 1_700_000_000);
}

#[tokio::test]
async fn lifecycle_events_merge_into_one_row_in_any_order() {
    let ringing = json!({
        "call_id": "CA1", "event_type": "ringing",
        "start_time": 1_700_000_000
    });
    let connected = json!({
        "call_id": "CA1", "event_type": "connected",
        "agent_connected": true
    });
    let hangup = json!({
        "call_id": "CA1", "event_type": "hangup",
        "start_time": 1_700_000_000, "duration": 90,
        "recording_url": "https://rec/1.mp3"
    });

    let orders: Vec<Vec<&Value>> = vec![
        vec![&ringing, &connected, &hangup],
        vec![&hangup, &connected, &ringing],
        vec![&connected, &hangup, &ringing],
        // Duplicate replays of an already-complete sequence.
        vec![&ringing, &connected, &hangup, &hangup, &ringing, &connected],
    ];

    for order in orders {
        let (app, store) = test_app();
        for event in order {
            let (status, _) = post_call(&app, SLUG, event.clone()).await;
            assert_eq!(status, StatusCode::OK);
        }

        let calls = store.calls();
        assert_eq!(calls.len(), 1, "exactly one row per external_id");
        let call = &calls[0];
        assert_eq!(call.state, CallState::Completed);
        assert_eq!(call.started_at.unwrap().timestamp(), 1_700_000_000);
        assert!(call.connected_at.is_some());
        assert!(call.ended_at.is_some());
        assert_eq!(call.duration_secs, Some(90));
        assert_eq!(call.recording_url.as_deref(), Some("https://rec/1.mp3"));
        assert!(call.connected);
    }
}

#[tokio::test]
async fn call_links_to_contact_and_latest_lead_by_phone() {
    let (app, store) = test_app();
    seed_lead(&app, PHONE).await;

    let (status, _) = post_call(
        &app,
        SLUG,
        json!({
            "call_id": "CA1",
            "event_type": "ringing",
            "direction": "outbound",
            // Different formatting than the lead submission used.
            "to_number": "+1 (212) 555-1234",
            "start_time": Utc::now().timestamp()
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let call = &store.calls()[0];
    let contact = &store.contacts()[0];
    let lead = &store.leads()[0];
    assert_eq!(call.contact_id, Some(contact.id));
    assert_eq!(call.lead_id, Some(lead.id));
}

#[tokio::test]
async fn call_to_unknown_number_stays_unlinked() {
    let (app, store) = test_app();

    post_call(
        &app,
        SLUG,
        json!({
            "call_id": "CA1",
            "event_type": "ringing",
            "direction": "outbound",
            "to_number": "19995550000"
        }),
    )
    .await;

    let call = &store.calls()[0];
    assert!(call.contact_id.is_none());
    assert!(call.lead_id.is_none());
    // No contact is minted from caller-id data.
    assert_eq!(store.contact_count(), 0);
}

#[tokio::test]
async fn speed_to_lead_is_recorded_for_first_call() {
    let (app, store) = test_app();
    seed_lead(&app, PHONE).await;

    // First call attempt roughly ten minutes after the lead arrived.
    let start = Utc::now().timestamp() + 600;
    post_call(
        &app,
        SLUG,
        json!({
            "call_id": "CA1",
            "event_type": "ringing",
            "direction": "outbound",
            "to_number": PHONE,
            "start_time": start
        }),
    )
    .await;

    let lead = &store.leads()[0];
    let speed = lead.speed_to_lead_secs.expect("speed-to-lead stored");
    assert!((595..=605).contains(&speed), "got {speed}");
}

#[tokio::test]
async fn speed_to_lead_is_not_overwritten_by_later_calls() {
    let (app, store) = test_app();
    seed_lead(&app, PHONE).await;

    let start = Utc::now().timestamp() + 600;
    let call = |id: &str, start: i64| {
        json!({
            "call_id": id,
            "event_type": "ringing",
            "direction": "outbound",
            "to_number": PHONE,
            "start_time": start
        })
    };
    post_call(&app, SLUG, call("CA1", start)).await;
    post_call(&app, SLUG, call("CA2", start + 7_200)).await;

    let lead = &store.leads()[0];
    let speed = lead.speed_to_lead_secs.unwrap();
    assert!((595..=605).contains(&speed), "got {speed}");
}

#[tokio::test]
async fn clock_skewed_call_stores_no_speed_to_lead() {
    let (app, store) = test_app();
    seed_lead(&app, PHONE).await;

    // Provider clock says the call started an hour before the lead existed.
    let start = Utc::now().timestamp() - 3_600;
    post_call(
        &app,
        SLUG,
        json!({
            "call_id": "CA1",
            "event_type": "ringing",
            "direction": "outbound",
            "to_number": PHONE,
            "start_time": start
        }),
    )
    .await;

    assert_eq!(store.leads()[0].speed_to_lead_secs, None);
    // The call row itself is still recorded.
    assert_eq!(store.call_count(), 1);
}

#[tokio::test]
async fn booking_disposition_marks_lead() {
    let (app, store) = test_app();
    seed_lead(&app, PHONE).await;

    let (status, _) = post_call(
        &app,
        SLUG,
        json!({
            "call_id": "CA1",
            "event_type": "dispositions",
            "direction": "outbound",
            "to_number": PHONE,
            "disposition": "Client Requested Callback - Appointment Pending"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let lead = &store.leads()[0];
    assert_eq!(lead.status, "appointment_booked");
    let call = &store.calls()[0];
    assert_eq!(call.disposition.as_deref(), Some("Client Requested Callback - Appointment Pending"));
    assert_eq!(call.state, CallState::Completed);
}

#[tokio::test]
async fn non_booking_disposition_leaves_lead_alone() {
    let (app, store) = test_app();
    seed_lead(&app, PHONE).await;

    post_call(
        &app,
        SLUG,
        json!({
            "call_id": "CA1",
            "event_type": "dispositions",
            "direction": "outbound",
            "to_number": PHONE,
            "disposition": "Not Interested"
        }),
    )
    .await;

    assert_eq!(store.leads()[0].status, "new");
}

#[tokio::test]
async fn answered_call_above_threshold_is_connected() {
    let (app, store) = test_app();

    post_call(
        &app,
        SLUG,
        json!({
            "call_id": "CA1",
            "event_type": "hangup",
            "outcome": "answered",
            "duration": 120
        }),
    )
    .await;
    post_call(
        &app,
        SLUG,
        json!({
            "call_id": "CA2",
            "event_type": "hangup",
            "outcome": "answered",
            "duration": 2
        }),
    )
    .await;

    let calls = store.calls();
    let long = calls.iter().find(|c| c.external_id == "CA1").unwrap();
    let short = calls.iter().find(|c| c.external_id == "CA2").unwrap();
    assert!(long.connected);
    assert!(!short.connected);
}

#[tokio::test]
async fn unsupported_call_event_is_rejected() {
    let (app, store) = test_app();

    let (status, body) = post_call(
        &app,
        SLUG,
        json!({"call_id": "CA1", "event_type": "transferred"}),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], json!("unsupported_event"));
    assert_eq!(store.call_count(), 0);
}

#[tokio::test]
async fn missing_call_id_is_rejected() {
    let (app, store) = test_app();

    let (status, body) = post_call(&app, SLUG, json!({"event_type": "ringing"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], json!("invalid_payload"));

    let (status, _) = post_call(&app, SLUG, json!({"call_id": "  ", "event_type": "ringing"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(store.call_count(), 0);
}

#[tokio::test]
async fn same_external_id_is_separate_per_tenant() {
    let store = Arc::new(MemStore::new());
    store.add_tenant("acme");
    store.add_tenant("globex");
    let app = routes::create_app(AppState::new(test_config(), store.clone()));

    post_call(&app, "acme", json!({"call_id": "CA1", "event_type": "ringing"})).await;
    post_call(&app, "globex", json!({"call_id": "CA1", "event_type": "ringing"})).await;

    assert_eq!(store.call_count(), 2);
}
