//! Handler for the lead-ingestion webhook.
//!
//! `POST /webhooks/lead/{secret}` receives events from external lead sources:
//! new leads, completed surveys, booked appointments, and generic activities.
//! The path secret authenticates the sender in lieu of a full auth handshake,
//! so every failure before tenant resolution must leave zero rows behind.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use bytes::Bytes;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{info, warn};

use crate::errors::IngestError;
use crate::ingest::event::{LeadEnvelope, LeadEventKind};
use crate::ingest::{contact, lead};
use crate::state::AppState;
use crate::store::{LeadStatus, NewDelivery, NewLead, Tenant, WebhookEndpoint};

/// Resolves the path secret to an active endpoint and its active tenant.
///
/// Read-only: an unknown or deactivated token is rejected before any other
/// processing, since the caller is unauthenticated at this point.
async fn resolve_endpoint(
    state: &AppState,
    secret: &str,
) -> Result<(WebhookEndpoint, Tenant), IngestError> {
    let endpoint = state
        .store
        .endpoint_by_secret(secret)
        .await?
        .ok_or(IngestError::UnknownToken)?;

    if !endpoint.active {
        return Err(IngestError::InactiveEndpoint);
    }

    let tenant = state
        .store
        .tenant_by_id(endpoint.tenant_id)
        .await?
        .ok_or(IngestError::UnknownToken)?;

    if !tenant.active {
        return Err(IngestError::InactiveEndpoint);
    }

    Ok((endpoint, tenant))
}

/// Handler for lead-source webhook events.
///
/// The body is parsed manually from bytes so malformed JSON produces the
/// same structured error shape as every other rejection.
pub async fn handle_lead_webhook(
    State(state): State<Arc<AppState>>,
    Path(secret): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), IngestError> {
    let (endpoint, tenant) = resolve_endpoint(&state, &secret).await?;

    let raw: Value = serde_json::from_slice(&body)
        .map_err(|e| IngestError::InvalidPayload(format!("body is not valid JSON: {e}")))?;
    let envelope: LeadEnvelope = serde_json::from_value(raw.clone())
        .map_err(|e| IngestError::InvalidPayload(format!("malformed envelope: {e}")))?;

    let kind = LeadEventKind::classify(envelope.event_type.as_deref())?;

    match kind {
        LeadEventKind::NewLead => handle_new_lead(&state, &endpoint, &tenant, &envelope, raw).await,
        _ => handle_activity_event(&state, &endpoint, &tenant, &envelope, kind).await,
    }
}

/// Creates (or finds) the contact and records a new lead for it.
async fn handle_new_lead(
    state: &AppState,
    endpoint: &WebhookEndpoint,
    tenant: &Tenant,
    envelope: &LeadEnvelope,
    raw: Value,
) -> Result<(StatusCode, Json<Value>), IngestError> {
    let resolved = contact::resolve_or_create(
        state.store.as_ref(),
        tenant.id,
        envelope.contact.as_ref(),
        envelope.reference.as_ref(),
    )
    .await?;

    let lead_payload = envelope.lead.clone().unwrap_or_default();
    let lead = state
        .store
        .create_lead(NewLead {
            tenant_id: tenant.id,
            contact_id: resolved.id,
            source: lead_payload
                .source
                .unwrap_or_else(|| endpoint.source.clone()),
            status: lead_payload
                .status
                .unwrap_or_else(|| LeadStatus::New.as_str().to_string()),
            raw_event_snapshot: raw.clone(),
        })
        .await?;

    record_delivery(state, endpoint, LeadEventKind::NewLead, raw).await;

    info!(
        tenant_id = %tenant.id,
        contact_id = %resolved.id,
        lead_id = %lead.id,
        source = %lead.source,
        "Recorded new lead"
    );

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "lead_id": lead.id,
            "contact_id": resolved.id,
        })),
    ))
}

/// Attaches a survey/appointment/activity event to an existing contact, and
/// to its most recent lead when one exists.
async fn handle_activity_event(
    state: &AppState,
    endpoint: &WebhookEndpoint,
    tenant: &Tenant,
    envelope: &LeadEnvelope,
    kind: LeadEventKind,
) -> Result<(StatusCode, Json<Value>), IngestError> {
    let resolved = contact::resolve_existing(
        state.store.as_ref(),
        tenant.id,
        envelope.contact.as_ref(),
        envelope.reference.as_ref(),
    )
    .await?;

    let resolved_lead = lead::resolve(
        state.store.as_ref(),
        tenant.id,
        resolved.id,
        envelope.reference.as_ref(),
    )
    .await?;

    let activity = state
        .store
        .create_activity(crate::store::NewActivity {
            tenant_id: tenant.id,
            contact_id: resolved.id,
            lead_id: resolved_lead.as_ref().map(|l| l.id),
            event_type: kind.as_str().to_string(),
            event_data: envelope.event_data(kind),
        })
        .await?;

    // Booking an appointment also advances the lead, when there is one.
    // The activity row is the primary write; losing the status flip is
    // recoverable from the audit trail, so it does not fail the request.
    if kind == LeadEventKind::AppointmentBooked {
        if let Some(target) = resolved_lead.as_ref() {
            if let Err(e) = state
                .store
                .set_lead_status(tenant.id, target.id, LeadStatus::AppointmentBooked)
                .await
            {
                warn!(
                    tenant_id = %tenant.id,
                    lead_id = %target.id,
                    error = %e,
                    "Failed to mark lead appointment-booked"
                );
            }
        }
    }

    record_delivery(
        state,
        endpoint,
        kind,
        serde_json::to_value(&activity.event_data).unwrap_or_default(),
    )
    .await;

    info!(
        tenant_id = %tenant.id,
        contact_id = %resolved.id,
        lead_id = ?resolved_lead.as_ref().map(|l| l.id),
        activity_id = %activity.id,
        event_type = %kind.as_str(),
        "Recorded lead activity"
    );

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "contact_id": resolved.id,
            "lead_id": resolved_lead.map(|l| l.id),
            "activity_id": activity.id,
        })),
    ))
}

/// Secondary write: the per-event delivery audit row. A failure here is
/// logged and swallowed; failing the request would make the sender retry
/// and duplicate the primary entity it just created.
async fn record_delivery(
    state: &AppState,
    endpoint: &WebhookEndpoint,
    kind: LeadEventKind,
    payload: Value,
) {
    let result = state
        .store
        .record_delivery(NewDelivery {
            tenant_id: endpoint.tenant_id,
            endpoint_id: endpoint.id,
            event_type: kind.as_str().to_string(),
            payload,
        })
        .await;

    if let Err(e) = result {
        warn!(
            tenant_id = %endpoint.tenant_id,
            endpoint_id = %endpoint.id,
            event_type = %kind.as_str(),
            error = %e,
            "Failed to record delivery audit row (primary write unaffected)"
        );
    }
}
