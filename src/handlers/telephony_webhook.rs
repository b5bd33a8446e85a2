//! Handler for telephony provider call events.
//!
//! `POST /webhooks/telephony/{tenant_slug}` receives one webhook per call
//! lifecycle stage, in no guaranteed order and possibly more than once. The
//! call row is merge-upserted per `(tenant, external_id)`; the derived
//! metrics run afterwards as secondary effects of the accumulated state.

use axum::{
    extract::{Path, State},
    response::Json,
};
use bytes::Bytes;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{info, warn};

use crate::errors::IngestError;
use crate::ingest::call::CallPatch;
use crate::ingest::event::{CallEventKind, TelephonyEvent};
use crate::ingest::{contact, lead, metrics};
use crate::state::AppState;
use crate::store::{CallUpsert, CallUpsertOutcome, LeadStatus, Tenant};

/// Handler for telephony call-state webhooks.
pub async fn handle_telephony_webhook(
    State(state): State<Arc<AppState>>,
    Path(tenant_slug): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, IngestError> {
    // Tenant resolution comes first; nothing touches call storage until the
    // slug resolves to an active tenant.
    let tenant = state
        .store
        .tenant_by_slug(&tenant_slug)
        .await?
        .filter(|t| t.active)
        .ok_or_else(|| IngestError::UnknownTenant(tenant_slug.clone()))?;

    let event: TelephonyEvent = serde_json::from_slice(&body)
        .map_err(|e| IngestError::InvalidPayload(format!("malformed call event: {e}")))?;
    if event.call_id.trim().is_empty() {
        return Err(IngestError::InvalidPayload("empty call_id".to_string()));
    }
    let kind = event.kind()?;

    // Link the call to a contact (and its latest lead) by the external
    // party's number, when we know that number. Unknown callers stay
    // unlinked rather than minting contacts from caller-id data.
    let linked_contact = match event.counterparty_number() {
        Some(number) => contact::find_by_phone(state.store.as_ref(), tenant.id, number).await?,
        None => None,
    };
    let linked_lead = match &linked_contact {
        Some(c) => lead::resolve(state.store.as_ref(), tenant.id, c.id, None).await?,
        None => None,
    };

    let patch = CallPatch::from_event(&event, kind, &state.config.connection, chrono::Utc::now());
    let outcome = state
        .store
        .upsert_call(
            tenant.id,
            CallUpsert {
                external_id: event.call_id.clone(),
                lead_id: linked_lead.as_ref().map(|l| l.id),
                contact_id: linked_contact.as_ref().map(|c| c.id),
                direction: event.direction,
                patch,
            },
        )
        .await?;

    apply_side_effects(&state, &tenant, kind, &event, &outcome).await;

    info!(
        tenant_id = %tenant.id,
        external_id = %event.call_id,
        event_type = %kind.as_str(),
        state = %outcome.call.state.as_str(),
        inserted = outcome.inserted,
        lead_id = ?outcome.call.lead_id,
        "Merged call event"
    );

    Ok(Json(json!({ "success": true })))
}

/// Post-upsert side effects: speed-to-lead and the disposition-triggered
/// lead update. Both are secondary: the call row is already committed, and
/// a failure here is logged rather than surfaced, so the provider does not
/// retry an event whose primary write succeeded.
async fn apply_side_effects(
    state: &AppState,
    tenant: &Tenant,
    kind: CallEventKind,
    event: &TelephonyEvent,
    outcome: &CallUpsertOutcome,
) {
    if outcome.first_start {
        if let Err(e) = record_speed_to_lead(state, tenant, outcome).await {
            warn!(
                tenant_id = %tenant.id,
                external_id = %outcome.call.external_id,
                error = %e,
                "Failed to record speed-to-lead"
            );
        }
    }

    if kind == CallEventKind::Dispositions {
        if let Some(disposition) = event.disposition.as_deref() {
            if metrics::disposition_indicates_appointment(disposition) {
                if let Some(lead_id) = outcome.call.lead_id {
                    if let Err(e) = state
                        .store
                        .set_lead_status(tenant.id, lead_id, LeadStatus::AppointmentBooked)
                        .await
                    {
                        warn!(
                            tenant_id = %tenant.id,
                            lead_id = %lead_id,
                            error = %e,
                            "Failed to mark lead appointment-booked from disposition"
                        );
                    } else {
                        info!(
                            tenant_id = %tenant.id,
                            lead_id = %lead_id,
                            disposition = %disposition,
                            "Disposition marked lead appointment-booked"
                        );
                    }
                }
            }
        }
    }
}

/// Computes speed-to-lead the first time a call's `started_at` is recorded:
/// only for the lead's first call, only once per lead, and only when the
/// elapsed time is plausible (non-negative, within the configured bound).
async fn record_speed_to_lead(
    state: &AppState,
    tenant: &Tenant,
    outcome: &CallUpsertOutcome,
) -> Result<(), IngestError> {
    let (lead_id, started_at) = match (outcome.call.lead_id, outcome.call.started_at) {
        (Some(lead_id), Some(started_at)) => (lead_id, started_at),
        _ => return Ok(()),
    };

    let lead = match state.store.lead_by_id(tenant.id, lead_id).await? {
        Some(lead) => lead,
        None => return Ok(()),
    };
    if lead.speed_to_lead_secs.is_some() {
        return Ok(());
    }

    // Later calls to the same lead are follow-ups, not the first response.
    let prior_calls = state.store.call_count_for_lead(tenant.id, lead_id).await?;
    if prior_calls > 1 {
        return Ok(());
    }

    match metrics::speed_to_lead(lead.created_at, started_at, state.config.speed_to_lead_max_secs) {
        Some(secs) => {
            state
                .store
                .set_lead_speed_to_lead(tenant.id, lead_id, secs)
                .await?;
            info!(
                tenant_id = %tenant.id,
                lead_id = %lead_id,
                speed_to_lead_secs = secs,
                "Recorded speed-to-lead"
            );
        }
        None => {
            // Clock skew or a stale pairing; dropping the sample beats
            // storing a nonsense metric.
            warn!(
                tenant_id = %tenant.id,
                lead_id = %lead_id,
                lead_created_at = %lead.created_at,
                call_started_at = %started_at,
                "Discarded implausible speed-to-lead sample"
            );
        }
    }

    Ok(())
}
