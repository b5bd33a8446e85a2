//! Contact resolution: mapping the identity fields an event carries onto a
//! durable, tenant-scoped contact row.

use tracing::debug;
use uuid::Uuid;

use crate::errors::IngestError;
use crate::ingest::event::{ContactPayload, ReferencePayload};
use crate::ingest::phone::normalize_phone;
use crate::store::{Contact, NewContact, Store};

/// Finds or creates the contact for a `new_lead` event.
///
/// Resolution order: explicit reference id, then normalized phone, then
/// email, then a fresh row with whatever fields were present. Phone is the
/// only identity the store dedups on; an email-only or identity-free contact
/// may accumulate duplicates, which is accepted for low-volume sources.
pub async fn resolve_or_create(
    store: &dyn Store,
    tenant_id: Uuid,
    payload: Option<&ContactPayload>,
    reference: Option<&ReferencePayload>,
) -> Result<Contact, IngestError> {
    if let Some(contact_id) = reference.and_then(|r| r.contact_id) {
        return store
            .contact_by_id(tenant_id, contact_id)
            .await?
            .ok_or(IngestError::ContactNotFound);
    }

    let payload = payload.cloned().unwrap_or_default();
    let phone = payload.phone.as_deref().and_then(normalize_phone);
    let new = NewContact {
        tenant_id,
        name: payload.name.clone(),
        phone: phone.clone(),
        email: payload.email.clone(),
        metadata: payload.metadata.clone().unwrap_or_else(|| serde_json::json!({})),
    };

    if phone.is_some() {
        let contact = store.upsert_contact_by_phone(new).await?;
        return Ok(contact);
    }

    if let Some(email) = payload.email.as_deref() {
        if let Some(existing) = store.contact_by_email(tenant_id, email).await? {
            return Ok(existing);
        }
        return Ok(store.create_contact(new).await?);
    }

    // No identity at all: nothing to dedup on, just record what we got.
    debug!(%tenant_id, "creating contact with no phone or email");
    Ok(store.create_contact(new).await?)
}

/// Resolves the contact an activity-style event refers to, without creating
/// one. Surveys and appointments attach to people we already know; an
/// unresolvable contact is the sender's error, not a reason to invent a row.
pub async fn resolve_existing(
    store: &dyn Store,
    tenant_id: Uuid,
    payload: Option<&ContactPayload>,
    reference: Option<&ReferencePayload>,
) -> Result<Contact, IngestError> {
    if let Some(contact_id) = reference.and_then(|r| r.contact_id) {
        return store
            .contact_by_id(tenant_id, contact_id)
            .await?
            .ok_or(IngestError::ContactNotFound);
    }

    if let Some(payload) = payload {
        if let Some(phone) = payload.phone.as_deref().and_then(normalize_phone) {
            if let Some(contact) = store.contact_by_phone(tenant_id, &phone).await? {
                return Ok(contact);
            }
        }
        if let Some(email) = payload.email.as_deref() {
            if let Some(contact) = store.contact_by_email(tenant_id, email).await? {
                return Ok(contact);
            }
        }
    }

    Err(IngestError::ContactNotFound)
}

/// Looks up the contact behind a phone number on the telephony surface.
/// Calls to numbers we have never seen stay unlinked rather than minting
/// contacts out of caller-id data.
pub async fn find_by_phone(
    store: &dyn Store,
    tenant_id: Uuid,
    raw_phone: &str,
) -> Result<Option<Contact>, IngestError> {
    match normalize_phone(raw_phone) {
        Some(phone) => Ok(store.contact_by_phone(tenant_id, &phone).await?),
        None => Ok(None),
    }
}
