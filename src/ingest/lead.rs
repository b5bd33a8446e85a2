//! Lead resolution for events that attach to an existing engagement.

use uuid::Uuid;

use crate::errors::IngestError;
use crate::ingest::event::ReferencePayload;
use crate::store::{Lead, Store};

/// Resolves the lead an activity or call should attach to.
///
/// An explicit `reference.lead_id` must exist (tenant-scoped) or the request
/// fails; otherwise the contact's most recent lead is used. A contact with
/// no lead at all resolves to `None`; a survey from a contact whose lead
/// predates our records is still worth keeping.
pub async fn resolve(
    store: &dyn Store,
    tenant_id: Uuid,
    contact_id: Uuid,
    reference: Option<&ReferencePayload>,
) -> Result<Option<Lead>, IngestError> {
    if let Some(lead_id) = reference.and_then(|r| r.lead_id) {
        let lead = store
            .lead_by_id(tenant_id, lead_id)
            .await?
            .ok_or(IngestError::LeadNotFound(lead_id))?;
        return Ok(Some(lead));
    }

    Ok(store.latest_lead_for_contact(tenant_id, contact_id).await?)
}
