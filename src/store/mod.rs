//! Persistent store for the ingestion pipeline.
//!
//! The relational store is the only coordination point between concurrent
//! webhook requests: dedup and idempotency lean on its uniqueness
//! constraints, not on in-process locks. Handlers talk to the [`Store`]
//! trait; [`postgres::PgStore`] is the production implementation and
//! [`memory::MemStore`] backs the integration tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ingest::call::{CallPatch, CallState};
use crate::ingest::event::Direction;

pub mod memory;
pub mod postgres;

pub use memory::MemStore;
pub use postgres::PgStore;

/// Store-level failures. Everything here maps to a retryable 5xx at the
/// HTTP boundary; the sender owns the retry policy.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Row content that should be impossible under the schema constraints,
    /// e.g. an unknown state string.
    #[error("corrupt row: {0}")]
    CorruptRow(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Isolation boundary for one customer. Provisioned out of band; the
/// pipeline only ever reads tenants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// A per-tenant webhook endpoint on the lead-ingestion surface. The opaque
/// `secret` embedded in the webhook URL resolves to this row.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WebhookEndpoint {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub secret: String,
    /// Label for where this endpoint's events originate, e.g. "angi".
    pub source: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// A person identity within a tenant, independent of any particular inquiry.
/// `phone` is stored digits-only; within a tenant at most one contact exists
/// per known phone number.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Contact {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewContact {
    pub tenant_id: Uuid,
    pub name: Option<String>,
    /// Must already be normalized; the store never re-normalizes.
    pub phone: Option<String>,
    pub email: Option<String>,
    pub metadata: serde_json::Value,
}

/// Lead lifecycle states the pipeline writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    New,
    AppointmentBooked,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::New => "new",
            LeadStatus::AppointmentBooked => "appointment_booked",
        }
    }
}

/// One engagement instance tied to a contact. A contact accumulates a lead
/// per inquiry; leads are never deduplicated.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Lead {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub contact_id: Uuid,
    pub source: String,
    pub status: String,
    pub raw_event_snapshot: serde_json::Value,
    pub speed_to_lead_secs: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewLead {
    pub tenant_id: Uuid,
    pub contact_id: Uuid,
    pub source: String,
    pub status: String,
    pub raw_event_snapshot: serde_json::Value,
}

/// One call, keyed per tenant by the telephony provider's own call id.
/// Built up by merging lifecycle events that may arrive in any order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Call {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub external_id: String,
    pub lead_id: Option<Uuid>,
    pub contact_id: Option<Uuid>,
    pub direction: Option<Direction>,
    pub state: CallState,
    pub started_at: Option<DateTime<Utc>>,
    pub connected_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<i64>,
    pub disposition: Option<String>,
    pub disposition_notes: Option<String>,
    pub recording_url: Option<String>,
    /// Sticky connection flag from the heuristic in `ingest::metrics`.
    pub connected: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input to [`Store::upsert_call`]: identity for the insert path plus the
/// per-event field patch applied on either path.
#[derive(Debug, Clone)]
pub struct CallUpsert {
    pub external_id: String,
    pub lead_id: Option<Uuid>,
    pub contact_id: Option<Uuid>,
    pub direction: Option<Direction>,
    pub patch: CallPatch,
}

/// Result of a call upsert. `first_start` is true when this event was the
/// one that recorded `started_at`, which gates the speed-to-lead metric.
#[derive(Debug, Clone)]
pub struct CallUpsertOutcome {
    pub call: Call,
    pub inserted: bool,
    pub first_start: bool,
}

/// Append-only audit record for survey/appointment/activity events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub contact_id: Uuid,
    pub lead_id: Option<Uuid>,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewActivity {
    pub tenant_id: Uuid,
    pub contact_id: Uuid,
    pub lead_id: Option<Uuid>,
    pub event_type: String,
    pub event_data: serde_json::Value,
}

/// Auxiliary per-event audit row on the lead surface. Writing it is a
/// secondary effect: its failure never fails the request.
#[derive(Debug, Clone)]
pub struct NewDelivery {
    pub tenant_id: Uuid,
    pub endpoint_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
}

/// Persistence seam for the ingestion pipeline.
///
/// Every method is tenant-scoped: an id from one tenant never resolves a row
/// belonging to another.
#[async_trait]
pub trait Store: Send + Sync {
    async fn endpoint_by_secret(&self, secret: &str)
        -> Result<Option<WebhookEndpoint>, StoreError>;
    async fn tenant_by_id(&self, id: Uuid) -> Result<Option<Tenant>, StoreError>;
    async fn tenant_by_slug(&self, slug: &str) -> Result<Option<Tenant>, StoreError>;

    async fn contact_by_id(&self, tenant_id: Uuid, id: Uuid)
        -> Result<Option<Contact>, StoreError>;
    async fn contact_by_phone(
        &self,
        tenant_id: Uuid,
        phone: &str,
    ) -> Result<Option<Contact>, StoreError>;
    async fn contact_by_email(
        &self,
        tenant_id: Uuid,
        email: &str,
    ) -> Result<Option<Contact>, StoreError>;

    /// Find-or-create by `(tenant_id, phone)`. `new.phone` must be set.
    /// Concurrent first-inserts for the same number converge on one row via
    /// the partial unique index.
    async fn upsert_contact_by_phone(&self, new: NewContact) -> Result<Contact, StoreError>;

    /// Plain insert for contacts with no phone to dedup on.
    async fn create_contact(&self, new: NewContact) -> Result<Contact, StoreError>;

    async fn create_lead(&self, new: NewLead) -> Result<Lead, StoreError>;
    async fn lead_by_id(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<Lead>, StoreError>;
    async fn latest_lead_for_contact(
        &self,
        tenant_id: Uuid,
        contact_id: Uuid,
    ) -> Result<Option<Lead>, StoreError>;
    async fn set_lead_status(
        &self,
        tenant_id: Uuid,
        lead_id: Uuid,
        status: LeadStatus,
    ) -> Result<(), StoreError>;
    async fn set_lead_speed_to_lead(
        &self,
        tenant_id: Uuid,
        lead_id: Uuid,
        secs: i64,
    ) -> Result<(), StoreError>;

    /// Merge-upsert one call event, atomically per `(tenant_id, external_id)`.
    /// Field-level merge rules live in [`crate::ingest::call::apply`].
    async fn upsert_call(
        &self,
        tenant_id: Uuid,
        upsert: CallUpsert,
    ) -> Result<CallUpsertOutcome, StoreError>;
    async fn call_count_for_lead(&self, tenant_id: Uuid, lead_id: Uuid)
        -> Result<i64, StoreError>;

    async fn create_activity(&self, new: NewActivity) -> Result<Activity, StoreError>;

    /// Secondary-effect write; callers are expected to log-and-continue on
    /// failure rather than propagate.
    async fn record_delivery(&self, new: NewDelivery) -> Result<(), StoreError>;
}
