//! Postgres-backed [`Store`] implementation (sqlx).
//!
//! The uniqueness constraints this pipeline depends on live here and in the
//! migrations: `webhook_endpoints.secret`, the partial unique index on
//! `contacts (tenant_id, phone)`, and `calls (tenant_id, external_id)`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::ingest::call::{self, CallState};
use crate::ingest::event::Direction;

use super::{
    Activity, Call, CallUpsert, CallUpsertOutcome, Contact, Lead, LeadStatus, NewActivity,
    NewContact, NewDelivery, NewLead, Store, StoreError, Tenant, WebhookEndpoint,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a pool using the server configuration.
    pub async fn connect(config: &ServerConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .connect(&config.database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Applies the embedded migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("migration failed: {e}")))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// `tenants.status` is text in the schema; anything but "active" is treated
/// as inactive.
#[derive(FromRow)]
struct TenantRow {
    id: Uuid,
    name: String,
    slug: String,
    status: String,
    created_at: DateTime<Utc>,
}

impl From<TenantRow> for Tenant {
    fn from(row: TenantRow) -> Self {
        Tenant {
            id: row.id,
            name: row.name,
            slug: row.slug,
            active: row.status == "active",
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct CallRow {
    id: Uuid,
    tenant_id: Uuid,
    external_id: String,
    lead_id: Option<Uuid>,
    contact_id: Option<Uuid>,
    direction: Option<String>,
    state: String,
    started_at: Option<DateTime<Utc>>,
    connected_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    duration_secs: Option<i64>,
    disposition: Option<String>,
    disposition_notes: Option<String>,
    recording_url: Option<String>,
    connected: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CallRow> for Call {
    type Error = StoreError;

    fn try_from(row: CallRow) -> Result<Self, StoreError> {
        let state = CallState::parse(&row.state)
            .ok_or_else(|| StoreError::CorruptRow(format!("call state {:?}", row.state)))?;
        let direction = match row.direction.as_deref() {
            None => None,
            Some(raw) => Some(
                Direction::parse(raw)
                    .ok_or_else(|| StoreError::CorruptRow(format!("call direction {raw:?}")))?,
            ),
        };
        Ok(Call {
            id: row.id,
            tenant_id: row.tenant_id,
            external_id: row.external_id,
            lead_id: row.lead_id,
            contact_id: row.contact_id,
            direction,
            state,
            started_at: row.started_at,
            connected_at: row.connected_at,
            ended_at: row.ended_at,
            duration_secs: row.duration_secs,
            disposition: row.disposition,
            disposition_notes: row.disposition_notes,
            recording_url: row.recording_url,
            connected: row.connected,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const CALL_COLUMNS: &str = "id, tenant_id, external_id, lead_id, contact_id, direction, state, \
     started_at, connected_at, ended_at, duration_secs, disposition, disposition_notes, \
     recording_url, connected, created_at, updated_at";

#[async_trait]
impl Store for PgStore {
    async fn endpoint_by_secret(
        &self,
        secret: &str,
    ) -> Result<Option<WebhookEndpoint>, StoreError> {
        let endpoint = sqlx::query_as::<_, WebhookEndpoint>(
            "SELECT id, tenant_id, secret, source, active, created_at \
             FROM webhook_endpoints WHERE secret = $1",
        )
        .bind(secret)
        .fetch_optional(&self.pool)
        .await?;
        Ok(endpoint)
    }

    async fn tenant_by_id(&self, id: Uuid) -> Result<Option<Tenant>, StoreError> {
        let row = sqlx::query_as::<_, TenantRow>(
            "SELECT id, name, slug, status, created_at FROM tenants WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Tenant::from))
    }

    async fn tenant_by_slug(&self, slug: &str) -> Result<Option<Tenant>, StoreError> {
        let row = sqlx::query_as::<_, TenantRow>(
            "SELECT id, name, slug, status, created_at FROM tenants WHERE slug = $1",
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Tenant::from))
    }

    async fn contact_by_id(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Contact>, StoreError> {
        let contact = sqlx::query_as::<_, Contact>(
            "SELECT id, tenant_id, name, phone, email, metadata, created_at \
             FROM contacts WHERE tenant_id = $1 AND id = $2",
        )
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(contact)
    }

    async fn contact_by_phone(
        &self,
        tenant_id: Uuid,
        phone: &str,
    ) -> Result<Option<Contact>, StoreError> {
        let contact = sqlx::query_as::<_, Contact>(
            "SELECT id, tenant_id, name, phone, email, metadata, created_at \
             FROM contacts WHERE tenant_id = $1 AND phone = $2",
        )
        .bind(tenant_id)
        .bind(phone)
        .fetch_optional(&self.pool)
        .await?;
        Ok(contact)
    }

    async fn contact_by_email(
        &self,
        tenant_id: Uuid,
        email: &str,
    ) -> Result<Option<Contact>, StoreError> {
        let contact = sqlx::query_as::<_, Contact>(
            "SELECT id, tenant_id, name, phone, email, metadata, created_at \
             FROM contacts WHERE tenant_id = $1 AND email = $2 \
             ORDER BY created_at ASC LIMIT 1",
        )
        .bind(tenant_id)
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(contact)
    }

    async fn upsert_contact_by_phone(&self, new: NewContact) -> Result<Contact, StoreError> {
        let phone = new
            .phone
            .as_deref()
            .ok_or_else(|| StoreError::Unavailable("phone upsert without phone".to_string()))?;

        // ON CONFLICT DO NOTHING closes the lookup-then-insert race: two
        // concurrent first-events for the same number converge on one row,
        // whichever insert lost re-reads the winner.
        let inserted = sqlx::query_as::<_, Contact>(
            "INSERT INTO contacts (id, tenant_id, name, phone, email, metadata, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (tenant_id, phone) WHERE phone IS NOT NULL DO NOTHING \
             RETURNING id, tenant_id, name, phone, email, metadata, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(new.tenant_id)
        .bind(&new.name)
        .bind(phone)
        .bind(&new.email)
        .bind(&new.metadata)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(contact) = inserted {
            return Ok(contact);
        }

        self.contact_by_phone(new.tenant_id, phone)
            .await?
            .ok_or_else(|| {
                StoreError::Unavailable("contact vanished between upsert and re-read".to_string())
            })
    }

    async fn create_contact(&self, new: NewContact) -> Result<Contact, StoreError> {
        let contact = Contact {
            id: Uuid::new_v4(),
            tenant_id: new.tenant_id,
            name: new.name,
            phone: new.phone,
            email: new.email,
            metadata: new.metadata,
            created_at: Utc::now(),
        };
        sqlx::query(
            "INSERT INTO contacts (id, tenant_id, name, phone, email, metadata, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(contact.id)
        .bind(contact.tenant_id)
        .bind(&contact.name)
        .bind(&contact.phone)
        .bind(&contact.email)
        .bind(&contact.metadata)
        .bind(contact.created_at)
        .execute(&self.pool)
        .await?;
        Ok(contact)
    }

    async fn create_lead(&self, new: NewLead) -> Result<Lead, StoreError> {
        let lead = Lead {
            id: Uuid::new_v4(),
            tenant_id: new.tenant_id,
            contact_id: new.contact_id,
            source: new.source,
            status: new.status,
            raw_event_snapshot: new.raw_event_snapshot,
            speed_to_lead_secs: None,
            created_at: Utc::now(),
        };
        sqlx::query(
            "INSERT INTO leads \
             (id, tenant_id, contact_id, source, status, raw_event_snapshot, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(lead.id)
        .bind(lead.tenant_id)
        .bind(lead.contact_id)
        .bind(&lead.source)
        .bind(&lead.status)
        .bind(&lead.raw_event_snapshot)
        .bind(lead.created_at)
        .execute(&self.pool)
        .await?;
        Ok(lead)
    }

    async fn lead_by_id(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<Lead>, StoreError> {
        let lead = sqlx::query_as::<_, Lead>(
            "SELECT id, tenant_id, contact_id, source, status, raw_event_snapshot, \
             speed_to_lead_secs, created_at \
             FROM leads WHERE tenant_id = $1 AND id = $2",
        )
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(lead)
    }

    async fn latest_lead_for_contact(
        &self,
        tenant_id: Uuid,
        contact_id: Uuid,
    ) -> Result<Option<Lead>, StoreError> {
        let lead = sqlx::query_as::<_, Lead>(
            "SELECT id, tenant_id, contact_id, source, status, raw_event_snapshot, \
             speed_to_lead_secs, created_at \
             FROM leads WHERE tenant_id = $1 AND contact_id = $2 \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(tenant_id)
        .bind(contact_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(lead)
    }

    async fn set_lead_status(
        &self,
        tenant_id: Uuid,
        lead_id: Uuid,
        status: LeadStatus,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE leads SET status = $3 WHERE tenant_id = $1 AND id = $2")
            .bind(tenant_id)
            .bind(lead_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_lead_speed_to_lead(
        &self,
        tenant_id: Uuid,
        lead_id: Uuid,
        secs: i64,
    ) -> Result<(), StoreError> {
        // Computed once per lead; replays must not overwrite the first value.
        sqlx::query(
            "UPDATE leads SET speed_to_lead_secs = $3 \
             WHERE tenant_id = $1 AND id = $2 AND speed_to_lead_secs IS NULL",
        )
        .bind(tenant_id)
        .bind(lead_id)
        .bind(secs)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_call(
        &self,
        tenant_id: Uuid,
        upsert: CallUpsert,
    ) -> Result<CallUpsertOutcome, StoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query_as::<_, CallRow>(&format!(
            "SELECT {CALL_COLUMNS} FROM calls \
             WHERE tenant_id = $1 AND external_id = $2 FOR UPDATE"
        ))
        .bind(tenant_id)
        .bind(&upsert.external_id)
        .fetch_optional(&mut *tx)
        .await?;

        let outcome = match existing {
            Some(row) => {
                let mut existing_call = Call::try_from(row)?;
                let first_start = call::apply(&mut existing_call, &upsert.patch);
                existing_call.updated_at = now;

                sqlx::query(
                    "UPDATE calls SET state = $2, started_at = $3, connected_at = $4, \
                     ended_at = $5, duration_secs = $6, disposition = $7, \
                     disposition_notes = $8, recording_url = $9, connected = $10, \
                     updated_at = $11 \
                     WHERE id = $1",
                )
                .bind(existing_call.id)
                .bind(existing_call.state.as_str())
                .bind(existing_call.started_at)
                .bind(existing_call.connected_at)
                .bind(existing_call.ended_at)
                .bind(existing_call.duration_secs)
                .bind(&existing_call.disposition)
                .bind(&existing_call.disposition_notes)
                .bind(&existing_call.recording_url)
                .bind(existing_call.connected)
                .bind(existing_call.updated_at)
                .execute(&mut *tx)
                .await?;

                CallUpsertOutcome {
                    call: existing_call,
                    inserted: false,
                    first_start,
                }
            }
            None => {
                let (new_call, first_start) = call::materialize(tenant_id, &upsert, now);

                // A concurrent insert of the same external_id trips the
                // unique index here; the provider's retry lands on the
                // update path instead.
                sqlx::query(&format!(
                    "INSERT INTO calls ({CALL_COLUMNS}) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, \
                     $15, $16, $17)"
                ))
                .bind(new_call.id)
                .bind(new_call.tenant_id)
                .bind(&new_call.external_id)
                .bind(new_call.lead_id)
                .bind(new_call.contact_id)
                .bind(new_call.direction.map(|d| d.as_str()))
                .bind(new_call.state.as_str())
                .bind(new_call.started_at)
                .bind(new_call.connected_at)
                .bind(new_call.ended_at)
                .bind(new_call.duration_secs)
                .bind(&new_call.disposition)
                .bind(&new_call.disposition_notes)
                .bind(&new_call.recording_url)
                .bind(new_call.connected)
                .bind(new_call.created_at)
                .bind(new_call.updated_at)
                .execute(&mut *tx)
                .await?;

                CallUpsertOutcome {
                    call: new_call,
                    inserted: true,
                    first_start,
                }
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn call_count_for_lead(
        &self,
        tenant_id: Uuid,
        lead_id: Uuid,
    ) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM calls WHERE tenant_id = $1 AND lead_id = $2",
        )
        .bind(tenant_id)
        .bind(lead_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn create_activity(&self, new: NewActivity) -> Result<Activity, StoreError> {
        let activity = Activity {
            id: Uuid::new_v4(),
            tenant_id: new.tenant_id,
            contact_id: new.contact_id,
            lead_id: new.lead_id,
            event_type: new.event_type,
            event_data: new.event_data,
            created_at: Utc::now(),
        };
        sqlx::query(
            "INSERT INTO lead_activities \
             (id, tenant_id, contact_id, lead_id, event_type, event_data, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(activity.id)
        .bind(activity.tenant_id)
        .bind(activity.contact_id)
        .bind(activity.lead_id)
        .bind(&activity.event_type)
        .bind(&activity.event_data)
        .bind(activity.created_at)
        .execute(&self.pool)
        .await?;
        Ok(activity)
    }

    async fn record_delivery(&self, new: NewDelivery) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO deliveries \
             (id, tenant_id, endpoint_id, event_type, payload, received_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(Uuid::new_v4())
        .bind(new.tenant_id)
        .bind(new.endpoint_id)
        .bind(new.event_type)
        .bind(&new.payload)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
