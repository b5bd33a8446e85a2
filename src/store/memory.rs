//! In-memory [`Store`] for tests.
//!
//! Mirrors the Postgres implementation's observable behavior, including the
//! uniqueness guarantees: one interior lock makes every method atomic, which
//! is exactly the coverage the constraint-guarded SQL paths give.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::ingest::call;

use super::{
    Activity, Call, CallUpsert, CallUpsertOutcome, Contact, Lead, LeadStatus, NewActivity,
    NewContact, NewDelivery, NewLead, Store, StoreError, Tenant, WebhookEndpoint,
};

#[derive(Default)]
struct Inner {
    tenants: Vec<Tenant>,
    endpoints: Vec<WebhookEndpoint>,
    contacts: Vec<Contact>,
    leads: Vec<Lead>,
    calls: HashMap<(Uuid, String), Call>,
    activities: Vec<Activity>,
    deliveries: Vec<(Uuid, Uuid, String)>,
}

#[derive(Default)]
pub struct MemStore {
    inner: Mutex<Inner>,
    /// Test knob: make `record_delivery` fail to exercise secondary-effect
    /// isolation.
    fail_deliveries: AtomicBool,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_deliveries(&self, fail: bool) {
        self.fail_deliveries.store(fail, Ordering::SeqCst);
    }

    /// Seeds an active tenant, returning its id.
    pub fn add_tenant(&self, slug: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.inner.lock().tenants.push(Tenant {
            id,
            name: slug.to_string(),
            slug: slug.to_string(),
            active: true,
            created_at: Utc::now(),
        });
        id
    }

    pub fn deactivate_tenant(&self, id: Uuid) {
        let mut inner = self.inner.lock();
        if let Some(tenant) = inner.tenants.iter_mut().find(|t| t.id == id) {
            tenant.active = false;
        }
    }

    /// Seeds a lead-surface endpoint for a tenant, returning its id.
    pub fn add_endpoint(&self, tenant_id: Uuid, secret: &str, active: bool) -> Uuid {
        let id = Uuid::new_v4();
        self.inner.lock().endpoints.push(WebhookEndpoint {
            id,
            tenant_id,
            secret: secret.to_string(),
            source: "test".to_string(),
            active,
            created_at: Utc::now(),
        });
        id
    }

    pub fn contact_count(&self) -> usize {
        self.inner.lock().contacts.len()
    }

    pub fn lead_count(&self) -> usize {
        self.inner.lock().leads.len()
    }

    pub fn call_count(&self) -> usize {
        self.inner.lock().calls.len()
    }

    pub fn activity_count(&self) -> usize {
        self.inner.lock().activities.len()
    }

    pub fn delivery_count(&self) -> usize {
        self.inner.lock().deliveries.len()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().calls.values().cloned().collect()
    }

    pub fn leads(&self) -> Vec<Lead> {
        self.inner.lock().leads.clone()
    }

    pub fn contacts(&self) -> Vec<Contact> {
        self.inner.lock().contacts.clone()
    }

    pub fn activities(&self) -> Vec<Activity> {
        self.inner.lock().activities.clone()
    }
}

#[async_trait]
impl Store for MemStore {
    async fn endpoint_by_secret(
        &self,
        secret: &str,
    ) -> Result<Option<WebhookEndpoint>, StoreError> {
        Ok(self
            .inner
            .lock()
            .endpoints
            .iter()
            .find(|e| e.secret == secret)
            .cloned())
    }

    async fn tenant_by_id(&self, id: Uuid) -> Result<Option<Tenant>, StoreError> {
        Ok(self.inner.lock().tenants.iter().find(|t| t.id == id).cloned())
    }

    async fn tenant_by_slug(&self, slug: &str) -> Result<Option<Tenant>, StoreError> {
        Ok(self
            .inner
            .lock()
            .tenants
            .iter()
            .find(|t| t.slug == slug)
            .cloned())
    }

    async fn contact_by_id(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Contact>, StoreError> {
        Ok(self
            .inner
            .lock()
            .contacts
            .iter()
            .find(|c| c.tenant_id == tenant_id && c.id == id)
            .cloned())
    }

    async fn contact_by_phone(
        &self,
        tenant_id: Uuid,
        phone: &str,
    ) -> Result<Option<Contact>, StoreError> {
        Ok(self
            .inner
            .lock()
            .contacts
            .iter()
            .find(|c| c.tenant_id == tenant_id && c.phone.as_deref() == Some(phone))
            .cloned())
    }

    async fn contact_by_email(
        &self,
        tenant_id: Uuid,
        email: &str,
    ) -> Result<Option<Contact>, StoreError> {
        Ok(self
            .inner
            .lock()
            .contacts
            .iter()
            .find(|c| c.tenant_id == tenant_id && c.email.as_deref() == Some(email))
            .cloned())
    }

    async fn upsert_contact_by_phone(&self, new: NewContact) -> Result<Contact, StoreError> {
        let phone = new
            .phone
            .clone()
            .ok_or_else(|| StoreError::Unavailable("phone upsert without phone".to_string()))?;

        let mut inner = self.inner.lock();
        if let Some(existing) = inner
            .contacts
            .iter()
            .find(|c| c.tenant_id == new.tenant_id && c.phone.as_deref() == Some(phone.as_str()))
        {
            return Ok(existing.clone());
        }
        let contact = Contact {
            id: Uuid::new_v4(),
            tenant_id: new.tenant_id,
            name: new.name,
            phone: Some(phone),
            email: new.email,
            metadata: new.metadata,
            created_at: Utc::now(),
        };
        inner.contacts.push(contact.clone());
        Ok(contact)
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
        self.inner.lock().contacts.push(contact.clone());
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
        self.inner.lock().leads.push(lead.clone());
        Ok(lead)
    }

    async fn lead_by_id(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<Lead>, StoreError> {
        Ok(self
            .inner
            .lock()
            .leads
            .iter()
            .find(|l| l.tenant_id == tenant_id && l.id == id)
            .cloned())
    }

    async fn latest_lead_for_contact(
        &self,
        tenant_id: Uuid,
        contact_id: Uuid,
    ) -> Result<Option<Lead>, StoreError> {
        Ok(self
            .inner
            .lock()
            .leads
            .iter()
            .filter(|l| l.tenant_id == tenant_id && l.contact_id == contact_id)
            .max_by_key(|l| l.created_at)
            .cloned())
    }

    async fn set_lead_status(
        &self,
        tenant_id: Uuid,
        lead_id: Uuid,
        status: LeadStatus,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if let Some(lead) = inner
            .leads
            .iter_mut()
            .find(|l| l.tenant_id == tenant_id && l.id == lead_id)
        {
            lead.status = status.as_str().to_string();
        }
        Ok(())
    }

    async fn set_lead_speed_to_lead(
        &self,
        tenant_id: Uuid,
        lead_id: Uuid,
        secs: i64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if let Some(lead) = inner
            .leads
            .iter_mut()
            .find(|l| l.tenant_id == tenant_id && l.id == lead_id)
        {
            if lead.speed_to_lead_secs.is_none() {
                lead.speed_to_lead_secs = Some(secs);
            }
        }
        Ok(())
    }

    async fn upsert_call(
        &self,
        tenant_id: Uuid,
        upsert: CallUpsert,
    ) -> Result<CallUpsertOutcome, StoreError> {
        let now = Utc::now();
        let key = (tenant_id, upsert.external_id.clone());
        let mut inner = self.inner.lock();

        if let Some(existing) = inner.calls.get_mut(&key) {
            let first_start = call::apply(existing, &upsert.patch);
            existing.updated_at = now;
            return Ok(CallUpsertOutcome {
                call: existing.clone(),
                inserted: false,
                first_start,
            });
        }

        let (new_call, first_start) = call::materialize(tenant_id, &upsert, now);
        inner.calls.insert(key, new_call.clone());
        Ok(CallUpsertOutcome {
            call: new_call,
            inserted: true,
            first_start,
        })
    }

    async fn call_count_for_lead(
        &self,
        tenant_id: Uuid,
        lead_id: Uuid,
    ) -> Result<i64, StoreError> {
        Ok(self
            .inner
            .lock()
            .calls
            .values()
            .filter(|c| c.tenant_id == tenant_id && c.lead_id == Some(lead_id))
            .count() as i64)
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
        self.inner.lock().activities.push(activity.clone());
        Ok(activity)
    }

    async fn record_delivery(&self, new: NewDelivery) -> Result<(), StoreError> {
        if self.fail_deliveries.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "delivery writes disabled".to_string(),
            ));
        }
        self.inner
            .lock()
            .deliveries
            .push((new.tenant_id, new.endpoint_id, new.event_type));
        Ok(())
    }
}
