//! Inbound event envelopes and the event classifier.
//!
//! Two webhook surfaces feed the pipeline: the lead-ingestion surface (lead
//! sources posting new leads, surveys, appointments and generic activities)
//! and the telephony surface (the call provider posting call lifecycle
//! events). Both carry an `event_type` discriminator; unknown values are
//! rejected rather than silently dropped.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::IngestError;

/// Event kinds accepted on the lead-ingestion surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadEventKind {
    NewLead,
    SurveyCompleted,
    AppointmentBooked,
    Activity,
}

impl LeadEventKind {
    /// Classifies the envelope's `event_type` field.
    ///
    /// A missing discriminator means `new_lead`: early lead-source
    /// integrations posted untagged payloads and that default is load-bearing
    /// for them, so it is spelled out here rather than implied by serde.
    pub fn classify(event_type: Option<&str>) -> Result<Self, IngestError> {
        match event_type {
            None => Ok(LeadEventKind::NewLead),
            Some("new_lead") => Ok(LeadEventKind::NewLead),
            Some("survey_completed") => Ok(LeadEventKind::SurveyCompleted),
            Some("appointment_booked") => Ok(LeadEventKind::AppointmentBooked),
            Some("activity") => Ok(LeadEventKind::Activity),
            Some(other) => Err(IngestError::UnsupportedEvent(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LeadEventKind::NewLead => "new_lead",
            LeadEventKind::SurveyCompleted => "survey_completed",
            LeadEventKind::AppointmentBooked => "appointment_booked",
            LeadEventKind::Activity => "activity",
        }
    }
}

/// JSON envelope posted to `/webhooks/lead/{secret}`.
///
/// All sub-objects are optional; which ones matter depends on the classified
/// event kind. The raw body is kept separately by the handler as the lead's
/// `raw_event_snapshot`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LeadEnvelope {
    pub event_type: Option<String>,
    pub contact: Option<ContactPayload>,
    pub lead: Option<LeadPayload>,
    pub survey: Option<serde_json::Value>,
    pub appointment: Option<serde_json::Value>,
    pub activity: Option<serde_json::Value>,
    pub reference: Option<ReferencePayload>,
}

impl LeadEnvelope {
    /// Picks the sub-object that becomes the activity's `event_data`.
    /// Falls back to an empty object so the audit row is always well-formed.
    pub fn event_data(&self, kind: LeadEventKind) -> serde_json::Value {
        let data = match kind {
            LeadEventKind::SurveyCompleted => self.survey.clone(),
            LeadEventKind::AppointmentBooked => self.appointment.clone(),
            LeadEventKind::Activity => self.activity.clone(),
            LeadEventKind::NewLead => None,
        };
        data.unwrap_or_else(|| serde_json::json!({}))
    }
}

/// Contact identity fields carried by a lead-surface event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContactPayload {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Lead fields carried by a `new_lead` event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LeadPayload {
    pub source: Option<String>,
    pub status: Option<String>,
}

/// Explicit entity references, used instead of identity matching when the
/// sender already knows our ids.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReferencePayload {
    pub contact_id: Option<Uuid>,
    pub lead_id: Option<Uuid>,
}

/// Call lifecycle events accepted on the telephony surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallEventKind {
    Ringing,
    Connected,
    Hangup,
    Dispositions,
    Voicemail,
    Missed,
}

impl CallEventKind {
    pub fn classify(event_type: &str) -> Result<Self, IngestError> {
        match event_type {
            "ringing" => Ok(CallEventKind::Ringing),
            "connected" => Ok(CallEventKind::Connected),
            "hangup" => Ok(CallEventKind::Hangup),
            "dispositions" => Ok(CallEventKind::Dispositions),
            "voicemail" => Ok(CallEventKind::Voicemail),
            "missed" => Ok(CallEventKind::Missed),
            other => Err(IngestError::UnsupportedEvent(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallEventKind::Ringing => "ringing",
            CallEventKind::Connected => "connected",
            CallEventKind::Hangup => "hangup",
            CallEventKind::Dispositions => "dispositions",
            CallEventKind::Voicemail => "voicemail",
            CallEventKind::Missed => "missed",
        }
    }
}

/// Call direction as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "inbound" => Some(Direction::Inbound),
            "outbound" => Some(Direction::Outbound),
            _ => None,
        }
    }
}

/// JSON body posted to `/webhooks/telephony/{tenant_slug}`.
#[derive(Debug, Clone, Deserialize)]
pub struct TelephonyEvent {
    pub call_id: String,
    pub event_type: String,
    pub direction: Option<Direction>,
    pub from_number: Option<String>,
    pub to_number: Option<String>,
    /// Call start as epoch seconds, the provider's clock.
    pub start_time: Option<i64>,
    /// Call duration in seconds, present on hangup/disposition events.
    pub duration: Option<i64>,
    pub recording_url: Option<String>,
    pub disposition: Option<String>,
    pub disposition_notes: Option<String>,
    /// Provider-reported call outcome, e.g. "answered" or "no_answer".
    pub outcome: Option<String>,
    /// Explicit agent-connected flag, set by some event types only.
    pub agent_connected: Option<bool>,
}

impl TelephonyEvent {
    pub fn kind(&self) -> Result<CallEventKind, IngestError> {
        CallEventKind::classify(&self.event_type)
    }

    /// Call start as a UTC timestamp, when the provider supplied one.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.start_time
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
    }

    /// The number of the external party on the call. Inbound calls come from
    /// the contact; outbound calls go to the contact.
    pub fn counterparty_number(&self) -> Option<&str> {
        match self.direction {
            Some(Direction::Inbound) => self.from_number.as_deref(),
            _ => self.to_number.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_discriminator_defaults_to_new_lead() {
        assert_eq!(
            LeadEventKind::classify(None).unwrap(),
            LeadEventKind::NewLead
        );
    }

    #[test]
    fn known_lead_kinds_classify() {
        assert_eq!(
            LeadEventKind::classify(Some("survey_completed")).unwrap(),
            LeadEventKind::SurveyCompleted
        );
        assert_eq!(
            LeadEventKind::classify(Some("appointment_booked")).unwrap(),
            LeadEventKind::AppointmentBooked
        );
        assert_eq!(
            LeadEventKind::classify(Some("activity")).unwrap(),
            LeadEventKind::Activity
        );
    }

    #[test]
    fn unknown_lead_kind_is_rejected() {
        let err = LeadEventKind::classify(Some("lead_deleted")).unwrap_err();
        assert!(matches!(err, IngestError::UnsupportedEvent(t) if t == "lead_deleted"));
    }

    #[test]
    fn unknown_call_kind_is_rejected() {
        assert!(CallEventKind::classify("transferred").is_err());
    }

    #[test]
    fn counterparty_follows_direction() {
        let mut event: TelephonyEvent = serde_json::from_value(serde_json::json!({
            "call_id": "CA1",
            "event_type": "ringing",
            "direction": "outbound",
            "from_number": "15550000001",
            "to_number": "15550000002",
        }))
        .unwrap();
        assert_eq!(event.counterparty_number(), Some("15550000002"));

        event.direction = Some(Direction::Inbound);
        assert_eq!(event.counterparty_number(), Some("15550000001"));

        // Direction unreported: assume outbound, the common case for a
        // call-tracking dialer.
        event.direction = None;
        assert_eq!(event.counterparty_number(), Some("15550000002"));
    }

    #[test]
    fn start_time_parses_epoch_seconds() {
        let event: TelephonyEvent = serde_json::from_value(serde_json::json!({
            "call_id": "CA1",
            "event_type": "ringing",
            "start_time": 1_700_000_000,
        }))
        .unwrap();
        let ts = event.started_at().unwrap();
        assert_eq!(ts.timestamp(), 1_700_000_000);
    }

    #[test]
    fn envelope_tolerates_minimal_body() {
        let envelope: LeadEnvelope = serde_json::from_str("{}").unwrap();
        assert!(envelope.event_type.is_none());
        assert!(envelope.contact.is_none());
    }
}
