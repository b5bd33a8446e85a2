//! Call state model and the merge rules for idempotent call upserts.
//!
//! The provider delivers each lifecycle stage (`ringing`, `connected`,
//! `hangup`, `dispositions`, ...) as an independent webhook, with no ordering
//! guarantee between them and with retries on top. The call row is therefore
//! built by *merging* events, never by replacing: each event is authoritative
//! for a small set of fields and must not clobber what earlier events
//! recorded. All of those field-level rules live in [`apply`] so there is one
//! place to audit them.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ConnectionHeuristic;
use crate::ingest::event::{CallEventKind, TelephonyEvent};
use crate::ingest::metrics;
use crate::store::{Call, CallUpsert};

/// Internal call states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Ringing,
    Connected,
    Completed,
    Voicemail,
    Missed,
}

impl CallState {
    /// Position in the forward-only progression. Terminal states share a
    /// rank: a `missed` verdict and a `hangup` can both close a call and the
    /// later arrival wins between them, but neither ever regresses to
    /// `ringing` or `connected`.
    pub fn rank(&self) -> u8 {
        match self {
            CallState::Ringing => 0,
            CallState::Connected => 1,
            CallState::Completed | CallState::Voicemail | CallState::Missed => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Ringing => "ringing",
            CallState::Connected => "connected",
            CallState::Completed => "completed",
            CallState::Voicemail => "voicemail",
            CallState::Missed => "missed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ringing" => Some(CallState::Ringing),
            "connected" => Some(CallState::Connected),
            "completed" => Some(CallState::Completed),
            "voicemail" => Some(CallState::Voicemail),
            "missed" => Some(CallState::Missed),
            _ => None,
        }
    }
}

impl From<CallEventKind> for CallState {
    fn from(kind: CallEventKind) -> Self {
        match kind {
            CallEventKind::Ringing => CallState::Ringing,
            CallEventKind::Connected => CallState::Connected,
            CallEventKind::Hangup | CallEventKind::Dispositions => CallState::Completed,
            CallEventKind::Voicemail => CallState::Voicemail,
            CallEventKind::Missed => CallState::Missed,
        }
    }
}

/// The fields one telephony event is authoritative for.
#[derive(Debug, Clone)]
pub struct CallPatch {
    pub kind: CallEventKind,
    pub state: CallState,
    pub started_at: Option<DateTime<Utc>>,
    pub connected_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<i64>,
    pub disposition: Option<String>,
    pub disposition_notes: Option<String>,
    pub recording_url: Option<String>,
    /// Outcome of the connection heuristic for this event.
    pub connected_hint: bool,
}

impl CallPatch {
    /// Builds the patch for one provider event. `now` is the receipt time,
    /// used where the provider does not supply a timestamp of its own.
    pub fn from_event(
        event: &TelephonyEvent,
        kind: CallEventKind,
        heuristic: &ConnectionHeuristic,
        now: DateTime<Utc>,
    ) -> Self {
        let started_at = event.started_at();

        // `connected` carries no timestamp of its own; receipt time is the
        // closest approximation of when the agent picked up.
        let connected_at = match kind {
            CallEventKind::Connected => Some(now),
            _ => None,
        };

        // Only hangup closes the call timeline. Prefer the provider's own
        // clock (start + duration) over ours when it gave us both.
        let (ended_at, duration_secs) = match kind {
            CallEventKind::Hangup => {
                let ended = match (started_at, event.duration) {
                    (Some(start), Some(secs)) => Some(start + Duration::seconds(secs)),
                    _ => Some(now),
                };
                (ended, event.duration)
            }
            _ => (None, None),
        };

        let (disposition, disposition_notes) = match kind {
            CallEventKind::Dispositions => (
                event.disposition.clone(),
                event.disposition_notes.clone(),
            ),
            _ => (None, None),
        };

        let connected_hint = kind == CallEventKind::Connected
            || metrics::is_connected(
                event.outcome.as_deref(),
                event.duration,
                event.agent_connected,
                heuristic,
            );

        CallPatch {
            kind,
            state: kind.into(),
            started_at,
            connected_at,
            ended_at,
            duration_secs,
            disposition,
            disposition_notes,
            recording_url: event.recording_url.clone(),
            connected_hint,
        }
    }
}

/// Merges one event's patch into an existing call row.
///
/// Returns true when this patch recorded `started_at` for the first time,
/// which is what gates the speed-to-lead computation.
pub fn apply(call: &mut Call, patch: &CallPatch) -> bool {
    let first_start = call.started_at.is_none() && patch.started_at.is_some();

    // Forward-only: a late-arriving ringing never demotes a completed call.
    // Equal rank means "latest terminal verdict wins".
    if patch.state.rank() >= call.state.rank() {
        call.state = patch.state;
    }

    // Timestamps belong to the first event that supplied them.
    if call.started_at.is_none() {
        call.started_at = patch.started_at;
    }
    if call.connected_at.is_none() {
        call.connected_at = patch.connected_at;
    }
    if call.ended_at.is_none() {
        call.ended_at = patch.ended_at;
    }
    if call.duration_secs.is_none() {
        call.duration_secs = patch.duration_secs;
    }

    // Disposition events own these two fields outright; a corrected
    // disposition replaces the earlier one.
    if patch.kind == CallEventKind::Dispositions {
        if patch.disposition.is_some() {
            call.disposition = patch.disposition.clone();
        }
        if patch.disposition_notes.is_some() {
            call.disposition_notes = patch.disposition_notes.clone();
        }
    }

    if call.recording_url.is_none() {
        call.recording_url = patch.recording_url.clone();
    }

    call.connected |= patch.connected_hint;

    first_start
}

/// Builds a brand-new call row from the first event that arrived for this
/// `external_id`, whichever lifecycle stage that happens to be.
pub fn materialize(tenant_id: Uuid, upsert: &CallUpsert, now: DateTime<Utc>) -> (Call, bool) {
    let mut call = Call {
        id: Uuid::new_v4(),
        tenant_id,
        external_id: upsert.external_id.clone(),
        lead_id: upsert.lead_id,
        contact_id: upsert.contact_id,
        direction: upsert.direction,
        state: upsert.patch.state,
        started_at: None,
        connected_at: None,
        ended_at: None,
        duration_secs: None,
        disposition: None,
        disposition_notes: None,
        recording_url: None,
        connected: false,
        created_at: now,
        updated_at: now,
    };
    let first_start = apply(&mut call, &upsert.patch);
    (call, first_start)
}
