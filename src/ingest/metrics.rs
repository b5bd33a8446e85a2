//! Derived metrics: speed-to-lead, connection detection, and the
//! disposition heuristic.
//!
//! These are all functions of accumulated state rather than of any single
//! event, so they live apart from the per-event merge rules.

use chrono::{DateTime, Utc};

use crate::config::ConnectionHeuristic;

/// Seconds between lead creation and the first call attempt, or `None` when
/// the pair is implausible.
///
/// A negative value means clock skew between us and the provider; a value
/// above `max_secs` (24h by default) means the call was almost certainly
/// paired with a stale lead. Both are discarded rather than stored.
pub fn speed_to_lead(
    lead_created_at: DateTime<Utc>,
    call_started_at: DateTime<Utc>,
    max_secs: i64,
) -> Option<i64> {
    let secs = (call_started_at - lead_created_at).num_seconds();
    if secs < 0 || secs > max_secs {
        return None;
    }
    Some(secs)
}

/// Whether a call counts as connected to a human.
///
/// Providers report connection status inconsistently across event types, so
/// two independent signals are OR-ed: an `answered` outcome with a duration
/// above the noise threshold, or an explicit agent-connected flag.
pub fn is_connected(
    outcome: Option<&str>,
    duration_secs: Option<i64>,
    agent_connected: Option<bool>,
    heuristic: &ConnectionHeuristic,
) -> bool {
    if agent_connected == Some(true) {
        return true;
    }
    let answered = outcome.is_some_and(|o| o.eq_ignore_ascii_case("answered"));
    answered && duration_secs.is_some_and(|d| d > heuristic.min_duration_secs)
}

/// Whether a free-text disposition marks the lead as having booked an
/// appointment. Dispositions are tenant-configurable free text, so this is a
/// deliberately loose substring match on "appointment"/"booked".
pub fn disposition_indicates_appointment(disposition: &str) -> bool {
    let lowered = disposition.to_lowercase();
    lowered.contains("appointment") || lowered.contains("booked")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    const DAY_SECS: i64 = 86_400;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn ten_minute_response_is_600_seconds() {
        let call = t0() + Duration::minutes(10);
        assert_eq!(speed_to_lead(t0(), call, DAY_SECS), Some(600));
    }

    #[test]
    fn negative_skew_is_discarded() {
        let call = t0() - Duration::seconds(30);
        assert_eq!(speed_to_lead(t0(), call, DAY_SECS), None);
    }

    #[test]
    fn stale_pairing_is_discarded() {
        let call = t0() + Duration::days(3);
        assert_eq!(speed_to_lead(t0(), call, DAY_SECS), None);
    }

    #[test]
    fn boundary_values() {
        assert_eq!(speed_to_lead(t0(), t0(), DAY_SECS), Some(0));
        let at_max = t0() + Duration::seconds(DAY_SECS);
        assert_eq!(speed_to_lead(t0(), at_max, DAY_SECS), Some(DAY_SECS));
    }

    #[test]
    fn answered_above_threshold_connects() {
        let h = ConnectionHeuristic::default();
        assert!(is_connected(Some("answered"), Some(30), None, &h));
        assert!(is_connected(Some("Answered"), Some(30), Some(false), &h));
    }

    #[test]
    fn short_or_unanswered_calls_do_not_connect() {
        let h = ConnectionHeuristic::default();
        assert!(!is_connected(Some("answered"), Some(1), None, &h));
        assert!(!is_connected(Some("no_answer"), Some(300), None, &h));
        assert!(!is_connected(None, Some(300), None, &h));
    }

    #[test]
    fn agent_flag_overrides_outcome() {
        let h = ConnectionHeuristic::default();
        assert!(is_connected(None, None, Some(true), &h));
        assert!(is_connected(Some("no_answer"), Some(0), Some(true), &h));
    }

    #[test]
    fn appointment_substrings_match_case_insensitively() {
        assert!(disposition_indicates_appointment(
            "Client Requested Callback - Appointment Pending"
        ));
        assert!(disposition_indicates_appointment("BOOKED - confirmed"));
        assert!(!disposition_indicates_appointment("Not Interested"));
        assert!(!disposition_indicates_appointment(""));
    }
}
