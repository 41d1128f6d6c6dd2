//! Calendar and mailbox collaborator.

pub mod google;

use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::core::errors::ConciergeError;

pub use google::GoogleWorkspace;

pub const MAX_LIST_RESULTS: u32 = 20;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hangout_link: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmailSummary {
    pub id: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub snippet: String,
}

/// Event start as given by the caller. Times without an offset are resolved
/// in the workspace time zone by the service.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EventStart {
    Zoned(DateTime<FixedOffset>),
    Local(NaiveDateTime),
}

impl EventStart {
    pub fn parse(input: &str) -> Result<Self, ConciergeError> {
        let input = input.trim();
        if let Ok(zoned) = DateTime::parse_from_rfc3339(input) {
            return Ok(EventStart::Zoned(zoned));
        }
        for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
            if let Ok(local) = NaiveDateTime::parse_from_str(input, format) {
                return Ok(EventStart::Local(local));
            }
        }
        Err(ConciergeError::validation(format!(
            "start must be an ISO-8601 date-time, got '{}'",
            input
        )))
    }

    pub fn plus_minutes(&self, minutes: u32) -> Self {
        let delta = Duration::minutes(i64::from(minutes));
        match self {
            EventStart::Zoned(at) => EventStart::Zoned(*at + delta),
            EventStart::Local(at) => EventStart::Local(*at + delta),
        }
    }

    pub fn to_iso(&self) -> String {
        match self {
            EventStart::Zoned(at) => at.to_rfc3339(),
            EventStart::Local(at) => at.format("%Y-%m-%dT%H:%M:%S").to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub summary: String,
    pub start: EventStart,
    pub duration_minutes: u32,
    pub attendees: Vec<String>,
    pub description: String,
    pub location: String,
}

#[async_trait]
pub trait WorkspaceService: Send + Sync {
    async fn list_calendar_events(&self, max_results: u32) -> Result<Vec<CalendarEvent>, ConciergeError>;

    async fn list_recent_messages(
        &self,
        query: &str,
        max_results: u32,
    ) -> Result<Vec<EmailSummary>, ConciergeError>;

    /// Returns the provider message id.
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<String, ConciergeError>;

    /// Returns the provider event id.
    async fn create_event(&self, event: &NewEvent) -> Result<String, ConciergeError>;
}

pub fn clamp_results(max_results: u32) -> u32 {
    max_results.clamp(1, MAX_LIST_RESULTS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_offset_and_local_start_times() {
        assert!(matches!(
            EventStart::parse("2025-08-18T09:30:00-04:00").unwrap(),
            EventStart::Zoned(_)
        ));
        assert!(matches!(
            EventStart::parse("2025-08-18T09:30").unwrap(),
            EventStart::Local(_)
        ));
        assert!(EventStart::parse("next tuesday").unwrap_err().is_validation());
    }

    #[test]
    fn end_time_keeps_the_start_representation() {
        let start = EventStart::parse("2025-08-18T23:45:00").unwrap();
        assert_eq!(start.plus_minutes(30).to_iso(), "2025-08-19T00:15:00");

        let zoned = EventStart::parse("2025-08-18T09:00:00+00:00").unwrap();
        assert_eq!(zoned.plus_minutes(90).to_iso(), "2025-08-18T10:30:00+00:00");
    }

    #[test]
    fn list_sizes_are_clamped() {
        assert_eq!(clamp_results(0), 1);
        assert_eq!(clamp_results(7), 7);
        assert_eq!(clamp_results(500), 20);
    }
}
