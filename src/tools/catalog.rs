//! Fixed tool catalog shared by the tool server and its clients.
//!
//! Names, argument names and schemas are part of the wire contract: any
//! client/server pair built against this catalog must agree on them exactly.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::core::errors::ConciergeError;
use crate::rag::Hit;
use crate::workspace::{CalendarEvent, EmailSummary, EventStart, NewEvent, MAX_LIST_RESULTS};

pub const SERVER_NAME: &str = "usf_workspace_tools";
pub const SERVER_VERSION: &str = "1.0.0";

pub const MIN_EVENT_MINUTES: u32 = 5;
pub const MAX_EVENT_MINUTES: u32 = 480;
const DEFAULT_LIST_RESULTS: u32 = 5;
const DEFAULT_EVENT_MINUTES: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    RetrieveContext,
    LogInteraction,
    ListCalendarEvents,
    ListRecentEmails,
    SendEmail,
    CreateEvent,
}

impl ToolName {
    pub const ALL: [ToolName; 6] = [
        ToolName::RetrieveContext,
        ToolName::LogInteraction,
        ToolName::ListCalendarEvents,
        ToolName::ListRecentEmails,
        ToolName::SendEmail,
        ToolName::CreateEvent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::RetrieveContext => "retrieve_context",
            ToolName::LogInteraction => "log_interaction",
            ToolName::ListCalendarEvents => "list_calendar_events",
            ToolName::ListRecentEmails => "list_recent_emails",
            ToolName::SendEmail => "send_email",
            ToolName::CreateEvent => "create_event",
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolName {
    type Err = ConciergeError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        ToolName::ALL
            .into_iter()
            .find(|tool| tool.as_str() == name)
            .ok_or_else(|| ConciergeError::validation(format!("unknown tool '{}'", name)))
    }
}

#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: ToolName,
    pub description: &'static str,
    pub input_schema: Value,
    pub output_schema: Value,
    /// Has side effects outside this system (mail sent, event created).
    pub mutating: bool,
}

impl ToolDescriptor {
    pub fn annotations(&self) -> Value {
        if self.mutating {
            json!({ "readOnlyHint": false, "destructiveHint": false })
        } else {
            json!({ "readOnlyHint": true, "idempotentHint": true })
        }
    }

    /// MCP `Tool` JSON as listed by the server.
    pub fn to_tool_json(&self) -> Value {
        json!({
            "name": self.name.as_str(),
            "description": self.description,
            "inputSchema": self.input_schema,
            "outputSchema": self.output_schema,
            "annotations": self.annotations(),
        })
    }
}

pub fn catalog() -> Vec<ToolDescriptor> {
    ToolName::ALL.into_iter().map(descriptor).collect()
}

pub fn descriptor(name: ToolName) -> ToolDescriptor {
    match name {
        ToolName::RetrieveContext => ToolDescriptor {
            name,
            description: "Retrieve semantically relevant USF context from the Supabase vector store.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "The user utterance to embed and search." },
                    "match_count": { "type": "integer", "minimum": 1, "maximum": 20 },
                    "extra_filter": { "type": "object", "description": "Optional JSON filter applied server-side." }
                },
                "required": ["query"]
            }),
            output_schema: json!({
                "type": "object",
                "properties": {
                    "hits": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "doc": { "type": "string" },
                                "meta": { "type": "object" },
                                "score": { "type": ["number", "null"] }
                            },
                            "required": ["doc", "meta"]
                        }
                    }
                },
                "required": ["hits"]
            }),
            mutating: false,
        },
        ToolName::LogInteraction => ToolDescriptor {
            name,
            description: "Persist an audit trail entry for the current chat session.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "session_id": { "type": "string" },
                    "event_type": { "type": "string" },
                    "payload": { "type": "object" }
                },
                "required": ["session_id", "event_type", "payload"]
            }),
            output_schema: json!({
                "type": "object",
                "properties": { "status": { "type": "string" } },
                "required": ["status"]
            }),
            mutating: false,
        },
        ToolName::ListCalendarEvents => ToolDescriptor {
            name,
            description: "List upcoming Google Calendar events from the primary calendar.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "max_results": { "type": "integer", "minimum": 1, "maximum": 20, "default": 5 }
                }
            }),
            output_schema: json!({
                "type": "object",
                "properties": {
                    "events": { "type": "array", "items": { "type": "object" } }
                },
                "required": ["events"]
            }),
            mutating: false,
        },
        ToolName::ListRecentEmails => ToolDescriptor {
            name,
            description: "List recent Gmail messages matching an optional search query.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "default": "" },
                    "max_results": { "type": "integer", "minimum": 1, "maximum": 20, "default": 5 }
                }
            }),
            output_schema: json!({
                "type": "object",
                "properties": {
                    "messages": { "type": "array", "items": { "type": "object" } }
                },
                "required": ["messages"]
            }),
            mutating: false,
        },
        ToolName::SendEmail => ToolDescriptor {
            name,
            description: "Send an email via Gmail on behalf of the authenticated USF account.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "to_address": { "type": "string" },
                    "subject": { "type": "string" },
                    "body": { "type": "string" }
                },
                "required": ["to_address", "subject", "body"]
            }),
            output_schema: json!({
                "type": "object",
                "properties": { "message_id": { "type": "string" } },
                "required": ["message_id"]
            }),
            mutating: true,
        },
        ToolName::CreateEvent => ToolDescriptor {
            name,
            description: "Create a Google Calendar event with optional attendees and description.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "summary": { "type": "string" },
                    "start_iso": { "type": "string", "description": "ISO-8601 start timestamp." },
                    "duration_minutes": { "type": "integer", "minimum": 5, "maximum": 480, "default": 30 },
                    "attendees": { "type": "array", "items": { "type": "string" }, "default": [] },
                    "description": { "type": "string", "default": "" },
                    "location": { "type": "string", "default": "" }
                },
                "required": ["summary", "start_iso", "duration_minutes"]
            }),
            output_schema: json!({
                "type": "object",
                "properties": { "event_id": { "type": "string" } },
                "required": ["event_id"]
            }),
            mutating: true,
        },
    }
}

/// Typed arguments of one catalog tool.
pub trait ToolArgs: Serialize + DeserializeOwned + Send + Sync {
    const TOOL: ToolName;
    type Output: Serialize + DeserializeOwned + Send;

    /// Checks that run before any network attempt.
    fn validate(&self) -> Result<(), ConciergeError>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrieveContextArgs {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_filter: Option<Map<String, Value>>,
}

impl RetrieveContextArgs {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrieveContextOutput {
    pub hits: Vec<Hit>,
}

impl ToolArgs for RetrieveContextArgs {
    const TOOL: ToolName = ToolName::RetrieveContext;
    type Output = RetrieveContextOutput;

    fn validate(&self) -> Result<(), ConciergeError> {
        if self.query.trim().is_empty() {
            return Err(ConciergeError::validation("query is required"));
        }
        if let Some(count) = self.match_count {
            check_range("match_count", count, 1, MAX_LIST_RESULTS)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogInteractionArgs {
    pub session_id: String,
    pub event_type: String,
    #[serde(default = "empty_object")]
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogInteractionOutput {
    pub status: String,
}

impl ToolArgs for LogInteractionArgs {
    const TOOL: ToolName = ToolName::LogInteraction;
    type Output = LogInteractionOutput;

    fn validate(&self) -> Result<(), ConciergeError> {
        if self.session_id.trim().is_empty() || self.event_type.trim().is_empty() {
            return Err(ConciergeError::validation(
                "session_id and event_type are required to log interactions",
            ));
        }
        if !self.payload.is_object() {
            return Err(ConciergeError::validation("payload must be a JSON object"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListCalendarEventsArgs {
    #[serde(default = "default_list_results")]
    pub max_results: u32,
}

impl Default for ListCalendarEventsArgs {
    fn default() -> Self {
        Self {
            max_results: DEFAULT_LIST_RESULTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListCalendarEventsOutput {
    pub events: Vec<CalendarEvent>,
}

impl ToolArgs for ListCalendarEventsArgs {
    const TOOL: ToolName = ToolName::ListCalendarEvents;
    type Output = ListCalendarEventsOutput;

    fn validate(&self) -> Result<(), ConciergeError> {
        check_range("max_results", self.max_results, 1, MAX_LIST_RESULTS)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListRecentEmailsArgs {
    #[serde(default)]
    pub query: String,
    #[serde(default = "default_list_results")]
    pub max_results: u32,
}

impl Default for ListRecentEmailsArgs {
    fn default() -> Self {
        Self {
            query: String::new(),
            max_results: DEFAULT_LIST_RESULTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListRecentEmailsOutput {
    pub messages: Vec<EmailSummary>,
}

impl ToolArgs for ListRecentEmailsArgs {
    const TOOL: ToolName = ToolName::ListRecentEmails;
    type Output = ListRecentEmailsOutput;

    fn validate(&self) -> Result<(), ConciergeError> {
        check_range("max_results", self.max_results, 1, MAX_LIST_RESULTS)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendEmailArgs {
    pub to_address: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendEmailOutput {
    pub message_id: String,
}

impl ToolArgs for SendEmailArgs {
    const TOOL: ToolName = ToolName::SendEmail;
    type Output = SendEmailOutput;

    fn validate(&self) -> Result<(), ConciergeError> {
        if [&self.to_address, &self.subject, &self.body]
            .iter()
            .any(|field| field.trim().is_empty())
        {
            return Err(ConciergeError::validation(
                "To, subject, and body are required to send email.",
            ));
        }
        if [&self.to_address, &self.subject]
            .iter()
            .any(|field| field.contains(['\r', '\n']))
        {
            return Err(ConciergeError::validation(
                "Recipient and subject must be a single line.",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateEventArgs {
    pub summary: String,
    pub start_iso: String,
    #[serde(default = "default_event_minutes")]
    pub duration_minutes: u32,
    #[serde(default)]
    pub attendees: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: String,
}

impl CreateEventArgs {
    /// Validated, parsed form handed to the workspace service.
    pub fn to_new_event(&self) -> Result<NewEvent, ConciergeError> {
        self.validate()?;
        Ok(NewEvent {
            summary: self.summary.trim().to_string(),
            start: EventStart::parse(&self.start_iso)?,
            duration_minutes: self.duration_minutes,
            attendees: self
                .attendees
                .iter()
                .map(|email| email.trim().to_string())
                .collect(),
            description: self.description.clone(),
            location: self.location.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateEventOutput {
    pub event_id: String,
}

impl ToolArgs for CreateEventArgs {
    const TOOL: ToolName = ToolName::CreateEvent;
    type Output = CreateEventOutput;

    fn validate(&self) -> Result<(), ConciergeError> {
        if self.summary.trim().is_empty() {
            return Err(ConciergeError::validation("summary is required to create an event"));
        }
        EventStart::parse(&self.start_iso)?;
        check_range(
            "duration_minutes",
            self.duration_minutes,
            MIN_EVENT_MINUTES,
            MAX_EVENT_MINUTES,
        )?;
        if self.attendees.iter().any(|email| email.trim().is_empty()) {
            return Err(ConciergeError::validation("attendees cannot contain empty entries"));
        }
        Ok(())
    }
}

fn check_range(field: &str, value: u32, min: u32, max: u32) -> Result<(), ConciergeError> {
    if value < min || value > max {
        return Err(ConciergeError::validation(format!(
            "{} must be between {} and {} (got {})",
            field, min, max, value
        )));
    }
    Ok(())
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

fn default_list_results() -> u32 {
    DEFAULT_LIST_RESULTS
}

fn default_event_minutes() -> u32 {
    DEFAULT_EVENT_MINUTES
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_args() -> CreateEventArgs {
        CreateEventArgs {
            summary: "Advising".into(),
            start_iso: "2025-08-18T09:00:00-04:00".into(),
            duration_minutes: 30,
            attendees: vec!["student@usf.edu".into()],
            description: String::new(),
            location: String::new(),
        }
    }

    #[test]
    fn catalog_lists_six_tools_in_fixed_order() {
        let names: Vec<&str> = catalog().iter().map(|tool| tool.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "retrieve_context",
                "log_interaction",
                "list_calendar_events",
                "list_recent_emails",
                "send_email",
                "create_event"
            ]
        );
        for name in names {
            assert_eq!(name.parse::<ToolName>().unwrap().as_str(), name);
        }
        assert!("drop_tables".parse::<ToolName>().is_err());
    }

    #[test]
    fn only_side_effecting_tools_are_mutating() {
        let mutating: Vec<ToolName> = catalog()
            .into_iter()
            .filter(|tool| tool.mutating)
            .map(|tool| tool.name)
            .collect();
        assert_eq!(mutating, [ToolName::SendEmail, ToolName::CreateEvent]);
        assert_eq!(
            descriptor(ToolName::SendEmail).to_tool_json()["annotations"]["readOnlyHint"],
            false
        );
    }

    #[test]
    fn send_email_requires_every_field() {
        let args = SendEmailArgs {
            to_address: "".into(),
            subject: "Hi".into(),
            body: "Body".into(),
        };
        let err = args.validate().unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("To, subject, and body are required"));
    }

    #[test]
    fn send_email_rejects_multiline_headers() {
        let args = SendEmailArgs {
            to_address: "a@usf.edu".into(),
            subject: "Hi\r\nBcc: attacker@evil.example".into(),
            body: "Body\nwith lines is fine".into(),
        };
        let err = args.validate().unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("single line"));

        let args = SendEmailArgs {
            to_address: "a@usf.edu\nb@usf.edu".into(),
            subject: "Hi".into(),
            body: "Body".into(),
        };
        assert!(args.validate().unwrap_err().is_validation());

        let args = SendEmailArgs {
            to_address: "a@usf.edu".into(),
            subject: "Hi".into(),
            body: "Line one\nLine two".into(),
        };
        assert!(args.validate().is_ok());
    }

    #[test]
    fn create_event_bounds_duration_and_start() {
        assert!(event_args().validate().is_ok());

        let mut short = event_args();
        short.duration_minutes = 4;
        assert!(short.validate().unwrap_err().is_validation());

        let mut long = event_args();
        long.duration_minutes = 481;
        assert!(long.validate().is_err());

        let mut bad_start = event_args();
        bad_start.start_iso = "tomorrow at nine".into();
        assert!(bad_start.validate().is_err());
    }

    #[test]
    fn create_event_defaults_fill_optional_fields() {
        let args: CreateEventArgs = serde_json::from_value(json!({
            "summary": "Check-in",
            "start_iso": "2025-08-18T09:00"
        }))
        .unwrap();
        assert_eq!(args.duration_minutes, 30);
        assert!(args.attendees.is_empty());
        let event = args.to_new_event().unwrap();
        assert_eq!(event.start.plus_minutes(30).to_iso(), "2025-08-18T09:30:00");
    }

    #[test]
    fn retrieve_context_requires_query_and_bounded_count() {
        assert!(RetrieveContextArgs::new("  ").validate().is_err());
        let mut args = RetrieveContextArgs::new("parking");
        args.match_count = Some(21);
        assert!(args.validate().is_err());
        args.match_count = Some(20);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn log_interaction_requires_identifiers() {
        let args = LogInteractionArgs {
            session_id: "s".into(),
            event_type: " ".into(),
            payload: json!({}),
        };
        assert!(args.validate().is_err());
    }
}
