use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};

use super::{clamp_results, CalendarEvent, EmailSummary, EventStart, NewEvent, WorkspaceService};
use crate::core::config::settings::{require, WorkspaceSettings};
use crate::core::errors::ConciergeError;

/// Google Calendar v3 and Gmail v1 over REST with a bearer access token.
pub struct GoogleWorkspace {
    client: Client,
    settings: WorkspaceSettings,
}

impl GoogleWorkspace {
    pub fn new(settings: WorkspaceSettings) -> Result<Self, ConciergeError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(ConciergeError::internal)?;
        Ok(Self { client, settings })
    }

    fn token(&self) -> Result<&str, ConciergeError> {
        require(&self.settings.access_token, "GOOGLE_ACCESS_TOKEN")
    }

    fn calendar_url(&self, suffix: &str) -> String {
        format!(
            "{}/calendars/{}/{}",
            self.settings.calendar_base_url.trim_end_matches('/'),
            self.settings.calendar_id,
            suffix
        )
    }

    fn gmail_url(&self, suffix: &str) -> String {
        format!(
            "{}/users/me/{}",
            self.settings.gmail_base_url.trim_end_matches('/'),
            suffix
        )
    }

    async fn send_json(&self, request: RequestBuilder, what: &str) -> Result<Value, ConciergeError> {
        let res = request
            .bearer_auth(self.token()?)
            .send()
            .await
            .map_err(|e| ConciergeError::Upstream(format!("{} request failed: {}", what, e)))?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(ConciergeError::Upstream(format!(
                "{} returned {}: {}",
                what, status, text
            )));
        }
        res.json::<Value>()
            .await
            .map_err(|e| ConciergeError::Upstream(format!("{} response is not JSON: {}", what, e)))
    }

    fn event_time(&self, at: &EventStart) -> Value {
        match at {
            EventStart::Zoned(_) => json!({ "dateTime": at.to_iso() }),
            EventStart::Local(_) => json!({
                "dateTime": at.to_iso(),
                "timeZone": self.settings.time_zone,
            }),
        }
    }
}

#[async_trait]
impl WorkspaceService for GoogleWorkspace {
    async fn list_calendar_events(&self, max_results: u32) -> Result<Vec<CalendarEvent>, ConciergeError> {
        let now = chrono::Utc::now().to_rfc3339();
        let max = clamp_results(max_results).to_string();
        let request = self.client.get(self.calendar_url("events")).query(&[
            ("maxResults", max.as_str()),
            ("singleEvents", "true"),
            ("orderBy", "startTime"),
            ("timeMin", now.as_str()),
        ]);
        let body = self.send_json(request, "calendar list").await?;

        let events = body
            .get("items")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(calendar_event_from).collect())
            .unwrap_or_default();
        Ok(events)
    }

    async fn list_recent_messages(
        &self,
        query: &str,
        max_results: u32,
    ) -> Result<Vec<EmailSummary>, ConciergeError> {
        let max = clamp_results(max_results).to_string();
        let mut params = vec![("maxResults", max.as_str())];
        if !query.trim().is_empty() {
            params.push(("q", query));
        }
        let listing = self
            .send_json(self.client.get(self.gmail_url("messages")).query(&params), "gmail list")
            .await?;

        let ids: Vec<String> = listing
            .get("messages")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get("id").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let mut summaries = Vec::with_capacity(ids.len());
        for id in ids {
            let request = self
                .client
                .get(self.gmail_url(&format!("messages/{}", id)))
                .query(&[
                    ("format", "metadata"),
                    ("metadataHeaders", "From"),
                    ("metadataHeaders", "Subject"),
                    ("metadataHeaders", "Date"),
                ]);
            let message = self.send_json(request, "gmail get").await?;
            summaries.push(email_summary_from(&id, &message));
        }
        Ok(summaries)
    }

    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<String, ConciergeError> {
        let raw = URL_SAFE_NO_PAD.encode(rfc822_message(to, subject, body));
        let request = self
            .client
            .post(self.gmail_url("messages/send"))
            .json(&json!({ "raw": raw }));
        let sent = self.send_json(request, "gmail send").await?;

        sent.get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ConciergeError::Upstream("gmail send response has no id".to_string()))
    }

    async fn create_event(&self, event: &NewEvent) -> Result<String, ConciergeError> {
        let end = event.start.plus_minutes(event.duration_minutes);
        let attendees: Vec<Value> = event
            .attendees
            .iter()
            .map(|email| json!({ "email": email }))
            .collect();
        let payload = json!({
            "summary": event.summary,
            "description": event.description,
            "location": event.location,
            "start": self.event_time(&event.start),
            "end": self.event_time(&end),
            "attendees": attendees,
        });

        let request = self.client.post(self.calendar_url("events")).json(&payload);
        let created = self.send_json(request, "calendar insert").await?;
        let id = created
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| ConciergeError::Upstream("calendar insert response has no id".to_string()))?;

        tracing::info!(event_id = id, attendees = event.attendees.len(), "calendar event created");
        Ok(id.to_string())
    }
}

fn calendar_event_from(item: &Value) -> CalendarEvent {
    let text = |key: &str| item.get(key).and_then(Value::as_str).map(str::to_string);
    let when = |key: &str| {
        item.get(key).and_then(|slot| {
            slot.get("dateTime")
                .or_else(|| slot.get("date"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
    };
    CalendarEvent {
        id: text("id").unwrap_or_default(),
        summary: text("summary").unwrap_or_else(|| "(no title)".to_string()),
        start: when("start"),
        end: when("end"),
        location: text("location"),
        html_link: text("htmlLink"),
        hangout_link: text("hangoutLink"),
    }
}

fn email_summary_from(id: &str, message: &Value) -> EmailSummary {
    let header = |name: &str| {
        message
            .pointer("/payload/headers")
            .and_then(Value::as_array)
            .and_then(|headers| {
                headers.iter().find(|h| {
                    h.get("name")
                        .and_then(Value::as_str)
                        .is_some_and(|n| n.eq_ignore_ascii_case(name))
                })
            })
            .and_then(|h| h.get("value"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    EmailSummary {
        id: id.to_string(),
        from: header("From"),
        subject: header("Subject"),
        date: header("Date"),
        snippet: message
            .get("snippet")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    }
}

fn rfc822_message(to: &str, subject: &str, body: &str) -> String {
    format!(
        "To: {}\r\nSubject: {}\r\nMIME-Version: 1.0\r\nContent-Type: text/plain; charset=\"UTF-8\"\r\n\r\n{}",
        header_value(to),
        encode_subject(&header_value(subject)),
        body
    )
}

/// Line breaks never reach a header line, even if a caller skipped validation.
fn header_value(value: &str) -> String {
    value
        .split(['\r', '\n'])
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// RFC 2047 encoded-word for subjects outside printable ASCII.
fn encode_subject(subject: &str) -> String {
    if subject.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        subject.to_string()
    } else {
        format!("=?UTF-8?B?{}?=", STANDARD.encode(subject))
    }
}
