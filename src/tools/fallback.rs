use std::sync::Arc;

use async_trait::async_trait;

use super::catalog::{
    CreateEventArgs, ListCalendarEventsArgs, ListRecentEmailsArgs, LogInteractionArgs,
    RetrieveContextArgs, SendEmailArgs, ToolArgs, ToolName,
};
use super::runtime::ToolRuntime;
use crate::core::errors::ConciergeError;
use crate::rag::Hit;
use crate::workspace::{CalendarEvent, EmailSummary};

/// Tries `primary` and, on any failure, runs the same call on `fallback`.
///
/// Argument validation runs first and its errors are returned as is. A
/// primary failure is only logged; the caller sees the fallback's result.
pub struct FallbackRuntime {
    primary: Arc<dyn ToolRuntime>,
    fallback: Arc<dyn ToolRuntime>,
}

impl FallbackRuntime {
    pub fn new(primary: Arc<dyn ToolRuntime>, fallback: Arc<dyn ToolRuntime>) -> Self {
        Self { primary, fallback }
    }

    fn report(&self, tool: ToolName, err: &ConciergeError) {
        tracing::warn!(
            tool = tool.as_str(),
            primary = self.primary.name(),
            fallback = self.fallback.name(),
            error = %err,
            "tool transport failed, falling back to in-process call"
        );
    }
}

#[async_trait]
impl ToolRuntime for FallbackRuntime {
    fn name(&self) -> &str {
        "fallback"
    }

    async fn retrieve_context(&self, args: &RetrieveContextArgs) -> Result<Vec<Hit>, ConciergeError> {
        args.validate()?;
        match self.primary.retrieve_context(args).await {
            Ok(hits) => Ok(hits),
            Err(err) => {
                self.report(RetrieveContextArgs::TOOL, &err);
                self.fallback.retrieve_context(args).await
            }
        }
    }

    async fn log_interaction(&self, args: &LogInteractionArgs) -> Result<(), ConciergeError> {
        args.validate()?;
        match self.primary.log_interaction(args).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.report(LogInteractionArgs::TOOL, &err);
                self.fallback.log_interaction(args).await
            }
        }
    }

    async fn list_calendar_events(
        &self,
        args: &ListCalendarEventsArgs,
    ) -> Result<Vec<CalendarEvent>, ConciergeError> {
        args.validate()?;
        match self.primary.list_calendar_events(args).await {
            Ok(events) => Ok(events),
            Err(err) => {
                self.report(ListCalendarEventsArgs::TOOL, &err);
                self.fallback.list_calendar_events(args).await
            }
        }
    }

    async fn list_recent_emails(
        &self,
        args: &ListRecentEmailsArgs,
    ) -> Result<Vec<EmailSummary>, ConciergeError> {
        args.validate()?;
        match self.primary.list_recent_emails(args).await {
            Ok(messages) => Ok(messages),
            Err(err) => {
                self.report(ListRecentEmailsArgs::TOOL, &err);
                self.fallback.list_recent_emails(args).await
            }
        }
    }

    // A timed-out primary may still have delivered the message, in which
    // case the fallback sends it a second time.
    async fn send_email(&self, args: &SendEmailArgs) -> Result<String, ConciergeError> {
        args.validate()?;
        match self.primary.send_email(args).await {
            Ok(id) => Ok(id),
            Err(err) => {
                self.report(SendEmailArgs::TOOL, &err);
                self.fallback.send_email(args).await
            }
        }
    }

    async fn create_event(&self, args: &CreateEventArgs) -> Result<String, ConciergeError> {
        args.validate()?;
        match self.primary.create_event(args).await {
            Ok(id) => Ok(id),
            Err(err) => {
                self.report(CreateEventArgs::TOOL, &err);
                self.fallback.create_event(args).await
            }
        }
    }
}
