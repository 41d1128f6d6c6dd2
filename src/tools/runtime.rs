use std::sync::Arc;

use async_trait::async_trait;

use super::catalog::{
    CreateEventArgs, ListCalendarEventsArgs, ListRecentEmailsArgs, LogInteractionArgs,
    RetrieveContextArgs, SendEmailArgs, ToolArgs,
};
use crate::core::errors::ConciergeError;
use crate::history::ActionLog;
use crate::rag::{ContextSource, Hit, VectorRetriever};
use crate::workspace::{clamp_results, CalendarEvent, EmailSummary, WorkspaceService};

/// One capability, several transports: every catalog tool as a typed call.
///
/// Implementations must reject invalid arguments with
/// [`ConciergeError::Validation`] before doing any I/O.
#[async_trait]
pub trait ToolRuntime: Send + Sync {
    fn name(&self) -> &str;

    async fn retrieve_context(&self, args: &RetrieveContextArgs) -> Result<Vec<Hit>, ConciergeError>;

    async fn log_interaction(&self, args: &LogInteractionArgs) -> Result<(), ConciergeError>;

    async fn list_calendar_events(
        &self,
        args: &ListCalendarEventsArgs,
    ) -> Result<Vec<CalendarEvent>, ConciergeError>;

    async fn list_recent_emails(
        &self,
        args: &ListRecentEmailsArgs,
    ) -> Result<Vec<EmailSummary>, ConciergeError>;

    /// Returns the provider message id.
    async fn send_email(&self, args: &SendEmailArgs) -> Result<String, ConciergeError>;

    /// Returns the provider event id.
    async fn create_event(&self, args: &CreateEventArgs) -> Result<String, ConciergeError>;
}

#[async_trait]
impl<T: ToolRuntime + ?Sized> ContextSource for Arc<T> {
    async fn retrieve_hits(
        &self,
        query: &str,
        match_count: Option<u32>,
    ) -> Result<Vec<Hit>, ConciergeError> {
        let args = RetrieveContextArgs {
            query: query.to_string(),
            match_count,
            extra_filter: None,
        };
        self.retrieve_context(&args).await
    }
}

/// In-process adapter: calls the collaborators directly.
pub struct DirectRuntime {
    retriever: Arc<VectorRetriever>,
    action_log: Arc<dyn ActionLog>,
    workspace: Arc<dyn WorkspaceService>,
}

impl DirectRuntime {
    pub fn new(
        retriever: Arc<VectorRetriever>,
        action_log: Arc<dyn ActionLog>,
        workspace: Arc<dyn WorkspaceService>,
    ) -> Self {
        Self {
            retriever,
            action_log,
            workspace,
        }
    }
}

#[async_trait]
impl ToolRuntime for DirectRuntime {
    fn name(&self) -> &str {
        "direct"
    }

    async fn retrieve_context(&self, args: &RetrieveContextArgs) -> Result<Vec<Hit>, ConciergeError> {
        args.validate()?;
        self.retriever
            .retrieve(&args.query, args.match_count, args.extra_filter.clone())
            .await
    }

    async fn log_interaction(&self, args: &LogInteractionArgs) -> Result<(), ConciergeError> {
        args.validate()?;
        self.action_log
            .log(&args.session_id, &args.event_type, &args.payload)
            .await
    }

    async fn list_calendar_events(
        &self,
        args: &ListCalendarEventsArgs,
    ) -> Result<Vec<CalendarEvent>, ConciergeError> {
        args.validate()?;
        self.workspace
            .list_calendar_events(clamp_results(args.max_results))
            .await
    }

    async fn list_recent_emails(
        &self,
        args: &ListRecentEmailsArgs,
    ) -> Result<Vec<EmailSummary>, ConciergeError> {
        args.validate()?;
        self.workspace
            .list_recent_messages(&args.query, clamp_results(args.max_results))
            .await
    }

    async fn send_email(&self, args: &SendEmailArgs) -> Result<String, ConciergeError> {
        args.validate()?;
        let message_id = self
            .workspace
            .send_email(args.to_address.trim(), args.subject.trim(), &args.body)
            .await?;
        tracing::info!(message_id = %message_id, "email sent");
        Ok(message_id)
    }

    async fn create_event(&self, args: &CreateEventArgs) -> Result<String, ConciergeError> {
        let event = args.to_new_event()?;
        let event_id = self.workspace.create_event(&event).await?;
        tracing::info!(
            event_id = %event_id,
            attendees = event.attendees.len(),
            "calendar event created"
        );
        Ok(event_id)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fakes shared by the tool tests.

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use serde_json::{json, Value};

    use super::*;
    use crate::core::config::settings::RetrievalSettings;
    use crate::rag::retriever::{MatchRequest, VectorSearch};
    use crate::rag::Embedder;
    use crate::workspace::NewEvent;

    pub struct FixedEmbedder;

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ConciergeError> {
            Ok(vec![0.1, 0.2, 0.3])
        }
    }

    pub struct CannedSearch {
        pub rows: Vec<Value>,
    }

    #[async_trait]
    impl VectorSearch for CannedSearch {
        async fn match_rows(&self, request: &MatchRequest) -> Result<Vec<Value>, ConciergeError> {
            Ok(self
                .rows
                .iter()
                .take(request.match_count as usize)
                .cloned()
                .collect())
        }
    }

    pub fn retriever() -> Arc<VectorRetriever> {
        let rows = vec![
            json!({"content": "Shuttles run every 20 minutes.", "title": "Transportation", "similarity": 0.91}),
            json!({"content": "Orientation starts Monday.", "metadata": {"title": "Orientation"}, "similarity": 0.72}),
        ];
        Arc::new(VectorRetriever::new(
            Arc::new(FixedEmbedder),
            Arc::new(CannedSearch { rows }),
            &RetrievalSettings::default(),
        ))
    }

    #[derive(Default)]
    pub struct RecordingLog {
        pub entries: Mutex<Vec<(String, String, Value)>>,
    }

    #[async_trait]
    impl ActionLog for RecordingLog {
        async fn log(&self, session_id: &str, event_type: &str, payload: &Value) -> Result<(), ConciergeError> {
            self.entries
                .lock()
                .unwrap()
                .push((session_id.into(), event_type.into(), payload.clone()));
            Ok(())
        }
    }

    /// Counts every call that would have reached the network.
    #[derive(Default)]
    pub struct CountingWorkspace {
        pub calls: AtomicUsize,
        pub created: Mutex<Vec<NewEvent>>,
    }

    impl CountingWorkspace {
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl WorkspaceService for CountingWorkspace {
        async fn list_calendar_events(&self, max_results: u32) -> Result<Vec<CalendarEvent>, ConciergeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok((0..max_results.min(2))
                .map(|i| CalendarEvent {
                    id: format!("evt-{}", i),
                    summary: "Advising".into(),
                    ..Default::default()
                })
                .collect())
        }

        async fn list_recent_messages(
            &self,
            query: &str,
            _max_results: u32,
        ) -> Result<Vec<EmailSummary>, ConciergeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![EmailSummary {
                id: "m-1".into(),
                subject: format!("re: {}", query),
                ..Default::default()
            }])
        }

        async fn send_email(&self, _to: &str, _subject: &str, _body: &str) -> Result<String, ConciergeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("msg-123".into())
        }

        async fn create_event(&self, event: &NewEvent) -> Result<String, ConciergeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.created.lock().unwrap().push(event.clone());
            Ok("evt-new".into())
        }
    }

    pub fn direct(workspace: Arc<CountingWorkspace>, log: Arc<RecordingLog>) -> DirectRuntime {
        DirectRuntime::new(retriever(), log, workspace)
    }
}
