use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rmcp::model::CallToolRequestParams;
use rmcp::transport::{ConfigureCommandExt, TokioChildProcess};
use rmcp::ServiceExt;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::process::Command;

use super::catalog::{
    CreateEventArgs, ListCalendarEventsArgs, ListRecentEmailsArgs, LogInteractionArgs,
    RetrieveContextArgs, SendEmailArgs, ToolArgs, ToolName,
};
use super::runtime::ToolRuntime;
use crate::core::config::settings::ToolSettings;
use crate::core::errors::ConciergeError;
use crate::rag::Hit;
use crate::workspace::{CalendarEvent, EmailSummary};

/// Subcommand that runs the stdio tool server.
pub const SERVE_TOOLS_COMMAND: &str = "serve-tools";

/// Client adapter: one tool server subprocess per call, spoken to over
/// stdio with MCP. The subprocess is torn down once the response arrives.
pub struct RemoteRuntime {
    program: PathBuf,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    timeout: Duration,
}

impl RemoteRuntime {
    pub fn new(command: &[String], timeout: Duration) -> Result<Self, ConciergeError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| ConciergeError::Configuration("tool server command is empty".into()))?;
        Ok(Self {
            program: PathBuf::from(program),
            args: args.to_vec(),
            envs: Vec::new(),
            timeout,
        })
    }

    /// Uses the configured command, or this executable with `serve-tools`.
    pub fn from_settings(settings: &ToolSettings) -> Result<Self, ConciergeError> {
        let timeout = Duration::from_secs(settings.call_timeout_secs);
        if !settings.server_command.is_empty() {
            return Self::new(&settings.server_command, timeout);
        }
        let exe = std::env::current_exe().map_err(ConciergeError::internal)?;
        Ok(Self {
            program: exe,
            args: vec![SERVE_TOOLS_COMMAND.to_string()],
            envs: Vec::new(),
            timeout,
        })
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }

    async fn call<A: ToolArgs>(&self, args: &A) -> Result<A::Output, ConciergeError> {
        args.validate()?;
        let tool = A::TOOL;
        let arguments = to_arguments(args)?;
        let started = Instant::now();

        let value = tokio::time::timeout(self.timeout, self.round_trip(tool, arguments))
            .await
            .map_err(|_| {
                ConciergeError::Transport(format!(
                    "{} timed out after {}s",
                    tool,
                    self.timeout.as_secs()
                ))
            })??;

        tracing::debug!(
            tool = tool.as_str(),
            latency_ms = started.elapsed().as_millis() as u64,
            "remote tool call completed"
        );
        serde_json::from_value(value)
            .map_err(|err| ConciergeError::Transport(format!("malformed {} response: {}", tool, err)))
    }

    async fn round_trip(&self, tool: ToolName, arguments: Map<String, Value>) -> Result<Value, ConciergeError> {
        let cmd = Command::new(&self.program);
        let transport = TokioChildProcess::new(cmd.configure(|cmd| {
            cmd.args(&self.args);
            cmd.envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }))
        .map_err(|err| {
            ConciergeError::Transport(format!(
                "failed to spawn tool server '{}': {}",
                self.program.display(),
                err
            ))
        })?;

        let service = ().serve(transport).await.map_err(|err| {
            ConciergeError::Transport(format!("failed to initialise tool server: {}", err))
        })?;

        let params = CallToolRequestParams {
            name: tool.as_str().into(),
            arguments: Some(arguments),
            meta: None,
            task: None,
        };
        let result = service.call_tool(params).await;
        if let Err(err) = service.cancel().await {
            tracing::debug!(error = %err, "tool server shutdown did not complete cleanly");
        }

        let result = result.map_err(|err| ConciergeError::Transport(format!("{} call failed: {}", tool, err)))?;
        let value = serde_json::to_value(&result).map_err(ConciergeError::transport)?;
        read_tool_result(tool, &value)
    }
}

fn to_arguments<A: Serialize>(args: &A) -> Result<Map<String, Value>, ConciergeError> {
    match serde_json::to_value(args).map_err(ConciergeError::internal)? {
        Value::Object(map) => Ok(map),
        other => Err(ConciergeError::Internal(format!(
            "tool arguments must serialise to an object, got {}",
            other
        ))),
    }
}

/// Structured payload of a `CallToolResult`, or a transport error for
/// declared tool errors and unreadable results.
pub fn read_tool_result(tool: ToolName, value: &Value) -> Result<Value, ConciergeError> {
    let text = value
        .get("content")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default();

    let is_error = value
        .get("is_error")
        .or_else(|| value.get("isError"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if is_error {
        return Err(ConciergeError::Transport(format!(
            "{} reported an error: {}",
            tool,
            if text.is_empty() { "no details" } else { text.as_str() }
        )));
    }

    if let Some(structured) = value
        .get("structuredContent")
        .or_else(|| value.get("structured_content"))
        .filter(|v| v.is_object())
    {
        return Ok(structured.clone());
    }

    // Older servers only send the JSON as text content.
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(parsed) if parsed.is_object() => Ok(parsed),
        _ => Err(ConciergeError::Transport(format!(
            "{} returned no structured content",
            tool
        ))),
    }
}

#[async_trait]
impl ToolRuntime for RemoteRuntime {
    fn name(&self) -> &str {
        "remote"
    }

    async fn retrieve_context(&self, args: &RetrieveContextArgs) -> Result<Vec<Hit>, ConciergeError> {
        Ok(self.call(args).await?.hits)
    }

    async fn log_interaction(&self, args: &LogInteractionArgs) -> Result<(), ConciergeError> {
        self.call(args).await.map(|_| ())
    }

    async fn list_calendar_events(
        &self,
        args: &ListCalendarEventsArgs,
    ) -> Result<Vec<CalendarEvent>, ConciergeError> {
        Ok(self.call(args).await?.events)
    }

    async fn list_recent_emails(
        &self,
        args: &ListRecentEmailsArgs,
    ) -> Result<Vec<EmailSummary>, ConciergeError> {
        Ok(self.call(args).await?.messages)
    }

    async fn send_email(&self, args: &SendEmailArgs) -> Result<String, ConciergeError> {
        Ok(self.call(args).await?.message_id)
    }

    async fn create_event(&self, args: &CreateEventArgs) -> Result<String, ConciergeError> {
        Ok(self.call(args).await?.event_id)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn missing_binary() -> RemoteRuntime {
        RemoteRuntime::new(
            &["/nonexistent/concierge-tool-server".to_string()],
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn empty_command_is_a_configuration_error() {
        let err = RemoteRuntime::new(&[], Duration::from_secs(1)).err().unwrap();
        assert!(err.is_configuration());
    }

    #[test]
    fn default_command_runs_this_binary_as_tool_server() {
        let runtime = RemoteRuntime::from_settings(&ToolSettings::default()).unwrap();
        assert_eq!(runtime.args, [SERVE_TOOLS_COMMAND]);
        assert_eq!(runtime.timeout, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn missing_server_is_a_transport_error() {
        let err = missing_binary()
            .retrieve_context(&RetrieveContextArgs::new("parking"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConciergeError::Transport(_)), "{err}");
    }

    #[tokio::test]
    async fn invalid_arguments_fail_before_spawning() {
        let err = missing_binary()
            .send_email(&SendEmailArgs {
                to_address: " ".into(),
                subject: "Hi".into(),
                body: "Body".into(),
            })
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn structured_content_wins_over_text() {
        let value = json!({
            "content": [{"type": "text", "text": "{\"status\": \"ignored\"}"}],
            "structuredContent": {"status": "logged"},
            "isError": false
        });
        let out = read_tool_result(ToolName::LogInteraction, &value).unwrap();
        assert_eq!(out, json!({"status": "logged"}));
    }

    #[test]
    fn text_json_is_accepted_without_structured_content() {
        let value = json!({"content": [{"type": "text", "text": "{\"message_id\": \"m-1\"}"}]});
        let out = read_tool_result(ToolName::SendEmail, &value).unwrap();
        assert_eq!(out["message_id"], "m-1");
    }

    #[test]
    fn declared_tool_error_becomes_transport_error() {
        let value = json!({
            "content": [{"type": "text", "text": "send_email failed: quota exceeded"}],
            "isError": true
        });
        let err = read_tool_result(ToolName::SendEmail, &value).unwrap_err();
        assert!(matches!(err, ConciergeError::Transport(ref msg) if msg.contains("quota exceeded")));
    }

    #[test]
    fn plain_text_result_is_malformed() {
        let value = json!({"content": [{"type": "text", "text": "ok"}]});
        assert!(read_tool_result(ToolName::LogInteraction, &value).is_err());
    }
}
