use std::sync::Arc;

use rmcp::model::{
    CallToolRequestParams, CallToolResult, Content, Implementation, ListToolsResult,
    PaginatedRequestParams, ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::{ErrorData, ServerHandler, ServiceExt};
use serde::Serialize;
use serde_json::{Map, Value};

use super::catalog::{
    catalog, descriptor, CreateEventArgs, CreateEventOutput, ListCalendarEventsArgs,
    ListCalendarEventsOutput, ListRecentEmailsArgs, ListRecentEmailsOutput, LogInteractionArgs,
    LogInteractionOutput, RetrieveContextArgs, RetrieveContextOutput, SendEmailArgs,
    SendEmailOutput, ToolArgs, ToolName, SERVER_NAME, SERVER_VERSION,
};
use super::runtime::ToolRuntime;
use crate::core::errors::ConciergeError;

/// Runs one catalog tool by name against `runtime`.
///
/// Arguments are checked against the tool's input schema, then parsed and
/// validated as typed records before the runtime sees them.
pub async fn dispatch(
    runtime: &dyn ToolRuntime,
    name: &str,
    arguments: Value,
) -> Result<Value, ConciergeError> {
    let tool: ToolName = name.parse()?;
    check_schema(tool, &arguments)?;

    match tool {
        ToolName::RetrieveContext => {
            let args: RetrieveContextArgs = parse_args(arguments)?;
            let hits = runtime.retrieve_context(&args).await?;
            to_output(&RetrieveContextOutput { hits })
        }
        ToolName::LogInteraction => {
            let args: LogInteractionArgs = parse_args(arguments)?;
            runtime.log_interaction(&args).await?;
            to_output(&LogInteractionOutput {
                status: "logged".into(),
            })
        }
        ToolName::ListCalendarEvents => {
            let args: ListCalendarEventsArgs = parse_args(arguments)?;
            let events = runtime.list_calendar_events(&args).await?;
            to_output(&ListCalendarEventsOutput { events })
        }
        ToolName::ListRecentEmails => {
            let args: ListRecentEmailsArgs = parse_args(arguments)?;
            let messages = runtime.list_recent_emails(&args).await?;
            to_output(&ListRecentEmailsOutput { messages })
        }
        ToolName::SendEmail => {
            let args: SendEmailArgs = parse_args(arguments)?;
            let message_id = runtime.send_email(&args).await?;
            to_output(&SendEmailOutput { message_id })
        }
        ToolName::CreateEvent => {
            let args: CreateEventArgs = parse_args(arguments)?;
            let event_id = runtime.create_event(&args).await?;
            to_output(&CreateEventOutput { event_id })
        }
    }
}

fn check_schema(tool: ToolName, arguments: &Value) -> Result<(), ConciergeError> {
    let schema = descriptor(tool).input_schema;
    let validator = jsonschema::validator_for(&schema).map_err(ConciergeError::internal)?;
    let problems: Vec<String> = validator
        .iter_errors(arguments)
        .map(|err| err.to_string())
        .collect();
    if problems.is_empty() {
        Ok(())
    } else {
        Err(ConciergeError::Validation(problems.join("; ")))
    }
}

fn parse_args<A: ToolArgs>(arguments: Value) -> Result<A, ConciergeError> {
    let args: A = serde_json::from_value(arguments)
        .map_err(|err| ConciergeError::Validation(format!("invalid {} arguments: {}", A::TOOL, err)))?;
    args.validate()?;
    Ok(args)
}

fn to_output<T: Serialize>(output: &T) -> Result<Value, ConciergeError> {
    serde_json::to_value(output).map_err(ConciergeError::internal)
}

/// MCP server over the tool catalog. Each call runs on its own task so a
/// slow collaborator never stalls the message loop.
#[derive(Clone)]
pub struct ToolServer {
    runtime: Arc<dyn ToolRuntime>,
}

impl ToolServer {
    pub fn new(runtime: Arc<dyn ToolRuntime>) -> Self {
        Self { runtime }
    }

    pub fn tools() -> Result<Vec<Tool>, ConciergeError> {
        catalog()
            .iter()
            .map(|entry| serde_json::from_value::<Tool>(entry.to_tool_json()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(ConciergeError::internal)
    }

    pub async fn handle(&self, name: &str, arguments: Option<Map<String, Value>>) -> CallToolResult {
        let runtime = self.runtime.clone();
        let tool = name.to_string();
        let arguments = Value::Object(arguments.unwrap_or_default());

        let worker = tokio::spawn(async move { dispatch(runtime.as_ref(), &tool, arguments).await });
        let outcome = match worker.await {
            Ok(outcome) => outcome,
            Err(err) => Err(ConciergeError::internal(err)),
        };

        match outcome {
            Ok(value) => CallToolResult::structured(value),
            Err(err) => {
                tracing::warn!(tool = name, error = %err, "tool call failed");
                CallToolResult::error(vec![Content::text(format!("{} failed: {}", name, err))])
            }
        }
    }
}

impl ServerHandler for ToolServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "USF concierge tools: campus knowledge retrieval, audit logging, calendar and mail."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: SERVER_NAME.into(),
                version: SERVER_VERSION.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        let tools = Self::tools().map_err(|err| ErrorData::internal_error(err.to_string(), None))?;
        Ok(ListToolsResult::with_all_items(tools))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        Ok(self.handle(&request.name, request.arguments).await)
    }
}

/// Serves the catalog on stdin/stdout until the client disconnects.
pub async fn run_stdio_server(runtime: Arc<dyn ToolRuntime>) -> Result<(), ConciergeError> {
    tracing::info!(name = SERVER_NAME, version = SERVER_VERSION, "tool server starting on stdio");
    let service = ToolServer::new(runtime)
        .serve(rmcp::transport::stdio())
        .await
        .map_err(ConciergeError::transport)?;
    let reason = service.waiting().await.map_err(ConciergeError::internal)?;
    tracing::info!(reason = ?reason, "tool server stopped");
    Ok(())
}
