//! Tool-invocation bridge.
//!
//! The same six tools are reachable three ways: directly in-process
//! ([`DirectRuntime`]), through a stdio MCP subprocess ([`RemoteRuntime`]),
//! or both, remote first ([`FallbackRuntime`]). [`server`] is the other end
//! of the remote path.

pub mod catalog;
pub mod fallback;
pub mod remote;
pub mod runtime;
pub mod server;

pub use catalog::{
    catalog, descriptor, CreateEventArgs, ListCalendarEventsArgs, ListRecentEmailsArgs,
    LogInteractionArgs, RetrieveContextArgs, SendEmailArgs, ToolArgs, ToolDescriptor, ToolName,
};
pub use fallback::FallbackRuntime;
pub use remote::{RemoteRuntime, SERVE_TOOLS_COMMAND};
pub use runtime::{DirectRuntime, ToolRuntime};
pub use server::{dispatch, run_stdio_server, ToolServer};
