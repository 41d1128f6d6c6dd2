use async_trait::async_trait;
use tokio::sync::mpsc;

use super::types::ChatRequest;
use crate::core::errors::ConciergeError;

/// Receiver of incremental text fragments. An `Err` item ends the stream.
pub type FragmentStream = mpsc::Receiver<Result<String, ConciergeError>>;

#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// provider name used in logs
    fn name(&self) -> &str;

    /// chat completion (streaming); dropping the receiver releases the connection
    async fn stream_chat(&self, request: ChatRequest) -> Result<FragmentStream, ConciergeError>;
}
