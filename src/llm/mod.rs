pub mod azure;
pub mod provider;
pub mod types;

pub use azure::AzureOpenAiProvider;
pub use provider::{ChatProvider, FragmentStream};
pub use types::{ChatMessage, ChatRequest};
