use thiserror::Error;

#[derive(Debug, Error)]
pub enum InitializationError {
    #[error("Failed to load configuration: {0}")]
    Config(#[source] anyhow::Error),

    #[error("Failed to initialize history store: {0}")]
    History(#[source] anyhow::Error),

    #[error("Failed to initialize retrieval: {0}")]
    Rag(#[source] anyhow::Error),

    #[error("Failed to initialize chat provider: {0}")]
    Llm(#[source] anyhow::Error),

    #[error("Failed to initialize workspace client: {0}")]
    Workspace(#[source] anyhow::Error),

    #[error("Failed to initialize tool bridge: {0}")]
    Tools(#[source] anyhow::Error),
}
