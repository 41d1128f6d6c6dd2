use std::sync::Arc;

use crate::conversation::ConversationService;
use crate::core::config::{AppPaths, ConfigService, Settings};
use crate::history::HistoryStore;
use crate::llm::AzureOpenAiProvider;
use crate::rag::{
    HuggingFaceEmbedder, QueryAugmenter, StreamingGenerator, SupabaseVectorSearch, VectorRetriever,
};
use crate::session::{InMemorySessionStore, SessionStore};
use crate::tools::{DirectRuntime, FallbackRuntime, RemoteRuntime, ToolRuntime};
use crate::workspace::GoogleWorkspace;

pub mod error;

use error::InitializationError;

/// Application state, built once at start-up and passed by reference.
///
/// Credentials are checked when a collaborator is first used, so a state
/// without, say, a Google token still serves retrieval.
#[derive(Clone)]
pub struct AppState {
    pub paths: Arc<AppPaths>,
    pub config: ConfigService,
    pub settings: Arc<Settings>,
    pub history: HistoryStore,
    pub sessions: Arc<dyn SessionStore>,
    /// In-process tools; what the stdio tool server runs.
    pub direct_tools: Arc<DirectRuntime>,
    /// Tools as seen by callers: remote with in-process fallback, or
    /// in-process only when the tool server is disabled.
    pub tools: Arc<dyn ToolRuntime>,
    pub generator: Arc<StreamingGenerator>,
}

impl AppState {
    pub async fn initialize(paths: Arc<AppPaths>) -> Result<Arc<Self>, InitializationError> {
        let config = ConfigService::new(paths.clone());
        let settings = config
            .load_settings()
            .map_err(|e| InitializationError::Config(e.into()))?;
        Self::from_settings(paths, config, settings).await
    }

    pub async fn from_settings(
        paths: Arc<AppPaths>,
        config: ConfigService,
        settings: Settings,
    ) -> Result<Arc<Self>, InitializationError> {
        let history = HistoryStore::new(paths.db_path.clone())
            .await
            .map_err(|e| InitializationError::History(e.into()))?;

        let embedder = HuggingFaceEmbedder::new(settings.embedding.clone())
            .map_err(|e| InitializationError::Rag(e.into()))?;
        let search = SupabaseVectorSearch::new(settings.retrieval.clone())
            .map_err(|e| InitializationError::Rag(e.into()))?;
        let retriever = Arc::new(VectorRetriever::new(
            Arc::new(embedder),
            Arc::new(search),
            &settings.retrieval,
        ));

        let workspace = GoogleWorkspace::new(settings.workspace.clone())
            .map_err(|e| InitializationError::Workspace(e.into()))?;

        let direct_tools = Arc::new(DirectRuntime::new(
            retriever,
            Arc::new(history.clone()),
            Arc::new(workspace),
        ));

        let tools: Arc<dyn ToolRuntime> = if settings.tools.disabled {
            tracing::info!("tool server disabled; using in-process tools only");
            direct_tools.clone()
        } else {
            let remote = RemoteRuntime::from_settings(&settings.tools)
                .map_err(|e| InitializationError::Tools(e.into()))?
                .with_env("CONCIERGE_DATA_DIR", paths.data_dir.to_string_lossy());
            tracing::info!(program = %remote.program().display(), "tool bridge uses stdio server with in-process fallback");
            Arc::new(FallbackRuntime::new(Arc::new(remote), direct_tools.clone()))
        };

        let chat = AzureOpenAiProvider::new(settings.chat.clone())
            .map_err(|e| InitializationError::Llm(e.into()))?;
        let generator = Arc::new(StreamingGenerator::new(
            Arc::new(chat),
            QueryAugmenter::default(),
            settings.prompt.system_prompt.clone(),
        ));

        Ok(Arc::new(Self {
            paths,
            config,
            settings: Arc::new(settings),
            history,
            sessions: Arc::new(InMemorySessionStore::new()),
            direct_tools,
            tools,
            generator,
        }))
    }

    pub fn conversation(&self, match_count: Option<u32>) -> ConversationService {
        ConversationService::new(
            self.generator.clone(),
            self.tools.clone(),
            Arc::new(self.history.clone()),
        )
        .with_match_count(match_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::LogInteractionArgs;

    #[tokio::test]
    async fn disabled_tool_server_logs_in_process() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Arc::new(AppPaths::with_data_dir(
            dir.path().to_path_buf(),
            dir.path().join("data"),
        ));
        let config = ConfigService::new(paths.clone());
        let mut settings = Settings::default();
        settings.tools.disabled = true;

        let state = AppState::from_settings(paths, config, settings).await.unwrap();
        assert_eq!(state.tools.name(), "direct");

        state
            .tools
            .log_interaction(&LogInteractionArgs {
                session_id: "s-1".into(),
                event_type: "assistant_reply".into(),
                payload: serde_json::json!({"ok": true}),
            })
            .await
            .unwrap();
        let events = state.history.list_events("s-1").await.unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn enabled_tool_server_is_wrapped_in_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Arc::new(AppPaths::with_data_dir(
            dir.path().to_path_buf(),
            dir.path().join("data"),
        ));
        let config = ConfigService::new(paths.clone());
        let state = AppState::from_settings(paths, config, Settings::default())
            .await
            .unwrap();
        assert_eq!(state.tools.name(), "fallback");
    }
}
