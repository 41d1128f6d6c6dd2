//! Drives the real `concierge serve-tools` subprocess over stdio.

use std::time::Duration;

use serde_json::json;

use concierge_backend::history::HistoryStore;
use concierge_backend::tools::{LogInteractionArgs, RemoteRuntime, ToolRuntime};

fn server(data_dir: &std::path::Path) -> RemoteRuntime {
    RemoteRuntime::new(
        &[
            env!("CARGO_BIN_EXE_concierge").to_string(),
            "serve-tools".to_string(),
        ],
        Duration::from_secs(30),
    )
    .unwrap()
    .with_env("CONCIERGE_ROOT", data_dir.to_string_lossy())
    .with_env("CONCIERGE_DATA_DIR", data_dir.to_string_lossy())
    .with_env("CONCIERGE_DISABLE_TOOL_SERVER", "1")
}

#[tokio::test]
async fn log_interaction_round_trips_through_the_subprocess() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = server(dir.path());

    runtime
        .log_interaction(&LogInteractionArgs {
            session_id: "remote-session".into(),
            event_type: "assistant_reply".into(),
            payload: json!({"prompt": "Where is the bookstore?"}),
        })
        .await
        .unwrap();

    let store = HistoryStore::new(dir.path().join("concierge.db")).await.unwrap();
    let events = store.list_events("remote-session").await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].payload["prompt"], "Where is the bookstore?");
}
