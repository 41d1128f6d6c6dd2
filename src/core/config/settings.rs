use std::env;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::errors::ConciergeError;

pub const DEFAULT_EMBEDDING_MODEL: &str = "google/embeddinggemma-300m";
pub const DEFAULT_EMBEDDING_BASE_URL: &str = "https://router.huggingface.co/hf-inference";
pub const DEFAULT_MATCH_FUNCTION: &str = "match_document_chunks";
pub const DEFAULT_MATCH_COUNT: u32 = 6;

/// Typed view over the merged `config.yml` + `secrets.yaml` + environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub embedding: EmbeddingSettings,
    pub chat: ChatSettings,
    pub retrieval: RetrievalSettings,
    pub prompt: PromptSettings,
    pub tools: ToolSettings,
    pub workspace: WorkspaceSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub model: String,
    pub api_token: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            api_token: None,
            base_url: DEFAULT_EMBEDDING_BASE_URL.to_string(),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub deployment: Option<String>,
    pub temperature: f64,
    pub connect_timeout_secs: u64,
    /// Maximum silence between two stream chunks.
    pub stream_idle_timeout_secs: u64,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            deployment: None,
            temperature: 0.2,
            connect_timeout_secs: 15,
            stream_idle_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub supabase_url: Option<String>,
    pub supabase_key: Option<String>,
    pub match_function: String,
    pub default_match_count: u32,
    /// Raw JSON object text. Malformed values are ignored at query time.
    pub default_filter: Option<String>,
    pub timeout_secs: u64,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            supabase_url: None,
            supabase_key: None,
            match_function: DEFAULT_MATCH_FUNCTION.to_string(),
            default_match_count: DEFAULT_MATCH_COUNT,
            default_filter: None,
            timeout_secs: 60,
        }
    }
}

impl RetrievalSettings {
    /// Parses `default_filter`, yielding `None` unless it is a JSON object.
    pub fn parsed_default_filter(&self) -> Option<Map<String, Value>> {
        let raw = self.default_filter.as_deref()?.trim();
        if raw.is_empty() {
            return None;
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Some(map),
            Ok(_) | Err(_) => {
                tracing::debug!("ignoring malformed default retrieval filter");
                None
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptSettings {
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolSettings {
    /// Use the in-process runtime only.
    pub disabled: bool,
    /// Program and arguments of the tool server. Empty means this executable with `serve-tools`.
    pub server_command: Vec<String>,
    pub call_timeout_secs: u64,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            disabled: false,
            server_command: Vec::new(),
            call_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceSettings {
    pub access_token: Option<String>,
    pub calendar_base_url: String,
    pub gmail_base_url: String,
    pub calendar_id: String,
    pub time_zone: String,
    pub timeout_secs: u64,
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        Self {
            access_token: None,
            calendar_base_url: "https://www.googleapis.com/calendar/v3".to_string(),
            gmail_base_url: "https://gmail.googleapis.com/gmail/v1".to_string(),
            calendar_id: "primary".to_string(),
            time_zone: "America/New_York".to_string(),
            timeout_secs: 30,
        }
    }
}

impl Settings {
    pub fn from_value(value: &Value) -> Result<Self, ConciergeError> {
        serde_json::from_value(value.clone()).map_err(|e| {
            ConciergeError::Configuration(format!("invalid configuration file: {}", e))
        })
    }

    /// Overlays recognised environment variables on top of file values.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("HUGGINGFACEHUB_API_TOKEN") {
            self.embedding.api_token = Some(v);
        }
        if let Some(v) = get("HUGGINGFACE_EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        if let Some(v) = get("AZURE_OPENAI_ENDPOINT") {
            self.chat.endpoint = Some(v);
        }
        if let Some(v) = get("AZURE_OPENAI_API_KEY") {
            self.chat.api_key = Some(v);
        }
        if let Some(v) = get("AZURE_OPENAI_DEPLOYMENT") {
            self.chat.deployment = Some(v);
        }
        if let Some(v) = get("SUPABASE_URL") {
            self.retrieval.supabase_url = Some(v);
        }
        if let Some(v) = get("SUPABASE_KEY") {
            self.retrieval.supabase_key = Some(v);
        }
        if let Some(v) = get("SUPABASE_MATCH_FUNCTION") {
            self.retrieval.match_function = v;
        }
        if let Some(count) = get("SUPABASE_MATCH_COUNT").and_then(|v| v.trim().parse().ok()) {
            self.retrieval.default_match_count = count;
        }
        if let Some(v) = get("SUPABASE_MATCH_FILTER") {
            self.retrieval.default_filter = Some(v);
        }
        if let Some(v) = get("RAG_SYSTEM_PROMPT") {
            self.prompt.system_prompt = Some(decode_escapes(&v));
        }
        if let Some(v) = get("GOOGLE_ACCESS_TOKEN") {
            self.workspace.access_token = Some(v);
        }
        if let Some(v) = get("CONCIERGE_DISABLE_TOOL_SERVER") {
            self.tools.disabled = matches!(v.trim(), "1" | "true" | "yes");
        }
        if let Some(secs) = get("CONCIERGE_TOOL_TIMEOUT_SECS").and_then(|v| v.trim().parse().ok()) {
            self.tools.call_timeout_secs = secs;
        }
    }
}

/// Returns the value or a named configuration error.
pub fn require<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, ConciergeError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConciergeError::missing_setting(name))
}

/// Decodes backslash escapes so prompts can carry newlines through env vars.
pub fn decode_escapes(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some('\'') => out.push('\''),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
