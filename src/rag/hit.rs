//! Canonical retrieved-chunk record.
//!
//! Rows coming back from the similarity-search function carry the same field
//! either at the top level or nested under `metadata`. [`Hit::from_row`]
//! reconciles both shapes once, so nothing downstream branches on payload
//! shape again.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// One retrieved content chunk. Serialised as `{doc, meta, score}` on the tool wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    #[serde(rename = "doc", alias = "content")]
    pub content: String,
    #[serde(rename = "meta", alias = "metadata", default)]
    pub metadata: HitMetadata,
    #[serde(default)]
    pub score: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HitMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, alias = "canonical", skip_serializing_if = "Option::is_none")]
    pub canonical_url: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_identifier",
        skip_serializing_if = "Option::is_none"
    )]
    pub chunk_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

const RESERVED_KEYS: [&str; 9] = [
    "section_title",
    "title",
    "filename",
    "category",
    "canonical_url",
    "canonical",
    "chunk_id",
    "id",
    "content",
];

impl Hit {
    pub fn new(content: impl Into<String>, metadata: HitMetadata, score: Option<f64>) -> Self {
        Self {
            content: content.into(),
            metadata,
            score,
        }
    }

    /// Normalises one similarity-search row, preferring top-level values over
    /// their nested `metadata` counterparts.
    pub fn from_row(row: &Value) -> Self {
        let empty = Map::new();
        let nested = row
            .get("metadata")
            .and_then(Value::as_object)
            .unwrap_or(&empty);

        let content = [row.get("content"), row.get("chunk"), nested.get("content")]
            .into_iter()
            .flatten()
            .find_map(non_empty_text)
            .unwrap_or_default();

        let score = ["similarity", "score"]
            .iter()
            .find_map(|key| row.get(*key).and_then(Value::as_f64));

        let pick = |keys: &[&str]| -> Option<String> {
            keys.iter()
                .find_map(|key| row.get(*key).and_then(non_empty_text))
                .or_else(|| {
                    keys.iter()
                        .find_map(|key| nested.get(*key).and_then(non_empty_text))
                })
        };

        let extra = nested
            .iter()
            .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let metadata = HitMetadata {
            section_title: pick(&["section_title"]),
            title: pick(&["title"]),
            filename: pick(&["filename"]),
            category: pick(&["category"]),
            canonical_url: pick(&["canonical_url", "canonical"]),
            chunk_id: pick(&["id", "chunk_id"]),
            extra,
        };

        Self {
            content,
            metadata,
            score,
        }
    }
}

fn non_empty_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn deserialize_identifier<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(non_empty_text))
}
