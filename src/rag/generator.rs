//! Retrieval + prompt assembly + token streaming as a one-shot event channel.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;

use super::augment::QueryAugmenter;
use super::context_builder::{build_sources_block, format_context};
use super::hit::Hit;
use super::retriever::ContextSource;
use crate::core::errors::ConciergeError;
use crate::llm::{ChatMessage, ChatProvider, ChatRequest};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are the USF Onboarding Assistant for Admissions, \
Orientation, and Registrar. Answer ONLY from the provided CONTEXT. Be concise. Add inline \
[Source N] markers that match the numbered sources in CONTEXT. If an answer is not in CONTEXT, \
say you don't know and suggest the correct USF office or link to contact.";

const SOURCES_HEADING: &str = "\n\n**Sources**\n";

#[derive(Debug, Clone, PartialEq)]
pub enum GenerationEvent {
    /// Cumulative answer text so far.
    Delta { text: String },
    /// Complete answer with citations. Always the last event.
    Final { text: String, hits: Vec<Hit> },
}

/// Events of a single generation. An `Err` item ends the stream without a `Final`.
///
/// Dropping the stream abandons the generation and releases the chat connection.
pub struct GenerationStream {
    rx: mpsc::Receiver<Result<GenerationEvent, ConciergeError>>,
}

impl GenerationStream {
    pub async fn next_event(&mut self) -> Option<Result<GenerationEvent, ConciergeError>> {
        self.rx.recv().await
    }
}

impl Stream for GenerationStream {
    type Item = Result<GenerationEvent, ConciergeError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

/// The part of `current` not already present in `previous`.
pub fn delta_suffix<'a>(previous: &str, current: &'a str) -> &'a str {
    current.strip_prefix(previous).unwrap_or(current)
}

pub struct StreamingGenerator {
    chat: Arc<dyn ChatProvider>,
    augmenter: QueryAugmenter,
    system_prompt: String,
}

impl StreamingGenerator {
    pub fn new(
        chat: Arc<dyn ChatProvider>,
        augmenter: QueryAugmenter,
        system_prompt: Option<String>,
    ) -> Self {
        let system_prompt = system_prompt
            .filter(|prompt| !prompt.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
        Self {
            chat,
            augmenter,
            system_prompt,
        }
    }

    /// The model sees the original question; only retrieval uses the augmented one.
    pub fn build_messages(&self, user_text: &str, hits: &[Hit]) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(format!(
                "{}\n\nCONTEXT:\n{}",
                self.system_prompt,
                format_context(hits)
            )),
            ChatMessage::user(user_text),
        ]
    }

    /// Retrieval and prompt assembly happen before this returns, so their
    /// failures surface here and no event is ever emitted for them.
    pub async fn generate(
        &self,
        user_text: &str,
        match_count: Option<u32>,
        source: &dyn ContextSource,
    ) -> Result<GenerationStream, ConciergeError> {
        let augmented = self.augmenter.augment(user_text);
        let hits = source.retrieve_hits(&augmented, match_count).await?;
        let request = ChatRequest::new(self.build_messages(user_text, &hits));
        tracing::info!(
            hits = hits.len(),
            augmented = augmented.len() != user_text.len(),
            provider = self.chat.name(),
            "starting generation"
        );

        let (tx, rx) = mpsc::channel(32);
        let chat = self.chat.clone();

        tokio::spawn(async move {
            let mut fragments = match chat.stream_chat(request).await {
                Ok(fragments) => fragments,
                Err(err) => {
                    tracing::warn!(error = %err, "chat stream could not be opened");
                    let _ = tx.send(Err(err)).await;
                    return;
                }
            };

            let mut answer = String::new();
            loop {
                let item = tokio::select! {
                    _ = tx.closed() => {
                        tracing::debug!("generation abandoned by consumer");
                        return;
                    }
                    item = fragments.recv() => item,
                };

                match item {
                    Some(Ok(fragment)) => {
                        answer.push_str(&fragment);
                        let delta = GenerationEvent::Delta {
                            text: answer.clone(),
                        };
                        if tx.send(Ok(delta)).await.is_err() {
                            return;
                        }
                    }
                    Some(Err(err)) => {
                        tracing::warn!(error = %err, "chat stream failed mid-answer");
                        let _ = tx.send(Err(err)).await;
                        return;
                    }
                    None => break,
                }
            }

            let text = finalize_answer(&answer, &hits);
            let _ = tx.send(Ok(GenerationEvent::Final { text, hits })).await;
        });

        Ok(GenerationStream { rx })
    }
}

fn finalize_answer(answer: &str, hits: &[Hit]) -> String {
    let mut text = answer.trim_end().to_string();
    let sources = build_sources_block(hits);
    if !sources.is_empty() {
        text.push_str(SOURCES_HEADING);
        text.push_str(&sources);
    }
    text
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use futures_util::StreamExt;

    use super::*;
    use crate::llm::FragmentStream;
    use crate::rag::hit::HitMetadata;

    struct ScriptedChat {
        script: Vec<Result<String, ConciergeError>>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedChat {
        fn new(script: Vec<Result<String, ConciergeError>>) -> Arc<Self> {
            Arc::new(Self {
                script,
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ChatProvider for ScriptedChat {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn stream_chat(&self, request: ChatRequest) -> Result<FragmentStream, ConciergeError> {
            self.requests.lock().unwrap().push(request);
            let (tx, rx) = tokio::sync::mpsc::channel(8);
            let script: Vec<_> = self
                .script
                .iter()
                .map(|item| match item {
                    Ok(text) => Ok(text.clone()),
                    Err(err) => Err(ConciergeError::Upstream(err.to_string())),
                })
                .collect();
            tokio::spawn(async move {
                for item in script {
                    if tx.send(item).await.is_err() {
                        return;
                    }
                }
            });
            Ok(rx)
        }
    }

    struct StaticSource {
        hits: Vec<Hit>,
        queries: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ContextSource for StaticSource {
        async fn retrieve_hits(
            &self,
            query: &str,
            _match_count: Option<u32>,
        ) -> Result<Vec<Hit>, ConciergeError> {
            self.queries.lock().unwrap().push(query.to_string());
            Ok(self.hits.clone())
        }
    }

    struct FailingSource;

    #[async_trait]
    impl ContextSource for FailingSource {
        async fn retrieve_hits(&self, _: &str, _: Option<u32>) -> Result<Vec<Hit>, ConciergeError> {
            Err(ConciergeError::Upstream("vector search returned 500".into()))
        }
    }

    fn source(hits: Vec<Hit>) -> StaticSource {
        StaticSource {
            hits,
            queries: Mutex::new(Vec::new()),
        }
    }

    fn transport_hit() -> Hit {
        Hit::new(
            "Shuttles run from the airport.",
            HitMetadata {
                section_title: Some("Transportation".into()),
                canonical_url: Some("https://example.edu/transport".into()),
                ..Default::default()
            },
            Some(0.9),
        )
    }

    fn fragments(items: &[&str]) -> Vec<Result<String, ConciergeError>> {
        items.iter().map(|s| Ok(s.to_string())).collect()
    }

    async fn drain(stream: GenerationStream) -> Vec<Result<GenerationEvent, ConciergeError>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn deltas_are_cumulative_and_final_is_last() {
        let chat = ScriptedChat::new(fragments(&["A", "B", "C"]));
        let generator = StreamingGenerator::new(chat, QueryAugmenter::default(), None);
        let source = source(vec![transport_hit()]);

        let events = drain(generator.generate("hi", None, &source).await.unwrap()).await;
        let events: Vec<GenerationEvent> = events.into_iter().map(Result::unwrap).collect();

        let deltas: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                GenerationEvent::Delta { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(deltas, ["A", "AB", "ABC"]);

        match events.last().unwrap() {
            GenerationEvent::Final { text, hits } => {
                assert!(text.starts_with("ABC"));
                assert!(text.contains(
                    "**Sources**\n1. [Transportation](https://example.edu/transport) — Orientation"
                ));
                assert_eq!(hits.len(), 1);
            }
            other => panic!("expected final event, got {:?}", other),
        }
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, GenerationEvent::Final { .. }))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn empty_hits_still_finish_without_sources() {
        let chat = ScriptedChat::new(fragments(&["I don't know.  \n"]));
        let generator = StreamingGenerator::new(chat.clone(), QueryAugmenter::default(), None);
        let source = source(Vec::new());

        let events = drain(generator.generate("hi", None, &source).await.unwrap()).await;
        match events.last().unwrap().as_ref().unwrap() {
            GenerationEvent::Final { text, hits } => {
                assert_eq!(text, "I don't know.");
                assert!(hits.is_empty());
                assert!(!text.contains("Sources"));
            }
            other => panic!("expected final event, got {:?}", other),
        }

        let requests = chat.requests.lock().unwrap();
        assert!(requests[0].messages[0]
            .content
            .ends_with("CONTEXT:\nNo relevant context found."));
    }

    #[tokio::test]
    async fn no_fragments_yields_citations_only() {
        let chat = ScriptedChat::new(Vec::new());
        let generator = StreamingGenerator::new(chat, QueryAugmenter::default(), None);
        let source = source(vec![transport_hit()]);

        let events = drain(generator.generate("hi", None, &source).await.unwrap()).await;
        assert_eq!(events.len(), 1);
        match events[0].as_ref().unwrap() {
            GenerationEvent::Final { text, .. } => assert!(text.starts_with("\n\n**Sources**\n1.")),
            other => panic!("expected final event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn retrieval_uses_augmented_query_and_model_sees_original() {
        let chat = ScriptedChat::new(fragments(&["ok"]));
        let generator = StreamingGenerator::new(
            chat.clone(),
            QueryAugmenter::default(),
            Some("Custom persona".into()),
        );
        let source = source(Vec::new());

        let question = "When is orientation?";
        drain(generator.generate(question, Some(3), &source).await.unwrap()).await;

        let queries = source.queries.lock().unwrap();
        assert!(queries[0].starts_with(question));
        assert!(queries[0].contains("Related keywords:"));

        let requests = chat.requests.lock().unwrap();
        let messages = &requests[0].messages;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert!(messages[0].content.starts_with("Custom persona\n\nCONTEXT:\n"));
        assert_eq!(messages[1], ChatMessage::user(question));
    }

    #[tokio::test]
    async fn retrieval_failure_surfaces_before_any_event() {
        let chat = ScriptedChat::new(fragments(&["never"]));
        let generator = StreamingGenerator::new(chat.clone(), QueryAugmenter::default(), None);

        let result = generator.generate("hi", None, &FailingSource).await;
        assert!(matches!(result, Err(ConciergeError::Upstream(_))));
        assert!(chat.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn mid_stream_failure_closes_without_final() {
        let chat = ScriptedChat::new(vec![
            Ok("Part".to_string()),
            Err(ConciergeError::Upstream("connection reset".into())),
        ]);
        let generator = StreamingGenerator::new(chat, QueryAugmenter::default(), None);
        let source = source(vec![transport_hit()]);

        let events = drain(generator.generate("hi", None, &source).await.unwrap()).await;
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0],
            Ok(GenerationEvent::Delta { ref text }) if text == "Part"
        ));
        assert!(events[1].is_err());
        assert!(!events
            .iter()
            .any(|e| matches!(e, Ok(GenerationEvent::Final { .. }))));
    }

    struct EndlessChat {
        released: Mutex<Option<tokio::sync::oneshot::Sender<()>>>,
    }

    #[async_trait]
    impl ChatProvider for EndlessChat {
        fn name(&self) -> &str {
            "endless"
        }

        async fn stream_chat(&self, _request: ChatRequest) -> Result<FragmentStream, ConciergeError> {
            let (tx, rx) = tokio::sync::mpsc::channel(1);
            let released = self.released.lock().unwrap().take();
            tokio::spawn(async move {
                while tx.send(Ok("more ".to_string())).await.is_ok() {
                    tokio::time::sleep(std::time::Duration::from_millis(1)).await;
                }
                if let Some(released) = released {
                    let _ = released.send(());
                }
            });
            Ok(rx)
        }
    }

    #[tokio::test]
    async fn dropping_the_stream_releases_the_chat_connection() {
        let (released_tx, released_rx) = tokio::sync::oneshot::channel();
        let chat = Arc::new(EndlessChat {
            released: Mutex::new(Some(released_tx)),
        });
        let generator = StreamingGenerator::new(chat, QueryAugmenter::default(), None);
        let source = source(vec![transport_hit()]);

        let mut stream = generator.generate("hi", None, &source).await.unwrap();
        assert!(matches!(
            stream.next_event().await,
            Some(Ok(GenerationEvent::Delta { .. }))
        ));
        drop(stream);

        tokio::time::timeout(std::time::Duration::from_secs(2), released_rx)
            .await
            .expect("chat sender should observe the dropped consumer")
            .unwrap();
    }

    #[test]
    fn delta_suffix_returns_the_new_fragment() {
        assert_eq!(delta_suffix("", "A"), "A");
        assert_eq!(delta_suffix("AB", "ABC"), "C");
        assert_eq!(delta_suffix("xyz", "ABC"), "ABC");
    }
}
