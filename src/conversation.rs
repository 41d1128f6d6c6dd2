//! One chat turn from the caller's side: guard the input, drive the answer
//! stream once, and leave a transcript plus an audit trail behind.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::core::errors::ConciergeError;
use crate::history::{ChatHistory, TokenCounts};
use crate::rag::{delta_suffix, GenerationEvent, Hit, StreamingGenerator};
use crate::security::{estimate_tokens, is_injection, sanitize_user_input};
use crate::tools::{LogInteractionArgs, ToolRuntime};

pub const INJECTION_WARNING: &str =
    "That looks like a prompt-injection attempt. For safety, I can’t run that. Try a normal question.";
pub const APOLOGY: &str = "We weren't able to generate a response. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    Answered,
    Blocked,
    /// No final answer arrived; the reply is the apology.
    Failed,
}

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub status: TurnStatus,
    /// Sanitised user message.
    pub prompt: String,
    pub reply: String,
    pub hits: Vec<Hit>,
    pub tokens: TokenCounts,
}

pub struct ConversationService {
    generator: Arc<StreamingGenerator>,
    tools: Arc<dyn ToolRuntime>,
    history: Arc<dyn ChatHistory>,
    match_count: Option<u32>,
}

impl ConversationService {
    pub fn new(
        generator: Arc<StreamingGenerator>,
        tools: Arc<dyn ToolRuntime>,
        history: Arc<dyn ChatHistory>,
    ) -> Self {
        Self {
            generator,
            tools,
            history,
            match_count: None,
        }
    }

    pub fn with_match_count(mut self, match_count: Option<u32>) -> Self {
        self.match_count = match_count;
        self
    }

    /// Answers `raw_input`, handing each new piece of text to `on_fragment`
    /// as it arrives. Concatenating the fragments yields `reply`.
    pub async fn respond<F>(
        &self,
        session_id: &str,
        raw_input: &str,
        mut on_fragment: F,
    ) -> Result<TurnOutcome, ConciergeError>
    where
        F: FnMut(&str) + Send,
    {
        let prompt = sanitize_user_input(raw_input);
        if prompt.is_empty() {
            return Err(ConciergeError::validation("message is empty"));
        }
        let tokens_in = estimate_tokens(&prompt);
        self.history
            .append(session_id, "user", &prompt, TokenCounts::input(tokens_in))
            .await?;

        if is_injection(&prompt) {
            tracing::warn!(session_id, "prompt-injection attempt blocked");
            on_fragment(INJECTION_WARNING);
            let tokens_out = self.record_reply(session_id, INJECTION_WARNING).await?;
            self.audit(
                session_id,
                "injection_blocked",
                json!({ "prompt": prompt, "response": INJECTION_WARNING }),
            )
            .await;
            return Ok(TurnOutcome {
                status: TurnStatus::Blocked,
                prompt,
                reply: INJECTION_WARNING.to_string(),
                hits: Vec::new(),
                tokens: TokenCounts { tokens_in, tokens_out },
            });
        }

        match self.stream_answer(&prompt, &mut on_fragment).await {
            Ok((reply, hits)) => {
                let tokens_out = self.record_reply(session_id, &reply).await?;
                self.audit(
                    session_id,
                    "assistant_reply",
                    json!({
                        "prompt": prompt,
                        "response": reply,
                        "chunks": hits,
                        "tokens_in": tokens_in,
                        "tokens_out": tokens_out,
                    }),
                )
                .await;
                Ok(TurnOutcome {
                    status: TurnStatus::Answered,
                    prompt,
                    reply,
                    hits,
                    tokens: TokenCounts { tokens_in, tokens_out },
                })
            }
            Err(reason) => {
                tracing::warn!(session_id, error = %reason, "generation ended without a final answer");
                on_fragment(APOLOGY);
                self.audit(
                    session_id,
                    "assistant_error",
                    json!({ "prompt": prompt, "error": reason }),
                )
                .await;
                let tokens_out = self.record_reply(session_id, APOLOGY).await?;
                Ok(TurnOutcome {
                    status: TurnStatus::Failed,
                    prompt,
                    reply: APOLOGY.to_string(),
                    hits: Vec::new(),
                    tokens: TokenCounts { tokens_in, tokens_out },
                })
            }
        }
    }

    /// Final text and hits, or the reason no `Final` event was seen.
    async fn stream_answer<F>(
        &self,
        prompt: &str,
        on_fragment: &mut F,
    ) -> Result<(String, Vec<Hit>), String>
    where
        F: FnMut(&str) + Send,
    {
        let source = &self.tools;
        let mut stream = self
            .generator
            .generate(prompt, self.match_count, source)
            .await
            .map_err(|err| err.to_string())?;

        let mut shown = String::new();
        while let Some(event) = stream.next_event().await {
            match event {
                Ok(GenerationEvent::Delta { text }) => {
                    // Trailing whitespace is held back; Final trims it.
                    let visible = text.trim_end();
                    let piece = delta_suffix(&shown, visible);
                    if !piece.is_empty() {
                        on_fragment(piece);
                    }
                    shown = visible.to_string();
                }
                Ok(GenerationEvent::Final { text, hits }) => {
                    let piece = delta_suffix(&shown, &text);
                    if !piece.is_empty() {
                        on_fragment(piece);
                    }
                    return Ok((text, hits));
                }
                Err(err) => return Err(err.to_string()),
            }
        }
        Err("empty_response".to_string())
    }

    async fn record_reply(&self, session_id: &str, reply: &str) -> Result<u32, ConciergeError> {
        let tokens_out = estimate_tokens(reply);
        self.history
            .append(session_id, "assistant", reply, TokenCounts::output(tokens_out))
            .await?;
        Ok(tokens_out)
    }

    async fn audit(&self, session_id: &str, event_type: &str, payload: Value) {
        let args = LogInteractionArgs {
            session_id: session_id.to_string(),
            event_type: event_type.to_string(),
            payload,
        };
        if let Err(err) = self.tools.log_interaction(&args).await {
            tracing::warn!(session_id, event_type, error = %err, "audit entry was not recorded");
        }
    }
}
