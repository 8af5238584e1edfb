//! Code correction via a chat-completion model.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::info;

use crate::error::{PipelineError, StageResult};
use crate::openrouter::{Message, OpenRouterClient};

const INSTRUCTION: &str =
    "Only return the corrected Python code below (no explanation, no notes, no extra text):";

/// Opening fence with an optional language tag on the same line.
static OPENING_FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^```[ \t]*([A-Za-z0-9_+#.-]*)[ \t]*(\r?\n|$)").unwrap());

/// Known language tag sharing the fence line with the code.
static INLINE_TAG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?i:python3?|py|bash|sh|javascript|js|typescript|ts|rust|ruby|go)[ \t]+").unwrap()
});

/// Something that turns OCR'd text into corrected code.
#[async_trait::async_trait]
pub trait Corrector: Send + Sync {
    fn name(&self) -> &str;
    async fn correct(&self, extracted: &str) -> StageResult;
}

/// Corrector backed by an LLM. Every call starts a fresh, single-turn
/// conversation.
pub struct LlmCorrector {
    client: OpenRouterClient,
}

impl LlmCorrector {
    pub fn new(client: OpenRouterClient) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Corrector for LlmCorrector {
    fn name(&self) -> &str {
        "llm"
    }

    async fn correct(&self, extracted: &str) -> StageResult {
        info!(
            "LlmCorrector: correcting {} chars with {}",
            extracted.len(),
            self.client.model()
        );
        let reply = self.client.chat(vec![Message::user(build_prompt(extracted))]).await?;
        code_from_reply(&reply)
    }
}

/// Strip the fence from a model answer; an answer with no code left in it
/// is reported as a service failure.
pub fn code_from_reply(reply: &str) -> StageResult {
    let code = strip_code_fence(reply);
    if code.is_empty() {
        return Err(PipelineError::ServiceReported(
            "the model returned no code".to_string(),
        ));
    }
    Ok(code)
}

pub fn build_prompt(extracted: &str) -> String {
    format!("{}\n\n{}\n", INSTRUCTION, extracted)
}

/// Remove a surrounding markdown code fence (and its language tag) from a
/// model answer. Answers without a fence are only trimmed.
pub fn strip_code_fence(reply: &str) -> String {
    let trimmed = reply.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }

    let body = match OPENING_FENCE_RE.find(trimmed) {
        // Tag followed by a newline (or nothing at all): drop the whole line.
        Some(m) => &trimmed[m.end()..],
        // Code starts on the fence line, e.g. "```print(1)```" or
        // "```python print(1)```".
        None => {
            let rest = trimmed[3..].trim_start();
            match INLINE_TAG_RE.find(rest) {
                Some(tag) => &rest[tag.end()..],
                None => rest,
            }
        }
    };

    let body = match body.find("```") {
        Some(end) => &body[..end],
        None => body,
    };

    body.trim().to_string()
}
