//! Text-generation backends used by the agent components.
//!
//! Every component talks to the model through [`LanguageModel`], a single prompt-in/text-out
//! call. The production backend is [`GeminiClient`]; tests substitute scripted models.

mod gemini;

pub use gemini::GeminiClient;

use async_trait::async_trait;
use thiserror::Error;

/// The two-token answer set used for yes/no judgments.
pub const BOOLEAN_CHOICES: &[&str] = &["true", "false"];

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("model endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode model response: {0}")]
    Decode(String),
}

impl LlmError {
    /// Transport failures, throttling and server-side errors are worth another try.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Transport(_) => true,
            LlmError::Status { status, .. } => *status == 429 || *status >= 500,
            LlmError::Decode(_) => false,
        }
    }
}

/// Shape the model is asked to answer in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    FreeText,
    /// Restrict the answer to one of the listed tokens, when the backend supports it.
    Choice(&'static [&'static str]),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub text: String,
    pub format: ResponseFormat,
}

impl Prompt {
    pub fn free_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            format: ResponseFormat::FreeText,
        }
    }

    pub fn choice(text: impl Into<String>, choices: &'static [&'static str]) -> Self {
        Self {
            text: text.into(),
            format: ResponseFormat::Choice(choices),
        }
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Returns the model's text for `prompt`. An answer with no text is `Ok("")`, not an error.
    async fn complete(&self, prompt: &Prompt) -> Result<String, LlmError>;

    fn name(&self) -> &str;
}
