//! LLM-backed components of the text-to-SQL flow.
//!
//! Each component makes its own model calls through [`LanguageModel`]. The judgment components
//! (relevance and verification) read the model's answer by case-insensitive substring search for
//! `true`/`false`; when constrained judgments are enabled the model is additionally asked to
//! answer with one of those two tokens only.
//!
//! [`LanguageModel`]: crate::llm::LanguageModel

mod explainer;
mod generator;
mod prompts;
mod retry;
mod validator;
mod verifier;

pub use explainer::ResultExplainer;
pub use generator::{strip_code_fence, SqlGenerator};
pub use retry::{AgenticSqlGenerator, GenerationAttempt, LoopOutcome, LoopState};
pub use validator::RelevanceValidator;
pub use verifier::{SqlVerifier, Verification, Vote};

use crate::llm::{Prompt, BOOLEAN_CHOICES};

fn contains_token(response: &str, token: &str) -> bool {
    response.to_lowercase().contains(token)
}

fn judgment_prompt(text: String, constrained: bool) -> Prompt {
    if constrained {
        Prompt::choice(text, BOOLEAN_CHOICES)
    } else {
        Prompt::free_text(text)
    }
}
