use super::{contains_token, judgment_prompt, prompts};
use crate::{
    llm::{LanguageModel, LlmError},
    schema::Schema,
};
use std::sync::Arc;
use tracing::debug;

/// Gate that asks the model whether a question can be answered from the schema at all.
#[derive(Clone)]
pub struct RelevanceValidator {
    model: Arc<dyn LanguageModel>,
    constrained: bool,
}

impl RelevanceValidator {
    pub fn new(model: Arc<dyn LanguageModel>, constrained: bool) -> Self {
        Self { model, constrained }
    }

    /// True iff the answer contains `true`, even alongside `false`. One call, no retries.
    pub async fn is_relevant(&self, query: &str, schema: &Schema) -> Result<bool, LlmError> {
        let prompt = judgment_prompt(prompts::relevance(query, schema), self.constrained);
        let answer = self.model.complete(&prompt).await?;
        let relevant = contains_token(&answer, "true");
        debug!(relevant, "relevance judgment");
        Ok(relevant)
    }
}
