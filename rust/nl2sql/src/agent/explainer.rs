use super::prompts;
use crate::{
    db::QueryResult,
    llm::{LanguageModel, LlmError, Prompt},
};
use std::sync::Arc;

/// Turns result rows into a bullet-point summary. One call, output returned as-is (trimmed).
#[derive(Clone)]
pub struct ResultExplainer {
    model: Arc<dyn LanguageModel>,
}

impl ResultExplainer {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    pub async fn explain(&self, query: &str, result: &QueryResult) -> Result<String, LlmError> {
        let prompt = Prompt::free_text(prompts::explanation(query, result));
        let text = self.model.complete(&prompt).await?;
        Ok(text.trim().to_string())
    }
}
