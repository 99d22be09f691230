use super::prompts;
use crate::{
    llm::{LanguageModel, LlmError, Prompt},
    schema::Schema,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct SqlGenerator {
    model: Arc<dyn LanguageModel>,
}

impl SqlGenerator {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// Asks for one SQL statement. `rejected` lists earlier candidates to steer away from and is
    /// empty unless retry feedback is enabled. The text is returned without syntax checks.
    pub async fn generate(
        &self,
        query: &str,
        schema: &Schema,
        dialect: &str,
        rejected: &[&str],
    ) -> Result<String, LlmError> {
        let prompt = Prompt::free_text(prompts::generation(query, schema, dialect, rejected));
        let raw = self.model.complete(&prompt).await?;
        Ok(strip_code_fence(&raw))
    }
}

/// Removes a leading markdown fence line (three backticks and an optional language tag) and,
/// when the text opened with one, a trailing fence line. Surrounding whitespace is trimmed.
pub fn strip_code_fence(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }

    let mut lines: Vec<&str> = trimmed.lines().collect();
    if lines.first().is_some_and(|line| line.starts_with("```")) {
        lines.remove(0);
    }
    if lines.last().is_some_and(|line| line.starts_with("```")) {
        lines.pop();
    }
    lines.join("\n").trim().to_string()
}
