use super::{contains_token, judgment_prompt, prompts};
use crate::{
    llm::{LanguageModel, LlmError},
    schema::Schema,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// One sample's judgment of a candidate query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Vote {
    Approve,
    Reject,
    /// Neither token present; never counts toward approval.
    Unclear,
}

impl Vote {
    /// `false` anywhere wins over `true`.
    pub fn from_response(response: &str) -> Self {
        if contains_token(response, "false") {
            Vote::Reject
        } else if contains_token(response, "true") {
            Vote::Approve
        } else {
            Vote::Unclear
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub is_valid: bool,
    /// Votes in sampling order; ends at the first rejection.
    pub votes: Vec<Vote>,
}

#[derive(Clone)]
pub struct SqlVerifier {
    model: Arc<dyn LanguageModel>,
    samples: usize,
    constrained: bool,
}

impl SqlVerifier {
    pub fn new(model: Arc<dyn LanguageModel>, samples: usize, constrained: bool) -> Self {
        Self {
            model,
            samples: samples.max(1),
            constrained,
        }
    }

    /// Samples the model up to `samples` times with the same prompt. Valid only when every
    /// sample approves; the first rejection ends sampling.
    pub async fn verify(
        &self,
        sql: &str,
        query: &str,
        schema: &Schema,
        dialect: &str,
    ) -> Result<Verification, LlmError> {
        let prompt = judgment_prompt(
            prompts::verification(sql, query, schema, dialect),
            self.constrained,
        );

        let mut votes = Vec::with_capacity(self.samples);
        for sample in 0..self.samples {
            let answer = self.model.complete(&prompt).await?;
            let vote = Vote::from_response(&answer);
            debug!(sample, ?vote, "verification vote");
            votes.push(vote);

            if vote == Vote::Reject {
                return Ok(Verification {
                    is_valid: false,
                    votes,
                });
            }
        }

        let approvals = votes.iter().filter(|v| **v == Vote::Approve).count();
        Ok(Verification {
            is_valid: approvals == self.samples,
            votes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{agent::testing::ScriptedModel, schema::TableSchema};
    use pretty_assertions::assert_eq;

    fn schema() -> Schema {
        let mut schema = Schema::new();
        schema.insert("users", TableSchema::with_columns(["id", "signup_date"]));
        schema
    }

    async fn verify(replies: &[&str]) -> (Verification, usize) {
        let model = ScriptedModel::replying(replies);
        let verifier = SqlVerifier::new(model.clone(), 3, true);
        let verification = verifier
            .verify("SELECT COUNT(*) FROM users", "How many users?", &schema(), "generic SQL")
            .await
            .unwrap();
        (verification, model.calls())
    }

    #[test]
    fn classifies_votes() {
        assert_eq!(Vote::from_response("True"), Vote::Approve);
        assert_eq!(Vote::from_response("FALSE"), Vote::Reject);
        assert_eq!(Vote::from_response("true... no wait, false"), Vote::Reject);
        assert_eq!(Vote::from_response("looks right"), Vote::Unclear);
        assert_eq!(Vote::from_response(""), Vote::Unclear);
    }

    #[tokio::test]
    async fn unanimous_approval_is_valid() {
        let (verification, calls) = verify(&["true", "TRUE", "true."]).await;
        assert!(verification.is_valid);
        assert_eq!(calls, 3);
        assert_eq!(verification.votes, vec![Vote::Approve; 3]);
    }

    #[tokio::test]
    async fn first_rejection_short_circuits() {
        let (verification, calls) = verify(&["false", "true", "true"]).await;
        assert!(!verification.is_valid);
        assert_eq!(calls, 1);

        let (verification, calls) = verify(&["true", "false", "true"]).await;
        assert!(!verification.is_valid);
        assert_eq!(calls, 2);
        assert_eq!(verification.votes, vec![Vote::Approve, Vote::Reject]);

        let (verification, calls) = verify(&["true", "true", "this is false"]).await;
        assert!(!verification.is_valid);
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn unclear_votes_block_approval() {
        let (verification, calls) = verify(&["true", "maybe", "true"]).await;
        assert!(!verification.is_valid);
        assert_eq!(calls, 3);
        assert_eq!(
            verification.votes,
            vec![Vote::Approve, Vote::Unclear, Vote::Approve]
        );
    }

    #[tokio::test]
    async fn mixed_tokens_count_as_rejection() {
        let (verification, calls) = verify(&["true or false"]).await;
        assert!(!verification.is_valid);
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn prompt_carries_candidate_and_dialect() {
        let model = ScriptedModel::replying(&["false"]);
        SqlVerifier::new(model.clone(), 3, false)
            .verify("SELECT 1", "anything", &schema(), "SQLite")
            .await
            .unwrap();

        let prompt = &model.prompts()[0];
        assert!(prompt.text.starts_with("SQL Dialect: SQLite"));
        assert!(prompt.text.contains("SQL Query:\nSELECT 1\n"));
        assert!(prompt.text.contains("Natural Language Query:\nanything"));
    }
}
