use super::{SqlGenerator, SqlVerifier};
use crate::{llm::LlmError, schema::Schema};
use serde::Serialize;
use tracing::{info, warn};

/// One generate-then-verify round. Never reused across rounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationAttempt {
    pub index: usize,
    pub sql: String,
    /// `None` while the candidate is awaiting verification.
    pub verdict: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopState {
    Attempting(usize),
    Accepted(String),
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopOutcome {
    Accepted {
        sql: String,
        attempts: Vec<GenerationAttempt>,
    },
    Exhausted {
        attempts: Vec<GenerationAttempt>,
    },
}

/// Generates candidates and has them verified until one passes or the attempt budget runs out.
#[derive(Clone)]
pub struct AgenticSqlGenerator {
    generator: SqlGenerator,
    verifier: SqlVerifier,
    max_attempts: usize,
    feedback: bool,
}

impl AgenticSqlGenerator {
    pub fn new(
        generator: SqlGenerator,
        verifier: SqlVerifier,
        max_attempts: usize,
        feedback: bool,
    ) -> Self {
        Self {
            generator,
            verifier,
            max_attempts: max_attempts.max(1),
            feedback,
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// State after the attempt at `index` has been verified.
    pub fn transition(&self, attempt: &GenerationAttempt) -> LoopState {
        match attempt.verdict {
            Some(true) => LoopState::Accepted(attempt.sql.clone()),
            _ if attempt.index + 1 < self.max_attempts => LoopState::Attempting(attempt.index + 1),
            _ => LoopState::Exhausted,
        }
    }

    /// Model failures abort the loop; only verifier rejections consume attempts.
    pub async fn run(
        &self,
        query: &str,
        schema: &Schema,
        dialect: &str,
    ) -> Result<LoopOutcome, LlmError> {
        let mut attempts: Vec<GenerationAttempt> = Vec::with_capacity(self.max_attempts);
        let mut state = LoopState::Attempting(0);

        loop {
            state = match state {
                LoopState::Attempting(index) => {
                    let rejected: Vec<&str> = if self.feedback {
                        attempts.iter().map(|a| a.sql.as_str()).collect()
                    } else {
                        Vec::new()
                    };

                    let sql = self
                        .generator
                        .generate(query, schema, dialect, &rejected)
                        .await?;
                    let mut attempt = GenerationAttempt {
                        index,
                        sql,
                        verdict: None,
                    };

                    let verification = self
                        .verifier
                        .verify(&attempt.sql, query, schema, dialect)
                        .await?;
                    attempt.verdict = Some(verification.is_valid);
                    info!(
                        attempt = index,
                        valid = verification.is_valid,
                        votes = verification.votes.len(),
                        sql_len = attempt.sql.len(),
                        "verified candidate query"
                    );

                    let next = self.transition(&attempt);
                    attempts.push(attempt);
                    next
                }
                LoopState::Accepted(sql) => {
                    return Ok(LoopOutcome::Accepted { sql, attempts });
                }
                LoopState::Exhausted => {
                    warn!(
                        attempts = attempts.len(),
                        "no candidate query passed verification"
                    );
                    return Ok(LoopOutcome::Exhausted { attempts });
                }
            };
        }
    }
}
