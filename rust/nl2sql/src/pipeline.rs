//! Request-level flow: reflect → relevance gate → generate/verify loop → execute → explain.

use crate::{
    agent::{
        AgenticSqlGenerator, LoopOutcome, RelevanceValidator, ResultExplainer, SqlGenerator,
        SqlVerifier,
    },
    config::{AppConfig, DatabaseConfig},
    db,
    error::{Result, ServiceError},
    llm::LanguageModel,
    models::{GenerateRequest, GenerateResponse},
    schema::Schema,
};
use std::sync::Arc;
use tracing::{info, instrument};

/// Shared, read-only entry point for both HTTP operations. Each call builds its own schema,
/// connection and attempt state.
#[derive(Clone)]
pub struct SqlAssistant {
    validator: RelevanceValidator,
    agent: AgenticSqlGenerator,
    explainer: ResultExplainer,
    database: Arc<DatabaseConfig>,
    default_dialect: Arc<str>,
}

impl SqlAssistant {
    pub fn new(model: Arc<dyn LanguageModel>, config: &AppConfig) -> Self {
        let agent_config = &config.agent;
        let generator = SqlGenerator::new(Arc::clone(&model));
        let verifier = SqlVerifier::new(
            Arc::clone(&model),
            agent_config.verification_samples,
            agent_config.constrained_judgments,
        );

        Self {
            validator: RelevanceValidator::new(
                Arc::clone(&model),
                agent_config.constrained_judgments,
            ),
            agent: AgenticSqlGenerator::new(
                generator,
                verifier,
                agent_config.max_attempts,
                agent_config.retry_feedback,
            ),
            explainer: ResultExplainer::new(model),
            database: Arc::new(config.database.clone()),
            default_dialect: Arc::from(config.default_dialect.as_str()),
        }
    }

    pub async fn schema(&self, db_url: Option<&str>) -> Result<Schema> {
        let db_url = required(db_url, "please provide a database connection string")?;
        db::reflect_schema(db_url, &self.database)
            .await
            .map_err(ServiceError::schema)
    }

    #[instrument(skip_all, fields(dialect = tracing::field::Empty))]
    pub async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse> {
        let query = required(
            Some(request.query.as_str()),
            "please enter a natural language query",
        )?;
        let db_url = required(
            Some(request.db_url.as_str()),
            "please provide a database connection string",
        )?;
        let dialect = request
            .dialect
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .unwrap_or(&*self.default_dialect);
        tracing::Span::current().record("dialect", dialect);

        let schema = db::reflect_schema(db_url, &self.database)
            .await
            .map_err(ServiceError::schema)?;

        if !self.validator.is_relevant(query, &schema).await? {
            info!(tables = schema.table_count(), "query judged unrelated to schema");
            return Err(ServiceError::RelevanceRejected);
        }

        let sql = match self.agent.run(query, &schema, dialect).await? {
            LoopOutcome::Accepted { sql, attempts } => {
                info!(attempts = attempts.len(), "accepted generated query");
                sql
            }
            LoopOutcome::Exhausted { attempts } => {
                return Err(ServiceError::GenerationExhausted {
                    attempts: attempts.len(),
                });
            }
        };

        let result = db::execute_query(db_url, &sql, &self.database)
            .await
            .map_err(ServiceError::execution)?;
        let explanation = self.explainer.explain(query, &result).await?;

        Ok(GenerateResponse {
            sql_query: sql,
            columns: result.columns,
            data: result.rows,
            explanation,
        })
    }
}

fn required<'a>(value: Option<&'a str>, message: &str) -> Result<&'a str> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ServiceError::InvalidRequest(message.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        agent::testing::ScriptedModel,
        config::{AgentConfig, LlmConfig},
        llm::Prompt,
    };
    use pretty_assertions::assert_eq;
    use rusqlite::Connection;
    use serde_json::json;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };
    use tempfile::TempDir;

    fn config() -> AppConfig {
        AppConfig {
            listen_addr: ([127, 0, 0, 1], 0).into(),
            api_key: None,
            request_timeout: Duration::from_secs(30),
            default_dialect: "generic SQL".into(),
            llm: LlmConfig {
                api_key: "unused".into(),
                base_url: "http://127.0.0.1:9".into(),
                model: "scripted".into(),
                timeout: Duration::from_secs(1),
                max_retries: 0,
                retry_backoff: Duration::from_millis(1),
                temperature: None,
            },
            agent: AgentConfig::default(),
            database: DatabaseConfig {
                timeout: Duration::from_secs(5),
                ..DatabaseConfig::default()
            },
        }
    }

    fn fixture() -> (TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, signup_date TEXT);
             WITH RECURSIVE n(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM n WHERE i < 42)
             INSERT INTO users (signup_date) SELECT printf('2024-04-%02d', 1 + i % 28) FROM n;
             INSERT INTO users (signup_date) VALUES ('2024-03-31'), ('2024-05-01');",
        )
        .unwrap();
        let url = format!("sqlite:///{}", path.display());
        (dir, url)
    }

    const VALID_SQL: &str =
        "SELECT COUNT(*) AS count\nFROM users\nWHERE signup_date >= '2024-04-01' AND signup_date < '2024-05-01'";

    /// Relevance → "true"; round one yields a bogus query that is rejected, round two the
    /// valid one which every sample approves; the explainer returns a bullet.
    fn scripted() -> Arc<ScriptedModel> {
        let generations = AtomicUsize::new(0);
        ScriptedModel::new(move |prompt: &Prompt| {
            let text = &prompt.text;
            let reply = if text.starts_with("Determine if") {
                "true".to_string()
            } else if text.contains("Generate the corresponding SQL query") {
                match generations.fetch_add(1, Ordering::SeqCst) {
                    0 => "```sql\nSELECT * FROM signups\n```".to_string(),
                    _ => format!("```sql\n{VALID_SQL}\n```"),
                }
            } else if text.starts_with("SQL Dialect") {
                let verdict = if text.contains("signups") { "false" } else { "true" };
                verdict.to_string()
            } else {
                "- 42 users signed up in April 2024.".to_string()
            };
            Ok(reply)
        })
    }

    #[tokio::test]
    async fn answers_question_end_to_end() {
        let (_dir, db_url) = fixture();
        let model = scripted();
        let assistant = SqlAssistant::new(model.clone(), &config());

        let response = assistant
            .generate(GenerateRequest {
                query: "How many users signed up last month?".into(),
                db_url,
                dialect: Some("SQLite".into()),
            })
            .await
            .unwrap();

        assert_eq!(response.sql_query, VALID_SQL);
        assert_eq!(response.columns, vec!["count"]);
        assert_eq!(serde_json::to_value(&response.data).unwrap(), json!([{ "count": 42 }]));
        assert_eq!(response.explanation, "- 42 users signed up in April 2024.");

        // One relevance call, two generations, 1 + 3 verification samples, one explanation.
        assert_eq!(model.calls(), 1 + 2 + 4 + 1);
        assert_eq!(model.calls_containing("Determine if"), 1);
    }

    #[tokio::test]
    async fn rejects_irrelevant_question_before_generation() {
        let (_dir, db_url) = fixture();
        let model = ScriptedModel::replying(&["false"]);
        let assistant = SqlAssistant::new(model.clone(), &config());

        let err = assistant
            .generate(GenerateRequest {
                query: "What is the weather in Paris?".into(),
                db_url,
                dialect: None,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::RelevanceRejected));
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn reports_exhaustion() {
        let (_dir, db_url) = fixture();
        let model = ScriptedModel::new(|prompt: &Prompt| {
            Ok(if prompt.text.starts_with("Determine if") {
                "true"
            } else if prompt.text.contains("Generate the corresponding") {
                "SELECT 1"
            } else {
                "false"
            }
            .to_string())
        });
        let assistant = SqlAssistant::new(model, &config());

        let err = assistant
            .generate(GenerateRequest {
                query: "How many users?".into(),
                db_url,
                dialect: None,
            })
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "False: Unable to generate a valid SQL query after 5 attempts."
        );
    }

    #[tokio::test]
    async fn validates_required_fields() {
        let assistant = SqlAssistant::new(ScriptedModel::replying(&[]), &config());

        let err = assistant
            .generate(GenerateRequest {
                query: "   ".into(),
                db_url: "sqlite://".into(),
                dialect: None,
            })
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid request: please enter a natural language query"
        );

        let err = assistant
            .generate(GenerateRequest {
                query: "How many users?".into(),
                ..GenerateRequest::default()
            })
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid request: please provide a database connection string"
        );

        let err = assistant.schema(None).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn surfaces_schema_failures() {
        let assistant = SqlAssistant::new(ScriptedModel::replying(&[]), &config());
        let err = assistant
            .generate(GenerateRequest {
                query: "How many users?".into(),
                db_url: "mysql://root@localhost/app".into(),
                dialect: None,
            })
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "Error retrieving schema: unsupported database url scheme 'mysql'"
        );
    }

    #[tokio::test]
    async fn reflects_schema() {
        let (_dir, db_url) = fixture();
        let assistant = SqlAssistant::new(ScriptedModel::replying(&[]), &config());

        let schema = assistant.schema(Some(&db_url)).await.unwrap();
        let users = schema.table("users").unwrap();
        assert_eq!(users.columns, vec!["id", "signup_date"]);
        assert_eq!(users.primary_key, vec!["id"]);
    }
}
