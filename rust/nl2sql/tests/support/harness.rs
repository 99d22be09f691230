use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{self, Request, StatusCode},
    Router,
};
use nl2sql::{
    config::{AgentConfig, AppConfig, DatabaseConfig, LlmConfig},
    llm::{LanguageModel, LlmError, Prompt},
    server::Server,
    telemetry,
};
use rusqlite::Connection;
use serde::Serialize;
use serde_json::Value;
use std::{
    env,
    sync::{Arc, Mutex},
    time::Duration,
};
use tempfile::TempDir;
use tower::ServiceExt;

pub const API_KEY: &str = "test-api-key";
pub const GENERATE_MARKER: &str = "Generate the corresponding SQL query";
pub const RELEVANCE_MARKER: &str = "Determine if";
pub const VERIFY_MARKER: &str = "SQL Dialect";

type Responder = Box<dyn Fn(&Prompt) -> Result<String, LlmError> + Send + Sync>;

/// Language model double driven by a closure over the prompt text.
pub struct ScriptedModel {
    responder: Responder,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&Prompt) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            responder: Box::new(responder),
            prompts: Mutex::new(Vec::new()),
        })
    }

    /// Relevance answers `relevant`, generation answers `sql` wrapped in a fence, every
    /// verification sample answers `approve`, and the explainer answers `explanation`.
    pub fn scripted(relevant: bool, sql: &str, approve: bool, explanation: &str) -> Arc<Self> {
        let sql = sql.to_string();
        let explanation = explanation.to_string();
        Self::new(move |prompt| {
            let text = &prompt.text;
            let reply = if text.starts_with(RELEVANCE_MARKER) {
                relevant.to_string()
            } else if text.contains(GENERATE_MARKER) {
                format!("```sql\n{sql}\n```")
            } else if text.starts_with(VERIFY_MARKER) {
                approve.to_string()
            } else {
                explanation.clone()
            };
            Ok(reply)
        })
    }

    #[allow(dead_code)]
    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    #[allow(dead_code)]
    pub fn calls_containing(&self, needle: &str) -> usize {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.contains(needle))
            .count()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, prompt: &Prompt) -> Result<String, LlmError> {
        self.prompts.lock().unwrap().push(prompt.text.clone());
        (self.responder)(prompt)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// SQLite database seeded with a small signup table. Dropping it removes the file.
pub struct SqliteFixture {
    _dir: TempDir,
    pub url: String,
}

impl SqliteFixture {
    pub fn seeded() -> Self {
        let dir = tempfile::tempdir().expect("failed to create fixture dir");
        let path = dir.path().join("fixture.db");
        let conn = Connection::open(&path).expect("failed to open fixture database");
        conn.execute_batch(
            "CREATE TABLE users (
                 id INTEGER PRIMARY KEY,
                 email TEXT NOT NULL,
                 signup_date TEXT NOT NULL
             );
             CREATE TABLE orders (
                 id INTEGER PRIMARY KEY,
                 user_id INTEGER NOT NULL REFERENCES users(id),
                 total REAL
             );
             INSERT INTO users (email, signup_date) VALUES
                 ('ada@example.com', '2024-04-03'),
                 ('grace@example.com', '2024-04-20'),
                 ('linus@example.com', '2024-05-01');
             INSERT INTO orders (user_id, total) VALUES (1, 19.5), (1, 5.25), (2, 100.0);",
        )
        .expect("failed to seed fixture database");

        Self {
            url: format!("sqlite:///{}", path.display()),
            _dir: dir,
        }
    }
}

pub fn test_config(api_key: Option<&str>) -> AppConfig {
    AppConfig {
        listen_addr: ([127, 0, 0, 1], 0).into(),
        api_key: api_key.map(str::to_string),
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
            timeout: Duration::from_secs(10),
            ..DatabaseConfig::default()
        },
    }
}

/// In-process router around a scripted model; requests go through `tower::ServiceExt::oneshot`.
pub struct TestHarness {
    router: Router,
    api_key: Option<String>,
}

impl TestHarness {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self::with_config(test_config(Some(API_KEY)), model)
    }

    pub fn with_config(config: AppConfig, model: Arc<dyn LanguageModel>) -> Self {
        telemetry::init_test_tracing();
        let api_key = config.api_key.clone();
        let router = Server::with_model(config, model).router();
        Self { router, api_key }
    }

    pub async fn generate<T: Serialize>(&self, payload: &T) -> http::Response<Body> {
        let body = serde_json::to_vec(payload).expect("request payload should serialize");
        self.post_raw("/generate", body, true).await
    }

    #[allow(dead_code)]
    pub async fn generate_without_api_key<T: Serialize>(
        &self,
        payload: &T,
    ) -> http::Response<Body> {
        let body = serde_json::to_vec(payload).expect("request payload should serialize");
        self.post_raw("/generate", body, false).await
    }

    #[allow(dead_code)]
    pub async fn post_raw(
        &self,
        path: &str,
        body: impl Into<Body>,
        include_api_key: bool,
    ) -> http::Response<Body> {
        let builder = Request::builder()
            .method("POST")
            .uri(path)
            .header(http::header::CONTENT_TYPE, "application/json");
        self.send(builder, body.into(), include_api_key).await
    }

    #[allow(dead_code)]
    pub async fn get(&self, uri: &str) -> http::Response<Body> {
        self.send(
            Request::builder().method("GET").uri(uri),
            Body::empty(),
            true,
        )
        .await
    }

    async fn send(
        &self,
        mut builder: http::request::Builder,
        body: Body,
        include_api_key: bool,
    ) -> http::Response<Body> {
        if include_api_key {
            if let Some(key) = &self.api_key {
                builder = builder.header("x-api-key", key);
            }
        }

        let request = builder
            .body(body)
            .expect("failed to build harness request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router should always produce a response")
    }
}

pub async fn read_json(response: http::Response<Body>) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("response body should deserialize");
    let value =
        serde_json::from_slice::<Value>(&bytes).expect("response body should be valid JSON");
    (status, value)
}

/// Connection string for an optional live Postgres, or `None` to skip.
#[allow(dead_code)]
pub fn live_postgres_url() -> Option<String> {
    match env::var("NL2SQL_TEST_DATABASE_URL") {
        Ok(url) if !url.trim().is_empty() => Some(url),
        _ => {
            eprintln!("[nl2sql-test] skipping live Postgres test: NL2SQL_TEST_DATABASE_URL is not set");
            None
        }
    }
}
