use crate::{
    config::AppConfig,
    error::{Result, ServiceError},
    llm::{GeminiClient, LanguageModel},
    models::{GenerateRequest, GenerateResponse, SchemaParams, SchemaResponse},
    pipeline::SqlAssistant,
    state::AppState,
};
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::{future::Future, sync::Arc};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

pub struct Server {
    config: Arc<AppConfig>,
    state: AppState,
}

impl Server {
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let model = GeminiClient::new(config.llm.clone())?;
        Ok(Self::with_model(config, Arc::new(model)))
    }

    /// Builds the service around an already constructed model backend.
    pub fn with_model(config: AppConfig, model: Arc<dyn LanguageModel>) -> Self {
        info!(model = model.name(), "language model configured");
        let assistant = SqlAssistant::new(model, &config);
        let config = Arc::new(config);
        let state = AppState::new(Arc::clone(&config), assistant);

        Self { config, state }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/healthz", get(Self::health))
            .route("/generate", post(Self::generate))
            .route("/schema", get(Self::schema))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let addr = self.config.listen_addr;
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "nl2sql listening");
        axum::serve(listener, self.router()).await?;
        Ok(())
    }

    async fn health() -> Json<serde_json::Value> {
        Json(json!({ "status": "ok" }))
    }

    async fn generate(
        State(state): State<AppState>,
        headers: HeaderMap,
        payload: std::result::Result<Json<GenerateRequest>, JsonRejection>,
    ) -> Result<Json<GenerateResponse>> {
        enforce_api_key(&headers, &state.config)?;
        let Json(request) =
            payload.map_err(|rejection| ServiceError::InvalidRequest(rejection.body_text()))?;

        let response = with_deadline(&state.config, state.assistant.generate(request)).await?;
        Ok(Json(response))
    }

    async fn schema(
        State(state): State<AppState>,
        headers: HeaderMap,
        params: std::result::Result<Query<SchemaParams>, QueryRejection>,
    ) -> Result<Json<SchemaResponse>> {
        enforce_api_key(&headers, &state.config)?;
        let Query(params) =
            params.map_err(|rejection| ServiceError::InvalidRequest(rejection.body_text()))?;

        let schema =
            with_deadline(&state.config, state.assistant.schema(params.db_url.as_deref())).await?;
        Ok(Json(SchemaResponse { schema }))
    }
}

async fn with_deadline<T, F>(config: &AppConfig, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(config.request_timeout, fut)
        .await
        .map_err(|_| ServiceError::Timeout)?
}

fn enforce_api_key(headers: &HeaderMap, config: &AppConfig) -> Result<()> {
    if let Some(expected) = &config.api_key {
        let provided = headers
            .get("x-api-key")
            .and_then(|value| value.to_str().ok());

        if provided != Some(expected.as_str()) {
            return Err(ServiceError::Auth);
        }
    }

    Ok(())
}
