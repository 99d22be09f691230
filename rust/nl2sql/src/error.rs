use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::{db::DbError, llm::LlmError};

pub type Result<T> = std::result::Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("authentication failed")]
    Auth,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("Error retrieving schema: {0}")]
    SchemaRetrieval(String),

    #[error("False: The query is not related to the provided table schema.")]
    RelevanceRejected,

    #[error("False: Unable to generate a valid SQL query after {attempts} attempts.")]
    GenerationExhausted { attempts: usize },

    #[error("Error executing SQL query: {0}")]
    QueryExecution(String),

    #[error("language model request failed: {0}")]
    LlmUnavailable(#[from] LlmError),

    #[error("request timed out")]
    Timeout,

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn schema(err: DbError) -> Self {
        ServiceError::SchemaRetrieval(err.to_string())
    }

    pub fn execution(err: DbError) -> Self {
        ServiceError::QueryExecution(err.to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::Auth => StatusCode::UNAUTHORIZED,
            ServiceError::InvalidRequest(_)
            | ServiceError::SchemaRetrieval(_)
            | ServiceError::RelevanceRejected
            | ServiceError::GenerationExhausted { .. }
            | ServiceError::QueryExecution(_) => StatusCode::BAD_REQUEST,
            ServiceError::LlmUnavailable(_) => StatusCode::BAD_GATEWAY,
            ServiceError::Timeout => StatusCode::REQUEST_TIMEOUT,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            error!(error = %self, "request failed");
        }

        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
