//! Request and response bodies for the HTTP surface.

use crate::{db::Record, schema::Schema};
use serde::{Deserialize, Serialize};

/// Body of `POST /generate`. Missing fields deserialize as empty so the handler can answer
/// with a 400 naming the field instead of a generic extractor rejection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub db_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialect: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub sql_query: String,
    pub columns: Vec<String>,
    pub data: Vec<Record>,
    pub explanation: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchemaParams {
    #[serde(default)]
    pub db_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaResponse {
    pub schema: Schema,
}
