use crate::{config::AppConfig, pipeline::SqlAssistant};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub assistant: SqlAssistant,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, assistant: SqlAssistant) -> Self {
        Self { config, assistant }
    }
}
