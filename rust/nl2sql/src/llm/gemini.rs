use super::{LanguageModel, LlmError, Prompt, ResponseFormat};
use crate::config::LlmConfig;
use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::{debug, warn};

const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Client for the Generative Language `generateContent` endpoint.
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    config: Arc<LlmConfig>,
    endpoint: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: [Content<'a>; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize, Default)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<ResponseSchema>,
}

#[derive(Serialize)]
struct ResponseSchema {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(rename = "enum")]
    variants: Vec<&'static str>,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateContentResponse {
    fn into_text(self) -> String {
        self.candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

impl GeminiClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        let endpoint = format!(
            "{}/v1beta/models/{}:generateContent",
            config.base_url.trim_end_matches('/'),
            config.model
        );

        Ok(Self {
            client,
            config: Arc::new(config),
            endpoint,
        })
    }

    fn generation_config(&self, format: ResponseFormat) -> Option<GenerationConfig> {
        let mut generation = GenerationConfig {
            temperature: self.config.temperature,
            ..GenerationConfig::default()
        };

        if let ResponseFormat::Choice(choices) = format {
            generation.response_mime_type = Some("text/x.enum");
            generation.response_schema = Some(ResponseSchema {
                kind: "STRING",
                variants: choices.to_vec(),
            });
        }

        if generation.temperature.is_none() && generation.response_schema.is_none() {
            None
        } else {
            Some(generation)
        }
    }

    async fn dispatch(&self, prompt: &Prompt) -> Result<String, LlmError> {
        let body = GenerateContentRequest {
            contents: [Content {
                role: "user",
                parts: [Part {
                    text: &prompt.text,
                }],
            }],
            generation_config: self.generation_config(prompt.format),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-goog-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| LlmError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let decoded: GenerateContentResponse = response
            .json()
            .await
            .map_err(|err| LlmError::Decode(err.to_string()))?;
        Ok(decoded.into_text())
    }
}

#[async_trait]
impl LanguageModel for GeminiClient {
    async fn complete(&self, prompt: &Prompt) -> Result<String, LlmError> {
        let mut retries = 0u32;
        loop {
            match self.dispatch(prompt).await {
                Ok(text) => {
                    debug!(model = %self.config.model, chars = text.len(), "model call completed");
                    return Ok(text);
                }
                Err(err) if err.is_retryable() && retries < self.config.max_retries => {
                    let delay = backoff_delay(self.config.retry_backoff, retries);
                    retries += 1;
                    warn!(
                        error = %err,
                        retry = retries,
                        delay_ms = delay.as_millis() as u64,
                        "model call failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}

/// Doubles `base` per earlier retry, capped at [`MAX_RETRY_DELAY`].
fn backoff_delay(base: Duration, retries: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(retries))
        .min(MAX_RETRY_DELAY)
}
