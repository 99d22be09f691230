use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    net::{SocketAddr, ToSocketAddrs},
    time::Duration,
};

pub const DEFAULT_DIALECT: &str = "generic SQL";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub api_key: Option<String>,
    pub request_timeout: Duration,
    pub default_dialect: String,
    pub llm: LlmConfig,
    pub agent: AgentConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub max_attempts: usize,
    pub verification_samples: usize,
    pub constrained_judgments: bool,
    pub retry_feedback: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            verification_samples: default_verification_samples(),
            constrained_judgments: true,
            retry_feedback: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DatabaseConfig {
    pub timeout: Duration,
    pub pg_ssl_root_cert: Option<String>,
    pub pg_ssl_cert: Option<String>,
    pub pg_ssl_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    nl2sql_listen_addr: Option<String>,
    #[serde(default)]
    nl2sql_listen_host: Option<String>,
    #[serde(default)]
    nl2sql_listen_port: Option<u16>,
    #[serde(default)]
    nl2sql_api_key: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    nl2sql_request_timeout_secs: u64,
    #[serde(default)]
    nl2sql_default_dialect: Option<String>,
    #[serde(default)]
    nl2sql_llm_api_key: Option<String>,
    #[serde(default)]
    gemini_api_key: Option<String>,
    #[serde(default)]
    google_api_key: Option<String>,
    #[serde(default)]
    nl2sql_llm_base_url: Option<String>,
    #[serde(default)]
    nl2sql_llm_model: Option<String>,
    #[serde(default = "default_llm_timeout_secs")]
    nl2sql_llm_timeout_secs: u64,
    #[serde(default = "default_llm_max_retries")]
    nl2sql_llm_max_retries: u32,
    #[serde(default = "default_llm_retry_backoff_ms")]
    nl2sql_llm_retry_backoff_ms: u64,
    #[serde(default)]
    nl2sql_llm_temperature: Option<f32>,
    #[serde(default = "default_max_attempts")]
    nl2sql_max_attempts: usize,
    #[serde(default = "default_verification_samples")]
    nl2sql_verification_samples: usize,
    #[serde(default = "default_true")]
    nl2sql_constrained_judgments: bool,
    #[serde(default)]
    nl2sql_retry_feedback: bool,
    #[serde(default = "default_db_timeout_secs")]
    nl2sql_db_timeout_secs: u64,
    #[serde(default)]
    pgsslrootcert: Option<String>,
    #[serde(default)]
    pgsslcert: Option<String>,
    #[serde(default)]
    pgsslkey: Option<String>,
}

const fn default_request_timeout_secs() -> u64 {
    300
}

const fn default_llm_timeout_secs() -> u64 {
    60
}

const fn default_llm_max_retries() -> u32 {
    2
}

const fn default_llm_retry_backoff_ms() -> u64 {
    500
}

const fn default_max_attempts() -> usize {
    5
}

const fn default_verification_samples() -> usize {
    3
}

const fn default_db_timeout_secs() -> u64 {
    30
}

const fn default_true() -> bool {
    true
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Builds the configuration from an explicit set of `KEY=value` pairs.
    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let raw: RawConfig =
            envy::from_iter(vars).context("failed to parse NL2SQL_* environment variables")?;

        let listen_addr = resolve_addr(
            raw.nl2sql_listen_addr,
            raw.nl2sql_listen_host,
            raw.nl2sql_listen_port,
        )?;

        let llm_api_key = non_empty(raw.nl2sql_llm_api_key)
            .or_else(|| non_empty(raw.gemini_api_key))
            .or_else(|| non_empty(raw.google_api_key))
            .context("NL2SQL_LLM_API_KEY, GEMINI_API_KEY or GOOGLE_API_KEY must be set")?;

        if raw.nl2sql_max_attempts == 0 {
            anyhow::bail!("NL2SQL_MAX_ATTEMPTS must be at least 1");
        }
        if raw.nl2sql_verification_samples == 0 {
            anyhow::bail!("NL2SQL_VERIFICATION_SAMPLES must be at least 1");
        }

        Ok(Self {
            listen_addr,
            api_key: non_empty(raw.nl2sql_api_key),
            request_timeout: Duration::from_secs(raw.nl2sql_request_timeout_secs.max(1)),
            default_dialect: non_empty(raw.nl2sql_default_dialect)
                .unwrap_or_else(|| DEFAULT_DIALECT.to_string()),
            llm: LlmConfig {
                api_key: llm_api_key,
                base_url: non_empty(raw.nl2sql_llm_base_url)
                    .unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string()),
                model: non_empty(raw.nl2sql_llm_model)
                    .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
                timeout: Duration::from_secs(raw.nl2sql_llm_timeout_secs.max(1)),
                max_retries: raw.nl2sql_llm_max_retries,
                retry_backoff: Duration::from_millis(raw.nl2sql_llm_retry_backoff_ms),
                temperature: raw.nl2sql_llm_temperature,
            },
            agent: AgentConfig {
                max_attempts: raw.nl2sql_max_attempts,
                verification_samples: raw.nl2sql_verification_samples,
                constrained_judgments: raw.nl2sql_constrained_judgments,
                retry_feedback: raw.nl2sql_retry_feedback,
            },
            database: DatabaseConfig {
                timeout: Duration::from_secs(raw.nl2sql_db_timeout_secs.max(1)),
                pg_ssl_root_cert: non_empty(raw.pgsslrootcert),
                pg_ssl_cert: non_empty(raw.pgsslcert),
                pg_ssl_key: non_empty(raw.pgsslkey),
            },
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|raw| {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn resolve_addr(
    addr: Option<String>,
    host: Option<String>,
    port: Option<u16>,
) -> Result<SocketAddr> {
    if let Some(addr) = addr {
        return addr
            .to_socket_addrs()
            .context("invalid NL2SQL_LISTEN_ADDR value")?
            .next()
            .context("NL2SQL_LISTEN_ADDR resolved to no addresses");
    }

    let host = host.unwrap_or_else(|| "0.0.0.0".to_string());
    let port = port.unwrap_or(8000);
    let combined = format!("{}:{}", host, port);
    combined
        .to_socket_addrs()
        .context("invalid nl2sql listen host/port combination")?
        .next()
        .context("listen address resolved to no targets")
}
