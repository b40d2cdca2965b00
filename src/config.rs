//! Runtime settings, read from the `app_config` table with `HEALTHPULSE_*`
//! environment overrides. Secrets are only ever read from the environment.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};
use crate::storage::repository;
use crate::storage::Database;

pub const DEFAULT_LLM_ENDPOINT: &str = "https://ai.gateway.lovable.dev/v1/chat/completions";
pub const DEFAULT_LLM_MODEL: &str = "google/gemini-2.5-flash";
pub const DEFAULT_LLM_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8787";

pub const LLM_API_KEY_ENV: &str = "HEALTHPULSE_LLM_API_KEY";
pub const IDENTITY_API_KEY_ENV: &str = "HEALTHPULSE_IDENTITY_API_KEY";

/// Keys accepted by `config set`.
pub const KNOWN_KEYS: &[&str] = &[
    "llm_endpoint",
    "llm_model",
    "llm_timeout_secs",
    "identity_provider",
    "identity_url",
    "listen_addr",
];

/// A credential that never shows up in logs or debug output.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityMode {
    /// Tokens issued with `healthpulse token create`.
    Local,
    /// A remote user endpoint validates the bearer token.
    Http,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub llm_endpoint: Url,
    pub llm_model: String,
    pub llm_timeout: Duration,
    pub llm_api_key: Option<Secret>,
    pub identity: IdentityMode,
    pub identity_url: Option<Url>,
    pub identity_api_key: Option<Secret>,
    pub listen_addr: SocketAddr,
}

impl Settings {
    /// Load settings from the database, applying environment overrides.
    pub async fn load(db: &Database) -> Result<Self> {
        let stored: Vec<(String, String)> = db
            .reader()
            .call(|conn| repository::list_config(conn))
            .await?;
        let stored: HashMap<String, String> = stored.into_iter().collect();
        Self::resolve(&stored, |name| std::env::var(name).ok())
    }

    /// Build settings from stored values and an environment lookup. For each
    /// key, `HEALTHPULSE_<KEY>` wins over the stored value.
    pub fn resolve(
        stored: &HashMap<String, String>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let get = |key: &str| -> Option<String> {
            env(&env_name(key))
                .filter(|v| !v.trim().is_empty())
                .or_else(|| stored.get(key).cloned())
        };

        let llm_endpoint = parse_url(
            "llm_endpoint",
            &get("llm_endpoint").unwrap_or_else(|| DEFAULT_LLM_ENDPOINT.to_string()),
        )?;
        let llm_model = get("llm_model").unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string());
        let llm_timeout = match get("llm_timeout_secs") {
            Some(raw) => Duration::from_secs(parse_timeout(&raw)?),
            None => Duration::from_secs(DEFAULT_LLM_TIMEOUT_SECS),
        };
        let identity = match get("identity_provider").as_deref() {
            None | Some("local") => IdentityMode::Local,
            Some("http") => IdentityMode::Http,
            Some(other) => {
                return Err(Error::Config(format!(
                    "unknown identity_provider: {other} (expected local or http)"
                )))
            }
        };
        let identity_url = get("identity_url")
            .map(|raw| parse_url("identity_url", &raw))
            .transpose()?;
        if identity == IdentityMode::Http && identity_url.is_none() {
            return Err(Error::Config(
                "identity_provider=http requires identity_url".into(),
            ));
        }
        let listen_addr = parse_addr(
            &get("listen_addr").unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string()),
        )?;

        Ok(Self {
            llm_endpoint,
            llm_model,
            llm_timeout,
            llm_api_key: env(LLM_API_KEY_ENV).filter(|v| !v.is_empty()).map(Secret::new),
            identity,
            identity_url,
            identity_api_key: env(IDENTITY_API_KEY_ENV)
                .filter(|v| !v.is_empty())
                .map(Secret::new),
            listen_addr,
        })
    }

    /// Check a value before it is stored with `config set`.
    pub fn validate_value(key: &str, value: &str) -> Result<()> {
        match key {
            "llm_endpoint" | "identity_url" => parse_url(key, value).map(|_| ()),
            "llm_timeout_secs" => parse_timeout(value).map(|_| ()),
            "listen_addr" => parse_addr(value).map(|_| ()),
            "identity_provider" => match value {
                "local" | "http" => Ok(()),
                other => Err(Error::Config(format!("unknown identity_provider: {other}"))),
            },
            "llm_model" if value.trim().is_empty() => {
                Err(Error::Config("llm_model must not be empty".into()))
            }
            "llm_model" => Ok(()),
            other => Err(Error::Config(format!(
                "unknown config key: {other} (known: {})",
                KNOWN_KEYS.join(", ")
            ))),
        }
    }
}

fn env_name(key: &str) -> String {
    format!("HEALTHPULSE_{}", key.to_ascii_uppercase())
}

fn parse_url(key: &str, raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| Error::Config(format!("{key}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(Error::Config(format!("{key}: unsupported scheme {other}"))),
    }
}

fn parse_timeout(raw: &str) -> Result<u64> {
    match raw.trim().parse::<u64>() {
        Ok(0) | Err(_) => Err(Error::Config(format!(
            "llm_timeout_secs must be a positive integer, got {raw}"
        ))),
        Ok(secs) => Ok(secs),
    }
}

fn parse_addr(raw: &str) -> Result<SocketAddr> {
    raw.parse()
        .map_err(|e| Error::Config(format!("listen_addr {raw}: {e}")))
}
