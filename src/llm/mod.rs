pub mod agents;
pub mod wire;

use async_trait::async_trait;

use crate::config::{Secret, Settings};
use crate::error::{Error, Result};
use wire::{ChatRequest, ChatResponse};

/// A chat-completions backend. The HTTP implementation talks to an
/// OpenAI-compatible gateway; tests script their own.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Send one request. No retries happen here.
    ///
    /// Non-success statuses map to `RateLimited` (429), `QuotaExhausted`
    /// (402) or `Upstream`. A 2xx body that does not decode yields an empty
    /// response rather than an error.
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse>;

    fn model(&self) -> &str;
}

pub struct HttpCompletionClient {
    http: reqwest::Client,
    endpoint: url::Url,
    api_key: Secret,
    model: String,
}

impl HttpCompletionClient {
    pub fn new(
        endpoint: url::Url,
        api_key: Secret,
        model: impl Into<String>,
        timeout: std::time::Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            http,
            endpoint,
            api_key,
            model: model.into(),
        })
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .bearer_auth(self.api_key.expose())
            .json(request)
            .send()
            .await
            .map_err(|e| transport_failure(None, &e))?;

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            // A cut-off success body is a failed call, never an empty answer.
            Err(e) if status.is_success() => {
                return Err(transport_failure(Some(status.as_u16()), &e));
            }
            Err(e) => {
                log::warn!("Could not read AI gateway error body: {e}");
                String::new()
            }
        };

        if !status.is_success() {
            log::error!("AI gateway error: {} {}", status.as_u16(), body);
            return Err(classify_failure(status.as_u16(), &body));
        }

        log::debug!("AI response: {body}");
        Ok(decode_response(&body))
    }

    fn model(&self) -> &str {
        &self.model
    }
}

fn transport_failure(status: Option<u16>, e: &reqwest::Error) -> Error {
    log::error!("Completion request failed: {e}");
    let message = if e.is_timeout() {
        "AI analysis timed out".to_string()
    } else {
        format!("AI analysis failed: {e}")
    };
    Error::Upstream { status, message }
}

/// Stands in when no API key is configured, so everything except analysis
/// keeps working.
pub struct DisabledCompletion {
    reason: String,
}

impl DisabledCompletion {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl CompletionClient for DisabledCompletion {
    async fn complete(&self, _request: &ChatRequest) -> Result<ChatResponse> {
        Err(Error::Config(self.reason.clone()))
    }

    fn model(&self) -> &str {
        "disabled"
    }
}

/// Build the HTTP completion client from settings. The API key must be set.
pub fn create_client(settings: &Settings) -> Result<HttpCompletionClient> {
    let api_key = settings.llm_api_key.clone().ok_or_else(|| {
        Error::Config(format!(
            "{} is not set",
            crate::config::LLM_API_KEY_ENV
        ))
    })?;
    HttpCompletionClient::new(
        settings.llm_endpoint.clone(),
        api_key,
        settings.llm_model.clone(),
        settings.llm_timeout,
    )
}

/// Map a non-success upstream status to the error taxonomy.
pub fn classify_failure(status: u16, body: &str) -> Error {
    match status {
        429 => Error::RateLimited,
        402 => Error::QuotaExhausted,
        _ => Error::Upstream {
            status: Some(status),
            message: upstream_message(body).unwrap_or_else(|| "AI analysis failed".to_string()),
        },
    }
}

/// Pull a human-readable message out of an error body. Understands
/// `{"error": {"message": ..}}`, `{"error": ".."}`, `{"message": ..}` and
/// plain text.
fn upstream_message(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(v) => {
            let candidate = v
                .pointer("/error/message")
                .or_else(|| v.get("error"))
                .or_else(|| v.get("message"))
                .and_then(|m| m.as_str());
            candidate
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_string)
        }
        Err(_) => Some(body.chars().take(500).collect()),
    }
}

fn decode_response(body: &str) -> ChatResponse {
    match serde_json::from_str(body) {
        Ok(resp) => resp,
        Err(e) => {
            log::warn!("Unparsable completion response, treating as empty: {e}");
            ChatResponse::default()
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use wire::{Choice, FunctionCall, ResponseMessage, ToolCall};

    type Script = Box<dyn Fn() -> Result<ChatResponse> + Send + Sync>;

    /// A completion client that answers from a closure and counts calls.
    pub struct ScriptedCompletion {
        script: Script,
        calls: AtomicUsize,
    }

    impl ScriptedCompletion {
        pub fn new(script: impl Fn() -> Result<ChatResponse> + Send + Sync + 'static) -> Self {
            Self {
                script: Box::new(script),
                calls: AtomicUsize::new(0),
            }
        }

        /// Always answers with one tool call carrying `arguments`.
        pub fn tool_call(name: &'static str, arguments: &'static str) -> Self {
            Self::new(move || Ok(tool_call_response(name, arguments)))
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedCompletion {
        async fn complete(&self, _request: &ChatRequest) -> Result<ChatResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.script)()
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    pub fn tool_call_response(name: &str, arguments: &str) -> ChatResponse {
        ChatResponse {
            choices: vec![Choice {
                message: ResponseMessage {
                    content: None,
                    tool_calls: Some(vec![ToolCall {
                        id: Some("call_0".into()),
                        function: FunctionCall {
                            name: name.into(),
                            arguments: arguments.into(),
                        },
                    }]),
                },
            }],
        }
    }
}
