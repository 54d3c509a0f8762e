//! Dispatch client: the uniform `generate` entry point over every
//! configured provider.
//!
//! One client serves all roles. Construction routes every bound role to a
//! handle up front, builds one shared HTTP client, and creates one token
//! bucket per provider. A call acquires a limiter token, issues a single
//! OpenAI-compatible chat-completions request, and translates the outcome
//! into the crate error taxonomy.
//!
//! There are no internal retries. A 429, timeout, or transport error
//! comes back classified and the caller decides whether and when to try
//! again; that keeps this layer composable and testable with fault
//! injection.

use crate::client::{route, DispatchHandle, TokenBucket};
use crate::models::{
    DispatchError, ProviderKind, ResolutionError, ResolvedConfig, Result, Role,
};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Message in a chat completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Chat completion request payload.
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f64,
}

/// Chat completion response.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

/// API error response (OpenAI-compatible).
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Per-call knobs. Everything has a sensible default.
#[derive(Debug, Clone)]
pub struct CallOptions {
    pub max_tokens: u32,
    pub temperature: f64,
    /// Upper bound on the whole upstream request.
    pub timeout: Duration,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: 0.7,
            timeout: Duration::from_secs(180),
        }
    }
}

/// Successful call outcome.
#[derive(Debug, Clone)]
pub struct CallResult {
    /// Generated content.
    pub content: String,
    /// Wall-clock duration of the upstream call, excluding limiter wait.
    pub latency_ms: u64,
    /// Provider that served the call.
    pub provider: ProviderKind,
    /// Model reported by the gateway (may differ from the requested id).
    pub model: String,
}

/// Uniform dispatch client over every configured role.
///
/// Designed for concurrent use: `generate` takes `&self`, the limiter
/// table is the only shared mutable state, and handles are read-only
/// after construction.
pub struct DispatchClient {
    http: reqwest::Client,
    limiters: DashMap<ProviderKind, Arc<TokenBucket>>,
    handles: BTreeMap<Role, DispatchHandle>,
}

impl DispatchClient {
    /// Route every bound role in `config` and build the shared transport.
    ///
    /// Budgets are fixed here for the client's lifetime; changing a rate
    /// limit means constructing a new client.
    pub fn new(config: &ResolvedConfig) -> Result<Self> {
        let http = reqwest::Client::builder().build()?;

        let limiters: DashMap<ProviderKind, Arc<TokenBucket>> = DashMap::new();
        for provider in config.referenced_providers() {
            limiters.insert(provider, Arc::new(TokenBucket::new(config.budget(provider))));
        }

        let mut handles = BTreeMap::new();
        for binding in config.bindings() {
            let provider = binding.provider;
            let credential = config
                .credential(provider)
                .ok_or(ResolutionError::MissingApiKey { provider })?
                .clone();
            let limiter = limiters
                .get(&provider)
                .map(|entry| Arc::clone(entry.value()))
                .expect("limiter exists for every referenced provider");

            let handle = route(binding.clone(), credential, limiter)?;
            debug!(
                role = %handle.role(),
                provider = %provider,
                model = handle.vendor_model(),
                "routed role"
            );
            handles.insert(binding.role, handle);
        }

        Ok(Self {
            http,
            limiters,
            handles,
        })
    }

    /// Handle for a role, if the role is bound.
    pub fn handle(&self, role: Role) -> Option<&DispatchHandle> {
        self.handles.get(&role)
    }

    pub fn bound_roles(&self) -> Vec<Role> {
        self.handles.keys().copied().collect()
    }

    /// Shared limiter for a provider, if any role routes there.
    pub fn limiter(&self, provider: ProviderKind) -> Option<Arc<TokenBucket>> {
        self.limiters
            .get(&provider)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Generate a completion for a role from a single user prompt.
    ///
    /// An unbound role fails fast with [`DispatchError::RoleUnbound`];
    /// there is no fallback to another role.
    pub async fn generate(
        &self,
        role: Role,
        prompt: &str,
        options: &CallOptions,
    ) -> Result<CallResult> {
        self.generate_chat(role, vec![Message::user(prompt)], options)
            .await
    }

    /// Generate a completion for a role from a full message list.
    pub async fn generate_chat(
        &self,
        role: Role,
        messages: Vec<Message>,
        options: &CallOptions,
    ) -> Result<CallResult> {
        let handle = self
            .handles
            .get(&role)
            .ok_or(DispatchError::RoleUnbound(role))?;
        self.generate_with(handle, messages, options).await
    }

    /// Issue one upstream call through an explicit handle.
    ///
    /// Acquires one limiter token first; the token is consumed only once
    /// granted, so cancelling this future while it waits releases nothing
    /// and leaves no side effects.
    pub async fn generate_with(
        &self,
        handle: &DispatchHandle,
        messages: Vec<Message>,
        options: &CallOptions,
    ) -> Result<CallResult> {
        let provider = handle.provider();

        handle.limiter().acquire().await;

        let request = ChatCompletionRequest {
            model: handle.vendor_model().to_string(),
            messages,
            max_tokens: options.max_tokens,
            temperature: options.temperature,
        };
        let url = format!("{}/chat/completions", handle.base_url());

        let start = Instant::now();
        let response = self
            .http
            .post(&url)
            .headers(handle.headers())
            .timeout(options.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DispatchError::Timeout(options.timeout)
                } else {
                    DispatchError::Network(e)
                }
            })?;

        let status = response.status().as_u16();

        if !response.status().is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<f64>().ok());
            let body = response.text().await.unwrap_or_default();

            return Err(classify_failure(
                provider,
                handle.vendor_model(),
                status,
                retry_after,
                &body,
            ));
        }

        let body: ChatCompletionResponse =
            response.json().await.map_err(|e| DispatchError::Parse {
                provider,
                reason: format!("failed to parse response: {e}"),
            })?;

        let content = body
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| DispatchError::Parse {
                provider,
                reason: "no choices in response".to_string(),
            })?;

        let latency_ms = start.elapsed().as_millis() as u64;
        debug!(
            provider = %provider,
            model = handle.vendor_model(),
            latency_ms,
            "generate succeeded"
        );

        Ok(CallResult {
            content,
            latency_ms,
            provider,
            model: body
                .model
                .unwrap_or_else(|| handle.vendor_model().to_string()),
        })
    }
}

/// Map a non-2xx upstream response onto the error taxonomy.
///
/// The status code is the authoritative signal: 429 is throttling with an
/// optional retry-after hint, 401/403 is a credential problem, 404 is a
/// bad model mapping. Everything else keeps the gateway's message.
fn classify_failure(
    provider: ProviderKind,
    model: &str,
    status: u16,
    retry_after: Option<f64>,
    body: &str,
) -> DispatchError {
    match status {
        429 => DispatchError::RateLimited {
            provider,
            retry_after_secs: retry_after,
        },
        401 | 403 => DispatchError::Auth { provider },
        404 => DispatchError::ModelNotFound {
            provider,
            model: model.to_string(),
        },
        _ => {
            let message = serde_json::from_str::<ApiErrorResponse>(body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| body.to_string());
            DispatchError::Api {
                provider,
                status,
                message,
            }
        }
    }
}
