//! Error taxonomy for modelgate.
//!
//! Four classes, matching how callers should react:
//! - Configuration: operator must fix a spec, key, or mapping; never retried
//! - Resolution: a handle could not be built for a role; fatal for that role
//! - RateLimited: upstream throttling; retry after the hinted delay
//! - Transient: network/timeout; retry with backoff
//!
//! The dispatch layer performs no retries itself. Callers inspect
//! [`DispatchError::kind`] and own the retry policy.

use crate::models::{ProviderKind, Role};
use thiserror::Error;

/// A single configuration problem found at resolution time.
///
/// The resolver collects these instead of failing fast, so every
/// misconfiguration surfaces in one report.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing API key for provider '{provider}': set {env_var}")]
    MissingApiKey {
        provider: ProviderKind,
        env_var: &'static str,
    },

    #[error("unknown provider '{provider_id}' in {role_env}={raw}")]
    UnknownProvider {
        role: Role,
        provider_id: String,
        role_env: &'static str,
        raw: String,
    },

    #[error("malformed model spec {role_env}={raw}: {reason}")]
    MalformedSpec {
        role: Role,
        role_env: &'static str,
        raw: String,
        reason: String,
    },

    #[error("invalid rate limit {env_var}={value}: must be a positive number")]
    InvalidRateLimit {
        provider: ProviderKind,
        env_var: &'static str,
        value: String,
    },

    #[error("invalid burst {env_var}={value}: must be an integer >= 1")]
    InvalidBurst {
        provider: ProviderKind,
        env_var: &'static str,
        value: String,
    },
}

impl ConfigError {
    /// The provider this error concerns, when it names one.
    pub fn provider(&self) -> Option<ProviderKind> {
        match self {
            Self::MissingApiKey { provider, .. }
            | Self::InvalidRateLimit { provider, .. }
            | Self::InvalidBurst { provider, .. } => Some(*provider),
            Self::UnknownProvider { .. } | Self::MalformedSpec { .. } => None,
        }
    }

    /// The role this error concerns, when it names one.
    pub fn role(&self) -> Option<Role> {
        match self {
            Self::UnknownProvider { role, .. } | Self::MalformedSpec { role, .. } => Some(*role),
            _ => None,
        }
    }
}

/// Aggregate of every configuration problem found in one resolution pass.
#[derive(Debug, Error)]
#[error("{} configuration error(s):\n{}", .errors.len(), render_errors(.errors))]
pub struct ConfigReport {
    errors: Vec<ConfigError>,
}

fn render_errors(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {e}"))
        .collect::<Vec<_>>()
        .join("\n")
}

impl ConfigReport {
    pub fn new(errors: Vec<ConfigError>) -> Self {
        Self { errors }
    }

    pub fn errors(&self) -> &[ConfigError] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Router failure: a handle could not be built for a role.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error(
        "credential for provider '{credential}' does not match binding provider '{binding}' for role {role}"
    )]
    ProviderMismatch {
        role: Role,
        binding: ProviderKind,
        credential: ProviderKind,
    },

    #[error("provider '{provider}' requires an API key but none was resolved")]
    MissingApiKey { provider: ProviderKind },

    #[error("API key for provider '{provider}' is not a valid header value")]
    InvalidApiKey { provider: ProviderKind },
}

/// Broad classification of a dispatch failure, for caller retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad spec, key, or mapping. Fix the configuration; do not retry.
    Configuration,
    /// No handle could be built for the role. Fatal for that role.
    Resolution,
    /// Upstream throttling. Retry after the hinted delay.
    RateLimited,
    /// Network or timeout. Retry with backoff.
    Transient,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Configuration => write!(f, "configuration"),
            ErrorKind::Resolution => write!(f, "resolution"),
            ErrorKind::RateLimited => write!(f, "rate-limited"),
            ErrorKind::Transient => write!(f, "transient"),
        }
    }
}

/// Top-level error returned by `generate` and client construction.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("role {role} has no bound model: set {env} before calling it", role = .0, env = .0.env_key())]
    RoleUnbound(Role),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    ConfigReport(#[from] ConfigReport),

    #[error("resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("rate limited by provider '{provider}'{}", retry_hint(.retry_after_secs))]
    RateLimited {
        provider: ProviderKind,
        retry_after_secs: Option<f64>,
    },

    #[error("authentication rejected by provider '{provider}': check the API key")]
    Auth { provider: ProviderKind },

    #[error("model '{model}' not found on provider '{provider}': check the role mapping")]
    ModelNotFound {
        provider: ProviderKind,
        model: String,
    },

    #[error("provider '{provider}' returned status {status}: {message}")]
    Api {
        provider: ProviderKind,
        status: u16,
        message: String,
    },

    #[error("invalid response from provider '{provider}': {reason}")]
    Parse {
        provider: ProviderKind,
        reason: String,
    },
}

fn retry_hint(retry_after_secs: &Option<f64>) -> String {
    match retry_after_secs {
        Some(secs) => format!(": retry after {secs}s"),
        None => String::new(),
    }
}

impl DispatchError {
    /// Classify this error for caller retry policy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RoleUnbound(_)
            | Self::Config(_)
            | Self::ConfigReport(_)
            | Self::Auth { .. }
            | Self::ModelNotFound { .. } => ErrorKind::Configuration,
            Self::Resolution(_) => ErrorKind::Resolution,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Network(_) | Self::Timeout(_) | Self::Parse { .. } => ErrorKind::Transient,
            // 5xx is the gateway's problem, anything else 4xx is ours
            Self::Api { status, .. } => {
                if *status >= 500 {
                    ErrorKind::Transient
                } else {
                    ErrorKind::Configuration
                }
            }
        }
    }

    /// Whether the caller may reasonably retry this call.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::RateLimited | ErrorKind::Transient)
    }

    /// Provider-supplied retry delay hint in seconds, if any.
    pub fn retry_after(&self) -> Option<f64> {
        match self {
            Self::RateLimited {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }
}

/// Result type alias for modelgate.
pub type Result<T> = std::result::Result<T, DispatchError>;
