//! Credential and configuration resolution.
//!
//! The resolver turns environment-style key/value pairs into validated
//! role bindings, provider credentials, and rate budgets:
//! - `FAST_LLM` / `SMART_LLM` / `STRATEGIC_LLM` bind a role to a
//!   `provider:vendor/model` spec; unset roles stay unbound
//! - `<PROVIDER>_API_KEY` supplies the credential for a provider
//! - `<PROVIDER>_BASE_URL` overrides the provider's default endpoint
//! - `<PROVIDER>_LIMIT_RPS` / `<PROVIDER>_LIMIT_BURST` set the rate budget
//!
//! Errors are collected, not fail-fast: one pass reports every problem so
//! an operator can fix the whole configuration at once. Resolution is
//! pure; the same map always yields an equivalent config.

use crate::models::{ConfigError, ConfigReport};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

/// Abstract model tier, decoupled from any concrete vendor model.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Cheap, quick model for high-volume calls.
    Fast,
    /// Capable general-purpose model.
    Smart,
    /// Reasoning model for planning steps.
    Strategic,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Fast, Role::Smart, Role::Strategic];

    /// Environment key holding this role's model spec.
    pub fn env_key(&self) -> &'static str {
        match self {
            Role::Fast => "FAST_LLM",
            Role::Smart => "SMART_LLM",
            Role::Strategic => "STRATEGIC_LLM",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Fast => write!(f, "fast"),
            Role::Smart => write!(f, "smart"),
            Role::Strategic => write!(f, "strategic"),
        }
    }
}

/// Supported upstream providers.
///
/// A closed set: every provider the dispatch layer can talk to is a
/// variant here, with its auth and endpoint conventions attached. An id
/// outside this set is rejected at resolution time, not at call time.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Multi-vendor aggregation gateway.
    OpenRouter,
    /// Direct OpenAI API.
    OpenAi,
    /// Direct Anthropic API (OpenAI-compatible endpoint).
    Anthropic,
    /// Local Ollama server; no credential needed.
    Ollama,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::OpenRouter,
        ProviderKind::OpenAi,
        ProviderKind::Anthropic,
        ProviderKind::Ollama,
    ];

    /// Canonical id used in role specs and env key prefixes.
    pub fn id(&self) -> &'static str {
        match self {
            ProviderKind::OpenRouter => "openrouter",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Ollama => "ollama",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.id() == id)
    }

    /// Provider used for legacy specs with no gateway prefix.
    pub fn default_direct() -> Self {
        ProviderKind::OpenAi
    }

    pub fn api_key_env(&self) -> &'static str {
        match self {
            ProviderKind::OpenRouter => "OPENROUTER_API_KEY",
            ProviderKind::OpenAi => "OPENAI_API_KEY",
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
            ProviderKind::Ollama => "OLLAMA_API_KEY",
        }
    }

    pub fn base_url_env(&self) -> &'static str {
        match self {
            ProviderKind::OpenRouter => "OPENROUTER_BASE_URL",
            ProviderKind::OpenAi => "OPENAI_BASE_URL",
            ProviderKind::Anthropic => "ANTHROPIC_BASE_URL",
            ProviderKind::Ollama => "OLLAMA_BASE_URL",
        }
    }

    pub fn rps_env(&self) -> &'static str {
        match self {
            ProviderKind::OpenRouter => "OPENROUTER_LIMIT_RPS",
            ProviderKind::OpenAi => "OPENAI_LIMIT_RPS",
            ProviderKind::Anthropic => "ANTHROPIC_LIMIT_RPS",
            ProviderKind::Ollama => "OLLAMA_LIMIT_RPS",
        }
    }

    pub fn burst_env(&self) -> &'static str {
        match self {
            ProviderKind::OpenRouter => "OPENROUTER_LIMIT_BURST",
            ProviderKind::OpenAi => "OPENAI_LIMIT_BURST",
            ProviderKind::Anthropic => "ANTHROPIC_LIMIT_BURST",
            ProviderKind::Ollama => "OLLAMA_LIMIT_BURST",
        }
    }

    /// Default base URL for the provider's OpenAI-compatible API.
    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::OpenRouter => "https://openrouter.ai/api/v1",
            ProviderKind::OpenAi => "https://api.openai.com/v1",
            ProviderKind::Anthropic => "https://api.anthropic.com/v1",
            ProviderKind::Ollama => "http://localhost:11434/v1",
        }
    }

    /// Documented key prefix, used only for advisory warnings.
    pub fn key_prefix(&self) -> Option<&'static str> {
        match self {
            ProviderKind::OpenRouter => Some("sk-or-"),
            ProviderKind::OpenAi => Some("sk-"),
            ProviderKind::Anthropic => Some("sk-ant-"),
            ProviderKind::Ollama => None,
        }
    }

    /// Whether calls to this provider need a credential at all.
    pub fn requires_api_key(&self) -> bool {
        !matches!(self, ProviderKind::Ollama)
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// A role bound to a concrete provider and model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleBinding {
    pub role: Role,
    pub provider: ProviderKind,
    /// Full `vendor/model[:qualifier]` string, passed upstream verbatim.
    pub vendor_model: String,
    /// The configured spec as written, kept for error reporting.
    pub raw_spec: String,
}

impl RoleBinding {
    /// Parse a `provider:vendor/model` spec.
    ///
    /// The spec splits on the first colon only, so trailing qualifiers
    /// (`:free` and the like) stay part of the model identifier. A spec
    /// with no colon is a legacy direct-vendor spec and resolves to the
    /// default direct provider; model existence is an upstream concern
    /// and is never checked here.
    pub fn parse(role: Role, raw: &str) -> Result<Self, ConfigError> {
        let raw = raw.trim();

        let (provider, vendor_model) = match raw.split_once(':') {
            Some((prefix, rest)) => match ProviderKind::from_id(prefix) {
                Some(provider) => (provider, rest),
                None => {
                    return Err(ConfigError::UnknownProvider {
                        role,
                        provider_id: prefix.to_string(),
                        role_env: role.env_key(),
                        raw: raw.to_string(),
                    });
                }
            },
            None => (ProviderKind::default_direct(), raw),
        };

        if vendor_model.is_empty() {
            return Err(ConfigError::MalformedSpec {
                role,
                role_env: role.env_key(),
                raw: raw.to_string(),
                reason: "empty model identifier".to_string(),
            });
        }

        Ok(Self {
            role,
            provider,
            vendor_model: vendor_model.to_string(),
            raw_spec: raw.to_string(),
        })
    }
}

/// Credential and endpoint for one provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCredential {
    pub provider: ProviderKind,
    /// None only for providers that do not require a key.
    pub api_key: Option<String>,
    pub base_url: String,
}

/// Request-rate budget for one provider. Immutable after resolution;
/// changing it means rebuilding the dispatch client.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateBudget {
    /// Continuous refill rate, tokens per second. Always > 0.
    pub requests_per_second: f64,
    /// Bucket capacity. Always >= 1.
    pub burst: u32,
}

impl Default for RateBudget {
    fn default() -> Self {
        Self {
            requests_per_second: 1.0,
            burst: 1,
        }
    }
}

/// A fully validated configuration: every bound role with its credential
/// and rate budget.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    bindings: BTreeMap<Role, RoleBinding>,
    credentials: BTreeMap<ProviderKind, ProviderCredential>,
    budgets: BTreeMap<ProviderKind, RateBudget>,
}

impl ResolvedConfig {
    /// Resolve from an environment-style key/value map.
    ///
    /// Returns the validated config, or a report listing every problem
    /// found. Unset roles are simply unbound; callers decide whether a
    /// missing role is an error.
    pub fn from_map(map: &BTreeMap<String, String>) -> Result<Self, ConfigReport> {
        let mut errors = Vec::new();
        let mut bindings = BTreeMap::new();

        for role in Role::ALL {
            let Some(raw) = get_set(map, role.env_key()) else {
                continue;
            };
            match RoleBinding::parse(role, raw) {
                Ok(binding) => {
                    bindings.insert(role, binding);
                }
                Err(e) => errors.push(e),
            }
        }

        let referenced: BTreeSet<ProviderKind> =
            bindings.values().map(|b| b.provider).collect();

        let mut credentials = BTreeMap::new();
        let mut budgets = BTreeMap::new();

        for provider in referenced {
            let api_key = get_set(map, provider.api_key_env()).map(str::to_string);

            if api_key.is_none() && provider.requires_api_key() {
                errors.push(ConfigError::MissingApiKey {
                    provider,
                    env_var: provider.api_key_env(),
                });
            } else {
                // Advisory only: some keys legitimately deviate
                if let (Some(key), Some(prefix)) = (&api_key, provider.key_prefix()) {
                    if !key.starts_with(prefix) {
                        warn!(
                            provider = %provider,
                            expected_prefix = prefix,
                            "API key does not match the provider's usual prefix"
                        );
                    }
                }

                let base_url = get_set(map, provider.base_url_env())
                    .map(|u| u.trim_end_matches('/').to_string())
                    .unwrap_or_else(|| provider.default_base_url().to_string());

                credentials.insert(
                    provider,
                    ProviderCredential {
                        provider,
                        api_key,
                        base_url,
                    },
                );
            }

            match resolve_budget(map, provider) {
                Ok(budget) => {
                    budgets.insert(provider, budget);
                }
                Err(e) => errors.push(e),
            }
        }

        if errors.is_empty() {
            Ok(Self {
                bindings,
                credentials,
                budgets,
            })
        } else {
            Err(ConfigReport::new(errors))
        }
    }

    /// Resolve from the process environment.
    pub fn from_env() -> Result<Self, ConfigReport> {
        let map: BTreeMap<String, String> = std::env::vars().collect();
        Self::from_map(&map)
    }

    pub fn binding(&self, role: Role) -> Option<&RoleBinding> {
        self.bindings.get(&role)
    }

    pub fn bindings(&self) -> impl Iterator<Item = &RoleBinding> {
        self.bindings.values()
    }

    pub fn bound_roles(&self) -> Vec<Role> {
        self.bindings.keys().copied().collect()
    }

    pub fn credential(&self, provider: ProviderKind) -> Option<&ProviderCredential> {
        self.credentials.get(&provider)
    }

    /// Budget for a provider; defaults apply for providers never named in
    /// a rate key.
    pub fn budget(&self, provider: ProviderKind) -> RateBudget {
        self.budgets.get(&provider).copied().unwrap_or_default()
    }

    /// Providers referenced by at least one bound role.
    pub fn referenced_providers(&self) -> Vec<ProviderKind> {
        self.bindings
            .values()
            .map(|b| b.provider)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Look up a key, treating blank values as unset.
fn get_set<'a>(map: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
    map.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
}

fn resolve_budget(
    map: &BTreeMap<String, String>,
    provider: ProviderKind,
) -> Result<RateBudget, ConfigError> {
    let requests_per_second = match get_set(map, provider.rps_env()) {
        None => 1.0,
        Some(value) => match value.parse::<f64>() {
            Ok(rps) if rps > 0.0 && rps.is_finite() => rps,
            _ => {
                return Err(ConfigError::InvalidRateLimit {
                    provider,
                    env_var: provider.rps_env(),
                    value: value.to_string(),
                });
            }
        },
    };

    let burst = match get_set(map, provider.burst_env()) {
        None => 1,
        Some(value) => match value.parse::<u32>() {
            Ok(burst) if burst >= 1 => burst,
            _ => {
                return Err(ConfigError::InvalidBurst {
                    provider,
                    env_var: provider.burst_env(),
                    value: value.to_string(),
                });
            }
        },
    };

    Ok(RateBudget {
        requests_per_second,
        burst,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn spec_parses_provider_and_preserves_model_verbatim() {
        let binding = RoleBinding::parse(
            Role::Fast,
            "openrouter:anthropic/claude-3-haiku-20240307",
        )
        .unwrap();
        assert_eq!(binding.provider, ProviderKind::OpenRouter);
        assert_eq!(binding.vendor_model, "anthropic/claude-3-haiku-20240307");
    }

    #[test]
    fn trailing_qualifier_stays_part_of_the_model() {
        let binding = RoleBinding::parse(
            Role::Smart,
            "openrouter:meta-llama/llama-3-8b-instruct:free",
        )
        .unwrap();
        assert_eq!(binding.vendor_model, "meta-llama/llama-3-8b-instruct:free");
    }

    #[test]
    fn legacy_vendor_spec_resolves_to_that_vendor() {
        let binding = RoleBinding::parse(Role::Fast, "openai:gpt-4o-mini").unwrap();
        assert_eq!(binding.provider, ProviderKind::OpenAi);
        assert_eq!(binding.vendor_model, "gpt-4o-mini");
    }

    #[test]
    fn bare_spec_resolves_to_the_default_direct_provider() {
        let binding = RoleBinding::parse(Role::Fast, "gpt-4o-mini").unwrap();
        assert_eq!(binding.provider, ProviderKind::default_direct());
        assert_eq!(binding.vendor_model, "gpt-4o-mini");
    }

    #[test]
    fn unknown_provider_fails_at_resolution_time() {
        let err = RoleBinding::parse(Role::Strategic, "nonesuch:some/model").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownProvider { .. }));
    }

    #[test]
    fn empty_model_part_is_malformed() {
        let err = RoleBinding::parse(Role::Fast, "openrouter:").unwrap_err();
        assert!(matches!(err, ConfigError::MalformedSpec { .. }));
    }

    #[test]
    fn unset_roles_stay_unbound() {
        let config = ResolvedConfig::from_map(&env(&[
            ("FAST_LLM", "openrouter:anthropic/claude-3-haiku-20240307"),
            ("OPENROUTER_API_KEY", "sk-or-test"),
        ]))
        .unwrap();

        assert!(config.binding(Role::Fast).is_some());
        assert!(config.binding(Role::Smart).is_none());
        assert!(config.binding(Role::Strategic).is_none());
        assert_eq!(config.referenced_providers(), vec![ProviderKind::OpenRouter]);
    }

    #[test]
    fn missing_key_reports_exactly_one_error_naming_the_provider() {
        let report = ResolvedConfig::from_map(&env(&[(
            "FAST_LLM",
            "openrouter:anthropic/claude-3-haiku-20240307",
        )]))
        .unwrap_err();

        assert_eq!(report.len(), 1);
        let err = &report.errors()[0];
        assert!(matches!(err, ConfigError::MissingApiKey { .. }));
        assert_eq!(err.provider(), Some(ProviderKind::OpenRouter));
        assert!(err.to_string().contains("OPENROUTER_API_KEY"));
    }

    #[test]
    fn one_missing_key_even_with_two_roles_on_the_provider() {
        let report = ResolvedConfig::from_map(&env(&[
            ("FAST_LLM", "openrouter:anthropic/claude-3.5-haiku"),
            ("SMART_LLM", "openrouter:anthropic/claude-sonnet-4"),
        ]))
        .unwrap_err();

        assert_eq!(report.len(), 1);
    }

    #[test]
    fn ollama_needs_no_key() {
        let config = ResolvedConfig::from_map(&env(&[
            ("FAST_LLM", "ollama:llama3"),
            ("OLLAMA_BASE_URL", "http://localhost:11434/v1"),
        ]))
        .unwrap();

        let cred = config.credential(ProviderKind::Ollama).unwrap();
        assert!(cred.api_key.is_none());
        assert_eq!(cred.base_url, "http://localhost:11434/v1");
    }

    #[test]
    fn rate_limit_defaults_and_parses() {
        let config = ResolvedConfig::from_map(&env(&[
            ("FAST_LLM", "openrouter:anthropic/claude-3.5-haiku"),
            ("OPENROUTER_API_KEY", "sk-or-test"),
            ("OPENROUTER_LIMIT_RPS", "2.0"),
            ("OPENROUTER_LIMIT_BURST", "4"),
        ]))
        .unwrap();

        let budget = config.budget(ProviderKind::OpenRouter);
        assert_eq!(budget.requests_per_second, 2.0);
        assert_eq!(budget.burst, 4);

        // Absent keys fall back to the defaults
        assert_eq!(config.budget(ProviderKind::OpenAi), RateBudget::default());
    }

    #[test]
    fn non_positive_or_unparsable_rate_is_an_error_not_a_clamp() {
        for bad in ["0", "-1.5", "fast"] {
            let report = ResolvedConfig::from_map(&env(&[
                ("FAST_LLM", "openrouter:anthropic/claude-3.5-haiku"),
                ("OPENROUTER_API_KEY", "sk-or-test"),
                ("OPENROUTER_LIMIT_RPS", bad),
            ]))
            .unwrap_err();

            assert_eq!(report.len(), 1);
            assert!(matches!(
                report.errors()[0],
                ConfigError::InvalidRateLimit { .. }
            ));
        }
    }

    #[test]
    fn all_problems_surface_in_a_single_report() {
        let report = ResolvedConfig::from_map(&env(&[
            ("FAST_LLM", "nonesuch:some/model"),
            ("SMART_LLM", "openrouter:anthropic/claude-sonnet-4"),
            ("OPENROUTER_LIMIT_RPS", "zero"),
        ]))
        .unwrap_err();

        // Unknown provider, missing openrouter key, bad rate limit
        assert_eq!(report.len(), 3);
    }

    #[test]
    fn resolution_is_idempotent() {
        let map = env(&[
            ("FAST_LLM", "openrouter:anthropic/claude-3.5-haiku"),
            ("SMART_LLM", "anthropic:claude-sonnet-4-20250514"),
            ("OPENROUTER_API_KEY", "sk-or-test"),
            ("ANTHROPIC_API_KEY", "sk-ant-test"),
            ("OPENROUTER_LIMIT_RPS", "2.0"),
        ]);

        let first = ResolvedConfig::from_map(&map).unwrap();
        let second = ResolvedConfig::from_map(&map).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn base_url_override_strips_trailing_slash() {
        let config = ResolvedConfig::from_map(&env(&[
            ("FAST_LLM", "openrouter:anthropic/claude-3.5-haiku"),
            ("OPENROUTER_API_KEY", "sk-or-test"),
            ("OPENROUTER_BASE_URL", "https://gateway.example.com/v1/"),
        ]))
        .unwrap();

        assert_eq!(
            config.credential(ProviderKind::OpenRouter).unwrap().base_url,
            "https://gateway.example.com/v1"
        );
    }
}
