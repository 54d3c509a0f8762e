//! Provider router: turns a role binding plus credential into a callable
//! dispatch handle.
//!
//! The router is pure and stateless. It performs no network I/O and never
//! checks whether the model string actually exists upstream; that is the
//! gateway's concern and surfaces at call time. Identical inputs always
//! produce an equivalent handle.

use crate::client::TokenBucket;
use crate::models::{ProviderCredential, ProviderKind, ResolutionError, Role, RoleBinding};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use std::sync::Arc;

/// Opaque binding of role + credential + provider, ready to issue calls
/// without re-resolving configuration.
///
/// Owns its binding and credential; shares the provider's rate limiter
/// with every other handle for that provider. Stateless between calls.
pub struct DispatchHandle {
    binding: RoleBinding,
    credential: ProviderCredential,
    limiter: Arc<TokenBucket>,
    headers: HeaderMap,
}

impl DispatchHandle {
    pub fn role(&self) -> Role {
        self.binding.role
    }

    pub fn provider(&self) -> ProviderKind {
        self.binding.provider
    }

    /// Full model identifier, passed upstream verbatim.
    pub fn vendor_model(&self) -> &str {
        &self.binding.vendor_model
    }

    pub fn base_url(&self) -> &str {
        &self.credential.base_url
    }

    pub fn binding(&self) -> &RoleBinding {
        &self.binding
    }

    pub fn limiter(&self) -> &Arc<TokenBucket> {
        &self.limiter
    }

    /// Request headers for this handle, auth included.
    pub fn headers(&self) -> HeaderMap {
        self.headers.clone()
    }
}

impl std::fmt::Debug for DispatchHandle {
    // Credential stays out of Debug output
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchHandle")
            .field("role", &self.binding.role)
            .field("provider", &self.binding.provider)
            .field("vendor_model", &self.binding.vendor_model)
            .finish()
    }
}

/// Build a dispatch handle for a role.
///
/// Fails when the credential belongs to a different provider than the
/// binding, when a required API key is absent, or when the key cannot be
/// carried in an Authorization header.
pub fn route(
    binding: RoleBinding,
    credential: ProviderCredential,
    limiter: Arc<TokenBucket>,
) -> Result<DispatchHandle, ResolutionError> {
    if binding.provider != credential.provider {
        return Err(ResolutionError::ProviderMismatch {
            role: binding.role,
            binding: binding.provider,
            credential: credential.provider,
        });
    }

    if credential.api_key.is_none() && binding.provider.requires_api_key() {
        return Err(ResolutionError::MissingApiKey {
            provider: binding.provider,
        });
    }

    let headers = build_headers(binding.provider, credential.api_key.as_deref())?;

    Ok(DispatchHandle {
        binding,
        credential,
        limiter,
        headers,
    })
}

fn build_headers(
    provider: ProviderKind,
    api_key: Option<&str>,
) -> Result<HeaderMap, ResolutionError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    if let Some(key) = api_key {
        let mut value = HeaderValue::from_str(&format!("Bearer {key}"))
            .map_err(|_| ResolutionError::InvalidApiKey { provider })?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }

    // OpenRouter attribution headers, harmless elsewhere but only sent there
    if provider == ProviderKind::OpenRouter {
        headers.insert(
            "HTTP-Referer",
            HeaderValue::from_static("https://github.com/modelgate/modelgate"),
        );
        headers.insert("X-Title", HeaderValue::from_static("modelgate"));
    }

    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RateBudget;

    fn binding(role: Role, spec: &str) -> RoleBinding {
        RoleBinding::parse(role, spec).unwrap()
    }

    fn credential(provider: ProviderKind, key: Option<&str>) -> ProviderCredential {
        ProviderCredential {
            provider,
            api_key: key.map(str::to_string),
            base_url: provider.default_base_url().to_string(),
        }
    }

    fn limiter() -> Arc<TokenBucket> {
        Arc::new(TokenBucket::new(RateBudget::default()))
    }

    #[test]
    fn routes_a_valid_binding() {
        let handle = route(
            binding(Role::Fast, "openrouter:anthropic/claude-3-haiku-20240307"),
            credential(ProviderKind::OpenRouter, Some("sk-or-test")),
            limiter(),
        )
        .unwrap();

        assert_eq!(handle.role(), Role::Fast);
        assert_eq!(handle.provider(), ProviderKind::OpenRouter);
        assert_eq!(handle.vendor_model(), "anthropic/claude-3-haiku-20240307");
        assert_eq!(handle.base_url(), "https://openrouter.ai/api/v1");
        assert!(handle.headers().contains_key(AUTHORIZATION));
        assert!(handle.headers().contains_key("HTTP-Referer"));
    }

    #[test]
    fn identical_inputs_produce_equivalent_handles() {
        let make = || {
            route(
                binding(Role::Smart, "openrouter:anthropic/claude-sonnet-4"),
                credential(ProviderKind::OpenRouter, Some("sk-or-test")),
                limiter(),
            )
            .unwrap()
        };

        let (a, b) = (make(), make());
        assert_eq!(a.binding(), b.binding());
        assert_eq!(a.base_url(), b.base_url());
        assert_eq!(a.headers(), b.headers());
    }

    #[test]
    fn provider_mismatch_is_rejected() {
        let err = route(
            binding(Role::Fast, "openrouter:anthropic/claude-3.5-haiku"),
            credential(ProviderKind::OpenAi, Some("sk-test")),
            limiter(),
        )
        .unwrap_err();

        assert!(matches!(err, ResolutionError::ProviderMismatch { .. }));
    }

    #[test]
    fn required_key_must_be_present() {
        let err = route(
            binding(Role::Fast, "openai:gpt-4o-mini"),
            credential(ProviderKind::OpenAi, None),
            limiter(),
        )
        .unwrap_err();

        assert!(matches!(err, ResolutionError::MissingApiKey { .. }));
    }

    #[test]
    fn ollama_routes_without_auth() {
        let handle = route(
            binding(Role::Fast, "ollama:llama3"),
            credential(ProviderKind::Ollama, None),
            limiter(),
        )
        .unwrap();

        assert!(!handle.headers().contains_key(AUTHORIZATION));
        assert!(!handle.headers().contains_key("HTTP-Referer"));
    }

    #[test]
    fn unprintable_key_is_rejected_not_panicked_on() {
        let err = route(
            binding(Role::Fast, "openai:gpt-4o-mini"),
            credential(ProviderKind::OpenAi, Some("sk-bad\nkey")),
            limiter(),
        )
        .unwrap_err();

        assert!(matches!(err, ResolutionError::InvalidApiKey { .. }));
    }
}
