//! modelgate - provider-routed, rate-limited LLM dispatch.
//!
//! Routes abstract model roles (fast / smart / strategic) to concrete
//! `provider:vendor/model` identifiers, enforces a per-provider
//! request-rate budget across concurrent callers, and translates
//! provider failures into a common error taxonomy.
//!
//! ## Architecture
//!
//! - **models**: role/provider types, the config resolver, and the error
//!   taxonomy. Resolution collects every problem into one report.
//! - **client**: the provider router, the shared token-bucket limiter,
//!   and the [`DispatchClient`] consumers hold. One `generate` surface
//!   regardless of provider; no internal retries, callers own the policy.
//! - **selftest**: staged setup verification (credentials, resolution,
//!   one live call per role).
//!
//! ## Usage
//!
//! ```ignore
//! use modelgate::{CallOptions, DispatchClient, ResolvedConfig, Role};
//!
//! let config = ResolvedConfig::from_env()?;
//! let client = DispatchClient::new(&config)?;
//! let result = client
//!     .generate(Role::Fast, "Summarize this paragraph.", &CallOptions::default())
//!     .await?;
//! println!("{}", result.content);
//! ```

pub mod client;
pub mod models;
pub mod selftest;

// Re-exports for convenience
pub use client::{CallOptions, CallResult, DispatchClient, DispatchHandle, Message, TokenBucket};
pub use models::{
    ConfigError, ConfigReport, DispatchError, ErrorKind, ProviderKind, RateBudget,
    ResolvedConfig, Result, Role, RoleBinding,
};
pub use selftest::{SelfTestReport, Stage, StageStatus};
