//! Setup verification harness.
//!
//! Exercises the whole dispatch path in three stages, never aborting
//! early:
//! 1. credentials: key presence per referenced provider
//! 2. resolution: config resolver plus router for every configured role
//! 3. live-call: one trivial generate per resolved role
//!
//! Every stage records a structured outcome per subject; a failure for
//! one role never prevents testing the others. Roles whose provider
//! failed the credential stage are skipped in the live stage, not run.

use crate::client::{CallOptions, DispatchClient};
use crate::models::{ProviderKind, ResolvedConfig, Role, RoleBinding};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::{info, warn};

const PROBE_PROMPT: &str = "Reply with the single word: ready.";

/// Harness stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Credentials,
    Resolution,
    LiveCall,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Credentials => write!(f, "credentials"),
            Stage::Resolution => write!(f, "resolution"),
            Stage::LiveCall => write!(f, "live-call"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    Pass,
    Fail,
    Skipped,
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageStatus::Pass => write!(f, "PASS"),
            StageStatus::Fail => write!(f, "FAIL"),
            StageStatus::Skipped => write!(f, "SKIP"),
        }
    }
}

/// One check within a stage.
#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub stage: Stage,
    /// Provider or role the check applies to.
    pub subject: String,
    pub status: StageStatus,
    pub detail: Option<String>,
}

/// Structured pass/fail report across all stages.
#[derive(Debug, Default)]
pub struct SelfTestReport {
    outcomes: Vec<StageOutcome>,
}

impl SelfTestReport {
    pub fn outcomes(&self) -> &[StageOutcome] {
        &self.outcomes
    }

    pub fn stage_outcomes(&self, stage: Stage) -> impl Iterator<Item = &StageOutcome> {
        self.outcomes.iter().filter(move |o| o.stage == stage)
    }

    /// True when nothing failed. Skipped checks do not fail the run on
    /// their own, but a skip always follows some recorded failure.
    pub fn passed(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| o.status != StageStatus::Fail)
    }

    fn record(
        &mut self,
        stage: Stage,
        subject: impl Into<String>,
        status: StageStatus,
        detail: Option<String>,
    ) {
        self.outcomes.push(StageOutcome {
            stage,
            subject: subject.into(),
            status,
            detail,
        });
    }
}

/// Run all stages against an environment-style map.
pub async fn run(map: &BTreeMap<String, String>) -> SelfTestReport {
    let mut report = SelfTestReport::default();

    // Parse role specs individually first, so the credential stage can
    // name providers even when other parts of the config are broken.
    let mut parsed: BTreeMap<Role, Option<RoleBinding>> = BTreeMap::new();
    for role in Role::ALL {
        let Some(raw) = map.get(role.env_key()).map(|v| v.trim()).filter(|v| !v.is_empty())
        else {
            continue;
        };
        parsed.insert(role, RoleBinding::parse(role, raw).ok());
    }

    if parsed.is_empty() {
        report.record(
            Stage::Resolution,
            "roles",
            StageStatus::Fail,
            Some("no roles configured: set FAST_LLM, SMART_LLM, or STRATEGIC_LLM".to_string()),
        );
        return report;
    }

    let referenced: BTreeSet<ProviderKind> = parsed
        .values()
        .filter_map(|b| b.as_ref().map(|b| b.provider))
        .collect();

    // Stage 1: credential presence per provider
    let mut failed_providers = BTreeSet::new();
    for provider in &referenced {
        let key = map
            .get(provider.api_key_env())
            .map(|v| v.trim())
            .filter(|v| !v.is_empty());

        match key {
            Some(key) => {
                let detail = match provider.key_prefix() {
                    Some(prefix) if !key.starts_with(prefix) => {
                        Some(format!("key does not start with '{prefix}' (advisory)"))
                    }
                    _ => None,
                };
                report.record(Stage::Credentials, provider.id(), StageStatus::Pass, detail);
            }
            None if !provider.requires_api_key() => {
                report.record(
                    Stage::Credentials,
                    provider.id(),
                    StageStatus::Pass,
                    Some("no credential required".to_string()),
                );
            }
            None => {
                failed_providers.insert(*provider);
                report.record(
                    Stage::Credentials,
                    provider.id(),
                    StageStatus::Fail,
                    Some(format!("{} is not set", provider.api_key_env())),
                );
            }
        }
    }

    // Stage 2: full resolution plus routing
    let client = match ResolvedConfig::from_map(map) {
        Ok(config) => match DispatchClient::new(&config) {
            Ok(client) => {
                for binding in config.bindings() {
                    report.record(
                        Stage::Resolution,
                        binding.role.to_string(),
                        StageStatus::Pass,
                        Some(format!("{}:{}", binding.provider, binding.vendor_model)),
                    );
                }
                Some(client)
            }
            Err(e) => {
                report.record(
                    Stage::Resolution,
                    "router",
                    StageStatus::Fail,
                    Some(e.to_string()),
                );
                None
            }
        },
        Err(config_report) => {
            for error in config_report.errors() {
                let subject = error
                    .role()
                    .map(|r| r.to_string())
                    .or_else(|| error.provider().map(|p| p.id().to_string()))
                    .unwrap_or_else(|| "config".to_string());
                report.record(
                    Stage::Resolution,
                    subject,
                    StageStatus::Fail,
                    Some(error.to_string()),
                );
            }
            None
        }
    };

    // Stage 3: one live call per resolved role
    let options = CallOptions {
        max_tokens: 16,
        temperature: 0.0,
        timeout: Duration::from_secs(30),
    };

    for (role, binding) in &parsed {
        let subject = role.to_string();

        let Some(binding) = binding else {
            report.record(
                Stage::LiveCall,
                subject,
                StageStatus::Skipped,
                Some("spec did not parse".to_string()),
            );
            continue;
        };

        if failed_providers.contains(&binding.provider) {
            report.record(
                Stage::LiveCall,
                subject,
                StageStatus::Skipped,
                Some(format!("credential check failed for {}", binding.provider)),
            );
            continue;
        }

        let Some(client) = &client else {
            report.record(
                Stage::LiveCall,
                subject,
                StageStatus::Skipped,
                Some("resolution failed".to_string()),
            );
            continue;
        };

        match client.generate(*role, PROBE_PROMPT, &options).await {
            Ok(result) => {
                info!(role = %role, latency_ms = result.latency_ms, "live call ok");
                report.record(
                    Stage::LiveCall,
                    subject,
                    StageStatus::Pass,
                    Some(format!("{} ({} ms)", result.model, result.latency_ms)),
                );
            }
            Err(e) => {
                warn!(role = %role, error = %e, "live call failed");
                report.record(
                    Stage::LiveCall,
                    subject,
                    StageStatus::Fail,
                    Some(e.to_string()),
                );
            }
        }
    }

    report
}

/// Run against the process environment.
pub async fn run_from_env() -> SelfTestReport {
    let map: BTreeMap<String, String> = std::env::vars().collect();
    run(&map).await
}
