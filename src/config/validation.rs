//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (chains reference known, enabled
//!   providers)
//! - Validate value ranges (thresholds, timeouts, addresses)
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Validation is a pure function: PipelineConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system, at startup and
//!   on every reload

use std::collections::HashSet;
use std::net::SocketAddr;

use url::Url;

use crate::config::schema::{PipelineConfig, ResilienceConfig};

/// Adapters each stage knows how to build. The non-builtin ones also
/// need an enabled entry in `providers`.
const RESOLVE_ADAPTERS: &[&str] = &["tikhub-web", "tikhub-app", "direct"];
const TRANSCRIBE_ADAPTERS: &[&str] = &["yunmao", "minimax", "mock"];
const SCRIPT_ADAPTERS: &[&str] = &["tongyi", "minimax", "mock"];

/// Builtins that need no provider entry, per stage.
const RESOLVE_BUILTINS: &[&str] = &["direct"];
const TRANSCRIBE_BUILTINS: &[&str] = &["mock"];
const SCRIPT_BUILTINS: &[&str] = &["mock"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration, collecting every problem.
pub fn validate_config(config: &PipelineConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "server.bind_address",
            format!("'{}' is not a socket address", config.server.bind_address),
        ));
    }
    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!(
                "'{}' is not a socket address",
                config.observability.metrics_address
            ),
        ));
    }

    if config.concurrency.max_concurrency == 0 {
        errors.push(ValidationError::new(
            "concurrency.max_concurrency",
            "must be at least 1",
        ));
    }

    validate_resilience("resilience", &config.resilience, &mut errors);

    let mut names = HashSet::new();
    for provider in &config.providers {
        let field = format!("providers.{}", provider.name);
        if provider.name.is_empty() {
            errors.push(ValidationError::new("providers", "provider name is empty"));
            continue;
        }
        if !names.insert(provider.name.as_str()) {
            errors.push(ValidationError::new(field.clone(), "duplicate provider name"));
        }
        if Url::parse(&provider.base_url).is_err() {
            errors.push(ValidationError::new(
                format!("{field}.base_url"),
                format!("'{}' is not a valid url", provider.base_url),
            ));
        }
        if let Some(resilience) = &provider.resilience {
            validate_resilience(&format!("{field}.resilience"), resilience, &mut errors);
        }
    }

    validate_chain(
        config,
        "chains.resolve",
        &config.chains.resolve,
        RESOLVE_ADAPTERS,
        RESOLVE_BUILTINS,
        &mut errors,
    );
    validate_chain(
        config,
        "chains.transcribe",
        &config.chains.transcribe,
        TRANSCRIBE_ADAPTERS,
        TRANSCRIBE_BUILTINS,
        &mut errors,
    );
    validate_chain(
        config,
        "chains.script",
        &config.chains.script,
        SCRIPT_ADAPTERS,
        SCRIPT_BUILTINS,
        &mut errors,
    );

    if !config.callbacks.public_base_url.is_empty() {
        match Url::parse(&config.callbacks.public_base_url) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
            _ => errors.push(ValidationError::new(
                "callbacks.public_base_url",
                format!(
                    "'{}' is not an http(s) url",
                    config.callbacks.public_base_url
                ),
            )),
        }
    }

    if config.security.max_url_length == 0 {
        errors.push(ValidationError::new(
            "security.max_url_length",
            "must be at least 1",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_resilience(prefix: &str, resilience: &ResilienceConfig, errors: &mut Vec<ValidationError>) {
    if !(resilience.error_rate_threshold > 0.0 && resilience.error_rate_threshold <= 1.0) {
        errors.push(ValidationError::new(
            format!("{prefix}.error_rate_threshold"),
            "must be within (0, 1]",
        ));
    }
    for (field, value) in [
        ("min_request_volume", resilience.min_request_volume as u64),
        ("max_failures", resilience.max_failures as u64),
        ("request_timeout_ms", resilience.request_timeout_ms),
        ("reset_timeout_ms", resilience.reset_timeout_ms),
        ("window_secs", resilience.window_secs),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(
                format!("{prefix}.{field}"),
                "must be at least 1",
            ));
        }
    }
}

fn validate_chain(
    config: &PipelineConfig,
    field: &str,
    entries: &[String],
    supported: &[&str],
    builtins: &[&str],
    errors: &mut Vec<ValidationError>,
) {
    if entries.is_empty() {
        errors.push(ValidationError::new(field, "chain is empty"));
        return;
    }
    for entry in entries {
        if !supported.contains(&entry.as_str()) {
            errors.push(ValidationError::new(
                field,
                format!("no adapter for '{entry}' in this stage"),
            ));
            continue;
        }
        if builtins.contains(&entry.as_str()) {
            continue;
        }
        match config.provider(entry) {
            Some(provider) if provider.enabled => {}
            Some(_) => errors.push(ValidationError::new(
                field,
                format!("provider '{entry}' is disabled"),
            )),
            None => errors.push(ValidationError::new(
                field,
                format!("unknown provider '{entry}'"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&PipelineConfig::default()).is_ok());
    }

    #[test]
    fn threshold_must_stay_in_range() {
        let mut config = PipelineConfig::default();
        config.resilience.error_rate_threshold = 1.5;
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "resilience.error_rate_threshold"));

        config.resilience.error_rate_threshold = 0.0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn chains_must_reference_known_enabled_providers() {
        let mut config = PipelineConfig::default();
        config.chains.transcribe = vec!["whisper".to_string()];
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.message.contains("no adapter for 'whisper'")));

        let mut config = PipelineConfig::default();
        config.providers.iter_mut().find(|p| p.name == "yunmao").unwrap().enabled = false;
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.message.contains("'yunmao' is disabled")));

        let mut config = PipelineConfig::default();
        config.providers.retain(|p| p.name != "minimax");
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.message.contains("unknown provider 'minimax'")));
    }

    #[test]
    fn builtins_are_stage_specific() {
        let mut config = PipelineConfig::default();
        config.chains.resolve = vec!["mock".to_string()];
        assert!(validate_config(&config).is_err());

        let mut config = PipelineConfig::default();
        config.chains.script = vec!["mock".to_string()];
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn every_problem_is_collected() {
        let mut config = PipelineConfig::default();
        config.server.bind_address = "not-an-address".to_string();
        config.concurrency.max_concurrency = 0;
        config.chains.resolve.clear();
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.len() >= 3);
    }

    #[test]
    fn public_base_url_must_be_http() {
        let mut config = PipelineConfig::default();
        config.callbacks.public_base_url = "ftp://callback.example.com".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "callbacks.public_base_url"));

        config.callbacks.public_base_url = "https://pipeline.example.com".to_string();
        assert!(validate_config(&config).is_ok());
    }
}
