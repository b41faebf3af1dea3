//! Resolves a logical model string from an incoming request into a concrete
//! upstream target. A pure transformation over strings and configuration:
//! no I/O, no network calls.

use config::{Config, PreferredProvider};
use secrecy::SecretString;

const CFP_MARKERS: [&str; 3] = ["-textonly", "-cfp", "-text"];
const PROVIDER_PREFIXES: [&str; 3] = ["openai/", "anthropic/", "gemini/"];

/// Resolved `(base_url, api_key)` pair for a single upstream channel.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Channel name (`"default"` or a `CHANNEL_<NAME>_*` name, lowercased).
    pub name: String,
    /// Base URL to send requests to, if configured.
    pub base_url: Option<String>,
    /// API key to authenticate with, if configured.
    pub api_key: Option<SecretString>,
}

/// The outcome of routing a single request's `model` field.
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    /// Model id to send upstream, with any provider prefix applied and CFP
    /// markers stripped.
    pub upstream_model: String,
    /// Resolved channel and credentials.
    pub provider_config: ProviderConfig,
    /// Whether this request should run through CFP emulation.
    pub cfp_enabled: bool,
    /// The model string exactly as given by the caller.
    pub original_model: String,
}

/// Resolves `model` against `config`, per the resolution order: channel
/// split, CFP flag detection and stripping, alias mapping, provider-prefix
/// application, and provider-config lookup.
pub fn route(model: &str, config: &Config) -> RoutingDecision {
    let original_model = model.to_string();

    let (logical, channel_key) = match model.split_once(':') {
        Some((logical, channel)) => (logical, channel.to_ascii_lowercase()),
        None => (model, "default".to_string()),
    };

    let cfp_enabled = CFP_MARKERS.iter().any(|marker| logical.contains(marker));
    let stripped = strip_cfp_markers(logical);

    let upstream_model = apply_alias_and_prefix(&stripped, config);
    let provider_config = resolve_provider_config(&channel_key, &upstream_model, config);

    RoutingDecision {
        upstream_model,
        provider_config,
        cfp_enabled,
        original_model,
    }
}

fn strip_cfp_markers(logical: &str) -> String {
    let mut result = logical.to_string();
    for marker in CFP_MARKERS {
        result = result.replace(marker, "");
    }
    result
}

fn has_provider_prefix(model: &str) -> bool {
    PROVIDER_PREFIXES.iter().any(|prefix| model.starts_with(prefix))
}

fn apply_alias_and_prefix(stripped: &str, config: &Config) -> String {
    let last_segment = stripped.rsplit('/').next().unwrap_or(stripped);

    let alias_target = match last_segment.to_ascii_lowercase().as_str() {
        "haiku" => Some(config.small_model.as_str()),
        "sonnet" => Some(config.big_model.as_str()),
        _ => None,
    };

    if let Some(target) = alias_target {
        return if has_provider_prefix(target) {
            target.to_string()
        } else {
            format!("{}{target}", config.preferred_provider.prefix())
        };
    }

    if has_provider_prefix(stripped) {
        stripped.to_string()
    } else {
        format!("{}{stripped}", config.preferred_provider.prefix())
    }
}

fn provider_default_key(upstream_model: &str, config: &Config) -> Option<SecretString> {
    if upstream_model.starts_with("anthropic/") {
        config.anthropic_api_key.clone()
    } else if upstream_model.starts_with("gemini/") {
        config.gemini_api_key.clone()
    } else if upstream_model.starts_with("openai/") {
        config.openai_api_key.clone()
    } else {
        None
    }
}

fn resolve_provider_config(channel_key: &str, upstream_model: &str, config: &Config) -> ProviderConfig {
    if let Some(channel) = config.channels.get(channel_key) {
        return ProviderConfig {
            name: channel_key.to_string(),
            base_url: channel.base_url.clone().or_else(|| config.base_url.clone()),
            api_key: channel
                .api_key
                .clone()
                .or_else(|| provider_default_key(upstream_model, config))
                .or_else(|| config.api_key.clone()),
        };
    }

    ProviderConfig {
        name: "default".to_string(),
        base_url: config.base_url.clone(),
        api_key: provider_default_key(upstream_model, config).or_else(|| config.api_key.clone()),
    }
}
