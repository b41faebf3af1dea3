//! Environment-scoped configuration for the relay.
//!
//! Unlike a file-backed configuration layer, this crate reads a fixed set of
//! environment variables once at startup and produces an immutable [`Config`].
//! There is no dynamic reload and no on-disk format: every key is documented
//! at the call site of [`Config::from_env`].

#![deny(missing_docs)]

mod error;

use std::{collections::HashMap, env};

use secrecy::SecretString;

pub use error::Error;

const DEFAULT_BIG_MODEL: &str = "gpt-4.1";
const DEFAULT_SMALL_MODEL: &str = "gpt-4.1-mini";
const DEFAULT_PORT: u16 = 8082;

/// The provider a bare, prefix-less model name is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreferredProvider {
    /// OpenAI-compatible upstream (the default).
    OpenAi,
    /// Anthropic upstream.
    Anthropic,
    /// Google Gemini upstream.
    Gemini,
}

impl PreferredProvider {
    fn from_env_value(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "anthropic" => Self::Anthropic,
            "google" | "gemini" => Self::Gemini,
            _ => Self::OpenAi,
        }
    }

    /// The `provider/` prefix this preference maps onto.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai/",
            Self::Anthropic => "anthropic/",
            Self::Gemini => "gemini/",
        }
    }
}

/// A named upstream channel: a `(base_url, api_key)` pair selectable via the
/// `model:channel` syntax.
#[derive(Debug, Clone, Default)]
pub struct ChannelConfig {
    /// Base URL override for this channel, if any.
    pub base_url: Option<String>,
    /// API key override for this channel, if any.
    pub api_key: Option<SecretString>,
}

/// Immutable, process-wide configuration loaded once from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Default credential for an `anthropic/` upstream.
    pub anthropic_api_key: Option<SecretString>,
    /// Default credential for an `openai/` upstream.
    pub openai_api_key: Option<SecretString>,
    /// Default credential for a `gemini/` upstream.
    pub gemini_api_key: Option<SecretString>,
    /// Provider a prefix-less model name is routed to.
    pub preferred_provider: PreferredProvider,
    /// Alias target for `sonnet`.
    pub big_model: String,
    /// Alias target for `haiku`.
    pub small_model: String,
    /// Default upstream base URL (`BASE_URL` / `API_BASE`), used when a
    /// channel does not override it.
    pub base_url: Option<String>,
    /// Default upstream API key (`API_KEY`), used when no provider-specific
    /// or channel-specific key applies.
    pub api_key: Option<SecretString>,
    /// Named channels keyed by lowercase name, from `CHANNEL_<NAME>_*`.
    pub channels: HashMap<String, ChannelConfig>,
    /// Enables verbose upstream-client debug logging.
    pub debug: bool,
    /// Port the HTTP surface listens on.
    pub port: u16,
}

impl Config {
    /// Load configuration from the process environment, applying the
    /// defaults documented alongside each field.
    pub fn from_env() -> Result<Self, Error> {
        let anthropic_api_key = env_secret("ANTHROPIC_API_KEY");
        let openai_api_key = env_secret("OPENAI_API_KEY");
        let gemini_api_key = env_secret("GEMINI_API_KEY");

        let preferred_provider = env::var("PREFERRED_PROVIDER")
            .ok()
            .map(|v| PreferredProvider::from_env_value(&v))
            .unwrap_or(PreferredProvider::OpenAi);

        let big_model = env::var("BIG_MODEL").unwrap_or_else(|_| DEFAULT_BIG_MODEL.to_string());
        let small_model = env::var("SMALL_MODEL").unwrap_or_else(|_| DEFAULT_SMALL_MODEL.to_string());

        let base_url = env::var("BASE_URL").ok().or_else(|| env::var("API_BASE").ok());
        let api_key = env_secret("API_KEY");

        let debug = env_bool("DEBUG");

        let port = match env::var("PORT") {
            Ok(value) => value.parse().map_err(|_| Error::InvalidValue {
                name: "PORT",
                reason: format!("{value:?} is not a valid port number"),
            })?,
            Err(_) => DEFAULT_PORT,
        };

        let channels = collect_channels();

        Ok(Self {
            anthropic_api_key,
            openai_api_key,
            gemini_api_key,
            preferred_provider,
            big_model,
            small_model,
            base_url,
            api_key,
            channels,
            debug,
            port,
        })
    }
}

fn env_secret(name: &str) -> Option<SecretString> {
    env::var(name).ok().filter(|v| !v.is_empty()).map(SecretString::from)
}

fn env_bool(name: &str) -> bool {
    env::var(name)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

/// Scans the environment for `CHANNEL_<NAME>_BASE_URL` / `CHANNEL_<NAME>_API_KEY`
/// pairs and groups them by lowercased `<NAME>`.
fn collect_channels() -> HashMap<String, ChannelConfig> {
    let mut channels: HashMap<String, ChannelConfig> = HashMap::new();

    for (key, value) in env::vars() {
        let Some(rest) = key.strip_prefix("CHANNEL_") else {
            continue;
        };

        if let Some(name) = rest.strip_suffix("_BASE_URL") {
            channels.entry(name.to_ascii_lowercase()).or_default().base_url = Some(value);
        } else if let Some(name) = rest.strip_suffix("_API_KEY") {
            channels.entry(name.to_ascii_lowercase()).or_default().api_key = Some(SecretString::from(value));
        }
    }

    channels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preferred_provider_defaults_to_openai() {
        assert_eq!(PreferredProvider::from_env_value("nonsense").prefix(), "openai/");
    }

    #[test]
    fn preferred_provider_recognizes_google_and_gemini() {
        assert_eq!(PreferredProvider::from_env_value("google").prefix(), "gemini/");
        assert_eq!(PreferredProvider::from_env_value("GEMINI").prefix(), "gemini/");
    }

    #[test]
    fn preferred_provider_recognizes_anthropic() {
        assert_eq!(PreferredProvider::from_env_value("Anthropic").prefix(), "anthropic/");
    }

    #[test]
    fn channel_collection_groups_by_lowercased_name() {
        // SAFETY: test runs single-threaded within this process's env mutation.
        unsafe {
            env::set_var("CHANNEL_GEMINI_BASE_URL", "https://g.example/v1");
            env::set_var("CHANNEL_GEMINI_API_KEY", "secret-key");
        }

        let channels = collect_channels();
        let gemini = channels.get("gemini").expect("channel present");
        assert_eq!(gemini.base_url.as_deref(), Some("https://g.example/v1"));
        assert!(gemini.api_key.is_some());

        unsafe {
            env::remove_var("CHANNEL_GEMINI_BASE_URL");
            env::remove_var("CHANNEL_GEMINI_API_KEY");
        }
    }
}
