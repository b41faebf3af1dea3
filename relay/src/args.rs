use clap::{Parser, ValueEnum};

/// Command-line arguments for the relay binary.
///
/// Everything else — upstream credentials, model aliases, channels — is
/// read from the environment by `config::Config::from_env`.
#[derive(Debug, Parser)]
#[command(name = "relay", version, about = "Anthropic Messages API proxy for OpenAI-compatible upstreams")]
pub struct Args {
    /// Port the HTTP surface listens on.
    #[arg(long, env = "PORT", default_value_t = 8082)]
    pub port: u16,

    /// Log output layout: human-readable text, or structured JSON for
    /// production.
    #[arg(long, value_enum, env = "LOG_FORMAT", default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// `logforth`/`env_logger`-style filter, e.g. `info` or `llm=debug`.
    #[arg(long, env = "LOG_FILTER", default_value = "info")]
    pub log_filter: String,
}

/// Selects the logger's output layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Colored, human-readable console output.
    Pretty,
    /// Structured JSON, one object per line.
    Json,
}
