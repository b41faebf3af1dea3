/// Errors produced while loading configuration from the environment.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A numeric environment variable could not be parsed.
    #[error("invalid value for {name}: {reason}")]
    InvalidValue {
        /// Name of the offending environment variable.
        name: &'static str,
        /// Human-readable parse failure.
        reason: String,
    },
}
