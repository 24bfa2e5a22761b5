//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` variants into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use poolwatch_config::ConfigError;
use poolwatch_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach the pool API at {url}")]
    #[diagnostic(
        code(poolwatch::connection_failed),
        help(
            "Check the API URL and your network connection.\n\
             Reason: {reason}"
        )
    )]
    ConnectionFailed { url: String, reason: String },

    #[error("Request timed out")]
    #[diagnostic(
        code(poolwatch::timeout),
        help("Increase the timeout with --timeout or check the pool's responsiveness.")
    )]
    Timeout,

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(poolwatch::auth_failed),
        help("Check that your token is current. Pass it with --token or POOLWATCH_TOKEN.")
    )]
    AuthFailed { message: String },

    #[error("No token configured for profile '{profile}'")]
    #[diagnostic(
        code(poolwatch::no_token),
        help(
            "Pass --token, set POOLWATCH_TOKEN, or point the profile at a variable with\n\
             poolwatch config init --token-env <VAR>"
        )
    )]
    NoToken { profile: String },

    // ── Resources ────────────────────────────────────────────────────
    #[error("{resource} not found")]
    #[diagnostic(
        code(poolwatch::not_found),
        help("Check the miner address; it must have submitted shares to this pool.")
    )]
    NotFound { resource: String },

    #[error("Failed to load {resource}: {message}")]
    #[diagnostic(code(poolwatch::fetch_failed))]
    Fetch { resource: String, message: String },

    #[error("API error: {message}")]
    #[diagnostic(code(poolwatch::api_error))]
    Api { message: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("{resource} needs a miner address")]
    #[diagnostic(
        code(poolwatch::missing_address),
        help("Pass --address <ADDRESS>, or set `address` in your profile.")
    )]
    MissingAddress { resource: String },

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(poolwatch::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(poolwatch::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: poolwatch config init --api-url <URL> --name {name}"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No pool configured")]
    #[diagnostic(
        code(poolwatch::no_config),
        help(
            "Create a profile with: poolwatch config init --api-url <URL>\n\
             Or pass --api-url. Config expected at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error("Profile '{name}' already exists")]
    #[diagnostic(code(poolwatch::profile_exists), help("Use --force to replace it."))]
    ProfileExists { name: String },

    #[error(transparent)]
    #[diagnostic(code(poolwatch::config))]
    Config(ConfigError),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON payload: {0}")]
    #[diagnostic(code(poolwatch::json), help("Check the JSON contents and try again."))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::Timeout => exit_code::TIMEOUT,
            Self::AuthFailed { .. } | Self::NoToken { .. } => exit_code::AUTH,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::MissingAddress { .. } | Self::Validation { .. } | Self::ProfileExists { .. } => {
                exit_code::USAGE
            }
            _ => exit_code::GENERAL,
        }
    }
}

// ── Conversions ──────────────────────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { url, reason } => Self::ConnectionFailed { url, reason },
            CoreError::Timeout => Self::Timeout,
            CoreError::StreamUnavailable { reason } => Self::ConnectionFailed {
                url: "(stream)".into(),
                reason,
            },
            CoreError::NotFound { resource } => Self::NotFound { resource },
            CoreError::AuthenticationFailed { message } => Self::AuthFailed { message },
            CoreError::Config { message } => Self::Validation {
                field: "config".into(),
                reason: message,
            },
            CoreError::MalformedResponse { message } | CoreError::Api { message, .. } => {
                Self::Api { message }
            }
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            ConfigError::NoToken { profile } => Self::NoToken { profile },
            other => Self::Config(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_map_to_exit_codes() {
        let err = CliError::from(CoreError::NotFound {
            resource: "miner not found".into(),
        });
        assert_eq!(err.exit_code(), exit_code::NOT_FOUND);

        let err = CliError::from(CoreError::Timeout);
        assert_eq!(err.exit_code(), exit_code::TIMEOUT);

        let err = CliError::from(ConfigError::NoToken {
            profile: "main".into(),
        });
        assert_eq!(err.exit_code(), exit_code::AUTH);
    }
}
