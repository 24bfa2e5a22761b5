//! Resolve the effective pool configuration from the config file, the
//! selected profile, and CLI flag overrides.

use poolwatch_config::{Config, ConfigError, Profile, profile_to_sync_config, resolve_token};
use poolwatch_core::SyncConfig;
use secrecy::SecretString;

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub use poolwatch_config::{config_path, load_config, save_config};

/// Everything a command needs after config resolution.
#[derive(Debug)]
pub struct Resolved {
    pub profile_name: String,
    pub profile: Profile,
    pub sync: SyncConfig,
}

impl Resolved {
    /// Token from `--token`, then the profile's credential chain.
    pub fn token(&self, global: &GlobalOpts) -> Result<SecretString, CliError> {
        if let Some(ref token) = global.token {
            return Ok(SecretString::from(token.clone()));
        }
        Ok(resolve_token(&self.profile, &self.profile_name)?)
    }

    /// Explicit address, falling back to the profile's.
    pub fn address<'a>(&'a self, explicit: Option<&'a str>) -> Option<&'a str> {
        explicit.or(self.profile.address.as_deref())
    }
}

/// Load the config file and apply CLI overrides.
pub fn resolve(global: &GlobalOpts) -> Result<Resolved, CliError> {
    let cfg = load_config()?;
    resolve_with(&cfg, global)
}

pub fn resolve_with(cfg: &Config, global: &GlobalOpts) -> Result<Resolved, CliError> {
    let (profile_name, mut profile) = match cfg.profile(global.profile.as_deref()) {
        Ok((name, profile)) => (name.to_owned(), profile.clone()),

        // No profile, but the pool was named on the command line.
        Err(ConfigError::UnknownProfile { name }) if global.api_url.is_some() => {
            (name, Profile::default())
        }

        Err(ConfigError::UnknownProfile { .. }) if cfg.profiles.is_empty() => {
            return Err(CliError::NoConfig {
                path: config_path().display().to_string(),
            });
        }

        Err(ConfigError::UnknownProfile { name }) => {
            return Err(CliError::ProfileNotFound {
                name,
                available: cfg.profiles.keys().cloned().collect::<Vec<_>>().join(", "),
            });
        }

        Err(other) => return Err(other.into()),
    };

    if let Some(ref url) = global.api_url {
        profile.api_url.clone_from(url);
    }
    if let Some(ref url) = global.stream_url {
        profile.stream_url = Some(url.clone());
    }
    if global.insecure {
        profile.insecure = Some(true);
    }
    if let Some(timeout) = global.timeout {
        profile.timeout = Some(timeout);
    }

    let sync = profile_to_sync_config(&profile, &cfg.defaults)?;
    tracing::debug!(profile = %profile_name, api = %sync.api_url, "resolved pool config");

    Ok(Resolved {
        profile_name,
        profile,
        sync,
    })
}
