use std::path::PathBuf;

use anyhow::Result;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::acme::client::AcmeSettings;

const DEFAULT_SERVER: &str = "https://acme-v01.api.letsencrypt.org/directory";
const DEFAULT_EMAIL_PREFIX: &str = "hostmaster";
const DEFAULT_DAYS_VALID: i64 = 1;
const DEFAULT_KEY_SIZE: u32 = 2048;
const DEFAULT_ACCOUNT_KEY: &str = "account.key";
const DEFAULT_WEBROOT: &str = ".";
const DEFAULT_WELL_KNOWN_PATH: &str = "/.well-known/acme-challenge/";
const DEFAULT_POLL_BASE_DELAY_MS: u64 = 500;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// ACME directory URL.
    pub server: String,
    /// Contact email; overrides whatever the profile carries.
    pub email: Option<String>,
    /// Prefix used to synthesize `<prefix>@<domain>` when no email is known.
    pub email_prefix: String,
    /// Requested certificate validity in days.
    pub days_valid: i64,
    /// RSA bit length for generated keys.
    pub key_size: u32,
    /// Account key file; generated on first use when absent.
    pub account_key: PathBuf,
    /// Directory the challenge path is published under.
    pub webroot: PathBuf,
    /// Relative path fragment for challenge files.
    pub well_known_path: String,
    /// Pause between publishing the challenge file and accepting the
    /// challenge.
    pub with_interaction: bool,
    /// Certificate subject organization.
    pub organization: Option<String>,
    /// Certificate subject country code.
    pub country: Option<String>,
    pub acme: AcmeTuning,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AcmeTuning {
    pub poll_base_delay_ms: u64,
}

impl Settings {
    /// Layers defaults, an optional `certling.toml`, and `CERTLING_*`
    /// environment variables.
    ///
    /// # Errors
    /// Returns an error if a configuration source cannot be parsed.
    pub fn new(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("server", DEFAULT_SERVER)?
            .set_default("email_prefix", DEFAULT_EMAIL_PREFIX)?
            .set_default("days_valid", DEFAULT_DAYS_VALID)?
            .set_default("key_size", DEFAULT_KEY_SIZE)?
            .set_default("account_key", DEFAULT_ACCOUNT_KEY)?
            .set_default("webroot", DEFAULT_WEBROOT)?
            .set_default("well_known_path", DEFAULT_WELL_KNOWN_PATH)?
            .set_default("with_interaction", true)?
            .set_default("acme.poll_base_delay_ms", DEFAULT_POLL_BASE_DELAY_MS)?;

        let path = config_path.unwrap_or_else(|| PathBuf::from("certling.toml"));
        builder = builder.add_source(File::from(path).required(false));
        builder = builder.add_source(Environment::with_prefix("CERTLING").separator("__"));

        builder.build()?.try_deserialize()
    }

    /// Folds command-line flags over the layered configuration.
    pub fn merge_with_args(&mut self, args: &crate::cli::args::Cli) {
        if let Some(url) = &args.url {
            url.clone_into(&mut self.server);
        }
        if let Some(email) = &args.email {
            self.email = Some(email.clone());
        }
        if let Some(days) = args.days {
            self.days_valid = days;
        }
        if let Some(key_size) = args.key_size {
            self.key_size = key_size;
        }
        if let Some(webroot) = &args.webroot {
            webroot.clone_into(&mut self.webroot);
        }
        if let Some(well_known) = &args.well_known {
            well_known.clone_into(&mut self.well_known_path);
        }
        if let Some(organization) = &args.organization {
            self.organization = Some(organization.clone());
        }
        if let Some(country) = &args.country {
            self.country = Some(country.clone());
        }
        if args.yes {
            self.with_interaction = false;
        }
    }

    /// Validates settings for correctness.
    ///
    /// # Errors
    /// Returns an error if any setting is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.key_size < 2048 {
            anyhow::bail!("key_size must be at least 2048 bits");
        }
        if !self.well_known_path.starts_with('/') || !self.well_known_path.ends_with('/') {
            anyhow::bail!("well_known_path must start and end with '/'");
        }
        if self.acme.poll_base_delay_ms == 0 {
            anyhow::bail!("acme.poll_base_delay_ms must be greater than 0");
        }
        Ok(())
    }

    pub fn acme_settings(&self) -> AcmeSettings {
        AcmeSettings {
            directory_url: self.server.clone(),
            days_valid: self.days_valid,
            poll_base_delay_ms: self.acme.poll_base_delay_ms,
        }
    }
}
