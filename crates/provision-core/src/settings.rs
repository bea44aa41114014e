//! Raw provisioning settings: built-in defaults, an optional YAML file, and
//! per-field overrides from the environment or command line.
//!
//! Nothing here is validated; [`crate::config::Configuration::resolve`] turns
//! a `Settings` into the checked, immutable record every stage reads.

use crate::error::{ProvisionError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Placeholder domain meaning "no public name yet" (nginx catch-all).
pub const PLACEHOLDER_DOMAIN: &str = "_";
/// Admin email shipped as the default; certificate requests refuse it.
pub const PLACEHOLDER_EMAIL: &str = "odoo@example.com";

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default = "default_user")]
    pub user: String,
    /// Ports are read wide so an out-of-range value reaches validation
    /// instead of failing deserialization with a less useful message.
    #[serde(default = "default_http_port")]
    pub http_port: u32,
    #[serde(default = "default_longpolling_port")]
    pub longpolling_port: u32,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub enterprise: bool,
    #[serde(default = "default_true")]
    pub proxy: bool,
    #[serde(default)]
    pub tls: bool,
    #[serde(default = "default_true")]
    pub install_wkhtmltopdf: bool,
    #[serde(default = "default_true")]
    pub postgresql_16: bool,
    #[serde(default = "default_admin_email")]
    pub admin_email: String,
    #[serde(default = "default_domain")]
    pub domain: String,
    #[serde(default = "default_admin_secret")]
    pub admin_secret: String,
    #[serde(default = "default_true")]
    pub generate_secret: bool,
    /// Re-prompts allowed for the enterprise checkout before giving up.
    #[serde(default = "default_max_credential_attempts")]
    pub max_credential_attempts: u32,
    /// Upper bound on any single external command, in seconds.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_packages")]
    pub packages: Vec<String>,
}

fn default_user() -> String {
    "odoo".to_string()
}

fn default_http_port() -> u32 {
    8069
}

fn default_longpolling_port() -> u32 {
    8072
}

fn default_version() -> String {
    "17.0".to_string()
}

fn default_true() -> bool {
    true
}

fn default_admin_email() -> String {
    PLACEHOLDER_EMAIL.to_string()
}

fn default_domain() -> String {
    PLACEHOLDER_DOMAIN.to_string()
}

fn default_admin_secret() -> String {
    "admin".to_string()
}

fn default_max_credential_attempts() -> u32 {
    3
}

fn default_command_timeout() -> u64 {
    1800
}

fn default_packages() -> Vec<String> {
    [
        "git",
        "python3",
        "python3-pip",
        "python3-dev",
        "python3-venv",
        "python3-wheel",
        "build-essential",
        "wget",
        "libxslt-dev",
        "libzip-dev",
        "libldap2-dev",
        "libsasl2-dev",
        "libpq-dev",
        "libjpeg-dev",
        "zlib1g-dev",
        "libfreetype6-dev",
        "node-less",
        "npm",
        "xfonts-75dpi",
        "xfonts-base",
        "fontconfig",
    ]
    .iter()
    .map(|p| p.to_string())
    .collect()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            user: default_user(),
            http_port: default_http_port(),
            longpolling_port: default_longpolling_port(),
            version: default_version(),
            enterprise: false,
            proxy: true,
            tls: false,
            install_wkhtmltopdf: true,
            postgresql_16: true,
            admin_email: default_admin_email(),
            domain: default_domain(),
            admin_secret: default_admin_secret(),
            generate_secret: true,
            max_credential_attempts: default_max_credential_attempts(),
            command_timeout_secs: default_command_timeout(),
            packages: default_packages(),
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ProvisionError::SettingsNotFound(path.display().to_string()));
        }
        let data = std::fs::read_to_string(path)?;
        Self::from_yaml(&data)
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        // An empty file is a valid "all defaults" document.
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(data)?)
    }

    /// Defaults, then the file at `path` if given, then `overrides`.
    pub fn layered(path: Option<&Path>, overrides: &SettingsOverrides) -> Result<Self> {
        let mut settings = match path {
            Some(p) => Self::load(p)?,
            None => Self::default(),
        };
        settings.apply(overrides);
        Ok(settings)
    }

    pub fn apply(&mut self, o: &SettingsOverrides) {
        fn set<T: Clone>(slot: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *slot = v.clone();
            }
        }
        set(&mut self.user, &o.user);
        set(&mut self.http_port, &o.http_port);
        set(&mut self.longpolling_port, &o.longpolling_port);
        set(&mut self.version, &o.version);
        set(&mut self.enterprise, &o.enterprise);
        set(&mut self.proxy, &o.proxy);
        set(&mut self.tls, &o.tls);
        set(&mut self.install_wkhtmltopdf, &o.install_wkhtmltopdf);
        set(&mut self.postgresql_16, &o.postgresql_16);
        set(&mut self.admin_email, &o.admin_email);
        set(&mut self.domain, &o.domain);
        set(&mut self.admin_secret, &o.admin_secret);
        set(&mut self.generate_secret, &o.generate_secret);
        set(&mut self.max_credential_attempts, &o.max_credential_attempts);
        set(&mut self.command_timeout_secs, &o.command_timeout_secs);
    }
}

// ---------------------------------------------------------------------------
// SettingsOverrides
// ---------------------------------------------------------------------------

/// Field-by-field overrides; `None` leaves the lower layer untouched.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub user: Option<String>,
    pub http_port: Option<u32>,
    pub longpolling_port: Option<u32>,
    pub version: Option<String>,
    pub enterprise: Option<bool>,
    pub proxy: Option<bool>,
    pub tls: Option<bool>,
    pub install_wkhtmltopdf: Option<bool>,
    pub postgresql_16: Option<bool>,
    pub admin_email: Option<String>,
    pub domain: Option<String>,
    pub admin_secret: Option<String>,
    pub generate_secret: Option<bool>,
    pub max_credential_attempts: Option<u32>,
    pub command_timeout_secs: Option<u64>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
