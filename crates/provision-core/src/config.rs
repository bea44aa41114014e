use crate::error::{ProvisionError, Result};
use crate::paths::{self, InstallPaths};
use crate::settings::{Settings, PLACEHOLDER_DOMAIN, PLACEHOLDER_EMAIL};
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

/// Length of a generated admin secret.
pub const GENERATED_SECRET_LEN: usize = 32;

// ---------------------------------------------------------------------------
// AdminSecret
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretSource {
    Supplied,
    Generated,
}

/// The Odoo master password. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct AdminSecret {
    value: String,
    source: SecretSource,
}

impl AdminSecret {
    pub fn supplied(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            source: SecretSource::Supplied,
        }
    }

    pub fn generate() -> Self {
        use rand::{distributions::Alphanumeric, Rng};
        let value = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(GENERATED_SECRET_LEN)
            .map(char::from)
            .collect();
        Self {
            value,
            source: SecretSource::Generated,
        }
    }

    pub fn expose(&self) -> &str {
        &self.value
    }

    pub fn source(&self) -> SecretSource {
        self.source
    }
}

impl std::fmt::Debug for AdminSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminSecret")
            .field("value", &"<redacted>")
            .field("source", &self.source)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Features
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Features {
    pub enterprise: bool,
    pub proxy: bool,
    pub tls: bool,
    pub wkhtmltopdf: bool,
    pub postgresql_16: bool,
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// The validated, immutable provisioning record. Built once, then borrowed by
/// every stage.
#[derive(Debug, Clone)]
pub struct Configuration {
    /// Filesystem prefix all host paths are written under; `/` in production.
    pub root: PathBuf,
    pub user: String,
    pub http_port: u16,
    pub longpolling_port: u16,
    pub version: String,
    pub version_major: u32,
    pub features: Features,
    pub admin_email: String,
    pub domain: String,
    pub admin_secret: AdminSecret,
    pub paths: InstallPaths,
    pub packages: Vec<String>,
    pub max_credential_attempts: u32,
    pub command_timeout: Duration,
}

impl Configuration {
    /// Validate `settings` and derive everything else. Every problem found is
    /// reported at once; nothing is executed.
    pub fn resolve(settings: &Settings, root: &Path) -> Result<Self> {
        let mut problems = Vec::new();

        if let Err(msg) = validate_user(&settings.user) {
            problems.push(msg);
        }
        let http_port = check_port("http_port", settings.http_port, &mut problems);
        let longpolling_port =
            check_port("longpolling_port", settings.longpolling_port, &mut problems);
        if settings.http_port == settings.longpolling_port {
            problems.push(format!(
                "http_port and longpolling_port must differ (both {})",
                settings.http_port
            ));
        }
        let version_major = match parse_version(&settings.version) {
            Some(major) => major,
            None => {
                problems.push(format!(
                    "version '{}' must look like <major>.<minor>, e.g. 17.0",
                    settings.version
                ));
                0
            }
        };
        if settings.domain.is_empty() {
            problems.push("domain must not be empty (use '_' for none)".to_string());
        } else if settings.domain.chars().any(char::is_whitespace) {
            problems.push(format!(
                "domain '{}' must not contain whitespace",
                settings.domain
            ));
        } else if !domain_re().is_match(&settings.domain) {
            problems.push(format!(
                "domain '{}' is not a host name (letters, digits, '-' and '.') or '_'",
                settings.domain
            ));
        }
        if settings.admin_email.trim().is_empty() || !settings.admin_email.contains('@') {
            problems.push(format!(
                "admin_email '{}' is not an email address",
                settings.admin_email
            ));
        }
        if !settings.generate_secret {
            if settings.admin_secret.is_empty() {
                problems.push("admin_secret must be set when generate_secret is false".to_string());
            } else if settings.admin_secret.chars().any(char::is_control) {
                problems.push("admin_secret must not contain control characters".to_string());
            }
        }
        if settings.max_credential_attempts == 0 {
            problems.push("max_credential_attempts must be at least 1".to_string());
        }
        if settings.command_timeout_secs == 0 {
            problems.push("command_timeout_secs must be at least 1".to_string());
        }

        if !problems.is_empty() {
            return Err(ProvisionError::InvalidConfig(problems));
        }

        let admin_secret = if settings.generate_secret {
            AdminSecret::generate()
        } else {
            AdminSecret::supplied(settings.admin_secret.clone())
        };

        Ok(Self {
            root: root.to_path_buf(),
            user: settings.user.clone(),
            http_port,
            longpolling_port,
            version: settings.version.clone(),
            version_major,
            features: Features {
                enterprise: settings.enterprise,
                proxy: settings.proxy,
                tls: settings.tls,
                wkhtmltopdf: settings.install_wkhtmltopdf,
                postgresql_16: settings.postgresql_16,
            },
            admin_email: settings.admin_email.clone(),
            domain: settings.domain.clone(),
            admin_secret,
            paths: InstallPaths::for_user(&settings.user),
            packages: settings.packages.clone(),
            max_credential_attempts: settings.max_credential_attempts,
            command_timeout: Duration::from_secs(settings.command_timeout_secs),
        })
    }

    pub fn service_name(&self) -> String {
        paths::service_name(&self.user)
    }

    /// Where `logical` lives on this run's filesystem.
    pub fn host_path(&self, logical: &Path) -> PathBuf {
        paths::host_path(&self.root, logical)
    }

    /// Certificate issuance needs a real name and a real contact address.
    pub fn tls_blocker(&self) -> Option<&'static str> {
        if self.domain == PLACEHOLDER_DOMAIN {
            Some("domain is the '_' placeholder")
        } else if self.admin_email == PLACEHOLDER_EMAIL {
            Some("admin_email is still the default address")
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Validation helpers
// ---------------------------------------------------------------------------

static USER_RE: OnceLock<Regex> = OnceLock::new();
static VERSION_RE: OnceLock<Regex> = OnceLock::new();
static DOMAIN_RE: OnceLock<Regex> = OnceLock::new();

fn user_re() -> &'static Regex {
    USER_RE.get_or_init(|| Regex::new(r"^[a-z_][a-z0-9_-]*$").unwrap())
}

fn version_re() -> &'static Regex {
    VERSION_RE.get_or_init(|| Regex::new(r"^(\d+)\.(\d+)$").unwrap())
}

/// `_` or dot-separated labels; ends up verbatim in `server_name` and `certbot -d`.
fn domain_re() -> &'static Regex {
    DOMAIN_RE.get_or_init(|| {
        Regex::new(r"^(_|[A-Za-z0-9]([A-Za-z0-9-]*[A-Za-z0-9])?(\.[A-Za-z0-9]([A-Za-z0-9-]*[A-Za-z0-9])?)*)$")
            .unwrap()
    })
}

fn validate_user(user: &str) -> std::result::Result<(), String> {
    if user.is_empty() {
        return Err("user must not be empty".to_string());
    }
    if user.len() > 32 || !user_re().is_match(user) {
        return Err(format!(
            "user '{user}' is not a valid system account name (lowercase, digits, '_' or '-', max 32)"
        ));
    }
    Ok(())
}

fn check_port(name: &str, port: u32, problems: &mut Vec<String>) -> u16 {
    match u16::try_from(port) {
        Ok(p) if p != 0 => p,
        _ => {
            problems.push(format!("{name} {port} is outside 1-65535"));
            0
        }
    }
}

fn parse_version(version: &str) -> Option<u32> {
    version_re()
        .captures(version)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(settings: &Settings) -> Result<Configuration> {
        Configuration::resolve(settings, Path::new("/"))
    }

    #[test]
    fn defaults_resolve() {
        let cfg = resolve(&Settings::default()).unwrap();
        assert_eq!(cfg.user, "odoo");
        assert_eq!(cfg.http_port, 8069);
        assert_eq!(cfg.longpolling_port, 8072);
        assert_eq!(cfg.version_major, 17);
        assert_eq!(cfg.service_name(), "odoo-server");
        assert_eq!(cfg.admin_secret.source(), SecretSource::Generated);
        assert_eq!(cfg.admin_secret.expose().len(), GENERATED_SECRET_LEN);
        assert!(cfg
            .admin_secret
            .expose()
            .chars()
            .all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn supplied_secret_is_kept() {
        let settings = Settings {
            generate_secret: false,
            admin_secret: "s3cret".to_string(),
            ..Default::default()
        };
        let cfg = resolve(&settings).unwrap();
        assert_eq!(cfg.admin_secret.expose(), "s3cret");
        assert_eq!(cfg.admin_secret.source(), SecretSource::Supplied);
    }

    #[test]
    fn debug_never_prints_secret() {
        let secret = AdminSecret::supplied("hunter2");
        let printed = format!("{secret:?}");
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("redacted"));
    }

    #[test]
    fn port_out_of_range_rejected() {
        for port in [0, 65536, 100_000] {
            let settings = Settings {
                http_port: port,
                ..Default::default()
            };
            let err = resolve(&settings).unwrap_err();
            assert!(err.to_string().contains("http_port"), "port {port}: {err}");
        }
    }

    #[test]
    fn empty_user_rejected() {
        let settings = Settings {
            user: String::new(),
            ..Default::default()
        };
        let err = resolve(&settings).unwrap_err();
        assert!(err.to_string().contains("user must not be empty"));
    }

    #[test]
    fn malformed_user_rejected() {
        for user in ["Odoo", "1odoo", "od oo", "odoo/../root"] {
            let settings = Settings {
                user: user.to_string(),
                ..Default::default()
            };
            assert!(resolve(&settings).is_err(), "expected invalid: {user}");
        }
    }

    #[test]
    fn domain_with_whitespace_rejected() {
        let settings = Settings {
            domain: "example .test".to_string(),
            ..Default::default()
        };
        let err = resolve(&settings).unwrap_err();
        assert!(err.to_string().contains("whitespace"));
    }

    #[test]
    fn domain_with_config_syntax_rejected() {
        for domain in ["a.test;}server{", "a.test;", "-lead.test", "a..test", "a.test/x"] {
            let settings = Settings {
                domain: domain.to_string(),
                ..Default::default()
            };
            let err = resolve(&settings).unwrap_err();
            assert!(err.to_string().contains("not a host name"), "accepted {domain}");
        }
        for domain in ["_", "localhost", "erp.example.test", "odoo-1.example.co.uk"] {
            let settings = Settings {
                domain: domain.to_string(),
                ..Default::default()
            };
            assert!(resolve(&settings).is_ok(), "rejected {domain}");
        }
    }

    #[test]
    fn supplied_secret_with_newline_rejected() {
        for secret in ["x\nlogfile = /tmp/evil", "x\rproxy_mode = False", "tab\there"] {
            let settings = Settings {
                generate_secret: false,
                admin_secret: secret.to_string(),
                ..Default::default()
            };
            let err = resolve(&settings).unwrap_err();
            assert!(err.to_string().contains("control characters"));
        }
    }

    #[test]
    fn equal_ports_rejected() {
        let settings = Settings {
            longpolling_port: 8069,
            ..Default::default()
        };
        assert!(resolve(&settings).is_err());
    }

    #[test]
    fn bad_version_rejected() {
        for version in ["master", "17", "17.0.1", ""] {
            let settings = Settings {
                version: version.to_string(),
                ..Default::default()
            };
            assert!(resolve(&settings).is_err(), "expected invalid: {version}");
        }
    }

    #[test]
    fn all_problems_reported_together() {
        let settings = Settings {
            user: String::new(),
            http_port: 0,
            domain: "a b".to_string(),
            ..Default::default()
        };
        match resolve(&settings).unwrap_err() {
            ProvisionError::InvalidConfig(problems) => assert_eq!(problems.len(), 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_literal_secret_rejected() {
        let settings = Settings {
            generate_secret: false,
            admin_secret: String::new(),
            ..Default::default()
        };
        assert!(resolve(&settings).is_err());
    }

    #[test]
    fn tls_blocker_reasons() {
        let cfg = resolve(&Settings::default()).unwrap();
        assert!(cfg.tls_blocker().unwrap().contains("placeholder"));

        let settings = Settings {
            domain: "erp.example.test".to_string(),
            ..Default::default()
        };
        let cfg = resolve(&settings).unwrap();
        assert!(cfg.tls_blocker().unwrap().contains("admin_email"));

        let settings = Settings {
            domain: "erp.example.test".to_string(),
            admin_email: "ops@example.test".to_string(),
            ..Default::default()
        };
        assert!(resolve(&settings).unwrap().tls_blocker().is_none());
    }

    #[test]
    fn host_path_uses_root() {
        let cfg = Configuration::resolve(&Settings::default(), Path::new("/srv/target")).unwrap();
        assert_eq!(
            cfg.host_path(&cfg.paths.config_file),
            PathBuf::from("/srv/target/etc/odoo-server.conf")
        );
    }
}
