use crate::actions::WrittenArtifact;
use crate::config::{Configuration, Features, SecretSource};
use crate::paths::InstallPaths;
use crate::runner::{RunReport, StageReport};
use crate::stage::StageId;
use serde::Serialize;
use std::path::PathBuf;

const MASK: &str = "********";

/// The resolved configuration as shown to the operator.
///
/// A generated admin secret appears in plaintext: this summary is the only
/// place the operator can learn it. A supplied secret is masked.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigSummary {
    pub root: PathBuf,
    pub user: String,
    pub service: String,
    pub http_port: u16,
    pub longpolling_port: u16,
    pub version: String,
    pub features: Features,
    pub domain: String,
    pub admin_email: String,
    pub admin_secret: String,
    pub secret_source: SecretSource,
    pub paths: InstallPaths,
}

impl ConfigSummary {
    pub fn from_config(cfg: &Configuration) -> Self {
        let secret_source = cfg.admin_secret.source();
        let admin_secret = match secret_source {
            SecretSource::Generated => cfg.admin_secret.expose().to_string(),
            SecretSource::Supplied => MASK.to_string(),
        };
        Self {
            root: cfg.root.clone(),
            user: cfg.user.clone(),
            service: cfg.service_name(),
            http_port: cfg.http_port,
            longpolling_port: cfg.longpolling_port,
            version: cfg.version.clone(),
            features: cfg.features,
            domain: cfg.domain.clone(),
            admin_email: cfg.admin_email.clone(),
            admin_secret,
            secret_source,
            paths: cfg.paths.clone(),
        }
    }

    /// Key/value rows for table output.
    pub fn rows(&self) -> Vec<(&'static str, String)> {
        let on_off = |b: bool| if b { "on" } else { "off" }.to_string();
        vec![
            ("user", self.user.clone()),
            ("service", self.service.clone()),
            ("version", self.version.clone()),
            ("http port", self.http_port.to_string()),
            ("longpolling port", self.longpolling_port.to_string()),
            ("enterprise", on_off(self.features.enterprise)),
            ("proxy", on_off(self.features.proxy)),
            ("tls", on_off(self.features.tls)),
            ("wkhtmltopdf", on_off(self.features.wkhtmltopdf)),
            ("postgresql 16", on_off(self.features.postgresql_16)),
            ("domain", self.domain.clone()),
            ("admin email", self.admin_email.clone()),
            (
                "admin secret",
                format!(
                    "{} ({})",
                    self.admin_secret,
                    match self.secret_source {
                        SecretSource::Generated => "generated",
                        SecretSource::Supplied => "supplied",
                    }
                ),
            ),
            ("config file", self.paths.config_file.display().to_string()),
            ("log file", self.paths.log_file.display().to_string()),
            ("root", self.root.display().to_string()),
        ]
    }
}

/// Everything a finished (or aborted) run reports.
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub configuration: ConfigSummary,
    pub stages: Vec<StageReport>,
    pub artifacts: Vec<WrittenArtifact>,
    pub failed_stage: Option<StageId>,
    pub succeeded: bool,
}

impl Summary {
    pub fn new(cfg: &Configuration, report: RunReport) -> Self {
        Self {
            configuration: ConfigSummary::from_config(cfg),
            succeeded: report.failed_stage.is_none(),
            failed_stage: report.failed_stage,
            stages: report.stages,
            artifacts: report.artifacts,
        }
    }

    /// Whether the summary carries a secret in plaintext.
    pub fn reveals_secret(&self) -> bool {
        self.configuration.secret_source == SecretSource::Generated
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
