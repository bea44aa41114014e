use crate::config::Configuration;
use crate::error::{ProvisionError, Result};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// StageId
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageId {
    Packages,
    Database,
    PdfRenderer,
    ServiceUser,
    Source,
    Virtualenv,
    Enterprise,
    AppConfig,
    ServiceUnit,
    ReverseProxy,
    Firewall,
    Tls,
    ServiceStart,
}

impl StageId {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageId::Packages => "packages",
            StageId::Database => "database",
            StageId::PdfRenderer => "pdf-renderer",
            StageId::ServiceUser => "service-user",
            StageId::Source => "source",
            StageId::Virtualenv => "virtualenv",
            StageId::Enterprise => "enterprise",
            StageId::AppConfig => "app-config",
            StageId::ServiceUnit => "service-unit",
            StageId::ReverseProxy => "reverse-proxy",
            StageId::Firewall => "firewall",
            StageId::Tls => "tls",
            StageId::ServiceStart => "service-start",
        }
    }

    pub fn all() -> impl Iterator<Item = StageId> {
        STAGES.iter().map(|s| s.id)
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StageId {
    type Err = ProvisionError;
    fn from_str(s: &str) -> Result<Self> {
        StageId::all()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| ProvisionError::UnknownStage(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Predicate
// ---------------------------------------------------------------------------

/// When a stage applies, evaluated against the resolved configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predicate {
    Always,
    Wkhtmltopdf,
    Enterprise,
    Proxy,
    /// Certificate issuance edits the proxy site, so it needs both flags plus
    /// a real domain and contact address.
    ProxyAndTls,
}

/// Outcome of evaluating a predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", content = "reason", rename_all = "snake_case")]
pub enum Decision {
    Run,
    Skip(String),
}

impl Predicate {
    pub fn evaluate(&self, cfg: &Configuration) -> Decision {
        let f = &cfg.features;
        match self {
            Predicate::Always => Decision::Run,
            Predicate::Wkhtmltopdf if !f.wkhtmltopdf => {
                Decision::Skip("install_wkhtmltopdf is off".to_string())
            }
            Predicate::Enterprise if !f.enterprise => {
                Decision::Skip("enterprise is off".to_string())
            }
            Predicate::Proxy if !f.proxy => Decision::Skip("proxy is off".to_string()),
            Predicate::ProxyAndTls if !f.proxy => Decision::Skip("proxy is off".to_string()),
            Predicate::ProxyAndTls if !f.tls => Decision::Skip("tls is off".to_string()),
            Predicate::ProxyAndTls => match cfg.tls_blocker() {
                Some(why) => Decision::Skip(why.to_string()),
                None => Decision::Run,
            },
            _ => Decision::Run,
        }
    }
}

// ---------------------------------------------------------------------------
// Stage table
// ---------------------------------------------------------------------------

/// A static stage descriptor.
#[derive(Debug, Clone, Copy)]
pub struct Stage {
    pub id: StageId,
    pub description: &'static str,
    pub predicate: Predicate,
    /// Stderr substring marking the stage's tolerated failure. The action
    /// decides which of its commands the signature applies to.
    pub benign_failure: Option<&'static str>,
    /// External tool whose absence skips the stage with a warning.
    pub optional_tool: Option<&'static str>,
}

impl Stage {
    const fn new(id: StageId, description: &'static str, predicate: Predicate) -> Self {
        Self {
            id,
            description,
            predicate,
            benign_failure: None,
            optional_tool: None,
        }
    }

    const fn best_effort(mut self, signature: &'static str) -> Self {
        self.benign_failure = Some(signature);
        self
    }

    const fn needs_tool(mut self, program: &'static str) -> Self {
        self.optional_tool = Some(program);
        self
    }

    pub fn is_best_effort(&self) -> bool {
        self.benign_failure.is_some()
    }

    /// Whether `stderr` is this stage's known-benign failure.
    pub fn is_benign(&self, stderr: &str) -> bool {
        self.benign_failure
            .is_some_and(|sig| stderr.to_lowercase().contains(sig))
    }
}

/// Every stage, in execution order.
pub const STAGES: &[Stage] = &[
    Stage::new(StageId::Packages, "install system packages", Predicate::Always),
    Stage::new(
        StageId::Database,
        "install PostgreSQL and create the database role",
        Predicate::Always,
    )
    .best_effort("already exists"),
    Stage::new(
        StageId::PdfRenderer,
        "install wkhtmltopdf",
        Predicate::Wkhtmltopdf,
    ),
    Stage::new(
        StageId::ServiceUser,
        "create the system user and log directory",
        Predicate::Always,
    ),
    Stage::new(StageId::Source, "clone the community source", Predicate::Always),
    Stage::new(
        StageId::Virtualenv,
        "build the virtual environment",
        Predicate::Always,
    ),
    Stage::new(
        StageId::Enterprise,
        "clone the enterprise addons",
        Predicate::Enterprise,
    ),
    Stage::new(
        StageId::AppConfig,
        "write the application config",
        Predicate::Always,
    ),
    Stage::new(
        StageId::ServiceUnit,
        "write and enable the service unit",
        Predicate::Always,
    ),
    Stage::new(
        StageId::ReverseProxy,
        "install nginx and write the site",
        Predicate::Proxy,
    ),
    Stage::new(StageId::Firewall, "open firewall ports", Predicate::Always).needs_tool("ufw"),
    Stage::new(
        StageId::Tls,
        "request a TLS certificate",
        Predicate::ProxyAndTls,
    ),
    Stage::new(StageId::ServiceStart, "start the service", Predicate::Always),
];

/// The descriptor for `id`. `STAGES` is laid out in declaration order.
pub fn stage(id: StageId) -> &'static Stage {
    &STAGES[id as usize]
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// Operator restriction of which stages run: `only` wins over `skip`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub only: Vec<StageId>,
    pub skip: Vec<StageId>,
}

impl Selection {
    pub fn allows(&self, id: StageId) -> bool {
        if !self.only.is_empty() {
            return self.only.contains(&id);
        }
        !self.skip.contains(&id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use std::path::Path;

    fn cfg(settings: Settings) -> Configuration {
        Configuration::resolve(&settings, Path::new("/")).unwrap()
    }

    fn running(cfg: &Configuration) -> Vec<StageId> {
        STAGES
            .iter()
            .filter(|s| s.predicate.evaluate(cfg) == Decision::Run)
            .map(|s| s.id)
            .collect()
    }

    fn tls_ready() -> Settings {
        Settings {
            domain: "erp.example.test".to_string(),
            admin_email: "ops@example.test".to_string(),
            tls: true,
            enterprise: true,
            ..Default::default()
        }
    }

    #[test]
    fn order_is_fixed() {
        let names: Vec<&str> = StageId::all().map(|s| s.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "packages",
                "database",
                "pdf-renderer",
                "service-user",
                "source",
                "virtualenv",
                "enterprise",
                "app-config",
                "service-unit",
                "reverse-proxy",
                "firewall",
                "tls",
                "service-start",
            ]
        );
    }

    #[test]
    fn table_covers_every_id() {
        for id in StageId::all() {
            assert_eq!(STAGES.iter().filter(|s| s.id == id).count(), 1);
            assert_eq!(stage(id).id, id);
        }
    }

    #[test]
    fn names_roundtrip_through_fromstr() {
        for id in StageId::all() {
            assert_eq!(id.as_str().parse::<StageId>().unwrap(), id);
        }
        assert!("nope".parse::<StageId>().is_err());
    }

    #[test]
    fn only_database_is_best_effort() {
        let best: Vec<StageId> = STAGES
            .iter()
            .filter(|s| s.is_best_effort())
            .map(|s| s.id)
            .collect();
        assert_eq!(best, vec![StageId::Database]);
        assert!(stage(StageId::Database).is_benign("createuser: error: role \"odoo\" already exists"));
        assert!(!stage(StageId::Database).is_benign("could not connect to server"));
    }

    #[test]
    fn all_flags_on_runs_everything() {
        assert_eq!(running(&cfg(tls_ready())), StageId::all().collect::<Vec<_>>());
    }

    /// Each flag removes exactly its own stages and nothing else.
    #[test]
    fn toggling_each_flag_excludes_only_its_stages() {
        let all: Vec<StageId> = StageId::all().collect();
        let without = |excluded: &[StageId]| -> Vec<StageId> {
            all.iter().copied().filter(|s| !excluded.contains(s)).collect()
        };

        let c = cfg(Settings {
            enterprise: false,
            ..tls_ready()
        });
        assert_eq!(running(&c), without(&[StageId::Enterprise]));

        let c = cfg(Settings {
            install_wkhtmltopdf: false,
            ..tls_ready()
        });
        assert_eq!(running(&c), without(&[StageId::PdfRenderer]));

        let c = cfg(Settings {
            tls: false,
            ..tls_ready()
        });
        assert_eq!(running(&c), without(&[StageId::Tls]));

        let c = cfg(Settings {
            proxy: false,
            ..tls_ready()
        });
        assert_eq!(running(&c), without(&[StageId::ReverseProxy, StageId::Tls]));
    }

    #[test]
    fn tls_needs_real_domain_and_email() {
        let c = cfg(Settings {
            domain: "_".to_string(),
            ..tls_ready()
        });
        assert!(matches!(
            Predicate::ProxyAndTls.evaluate(&c),
            Decision::Skip(why) if why.contains("placeholder")
        ));

        let c = cfg(Settings {
            admin_email: crate::settings::PLACEHOLDER_EMAIL.to_string(),
            ..tls_ready()
        });
        assert!(matches!(Predicate::ProxyAndTls.evaluate(&c), Decision::Skip(_)));
    }

    #[test]
    fn selection_only_and_skip() {
        let sel = Selection {
            only: vec![StageId::AppConfig],
            skip: vec![StageId::AppConfig],
        };
        assert!(sel.allows(StageId::AppConfig));
        assert!(!sel.allows(StageId::Packages));

        let sel = Selection {
            only: vec![],
            skip: vec![StageId::Packages],
        };
        assert!(!sel.allows(StageId::Packages));
        assert!(sel.allows(StageId::Database));
        assert!(Selection::default().allows(StageId::Tls));
    }
}
