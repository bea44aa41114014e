//! What each stage actually does. Every action is written to be re-run
//! safely: probes before creating, overwrites instead of merging.

use crate::config::Configuration;
use crate::error::{ProvisionError, Result};
use crate::exec::{run_checked, CommandExecutor, CommandSpec};
use crate::fetch::{fetch_with_retry, CredentialPrompt, GitClone};
use crate::io;
use crate::paths::NGINX_DEFAULT_SITE;
use crate::stage::{stage, StageId};
use crate::template::{self, Artifact, ArtifactKind};
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const COMMUNITY_REPO: &str = "https://github.com/odoo/odoo";
pub const ENTERPRISE_REPO: &str = "https://github.com/odoo/enterprise";

const PGDG_KEY_URL: &str = "https://www.postgresql.org/media/keys/ACCC4CF8.asc";
const PGDG_LIST: &str = "/etc/apt/sources.list.d/pgdg.list";
const PGDG_KEYRING: &str = "/etc/apt/trusted.gpg.d/pgdg.asc";
const WKHTMLTOX_RELEASE: &str =
    "https://github.com/wkhtmltopdf/packaging/releases/download/0.12.6.1-2";
const WKHTMLTOX_BUILD: &str = "0.12.6.1-2.jammy";
const ENTERPRISE_PY_DEPS: &[&str] = &[
    "num2words",
    "ofxparse",
    "dbfread",
    "ebaysdk",
    "firebase_admin",
    "pyOpenSSL",
];

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Done,
    /// Nothing to do; the note says what was found.
    AlreadyPresent(String),
    /// A tolerated failure; the note is the tool's last stderr line.
    Degraded(String),
}

/// A file written during the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WrittenArtifact {
    pub kind: ArtifactKind,
    /// Path on the target host.
    pub path: PathBuf,
    /// Where it was written on this run's filesystem.
    pub written_to: PathBuf,
}

pub struct StageContext<'a> {
    pub cfg: &'a Configuration,
    pub exec: &'a dyn CommandExecutor,
    pub prompt: &'a mut dyn CredentialPrompt,
    pub artifacts: &'a mut Vec<WrittenArtifact>,
}

impl StageContext<'_> {
    fn run(&self, cmd: CommandSpec) -> Result<()> {
        run_checked(self.exec, &cmd)?;
        Ok(())
    }

    fn probe(&self, cmd: CommandSpec) -> Result<bool> {
        Ok(self.exec.execute(&cmd.probe())?.success())
    }

    fn exists(&self, logical: &Path) -> bool {
        self.cfg.host_path(logical).exists()
    }

    fn chown(&self, path: &Path, recursive: bool) -> Result<()> {
        let owner = format!("{0}:{0}", self.cfg.user);
        let mut cmd = CommandSpec::new("chown");
        if recursive {
            cmd = cmd.arg("-R");
        }
        self.run(cmd.arg(owner).arg(display(path)))
    }

    fn write(&mut self, artifact: Artifact, private: bool) -> Result<PathBuf> {
        let host = self.cfg.host_path(&artifact.path);
        io::atomic_write(&host, artifact.contents.as_bytes())?;
        if private {
            io::set_private_mode(&host)?;
        }
        tracing::info!(path = %artifact.path.display(), "wrote {}", artifact.kind.as_str());
        self.artifacts.retain(|a| a.kind != artifact.kind);
        self.artifacts.push(WrittenArtifact {
            kind: artifact.kind,
            path: artifact.path,
            written_to: host.clone(),
        });
        Ok(host)
    }
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

fn apt() -> CommandSpec {
    CommandSpec::new("apt-get").env("DEBIAN_FRONTEND", "noninteractive")
}

fn apt_install<I, S>(packages: I) -> CommandSpec
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    apt().args(["install", "-y"]).args(packages)
}

fn systemctl(args: &[&str]) -> CommandSpec {
    CommandSpec::new("systemctl").args(args.iter().copied())
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

pub fn perform(id: StageId, ctx: &mut StageContext<'_>) -> Result<ActionOutcome> {
    match id {
        StageId::Packages => packages(ctx),
        StageId::Database => database(ctx),
        StageId::PdfRenderer => pdf_renderer(ctx),
        StageId::ServiceUser => service_user(ctx),
        StageId::Source => source(ctx),
        StageId::Virtualenv => virtualenv(ctx),
        StageId::Enterprise => enterprise(ctx),
        StageId::AppConfig => app_config(ctx),
        StageId::ServiceUnit => service_unit(ctx),
        StageId::ReverseProxy => reverse_proxy(ctx),
        StageId::Firewall => firewall(ctx),
        StageId::Tls => tls(ctx),
        StageId::ServiceStart => service_start(ctx),
    }
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

fn packages(ctx: &mut StageContext<'_>) -> Result<ActionOutcome> {
    ctx.run(apt().arg("update"))?;
    ctx.run(apt().args(["upgrade", "-y"]))?;
    ctx.run(apt_install(ctx.cfg.packages.iter().cloned()))?;
    Ok(ActionOutcome::Done)
}

fn database(ctx: &mut StageContext<'_>) -> Result<ActionOutcome> {
    if ctx.cfg.features.postgresql_16 {
        ctx.run(CommandSpec::new("sh").arg("-c").arg(format!(
            "echo \"deb http://apt.postgresql.org/pub/repos/apt $(lsb_release -cs)-pgdg main\" > {PGDG_LIST}"
        )))?;
        ctx.run(CommandSpec::new("wget").args(["-qO", PGDG_KEYRING, PGDG_KEY_URL]))?;
        ctx.run(apt().arg("update"))?;
        ctx.run(apt_install(["postgresql-16"]))?;
    } else {
        ctx.run(apt_install(["postgresql", "postgresql-server-dev-all"]))?;
    }
    let createuser = CommandSpec::new("su")
        .args(["-", "postgres", "-c"])
        .arg(format!("createuser -s {}", ctx.cfg.user));
    // Only the role creation may fail benignly; the installs above stay fatal.
    match ctx.run(createuser) {
        Ok(()) => Ok(ActionOutcome::Done),
        Err(ProvisionError::CommandFailed { ref stderr, .. })
            if stage(StageId::Database).is_benign(stderr) =>
        {
            let note = stderr.lines().last().unwrap_or_default().to_string();
            Ok(ActionOutcome::Degraded(note))
        }
        Err(e) => Err(e),
    }
}

fn pdf_renderer(ctx: &mut StageContext<'_>) -> Result<ActionOutcome> {
    if ctx.probe(CommandSpec::new("dpkg").args(["-s", "wkhtmltox"]))? {
        return Ok(ActionOutcome::AlreadyPresent(
            "wkhtmltox is already installed".to_string(),
        ));
    }
    let arch = ctx
        .exec
        .execute(&CommandSpec::new("dpkg").arg("--print-architecture"))?
        .stdout
        .trim()
        .to_string();
    let arch = if arch.is_empty() { "amd64".to_string() } else { arch };
    let file = format!("wkhtmltox_{WKHTMLTOX_BUILD}_{arch}.deb");
    let deb = format!("/tmp/{file}");
    ctx.run(CommandSpec::new("wget").args([
        "-q".to_string(),
        "-O".to_string(),
        deb.clone(),
        format!("{WKHTMLTOX_RELEASE}/{file}"),
    ]))?;
    ctx.run(apt_install([deb]))?;
    Ok(ActionOutcome::Done)
}

fn service_user(ctx: &mut StageContext<'_>) -> Result<ActionOutcome> {
    let cfg = ctx.cfg;
    let existed = ctx.probe(CommandSpec::new("id").args(["-u", cfg.user.as_str()]))?;
    if !existed {
        ctx.run(CommandSpec::new("adduser").args([
            "--system".to_string(),
            "--quiet".to_string(),
            "--shell=/bin/bash".to_string(),
            format!("--home={}", cfg.paths.home.display()),
            "--gecos".to_string(),
            "ODOO".to_string(),
            "--group".to_string(),
            cfg.user.clone(),
        ]))?;
    }
    ctx.run(CommandSpec::new("mkdir").arg("-p").arg(display(&cfg.paths.log_dir)))?;
    ctx.chown(&cfg.paths.log_dir, false)?;
    if existed {
        return Ok(ActionOutcome::AlreadyPresent(format!(
            "user {} already exists",
            cfg.user
        )));
    }
    Ok(ActionOutcome::Done)
}

fn source(ctx: &mut StageContext<'_>) -> Result<ActionOutcome> {
    let cfg = ctx.cfg;
    let outcome = if ctx.exists(&cfg.paths.server_dir.join(".git")) {
        ActionOutcome::AlreadyPresent(format!(
            "{} is already a checkout",
            cfg.paths.server_dir.display()
        ))
    } else {
        ctx.run(
            CommandSpec::new("git")
                .args(["clone", "--depth", "1", "--branch", cfg.version.as_str()])
                .arg(COMMUNITY_REPO)
                .arg(display(&cfg.paths.server_dir)),
        )?;
        ActionOutcome::Done
    };
    ctx.run(
        CommandSpec::new("mkdir")
            .arg("-p")
            .arg(display(&cfg.paths.custom_addons)),
    )?;
    ctx.chown(&cfg.paths.home, true)?;
    Ok(outcome)
}

fn virtualenv(ctx: &mut StageContext<'_>) -> Result<ActionOutcome> {
    let paths = &ctx.cfg.paths;
    let pip = display(&paths.venv.join("bin/pip"));
    if !ctx.exists(&paths.venv.join("bin/python3")) {
        ctx.run(
            CommandSpec::new("python3")
                .args(["-m", "venv"])
                .arg(display(&paths.venv)),
        )?;
    }
    ctx.run(CommandSpec::new(pip.as_str()).args(["install", "--upgrade", "pip", "wheel"]))?;
    ctx.run(
        CommandSpec::new(pip.as_str())
            .args(["install", "-r"])
            .arg(display(&paths.server_dir.join("requirements.txt"))),
    )?;
    ctx.chown(&paths.venv, true)?;
    Ok(ActionOutcome::Done)
}

fn enterprise(ctx: &mut StageContext<'_>) -> Result<ActionOutcome> {
    let cfg = ctx.cfg;
    let dest = &cfg.paths.enterprise_addons;
    if ctx.exists(&dest.join(".git")) {
        return Ok(ActionOutcome::AlreadyPresent(format!(
            "{} is already a checkout",
            dest.display()
        )));
    }
    if let Some(parent) = dest.parent() {
        ctx.run(CommandSpec::new("mkdir").arg("-p").arg(display(parent)))?;
    }

    let clone = GitClone {
        url: ENTERPRISE_REPO,
        branch: &cfg.version,
        dest,
    };
    let exec = ctx.exec;
    let report = fetch_with_retry(
        ENTERPRISE_REPO,
        |credentials| clone.run(exec, credentials),
        &mut *ctx.prompt,
        cfg.max_credential_attempts,
    )?;
    tracing::debug!(?report, "enterprise checkout");
    if report.prompts > 0 {
        ctx.run(clone.scrub_command())?;
    }

    let pip = display(&cfg.paths.venv.join("bin/pip"));
    ctx.run(
        CommandSpec::new(pip)
            .arg("install")
            .args(ENTERPRISE_PY_DEPS.iter().copied()),
    )?;
    ctx.run(CommandSpec::new("npm").args(["install", "-g", "less", "less-plugin-clean-css"]))?;
    ctx.chown(&cfg.paths.home, true)?;
    Ok(ActionOutcome::Done)
}

fn app_config(ctx: &mut StageContext<'_>) -> Result<ActionOutcome> {
    let artifact = template::render_app_config(ctx.cfg)?;
    let logical = artifact.path.clone();
    ctx.write(artifact, true)?;
    ctx.chown(&logical, false)?;
    Ok(ActionOutcome::Done)
}

fn service_unit(ctx: &mut StageContext<'_>) -> Result<ActionOutcome> {
    ctx.write(template::render_service_unit(ctx.cfg)?, false)?;
    ctx.run(systemctl(&["daemon-reload"]))?;
    ctx.run(systemctl(&["enable", &ctx.cfg.service_name()]))?;
    Ok(ActionOutcome::Done)
}

fn reverse_proxy(ctx: &mut StageContext<'_>) -> Result<ActionOutcome> {
    let cfg = ctx.cfg;
    ctx.run(apt_install(["nginx"]))?;
    let site = ctx.write(template::render_proxy_site(cfg)?, false)?;
    io::replace_symlink(&site, &cfg.host_path(&cfg.paths.proxy_site_enabled))?;

    // The stock site also listens on :80 with server_name _.
    let default_site = cfg.host_path(Path::new(NGINX_DEFAULT_SITE));
    if default_site.symlink_metadata().is_ok() {
        std::fs::remove_file(&default_site)?;
    }

    ctx.run(CommandSpec::new("nginx").arg("-t"))?;
    ctx.run(systemctl(&["reload", "nginx"]))?;
    Ok(ActionOutcome::Done)
}

/// Ports to open: SSH always, then either the proxy's public ports or the
/// application's own ports when it is exposed directly.
pub fn firewall_ports(cfg: &Configuration) -> Vec<String> {
    let mut ports = vec!["22/tcp".to_string()];
    if cfg.features.proxy {
        ports.push("80/tcp".to_string());
        if cfg.features.tls {
            ports.push("443/tcp".to_string());
        }
    } else {
        ports.push(format!("{}/tcp", cfg.http_port));
        ports.push(format!("{}/tcp", cfg.longpolling_port));
    }
    ports
}

fn firewall(ctx: &mut StageContext<'_>) -> Result<ActionOutcome> {
    for port in firewall_ports(ctx.cfg) {
        ctx.run(CommandSpec::new("ufw").arg("allow").arg(port))?;
    }
    ctx.run(CommandSpec::new("ufw").args(["--force", "enable"]))?;
    Ok(ActionOutcome::Done)
}

fn tls(ctx: &mut StageContext<'_>) -> Result<ActionOutcome> {
    let cfg = ctx.cfg;
    ctx.run(apt_install(["certbot", "python3-certbot-nginx"]))?;
    ctx.run(
        CommandSpec::new("certbot")
            .args(["--nginx", "-d", cfg.domain.as_str()])
            .args(["--non-interactive", "--agree-tos", "--email"])
            .arg(cfg.admin_email.as_str())
            .args(["--redirect", "--keep-until-expiring"]),
    )?;
    Ok(ActionOutcome::Done)
}

fn service_start(ctx: &mut StageContext<'_>) -> Result<ActionOutcome> {
    // restart, so a re-run picks up regenerated config
    ctx.run(systemctl(&["restart", &ctx.cfg.service_name()]))?;
    Ok(ActionOutcome::Done)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::scripted::{failed, ScriptedExecutor};
    use crate::fetch::NoPrompt;
    use crate::settings::Settings;
    use tempfile::TempDir;

    fn cfg(root: &Path, settings: Settings) -> Configuration {
        Configuration::resolve(&settings, root).unwrap()
    }

    fn perform_one(
        id: StageId,
        cfg: &Configuration,
        exec: &ScriptedExecutor,
    ) -> (Result<ActionOutcome>, Vec<WrittenArtifact>) {
        let mut artifacts = Vec::new();
        let mut prompt = NoPrompt;
        let mut ctx = StageContext {
            cfg,
            exec,
            prompt: &mut prompt,
            artifacts: &mut artifacts,
        };
        let out = perform(id, &mut ctx);
        (out, artifacts)
    }

    #[test]
    fn existing_user_is_not_recreated() {
        let dir = TempDir::new().unwrap();
        let cfg = cfg(dir.path(), Settings::default());
        let exec = ScriptedExecutor::new();
        let (out, _) = perform_one(StageId::ServiceUser, &cfg, &exec);
        assert!(matches!(out.unwrap(), ActionOutcome::AlreadyPresent(_)));
        assert!(!exec.ran("adduser"));
        assert!(exec.ran("chown odoo:odoo /var/log/odoo"));
    }

    #[test]
    fn missing_user_is_created() {
        let dir = TempDir::new().unwrap();
        let cfg = cfg(dir.path(), Settings::default());
        let exec = ScriptedExecutor::new().on("id -u odoo", vec![failed(1, "no such user")]);
        let (out, _) = perform_one(StageId::ServiceUser, &cfg, &exec);
        assert_eq!(out.unwrap(), ActionOutcome::Done);
        assert!(exec.ran("adduser --system --quiet --shell=/bin/bash --home=/odoo"));
    }

    #[test]
    fn existing_checkout_is_not_recloned() {
        let dir = TempDir::new().unwrap();
        let cfg = cfg(dir.path(), Settings::default());
        std::fs::create_dir_all(dir.path().join("odoo/odoo-server/.git")).unwrap();
        let exec = ScriptedExecutor::new();
        let (out, _) = perform_one(StageId::Source, &cfg, &exec);
        assert!(matches!(out.unwrap(), ActionOutcome::AlreadyPresent(_)));
        assert!(!exec.ran("git clone"));
    }

    #[test]
    fn fresh_checkout_clones_version_branch() {
        let dir = TempDir::new().unwrap();
        let cfg = cfg(dir.path(), Settings::default());
        let exec = ScriptedExecutor::new();
        perform_one(StageId::Source, &cfg, &exec).0.unwrap();
        assert!(exec.ran(
            "git clone --depth 1 --branch 17.0 https://github.com/odoo/odoo /odoo/odoo-server"
        ));
    }

    #[test]
    fn existing_role_degrades_database_stage() {
        let dir = TempDir::new().unwrap();
        let cfg = cfg(dir.path(), Settings::default());
        let exec = ScriptedExecutor::new().on(
            "createuser",
            vec![failed(1, "createuser: error: role \"odoo\" already exists")],
        );
        let (out, _) = perform_one(StageId::Database, &cfg, &exec);
        assert!(matches!(
            out.unwrap(),
            ActionOutcome::Degraded(note) if note.contains("already exists")
        ));
    }

    #[test]
    fn package_install_failure_mentioning_already_exists_is_fatal() {
        let dir = TempDir::new().unwrap();
        let cfg = cfg(dir.path(), Settings::default());
        let exec = ScriptedExecutor::new().on(
            "install -y postgresql",
            vec![failed(100, "dpkg: error: file '/etc/postgresql' already exists")],
        );
        let (out, _) = perform_one(StageId::Database, &cfg, &exec);
        assert!(matches!(
            out.unwrap_err(),
            ProvisionError::CommandFailed { ref command, .. } if command.contains("apt-get")
        ));
        assert!(!exec.ran("createuser"));
    }

    #[test]
    fn pdf_renderer_uses_host_architecture() {
        let dir = TempDir::new().unwrap();
        let cfg = cfg(dir.path(), Settings::default());
        let exec = ScriptedExecutor::new()
            .on("dpkg -s wkhtmltox", vec![failed(1, "not installed")])
            .on(
                "dpkg --print-architecture",
                vec![crate::exec::CommandOutput {
                    code: Some(0),
                    stdout: "arm64\n".to_string(),
                    stderr: String::new(),
                }],
            );
        perform_one(StageId::PdfRenderer, &cfg, &exec).0.unwrap();
        assert!(exec.ran("wkhtmltox_0.12.6.1-2.jammy_arm64.deb"));
    }

    #[test]
    fn app_config_is_written_under_root() {
        let dir = TempDir::new().unwrap();
        let cfg = cfg(dir.path(), Settings::default());
        let exec = ScriptedExecutor::new();
        let (out, artifacts) = perform_one(StageId::AppConfig, &cfg, &exec);
        out.unwrap();
        let written = dir.path().join("etc/odoo-server.conf");
        assert!(written.exists());
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].path, PathBuf::from("/etc/odoo-server.conf"));
        assert_eq!(artifacts[0].written_to, written);
    }

    #[test]
    fn reverse_proxy_enables_site_and_drops_default() {
        let dir = TempDir::new().unwrap();
        let cfg = cfg(dir.path(), Settings::default());
        let default_site = dir.path().join("etc/nginx/sites-enabled/default");
        std::fs::create_dir_all(default_site.parent().unwrap()).unwrap();
        std::fs::write(&default_site, "server {}").unwrap();

        let exec = ScriptedExecutor::new();
        perform_one(StageId::ReverseProxy, &cfg, &exec).0.unwrap();

        let enabled = dir.path().join("etc/nginx/sites-enabled/odoo");
        assert!(std::fs::read_to_string(&enabled)
            .unwrap()
            .contains("upstream odoo_app"));
        assert!(!default_site.exists());
        assert!(exec.ran("nginx -t"));
        assert!(exec.ran("systemctl reload nginx"));
    }

    #[test]
    fn enterprise_without_prompt_cancels_on_auth_failure() {
        let dir = TempDir::new().unwrap();
        let cfg = cfg(
            dir.path(),
            Settings {
                enterprise: true,
                ..Default::default()
            },
        );
        let exec = ScriptedExecutor::new().on(
            "git clone",
            vec![failed(128, "fatal: Authentication failed")],
        );
        let (out, _) = perform_one(StageId::Enterprise, &cfg, &exec);
        assert!(matches!(
            out.unwrap_err(),
            crate::error::ProvisionError::CredentialsCancelled
        ));
        assert!(!exec.ran("npm install"));
    }

    #[test]
    fn anonymous_enterprise_clone_leaves_remote_alone() {
        let dir = TempDir::new().unwrap();
        let cfg = cfg(
            dir.path(),
            Settings {
                enterprise: true,
                ..Default::default()
            },
        );
        let exec = ScriptedExecutor::new();
        let (out, _) = perform_one(StageId::Enterprise, &cfg, &exec);
        assert_eq!(out.unwrap(), ActionOutcome::Done);
        assert_eq!(exec.count("git clone"), 1);
        assert!(!exec.ran("remote set-url"));
    }

    #[test]
    fn firewall_ports_depend_on_proxy() {
        let dir = TempDir::new().unwrap();
        let with_proxy = cfg(dir.path(), Settings::default());
        assert_eq!(firewall_ports(&with_proxy), vec!["22/tcp", "80/tcp"]);

        let direct = cfg(
            dir.path(),
            Settings {
                proxy: false,
                ..Default::default()
            },
        );
        assert_eq!(
            firewall_ports(&direct),
            vec!["22/tcp", "8069/tcp", "8072/tcp"]
        );
    }
}
