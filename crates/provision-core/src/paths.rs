use serde::Serialize;
use std::path::{Component, Path, PathBuf};

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const ETC_DIR: &str = "/etc";
pub const LOG_DIR: &str = "/var/log";
pub const SYSTEMD_UNIT_DIR: &str = "/etc/systemd/system";
pub const NGINX_AVAILABLE_DIR: &str = "/etc/nginx/sites-available";
pub const NGINX_ENABLED_DIR: &str = "/etc/nginx/sites-enabled";
pub const NGINX_DEFAULT_SITE: &str = "/etc/nginx/sites-enabled/default";

// ---------------------------------------------------------------------------
// InstallPaths
// ---------------------------------------------------------------------------

/// Every location the provisioner installs into, as seen on the target host.
///
/// These are the paths written into generated files and passed to external
/// commands. Use [`host_path`] to find where they live under a non-`/` root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallPaths {
    pub home: PathBuf,
    pub server_dir: PathBuf,
    pub venv: PathBuf,
    pub custom_addons: PathBuf,
    pub enterprise_addons: PathBuf,
    pub config_file: PathBuf,
    pub log_dir: PathBuf,
    pub log_file: PathBuf,
    pub service_unit: PathBuf,
    pub proxy_site: PathBuf,
    pub proxy_site_enabled: PathBuf,
}

impl InstallPaths {
    pub fn for_user(user: &str) -> Self {
        let home = PathBuf::from("/").join(user);
        let service = service_name(user);
        let server_dir = home.join(&service);
        let log_dir = Path::new(LOG_DIR).join(user);
        Self {
            venv: home.join("venv"),
            custom_addons: home.join("custom/addons"),
            enterprise_addons: home.join("enterprise/addons"),
            config_file: Path::new(ETC_DIR).join(format!("{service}.conf")),
            log_file: log_dir.join(format!("{service}.log")),
            service_unit: Path::new(SYSTEMD_UNIT_DIR).join(format!("{service}.service")),
            proxy_site: Path::new(NGINX_AVAILABLE_DIR).join(user),
            proxy_site_enabled: Path::new(NGINX_ENABLED_DIR).join(user),
            server_dir,
            log_dir,
            home,
        }
    }

    /// Addons directories shipped with the community checkout.
    pub fn community_addons(&self) -> PathBuf {
        self.server_dir.join("addons")
    }
}

/// Name of the service unit (without `.service`) and of the server checkout.
pub fn service_name(user: &str) -> String {
    format!("{user}-server")
}

/// Map an absolute host path under `root`. With `root == "/"` this is identity.
pub fn host_path(root: &Path, logical: &Path) -> PathBuf {
    let relative: PathBuf = logical
        .components()
        .filter(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
        .collect();
    root.join(relative)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
