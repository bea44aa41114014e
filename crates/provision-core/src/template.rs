//! The three generated artifacts: application config, service unit and
//! nginx site. Templates use `{{name}}` placeholders; rendering refuses to
//! emit a file with any placeholder left over.

use crate::config::Configuration;
use crate::error::{ProvisionError, Result};
use regex::Regex;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::OnceLock;

const APP_CONFIG_TEMPLATE: &str = "\
[options]
; Generated by odoo-provision. Overwritten on every run.
admin_passwd = {{admin_passwd}}
{{http_port_key}} = {{http_port}}
longpolling_port = {{longpolling_port}}
logfile = {{logfile}}
log_level = info
proxy_mode = {{proxy_mode}}
addons_path = {{addons_path}}
";

const SERVICE_UNIT_TEMPLATE: &str = "\
[Unit]
Description=Odoo {{version}} ({{service}})
Requires=postgresql.service
After=network.target postgresql.service

[Service]
Type=simple
SyslogIdentifier={{service}}
User={{user}}
Group={{user}}
WorkingDirectory={{server_dir}}
ExecStart={{venv}}/bin/python3 {{server_dir}}/odoo-bin -c {{config_file}}
Restart=always
RestartSec=5
StandardOutput=journal+console
NoNewPrivileges=true
PrivateTmp=true
ProtectSystem=full
ProtectHome=true

[Install]
WantedBy=multi-user.target
";

const PROXY_SITE_TEMPLATE: &str = "\
# Generated by odoo-provision. Overwritten on every run.
upstream {{user}}_app {
    server 127.0.0.1:{{http_port}};
}

upstream {{user}}_chat {
    server 127.0.0.1:{{longpolling_port}};
}

map $http_upgrade $connection_upgrade {
    default upgrade;
    ''      close;
}

server {
    listen 80;
    server_name {{domain}};

    client_max_body_size 200m;
    proxy_read_timeout 720s;
    proxy_connect_timeout 720s;
    proxy_send_timeout 720s;

    proxy_set_header Host $host;
    proxy_set_header X-Forwarded-Host $host;
    proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
    proxy_set_header X-Forwarded-Proto $scheme;
    proxy_set_header X-Real-IP $remote_addr;

    access_log /var/log/nginx/{{user}}-access.log;
    error_log /var/log/nginx/{{user}}-error.log;

    gzip on;
    gzip_min_length 1000;
    gzip_types text/css text/scss text/plain text/xml application/xml application/json application/javascript;

    location / {
        proxy_redirect off;
        proxy_pass http://{{user}}_app;
    }

    location /longpolling {
        proxy_pass http://{{user}}_chat;
    }

    location /websocket {
        proxy_pass http://{{user}}_chat;
        proxy_set_header Upgrade $http_upgrade;
        proxy_set_header Connection $connection_upgrade;
    }

    location ~* /web/static/ {
        proxy_cache_valid 200 90m;
        proxy_buffering on;
        expires 864000;
        proxy_pass http://{{user}}_app;
    }
}
";

// ---------------------------------------------------------------------------
// Artifact
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    AppConfig,
    ServiceUnit,
    ProxySite,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::AppConfig => "app_config",
            ArtifactKind::ServiceUnit => "service_unit",
            ArtifactKind::ProxySite => "proxy_site",
        }
    }
}

/// A rendered file and the host path it belongs at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub contents: String,
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

static PLACEHOLDER_RE: OnceLock<Regex> = OnceLock::new();

fn placeholder_re() -> &'static Regex {
    PLACEHOLDER_RE.get_or_init(|| Regex::new(r"\{\{\s*([a-z_]+)\s*\}\}").unwrap())
}

/// Substitute `vars` into `template`. A placeholder with no value is an error.
pub fn render(name: &'static str, template: &str, vars: &[(&str, String)]) -> Result<String> {
    let mut missing = None;
    let out = placeholder_re().replace_all(template, |caps: &regex::Captures<'_>| {
        let key = &caps[1];
        match vars.iter().find(|(k, _)| *k == key) {
            Some((_, v)) => v.clone(),
            None => {
                missing.get_or_insert_with(|| key.to_string());
                String::new()
            }
        }
    });
    if let Some(placeholder) = missing {
        return Err(ProvisionError::UnresolvedPlaceholder {
            template: name,
            placeholder,
        });
    }
    Ok(out.into_owned())
}

/// Enterprise addons first so they override community modules.
pub fn addons_path(cfg: &Configuration) -> String {
    let mut dirs = Vec::with_capacity(3);
    if cfg.features.enterprise {
        dirs.push(cfg.paths.enterprise_addons.display().to_string());
    }
    dirs.push(cfg.paths.community_addons().display().to_string());
    dirs.push(cfg.paths.custom_addons.display().to_string());
    dirs.join(",")
}

pub fn render_app_config(cfg: &Configuration) -> Result<Artifact> {
    // Odoo before 12 called the main port xmlrpc_port.
    let http_port_key = if cfg.version_major < 12 {
        "xmlrpc_port"
    } else {
        "http_port"
    };
    let proxy_mode = if cfg.features.proxy { "True" } else { "False" };
    let contents = render(
        "app_config",
        APP_CONFIG_TEMPLATE,
        &[
            ("admin_passwd", cfg.admin_secret.expose().to_string()),
            ("http_port_key", http_port_key.to_string()),
            ("http_port", cfg.http_port.to_string()),
            ("longpolling_port", cfg.longpolling_port.to_string()),
            ("logfile", cfg.paths.log_file.display().to_string()),
            ("proxy_mode", proxy_mode.to_string()),
            ("addons_path", addons_path(cfg)),
        ],
    )?;
    Ok(Artifact {
        kind: ArtifactKind::AppConfig,
        path: cfg.paths.config_file.clone(),
        contents,
    })
}

pub fn render_service_unit(cfg: &Configuration) -> Result<Artifact> {
    let contents = render(
        "service_unit",
        SERVICE_UNIT_TEMPLATE,
        &[
            ("version", cfg.version.clone()),
            ("service", cfg.service_name()),
            ("user", cfg.user.clone()),
            ("server_dir", cfg.paths.server_dir.display().to_string()),
            ("venv", cfg.paths.venv.display().to_string()),
            ("config_file", cfg.paths.config_file.display().to_string()),
        ],
    )?;
    Ok(Artifact {
        kind: ArtifactKind::ServiceUnit,
        path: cfg.paths.service_unit.clone(),
        contents,
    })
}

pub fn render_proxy_site(cfg: &Configuration) -> Result<Artifact> {
    let contents = render(
        "proxy_site",
        PROXY_SITE_TEMPLATE,
        &[
            ("user", cfg.user.clone()),
            ("http_port", cfg.http_port.to_string()),
            ("longpolling_port", cfg.longpolling_port.to_string()),
            ("domain", cfg.domain.clone()),
        ],
    )?;
    Ok(Artifact {
        kind: ArtifactKind::ProxySite,
        path: cfg.paths.proxy_site.clone(),
        contents,
    })
}

/// Every artifact this configuration produces; the proxy site only when the
/// proxy is enabled.
pub fn render_all(cfg: &Configuration) -> Result<Vec<Artifact>> {
    let mut out = vec![render_app_config(cfg)?, render_service_unit(cfg)?];
    if cfg.features.proxy {
        out.push(render_proxy_site(cfg)?);
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
