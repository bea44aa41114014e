pub mod config;
pub mod plan;
pub mod render;
pub mod run;

use anyhow::Context;
use provision_core::config::Configuration;
use provision_core::settings::{Settings, SettingsOverrides};
use std::path::Path;

/// Layer defaults, the settings file and overrides, then validate.
pub fn resolve(
    config: Option<&Path>,
    root: &Path,
    overrides: &SettingsOverrides,
) -> anyhow::Result<Configuration> {
    let settings = Settings::layered(config, overrides).with_context(|| match config {
        Some(p) => format!("failed to load settings from {}", p.display()),
        None => "failed to build settings".to_string(),
    })?;
    let cfg = Configuration::resolve(&settings, root)?;
    tracing::debug!(?cfg, "resolved configuration");
    Ok(cfg)
}
