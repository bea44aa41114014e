use crate::output::{print_json, print_pairs};
use clap::Subcommand;
use provision_core::config::Configuration;
use provision_core::report::ConfigSummary;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Print the resolved configuration
    Show,

    /// Validate the configuration and report every problem
    Validate,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Resolution already validated `cfg`; an invalid configuration never
/// reaches this point.
pub fn run(cfg: &Configuration, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Show => show(cfg, json),
        ConfigSubcommand::Validate => validate(cfg, json),
    }
}

fn show(cfg: &Configuration, json: bool) -> anyhow::Result<()> {
    let summary = ConfigSummary::from_config(cfg);
    if json {
        print_json(&summary)
    } else {
        print_pairs(summary.rows());
        Ok(())
    }
}

fn validate(cfg: &Configuration, json: bool) -> anyhow::Result<()> {
    let tls_warning = match (cfg.features.proxy && cfg.features.tls, cfg.tls_blocker()) {
        (true, Some(why)) => Some(format!("tls will be skipped: {why}")),
        _ => None,
    };

    if json {
        return print_json(&serde_json::json!({
            "valid": true,
            "warnings": tls_warning.iter().collect::<Vec<_>>(),
        }));
    }

    if let Some(w) = &tls_warning {
        println!("warning: {w}");
    }
    println!("configuration is valid");
    Ok(())
}
