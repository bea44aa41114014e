mod cmd;
mod output;
mod prompt;

use clap::{Args, Parser, Subcommand};
use cmd::config::ConfigSubcommand;
use provision_core::settings::SettingsOverrides;
use provision_core::stage::StageId;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "odoo-provision",
    about = "Provision a Debian/Ubuntu host with Odoo, PostgreSQL and an nginx reverse proxy",
    version,
    propagate_version = true
)]
struct Cli {
    /// Settings file (YAML)
    #[arg(long, short = 'c', global = true, env = "ODOO_PROVISION_CONFIG")]
    config: Option<PathBuf>,

    /// Filesystem prefix generated files are written under
    #[arg(long, global = true, env = "ODOO_PROVISION_ROOT", default_value = "/")]
    root: PathBuf,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(flatten)]
    overrides: OverrideArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Per-field overrides layered over the settings file.
#[derive(Args)]
struct OverrideArgs {
    /// System user that owns and runs the instance
    #[arg(long, global = true, env = "ODOO_PROVISION_USER")]
    user: Option<String>,

    /// Main HTTP port
    #[arg(long, global = true, env = "ODOO_PROVISION_HTTP_PORT")]
    http_port: Option<u32>,

    /// Long-polling (chat) port
    #[arg(long, global = true, env = "ODOO_PROVISION_LONGPOLLING_PORT")]
    longpolling_port: Option<u32>,

    /// Odoo release branch, e.g. 17.0
    #[arg(long, global = true, env = "ODOO_PROVISION_VERSION")]
    odoo_version: Option<String>,

    /// Install the enterprise addons
    #[arg(long, global = true, env = "ODOO_PROVISION_ENTERPRISE", value_name = "BOOL")]
    enterprise: Option<bool>,

    /// Install and configure nginx
    #[arg(long, global = true, env = "ODOO_PROVISION_PROXY", value_name = "BOOL")]
    proxy: Option<bool>,

    /// Request a certificate for the domain
    #[arg(long, global = true, env = "ODOO_PROVISION_TLS", value_name = "BOOL")]
    tls: Option<bool>,

    /// Install wkhtmltopdf for PDF reports
    #[arg(long, global = true, env = "ODOO_PROVISION_WKHTMLTOPDF", value_name = "BOOL")]
    wkhtmltopdf: Option<bool>,

    /// Install PostgreSQL 16 from the PGDG repository
    #[arg(long, global = true, env = "ODOO_PROVISION_POSTGRESQL_16", value_name = "BOOL")]
    postgresql_16: Option<bool>,

    /// Contact address for certificate registration
    #[arg(long, global = true, env = "ODOO_PROVISION_EMAIL")]
    email: Option<String>,

    /// Public domain name (`_` for none)
    #[arg(long, global = true, env = "ODOO_PROVISION_DOMAIN")]
    domain: Option<String>,

    /// Literal database manager password (used when generation is off)
    #[arg(long, global = true, env = "ODOO_PROVISION_ADMIN_SECRET", hide_env_values = true)]
    admin_secret: Option<String>,

    /// Generate a random database manager password
    #[arg(long, global = true, env = "ODOO_PROVISION_GENERATE_SECRET", value_name = "BOOL")]
    generate_secret: Option<bool>,

    /// Credential prompts allowed for the enterprise clone
    #[arg(long, global = true, env = "ODOO_PROVISION_MAX_CREDENTIAL_ATTEMPTS")]
    max_credential_attempts: Option<u32>,

    /// Per-command timeout in seconds
    #[arg(long, global = true, env = "ODOO_PROVISION_COMMAND_TIMEOUT", value_name = "SECS")]
    command_timeout: Option<u64>,
}

impl OverrideArgs {
    fn into_overrides(self) -> SettingsOverrides {
        SettingsOverrides {
            user: self.user,
            http_port: self.http_port,
            longpolling_port: self.longpolling_port,
            version: self.odoo_version,
            enterprise: self.enterprise,
            proxy: self.proxy,
            tls: self.tls,
            install_wkhtmltopdf: self.wkhtmltopdf,
            postgresql_16: self.postgresql_16,
            admin_email: self.email,
            domain: self.domain,
            admin_secret: self.admin_secret,
            generate_secret: self.generate_secret,
            max_credential_attempts: self.max_credential_attempts,
            command_timeout_secs: self.command_timeout,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Execute the provisioning stages, then print a summary
    Run {
        /// Log commands instead of executing them; files are still written under --root
        #[arg(long)]
        simulate: bool,

        /// Run only these stages (comma-separated)
        #[arg(long, value_delimiter = ',', value_name = "STAGE")]
        only: Vec<StageId>,

        /// Skip these stages (comma-separated)
        #[arg(long, value_delimiter = ',', value_name = "STAGE")]
        skip: Vec<StageId>,
    },

    /// Show which stages would run and why others would be skipped
    Plan,

    /// Render the generated files without provisioning anything
    Render {
        /// Write the files into this directory instead of printing them
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Inspect the resolved configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Run { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let overrides = cli.overrides.into_overrides();
    let result = cmd::resolve(cli.config.as_deref(), &cli.root, &overrides).and_then(|cfg| {
        match cli.command {
            Commands::Run {
                simulate,
                only,
                skip,
            } => cmd::run::run(&cfg, simulate, only, skip, cli.json),
            Commands::Plan => cmd::plan::run(&cfg, cli.json),
            Commands::Render { out } => cmd::render::run(&cfg, out.as_deref(), cli.json),
            Commands::Config { subcommand } => cmd::config::run(&cfg, subcommand, cli.json),
        }
    });

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_tree_has_no_conflicting_arguments() {
        Cli::command().debug_assert();
    }

    #[test]
    fn odoo_version_is_separate_from_binary_version() {
        let cli =
            Cli::try_parse_from(["odoo-provision", "--odoo-version", "16.0", "plan"]).unwrap();
        assert_eq!(cli.overrides.odoo_version.as_deref(), Some("16.0"));
        assert!(matches!(cli.command, Commands::Plan));
    }
}
