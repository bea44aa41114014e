use crate::output::{print_json, print_summary};
use crate::prompt::TerminalPrompt;
use anyhow::Context;
use provision_core::config::Configuration;
use provision_core::exec::{CommandExecutor, SimulatedExecutor, SystemExecutor};
use provision_core::report::Summary;
use provision_core::runner::{RunReport, Runner};
use provision_core::stage::{Selection, StageId};
use std::path::Path;

pub fn run(
    cfg: &Configuration,
    simulate: bool,
    only: Vec<StageId>,
    skip: Vec<StageId>,
    json: bool,
) -> anyhow::Result<()> {
    // Real commands act on the real host, so their files must land there too.
    if !simulate && cfg.root != Path::new("/") {
        anyhow::bail!(
            "--root {} is only allowed together with --simulate",
            cfg.root.display()
        );
    }

    let executor: Box<dyn CommandExecutor> = if simulate {
        Box::new(SimulatedExecutor)
    } else {
        Box::new(SystemExecutor::new(cfg.command_timeout).context("failed to start the command runtime")?)
    };
    let mut prompt = TerminalPrompt::default();
    let mut report = RunReport::default();

    let result = Runner::new(cfg, executor.as_ref(), &mut prompt)
        .with_selection(Selection { only, skip })
        .run(&mut report);

    let summary = Summary::new(cfg, report);
    if summary.reveals_secret() {
        tracing::warn!("the summary below prints the generated admin secret in plaintext");
    }
    if json {
        print_json(&summary)?;
    } else {
        print_summary(&summary);
    }

    result.context("provisioning aborted")
}
