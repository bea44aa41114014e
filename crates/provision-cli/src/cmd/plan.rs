use crate::output::{print_json, print_table};
use provision_core::config::Configuration;
use provision_core::exec::SystemExecutor;
use provision_core::fetch::NoPrompt;
use provision_core::runner::Runner;
use provision_core::stage::Decision;

pub fn run(cfg: &Configuration, json: bool) -> anyhow::Result<()> {
    // Only used for tool detection; nothing is executed.
    let exec = SystemExecutor::new(cfg.command_timeout)?;
    let mut prompt = NoPrompt;
    let plan = Runner::new(cfg, &exec, &mut prompt).plan();

    if json {
        return print_json(&plan);
    }

    let rows = plan
        .iter()
        .map(|p| {
            let (decision, reason) = match &p.decision {
                Decision::Run => ("run", String::new()),
                Decision::Skip(why) => ("skip", why.clone()),
            };
            vec![
                p.stage.to_string(),
                decision.to_string(),
                p.description.to_string(),
                reason,
            ]
        })
        .collect();
    print_table(&["STAGE", "DECISION", "ACTION", "REASON"], rows);
    Ok(())
}
