use crate::actions::{self, ActionOutcome, StageContext, WrittenArtifact};
use crate::config::Configuration;
use crate::error::{ProvisionError, Result};
use crate::exec::CommandExecutor;
use crate::fetch::CredentialPrompt;
use crate::stage::{Decision, Predicate, Selection, Stage, StageId, STAGES};
use serde::Serialize;
use std::time::Instant;

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    AlreadyPresent(String),
    Skipped(String),
    /// A best-effort stage hit its known-benign failure.
    Degraded(String),
    Failed(String),
    /// An earlier stage failed.
    NotReached,
}

impl StageStatus {
    pub fn label(&self) -> &'static str {
        match self {
            StageStatus::Completed => "completed",
            StageStatus::AlreadyPresent(_) => "already present",
            StageStatus::Skipped(_) => "skipped",
            StageStatus::Degraded(_) => "degraded",
            StageStatus::Failed(_) => "failed",
            StageStatus::NotReached => "not reached",
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            StageStatus::AlreadyPresent(d)
            | StageStatus::Skipped(d)
            | StageStatus::Degraded(d)
            | StageStatus::Failed(d) => d,
            StageStatus::Completed | StageStatus::NotReached => "",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub stage: StageId,
    #[serde(flatten)]
    pub status: StageStatus,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub stages: Vec<StageReport>,
    pub artifacts: Vec<WrittenArtifact>,
    pub failed_stage: Option<StageId>,
}

impl RunReport {
    pub fn status_of(&self, id: StageId) -> Option<&StageStatus> {
        self.stages.iter().find(|s| s.stage == id).map(|s| &s.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedStage {
    pub stage: StageId,
    pub description: &'static str,
    #[serde(flatten)]
    pub decision: Decision,
    pub best_effort: bool,
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Executes the stage table in order against one configuration.
pub struct Runner<'a> {
    cfg: &'a Configuration,
    exec: &'a dyn CommandExecutor,
    prompt: &'a mut dyn CredentialPrompt,
    selection: Selection,
}

impl<'a> Runner<'a> {
    pub fn new(
        cfg: &'a Configuration,
        exec: &'a dyn CommandExecutor,
        prompt: &'a mut dyn CredentialPrompt,
    ) -> Self {
        Self {
            cfg,
            exec,
            prompt,
            selection: Selection::default(),
        }
    }

    pub fn with_selection(mut self, selection: Selection) -> Self {
        self.selection = selection;
        self
    }

    /// Whether `stage` would run, and if not, why.
    pub fn decide(&self, stage: &Stage) -> Decision {
        if !self.selection.allows(stage.id) {
            return Decision::Skip("not selected".to_string());
        }
        if let Decision::Skip(why) = stage.predicate.evaluate(self.cfg) {
            return Decision::Skip(why);
        }
        if let Some(tool) = stage.optional_tool {
            if !self.exec.has_tool(tool) {
                return Decision::Skip(format!("{tool} is not installed"));
            }
        }
        Decision::Run
    }

    pub fn plan(&self) -> Vec<PlannedStage> {
        STAGES
            .iter()
            .map(|s| PlannedStage {
                stage: s.id,
                description: s.description,
                decision: self.decide(s),
                best_effort: s.is_best_effort(),
            })
            .collect()
    }

    /// Run every stage in order, recording outcomes in `report`.
    ///
    /// Stops at the first failed stage; the remaining stages are recorded as
    /// not reached. A tolerated failure reported by the action is `Degraded`.
    pub fn run(&mut self, report: &mut RunReport) -> Result<()> {
        for (index, stage) in STAGES.iter().enumerate() {
            let started = Instant::now();
            let status = match self.decide(stage) {
                Decision::Skip(why) => {
                    if self.skip_is_unexpected(stage) {
                        tracing::warn!(stage = %stage.id, "skipped: {why}");
                    } else {
                        tracing::info!(stage = %stage.id, "skipped: {why}");
                    }
                    StageStatus::Skipped(why)
                }
                Decision::Run => {
                    tracing::info!(stage = %stage.id, "{}", stage.description);
                    match self.perform(stage.id, report) {
                        Ok(ActionOutcome::Done) => StageStatus::Completed,
                        Ok(ActionOutcome::AlreadyPresent(note)) => {
                            tracing::info!(stage = %stage.id, "{note}");
                            StageStatus::AlreadyPresent(note)
                        }
                        Ok(ActionOutcome::Degraded(note)) => {
                            tracing::warn!(stage = %stage.id, "ignored benign failure: {note}");
                            StageStatus::Degraded(note)
                        }
                        Err(e) => {
                            tracing::error!(stage = %stage.id, "failed: {e}");
                            report.stages.push(StageReport {
                                stage: stage.id,
                                status: StageStatus::Failed(e.to_string()),
                                duration_ms: elapsed_ms(started),
                            });
                            report.failed_stage = Some(stage.id);
                            report
                                .stages
                                .extend(STAGES[index + 1..].iter().map(|s| StageReport {
                                    stage: s.id,
                                    status: StageStatus::NotReached,
                                    duration_ms: 0,
                                }));
                            return Err(ProvisionError::StageFailed {
                                stage: stage.id.as_str(),
                                source: Box::new(e),
                            });
                        }
                    }
                }
            };
            report.stages.push(StageReport {
                stage: stage.id,
                status,
                duration_ms: elapsed_ms(started),
            });
        }
        Ok(())
    }

    /// A skip the operator's flags and selection did not ask for: a missing
    /// tool, or TLS requested without a usable domain and email.
    fn skip_is_unexpected(&self, stage: &Stage) -> bool {
        let missing_tool = stage
            .optional_tool
            .is_some_and(|tool| !self.exec.has_tool(tool));
        let features = &self.cfg.features;
        let tls_blocked = stage.predicate == Predicate::ProxyAndTls
            && features.proxy
            && features.tls
            && self.cfg.tls_blocker().is_some();
        self.selection.allows(stage.id) && (missing_tool || tls_blocked)
    }

    fn perform(&mut self, id: StageId, report: &mut RunReport) -> Result<ActionOutcome> {
        let mut ctx = StageContext {
            cfg: self.cfg,
            exec: self.exec,
            prompt: &mut *self.prompt,
            artifacts: &mut report.artifacts,
        };
        actions::perform(id, &mut ctx)
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
