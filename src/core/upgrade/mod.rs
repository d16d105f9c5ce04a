//! Linear, resumable release upgrades.
//!
//! The sequencer walks the deployment one transition at a time from its
//! recorded release towards [`Release::LATEST`]. A transition runs its
//! built-in steps, then any steps plugins add through `upgrade:steps`. Each
//! finished step is marked in the persisted state before the next starts, and
//! the release only advances once every step of the transition succeeded.

pub mod release;
pub mod state;
pub mod steps;

use serde::Serialize;
use std::path::Path;

use crate::env::EnvRenderer;
use crate::error::{Error, Result, UpgradeStepFailedDetails};
use crate::hooks::catalog::{self, ReleaseCompleted};
use crate::hooks::HookRegistry;
use crate::runner::TaskRunner;

pub use release::Release;
pub use state::DeploymentState;
pub use steps::{StepOutcome, UpgradeContext, UpgradeStep};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Applied,
    Skipped,
    AlreadyDone,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub id: String,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransitionReport {
    pub from: Release,
    pub to: Release,
    pub steps: Vec<StepReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpgradeReport {
    pub from: Release,
    pub release: Release,
    pub transitions: Vec<TransitionReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedTransition {
    pub from: Release,
    pub to: Release,
    pub steps: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub completed: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpgradePlan {
    pub current: Release,
    pub target: Release,
    pub transitions: Vec<PlannedTransition>,
}

pub struct Sequencer<'a> {
    hooks: &'a HookRegistry,
    runner: &'a dyn TaskRunner,
    renderer: &'a dyn EnvRenderer,
}

impl<'a> Sequencer<'a> {
    pub fn new(
        hooks: &'a HookRegistry,
        runner: &'a dyn TaskRunner,
        renderer: &'a dyn EnvRenderer,
    ) -> Self {
        Self {
            hooks,
            runner,
            renderer,
        }
    }

    fn root(&self) -> &Path {
        self.runner.root()
    }

    /// Persisted state, or a fresh one at `from` when nothing is recorded.
    /// Once a release is recorded, `from` may only repeat it: moving the
    /// deployment backwards or past pending transitions is rejected.
    pub fn resolve_state(&self, from: Option<Release>) -> Result<DeploymentState> {
        let persisted = state::load(self.root())?;
        match (from, persisted) {
            (Some(from), Some(existing)) if existing.release == from => Ok(existing),
            (Some(from), Some(existing)) => Err(Error::validation_invalid_argument(
                "from",
                format!(
                    "deployment is recorded at '{}'; --from must match it",
                    existing.release
                ),
                Some(existing.release.to_string()),
                Some(vec![from.to_string()]),
            )
            .with_hint(format!(
                "Run the upgrade without --from to continue from {}",
                existing.release
            ))),
            (Some(from), None) => Ok(DeploymentState::new(from)),
            (None, Some(existing)) => Ok(existing),
            (None, None) => Err(Error::validation_missing_argument(vec!["--from".to_string()])
                .with_hint("No release is recorded for this deployment yet; pass --from <release>")),
        }
    }

    /// Steps of the transition ending at `to`: built-ins first, then plugins.
    pub fn steps_for(&self, to: Release) -> Result<Vec<UpgradeStep>> {
        let mut steps = steps::builtin(to);
        steps.extend(self.hooks.apply(&catalog::UPGRADE_STEPS, Vec::new(), &to)?);
        Ok(steps)
    }

    pub fn plan(&self, from: Option<Release>) -> Result<UpgradePlan> {
        let state = self.resolve_state(from)?;
        let mut transitions = Vec::new();
        let mut current = state.release;
        while let Some(to) = current.next() {
            let steps: Vec<String> = self.steps_for(to)?.into_iter().map(|s| s.id).collect();
            let completed = if current == state.release {
                state.completed_steps.clone()
            } else {
                Vec::new()
            };
            transitions.push(PlannedTransition {
                from: current,
                to,
                steps,
                completed,
            });
            current = to;
        }
        Ok(UpgradePlan {
            current: state.release,
            target: Release::LATEST,
            transitions,
        })
    }

    pub fn upgrade(&self, from: Option<Release>) -> Result<UpgradeReport> {
        let mut state = self.resolve_state(from)?;
        state::save(self.root(), &state)?;

        let config = self.runner.config().clone();
        let mut ctx = UpgradeContext {
            root: self.runner.root(),
            config: &config,
            runner: self.runner,
            renderer: self.renderer,
            messages: Vec::new(),
        };

        let started_at = state.release;
        let mut transitions = Vec::new();
        if started_at.is_latest() {
            log_status!("upgrade", "Already at {}; nothing to upgrade", started_at);
        }

        while let Some(to) = state.release.next() {
            let from_release = state.release;
            log_status!("upgrade", "Upgrading from {} to {}", from_release, to);

            let mut reports = Vec::new();
            for step in self.steps_for(to)? {
                if state.is_completed(&step.id) {
                    tracing::debug!(step = %step.id, "step already completed");
                    reports.push(StepReport {
                        id: step.id,
                        status: StepStatus::AlreadyDone,
                        reason: None,
                    });
                    continue;
                }

                tracing::debug!(from = %from_release, to = %to, step = %step.id, "running upgrade step");
                let outcome = step.run(&mut ctx).map_err(|cause| {
                    Error::upgrade_step_failed(UpgradeStepFailedDetails {
                        from: from_release.to_string(),
                        to: to.to_string(),
                        step: step.id.clone(),
                        current_release: state.release.to_string(),
                        cause: cause.to_cause(),
                    })
                })?;

                state.mark_completed(&step.id);
                state::save(self.root(), &state)?;

                reports.push(match outcome {
                    StepOutcome::Applied => StepReport {
                        id: step.id,
                        status: StepStatus::Applied,
                        reason: None,
                    },
                    StepOutcome::Skipped(reason) => {
                        log_status!("upgrade", "Skipped {}: {}", step.id, reason);
                        StepReport {
                            id: step.id,
                            status: StepStatus::Skipped,
                            reason: Some(reason),
                        }
                    }
                });
            }

            state.advance(to);
            state::save(self.root(), &state)?;
            transitions.push(TransitionReport {
                from: from_release,
                to,
                steps: reports,
            });

            self.hooks.notify(
                &catalog::UPGRADE_RELEASE_COMPLETED,
                &ReleaseCompleted {
                    from: from_release,
                    to,
                },
            )?;
        }

        Ok(UpgradeReport {
            from: started_at,
            release: state.release,
            transitions,
            messages: ctx.messages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::defaults;
    use crate::env::SnapshotRenderer;
    use crate::hooks::priority;
    use crate::process::testing::ScriptedProcess;
    use crate::process::CommandOutput;
    use crate::runner::{ComposeFlavor, ComposeTaskRunner};
    use std::cell::RefCell;
    use std::rc::Rc;
    use tempfile::TempDir;

    fn config() -> Config {
        Config::from_map(defaults::values())
            .with("MYSQL_ROOT_PASSWORD", "TopSecret42")
            .with(defaults::RUN_MONGODB, false)
    }

    fn compose<'h>(
        hooks: &'h HookRegistry,
        process: Rc<ScriptedProcess>,
        root: &Path,
    ) -> ComposeTaskRunner<'h> {
        process.on(
            "ps --status running",
            CommandOutput::ok("mysql\nlms\ncms\n"),
        );
        ComposeTaskRunner::new(hooks, process, root, config(), ComposeFlavor::Local).unwrap()
    }

    #[test]
    fn upgrade_without_recorded_release_needs_from() {
        let dir = TempDir::new().unwrap();
        let hooks = HookRegistry::new();
        let runner = compose(&hooks, Rc::new(ScriptedProcess::new()), dir.path());
        let err = Sequencer::new(&hooks, &runner, &SnapshotRenderer)
            .upgrade(None)
            .unwrap_err();
        assert_eq!(err.code.as_str(), "validation.missing_argument");
    }

    #[test]
    fn plan_lists_pending_transitions_without_running() {
        let dir = TempDir::new().unwrap();
        let hooks = HookRegistry::new();
        catalog::declare_all(&hooks).unwrap();
        let process = Rc::new(ScriptedProcess::new());
        let runner = compose(&hooks, process.clone(), dir.path());

        let plan = Sequencer::new(&hooks, &runner, &SnapshotRenderer)
            .plan(Some(Release::Nutmeg))
            .unwrap();
        assert_eq!(plan.transitions.len(), 2);
        assert_eq!(plan.transitions[0].steps, vec!["lms-compute-grades", "cms-backfill-blocks"]);
        assert!(process.calls().is_empty());
        assert!(state::load(dir.path()).unwrap().is_none());
    }

    #[test]
    fn latest_release_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let hooks = HookRegistry::new();
        catalog::declare_all(&hooks).unwrap();
        let process = Rc::new(ScriptedProcess::new());
        let runner = compose(&hooks, process.clone(), dir.path());

        let report = Sequencer::new(&hooks, &runner, &SnapshotRenderer)
            .upgrade(Some(Release::Palm))
            .unwrap();
        assert!(report.transitions.is_empty());
        assert!(process.calls().is_empty());
    }

    #[test]
    fn failing_step_keeps_release_and_completed_markers() {
        let dir = TempDir::new().unwrap();
        let hooks = HookRegistry::new();
        catalog::declare_all(&hooks).unwrap();
        let process = Rc::new(ScriptedProcess::new());
        let runner = compose(&hooks, process.clone(), dir.path());
        process.once("backfill_course_outlines", CommandOutput::failed(2, ""));

        let sequencer = Sequencer::new(&hooks, &runner, &SnapshotRenderer);
        let err = sequencer.upgrade(Some(Release::Nutmeg)).unwrap_err();
        assert_eq!(err.code.as_str(), "upgrade.step_failed");
        assert_eq!(err.details["step"], "cms-backfill-blocks");
        assert_eq!(err.details["currentRelease"], "nutmeg");
        assert_eq!(err.details["cause"]["code"], "job.failed");

        let saved = state::load(dir.path()).unwrap().unwrap();
        assert_eq!(saved.release, Release::Nutmeg);
        assert_eq!(saved.completed_steps, vec!["lms-compute-grades"]);

        // Resuming skips the finished step.
        let report = sequencer.upgrade(None).unwrap();
        assert_eq!(report.release, Release::Palm);
        assert_eq!(report.transitions[0].steps[0].status, StepStatus::AlreadyDone);
        assert_eq!(process.count_matching("compute_grades"), 1);
    }

    #[test]
    fn mysql_password_stays_out_of_failure_details() {
        let dir = TempDir::new().unwrap();
        let hooks = HookRegistry::new();
        catalog::declare_all(&hooks).unwrap();
        let process = Rc::new(ScriptedProcess::new());
        let runner = compose(&hooks, process.clone(), dir.path());
        process.once("mysql_upgrade", CommandOutput::failed(1, "access denied"));

        let err = Sequencer::new(&hooks, &runner, &SnapshotRenderer)
            .upgrade(Some(Release::Juniper))
            .unwrap_err();
        assert_eq!(err.details["step"], "mysql-5.7");
        assert_eq!(err.details["cause"]["code"], "backend.command_failed");

        let details = err.details.to_string();
        assert!(details.contains("$MYSQL_ROOT_PASSWORD"));
        assert!(!details.contains("TopSecret42"));
        assert!(process.lines().iter().all(|l| !l.contains("TopSecret42")));
    }

    #[test]
    fn plugin_steps_run_after_builtins_and_completion_is_notified() {
        let dir = TempDir::new().unwrap();
        let hooks = HookRegistry::new();
        catalog::declare_all(&hooks).unwrap();
        let log = Rc::new(RefCell::new(Vec::new()));
        {
            let log = log.clone();
            hooks
                .add_filter(&catalog::UPGRADE_STEPS, priority::DEFAULT, move |_, mut steps, to| {
                    if *to == Release::Palm {
                        let log = log.clone();
                        steps.push(UpgradeStep::new("plugin-step", move |_| {
                            log.borrow_mut().push("plugin-step".to_string());
                            Ok(StepOutcome::Applied)
                        }));
                    }
                    Ok(steps)
                })
                .unwrap();
        }
        {
            let log = log.clone();
            hooks
                .add_action(&catalog::UPGRADE_RELEASE_COMPLETED, priority::DEFAULT, move |_, done| {
                    log.borrow_mut().push(format!("{}->{}", done.from, done.to));
                    Ok(())
                })
                .unwrap();
        }
        let process = Rc::new(ScriptedProcess::new());
        let runner = compose(&hooks, process.clone(), dir.path());

        let report = Sequencer::new(&hooks, &runner, &SnapshotRenderer)
            .upgrade(Some(Release::Olive))
            .unwrap();
        let ids: Vec<&str> = report.transitions[0].steps.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["ora2-folder-rename", "plugin-step"]);
        assert_eq!(*log.borrow(), vec!["plugin-step", "olive->palm"]);
    }
}
