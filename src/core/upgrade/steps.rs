//! Built-in release-to-release steps.
//!
//! Steps only reach the deployment through [`TaskRunner`], so the same chain
//! serves compose and cluster backends. Backend-specific effects (deleting
//! cluster resources) degrade to no-ops where they have no meaning.

use std::fmt;
use std::path::Path;
use std::rc::Rc;

use crate::config::Config;
use crate::defaults;
use crate::env::EnvRenderer;
use crate::error::Result;
use crate::runner::TaskRunner;
use crate::utils::shell::quote_arg;

use super::Release;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Applied,
    /// Nothing to do for this deployment; counts as success.
    Skipped(String),
}

/// What a step can see and touch while it runs.
pub struct UpgradeContext<'a> {
    pub root: &'a Path,
    pub config: &'a Config,
    pub runner: &'a dyn TaskRunner,
    pub renderer: &'a dyn EnvRenderer,
    /// Instructions for the operator, reported once the upgrade stops.
    pub messages: Vec<String>,
}

impl UpgradeContext<'_> {
    pub fn exec_shell(&self, service: &str, command: &str) -> Result<()> {
        let argv = ["sh", "-e", "-c", command].map(str::to_string);
        self.runner.exec_in_service(service, &argv)?;
        Ok(())
    }

    pub fn start_and_wait(&self, service: &str) -> Result<()> {
        self.runner.start_service(service)?;
        self.runner.wait_ready(service)
    }

    fn note(&mut self, message: impl Into<String>) {
        let message = message.into();
        log_status!("upgrade", "{}", message);
        self.messages.push(message);
    }
}

type StepFn = dyn Fn(&mut UpgradeContext<'_>) -> Result<StepOutcome>;

/// One unit of a transition. Ids are unique within their transition and are
/// what completion markers record.
#[derive(Clone)]
pub struct UpgradeStep {
    pub id: String,
    run: Rc<StepFn>,
}

impl UpgradeStep {
    pub fn new(
        id: impl Into<String>,
        run: impl Fn(&mut UpgradeContext<'_>) -> Result<StepOutcome> + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            run: Rc::new(run),
        }
    }

    pub fn run(&self, ctx: &mut UpgradeContext<'_>) -> Result<StepOutcome> {
        (self.run)(ctx)
    }
}

impl fmt::Debug for UpgradeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpgradeStep").field("id", &self.id).finish()
    }
}

/// Transitions in order, each keyed by the release it ends at.
pub fn chain() -> Vec<(Release, Vec<UpgradeStep>)> {
    vec![
        (Release::Juniper, vec![mongodb_upgrade("3.2", "3.6")]),
        (Release::Koa, vec![mysql_upgrade()]),
        (Release::Lilac, vec![mongodb_upgrade("3.6", "4.0")]),
        (Release::Maple, vec![delete_deployments()]),
        (
            Release::Nutmeg,
            vec![
                render_env(),
                start_mysql(),
                exec_commands(
                    "lms-user-tours",
                    "lms",
                    &[
                        "./manage.py lms migrate user_tours",
                        "./manage.py lms backpopulate_user_tours",
                    ],
                ),
                exec_commands(
                    "cms-course-tabs",
                    "cms",
                    &[
                        "./manage.py cms migrate contentstore",
                        "./manage.py cms migrate split_modulestore_django",
                        "./manage.py cms backfill_course_tabs",
                    ],
                ),
                exec_commands(
                    "cms-simulate-publish",
                    "cms",
                    &[
                        "./manage.py cms migrate course_overviews",
                        "./manage.py cms simulate_publish",
                    ],
                ),
            ],
        ),
        (
            Release::Olive,
            vec![run_job("lms-compute-grades"), run_job("cms-backfill-blocks")],
        ),
        (
            Release::Palm,
            vec![exec_commands(
                "ora2-folder-rename",
                "lms",
                &[ORA2_RENAME],
            )],
        ),
    ]
}

/// Built-in steps of the transition ending at `to`.
pub fn builtin(to: Release) -> Vec<UpgradeStep> {
    chain()
        .into_iter()
        .find(|(release, _)| *release == to)
        .map(|(_, steps)| steps)
        .unwrap_or_default()
}

const ORA2_RENAME: &str = "if stat '/openedx/data/ora2/SET-ME-PLEASE (ex. bucket-name)' 2> /dev/null; then echo \"Renaming ora2 folder...\"; mv '/openedx/data/ora2/SET-ME-PLEASE (ex. bucket-name)' /openedx/data/ora2/openedxuploads; fi";

fn mongodb_upgrade(from: &'static str, to: &'static str) -> UpgradeStep {
    UpgradeStep::new(format!("mongodb-{}", to), move |ctx| {
        if !ctx.config.get_bool(defaults::RUN_MONGODB)? {
            return Ok(StepOutcome::Skipped(format!(
                "RUN_MONGODB=false: upgrading the external MongoDB instance to v{} is up to you",
                to
            )));
        }
        let backend = ctx.runner.name().to_string();
        ctx.note(format!(
            "Upgrade MongoDB from v{from} to v{to} before continuing, for instance:\n\n    \
             berth {backend} stop\n    \
             # set DOCKER_IMAGE_MONGODB to a mongo:{to} image in config.json\n    \
             berth {backend} start --detach\n    \
             berth {backend} exec mongodb mongo --eval 'db.adminCommand({{ setFeatureCompatibilityVersion: \"{to}\" }})'"
        ));
        Ok(StepOutcome::Applied)
    })
}

fn mysql_upgrade() -> UpgradeStep {
    UpgradeStep::new("mysql-5.7", |ctx| {
        if !ctx.config.get_bool(defaults::RUN_MYSQL)? {
            return Ok(StepOutcome::Skipped(
                "RUN_MYSQL=false: upgrading the external MySQL instance to v5.7 is up to you".into(),
            ));
        }
        let user = ctx.config.get_str(defaults::MYSQL_ROOT_USERNAME)?;
        ctx.start_and_wait("mysql")?;
        // The password is expanded inside the container so it never shows up
        // in displayed command lines.
        ctx.exec_shell(
            "mysql",
            &format!(
                "mysql_upgrade -u {} --password=\"$MYSQL_ROOT_PASSWORD\"",
                quote_arg(user)
            ),
        )?;
        Ok(StepOutcome::Applied)
    })
}

fn delete_deployments() -> UpgradeStep {
    UpgradeStep::new("delete-deployments", |ctx| {
        ctx.note("All deployments and services are deleted when moving to maple");
        ctx.runner.delete_resources(&["deployments", "services"])?;
        Ok(StepOutcome::Applied)
    })
}

fn render_env() -> UpgradeStep {
    UpgradeStep::new("render-env", |ctx| {
        ctx.renderer.save(ctx.root, ctx.config)?;
        Ok(StepOutcome::Applied)
    })
}

fn start_mysql() -> UpgradeStep {
    UpgradeStep::new("start-mysql", |ctx| {
        if !ctx.config.get_bool(defaults::RUN_MYSQL)? {
            return Ok(StepOutcome::Skipped("RUN_MYSQL=false".into()));
        }
        ctx.start_and_wait("mysql")?;
        Ok(StepOutcome::Applied)
    })
}

fn exec_commands(id: &str, service: &'static str, commands: &[&'static str]) -> UpgradeStep {
    let commands = commands.to_vec();
    UpgradeStep::new(id, move |ctx| {
        ctx.start_and_wait(service)?;
        for command in &commands {
            ctx.exec_shell(service, command)?;
        }
        Ok(StepOutcome::Applied)
    })
}

fn run_job(job: &'static str) -> UpgradeStep {
    UpgradeStep::new(job, move |ctx| {
        ctx.runner.run_job(job)?;
        Ok(StepOutcome::Applied)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_covers_every_transition_in_order() {
        let targets: Vec<Release> = chain().into_iter().map(|(r, _)| r).collect();
        assert_eq!(targets, Release::ALL[1..].to_vec());
    }

    #[test]
    fn step_ids_are_unique_per_transition() {
        for (release, steps) in chain() {
            let mut ids: Vec<&str> = steps.iter().map(|s| s.id.as_str()).collect();
            let total = ids.len();
            ids.sort();
            ids.dedup();
            assert_eq!(ids.len(), total, "duplicate step id in {}", release);
        }
    }

    #[test]
    fn builtin_of_first_release_is_empty() {
        assert!(builtin(Release::Ironwood).is_empty());
        assert_eq!(builtin(Release::Olive).len(), 2);
    }
}
