use regex::Regex;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::config::Config;
use crate::defaults;
use crate::error::{Error, Result};
use crate::hooks::catalog::{self, ProjectStarted};
use crate::hooks::HookRegistry;
use crate::paths;
use crate::process::{Invocation, ProcessRunner};

use super::{ensure_output, ensure_success, TaskRunner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposeFlavor {
    Local,
    Dev,
}

impl ComposeFlavor {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComposeFlavor::Local => "local",
            ComposeFlavor::Dev => "dev",
        }
    }

    pub fn project_name_key(&self) -> &'static str {
        match self {
            ComposeFlavor::Local => defaults::LOCAL_PROJECT_NAME,
            ComposeFlavor::Dev => defaults::DEV_PROJECT_NAME,
        }
    }

    /// Service files relative to `<root>/env`, in precedence order.
    fn service_files(&self) -> &'static [&'static str] {
        match self {
            ComposeFlavor::Local => &[
                "local/docker-compose.yml",
                "local/docker-compose.prod.yml",
                "local/docker-compose.override.yml",
            ],
            ComposeFlavor::Dev => &[
                "local/docker-compose.yml",
                "dev/docker-compose.yml",
                "local/docker-compose.override.yml",
                "dev/docker-compose.override.yml",
            ],
        }
    }

    /// Files only needed when running jobs, appended after the service files.
    fn job_files(&self) -> &'static [&'static str] {
        match self {
            ComposeFlavor::Local => &[
                "local/docker-compose.jobs.yml",
                "local/docker-compose.jobs.override.yml",
            ],
            ComposeFlavor::Dev => &[
                "local/docker-compose.jobs.yml",
                "dev/docker-compose.jobs.yml",
                "local/docker-compose.jobs.override.yml",
                "dev/docker-compose.jobs.override.yml",
            ],
        }
    }
}

pub fn validate_project_name(name: &str) -> Result<()> {
    let pattern = Regex::new(r"^[a-z0-9][a-z0-9_-]*$")
        .map_err(|e| Error::internal_unexpected(e.to_string()))?;
    if pattern.is_match(name) {
        Ok(())
    } else {
        Err(Error::config_invalid_value(
            "project_name",
            Some(name.to_string()),
            "must start with a lowercase letter or digit and contain only lowercase letters, digits, '_' and '-'",
        ))
    }
}

/// Runs tasks through `docker compose` against the rendered compose files.
pub struct ComposeTaskRunner<'h> {
    hooks: &'h HookRegistry,
    process: Rc<dyn ProcessRunner>,
    root: PathBuf,
    config: Config,
    flavor: ComposeFlavor,
    project_name: String,
}

impl<'h> ComposeTaskRunner<'h> {
    pub fn new(
        hooks: &'h HookRegistry,
        process: Rc<dyn ProcessRunner>,
        root: &Path,
        config: Config,
        flavor: ComposeFlavor,
    ) -> Result<Self> {
        let project_name = config.get_str(flavor.project_name_key())?.to_string();
        validate_project_name(&project_name)?;
        Ok(Self {
            hooks,
            process,
            root: root.to_path_buf(),
            config,
            flavor,
            project_name,
        })
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    pub fn flavor(&self) -> ComposeFlavor {
        self.flavor
    }

    /// Existing compose files, deduplicated, first occurrence kept.
    pub fn compose_files(&self, with_jobs: bool) -> Vec<PathBuf> {
        let env = paths::env_dir(&self.root);
        let mut relative: Vec<&str> = self.flavor.service_files().to_vec();
        if with_jobs {
            relative.extend_from_slice(self.flavor.job_files());
        }

        let mut files: Vec<PathBuf> = Vec::new();
        for rel in relative {
            let path = env.join(rel);
            if path.exists() && !files.contains(&path) {
                files.push(path);
            }
        }
        files
    }

    fn compose(&self, with_jobs: bool) -> Invocation {
        let mut invocation = Invocation::new("docker").arg("compose");
        for file in self.compose_files(with_jobs) {
            invocation = invocation.arg("-f").arg(file.display().to_string());
        }
        invocation
            .arg("--project-name")
            .arg(self.project_name.clone())
            .current_dir(self.root.clone())
    }

    fn passthrough(&self, invocation: &Invocation) -> Result<()> {
        let code = self.process.passthrough(invocation)?;
        ensure_success(self.name(), invocation, code, "")
    }

    fn running_services(&self) -> Result<Vec<String>> {
        let invocation = self
            .compose(false)
            .args(["ps", "--status", "running", "--services"]);
        let output = self.process.capture(&invocation)?;
        let output = ensure_output(self.name(), &invocation, output)?;
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}

impl TaskRunner for ComposeTaskRunner<'_> {
    fn name(&self) -> &str {
        self.flavor.as_str()
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn config(&self) -> &Config {
        &self.config
    }

    fn hooks(&self) -> &HookRegistry {
        self.hooks
    }

    fn run_task(&self, service: &str, command: &str) -> Result<i32> {
        let mut invocation = self.compose(true).args(["run", "--rm"]);
        if !self.process.is_terminal() {
            invocation = invocation.arg("-T");
        }
        let invocation = invocation
            .arg(format!("{}-job", service))
            .args(["sh", "-e", "-c"])
            .arg(command);
        self.process.passthrough(&invocation)
    }

    fn exec_in_service(&self, service: &str, argv: &[String]) -> Result<i32> {
        if !self.running_services()?.iter().any(|s| s == service) {
            return Err(Error::service_not_running(self.name(), service));
        }

        let mut invocation = self.compose(false).arg("exec");
        if !self.process.is_terminal() {
            invocation = invocation.arg("-T");
        }
        let invocation = invocation.arg(service).args(argv.iter().cloned());
        self.passthrough(&invocation)?;
        Ok(0)
    }

    fn start(&self, detach: bool) -> Result<()> {
        let mut invocation = self.compose(false).args(["up", "--remove-orphans"]);
        if detach {
            invocation = invocation.arg("-d");
        }
        log_status!("compose", "Starting project {}", self.project_name);
        self.passthrough(&invocation)?;

        self.hooks.notify(
            &catalog::COMPOSE_PROJECT_STARTED,
            &ProjectStarted {
                root: self.root.clone(),
                config: self.config.clone(),
                project_name: self.project_name.clone(),
            },
        )
    }

    fn stop(&self) -> Result<()> {
        log_status!("compose", "Stopping project {}", self.project_name);
        self.passthrough(&self.compose(false).arg("stop"))
    }

    fn start_service(&self, service: &str) -> Result<()> {
        self.passthrough(
            &self
                .compose(false)
                .args(["up", "--remove-orphans", "-d"])
                .arg(service),
        )
    }

    fn wait_ready(&self, _service: &str) -> Result<()> {
        Ok(())
    }

    fn delete_resources(&self, kinds: &[&str]) -> Result<()> {
        tracing::debug!(backend = self.name(), ?kinds, "nothing to delete for compose");
        log_status!("compose", "No {} to delete for compose projects", kinds.join(", "));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::priority;
    use crate::process::testing::ScriptedProcess;
    use crate::process::CommandOutput;
    use std::cell::RefCell;
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join("env").join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "services: {}\n").unwrap();
    }

    fn config() -> Config {
        Config::from_map(defaults::values())
    }

    #[test]
    fn only_existing_files_are_passed_in_precedence_order() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "local/docker-compose.yml");
        touch(dir.path(), "dev/docker-compose.yml");
        touch(dir.path(), "dev/docker-compose.jobs.yml");

        let hooks = HookRegistry::new();
        let runner = ComposeTaskRunner::new(
            &hooks,
            Rc::new(ScriptedProcess::new()),
            dir.path(),
            config(),
            ComposeFlavor::Dev,
        )
        .unwrap();

        let files = runner.compose_files(false);
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("local/docker-compose.yml"));
        assert!(files[1].ends_with("dev/docker-compose.yml"));

        let with_jobs = runner.compose_files(true);
        assert_eq!(with_jobs.len(), 3);
        assert!(with_jobs[2].ends_with("dev/docker-compose.jobs.yml"));
    }

    #[test]
    fn invalid_project_name_is_rejected() {
        let hooks = HookRegistry::new();
        let err = ComposeTaskRunner::new(
            &hooks,
            Rc::new(ScriptedProcess::new()),
            Path::new("/tmp"),
            config().with(defaults::LOCAL_PROJECT_NAME, "Bad Name"),
            ComposeFlavor::Local,
        )
        .err()
        .unwrap();
        assert_eq!(err.code.as_str(), "config.invalid_value");
    }

    #[test]
    fn run_task_uses_job_service_and_strict_shell() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "local/docker-compose.yml");
        touch(dir.path(), "local/docker-compose.jobs.yml");
        let process = Rc::new(ScriptedProcess::new());
        let hooks = HookRegistry::new();
        let runner = ComposeTaskRunner::new(
            &hooks,
            process.clone(),
            dir.path(),
            config(),
            ComposeFlavor::Local,
        )
        .unwrap();

        assert_eq!(runner.run_task("lms", "echo hi").unwrap(), 0);
        let line = process.lines().pop().unwrap();
        assert!(line.contains("--project-name berth_local run --rm -T lms-job sh -e -c 'echo hi'"));
        assert!(line.contains("docker-compose.jobs.yml"));
    }

    #[test]
    fn exec_requires_running_service() {
        let process = Rc::new(ScriptedProcess::new());
        process.on("ps --status running", CommandOutput::ok("mysql\nredis\n"));
        let hooks = HookRegistry::new();
        let runner = ComposeTaskRunner::new(
            &hooks,
            process.clone(),
            Path::new("/tmp"),
            config(),
            ComposeFlavor::Local,
        )
        .unwrap();

        let err = runner.exec_in_service("lms", &["ls".to_string()]).unwrap_err();
        assert_eq!(err.code.as_str(), "service.not_running");
        assert_eq!(process.count_matching(" exec "), 0);

        runner
            .exec_in_service("mysql", &["mysql".to_string(), "-e".to_string(), "select 1".to_string()])
            .unwrap();
        assert_eq!(process.count_matching("exec -T mysql mysql -e 'select 1'"), 1);
    }

    #[test]
    fn exec_failure_is_backend_error() {
        let process = Rc::new(ScriptedProcess::new());
        process.on("ps --status running", CommandOutput::ok("lms\n"));
        process.on(" exec ", CommandOutput::failed(3, ""));
        let hooks = HookRegistry::new();
        let runner = ComposeTaskRunner::new(
            &hooks,
            process,
            Path::new("/tmp"),
            config(),
            ComposeFlavor::Local,
        )
        .unwrap();

        let err = runner.exec_in_service("lms", &["false".to_string()]).unwrap_err();
        assert_eq!(err.code.as_str(), "backend.command_failed");
        assert_eq!(err.details["exitCode"], 3);
    }

    #[test]
    fn start_fires_project_started_only_on_success() {
        let process = Rc::new(ScriptedProcess::new());
        let hooks = HookRegistry::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        {
            let seen = seen.clone();
            hooks
                .add_action(&catalog::COMPOSE_PROJECT_STARTED, priority::DEFAULT, move |_, started| {
                    seen.borrow_mut().push(started.project_name.clone());
                    Ok(())
                })
                .unwrap();
        }
        let runner = ComposeTaskRunner::new(
            &hooks,
            process.clone(),
            Path::new("/tmp"),
            config(),
            ComposeFlavor::Local,
        )
        .unwrap();

        runner.start(true).unwrap();
        assert_eq!(*seen.borrow(), vec!["berth_local"]);

        process.once(" up ", CommandOutput::failed(1, ""));
        assert!(runner.start(true).is_err());
        assert_eq!(seen.borrow().len(), 1);
    }
}
