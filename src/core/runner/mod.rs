//! Execution backends.
//!
//! Commands and upgrade steps talk to a deployment only through
//! [`TaskRunner`]. The compose backend drives `docker compose`, the cluster
//! backend drives `kubectl`.

pub mod cluster;
pub mod compose;
pub mod jobs;

use std::path::Path;

use crate::config::Config;
use crate::error::{BackendCommandDetails, Error, Result};
use crate::hooks::HookRegistry;
use crate::process::{CommandOutput, Invocation};

pub use cluster::ClusterTaskRunner;
pub use compose::{ComposeFlavor, ComposeTaskRunner};
pub use jobs::JobDefinition;

pub trait TaskRunner {
    /// Backend name: `local`, `dev` or `k8s`.
    fn name(&self) -> &str;

    fn root(&self) -> &Path;

    fn config(&self) -> &Config;

    fn hooks(&self) -> &HookRegistry;

    /// Run `command` in a fresh job container of `service`; returns its exit code.
    fn run_task(&self, service: &str, command: &str) -> Result<i32>;

    /// Run a catalog job by name.
    fn run_job(&self, job: &str) -> Result<i32> {
        let definition = jobs::resolve(self.hooks(), job)?;
        log_status!(
            "job",
            "Running '{}' in {} ({})",
            definition.name,
            definition.service,
            self.name()
        );
        let code = self.run_task(&definition.service, &definition.command)?;
        if code != 0 {
            return Err(Error::job_failed(self.name(), &definition.name, code));
        }
        Ok(code)
    }

    /// Run `argv` inside a running instance of `service`.
    fn exec_in_service(&self, service: &str, argv: &[String]) -> Result<i32>;

    fn start(&self, detach: bool) -> Result<()>;

    fn stop(&self) -> Result<()>;

    fn start_service(&self, service: &str) -> Result<()>;

    fn wait_ready(&self, service: &str) -> Result<()>;

    /// Delete backend resources of the given kinds for this deployment.
    fn delete_resources(&self, kinds: &[&str]) -> Result<()>;
}

/// Map a non-zero exit of a backend tool to `backend.command_failed`.
pub(crate) fn ensure_success(
    backend: &str,
    invocation: &Invocation,
    exit_code: i32,
    stderr: &str,
) -> Result<()> {
    if exit_code == 0 {
        return Ok(());
    }
    Err(Error::backend_command_failed(BackendCommandDetails {
        backend: backend.to_string(),
        command: invocation.display(),
        exit_code,
        stderr: stderr.trim().to_string(),
    }))
}

pub(crate) fn ensure_output(
    backend: &str,
    invocation: &Invocation,
    output: CommandOutput,
) -> Result<CommandOutput> {
    ensure_success(backend, invocation, output.exit_code, &output.stderr)?;
    Ok(output)
}
