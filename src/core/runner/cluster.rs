use serde_json::{json, Value};
use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::defaults;
use crate::error::{BackendCommandDetails, Error, Result};
use crate::hooks::HookRegistry;
use crate::paths;
use crate::process::{Invocation, ProcessRunner};
use crate::utils::io;

use super::{ensure_output, ensure_success, TaskRunner};

const BACKEND: &str = "k8s";

/// Resources removed by `stop`.
const STOP_KINDS: &[&str] = &["deployments", "services", "configmaps", "jobs"];

/// Runs tasks against a cluster through `kubectl`.
pub struct ClusterTaskRunner<'h> {
    hooks: &'h HookRegistry,
    process: Rc<dyn ProcessRunner>,
    root: PathBuf,
    config: Config,
    namespace: String,
    instance: String,
    ready_timeout: Duration,
    poll_interval: Duration,
    job_timeout: Duration,
    job_seq: Cell<u32>,
}

impl<'h> ClusterTaskRunner<'h> {
    pub fn new(
        hooks: &'h HookRegistry,
        process: Rc<dyn ProcessRunner>,
        root: &Path,
        config: Config,
    ) -> Result<Self> {
        let namespace = config.get_str(defaults::K8S_NAMESPACE)?.to_string();
        let instance = format!("openedx-{}", config.get_str(defaults::ID)?);
        let ready_timeout = Duration::from_secs(config.get_u64(defaults::K8S_READY_TIMEOUT_SECONDS)?);
        let poll_interval = Duration::from_secs(config.get_u64(defaults::K8S_POLL_INTERVAL_SECONDS)?);
        let job_timeout = Duration::from_secs(config.get_u64(defaults::K8S_JOB_TIMEOUT_SECONDS)?);

        Ok(Self {
            hooks,
            process,
            root: root.to_path_buf(),
            config,
            namespace,
            instance,
            ready_timeout,
            poll_interval,
            job_timeout,
            job_seq: Cell::new(0),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn instance_selector(&self) -> String {
        format!("app.kubernetes.io/instance={}", self.instance)
    }

    pub fn service_selector(&self, service: &str) -> String {
        format!("{},app.kubernetes.io/name={}", self.instance_selector(), service)
    }

    fn kubectl(&self) -> Invocation {
        Invocation::new("kubectl").current_dir(self.root.clone())
    }

    fn namespaced(&self, verb: &str) -> Invocation {
        self.kubectl()
            .arg(verb)
            .arg("--namespace")
            .arg(self.namespace.clone())
    }

    fn capture_ok(&self, invocation: &Invocation) -> Result<String> {
        let output = self.process.capture(invocation)?;
        Ok(ensure_output(BACKEND, invocation, output)?.stdout.trim().to_string())
    }

    fn passthrough_ok(&self, invocation: &Invocation) -> Result<()> {
        let code = self.process.passthrough(invocation)?;
        ensure_success(BACKEND, invocation, code, "")
    }

    fn apply_env(&self, selector: &str) -> Result<()> {
        let invocation = self
            .kubectl()
            .arg("apply")
            .arg("--kustomize")
            .arg(paths::env_dir(&self.root).display().to_string())
            .arg("--wait")
            .arg(format!("--selector={}", selector));
        self.passthrough_ok(&invocation)
    }

    /// Poll `probe` until it yields a value or `timeout` elapses.
    fn poll<T>(&self, timeout: Duration, mut probe: impl FnMut() -> Result<Option<T>>) -> Result<Option<T>> {
        let started = Instant::now();
        loop {
            if let Some(value) = probe()? {
                return Ok(Some(value));
            }
            if started.elapsed() >= timeout {
                return Ok(None);
            }
            thread::sleep(self.poll_interval);
        }
    }

    fn ready_replicas(&self, service: &str) -> Result<u64> {
        let invocation = self
            .namespaced("get")
            .arg("deployment")
            .arg(format!("--selector={}", self.service_selector(service)))
            .arg("--output=jsonpath={.items[0].status.readyReplicas}");
        let output = self.process.capture(&invocation)?;
        if !output.success {
            return Ok(0);
        }
        Ok(output.stdout.trim().parse().unwrap_or(0))
    }

    fn first_pod(&self, service: &str) -> Result<Option<String>> {
        let invocation = self
            .namespaced("get")
            .arg("pods")
            .arg(format!("--selector={}", self.service_selector(service)))
            .arg("--output=jsonpath={.items[0].metadata.name}");
        let name = self.capture_ok(&invocation)?;
        Ok((!name.is_empty()).then_some(name))
    }

    fn active_jobs(&self) -> Result<Vec<String>> {
        let invocation = self
            .namespaced("get")
            .arg("jobs")
            .arg(format!("--selector={}", self.instance_selector()))
            .arg("--output=jsonpath={.items[?(@.status.active)].metadata.name}");
        let out = self.capture_ok(&invocation)?;
        Ok(out.split_whitespace().map(str::to_string).collect())
    }

    /// Load the job template for `service` and point it at `command`.
    fn job_manifest(&self, service: &str, command: &str, job_name: &str) -> Result<Value> {
        let template_name = format!("{}-job", service);
        let template_path = paths::k8s_jobs(&self.root).join(format!("{}.json", template_name));
        if !template_path.exists() {
            return Err(Error::job_not_found(template_name, self.job_templates())
                .with_hint(format!("Expected a job template at {}", template_path.display())));
        }

        let content = io::read_file(&template_path, "read job template")?;
        let mut job: Value = serde_json::from_str(&content).map_err(|e| {
            Error::config_invalid_json(template_path.display().to_string(), e)
        })?;
        render_job(&mut job, job_name, &self.instance, command).ok_or_else(|| {
            Error::config_invalid_value(
                template_path.display().to_string(),
                None,
                "job template must be an object with spec.template.spec.containers[0]",
            )
        })?;
        Ok(job)
    }

    fn job_templates(&self) -> Vec<String> {
        let pattern = paths::k8s_jobs(&self.root).join("*-job.json");
        let mut names: Vec<String> = glob::glob(&pattern.to_string_lossy())
            .map(|paths| {
                paths
                    .filter_map(|p| p.ok())
                    .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().to_string()))
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Unique within this runner and down to the millisecond across runs.
    fn next_job_name(&self, service: &str) -> String {
        let seq = self.job_seq.get() + 1;
        self.job_seq.set(seq);
        format!(
            "{}-job-{}-{}",
            service,
            chrono::Local::now().format("%Y%m%d%H%M%S%3f"),
            seq
        )
    }

    fn job_status(&self, job_name: &str) -> Result<Option<i32>> {
        let invocation = self
            .namespaced("get")
            .arg(format!("job/{}", job_name))
            .arg("--output=jsonpath={.status.succeeded}/{.status.failed}");
        let out = self.capture_ok(&invocation)?;
        let (succeeded, failed) = out.split_once('/').unwrap_or((out.as_str(), ""));
        let count = |s: &str| s.trim().parse::<u32>().unwrap_or(0);
        if count(succeeded) > 0 {
            return Ok(Some(0));
        }
        if count(failed) > 0 {
            return Ok(Some(1));
        }
        Ok(None)
    }
}

fn remove_rendered(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %err, "failed to remove rendered job");
        }
    }
}

/// Rename, label and re-command a job template in place. `None` when the
/// template lacks the expected shape.
fn render_job(job: &mut Value, job_name: &str, instance: &str, command: &str) -> Option<()> {
    let metadata = job
        .as_object_mut()?
        .entry("metadata")
        .or_insert_with(|| json!({}))
        .as_object_mut()?;
    metadata.insert("name".into(), json!(job_name));
    let labels = metadata
        .entry("labels")
        .or_insert_with(|| json!({}))
        .as_object_mut()?;
    labels.insert("app.kubernetes.io/name".into(), json!(job_name));
    labels.insert("app.kubernetes.io/instance".into(), json!(instance));

    let spec = job.get_mut("spec")?.as_object_mut()?;
    spec.insert("backoffLimit".into(), json!(1));
    spec.insert("ttlSecondsAfterFinished".into(), json!(3600));

    let container = spec
        .get_mut("template")?
        .get_mut("spec")?
        .get_mut("containers")?
        .get_mut(0)?
        .as_object_mut()?;
    let shell = json!(["sh", "-e", "-c", command]);

    // An explicit empty `command` means the image entrypoint must not run.
    let bypass_entrypoint = container
        .get("command")
        .and_then(Value::as_array)
        .is_some_and(|c| c.is_empty());
    if bypass_entrypoint {
        container.insert("command".into(), shell);
        container.remove("args");
    } else {
        container.insert("args".into(), shell);
    }
    Some(())
}

impl TaskRunner for ClusterTaskRunner<'_> {
    fn name(&self) -> &str {
        BACKEND
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
        let job_name = self.next_job_name(service);
        let manifest = self.job_manifest(service, command, &job_name)?;

        let waited = self.poll(self.job_timeout, || {
            let active = self.active_jobs()?;
            if !active.is_empty() {
                log_status!("k8s", "Waiting for active jobs: {}", active.join(", "));
            }
            Ok(active.is_empty().then_some(()))
        })?;
        if waited.is_none() {
            return Err(Error::deployment_not_ready(
                &self.namespace,
                format!("{}-job", service),
                self.job_timeout.as_secs(),
            )
            .with_hint("Another job of this deployment is still running"));
        }

        let manifest_path = paths::k8s_jobs(&self.root).join(format!("{}.json", job_name));
        let content = serde_json::to_string_pretty(&manifest)
            .map_err(|e| Error::internal_json(e.to_string(), Some("serialize job".into())))?;
        io::write_file_atomic(&manifest_path, &content, "write job manifest")?;

        log_status!("k8s", "Starting job {}", job_name);
        let finished = self
            .passthrough_ok(
                &self
                    .namespaced("apply")
                    .arg("--filename")
                    .arg(manifest_path.display().to_string()),
            )
            .and_then(|_| self.poll(self.job_timeout, || self.job_status(&job_name)));
        remove_rendered(&manifest_path);

        match finished? {
            Some(code) => Ok(code),
            None => Err(Error::backend_command_failed(BackendCommandDetails {
                backend: BACKEND.to_string(),
                command: format!("job/{}", job_name),
                exit_code: -1,
                stderr: format!(
                    "job did not finish within {}s",
                    self.job_timeout.as_secs()
                ),
            })),
        }
    }

    fn exec_in_service(&self, service: &str, argv: &[String]) -> Result<i32> {
        self.wait_ready(service)?;
        let pod = self
            .first_pod(service)?
            .ok_or_else(|| Error::service_not_running(BACKEND, service))?;

        let mut invocation = self.namespaced("exec").arg("--stdin");
        if self.process.is_terminal() {
            invocation = invocation.arg("--tty");
        }
        let invocation = invocation.arg(pod).arg("--").args(argv.iter().cloned());
        self.passthrough_ok(&invocation)?;
        Ok(0)
    }

    fn start(&self, _detach: bool) -> Result<()> {
        log_status!("k8s", "Applying resources to namespace {}", self.namespace);
        self.apply_env("app.kubernetes.io/component=namespace")?;
        self.apply_env("app.kubernetes.io/component=volume")?;
        self.apply_env("app.kubernetes.io/component notin (job,volume,namespace)")
    }

    fn stop(&self) -> Result<()> {
        self.delete_resources(STOP_KINDS)
    }

    fn start_service(&self, service: &str) -> Result<()> {
        self.apply_env(&format!("app.kubernetes.io/name={}", service))
    }

    fn wait_ready(&self, service: &str) -> Result<()> {
        let ready = self.poll(self.ready_timeout, || {
            Ok((self.ready_replicas(service)? > 0).then_some(()))
        })?;
        if ready.is_none() {
            return Err(Error::deployment_not_ready(
                &self.namespace,
                service,
                self.ready_timeout.as_secs(),
            ));
        }
        Ok(())
    }

    fn delete_resources(&self, kinds: &[&str]) -> Result<()> {
        let invocation = self
            .namespaced("delete")
            .arg(format!("--selector={}", self.instance_selector()))
            .arg("--ignore-not-found")
            .arg(kinds.join(","));
        log_status!("k8s", "Deleting {} in {}", kinds.join(", "), self.namespace);
        self.passthrough_ok(&invocation)
    }
}
