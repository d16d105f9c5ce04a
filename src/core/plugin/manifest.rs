//! Declarative plugins: a JSON file contributing images, jobs and upgrade
//! steps through the hook catalog.
//!
//! ```json
//! {
//!   "name": "myplugin",
//!   "version": "1.0.0",
//!   "images": { "local": ["myplugin"] },
//!   "jobs": [{ "name": "myplugin-init", "service": "lms", "command": "./manage.py lms init_myplugin" }],
//!   "upgrade": { "palm": [{ "id": "reindex", "job": "myplugin-init" }] },
//!   "priority": 10
//! }
//! ```

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::hooks::{catalog, priority, HookRegistry};
use crate::runner::JobDefinition;
use crate::upgrade::{Release, StepOutcome, UpgradeStep};
use crate::utils::io;

use super::Plugin;

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct PluginManifest {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// Context name (`local`, `dev`, `k8s`) to image names.
    #[serde(default)]
    pub images: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub jobs: Vec<JobDefinition>,
    /// Target release name to steps of the transition ending there.
    #[serde(default)]
    pub upgrade: BTreeMap<String, Vec<ManifestStep>>,
    #[serde(default)]
    pub priority: Option<i32>,
}

/// Either a catalog job or a shell command executed in a running service.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestStep {
    pub id: String,
    #[serde(default)]
    pub job: Option<String>,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
}

#[derive(Debug, Clone)]
enum StepAction {
    Job(String),
    Exec { service: String, command: String },
}

impl ManifestStep {
    fn action(&self) -> std::result::Result<StepAction, String> {
        match (&self.job, &self.service, &self.command) {
            (Some(job), None, None) if !job.trim().is_empty() => Ok(StepAction::Job(job.clone())),
            (None, Some(service), Some(command))
                if !service.trim().is_empty() && !command.trim().is_empty() =>
            {
                Ok(StepAction::Exec {
                    service: service.clone(),
                    command: command.clone(),
                })
            }
            _ => Err(format!(
                "upgrade step '{}' needs either 'job' or both 'service' and 'command'",
                self.id
            )),
        }
    }
}

impl PluginManifest {
    pub fn load(path: &Path) -> Result<Self> {
        let content = io::read_file(path, "read plugin manifest")?;
        let manifest: PluginManifest = serde_json::from_str(&content)
            .map_err(|e| Error::plugin_invalid_manifest(path.display().to_string(), e.to_string()))?;
        manifest
            .validate()
            .map_err(|problem| Error::plugin_invalid_manifest(path.display().to_string(), problem))?;
        Ok(manifest)
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("'name' must not be empty".into());
        }
        for job in &self.jobs {
            if job.name.trim().is_empty() || job.service.trim().is_empty() {
                return Err("every job needs a 'name' and a 'service'".into());
            }
        }
        for (release, steps) in &self.upgrade {
            release.parse::<Release>().map_err(|e| e.message)?;
            for step in steps {
                if step.id.trim().is_empty() {
                    return Err(format!("upgrade step for '{}' has an empty id", release));
                }
                step.action()?;
            }
        }
        Ok(())
    }

    fn steps_for(&self, target: Release) -> Vec<UpgradeStep> {
        self.upgrade
            .iter()
            .filter(|(release, _)| release.parse::<Release>().ok() == Some(target))
            .flat_map(|(_, steps)| steps.iter())
            .filter_map(|step| {
                let action = step.action().ok()?;
                let id = format!("{}:{}", self.name, step.id);
                Some(UpgradeStep::new(id, move |ctx| {
                    match &action {
                        StepAction::Job(job) => {
                            ctx.runner.run_job(job)?;
                        }
                        StepAction::Exec { service, command } => {
                            ctx.start_and_wait(service)?;
                            ctx.exec_shell(service, command)?;
                        }
                    }
                    Ok(StepOutcome::Applied)
                }))
            })
            .collect()
    }
}

pub struct ManifestPlugin {
    pub manifest: PluginManifest,
    pub path: PathBuf,
}

impl ManifestPlugin {
    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self {
            manifest: PluginManifest::load(path)?,
            path: path.to_path_buf(),
        })
    }
}

impl Plugin for ManifestPlugin {
    fn name(&self) -> &str {
        &self.manifest.name
    }

    fn install(&self, hooks: &HookRegistry) -> Result<()> {
        let prio = self.manifest.priority.unwrap_or(priority::DEFAULT);

        if !self.manifest.images.is_empty() {
            let images = self.manifest.images.clone();
            hooks.add_filter(&catalog::IMAGES_BUILD_REQUIRED, prio, move |_, mut list, context| {
                if let Some(extra) = images.get(context) {
                    list.extend(extra.iter().cloned());
                }
                Ok(list)
            })?;
        }

        if !self.manifest.jobs.is_empty() {
            let jobs = self.manifest.jobs.clone();
            hooks.add_filter(&catalog::JOB_DEFINITIONS, prio, move |_, mut list, _| {
                list.extend(jobs.iter().cloned());
                Ok(list)
            })?;
        }

        if !self.manifest.upgrade.is_empty() {
            let manifest = self.manifest.clone();
            hooks.add_filter(&catalog::UPGRADE_STEPS, prio, move |_, mut steps, target| {
                steps.extend(manifest.steps_for(*target));
                Ok(steps)
            })?;
        }

        Ok(())
    }
}
