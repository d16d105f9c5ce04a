//! Persisted deployment state: the current release plus completion markers
//! for the steps of a partially applied transition.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::paths;
use crate::utils::io;

use super::Release;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentState {
    pub release: Release,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub completed_steps: Vec<String>,
}

impl DeploymentState {
    pub fn new(release: Release) -> Self {
        Self {
            release,
            completed_steps: Vec::new(),
        }
    }

    pub fn is_completed(&self, step: &str) -> bool {
        self.completed_steps.iter().any(|s| s == step)
    }

    pub fn mark_completed(&mut self, step: &str) {
        if !self.is_completed(step) {
            self.completed_steps.push(step.to_string());
        }
    }

    /// Move to `release` and forget the markers of the finished transition.
    pub fn advance(&mut self, release: Release) {
        self.release = release;
        self.completed_steps.clear();
    }
}

pub fn load(root: &Path) -> Result<Option<DeploymentState>> {
    let path = paths::deployment_state(root);
    if !path.exists() {
        return Ok(None);
    }
    let content = io::read_file(&path, "read deployment state")?;
    let state = serde_json::from_str(&content)
        .map_err(|e| Error::config_invalid_json(path.display().to_string(), e))?;
    Ok(Some(state))
}

pub fn save(root: &Path, state: &DeploymentState) -> Result<()> {
    let path = paths::deployment_state(root);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            Error::internal_io(e.to_string(), Some(format!("create {}", parent.display())))
        })?;
    }
    let content = serde_json::to_string_pretty(state)
        .map_err(|e| Error::internal_json(e.to_string(), Some("serialize state".into())))?;
    io::write_file_atomic(&path, &content, "save deployment state")
}
