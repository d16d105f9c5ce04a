//! Hook points the tool itself fires. Names are part of the plugin contract.

use std::path::PathBuf;

use crate::config::Config;
use crate::error::Result;
use crate::runner::JobDefinition;
use crate::upgrade::{Release, UpgradeStep};

use super::{Action, Filter, HookRegistry};

/// Fired once after built-in plugins are installed. Plugin discovery hangs here.
pub const CORE_READY: Action<()> = Action::new("core:ready");

/// Fired once the project root of the current command is known.
pub const PROJECT_ROOT_READY: Action<PathBuf> = Action::new("project:root:ready");

/// Fired after a compose project came up successfully.
pub const COMPOSE_PROJECT_STARTED: Action<ProjectStarted> =
    Action::new("compose:project:started");

/// Images to build for a context name (`local`, `dev`, `k8s`).
pub const IMAGES_BUILD_REQUIRED: Filter<Vec<String>, String> =
    Filter::new("images:build:required");

/// Job catalog consulted by `run_job`.
pub const JOB_DEFINITIONS: Filter<Vec<JobDefinition>, ()> = Filter::new("jobs:definitions");

/// Extra steps for the transition that ends at the given release.
pub const UPGRADE_STEPS: Filter<Vec<UpgradeStep>, Release> = Filter::new("upgrade:steps");

/// Fired after the persisted release moved forward.
pub const UPGRADE_RELEASE_COMPLETED: Action<ReleaseCompleted> =
    Action::new("upgrade:release:completed");

#[derive(Debug, Clone)]
pub struct ProjectStarted {
    pub root: PathBuf,
    pub config: Config,
    pub project_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseCompleted {
    pub from: Release,
    pub to: Release,
}

/// Declare every catalog point so introspection lists them even before any
/// listener attaches, and so filters never hit the undeclared-point error.
pub fn declare_all(hooks: &HookRegistry) -> Result<()> {
    hooks.declare_action(&CORE_READY)?;
    hooks.declare_action(&PROJECT_ROOT_READY)?;
    hooks.declare_action(&COMPOSE_PROJECT_STARTED)?;
    hooks.declare_filter(&IMAGES_BUILD_REQUIRED)?;
    hooks.declare_filter(&JOB_DEFINITIONS)?;
    hooks.declare_filter(&UPGRADE_STEPS)?;
    hooks.declare_action(&UPGRADE_RELEASE_COMPLETED)?;
    Ok(())
}
