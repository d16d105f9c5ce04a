//! Per-command context: the project root plus a lazily built task runner.

use std::cell::OnceCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::config::{Config, ConfigLoader};
use crate::error::{Error, Result};
use crate::hooks::HookRegistry;
use crate::process::ProcessRunner;
use crate::runner::{ClusterTaskRunner, ComposeFlavor, ComposeTaskRunner, TaskRunner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Local,
    Dev,
    K8s,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Local => "local",
            Backend::Dev => "dev",
            Backend::K8s => "k8s",
        }
    }
}

/// Everything a backend command needs, created once per invocation.
///
/// Configuration is loaded and the runner constructed on first use, so
/// commands that never touch the deployment never read `config.json`.
pub struct TaskContext<'h> {
    hooks: &'h HookRegistry,
    process: Rc<dyn ProcessRunner>,
    loader: &'h dyn ConfigLoader,
    root: PathBuf,
    backend: Backend,
    runner: OnceCell<Box<dyn TaskRunner + 'h>>,
}

impl<'h> TaskContext<'h> {
    pub fn new(
        hooks: &'h HookRegistry,
        process: Rc<dyn ProcessRunner>,
        loader: &'h dyn ConfigLoader,
        root: &Path,
        backend: Backend,
    ) -> Self {
        Self {
            hooks,
            process,
            loader,
            root: root.to_path_buf(),
            backend,
            runner: OnceCell::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn hooks(&self) -> &'h HookRegistry {
        self.hooks
    }

    pub fn load_config(&self) -> Result<Config> {
        self.loader.load_full(&self.root)
    }

    pub fn runner(&self) -> Result<&dyn TaskRunner> {
        if self.runner.get().is_none() {
            let built = self.build_runner(self.load_config()?)?;
            tracing::debug!(backend = self.backend.as_str(), root = %self.root.display(), "runner ready");
            // Single-threaded: nothing can have filled the cell since the check.
            let _ = self.runner.set(built);
        }
        self.runner
            .get()
            .map(|r| r.as_ref())
            .ok_or_else(|| Error::internal_unexpected("task runner was not initialised"))
    }

    fn build_runner(&self, config: Config) -> Result<Box<dyn TaskRunner + 'h>> {
        let process = Rc::clone(&self.process);
        Ok(match self.backend {
            Backend::Local => Box::new(ComposeTaskRunner::new(
                self.hooks,
                process,
                &self.root,
                config,
                ComposeFlavor::Local,
            )?),
            Backend::Dev => Box::new(ComposeTaskRunner::new(
                self.hooks,
                process,
                &self.root,
                config,
                ComposeFlavor::Dev,
            )?),
            Backend::K8s => Box::new(ClusterTaskRunner::new(
                self.hooks,
                process,
                &self.root,
                config,
            )?),
        })
    }
}
