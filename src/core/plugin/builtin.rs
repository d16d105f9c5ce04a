use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use crate::error::Result;
use crate::hooks::catalog::{self, ProjectStarted};
use crate::hooks::{priority, HookRegistry};
use crate::paths;
use crate::process::ProcessRunner;
use crate::runner::{ComposeFlavor, ComposeTaskRunner, TaskRunner};

use super::manifest::ManifestPlugin;
use super::{Plugin, PluginInfo};

/// Only one compose project may run at a time: when another project starts,
/// the `flavor` project is stopped.
fn stop_when_other_starts(
    hooks: &HookRegistry,
    process: Rc<dyn ProcessRunner>,
    flavor: ComposeFlavor,
) -> Result<()> {
    hooks.add_action(
        &catalog::COMPOSE_PROJECT_STARTED,
        priority::DEFAULT,
        move |hooks, started: &ProjectStarted| {
            let own = started.config.get_str(flavor.project_name_key())?;
            if own == started.project_name {
                return Ok(());
            }
            log_status!(
                "compose",
                "Stopping {} project {} because {} started",
                flavor.as_str(),
                own,
                started.project_name
            );
            ComposeTaskRunner::new(
                hooks,
                Rc::clone(&process),
                &started.root,
                started.config.clone(),
                flavor,
            )?
            .stop()
        },
    )
}

fn add_images(hooks: &HookRegistry, context: &'static str, images: &'static [&'static str]) -> Result<()> {
    hooks.add_filter(
        &catalog::IMAGES_BUILD_REQUIRED,
        priority::HIGH,
        move |_, mut list, requested: &String| {
            if requested == context {
                list.extend(images.iter().map(|i| i.to_string()));
            }
            Ok(list)
        },
    )
}

pub struct LocalPlugin {
    pub process: Rc<dyn ProcessRunner>,
}

impl Plugin for LocalPlugin {
    fn name(&self) -> &str {
        "local"
    }

    fn install(&self, hooks: &HookRegistry) -> Result<()> {
        stop_when_other_starts(hooks, Rc::clone(&self.process), ComposeFlavor::Local)?;
        add_images(hooks, "local", &["openedx"])
    }
}

pub struct DevPlugin {
    pub process: Rc<dyn ProcessRunner>,
}

impl Plugin for DevPlugin {
    fn name(&self) -> &str {
        "dev"
    }

    fn install(&self, hooks: &HookRegistry) -> Result<()> {
        stop_when_other_starts(hooks, Rc::clone(&self.process), ComposeFlavor::Dev)?;
        add_images(hooks, "dev", &["openedx-dev"])
    }
}

pub struct K8sPlugin;

impl Plugin for K8sPlugin {
    fn name(&self) -> &str {
        "k8s"
    }

    fn install(&self, hooks: &HookRegistry) -> Result<()> {
        add_images(hooks, "k8s", &["openedx"])
    }
}

/// Loads manifest plugins: user-wide ones once the core is ready, project
/// ones once the project root is known.
pub struct DiscoveryPlugin {
    pub loaded: Rc<RefCell<Vec<PluginInfo>>>,
}

impl DiscoveryPlugin {
    fn discover(hooks: &HookRegistry, dir: &Path, loaded: &RefCell<Vec<PluginInfo>>) -> Result<()> {
        if !dir.is_dir() {
            tracing::debug!(dir = %dir.display(), "no plugin directory");
            return Ok(());
        }

        let pattern = dir.join("*.json");
        let mut files: Vec<_> = glob::glob(&pattern.to_string_lossy())
            .map(|paths| paths.filter_map(|p| p.ok()).collect())
            .unwrap_or_default();
        files.sort();

        for path in files {
            let plugin = ManifestPlugin::load(&path)?;
            let manifest = &plugin.manifest;
            if manifest.enabled {
                plugin.install(hooks)?;
                tracing::debug!(plugin = %manifest.name, path = %path.display(), "installed plugin");
            } else {
                tracing::debug!(plugin = %manifest.name, "plugin disabled");
            }
            loaded.borrow_mut().push(PluginInfo {
                name: manifest.name.clone(),
                version: manifest.version.clone(),
                source: path.display().to_string(),
                enabled: manifest.enabled,
            });
        }
        Ok(())
    }
}

impl Plugin for DiscoveryPlugin {
    fn name(&self) -> &str {
        "discovery"
    }

    fn install(&self, hooks: &HookRegistry) -> Result<()> {
        let loaded = Rc::clone(&self.loaded);
        hooks.add_action(&catalog::CORE_READY, priority::HIGH, move |hooks, _| {
            Self::discover(hooks, &paths::plugins_root()?, &loaded)
        })?;

        let loaded = Rc::clone(&self.loaded);
        hooks.add_action(&catalog::PROJECT_ROOT_READY, priority::HIGH, move |hooks, root| {
            Self::discover(hooks, &paths::project_plugins(root), &loaded)
        })
    }
}
