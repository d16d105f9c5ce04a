//! Plugins attach behavior to the hook catalog.
//!
//! Built-in plugins are installed globally at startup. Manifest plugins are
//! discovered from disk while the `plugins` context is entered, so their
//! listeners are tied to that context.

pub mod builtin;
pub mod manifest;

use serde::Serialize;
use std::cell::RefCell;
use std::rc::Rc;

use crate::error::Result;
use crate::hooks::HookRegistry;
use crate::process::ProcessRunner;

pub use manifest::{ManifestPlugin, PluginManifest};

pub trait Plugin {
    fn name(&self) -> &str;

    fn install(&self, hooks: &HookRegistry) -> Result<()>;
}

#[derive(Debug, Clone, Serialize)]
pub struct PluginInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// `builtin`, or the manifest path.
    pub source: String,
    pub enabled: bool,
}

/// Installs built-ins and keeps track of everything loaded since.
pub struct PluginHost {
    process: Rc<dyn ProcessRunner>,
    loaded: Rc<RefCell<Vec<PluginInfo>>>,
}

impl PluginHost {
    pub fn new(process: Rc<dyn ProcessRunner>) -> Self {
        Self {
            process,
            loaded: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn install_builtins(&self, hooks: &HookRegistry) -> Result<()> {
        let builtins: Vec<Box<dyn Plugin>> = vec![
            Box::new(builtin::LocalPlugin {
                process: Rc::clone(&self.process),
            }),
            Box::new(builtin::DevPlugin {
                process: Rc::clone(&self.process),
            }),
            Box::new(builtin::K8sPlugin),
            Box::new(builtin::DiscoveryPlugin {
                loaded: Rc::clone(&self.loaded),
            }),
        ];
        for plugin in &builtins {
            self.install(hooks, plugin.as_ref(), "builtin")?;
        }
        Ok(())
    }

    pub fn install(&self, hooks: &HookRegistry, plugin: &dyn Plugin, source: &str) -> Result<()> {
        plugin.install(hooks)?;
        tracing::debug!(plugin = plugin.name(), source, "installed plugin");
        self.loaded.borrow_mut().push(PluginInfo {
            name: plugin.name().to_string(),
            version: None,
            source: source.to_string(),
            enabled: true,
        });
        Ok(())
    }

    pub fn loaded(&self) -> Vec<PluginInfo> {
        self.loaded.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::catalog;
    use crate::process::testing::ScriptedProcess;

    #[test]
    fn builtins_contribute_images_per_context() {
        let hooks = HookRegistry::new();
        catalog::declare_all(&hooks).unwrap();
        let host = PluginHost::new(Rc::new(ScriptedProcess::new()));
        host.install_builtins(&hooks).unwrap();

        let dev = hooks
            .apply(&catalog::IMAGES_BUILD_REQUIRED, Vec::new(), &"dev".to_string())
            .unwrap();
        assert_eq!(dev, vec!["openedx-dev"]);
        assert_eq!(host.loaded().len(), 4);
    }
}
