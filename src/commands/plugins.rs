use clap::Args;
use serde::Serialize;

use berth::paths;
use berth::plugin::PluginInfo;

use super::{CmdResult, GlobalArgs};

#[derive(Args, Debug)]
pub struct PluginsArgs {}

#[derive(Debug, Serialize)]
pub struct PluginsOutput {
    pub plugins_root: String,
    pub project_plugins: String,
    pub plugins: Vec<PluginInfo>,
}

pub fn run(_args: PluginsArgs, global: &GlobalArgs<'_>) -> CmdResult<PluginsOutput> {
    Ok((
        PluginsOutput {
            plugins_root: paths::plugins_root()?.display().to_string(),
            project_plugins: paths::project_plugins(&global.root).display().to_string(),
            plugins: global.plugins.loaded(),
        },
        0,
    ))
}
