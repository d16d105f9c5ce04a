use std::path::PathBuf;
use std::rc::Rc;

use berth::config::ConfigLoader;
use berth::hooks::HookRegistry;
use berth::plugin::PluginHost;
use berth::process::ProcessRunner;

pub type CmdResult<T> = berth::Result<(T, i32)>;

/// Shared state handed to every command.
pub(crate) struct GlobalArgs<'a> {
    pub root: PathBuf,
    pub hooks: &'a HookRegistry,
    pub process: Rc<dyn ProcessRunner>,
    pub loader: &'a dyn ConfigLoader,
    pub plugins: &'a PluginHost,
}

pub mod backend;
pub mod hooks;
pub mod plugins;

macro_rules! dispatch {
    ($args:expr, $global:expr, $module:ident) => {
        crate::output::map_cmd_result_to_json($module::run($args, $global))
    };
}

pub(crate) fn run_json(
    command: crate::Commands,
    global: &GlobalArgs<'_>,
) -> (berth::Result<serde_json::Value>, i32) {
    crate::tty::status("berth is working...");

    match command {
        crate::Commands::Local(args) => {
            crate::output::map_cmd_result_to_json(backend::run(berth::context::Backend::Local, args, global))
        }
        crate::Commands::Dev(args) => {
            crate::output::map_cmd_result_to_json(backend::run(berth::context::Backend::Dev, args, global))
        }
        crate::Commands::K8s(args) => {
            crate::output::map_cmd_result_to_json(backend::run(berth::context::Backend::K8s, args, global))
        }
        crate::Commands::Hooks(args) => dispatch!(args, global, hooks),
        crate::Commands::Plugins(args) => dispatch!(args, global, plugins),
    }
}
