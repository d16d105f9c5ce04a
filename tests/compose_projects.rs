use berth::config::Config;
use berth::defaults;
use berth::hooks::{catalog, HookRegistry};
use berth::plugin::PluginHost;
use berth::process::testing::ScriptedProcess;
use berth::runner::{ComposeFlavor, ComposeTaskRunner, TaskRunner};
use std::rc::Rc;
use tempfile::TempDir;

fn setup() -> (HookRegistry, Rc<ScriptedProcess>, PluginHost) {
    let hooks = HookRegistry::new();
    catalog::declare_all(&hooks).unwrap();
    let process = Rc::new(ScriptedProcess::new());
    let host = PluginHost::new(process.clone());
    host.install_builtins(&hooks).unwrap();
    (hooks, process, host)
}

#[test]
fn starting_one_project_stops_the_other() {
    let dir = TempDir::new().unwrap();
    let (hooks, process, _host) = setup();
    let config = Config::from_map(defaults::values());

    let local = ComposeTaskRunner::new(
        &hooks,
        process.clone(),
        dir.path(),
        config.clone(),
        ComposeFlavor::Local,
    )
    .unwrap();
    local.start(true).unwrap();

    assert_eq!(process.count_matching("--project-name berth_dev stop"), 1);
    assert_eq!(process.count_matching("--project-name berth_local stop"), 0);

    let dev = ComposeTaskRunner::new(&hooks, process.clone(), dir.path(), config, ComposeFlavor::Dev)
        .unwrap();
    dev.start(true).unwrap();

    assert_eq!(process.count_matching("--project-name berth_local stop"), 1);
    assert_eq!(process.count_matching("--project-name berth_dev stop"), 1);
}

#[test]
fn same_project_name_is_never_stopped() {
    let dir = TempDir::new().unwrap();
    let (hooks, process, _host) = setup();
    let config = Config::from_map(defaults::values())
        .with(defaults::LOCAL_PROJECT_NAME, "shared")
        .with(defaults::DEV_PROJECT_NAME, "shared");

    ComposeTaskRunner::new(&hooks, process.clone(), dir.path(), config, ComposeFlavor::Local)
        .unwrap()
        .start(true)
        .unwrap();

    assert_eq!(process.count_matching(" stop"), 0);
}

#[test]
fn failing_cross_stop_surfaces_as_listener_failure() {
    let dir = TempDir::new().unwrap();
    let (hooks, process, _host) = setup();
    process.on("--project-name berth_dev stop", berth::process::CommandOutput::failed(1, ""));

    let err = ComposeTaskRunner::new(
        &hooks,
        process.clone(),
        dir.path(),
        Config::from_map(defaults::values()),
        ComposeFlavor::Local,
    )
    .unwrap()
    .start(true)
    .unwrap_err();

    assert_eq!(err.code.as_str(), "hook.listener_failed");
    assert_eq!(err.details["failures"][0]["code"], "backend.command_failed");
}
