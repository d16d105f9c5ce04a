use berth::config::Config;
use berth::defaults;
use berth::env::SnapshotRenderer;
use berth::hooks::{catalog, context, HookRegistry};
use berth::paths;
use berth::plugin::PluginHost;
use berth::process::testing::ScriptedProcess;
use berth::runner::{jobs, ComposeFlavor, ComposeTaskRunner};
use berth::upgrade::{Release, Sequencer};
use std::fs;
use std::path::Path;
use std::rc::Rc;
use tempfile::TempDir;

fn write_plugin(root: &Path, file: &str, body: &str) {
    let dir = paths::project_plugins(root);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(file), body).unwrap();
}

#[test]
fn project_plugins_load_when_the_root_is_ready() {
    let dir = TempDir::new().unwrap();
    write_plugin(
        dir.path(),
        "forum.json",
        r#"{
            "name": "forum",
            "version": "2.0.0",
            "images": {"local": ["forum"]},
            "jobs": [{"name": "forum-init", "service": "forum", "command": "bin/init"}],
            "upgrade": {"palm": [{"id": "reindex", "service": "forum", "command": "bin/reindex"}]}
        }"#,
    );
    write_plugin(dir.path(), "off.json", r#"{"name": "off", "enabled": false, "images": {"local": ["off"]}}"#);

    let hooks = HookRegistry::new();
    catalog::declare_all(&hooks).unwrap();
    let process = Rc::new(ScriptedProcess::new());
    let host = PluginHost::new(process.clone());
    host.install_builtins(&hooks).unwrap();

    let guard = hooks.enter(context::PLUGINS);
    hooks
        .notify(&catalog::PROJECT_ROOT_READY, &dir.path().to_path_buf())
        .unwrap();

    let names: Vec<(String, bool)> = host
        .loaded()
        .into_iter()
        .filter(|p| p.source.ends_with(".json"))
        .map(|p| (p.name, p.enabled))
        .collect();
    assert_eq!(names, vec![("forum".to_string(), true), ("off".to_string(), false)]);

    let images = hooks
        .apply(&catalog::IMAGES_BUILD_REQUIRED, Vec::new(), &"local".to_string())
        .unwrap();
    assert_eq!(images, vec!["openedx", "forum"]);
    assert_eq!(jobs::resolve(&hooks, "forum-init").unwrap().service, "forum");

    let config = Config::from_map(defaults::values());
    let runner =
        ComposeTaskRunner::new(&hooks, process.clone(), dir.path(), config, ComposeFlavor::Local).unwrap();
    let plan = Sequencer::new(&hooks, &runner, &SnapshotRenderer)
        .plan(Some(Release::Olive))
        .unwrap();
    assert_eq!(plan.transitions[0].steps, vec!["ora2-folder-rename", "forum:reindex"]);

    guard.close().unwrap();
    assert!(jobs::resolve(&hooks, "forum-init").is_err());
}

#[test]
fn broken_manifest_fails_discovery() {
    let dir = TempDir::new().unwrap();
    write_plugin(dir.path(), "bad.json", r#"{"name": "bad", "upgrade": {"zebra": []}}"#);

    let hooks = HookRegistry::new();
    catalog::declare_all(&hooks).unwrap();
    let host = PluginHost::new(Rc::new(ScriptedProcess::new()));
    host.install_builtins(&hooks).unwrap();

    let err = hooks
        .with_context(context::PLUGINS, |hooks| {
            hooks.notify(&catalog::PROJECT_ROOT_READY, &dir.path().to_path_buf())
        })
        .unwrap_err();
    assert_eq!(err.code.as_str(), "hook.listener_failed");
    assert_eq!(err.details["failures"][0]["code"], "plugin.invalid_manifest");
}
