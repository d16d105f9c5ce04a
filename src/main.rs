use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::rc::Rc;

use berth::config::JsonConfigLoader;
use berth::hooks::{catalog, context, HookRegistry};
use berth::plugin::PluginHost;
use berth::process::{ProcessRunner, SystemProcess};
use berth::Error;
use tracing_subscriber::EnvFilter;

use commands::GlobalArgs;

mod commands;
mod output;
mod tty;

use commands::{backend, hooks, plugins};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable holding the diagnostics filter, e.g. `berth=debug`.
const LOG_ENV: &str = "BERTH_LOG";

#[derive(Parser)]
#[command(name = "berth")]
#[command(version = VERSION)]
#[command(about = "Orchestrate platform deployments on compose and cluster backends")]
struct Cli {
    /// Project root (defaults to the current directory)
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the platform locally with docker compose
    Local(backend::BackendArgs),
    /// Run the platform in development mode with docker compose
    Dev(backend::BackendArgs),
    /// Run the platform on a Kubernetes cluster
    K8s(backend::BackendArgs),
    /// List hook points and active contexts
    Hooks(hooks::HooksArgs),
    /// List installed plugins
    Plugins(plugins::PluginsArgs),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn resolve_root(root: Option<&Path>) -> berth::Result<PathBuf> {
    let cwd = std::env::current_dir()
        .map_err(|e| Error::internal_io(e.to_string(), Some("read current dir".to_string())))?;
    Ok(match root {
        Some(path) if path.is_absolute() => path.to_path_buf(),
        Some(path) => cwd.join(path),
        None => cwd,
    })
}

fn run(cli: Cli) -> (berth::Result<serde_json::Value>, i32) {
    let hooks = HookRegistry::new();
    let process: Rc<dyn ProcessRunner> = Rc::new(SystemProcess);
    let loader = JsonConfigLoader;
    let host = PluginHost::new(Rc::clone(&process));

    let setup = catalog::declare_all(&hooks).and_then(|_| host.install_builtins(&hooks));
    if let Err(err) = setup {
        return output::map_cmd_result_to_json::<()>(Err(err));
    }

    let outcome = hooks.with_context(context::PLUGINS, |hooks| {
        hooks.notify(&catalog::CORE_READY, &())?;
        let root = resolve_root(cli.root.as_deref())?;
        hooks.notify(&catalog::PROJECT_ROOT_READY, &root)?;
        tracing::debug!(root = %root.display(), "project root ready");

        let global = GlobalArgs {
            root,
            hooks,
            process: Rc::clone(&process),
            loader: &loader,
            plugins: &host,
        };
        Ok(commands::run_json(cli.command, &global))
    });

    outcome.unwrap_or_else(|err| output::map_cmd_result_to_json::<()>(Err(err)))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    let (json_result, exit_code) = run(cli);
    if let Err(err) = output::print_json_result(json_result) {
        eprintln!("{}", err);
    }

    ExitCode::from(exit_code_to_u8(exit_code))
}

fn exit_code_to_u8(code: i32) -> u8 {
    if code <= 0 {
        0
    } else if code >= 255 {
        255
    } else {
        code as u8
    }
}
