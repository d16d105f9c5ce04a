use clap::{Args, Subcommand};
use serde::Serialize;

use berth::context::{Backend, TaskContext};
use berth::env::SnapshotRenderer;
use berth::hooks::catalog;
use berth::runner::{jobs, JobDefinition};
use berth::upgrade::{Release, Sequencer, UpgradePlan, UpgradeReport};

use super::{CmdResult, GlobalArgs};

#[derive(Args, Debug)]
pub struct BackendArgs {
    #[command(subcommand)]
    pub command: BackendCommand,
}

#[derive(Subcommand, Debug)]
pub enum BackendCommand {
    /// Start all services
    Start {
        /// Run in the background
        #[arg(short, long)]
        detach: bool,
    },
    /// Stop all services
    Stop,
    /// Run a job from the job catalog
    Do {
        /// Job name
        job: String,
    },
    /// List jobs available to `do`
    Jobs,
    /// Run a command inside a running service
    Exec {
        /// Service name
        service: String,
        /// Command and arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Walk the deployment forward to the latest release
    Upgrade {
        /// Release currently deployed; required until one is recorded
        #[arg(long)]
        from: Option<String>,
        /// List pending steps without running them
        #[arg(long)]
        plan: bool,
    },
    /// List images to build
    Images,
}

#[derive(Debug, Serialize)]
#[serde(tag = "command")]
pub enum BackendOutput {
    #[serde(rename = "start")]
    Start { backend: String, detach: bool },
    #[serde(rename = "stop")]
    Stop { backend: String },
    #[serde(rename = "do")]
    Do {
        backend: String,
        job: String,
        exit_code: i32,
    },
    #[serde(rename = "jobs")]
    Jobs { jobs: Vec<JobDefinition> },
    #[serde(rename = "exec")]
    Exec {
        backend: String,
        service: String,
        exit_code: i32,
    },
    #[serde(rename = "upgrade.plan")]
    UpgradePlan(UpgradePlan),
    #[serde(rename = "upgrade")]
    Upgrade(UpgradeReport),
    #[serde(rename = "images")]
    Images { context: String, images: Vec<String> },
}

pub fn run(backend: Backend, args: BackendArgs, global: &GlobalArgs<'_>) -> CmdResult<BackendOutput> {
    let ctx = TaskContext::new(
        global.hooks,
        global.process.clone(),
        global.loader,
        &global.root,
        backend,
    );
    let name = backend.as_str().to_string();

    match args.command {
        BackendCommand::Start { detach } => {
            ctx.runner()?.start(detach)?;
            Ok((
                BackendOutput::Start {
                    backend: name,
                    detach,
                },
                0,
            ))
        }
        BackendCommand::Stop => {
            ctx.runner()?.stop()?;
            Ok((BackendOutput::Stop { backend: name }, 0))
        }
        BackendCommand::Do { job } => {
            let exit_code = ctx.runner()?.run_job(&job)?;
            Ok((
                BackendOutput::Do {
                    backend: name,
                    job,
                    exit_code,
                },
                exit_code,
            ))
        }
        BackendCommand::Jobs => {
            let jobs = jobs::effective(global.hooks)?;
            Ok((BackendOutput::Jobs { jobs }, 0))
        }
        BackendCommand::Exec { service, command } => {
            let exit_code = ctx.runner()?.exec_in_service(&service, &command)?;
            Ok((
                BackendOutput::Exec {
                    backend: name,
                    service,
                    exit_code,
                },
                exit_code,
            ))
        }
        BackendCommand::Upgrade { from, plan } => {
            let from = from.map(|f| f.parse::<Release>()).transpose()?;
            let runner = ctx.runner()?;
            let sequencer = Sequencer::new(global.hooks, runner, &SnapshotRenderer);
            if plan {
                Ok((BackendOutput::UpgradePlan(sequencer.plan(from)?), 0))
            } else {
                Ok((BackendOutput::Upgrade(sequencer.upgrade(from)?), 0))
            }
        }
        BackendCommand::Images => {
            let images = global
                .hooks
                .apply(&catalog::IMAGES_BUILD_REQUIRED, Vec::new(), &name)?;
            Ok((
                BackendOutput::Images {
                    context: name,
                    images,
                },
                0,
            ))
        }
    }
}
