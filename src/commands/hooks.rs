use clap::Args;
use serde::Serialize;

use berth::hooks::PointSummary;

use super::{CmdResult, GlobalArgs};

#[derive(Args, Debug)]
pub struct HooksArgs {
    /// Only list points with at least one active listener
    #[arg(long)]
    pub active: bool,
}

#[derive(Debug, Serialize)]
pub struct HooksOutput {
    pub contexts: Vec<String>,
    pub points: Vec<PointSummary>,
}

pub fn run(args: HooksArgs, global: &GlobalArgs<'_>) -> CmdResult<HooksOutput> {
    let points = global
        .hooks
        .points()
        .into_iter()
        .filter(|p| !args.active || p.active_listeners > 0)
        .collect();

    Ok((
        HooksOutput {
            contexts: global.hooks.active_contexts(),
            points,
        },
        0,
    ))
}
