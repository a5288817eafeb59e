//! CLI command definitions.

use clap::{Args, Subcommand, ValueEnum};
use sluice_scheduler::SkipPolicy;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a workflow definition and print its expanded graph
    Validate {
        /// Path to the workflow YAML file
        path: PathBuf,
    },
    /// Run a workflow to completion
    Run(RunArgs),
}

#[derive(Args)]
pub struct RunArgs {
    /// Path to the workflow YAML file
    pub path: PathBuf,

    /// Branch the run is invoked for
    #[arg(long, default_value = "main", conflicts_with = "tag")]
    pub branch: String,

    /// Tag the run is invoked for, instead of a branch
    #[arg(long)]
    pub tag: Option<String>,

    /// Parameter overrides as KEY=VALUE
    #[arg(short = 'p', long = "param", value_name = "KEY=VALUE")]
    pub params: Vec<String>,

    /// Maximum concurrently running instances
    #[arg(long, default_value_t = 4)]
    pub slots: usize,

    /// How a skipped job affects its dependents
    #[arg(long, value_enum, default_value_t = SkipPolicyArg::Satisfies)]
    pub skip_policy: SkipPolicyArg,

    /// Cache directory (defaults to .sluice/cache next to the workflow)
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Emit the full run report as JSON instead of the summary
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SkipPolicyArg {
    /// Skipped requirements count as satisfied
    Satisfies,
    /// Skipped requirements cancel their dependents
    Fails,
}

impl From<SkipPolicyArg> for SkipPolicy {
    fn from(arg: SkipPolicyArg) -> Self {
        match arg {
            SkipPolicyArg::Satisfies => SkipPolicy::SatisfiesDependents,
            SkipPolicyArg::Fails => SkipPolicy::FailsDependents,
        }
    }
}
