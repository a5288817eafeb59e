//! Command handlers.

use crate::commands::RunArgs;
use console::style;
use sluice_cache::FilesystemStore;
use sluice_core::context::InvocationContext;
use sluice_core::definition::WorkflowDefinition;
use sluice_core::ports::MemorySink;
use sluice_core::report::RunReport;
use sluice_core::run::{InstanceState, RunStatus};
use sluice_runner::ShellExecutor;
use sluice_scheduler::{GraphBuilder, RunSummary, Scheduler, SchedulerConfig};
use sluice_workspace::WorkspaceStore;
use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

pub async fn validate(path: &Path) -> Result<(), Box<dyn Error>> {
    let content = tokio::fs::read_to_string(path).await?;
    let definition = WorkflowDefinition::from_yaml(&content)?;
    let run = GraphBuilder::new().build(&definition)?;

    println!(
        "{} {} ({} jobs, {} instances)",
        style("valid").green().bold(),
        definition.name,
        definition.jobs.len(),
        run.instances.len()
    );
    for id in &run.order {
        let instance = &run.instances[id];
        if instance.requires.is_empty() {
            println!("  {}", id);
        } else {
            let requires: Vec<&str> = instance.requires.iter().map(|r| r.as_str()).collect();
            println!("  {} <- {}", id, requires.join(", "));
        }
    }
    Ok(())
}

pub async fn run_workflow(args: RunArgs) -> Result<RunStatus, Box<dyn Error>> {
    let content = tokio::fs::read_to_string(&args.path).await?;
    let definition = WorkflowDefinition::from_yaml(&content)?;
    let run = GraphBuilder::new().build(&definition)?;
    let run_id = run.id;

    let mut ctx = match &args.tag {
        Some(tag) => InvocationContext::tag(tag),
        None => InvocationContext::branch(&args.branch),
    };
    ctx.env = std::env::vars().collect();
    for pair in &args.params {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("invalid parameter '{}', expected KEY=VALUE", pair))?;
        ctx.parameters.insert(key.to_string(), value.to_string());
    }

    let cache_dir = args.cache_dir.clone().unwrap_or_else(|| {
        args.path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(".sluice/cache")
    });

    let scheduler = Scheduler::new(
        Arc::new(ShellExecutor::new()),
        Arc::new(FilesystemStore::new(cache_dir)),
        Arc::new(WorkspaceStore::new()),
        Arc::new(MemorySink::new()),
        SchedulerConfig {
            slots: args.slots,
            skip_policy: args.skip_policy.into(),
            ..SchedulerConfig::default()
        },
    );

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, canceling run");
            let _ = cancel_tx.send(true);
        }
    });

    info!(run_id = %run_id, workflow = %definition.name, "starting run");
    let report = scheduler.run_with_cancel(run, ctx, cancel_rx).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }
    Ok(report.status)
}

fn print_summary(report: &RunReport) {
    for instance in &report.instances {
        let (mark, label) = match instance.state {
            InstanceState::Succeeded => (style("✓").green(), style("succeeded").green()),
            InstanceState::Failed => (style("✗").red(), style("failed").red()),
            InstanceState::Canceled => (style("-").yellow(), style("canceled").yellow()),
            InstanceState::Skipped => (style("·").dim(), style("skipped").dim()),
            other => (style("?").dim(), style(state_name(other)).dim()),
        };
        let timing = instance
            .duration_ms
            .map(|ms| format!(" ({} ms)", ms))
            .unwrap_or_default();
        let cache = instance
            .cache
            .as_ref()
            .map(|c| {
                if c.hit {
                    " [cache hit]".to_string()
                } else if c.saved {
                    " [cache saved]".to_string()
                } else {
                    String::new()
                }
            })
            .unwrap_or_default();
        println!("{} {} {}{}{}", mark, instance.instance, label, timing, cache);
        if let Some(error) = &instance.error {
            println!("    {}", style(error).red().dim());
        }
    }

    let summary = RunSummary::from_report(report);
    let status = match report.status {
        RunStatus::Succeeded => style("succeeded").green().bold(),
        RunStatus::Failed => style("failed").red().bold(),
        RunStatus::Canceled => style("canceled").yellow().bold(),
        RunStatus::Running => style("running").dim(),
    };
    println!(
        "\n{} {} in {} ms: {} succeeded, {} failed, {} skipped, {} canceled",
        report.name,
        status,
        report.duration_ms,
        summary.succeeded,
        summary.failed,
        summary.skipped,
        summary.canceled
    );
}

fn state_name(state: InstanceState) -> &'static str {
    match state {
        InstanceState::Pending => "pending",
        InstanceState::Blocked => "blocked",
        InstanceState::Ready => "ready",
        InstanceState::Running => "running",
        InstanceState::Skipped => "skipped",
        InstanceState::Succeeded => "succeeded",
        InstanceState::Failed => "failed",
        InstanceState::Canceled => "canceled",
    }
}
