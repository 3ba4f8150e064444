use std::path::PathBuf;
use std::sync::Arc;

use action_primitives::{Script, ScriptedDriverFactory};
use anyhow::{bail, Context, Result};
use clap::Args;
use leadflow::{load_leads, FileFlowSource, Scheduler};
use leadflow_core_types::{FlowKey, RunStatus};
use leadflow_run_store::InMemoryExecutionStore;
use leadflow_scheduler::{EnvCredentialProvider, RunHandle, RunRequest, StopPolicy};
use tracing::{debug, info, warn};

use super::context::CliContext;
use super::output::print_event;

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Flow to run every lead through (repeatable)
    #[arg(long = "flow", required = true, value_name = "PLATFORM/SLUG")]
    pub flows: Vec<FlowKey>,

    /// Lead file (.json or .csv)
    #[arg(long, value_name = "FILE")]
    pub leads: PathBuf,

    /// Parallel workers
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Attempts per item, the first one included
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// What cancellation does to running items (drain or interrupt)
    #[arg(long)]
    pub stop_policy: Option<StopPolicy>,

    /// Directory holding <platform>/<slug>.yaml flow documents
    #[arg(long, value_name = "DIR")]
    pub flows_dir: Option<PathBuf>,

    #[arg(long, value_name = "DIR")]
    pub artifacts_dir: Option<PathBuf>,

    /// Write the run, items, attempts and step logs to this JSON file
    #[arg(long, value_name = "FILE")]
    pub snapshot: Option<PathBuf>,

    /// Make the dry-run driver fail every interaction with this selector
    #[arg(long, value_name = "SELECTOR")]
    pub fail_on: Vec<String>,
}

pub async fn cmd_run(args: RunArgs, ctx: &CliContext) -> Result<()> {
    let mut config = ctx.config().clone();
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(max_attempts) = args.max_attempts {
        config.max_attempts = max_attempts;
    }
    if let Some(policy) = args.stop_policy {
        config.stop_policy = policy;
    }
    if let Some(dir) = args.flows_dir {
        config.flows_dir = dir;
    }
    if let Some(dir) = args.artifacts_dir {
        config.artifacts_dir = dir;
    }
    config.validate()?;
    debug!(config_file = ?ctx.config_path(), ?config, "Effective configuration");

    let leads = load_leads(&args.leads)?;
    info!(leads = leads.len(), flows = args.flows.len(), "Loaded leads");

    let script = args
        .fail_on
        .iter()
        .fold(Script::new(), |script, selector| script.fail_on(selector.as_str()));
    let store = InMemoryExecutionStore::shared();
    let scheduler = Scheduler::new(
        config.scheduler(),
        store.clone(),
        Arc::new(ScriptedDriverFactory::new(script)),
        Arc::new(FileFlowSource::new(&config.flows_dir)),
        Arc::new(EnvCredentialProvider::new()),
    );

    let request = RunRequest::for_leads(
        leads.into_iter().map(|lead| lead.into_pair()).collect(),
        &args.flows,
    );
    let RunHandle {
        run_id,
        mut events,
        completion,
    } = scheduler
        .run_all(request)
        .await
        .context("Failed to start run")?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => print_event(ctx.output(), &event)?,
                None => break,
            },
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                warn!(run_id = %run_id, "Interrupt received, cancelling run");
                scheduler.cancel(&run_id);
            }
        }
    }

    let summary = completion.wait().await?;

    if let Some(path) = &args.snapshot {
        store
            .write_snapshot(path)
            .with_context(|| format!("Failed to write snapshot to {}", path.display()))?;
        info!(path = %path.display(), "Wrote run snapshot");
    }

    match summary.status {
        RunStatus::Completed => Ok(()),
        status => bail!("run {} finished {}", summary.run_id, status),
    }
}
