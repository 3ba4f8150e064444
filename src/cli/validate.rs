use std::path::PathBuf;

use action_flow::{references_credentials, validate_flow};
use anyhow::{bail, Result};
use clap::Args;
use leadflow::{FileFlowSource, FlowSource};
use leadflow_core_types::FlowKey;
use serde::Serialize;
use tracing::warn;

use super::context::CliContext;
use super::output::{print_json, OutputFormat};

#[derive(Args, Clone, Debug)]
pub struct ValidateArgs {
    /// Flow to check (repeatable); every flow under the flows directory when omitted
    #[arg(long = "flow", value_name = "PLATFORM/SLUG")]
    pub flows: Vec<FlowKey>,

    #[arg(long, value_name = "DIR")]
    pub flows_dir: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct FlowReport {
    flow: String,
    valid: bool,
    steps: usize,
    uses_credentials: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn check(source: &FileFlowSource, key: &FlowKey) -> FlowReport {
    let loaded = source
        .load(key)
        .and_then(|flow| validate_flow(&flow).map(|()| flow));
    match loaded {
        Ok(flow) => FlowReport {
            flow: key.to_string(),
            valid: true,
            steps: flow.steps.len(),
            uses_credentials: references_credentials(&flow),
            error: None,
        },
        Err(err) => FlowReport {
            flow: key.to_string(),
            valid: false,
            steps: 0,
            uses_credentials: false,
            error: Some(err.to_string()),
        },
    }
}

pub async fn cmd_validate(args: ValidateArgs, ctx: &CliContext) -> Result<()> {
    let root = args
        .flows_dir
        .unwrap_or_else(|| ctx.config().flows_dir.clone());
    let source = FileFlowSource::new(root);
    let keys = if args.flows.is_empty() {
        source.discover()?
    } else {
        args.flows
    };
    if keys.is_empty() {
        warn!(dir = %source.root().display(), "No flows found");
    }

    let reports: Vec<FlowReport> = keys.iter().map(|key| check(&source, key)).collect();
    for report in &reports {
        match ctx.output() {
            OutputFormat::Json => print_json(report)?,
            OutputFormat::Text => match &report.error {
                None => println!(
                    "ok       {} ({} steps{})",
                    report.flow,
                    report.steps,
                    if report.uses_credentials { ", uses credentials" } else { "" }
                ),
                Some(error) => println!("invalid  {}: {}", report.flow, error),
            },
        }
    }

    let invalid = reports.iter().filter(|report| !report.valid).count();
    if invalid > 0 {
        bail!("{invalid} of {} flows are invalid", reports.len());
    }
    Ok(())
}
