use anyhow::Result;
use clap::ValueEnum;
use leadflow::{ProgressEvent, RunSummary};
use serde::Serialize;

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum OutputFormat {
    Text,
    /// One JSON document per line
    Json,
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

pub fn print_event(format: OutputFormat, event: &ProgressEvent) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(event),
        OutputFormat::Text => {
            println!("{}", describe_event(event));
            Ok(())
        }
    }
}

fn describe_event(event: &ProgressEvent) -> String {
    match event {
        ProgressEvent::Queued {
            item_id,
            lead_id,
            flow,
        } => format!("queued     {item_id} lead {lead_id} -> {flow}"),
        ProgressEvent::Started { item_id, attempt } => {
            format!("started    {item_id} attempt {attempt}")
        }
        ProgressEvent::Progress {
            item_id,
            step,
            total,
        } => format!("step       {item_id} {step}/{total}"),
        ProgressEvent::Retrying {
            item_id,
            attempt,
            error,
        } => format!("retrying   {item_id} attempt {attempt} after: {error}"),
        ProgressEvent::Succeeded { item_id } => format!("succeeded  {item_id}"),
        ProgressEvent::Failed { item_id, error } => format!("failed     {item_id}: {error}"),
        ProgressEvent::Cancelled { item_id } => format!("cancelled  {item_id}"),
        ProgressEvent::Done { summary } | ProgressEvent::Stopped { summary } => {
            describe_summary(summary)
        }
    }
}

fn describe_summary(summary: &RunSummary) -> String {
    let counts = &summary.counts;
    format!(
        "run {} {}: {} total, {} succeeded, {} failed, {} cancelled, {} pending ({} ms)",
        summary.run_id,
        summary.status,
        counts.total,
        counts.success,
        counts.error,
        counts.cancelled,
        counts.pending,
        summary.duration_ms
    )
}
