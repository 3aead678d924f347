use chrono::Utc;
use serde::Serialize;
use watchpost_core::queue::{FlushReport, QueueCounts};
use watchpost_core::{OperationKind, SyncState};

use crate::commands::common::{
    build_payload, format_operation_lines, format_report_line, operation_to_list_item,
    resolve_operation_id, CliContext, OperationListItem,
};
use crate::error::CliError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueueStatus {
    pending: usize,
    failed: usize,
    sync_state: SyncState,
}

pub async fn run_list(context: &CliContext, as_json: bool) -> Result<(), CliError> {
    let queue = context.open_queue().await?;
    let operations = queue.operations().await;

    if as_json {
        let now_ms = Utc::now().timestamp_millis();
        let items = operations
            .iter()
            .map(|operation| operation_to_list_item(operation, now_ms))
            .collect::<Vec<OperationListItem>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else if operations.is_empty() {
        println!("Queue is empty");
    } else {
        for line in format_operation_lines(&operations) {
            println!("{line}");
        }
    }
    Ok(())
}

pub async fn run_status(context: &CliContext, as_json: bool) -> Result<(), CliError> {
    let queue = context.open_queue().await?;
    let QueueCounts { pending, failed } = queue.counts();
    let status = QueueStatus {
        pending,
        failed,
        sync_state: queue.sync_state(),
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!(
            "{}  pending={} failed={}",
            status.sync_state.as_str(),
            status.pending,
            status.failed
        );
    }
    Ok(())
}

pub async fn run_enqueue(
    context: &CliContext,
    kind: OperationKind,
    targets: &[String],
    fields: &[String],
) -> Result<(), CliError> {
    let payload = build_payload(kind, targets, fields)?;
    let queue = context.open_queue().await?;
    let id = queue.enqueue(kind, payload).await;
    println!("{id}");
    Ok(())
}

pub async fn run_flush(context: &CliContext, as_json: bool) -> Result<(), CliError> {
    let queue = context.open_replaying_queue().await?;
    let report = queue.flush().await;
    print_report(&report, as_json)
}

pub async fn run_retry(context: &CliContext, as_json: bool) -> Result<(), CliError> {
    let queue = context.open_replaying_queue().await?;
    let report = queue.retry_failed().await;
    print_report(&report, as_json)
}

pub async fn run_remove(context: &CliContext, raw_id: &str) -> Result<(), CliError> {
    let queue = context.open_queue().await?;
    let operations = queue.operations().await;
    let id = resolve_operation_id(&operations, raw_id)?;

    if queue.remove(&id).await {
        println!("Removed {id}");
        Ok(())
    } else {
        Err(CliError::OperationNotFound(raw_id.trim().to_string()))
    }
}

fn print_report(report: &FlushReport, as_json: bool) -> Result<(), CliError> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        println!("{}", format_report_line(report));
    }
    Ok(())
}
