use std::path::Path;

use watchpost_core::{Camera, CameraPatch};

use crate::commands::common::{read_json_document, CliContext};
use crate::error::CliError;

pub fn run_reconcile(
    context: &CliContext,
    local_path: &Path,
    incoming_path: &Path,
    timestamp: Option<i64>,
) -> Result<(), CliError> {
    let local: Camera = read_json_document(local_path)?;
    let incoming: CameraPatch = read_json_document(incoming_path)?;

    if local.id != incoming.id {
        return Err(CliError::InvalidDocument {
            path: incoming_path.display().to_string(),
            message: format!("id '{}' does not match local id '{}'", incoming.id, local.id),
        });
    }

    let result = context
        .config
        .reconcile_schema()
        .reconcile(&local, &incoming, timestamp);
    tracing::debug!(
        camera_id = %local.id,
        conflict = result.conflict,
        "reconciled update"
    );
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
