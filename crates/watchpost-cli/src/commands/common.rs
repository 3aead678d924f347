use std::env;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use watchpost_core::models::{OperationPayload, SyncStatus};
use watchpost_core::queue::FlushReport;
use watchpost_core::remote::{HttpMutationClient, MutationApi, ReplayFailure};
use watchpost_core::storage::LibSqlStore;
use watchpost_core::{
    OfflineQueue, OperationId, OperationKind, QueuedOperation, ResilienceConfig,
};

use crate::error::CliError;

pub type CliQueue = OfflineQueue<LibSqlStore, CliApi>;

/// Replay target for the CLI queue.
///
/// Listing and editing the queue works without an endpoint; only replaying
/// commands require [`CliApi::Http`].
pub enum CliApi {
    Http(HttpMutationClient),
    Unconfigured,
}

impl MutationApi for CliApi {
    async fn replay(&self, operation: &QueuedOperation) -> Result<(), ReplayFailure> {
        match self {
            Self::Http(client) => client.replay(operation).await,
            Self::Unconfigured => Err(ReplayFailure::network("no API endpoint configured")),
        }
    }
}

/// Loaded config plus the paths it was resolved from.
pub struct CliContext {
    pub config: ResilienceConfig,
    pub config_path: PathBuf,
    pub db_path: PathBuf,
}

impl CliContext {
    pub fn load(
        cli_config_path: Option<PathBuf>,
        cli_db_path: Option<PathBuf>,
    ) -> Result<Self, CliError> {
        let config_path = resolve_config_path(cli_config_path)?;
        let config = ResilienceConfig::load_with_env(&config_path)?;
        let db_path = resolve_db_path(cli_db_path, &config)?;
        Ok(Self {
            config,
            config_path,
            db_path,
        })
    }

    pub fn api_client(&self) -> Result<HttpMutationClient, CliError> {
        let base_url = self
            .config
            .api_base_url
            .clone()
            .ok_or(CliError::ApiNotConfigured)?;
        Ok(HttpMutationClient::new(
            base_url,
            self.config.api_token.clone(),
            self.config.request_timeout(),
        )?)
    }

    /// Open the queue without a replay endpoint.
    pub async fn open_queue(&self) -> Result<CliQueue, CliError> {
        self.open_queue_with(CliApi::Unconfigured).await
    }

    /// Open the queue for commands that replay operations.
    pub async fn open_replaying_queue(&self) -> Result<CliQueue, CliError> {
        let client = self.api_client()?;
        self.open_queue_with(CliApi::Http(client)).await
    }

    async fn open_queue_with(&self, api: CliApi) -> Result<CliQueue, CliError> {
        let store = LibSqlStore::open(&self.db_path).await?;
        Ok(OfflineQueue::open(store, api, self.config.queue).await)
    }
}

pub fn resolve_config_path(cli_config_path: Option<PathBuf>) -> Result<PathBuf, CliError> {
    match cli_config_path.or_else(|| env::var_os("WATCHPOST_CONFIG").map(PathBuf::from)) {
        Some(path) => Ok(path),
        None => default_config_path(),
    }
}

pub fn default_config_path() -> Result<PathBuf, CliError> {
    dirs::config_dir()
        .map(|dir| dir.join("watchpost").join("config.json"))
        .ok_or_else(|| CliError::Config("failed to resolve config directory".to_string()))
}

pub fn resolve_db_path(
    cli_db_path: Option<PathBuf>,
    config: &ResilienceConfig,
) -> Result<PathBuf, CliError> {
    if let Some(path) = cli_db_path.or_else(|| config.database_path()) {
        return Ok(path);
    }
    default_db_path()
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("watchpost").join("watchpost.db"))
        .ok_or_else(|| CliError::Config("failed to resolve data directory".to_string()))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationListItem {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: OperationKind,
    pub sync_status: SyncStatus,
    pub retry_count: u32,
    pub queued_at: i64,
    pub queued_at_iso: String,
    pub relative_time: String,
    pub targets: Vec<String>,
    pub error: Option<String>,
}

pub fn operation_to_list_item(operation: &QueuedOperation, now_ms: i64) -> OperationListItem {
    OperationListItem {
        id: operation.id.to_string(),
        kind: operation.kind,
        sync_status: operation.sync_status,
        retry_count: operation.retry_count,
        queued_at: operation.queued_at,
        queued_at_iso: format_timestamp(operation.queued_at),
        relative_time: format_relative_time(operation.queued_at, now_ms),
        targets: operation_targets(&operation.payload),
        error: operation.last_error.clone(),
    }
}

pub fn format_operation_lines(operations: &[QueuedOperation]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    operations
        .iter()
        .map(|operation| {
            let id = operation.id.to_string();
            let short_id = id.chars().take(13).collect::<String>();
            let status = match operation.sync_status {
                SyncStatus::Pending => "pending",
                SyncStatus::Synced => "synced",
                SyncStatus::Failed => "failed",
            };
            let targets = operation_targets(&operation.payload).join(",");
            let relative_time = format_relative_time(operation.queued_at, now_ms);
            let line = format!(
                "{short_id:<13}  {:<20}  {status:<7}  retries={}  {targets:<16}  {relative_time}",
                operation.kind.as_str(),
                operation.retry_count
            );
            match &operation.last_error {
                Some(error) => format!("{line}  {error}"),
                None => line,
            }
        })
        .collect()
}

pub fn format_report_line(report: &FlushReport) -> String {
    if report.skipped_offline {
        return "offline, nothing replayed".to_string();
    }
    if report.store_unavailable && report.attempted == 0 {
        return "queue store unreadable, nothing replayed".to_string();
    }
    format!(
        "attempted={} synced={} retrying={} failed={}",
        report.attempted, report.synced, report.retrying, report.failed
    )
}

fn operation_targets(payload: &OperationPayload) -> Vec<String> {
    if payload.target_ids.is_empty() {
        vec![payload.target_id.clone()]
    } else {
        payload.target_ids.clone()
    }
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else {
        format!("{}d ago", diff / day)
    }
}

/// Parse `NAME=VALUE`; VALUE is JSON when it parses, otherwise a string.
pub fn parse_field_assignment(raw: &str) -> Result<(String, Value), CliError> {
    let Some((name, value)) = raw.split_once('=') else {
        return Err(CliError::InvalidField(raw.to_string()));
    };
    let name = name.trim();
    if name.is_empty() {
        return Err(CliError::InvalidField(raw.to_string()));
    }
    let value = value.trim();
    let value =
        serde_json::from_str::<Value>(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.to_string(), value))
}

pub fn build_payload(
    kind: OperationKind,
    targets: &[String],
    fields: &[String],
) -> Result<OperationPayload, CliError> {
    let targets = targets
        .iter()
        .map(|target| target.trim())
        .filter(|target| !target.is_empty())
        .collect::<Vec<_>>();

    let mut payload = match (kind, targets.as_slice()) {
        (_, []) => {
            return Err(CliError::InvalidTargets(
                "at least one --target is required".to_string(),
            ))
        }
        (OperationKind::BulkSettingsUpdate, targets) => {
            OperationPayload::for_targets(targets.iter().copied())
        }
        (_, [target]) => OperationPayload::for_target(*target),
        (kind, _) => {
            return Err(CliError::InvalidTargets(format!(
                "{kind} takes exactly one --target"
            )))
        }
    };

    for field in fields {
        let (name, value) = parse_field_assignment(field)?;
        payload = payload.with_field(name, value);
    }
    Ok(payload)
}

/// Resolve a full id or unique prefix against the queued operations.
pub fn resolve_operation_id(
    operations: &[QueuedOperation],
    raw: &str,
) -> Result<OperationId, CliError> {
    let needle = raw.trim();
    if needle.is_empty() {
        return Err(CliError::EmptyOperationId);
    }
    if let Ok(id) = needle.parse::<OperationId>() {
        return Ok(id);
    }

    let matches = operations
        .iter()
        .filter(|operation| operation.id.to_string().starts_with(needle))
        .map(|operation| operation.id)
        .collect::<Vec<_>>();
    match matches.as_slice() {
        [] => Err(CliError::OperationNotFound(needle.to_string())),
        [id] => Ok(*id),
        _ => Err(CliError::AmbiguousOperationId(format!(
            "Operation ID prefix '{needle}' matches {} operations",
            matches.len()
        ))),
    }
}

pub fn read_json_document<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, CliError> {
    let raw = std::fs::read_to_string(path).map_err(|error| CliError::InvalidDocument {
        path: path.display().to_string(),
        message: error.to_string(),
    })?;
    serde_json::from_str(&raw).map_err(|error| CliError::InvalidDocument {
        path: path.display().to_string(),
        message: error.to_string(),
    })
}
