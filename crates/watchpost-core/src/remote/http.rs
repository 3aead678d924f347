//! HTTP implementation of [`MutationApi`].

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::models::{OperationKind, QueuedOperation};
use crate::util::{compact_text, is_http_url, normalize_text_option};

use super::{MutationApi, ReplayFailure};

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Invalid remote API configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Remote API HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Replays queued operations against the dashboard REST API.
#[derive(Clone)]
pub struct HttpMutationClient {
    base_url: String,
    auth_token: Option<String>,
    client: Client,
}

impl std::fmt::Debug for HttpMutationClient {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpMutationClient")
            .field("base_url", &self.base_url)
            .field(
                "auth_token",
                &self.auth_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish_non_exhaustive()
    }
}

impl HttpMutationClient {
    pub fn new(
        base_url: impl Into<String>,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> RemoteResult<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        Ok(Self {
            base_url,
            auth_token: normalize_text_option(auth_token),
            client: Client::builder().timeout(timeout).build()?,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request_for(&self, operation: &QueuedOperation) -> Result<RequestBuilder, ReplayFailure> {
        let (method, path, body) = route(operation)?;
        let url = format!("{}{path}", self.base_url);
        let mut request = self
            .client
            .request(method, url)
            .header(reqwest::header::ACCEPT, "application/json")
            .header("Idempotency-Key", operation.id.as_str())
            .json(&body);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        Ok(request)
    }
}

impl MutationApi for HttpMutationClient {
    async fn replay(&self, operation: &QueuedOperation) -> Result<(), ReplayFailure> {
        let request = self.request_for(operation)?;
        let response = request
            .send()
            .await
            .map_err(|error| ReplayFailure::network(error.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(ReplayFailure::http(
            status.as_u16(),
            parse_api_error(status, &body),
        ))
    }
}

/// Map an operation to the call the original user action made.
fn route(operation: &QueuedOperation) -> Result<(Method, String, Value), ReplayFailure> {
    let payload = &operation.payload;
    let target = || {
        normalize_text_option(Some(payload.target_id.clone()))
            .map(|id| urlencoding::encode(&id).into_owned())
            .ok_or_else(|| {
                ReplayFailure::invalid(format!("{} requires a target id", operation.kind))
            })
    };

    match operation.kind {
        OperationKind::EntityUpdate | OperationKind::ToggleFlag => {
            if payload.fields.is_empty() {
                return Err(ReplayFailure::invalid(format!(
                    "{} has no fields to apply",
                    operation.kind
                )));
            }
            Ok((
                Method::PATCH,
                format!("/cameras/{}", target()?),
                Value::Object(payload.fields.clone()),
            ))
        }
        OperationKind::StatusChange => {
            let status = payload.fields.get("status").cloned().ok_or_else(|| {
                ReplayFailure::invalid("status-change requires a status field")
            })?;
            Ok((
                Method::PUT,
                format!("/cameras/{}/status", target()?),
                json!({ "status": status }),
            ))
        }
        OperationKind::BulkSettingsUpdate => {
            if payload.target_ids.is_empty() {
                return Err(ReplayFailure::invalid(
                    "bulk-settings-update requires target ids",
                ));
            }
            Ok((
                Method::POST,
                "/cameras/bulk-settings".to_string(),
                json!({
                    "cameraIds": payload.target_ids,
                    "settings": payload.fields,
                }),
            ))
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return compact_text(&message);
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        trimmed
    }
}

fn normalize_base_url(raw: String) -> RemoteResult<String> {
    let base = normalize_text_option(Some(raw)).ok_or_else(|| {
        RemoteError::InvalidConfiguration("API base URL must not be empty".to_string())
    })?;
    if is_http_url(&base) {
        Ok(base.trim_end_matches('/').to_string())
    } else {
        Err(RemoteError::InvalidConfiguration(
            "API base URL must include http:// or https://".to_string(),
        ))
    }
}
