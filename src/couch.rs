//! CouchDB implementation of [`DocumentStore`].
//!
//! Batches go to `POST {url}/{db}/_bulk_docs`. CouchDB answers with one
//! result object per document, in input order:
//!
//! ```json
//! [{"ok": true, "id": "a1", "rev": "1-967a00dff5e02add41819138abb3284d"},
//!  {"id": "b2", "error": "conflict", "reason": "Document update conflict."}]
//! ```
//!
//! An `error` of `"conflict"` becomes [`DocOutcome::Conflict`]; any other
//! error becomes [`DocOutcome::Rejected`].
//!
//! # Retry Strategy
//!
//! - Network errors, HTTP 429 and 5xx → retry with exponential backoff
//!   (1s, 2s, 4s, ... capped at 32s) up to `remote.max_retries` times
//! - Other HTTP 4xx → fail immediately
//!
//! A batch that still fails is reported as
//! [`SyncError::RemoteUnavailable`] for the whole chunk.
//!
//! A batch can be applied by CouchDB even though its response was lost to
//! a timeout or 5xx. The retry then gets `conflict` for every create; the
//! replicator caches those ids as unconfirmed and resolves their revisions
//! through `POST {url}/{db}/_all_docs` on the next run, so no duplicate is
//! created. When every retry is lost the ids are never learned and the
//! documents written by the lost delivery stay behind remotely.
//!
//! # Authentication
//!
//! When `remote.username` is set, requests use HTTP basic auth with the
//! password from `BULKSYNC_COUCH_PASSWORD`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use bulksync_core::remote::{DocOutcome, DocRef, DocumentStore, RemoteDoc};
use bulksync_core::SyncError;

use crate::config::RemoteConfig;

/// Environment variable holding the CouchDB password.
pub const PASSWORD_ENV: &str = "BULKSYNC_COUCH_PASSWORD";

/// HTTP client for one CouchDB database.
pub struct CouchClient {
    client: reqwest::Client,
    db_url: String,
    auth: Option<(String, String)>,
    max_retries: u32,
}

impl CouchClient {
    pub fn new(url: &str, database: &str, remote: &RemoteConfig) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(remote.timeout_secs))
            .build()
            .map_err(|e| SyncError::InvalidConfig(format!("http client: {}", e)))?;

        let auth = remote.username.as_ref().map(|user| {
            let password = std::env::var(PASSWORD_ENV).unwrap_or_default();
            (user.clone(), password)
        });

        Ok(Self {
            client,
            db_url: format!(
                "{}/{}",
                url.trim_end_matches('/'),
                database.replace('/', "%2F")
            ),
            auth,
            max_retries: remote.max_retries,
        })
    }

    /// Database URL every request is made against.
    pub fn db_url(&self) -> &str {
        &self.db_url
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth {
            Some((user, password)) => req.basic_auth(user, Some(password)),
            None => req,
        }
    }

    /// Create the database if it does not exist yet.
    ///
    /// CouchDB answers 412 when the database already exists; that counts
    /// as success.
    pub async fn ensure_database(&self) -> Result<(), SyncError> {
        let response = self
            .authed(self.client.put(&self.db_url))
            .send()
            .await
            .map_err(|e| SyncError::RemoteUnavailable(e.to_string()))?;

        match response.status().as_u16() {
            201 | 202 => {
                debug!(db = %self.db_url, "created remote database");
                Ok(())
            }
            412 => Ok(()),
            status => {
                let body_text = response.text().await.unwrap_or_default();
                Err(SyncError::RemoteUnavailable(format!(
                    "creating {} failed with {}: {}",
                    self.db_url, status, body_text
                )))
            }
        }
    }

    /// POST a `_bulk_docs` batch with retry/backoff.
    async fn post_bulk(&self, docs: Vec<Value>) -> Result<Vec<DocOutcome>, SyncError> {
        let json = self.post_json("_bulk_docs", &json!({ "docs": docs })).await?;
        parse_bulk_response(&json)
    }

    /// POST to `{db}/{endpoint}` with retry/backoff and return the JSON body.
    async fn post_json(&self, endpoint: &str, body: &Value) -> Result<Value, SyncError> {
        let url = format!("{}/{}", self.db_url, endpoint);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                debug!(endpoint, attempt, ?delay, "retrying request");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .authed(self.client.post(&url))
                .header("Content-Type", "application/json")
                .json(body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    // 417: some documents failed validation; the body still
                    // carries per-document results.
                    if status.is_success() || status.as_u16() == 417 {
                        return response
                            .json()
                            .await
                            .map_err(|e| SyncError::RemoteUnavailable(e.to_string()));
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err = format!("CouchDB error {}: {}", status, body_text);

                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(endpoint, attempt, %status, "request failed, will retry");
                        last_err = Some(err);
                        continue;
                    }

                    return Err(SyncError::RemoteUnavailable(err));
                }
                Err(e) => {
                    warn!(endpoint, attempt, error = %e, "request failed, will retry");
                    last_err = Some(e.to_string());
                    continue;
                }
            }
        }

        Err(SyncError::RemoteUnavailable(last_err.unwrap_or_else(|| {
            format!("{} failed after retries", endpoint)
        })))
    }
}

/// Parse a `_bulk_docs` response array into outcomes.
pub fn parse_bulk_response(json: &Value) -> Result<Vec<DocOutcome>, SyncError> {
    let items = json.as_array().ok_or_else(|| {
        SyncError::RemoteUnavailable("invalid _bulk_docs response: expected an array".into())
    })?;

    let mut outcomes = Vec::with_capacity(items.len());
    for item in items {
        let Some(id) = item.get("id").and_then(|v| v.as_str()) else {
            warn!(item = %item, "bulk result without id, ignoring");
            continue;
        };
        let id = id.to_string();

        let outcome = match item.get("error").and_then(|v| v.as_str()) {
            Some(error) => {
                let reason = item
                    .get("reason")
                    .and_then(|v| v.as_str())
                    .unwrap_or(error)
                    .to_string();
                if error == "conflict" {
                    DocOutcome::Conflict { id, reason }
                } else {
                    DocOutcome::Rejected {
                        id,
                        reason: format!("{}: {}", error, reason),
                    }
                }
            }
            None => match item.get("rev").and_then(|v| v.as_str()) {
                Some(rev) => DocOutcome::Written {
                    id,
                    rev: rev.to_string(),
                },
                None => DocOutcome::Rejected {
                    id,
                    reason: "result without revision".into(),
                },
            },
        };
        outcomes.push(outcome);
    }
    Ok(outcomes)
}

/// Parse an `_all_docs?keys` response into id → current revision.
///
/// Rows for missing ids carry `"error": "not_found"`; deleted documents
/// carry `"value": {"rev": ..., "deleted": true}`. Both are left out.
pub fn parse_all_docs_revisions(json: &Value) -> Result<HashMap<String, String>, SyncError> {
    let rows = json.get("rows").and_then(|r| r.as_array()).ok_or_else(|| {
        SyncError::RemoteUnavailable("invalid _all_docs response: missing rows array".into())
    })?;

    Ok(rows
        .iter()
        .filter(|row| row.get("error").is_none())
        .filter_map(|row| {
            let id = row.get("id")?.as_str()?;
            let value = row.get("value")?;
            if value.get("deleted").and_then(|d| d.as_bool()) == Some(true) {
                return None;
            }
            let rev = value.get("rev")?.as_str()?;
            Some((id.to_string(), rev.to_string()))
        })
        .collect())
}

fn upsert_body(doc: &RemoteDoc) -> Value {
    let mut body: Map<String, Value> = doc.body.clone();
    body.insert("_id".into(), Value::String(doc.id.clone()));
    match &doc.rev {
        Some(rev) => {
            body.insert("_rev".into(), Value::String(rev.clone()));
        }
        None => {
            body.remove("_rev");
        }
    }
    Value::Object(body)
}

#[async_trait]
impl DocumentStore for CouchClient {
    async fn bulk_upsert(&self, docs: &[RemoteDoc]) -> Result<Vec<DocOutcome>, SyncError> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }
        self.post_bulk(docs.iter().map(upsert_body).collect()).await
    }

    async fn bulk_delete(&self, docs: &[DocRef]) -> Result<Vec<DocOutcome>, SyncError> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }
        let bodies = docs
            .iter()
            .map(|d| json!({ "_id": d.id, "_rev": d.rev, "_deleted": true }))
            .collect();
        self.post_bulk(bodies).await
    }

    async fn current_revisions(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, String>, SyncError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let json = self.post_json("_all_docs", &json!({ "keys": ids })).await?;
        parse_all_docs_revisions(&json)
    }
}
