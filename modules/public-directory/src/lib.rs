//! Public directory source: JSON documents fetched from directory endpoints.

use async_trait::async_trait;
use bridgepool_core::{RawRecord, SessionContext, SourceAdapter, SourceError};
use serde_json::Value;
use tracing::{debug, warn};

pub const ADAPTER_NAME: &str = "public-directory";

/// Parse one directory document into raw records. Accepts either a bare
/// array of bridge objects or a `{"bridges": [...]}` wrapper. Field names
/// follow the directory's vocabulary; anything the canonical schema does not
/// know is kept in `extra` for provenance.
pub fn parse_directory_document(body: &str) -> Result<Vec<RawRecord>, SourceError> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| SourceError::Parse(e.to_string()))?;
    let items = match &value {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => match map.get("bridges") {
            Some(Value::Array(items)) => items.as_slice(),
            _ => return Err(SourceError::Parse("no bridges array in document".into())),
        },
        _ => return Err(SourceError::Parse("unexpected document shape".into())),
    };
    Ok(items.iter().filter_map(object_to_record).collect())
}

fn object_to_record(item: &Value) -> Option<RawRecord> {
    let obj = item.as_object()?;
    let mut raw = RawRecord::default();
    raw.fingerprint = obj
        .get("fingerprint")
        .or_else(|| obj.get("hashed_fingerprint"))
        .and_then(Value::as_str)
        .map(str::to_string);
    // address may arrive separately or as a combined "addr:port" field
    if let Some(a) = obj.get("address").and_then(Value::as_str) {
        raw.address = Some(a.to_string());
    } else if let Some(combined) = obj.get("or_address").and_then(Value::as_str) {
        if let Some((host, port)) = combined.rsplit_once(':') {
            raw.address = Some(host.to_string());
            raw.port = port.parse().ok();
        }
    }
    if let Some(p) = obj.get("port").and_then(Value::as_u64) {
        raw.port = u16::try_from(p).ok();
    }
    raw.transport = obj.get("transport").and_then(Value::as_str).map(str::to_string);
    raw.observed_ms = obj
        .get("last_seen_ms")
        .or_else(|| obj.get("observed_ms"))
        .and_then(Value::as_i64);
    for (k, v) in obj {
        if matches!(
            k.as_str(),
            "fingerprint" | "hashed_fingerprint" | "address" | "or_address" | "port"
                | "transport" | "last_seen_ms" | "observed_ms"
        ) {
            continue;
        }
        if let Some(s) = v.as_str() {
            raw.extra.insert(k.clone(), s.to_string());
        }
    }
    Some(raw)
}

/// Fetches every configured endpoint and concatenates their records. A
/// failing endpoint is tolerated while any other yields data; the fetch as a
/// whole fails only when every endpoint does.
pub struct PublicDirectoryAdapter {
    endpoints: Vec<String>,
}

impl PublicDirectoryAdapter {
    pub fn new(endpoints: Vec<String>) -> Self {
        PublicDirectoryAdapter { endpoints }
    }
}

#[async_trait]
impl SourceAdapter for PublicDirectoryAdapter {
    fn name(&self) -> &str {
        ADAPTER_NAME
    }

    async fn fetch(&self, ctx: &SessionContext) -> Result<Vec<RawRecord>, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(ctx.timeout)
            .user_agent(ctx.user_agent.clone())
            .build()
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        let mut records = Vec::new();
        let mut failures = Vec::new();
        for endpoint in &self.endpoints {
            match fetch_endpoint(&client, endpoint).await {
                Ok(mut batch) => {
                    debug!(endpoint, records = batch.len(), "directory fetched");
                    records.append(&mut batch);
                }
                Err(err) => {
                    warn!(endpoint, error = %err, "directory endpoint failed");
                    failures.push(format!("{}: {}", endpoint, err));
                }
            }
        }
        if records.is_empty() && !failures.is_empty() {
            return Err(SourceError::Transport(failures.join("; ")));
        }
        Ok(records)
    }
}

async fn fetch_endpoint(
    client: &reqwest::Client,
    endpoint: &str,
) -> Result<Vec<RawRecord>, SourceError> {
    let resp = client
        .get(endpoint)
        .header(reqwest::header::ACCEPT, "application/json")
        .send()
        .await
        .map_err(|e| SourceError::Transport(e.to_string()))?;
    if !resp.status().is_success() {
        return Err(SourceError::Transport(format!("status {}", resp.status())));
    }
    let body = resp
        .text()
        .await
        .map_err(|e| SourceError::Transport(e.to_string()))?;
    parse_directory_document(&body)
}
