//! Authorized partner source: bearer-token feeds of bridge lines.
//!
//! Partners publish newline-delimited bridge lines in the conventional
//! shape: an optional transport token, `host:port`, a fingerprint, then
//! `key=value` parameters.

use async_trait::async_trait;
use bridgepool_core::{RawRecord, SessionContext, SourceAdapter, SourceError};
use tracing::{debug, warn};

pub const ADAPTER_NAME: &str = "partner-feed";

/// Parse one bridge line. Comment and blank lines yield `None`, as does
/// anything that doesn't carry at least `host:port` and a fingerprint.
pub fn parse_bridge_line(line: &str) -> Option<RawRecord> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let mut tokens = line.split_whitespace();
    let first = tokens.next()?;
    // a leading token without ':' names the pluggable transport
    let (transport, endpoint) = if first.contains(':') {
        (None, first)
    } else {
        (Some(first), tokens.next()?)
    };
    let (host, port) = endpoint.rsplit_once(':')?;
    let port: u16 = port.parse().ok()?;
    let fingerprint = tokens.next()?;
    let mut raw = RawRecord::new(fingerprint, host, port);
    if let Some(t) = transport {
        raw = raw.transport(t);
    }
    for token in tokens {
        if let Some((k, v)) = token.split_once('=') {
            raw.extra.insert(k.to_string(), v.to_string());
        }
    }
    Some(raw)
}

/// Parse a whole feed body. Unparseable lines are skipped; a body with
/// content but zero parseable lines is a parse failure.
pub fn parse_feed(body: &str) -> Result<Vec<RawRecord>, SourceError> {
    let mut records = Vec::new();
    let mut skipped = 0usize;
    let mut content_lines = 0usize;
    for line in body.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        content_lines += 1;
        match parse_bridge_line(trimmed) {
            Some(raw) => records.push(raw),
            None => skipped += 1,
        }
    }
    if records.is_empty() && content_lines > 0 {
        return Err(SourceError::Parse(format!(
            "no parseable bridge lines ({} skipped)",
            skipped
        )));
    }
    if skipped > 0 {
        debug!(skipped, "malformed feed lines skipped");
    }
    Ok(records)
}

/// Fetches bridge-line feeds from endpoints that granted written
/// authorization, authenticating with a bearer token.
pub struct AuthorizedPartnerAdapter {
    endpoints: Vec<String>,
    token: String,
}

impl AuthorizedPartnerAdapter {
    pub fn new(endpoints: Vec<String>, token: impl Into<String>) -> Self {
        AuthorizedPartnerAdapter {
            endpoints,
            token: token.into(),
        }
    }
}

#[async_trait]
impl SourceAdapter for AuthorizedPartnerAdapter {
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
            let result = async {
                let resp = client
                    .get(endpoint)
                    .bearer_auth(&self.token)
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
                parse_feed(&body)
            }
            .await;
            match result {
                Ok(mut batch) => records.append(&mut batch),
                Err(err) => {
                    warn!(endpoint, error = %err, "partner endpoint failed");
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
