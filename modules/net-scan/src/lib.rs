//! Network scan source: TCP connect sweep over lab address ranges.
//!
//! Responding endpoints have no source-supplied identity, so a fingerprint
//! is derived from the endpoint itself.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bridgepool_core::{now_ms, RawRecord, SessionContext, SourceAdapter, SourceError};
use ipnet::IpNet;
use sha2::{Digest, Sha256};
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::debug;

pub const ADAPTER_NAME: &str = "net-scan";

/// Parse a comma-separated list of ports/ranges (e.g., "443", "9001-9030,8443").
pub fn parse_ports(spec: &str) -> Result<Vec<u16>> {
    let mut ports = Vec::new();
    for part in spec.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()) {
        if let Some((start, end)) = part.split_once('-') {
            let s: u16 = start.parse()?;
            let e: u16 = end.parse()?;
            if s == 0 || e == 0 || s > e {
                return Err(anyhow!("invalid port range: {}", part));
            }
            ports.extend(s..=e);
        } else {
            let p: u16 = part.parse()?;
            if p == 0 {
                return Err(anyhow!("invalid port: {}", part));
            }
            ports.push(p);
        }
    }
    ports.sort_unstable();
    ports.dedup();
    Ok(ports)
}

/// Expand a CIDR, or resolve a bare host to a single address.
pub fn expand_target(target: &str) -> Result<Vec<IpAddr>> {
    if target.contains('/') {
        let net: IpNet = target.parse()?;
        return Ok(net.hosts().collect());
    }
    if let Ok(ip) = target.parse::<IpAddr>() {
        return Ok(vec![ip]);
    }
    let mut it = (target, 0u16).to_socket_addrs()?;
    it.next()
        .map(|sa| vec![sa.ip()])
        .ok_or_else(|| anyhow!("failed to resolve target: {}", target))
}

/// Identity key for an endpoint that supplies none: sha256 over `addr:port`.
pub fn derive_fingerprint(addr: &IpAddr, port: u16) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}", addr, port).as_bytes());
    hex::encode(hasher.finalize())
}

/// Attempt TCP connects to every (ip, port) candidate; return the responders.
/// Each attempt is independent; results are buffered through a channel and
/// never shared between probes.
pub async fn sweep(
    ips: Vec<IpAddr>,
    ports: &[u16],
    per_attempt: Duration,
    concurrency: usize,
    qps: Option<u32>,
) -> Vec<(IpAddr, u16)> {
    let total = ips.len().saturating_mul(ports.len());
    let (tx, mut rx) = mpsc::channel::<(IpAddr, u16)>(total.max(1));
    let sem = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut ticker = qps.map(|q| {
        // interval panics on a zero period; high QPS floors at 1ms
        let mut it = interval(Duration::from_millis((1000u32 / q.max(1)).max(1) as u64));
        it.set_missed_tick_behavior(MissedTickBehavior::Delay);
        it
    });

    for ip in ips {
        for &port in ports {
            if let Some(t) = ticker.as_mut() {
                t.tick().await;
            }
            let txc = tx.clone();
            let permit = sem.clone().acquire_owned().await.unwrap();
            tokio::spawn(async move {
                let addr = SocketAddr::new(ip, port);
                if let Ok(Ok(_stream)) = timeout(per_attempt, TcpStream::connect(addr)).await {
                    let _ = txc.send((ip, port)).await;
                }
                drop(permit);
            });
        }
    }
    drop(tx);

    let mut open = Vec::new();
    while let Some(pair) = rx.recv().await {
        open.push(pair);
    }
    open.sort_unstable();
    open
}

/// Sweeps a lab CIDR (or single host) for listening candidate ports.
pub struct NetworkScanAdapter {
    target: String,
    ports: Vec<u16>,
    concurrency: usize,
    qps: Option<u32>,
}

impl NetworkScanAdapter {
    pub fn new(target: impl Into<String>, ports: Vec<u16>) -> Self {
        NetworkScanAdapter {
            target: target.into(),
            ports,
            concurrency: 256,
            qps: None,
        }
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn qps(mut self, qps: u32) -> Self {
        self.qps = if qps == 0 { None } else { Some(qps) };
        self
    }
}

#[async_trait]
impl SourceAdapter for NetworkScanAdapter {
    fn name(&self) -> &str {
        ADAPTER_NAME
    }

    async fn fetch(&self, ctx: &SessionContext) -> Result<Vec<RawRecord>, SourceError> {
        let ips = expand_target(&self.target).map_err(|e| SourceError::Parse(e.to_string()))?;
        debug!(target = %self.target, hosts = ips.len(), ports = self.ports.len(), "starting sweep");
        let open = sweep(ips, &self.ports, ctx.timeout, self.concurrency, self.qps).await;
        let observed = now_ms();
        Ok(open
            .into_iter()
            .map(|(ip, port)| {
                let mut raw = RawRecord::new(derive_fingerprint(&ip, port), ip.to_string(), port)
                    .transport(bridgepool_core::DIRECT_TRANSPORT)
                    .observed_ms(observed);
                raw.extra.insert("probe".into(), "tcp-connect".into());
                raw
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn parse_simple_list() {
        let v = parse_ports("443,9001").unwrap();
        assert_eq!(v, vec![443, 9001]);
    }

    #[test]
    fn parse_ranges_and_dedup() {
        let v = parse_ports("1-3,5,3").unwrap();
        assert_eq!(v, vec![1, 2, 3, 5]);
    }

    #[test]
    fn reject_invalid_ports() {
        assert!(parse_ports("0").is_err());
        assert!(parse_ports("10-5").is_err());
    }

    #[test]
    fn expand_cidr_and_single_ip() {
        let ips = expand_target("192.0.2.0/30").unwrap();
        assert_eq!(ips.len(), 2); // hosts() excludes network/broadcast
        let one = expand_target("192.0.2.9").unwrap();
        assert_eq!(one, vec!["192.0.2.9".parse::<IpAddr>().unwrap()]);
        assert!(expand_target("not/a/cidr").is_err());
    }

    #[test]
    fn derived_fingerprints_are_stable_and_distinct() {
        let ip: IpAddr = "192.0.2.1".parse().unwrap();
        assert_eq!(derive_fingerprint(&ip, 443), derive_fingerprint(&ip, 443));
        assert_ne!(derive_fingerprint(&ip, 443), derive_fingerprint(&ip, 444));
        assert_eq!(derive_fingerprint(&ip, 443).len(), 64);
    }

    #[tokio::test]
    async fn sweep_finds_a_loopback_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        let open = sweep(vec![ip], &[port], Duration::from_millis(500), 16, None).await;
        assert_eq!(open, vec![(ip, port)]);
    }

    #[tokio::test]
    async fn adapter_produces_normalizable_records() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let adapter = NetworkScanAdapter::new("127.0.0.1", vec![port]).concurrency(4);
        let ctx = SessionContext::new(Uuid::new_v4(), "test", Duration::from_millis(500));
        let records = adapter.fetch(&ctx).await.unwrap();
        assert_eq!(records.len(), 1);
        let d = bridgepool_core::normalize(&records[0], ADAPTER_NAME).unwrap();
        assert_eq!(d.address, "127.0.0.1");
        assert_eq!(d.port, port);
        assert_eq!(d.transport, bridgepool_core::DIRECT_TRANSPORT);
    }

    #[tokio::test]
    async fn bad_target_is_a_parse_error() {
        let adapter = NetworkScanAdapter::new("300.300.300.300/24", vec![443]);
        let ctx = SessionContext::new(Uuid::new_v4(), "test", Duration::from_millis(100));
        assert!(matches!(
            adapter.fetch(&ctx).await.unwrap_err(),
            SourceError::Parse(_)
        ));
    }
}
