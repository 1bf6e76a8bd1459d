use anyhow::{anyhow, Result};
use bridgepool_core::{
    now_rfc3339, ActivityRecord, Aggregator, AggregatorConfig, AuditLedger, AuthorizationGate,
    AuthorizationScope, FindingsStore, GateConfig, SourceAdapter,
};
use clap::{Parser, Subcommand, ValueEnum};
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat { Text, Json, Jsonl }

mod config;

#[derive(Debug, Parser)]
#[command(name = "bridgepool", version, about = "Authorized bridge-descriptor aggregation for lab research")]
struct Cli {
    /// Optional config file (YAML). If omitted, loads ./bridgepool.yaml if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print version information
    Version,
    /// Run one aggregation session over the configured sources
    Run {
        /// Comma list of sources in trust order (earlier wins merges):
        /// directory, partner, fixture, netscan
        #[arg(long, default_value = "fixture")]
        sources: String,
        /// Authorization scope: lab-only, authorized-research or defensive-analysis
        #[arg(long, default_value = "authorized-research")]
        scope: String,
        /// Assert that this process runs inside the controlled lab environment
        #[arg(long, default_value_t = false)]
        lab: bool,
        /// Operation name to authorize and run
        #[arg(long, default_value = "enumerate-bridges")]
        operation: String,
        /// Per-source fetch budget in milliseconds
        #[arg(long, default_value_t = 10_000)]
        timeout_ms: u64,
        /// Actor identity recorded on every ledger entry
        #[arg(long, default_value = "research-operator")]
        actor: String,
        /// Written-authorization reference string
        #[arg(long, default_value = "RESEARCH-PROGRAM-001")]
        reference: String,
        /// Catalog database: pre-seeds first_seen and records run history
        #[arg(long, value_name = "FILE")]
        catalog: Option<PathBuf>,
        /// Output format: text, json, or jsonl
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
        /// Output file (overwrites). Stdout if omitted.
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
        /// Write CSV instead of text/json when --out is provided
        #[arg(long, default_value_t = false)]
        csv: bool,
        /// Print plaintext descriptor fields instead of ciphertext envelopes
        #[arg(long, default_value_t = false)]
        decrypt: bool,
        /// Directory endpoint URL (repeatable)
        #[arg(long = "directory-url", value_name = "URL")]
        directory_urls: Vec<String>,
        /// Partner feed endpoint URL (repeatable)
        #[arg(long = "partner-url", value_name = "URL")]
        partner_urls: Vec<String>,
        /// Bearer token for partner feeds
        #[arg(long)]
        partner_token: Option<String>,
        /// CIDR or host swept by the netscan source
        #[arg(long)]
        scan_target: Option<String>,
        /// Ports probed by the netscan source: comma/range list
        #[arg(long, default_value = "443,9001")]
        scan_ports: String,
    },
    /// Research and assess targets, printing the assessments
    Assess {
        /// Target identifiers
        targets: Vec<String>,
        /// Authorization scope
        #[arg(long, default_value = "defensive-analysis")]
        scope: String,
        /// Assert that this process runs inside the controlled lab environment
        #[arg(long, default_value_t = false)]
        lab: bool,
        /// Actor identity recorded on every ledger entry
        #[arg(long, default_value = "research-operator")]
        actor: String,
        /// Written-authorization reference string
        #[arg(long, default_value = "RESEARCH-PROGRAM-001")]
        reference: String,
        /// Output file (overwrites). Stdout if omitted.
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
    /// Research and assess targets, emitting the full risk report
    Report {
        /// Target identifiers
        targets: Vec<String>,
        /// Authorization scope
        #[arg(long, default_value = "defensive-analysis")]
        scope: String,
        /// Assert that this process runs inside the controlled lab environment
        #[arg(long, default_value_t = false)]
        lab: bool,
        /// Actor identity recorded on every ledger entry
        #[arg(long, default_value = "research-operator")]
        actor: String,
        /// Written-authorization reference string
        #[arg(long, default_value = "RESEARCH-PROGRAM-001")]
        reference: String,
        /// Output file (overwrites). Stdout if omitted.
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
}

fn write_or_print(out: Option<PathBuf>, lines: Vec<String>) -> Result<()> {
    if let Some(path) = out {
        let file = OpenOptions::new().create(true).truncate(true).write(true).open(&path)?;
        let mut w = BufWriter::new(file);
        for line in lines { writeln!(w, "{}", line)?; }
    } else {
        for line in lines { println!("{}", line); }
    }
    Ok(())
}

/// Research + assess each target against a fresh store; one ledger activity
/// entry per assessment.
fn assess_targets(
    targets: &[String],
    scope: &str,
    lab: bool,
    actor: &str,
    reference: &str,
) -> Result<(FindingsStore, Arc<AuditLedger>)> {
    if targets.is_empty() {
        return Err(anyhow!("provide at least one target"));
    }
    let ledger = Arc::new(AuditLedger::new());
    let gate_cfg = GateConfig::new(lab, actor, reference).allow("assess-target");
    let gate = AuthorizationGate::new(gate_cfg, ledger.clone());
    let scope: AuthorizationScope = scope.parse().map_err(|e: String| anyhow!(e))?;
    let authorization = gate.check("assess-target", scope)?;

    let mut store = FindingsStore::new();
    for target in targets {
        store.research_target(target)?;
        let assessment = store.assess(target, &authorization.reference)?;
        ledger.append_activity(
            ActivityRecord::new("target-assessment", &authorization.actor, "lab")
                .detail("target", target)
                .detail("risk", format!("{:?}", assessment.risk).to_lowercase())
                .detail("findings", assessment.findings.len().to_string()),
        );
    }
    Ok((store, ledger))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let loaded_cfg = config::load_config(cli.config.as_deref());
    match cli.command {
        Commands::Version => {
            println!("bridgepool {} (core {})", env!("CARGO_PKG_VERSION"), bridgepool_core::version());
        }
        Commands::Run {
            mut sources, mut scope, mut lab, mut operation, mut timeout_ms, mut actor,
            mut reference, mut catalog, mut format, out, csv, decrypt,
            mut directory_urls, mut partner_urls, mut partner_token,
            mut scan_target, mut scan_ports,
        } => {
            if let Some(cfg) = &loaded_cfg { if let Some(r) = &cfg.run {
                if let Some(s) = &r.sources { sources = s.clone(); }
                if let Some(s) = &r.scope { scope = s.clone(); }
                if !lab { lab = r.lab.unwrap_or(false); }
                if let Some(o) = &r.operation { operation = o.clone(); }
                if r.timeout_ms.is_some() { timeout_ms = r.timeout_ms.unwrap(); }
                if let Some(a) = &r.actor { actor = a.clone(); }
                if let Some(rf) = &r.reference { reference = rf.clone(); }
                if catalog.is_none() { catalog = r.catalog.clone(); }
                if directory_urls.is_empty() { directory_urls = r.directory_urls.clone().unwrap_or_default(); }
                if partner_urls.is_empty() { partner_urls = r.partner_urls.clone().unwrap_or_default(); }
                if partner_token.is_none() { partner_token = r.partner_token.clone(); }
                if scan_target.is_none() { scan_target = r.scan_target.clone(); }
                if let Some(p) = &r.scan_ports { scan_ports = p.clone(); }
                if let Some(f) = &r.format { format = match f.as_str() { "json" => OutputFormat::Json, "jsonl" => OutputFormat::Jsonl, _ => OutputFormat::Text }; }
            }}

            let mut adapters: Vec<Arc<dyn SourceAdapter>> = Vec::new();
            for name in sources.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()) {
                match name {
                    #[cfg(feature = "directory")]
                    "directory" => {
                        if directory_urls.is_empty() {
                            return Err(anyhow!("--directory-url required for the directory source"));
                        }
                        adapters.push(Arc::new(public_directory::PublicDirectoryAdapter::new(
                            directory_urls.clone(),
                        )));
                    }
                    #[cfg(feature = "partner")]
                    "partner" => {
                        if partner_urls.is_empty() {
                            return Err(anyhow!("--partner-url required for the partner source"));
                        }
                        let token = partner_token
                            .clone()
                            .ok_or_else(|| anyhow!("--partner-token required for the partner source"))?;
                        adapters.push(Arc::new(partner_feed::AuthorizedPartnerAdapter::new(
                            partner_urls.clone(),
                            token,
                        )));
                    }
                    #[cfg(feature = "fixture")]
                    "fixture" => {
                        adapters.push(Arc::new(lab_fixture::LabFixtureAdapter::default_fixture()));
                    }
                    #[cfg(feature = "netscan")]
                    "netscan" => {
                        let target = scan_target
                            .clone()
                            .ok_or_else(|| anyhow!("--scan-target required for the netscan source"))?;
                        let ports = net_scan::parse_ports(&scan_ports)?;
                        adapters.push(Arc::new(net_scan::NetworkScanAdapter::new(target, ports)));
                    }
                    other => return Err(anyhow!("unknown or disabled source: {}", other)),
                }
            }

            tracing::debug!(sources = %sources, adapters = adapters.len(), "sources assembled");

            let ledger = Arc::new(AuditLedger::new());
            let gate_cfg = GateConfig::new(lab, actor.clone(), reference.clone()).allow(operation.clone());
            let gate = AuthorizationGate::new(gate_cfg, ledger.clone());
            let scope: AuthorizationScope = scope.parse().map_err(|e: String| anyhow!(e))?;
            let authorization = gate.check(&operation, scope)?;

            let agg_cfg = AggregatorConfig::new(operation.clone())
                .per_adapter_timeout(Duration::from_millis(timeout_ms));
            #[allow(unused_mut)]
            let mut aggregator = Aggregator::new(agg_cfg, ledger.clone());

            #[cfg(feature = "catalog")]
            let db = match &catalog {
                Some(path) => Some(Arc::new(catalog_sqlite::Db::open_or_create(path)?)),
                None => None,
            };
            #[cfg(not(feature = "catalog"))]
            if catalog.is_some() {
                return Err(anyhow!("built without catalog support"));
            }
            #[cfg(feature = "catalog")]
            if let Some(db) = &db {
                aggregator = aggregator.with_catalog(db.clone());
                db.begin_session(catalog_sqlite::SessionMeta {
                    session_id: aggregator.session_id(),
                    operation: operation.clone(),
                    started_at: bridgepool_core::now_ms(),
                })?;
            }

            let rt = tokio::runtime::Runtime::new()?;
            let started_at = now_rfc3339();
            let start = Instant::now();
            let mut result = rt.block_on(aggregator.run(&authorization, &adapters))?;
            let duration_ms = start.elapsed().as_millis() as u64;

            // Catalog rows keep plaintext history; decrypt copies before upsert.
            #[cfg(feature = "catalog")]
            if let Some(db) = &db {
                let mut plain = Vec::with_capacity(result.descriptors.len());
                for d in &result.descriptors {
                    let mut d = d.clone();
                    if d.encrypted {
                        aggregator.codec().decrypt_fields(&mut d)?;
                    }
                    plain.push(d);
                }
                db.record_descriptors(&plain)?;
                db.finish_session(
                    &result.session_id,
                    bridgepool_core::now_ms(),
                    result.descriptors.len() as i64,
                    result.per_source_errors.len() as i64,
                )?;
            }

            if decrypt {
                for d in &mut result.descriptors {
                    aggregator.codec().decrypt_fields(d)?;
                }
            }

            if csv {
                if let Some(path) = out {
                    let mut wtr = csv::Writer::from_writer(std::fs::File::create(&path)?);
                    wtr.write_record(["fingerprint","address","port","transport","first_seen_ms","last_seen_ms","sources","encrypted"])?;
                    for d in &result.descriptors {
                        wtr.write_record(&[
                            d.fingerprint.clone(),
                            d.address.clone(),
                            d.port.to_string(),
                            d.transport.clone(),
                            d.first_seen_ms.to_string(),
                            d.last_seen_ms.to_string(),
                            d.sources.join("|"),
                            d.encrypted.to_string(),
                        ])?;
                    }
                    wtr.flush()?;
                    return Ok(());
                } else {
                    println!("--csv requires --out <file>");
                }
            }

            let mut lines = Vec::new();
            match format {
                OutputFormat::Text => {
                    lines.push(format!(
                        "session {}: {} descriptors, {} source errors ({} ms)",
                        result.session_id,
                        result.descriptors.len(),
                        result.per_source_errors.len(),
                        duration_ms,
                    ));
                    for d in &result.descriptors {
                        lines.push(format!(
                            "{} {}:{} {} sources=[{}]",
                            d.fingerprint, d.address, d.port, d.transport, d.sources.join(","),
                        ));
                    }
                    for (source, err) in &result.per_source_errors {
                        lines.push(format!("{}: error: {}", source, err));
                    }
                }
                OutputFormat::Json => {
                    let obj = serde_json::json!({
                        "session_id": result.session_id,
                        "descriptors": &result.descriptors,
                        "per_source_errors": &result.per_source_errors,
                        "activity": &result.activity,
                        "started_at": started_at,
                        "duration_ms": duration_ms,
                    });
                    lines.push(serde_json::to_string(&obj)?);
                }
                OutputFormat::Jsonl => {
                    for d in &result.descriptors {
                        lines.push(serde_json::to_string(d)?);
                    }
                }
            }
            write_or_print(out, lines)?;
        }
        Commands::Assess { targets, scope, mut lab, mut actor, mut reference, out } => {
            if let Some(cfg) = &loaded_cfg { if let Some(a) = &cfg.assess {
                if !lab { lab = a.lab.unwrap_or(false); }
                if let Some(v) = &a.actor { actor = v.clone(); }
                if let Some(v) = &a.reference { reference = v.clone(); }
            }}
            let (store, _ledger) = assess_targets(&targets, &scope, lab, &actor, &reference)?;
            write_or_print(out, vec![serde_json::to_string_pretty(store.assessments())?])?;
        }
        Commands::Report { targets, scope, mut lab, mut actor, mut reference, out } => {
            if let Some(cfg) = &loaded_cfg { if let Some(a) = &cfg.assess {
                if !lab { lab = a.lab.unwrap_or(false); }
                if let Some(v) = &a.actor { actor = v.clone(); }
                if let Some(v) = &a.reference { reference = v.clone(); }
            }}
            let (store, ledger) = assess_targets(&targets, &scope, lab, &actor, &reference)?;
            let report = store.generate_report(&ledger);
            write_or_print(out, vec![serde_json::to_string_pretty(&report)?])?;
        }
    }
    Ok(())
}
