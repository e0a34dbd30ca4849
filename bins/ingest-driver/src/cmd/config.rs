use clap::Args;
use serde::Deserialize;

use framing_length_prefixed::LengthPrefixedConfig;
use ingest_api::OverflowPolicy;
use ingest_stream::StreamConfig;
use transport_memory::{AckMode, MemoryTransportConfig};

use super::endpoint::Endpoint;
use super::error::DriverError;

// ═══════════════════════════════════════════════════════════════
//  Config file (TOML)
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    pub table: Option<String>,
    pub endpoint: Option<String>,
    pub token: Option<String>,
    pub schema: Option<String>,
    pub records: Option<u64>,
    pub progress_every: Option<u64>,
    pub seed: Option<i64>,
    pub connect_timeout_ms: Option<u64>,
    pub max_inflight_records: Option<usize>,
    pub overflow: Option<OverflowPolicy>,
    pub flush_timeout_ms: Option<u64>,
    /// `[memory]`: settings of the in-process endpoint.
    pub memory: Option<MemoryTransportConfig>,
    /// `[framing]`: frame header of the TCP endpoint.
    pub framing: Option<LengthPrefixedConfig>,
}

pub fn load_config(path: &str) -> Result<Config, DriverError> {
    let content =
        std::fs::read_to_string(path).map_err(|e| DriverError::Config(format!("cannot read config {path}: {e}")))?;
    toml::from_str(&content).map_err(|e| DriverError::Config(format!("bad config {path}: {e}")))
}

// ═══════════════════════════════════════════════════════════════
//  CLI args
// ═══════════════════════════════════════════════════════════════

#[derive(Args, Clone, Debug)]
pub struct DriverArgs {
    /// Path to the TOML config file
    #[arg(long, default_value = "ingest.toml", env = "INGEST_DRIVER_CONFIG")]
    pub config: String,

    /// Target table, `catalog.schema.table`
    #[arg(long, env = "INGEST_TABLE")]
    pub table: Option<String>,

    /// Endpoint URL: memory:// or tcp://host:port
    #[arg(long, env = "INGEST_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Bearer credential passed to the endpoint
    #[arg(long, env = "INGEST_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Table description JSON (catalog `columns` format); demo schema if absent
    #[arg(long)]
    pub schema: Option<String>,

    /// Number of records to ingest
    #[arg(long)]
    pub records: Option<u64>,

    /// Log progress every N records (0 = off)
    #[arg(long)]
    pub progress_every: Option<u64>,

    /// PRNG seed for generated values (0 = current time)
    #[arg(long)]
    pub seed: Option<i64>,

    /// Maximum records submitted but not yet durable
    #[arg(long)]
    pub max_inflight: Option<usize>,

    /// Full window behaviour: back_pressure | reject
    #[arg(long, value_parser = parse_overflow)]
    pub overflow: Option<OverflowPolicy>,

    /// Flush (and close drain) timeout in milliseconds
    #[arg(long)]
    pub flush_timeout_ms: Option<u64>,
}

fn parse_overflow(s: &str) -> Result<OverflowPolicy, String> {
    match s.to_ascii_lowercase().as_str() {
        "back_pressure" | "backpressure" | "block" => Ok(OverflowPolicy::BackPressure),
        "reject" => Ok(OverflowPolicy::Reject),
        other => Err(format!("unknown overflow policy {other:?} (back_pressure | reject)")),
    }
}

// ═══════════════════════════════════════════════════════════════
//  Effective (merged config)
// ═══════════════════════════════════════════════════════════════

/// Final settings: config file < env / CLI.
#[derive(Debug, Clone)]
pub struct Effective {
    pub table: String,
    pub endpoint: Endpoint,
    pub token: String,
    pub schema: Option<String>,
    pub records: u64,
    pub progress_every: u64,
    pub seed: i64,
    pub connect_timeout_ms: u64,
    pub stream: StreamConfig,
    pub memory: MemoryTransportConfig,
    pub framing: LengthPrefixedConfig,
}

impl Effective {
    pub fn new(args: &DriverArgs) -> Result<Self, DriverError> {
        let cfg = match load_config(&args.config) {
            Ok(c) => c,
            Err(e) => {
                if std::path::Path::new(&args.config).exists() {
                    return Err(e);
                }
                Config::default()
            }
        };

        let table = args
            .table
            .clone()
            .or(cfg.table)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| DriverError::Config("table is required (--table, INGEST_TABLE or config)".into()))?;

        let endpoint = Endpoint::parse(args.endpoint.as_deref().or(cfg.endpoint.as_deref()).unwrap_or("memory://"))?;

        let defaults = StreamConfig::default();
        let stream = StreamConfig {
            max_inflight_records: args
                .max_inflight
                .or(cfg.max_inflight_records)
                .unwrap_or(defaults.max_inflight_records),
            overflow: args.overflow.or(cfg.overflow).unwrap_or(defaults.overflow),
            flush_timeout_ms: args
                .flush_timeout_ms
                .or(cfg.flush_timeout_ms)
                .unwrap_or(defaults.flush_timeout_ms),
        };
        stream.validate()?;

        let memory = cfg.memory.unwrap_or_default();
        if endpoint == Endpoint::Memory && memory.ack_mode == AckMode::Manual {
            return Err(DriverError::Config(
                "memory endpoint in manual ack mode never acknowledges; use mode = \"auto\"".into(),
            ));
        }

        Ok(Self {
            table,
            endpoint,
            token: args.token.clone().or(cfg.token).unwrap_or_default(),
            schema: args.schema.clone().or(cfg.schema),
            records: args.records.or(cfg.records).unwrap_or(100_000),
            progress_every: args.progress_every.or(cfg.progress_every).unwrap_or(10_000),
            seed: args.seed.or(cfg.seed).unwrap_or(0),
            connect_timeout_ms: cfg.connect_timeout_ms.unwrap_or(10_000),
            stream,
            memory,
            framing: cfg.framing.unwrap_or_default(),
        })
    }
}
