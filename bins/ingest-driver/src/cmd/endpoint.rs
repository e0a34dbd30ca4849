use ingest_api::Transport;
use transport_memory::{AckMode, MemoryTransport};
use transport_tcp::{TcpTransport, TcpTransportConfig};

use super::config::Effective;
use super::error::DriverError;

/// Where records go, parsed from the endpoint URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `memory://`, in-process endpoint, for demos and dry runs.
    Memory,
    /// `tcp://host:port`
    Tcp { addr: String },
}

impl Endpoint {
    pub fn parse(url: &str) -> Result<Self, DriverError> {
        let url = url.trim();
        if url == "memory" || url == "memory://" {
            return Ok(Endpoint::Memory);
        }
        if let Some(addr) = url.strip_prefix("tcp://") {
            let addr = addr.trim_end_matches('/');
            let valid = addr
                .rsplit_once(':')
                .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
            if !valid {
                return Err(DriverError::Config(format!("endpoint {url}: expected tcp://host:port")));
            }
            return Ok(Endpoint::Tcp { addr: addr.to_string() });
        }
        Err(DriverError::Config(format!(
            "unsupported endpoint {url:?} (use memory:// or tcp://host:port)"
        )))
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Memory => f.write_str("memory://"),
            Endpoint::Tcp { addr } => write!(f, "tcp://{addr}"),
        }
    }
}

/// Build the transport for the configured endpoint.
pub fn build_transport(eff: &Effective) -> Result<Box<dyn Transport>, DriverError> {
    match &eff.endpoint {
        Endpoint::Memory => Ok(Box::new(memory_transport(eff))),
        Endpoint::Tcp { addr } => {
            let transport = TcpTransport::new(TcpTransportConfig {
                addr: addr.clone(),
                token: eff.token.clone(),
                connect_timeout_ms: eff.connect_timeout_ms,
                framing: eff.framing.clone(),
            })?;
            Ok(Box::new(transport))
        }
    }
}

/// Memory endpoint whose auto-ack batch fits inside the in-flight window,
/// so a full window always gets acknowledged.
pub fn memory_transport(eff: &Effective) -> MemoryTransport {
    let mut config = eff.memory.clone();
    if let AckMode::Auto { every } = config.ack_mode {
        let window = eff.stream.max_inflight_records as u64;
        config.ack_mode = AckMode::Auto {
            every: every.clamp(1, window.max(1)),
        };
    }
    MemoryTransport::new(config)
}
