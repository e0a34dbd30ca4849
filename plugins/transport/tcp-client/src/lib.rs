use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use framing_length_prefixed::{LengthPrefixedConfig, LengthPrefixedFraming};
use ingest_api::{
    Ack, AckSource, Connection, Framing, OpenRequest, RecordSink, Transport, TransportError, TransportFuture,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

pub mod frame;

pub use frame::{ClientFrame, ServerFrame};

// ---- Config ----

fn default_connect_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct TcpTransportConfig {
    /// `host:port` of the ingestion endpoint.
    pub addr: String,
    /// Bearer credential, passed through unchanged in the open frame.
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default)]
    pub framing: LengthPrefixedConfig,
}

impl TcpTransportConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            token: String::new(),
            connect_timeout_ms: default_connect_timeout_ms(),
            framing: LengthPrefixedConfig::default(),
        }
    }
}

// ---- Transport ----

/// Client for a TCP ingestion endpoint. One `open` = one TCP connection.
pub struct TcpTransport {
    config: TcpTransportConfig,
    framing: Arc<LengthPrefixedFraming>,
}

impl TcpTransport {
    pub fn new(config: TcpTransportConfig) -> Result<Self, TransportError> {
        if config.addr.is_empty() {
            return Err(TransportError::config("tcp transport: addr is required"));
        }
        let framing = LengthPrefixedFraming::from_config(&config.framing)?;
        Ok(Self {
            config,
            framing: Arc::new(framing),
        })
    }

    async fn connect(&self) -> Result<TcpStream, TransportError> {
        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let stream = tokio::time::timeout(timeout, TcpStream::connect(&self.config.addr))
            .await
            .map_err(|_| {
                TransportError::io(format!(
                    "TCP connect to {}: timed out after {}ms",
                    self.config.addr, self.config.connect_timeout_ms
                ))
            })?
            .map_err(|e| TransportError::from(e).with_context(format_args!("TCP connect to {}", self.config.addr)))?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

impl Transport for TcpTransport {
    fn open(&self, request: OpenRequest) -> TransportFuture<'_, Connection> {
        Box::pin(async move {
            let stream = self.connect().await?;
            let (read, write) = stream.into_split();
            let mut reader = FrameReader::new(read, self.framing.clone());
            let mut writer = FrameWriter::new(write, self.framing.clone());

            let schema = serde_json::to_string(&request.schema)?;
            writer
                .write(&ClientFrame::Open {
                    table: request.table.clone(),
                    token: self.config.token.clone(),
                    schema,
                })
                .await?;

            let stream_id = match reader.next_frame().await? {
                Some(ServerFrame::Opened { stream_id }) => stream_id,
                Some(ServerFrame::Error { message }) => {
                    return Err(TransportError::new(format!("endpoint refused stream: {message}")));
                }
                Some(other) => {
                    return Err(TransportError::format_err(format!("expected Opened, got {other:?}")));
                }
                None => return Err(TransportError::io("endpoint closed the connection during open")),
            };

            tracing::info!(addr = %self.config.addr, table = %request.table, %stream_id, "tcp stream opened");

            Ok(Connection {
                stream_id,
                sink: Box::new(TcpSink { writer }),
                acks: Box::new(TcpAckSource { reader }),
            })
        })
    }
}

// ---- Connection halves ----

struct FrameWriter {
    write: OwnedWriteHalf,
    framing: Arc<LengthPrefixedFraming>,
    body: Vec<u8>,
    buf: Vec<u8>,
}

impl FrameWriter {
    fn new(write: OwnedWriteHalf, framing: Arc<LengthPrefixedFraming>) -> Self {
        Self {
            write,
            framing,
            body: Vec::with_capacity(1024),
            buf: Vec::with_capacity(1024),
        }
    }

    async fn write(&mut self, frame: &ClientFrame) -> Result<(), TransportError> {
        self.body.clear();
        frame.encode(&mut self.body);
        self.buf.clear();
        self.framing.encode(&self.body, &mut self.buf)?;
        self.write.write_all(&self.buf).await?;
        Ok(())
    }
}

struct FrameReader {
    read: OwnedReadHalf,
    framing: Arc<LengthPrefixedFraming>,
    buf: Vec<u8>,
}

impl FrameReader {
    fn new(read: OwnedReadHalf, framing: Arc<LengthPrefixedFraming>) -> Self {
        Self {
            read,
            framing,
            buf: Vec::with_capacity(8192),
        }
    }

    /// Next complete frame. `None` on a clean end of stream.
    async fn next_frame(&mut self) -> Result<Option<ServerFrame>, TransportError> {
        loop {
            if let Some((body, consumed)) = self.framing.decode(&self.buf)? {
                self.buf.drain(..consumed);
                return ServerFrame::decode(&body).map(Some);
            }
            let mut chunk = [0u8; 8192];
            let n = self.read.read(&mut chunk).await?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(TransportError::io(format!(
                    "connection closed inside a frame ({} bytes buffered)",
                    self.buf.len()
                )));
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

struct TcpSink {
    writer: FrameWriter,
}

impl RecordSink for TcpSink {
    fn send(&mut self, offset: u64, payload: &[u8]) -> TransportFuture<'_, ()> {
        let frame = ClientFrame::Record {
            offset,
            payload: payload.to_vec(),
        };
        Box::pin(async move { self.writer.write(&frame).await })
    }

    fn flush(&mut self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            self.writer.write(&ClientFrame::Flush).await?;
            self.writer.write.flush().await?;
            Ok(())
        })
    }

    fn close(&mut self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            self.writer.write(&ClientFrame::Close).await?;
            self.writer.write.shutdown().await?;
            Ok(())
        })
    }
}

struct TcpAckSource {
    reader: FrameReader,
}

impl AckSource for TcpAckSource {
    fn recv(&mut self) -> Pin<Box<dyn Future<Output = Option<Result<Ack, TransportError>>> + Send + '_>> {
        Box::pin(async move {
            let frame = match self.reader.next_frame().await {
                Ok(Some(frame)) => frame,
                Ok(None) => return None,
                Err(e) => return Some(Err(e)),
            };
            Some(match frame {
                ServerFrame::Durable { up_to_offset } => Ok(Ack::Durable { up_to_offset }),
                ServerFrame::Rejected { offset, reason } => Ok(Ack::Rejected { offset, reason }),
                ServerFrame::Error { message } => Err(TransportError::io(format!("endpoint error: {message}"))),
                ServerFrame::Opened { .. } => Err(TransportError::format_err("unexpected Opened frame")),
            })
        })
    }
}
