//! Frame bodies exchanged with the ingestion endpoint.
//!
//! Each body starts with a one-byte tag. Integers are big-endian, strings
//! are a `u32` length followed by UTF-8 bytes. Message boundaries come from
//! the framing layer, not from this module.

use ingest_api::TransportError;

const OPEN: u8 = 0x01;
const RECORD: u8 = 0x02;
const FLUSH: u8 = 0x03;
const CLOSE: u8 = 0x04;

const OPENED: u8 = 0x81;
const DURABLE: u8 = 0x82;
const REJECTED: u8 = 0x83;
const ERROR: u8 = 0x84;

/// Client → endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    /// `schema` is the table schema as JSON.
    Open { table: String, token: String, schema: String },
    Record { offset: u64, payload: Vec<u8> },
    Flush,
    Close,
}

/// Endpoint → client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    Opened { stream_id: String },
    Durable { up_to_offset: u64 },
    Rejected { offset: u64, reason: String },
    Error { message: String },
}

impl ClientFrame {
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            ClientFrame::Open { table, token, schema } => {
                out.push(OPEN);
                put_str(out, table);
                put_str(out, token);
                put_str(out, schema);
            }
            ClientFrame::Record { offset, payload } => {
                out.push(RECORD);
                out.extend_from_slice(&offset.to_be_bytes());
                out.extend_from_slice(payload);
            }
            ClientFrame::Flush => out.push(FLUSH),
            ClientFrame::Close => out.push(CLOSE),
        }
    }

    pub fn decode(body: &[u8]) -> Result<Self, TransportError> {
        let mut r = Reader::new(body);
        let frame = match r.u8()? {
            OPEN => ClientFrame::Open {
                table: r.string()?,
                token: r.string()?,
                schema: r.string()?,
            },
            RECORD => ClientFrame::Record {
                offset: r.u64()?,
                payload: r.rest().to_vec(),
            },
            FLUSH => ClientFrame::Flush,
            CLOSE => ClientFrame::Close,
            tag => return Err(TransportError::format_err(format!("unknown client frame tag 0x{tag:02x}"))),
        };
        r.finish()?;
        Ok(frame)
    }
}

impl ServerFrame {
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            ServerFrame::Opened { stream_id } => {
                out.push(OPENED);
                put_str(out, stream_id);
            }
            ServerFrame::Durable { up_to_offset } => {
                out.push(DURABLE);
                out.extend_from_slice(&up_to_offset.to_be_bytes());
            }
            ServerFrame::Rejected { offset, reason } => {
                out.push(REJECTED);
                out.extend_from_slice(&offset.to_be_bytes());
                put_str(out, reason);
            }
            ServerFrame::Error { message } => {
                out.push(ERROR);
                put_str(out, message);
            }
        }
    }

    pub fn decode(body: &[u8]) -> Result<Self, TransportError> {
        let mut r = Reader::new(body);
        let frame = match r.u8()? {
            OPENED => ServerFrame::Opened { stream_id: r.string()? },
            DURABLE => ServerFrame::Durable { up_to_offset: r.u64()? },
            REJECTED => ServerFrame::Rejected {
                offset: r.u64()?,
                reason: r.string()?,
            },
            ERROR => ServerFrame::Error { message: r.string()? },
            tag => return Err(TransportError::format_err(format!("unknown server frame tag 0x{tag:02x}"))),
        };
        r.finish()?;
        Ok(frame)
    }
}

fn put_str(out: &mut Vec<u8>, s: &str) {
    // Frame bodies are capped well below 4 GiB by the framing layer.
    out.extend_from_slice(&(s.len() as u32).to_be_bytes());
    out.extend_from_slice(s.as_bytes());
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], TransportError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| TransportError::format_err(format!("truncated frame: need {n} bytes at {}", self.pos)))?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8, TransportError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, TransportError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, TransportError> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_be_bytes(arr))
    }

    fn string(&mut self) -> Result<String, TransportError> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        Ok(String::from_utf8(bytes.to_vec())?)
    }

    fn rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }

    fn finish(&self) -> Result<(), TransportError> {
        if self.pos == self.buf.len() {
            Ok(())
        } else {
            Err(TransportError::format_err(format!(
                "{} trailing bytes after frame",
                self.buf.len() - self.pos
            )))
        }
    }
}
