use ingest_api::{Framing, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Big,
    Little,
}

/// `[length header][payload]` frames. The header is 1, 2 or 4 bytes.
#[derive(Debug, Clone)]
pub struct LengthPrefixedFraming {
    length_bytes: usize,
    byte_order: ByteOrder,
    max_payload: usize,
}

impl LengthPrefixedFraming {
    pub fn new(length_bytes: usize, byte_order: ByteOrder, max_payload: usize) -> Result<Self, TransportError> {
        if !matches!(length_bytes, 1 | 2 | 4) {
            return Err(TransportError::config(format!(
                "length_bytes must be 1, 2, or 4, got {length_bytes}"
            )));
        }
        Ok(Self {
            length_bytes,
            byte_order,
            max_payload,
        })
    }

    pub fn from_config(cfg: &LengthPrefixedConfig) -> Result<Self, TransportError> {
        let byte_order = match cfg.byte_order.as_str() {
            "big" | "be" => ByteOrder::Big,
            "little" | "le" => ByteOrder::Little,
            other => {
                return Err(TransportError::config(format!(
                    "byte_order must be \"big\" or \"little\", got {other:?}"
                )));
            }
        };
        Self::new(cfg.length_bytes, byte_order, cfg.max_payload)
    }
}

impl Default for LengthPrefixedFraming {
    fn default() -> Self {
        Self {
            length_bytes: 4,
            byte_order: ByteOrder::Big,
            max_payload: 0,
        }
    }
}

impl Framing for LengthPrefixedFraming {
    fn decode(&self, buf: &[u8]) -> Result<Option<(Vec<u8>, usize)>, TransportError> {
        if buf.len() < self.length_bytes {
            return Ok(None);
        }

        let len = match (self.length_bytes, self.byte_order) {
            (1, _) => buf[0] as usize,
            (2, ByteOrder::Big) => u16::from_be_bytes([buf[0], buf[1]]) as usize,
            (2, ByteOrder::Little) => u16::from_le_bytes([buf[0], buf[1]]) as usize,
            (4, ByteOrder::Big) => u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize,
            (4, ByteOrder::Little) => u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize,
            (n, _) => return Err(TransportError::config(format!("unsupported length_bytes: {n}"))),
        };

        if self.max_payload > 0 && len > self.max_payload {
            return Err(TransportError::format_err(format!(
                "payload too large: {len} bytes (max {})",
                self.max_payload
            )));
        }

        let total = self.length_bytes + len;
        if buf.len() < total {
            return Ok(None);
        }

        Ok(Some((buf[self.length_bytes..total].to_vec(), total)))
    }

    fn encode(&self, data: &[u8], buf: &mut Vec<u8>) -> Result<(), TransportError> {
        let len = data.len();
        if self.max_payload > 0 && len > self.max_payload {
            return Err(TransportError::format_err(format!(
                "payload too large: {len} bytes (max {})",
                self.max_payload
            )));
        }
        let too_large =
            |bytes: usize| TransportError::format_err(format!("payload too large for {bytes}-byte header: {len}"));

        match (self.length_bytes, self.byte_order) {
            (1, _) => {
                let len = u8::try_from(len).map_err(|_| too_large(1))?;
                buf.push(len);
            }
            (2, order) => {
                let len = u16::try_from(len).map_err(|_| too_large(2))?;
                match order {
                    ByteOrder::Big => buf.extend_from_slice(&len.to_be_bytes()),
                    ByteOrder::Little => buf.extend_from_slice(&len.to_le_bytes()),
                }
            }
            (4, order) => {
                let len = u32::try_from(len).map_err(|_| too_large(4))?;
                match order {
                    ByteOrder::Big => buf.extend_from_slice(&len.to_be_bytes()),
                    ByteOrder::Little => buf.extend_from_slice(&len.to_le_bytes()),
                }
            }
            (n, _) => return Err(TransportError::config(format!("unsupported length_bytes: {n}"))),
        }
        buf.extend_from_slice(data);
        Ok(())
    }
}

// ---- Config ----

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct LengthPrefixedConfig {
    /// Header size in bytes: 1, 2 or 4 (default 4).
    pub length_bytes: usize,

    /// "big" (default) or "little".
    pub byte_order: String,

    /// Largest accepted payload in bytes (0 = unlimited).
    pub max_payload: usize,
}

impl Default for LengthPrefixedConfig {
    fn default() -> Self {
        Self {
            length_bytes: 4,
            byte_order: "big".to_string(),
            max_payload: 0,
        }
    }
}
