//! Newline-delimited JSON framing for the inbound byte stream.
//!
//! ```text
//! {"type":"heartbeat"}\n{"type":"msg","msg":{...}}\n{"type":"hea
//! \__________________/  \_______________________/  \____________/
//!      record 1                 record 2            buffered until
//!                                                   the next chunk
//! ```
//!
//! Records are split on `\n`; a trailing `\r` is stripped and blank records
//! are skipped. Bytes after the last delimiter of a chunk are kept and
//! completed by later chunks. A record that fails to parse is reported and
//! skipped; it never stops the records behind it.

use crate::messages::Inbound;

/// Longest excerpt of an offending record kept in a [`DecodeError`].
const EXCERPT_LEN: usize = 96;

/// Configuration for the framing layer.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum record length in bytes, delimiter excluded. Default: 1 MB.
    pub max_record_len: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_record_len: 1_048_576,
        }
    }
}

/// A record that could not be turned into an [`Inbound`] message.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The record is not valid JSON or has no recognised `type`.
    #[error("malformed record {excerpt:?}: {source}")]
    Json {
        /// Leading part of the record, lossily decoded.
        excerpt: String,
        /// Parser error.
        #[source]
        source: serde_json::Error,
    },

    /// The record grew past [`FrameConfig::max_record_len`] and was discarded.
    #[error("record of at least {len} bytes exceeds maximum {max}")]
    RecordTooLarge {
        /// Bytes seen when the record was discarded.
        len: usize,
        /// The configured maximum.
        max: usize,
    },
}

/// Stateful splitter turning byte chunks into [`Inbound`] messages.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    config: FrameConfig,
    buf: Vec<u8>,
    /// Start of the unconsumed part of `buf`.
    start: usize,
    /// Skipping the tail of an oversized record until its delimiter.
    discarding: bool,
}

impl FrameDecoder {
    /// Create a decoder with the given limits.
    pub fn new(config: FrameConfig) -> Self {
        Self {
            config,
            buf: Vec::new(),
            start: 0,
            discarding: false,
        }
    }

    /// Feed a chunk and iterate the records it completes.
    ///
    /// The iterator is lazy and single-use. Records not consumed before it is
    /// dropped stay buffered and are yielded by the next call.
    pub fn decode(&mut self, chunk: &[u8]) -> Frames<'_> {
        if self.start > 0 {
            self.buf.drain(..self.start);
            self.start = 0;
        }
        self.buf.extend_from_slice(chunk);
        Frames { decoder: self }
    }

    /// Bytes held back waiting for a delimiter.
    pub fn buffered(&self) -> usize {
        self.buf.len() - self.start
    }
}

/// Iterator over the records completed by one [`FrameDecoder::decode`] call.
pub struct Frames<'a> {
    decoder: &'a mut FrameDecoder,
}

impl Frames<'_> {
    /// Only the successfully parsed messages. Each dropped record is logged
    /// at `warn` level.
    pub fn messages(self) -> impl Iterator<Item = Inbound> {
        self.filter_map(|record| match record {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::warn!("Dropping inbound record: {e}");
                None
            }
        })
    }
}

impl Iterator for Frames<'_> {
    type Item = Result<Inbound, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        let d = &mut *self.decoder;
        let max = d.config.max_record_len;
        loop {
            let rest = &d.buf[d.start..];
            let Some(pos) = rest.iter().position(|&b| b == b'\n') else {
                let pending = rest.len();
                if pending > max {
                    d.start = d.buf.len();
                    if !d.discarding {
                        d.discarding = true;
                        return Some(Err(DecodeError::RecordTooLarge { len: pending, max }));
                    }
                }
                return None;
            };

            let record_start = d.start;
            d.start += pos + 1;
            if d.discarding {
                d.discarding = false;
                continue;
            }

            let record = trim(&d.buf[record_start..record_start + pos]);
            if record.is_empty() {
                continue;
            }
            if record.len() > max {
                return Some(Err(DecodeError::RecordTooLarge {
                    len: record.len(),
                    max,
                }));
            }
            return Some(serde_json::from_slice(record).map_err(|source| DecodeError::Json {
                excerpt: excerpt(record),
                source,
            }));
        }
    }
}

fn trim(record: &[u8]) -> &[u8] {
    let end = record
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(0, |i| i + 1);
    let start = record[..end]
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(end);
    &record[start..end]
}

fn excerpt(record: &[u8]) -> String {
    let cut = record.len().min(EXCERPT_LEN);
    String::from_utf8_lossy(&record[..cut]).into_owned()
}
