//! Record tokenizers: turn a raw byte stream into discrete records.
//!
//! The connector reads bytes in whatever chunks the transport delivers and
//! appends them to a per-connection buffer. A [`RecordStream`] then splits
//! complete records off the front of that buffer, leaving partial frames in
//! place until more bytes arrive.
//!
//! ```text
//! bytes ──► buf ──► RecordStream::decode ──► Some(record) / None (need more)
//!                   RecordStream::decode_eof at end of input
//! ```
//!
//! Factories are stateless and shared; each connection gets its own stream
//! from [`RecordStreamFactory::new_stream`].

use crate::error::FeedError;

/// Default upper bound for a single record.
pub const DEFAULT_MAX_RECORD_LEN: usize = 64 * 1024;

/// Stateful per-connection tokenizer.
pub trait RecordStream: Send {
    type Record: Send + 'static;

    /// Split one complete record off the front of `buf`.
    ///
    /// Returns `Ok(None)` when `buf` does not yet hold a complete record.
    fn decode(&mut self, buf: &mut Vec<u8>) -> Result<Option<Self::Record>, FeedError>;

    /// Called once the input is exhausted. Drains any trailing record.
    ///
    /// The default treats leftover bytes as an error.
    fn decode_eof(&mut self, buf: &mut Vec<u8>) -> Result<Option<Self::Record>, FeedError> {
        match self.decode(buf)? {
            Some(record) => Ok(Some(record)),
            None if buf.is_empty() => Ok(None),
            None => Err(FeedError::Decode(format!("{} trailing bytes at end of input", buf.len()))),
        }
    }
}

/// Stateless factory producing one [`RecordStream`] per connection.
pub trait RecordStreamFactory: Send + Sync + 'static {
    type Stream: RecordStream;

    fn new_stream(&self) -> Self::Stream;
}

// ---------------------------------------------------------------------------
// Line framing
// ---------------------------------------------------------------------------

/// `\n`-delimited UTF-8 text records. `\r\n` is accepted and blank lines are skipped.
#[derive(Debug, Clone)]
pub struct LineRecordStream {
    max_record_len: usize,
    /// Bytes of `buf` already scanned without finding a newline.
    scanned: usize,
}

impl LineRecordStream {
    pub fn new(max_record_len: usize) -> Self {
        Self { max_record_len, scanned: 0 }
    }

    fn take_line(&mut self, buf: &mut Vec<u8>, end: usize, consumed: usize) -> Result<String, FeedError> {
        let mut line: Vec<u8> = buf.drain(..consumed).collect();
        line.truncate(end);
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        self.scanned = 0;
        String::from_utf8(line).map_err(|e| FeedError::Decode(format!("record is not UTF-8: {e}")))
    }
}

impl RecordStream for LineRecordStream {
    type Record = String;

    fn decode(&mut self, buf: &mut Vec<u8>) -> Result<Option<String>, FeedError> {
        loop {
            let Some(pos) = buf[self.scanned..].iter().position(|&b| b == b'\n').map(|p| p + self.scanned) else {
                self.scanned = buf.len();
                // A trailing `\r` may be the first half of a `\r\n` split across reads.
                let pending = buf.len() - usize::from(buf.last() == Some(&b'\r'));
                if pending > self.max_record_len {
                    return Err(FeedError::Decode(format!(
                        "record exceeds {} bytes without a delimiter",
                        self.max_record_len
                    )));
                }
                return Ok(None);
            };
            let len = pos - usize::from(pos > 0 && buf[pos - 1] == b'\r');
            if len > self.max_record_len {
                return Err(FeedError::Decode(format!("record of {len} bytes exceeds {}", self.max_record_len)));
            }
            let line = self.take_line(buf, pos, pos + 1)?;
            if !line.trim().is_empty() {
                return Ok(Some(line));
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut Vec<u8>) -> Result<Option<String>, FeedError> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        if buf.is_empty() {
            return Ok(None);
        }
        let len = buf.len();
        let line = self.take_line(buf, len, len)?;
        Ok((!line.trim().is_empty()).then_some(line))
    }
}

/// Factory for [`LineRecordStream`].
#[derive(Debug, Clone)]
pub struct LineRecordStreamFactory {
    pub max_record_len: usize,
}

impl Default for LineRecordStreamFactory {
    fn default() -> Self {
        Self { max_record_len: DEFAULT_MAX_RECORD_LEN }
    }
}

impl RecordStreamFactory for LineRecordStreamFactory {
    type Stream = LineRecordStream;

    fn new_stream(&self) -> LineRecordStream {
        LineRecordStream::new(self.max_record_len)
    }
}

// ---------------------------------------------------------------------------
// Length-prefixed framing
// ---------------------------------------------------------------------------

/// Binary records framed as `[len: u32 big-endian][payload; len]`.
#[derive(Debug, Clone)]
pub struct LengthPrefixedRecordStream {
    max_record_len: usize,
}

const LEN_PREFIX: usize = 4;

impl RecordStream for LengthPrefixedRecordStream {
    type Record = Vec<u8>;

    fn decode(&mut self, buf: &mut Vec<u8>) -> Result<Option<Vec<u8>>, FeedError> {
        if buf.len() < LEN_PREFIX {
            return Ok(None);
        }
        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if len > self.max_record_len {
            return Err(FeedError::Decode(format!("frame length {len} exceeds {}", self.max_record_len)));
        }
        if buf.len() < LEN_PREFIX + len {
            return Ok(None);
        }
        let record = buf[LEN_PREFIX..LEN_PREFIX + len].to_vec();
        buf.drain(..LEN_PREFIX + len);
        Ok(Some(record))
    }
}

/// Factory for [`LengthPrefixedRecordStream`].
#[derive(Debug, Clone)]
pub struct LengthPrefixedRecordStreamFactory {
    pub max_record_len: usize,
}

impl Default for LengthPrefixedRecordStreamFactory {
    fn default() -> Self {
        Self { max_record_len: DEFAULT_MAX_RECORD_LEN }
    }
}

impl RecordStreamFactory for LengthPrefixedRecordStreamFactory {
    type Stream = LengthPrefixedRecordStream;

    fn new_stream(&self) -> LengthPrefixedRecordStream {
        LengthPrefixedRecordStream { max_record_len: self.max_record_len }
    }
}
