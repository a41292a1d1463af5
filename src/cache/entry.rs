//! Stored entries and their byte representation.
//!
//! Layout, big-endian, fields in this order:
//!
//! ```text
//! +---------+--------+------------+-------+----------------------+------------------+
//! | version | status | expires_at | flags | content_type         | body             |
//! | u8 (=1) | u16    | u64 millis | u8    | u16 len + UTF-8      | u32 len + bytes  |
//! +---------+--------+------------+-------+----------------------+------------------+
//! ```
//!
//! There are no maps in the layout, so equal entries always encode to equal bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use super::cache_control_value;
use crate::http::{Response, StatusCode};

const FORMAT_VERSION: u8 = 1;
const FLAG_CACHE_CONTROL: u8 = 0b0000_0001;
const FIXED_LEN: usize = 1 + 2 + 8 + 1;

/// Failure to turn an entry into bytes or back.
///
/// A decode error means the stored blob was written by another format version
/// or damaged in storage. It is never mapped to an empty entry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("entry truncated reading {field}: need {needed} bytes, {remaining} left")]
    Truncated {
        field: &'static str,
        needed: usize,
        remaining: usize,
    },

    #[error("unsupported entry format version {0}")]
    UnsupportedVersion(u8),

    #[error("unknown HTTP status {0}")]
    UnknownStatus(u16),

    #[error("unknown flag bits {0:#010b}")]
    UnknownFlags(u8),

    #[error("content type is not valid UTF-8: {0}")]
    InvalidContentType(#[from] std::str::Utf8Error),

    #[error("{0} trailing bytes after entry")]
    TrailingBytes(usize),

    #[error("{field} is {len} bytes, the format allows at most {max}")]
    FieldTooLarge {
        field: &'static str,
        len: usize,
        max: usize,
    },
}

/// A response captured on a miss, as persisted in [`Storage`](super::Storage).
///
/// Entries are immutable; refreshing a key writes a whole new entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub status: StatusCode,
    /// Empty when the original response had no `Content-Type`.
    pub content_type: String,
    pub body: Bytes,
    /// Absolute deadline in Unix milliseconds; the entry is valid while `now < expires_at`.
    pub expires_at: u64,
    /// Whether hits re-emit `Cache-Control`.
    pub cache_control: bool,
}

impl CacheEntry {
    /// Captures the parts of `response` the cache replays.
    pub fn from_response(response: &Response, expires_at: u64, cache_control: bool) -> Self {
        Self {
            status: response.status(),
            content_type: response.content_type().unwrap_or_default().to_owned(),
            body: response.payload().clone(),
            expires_at,
            cache_control,
        }
    }

    pub fn is_fresh(&self, now: u64) -> bool {
        now < self.expires_at
    }

    /// Seconds of freshness left at `now`, rounded up, never negative.
    pub fn max_age(&self, now: u64) -> u64 {
        self.expires_at.saturating_sub(now).div_ceil(1000)
    }

    /// Rebuilds the response to serve on a hit at `now`.
    pub fn to_response(&self, now: u64) -> Response {
        let mut response = Response::new(self.status).body_bytes(self.body.clone());
        if !self.content_type.is_empty() {
            response.set_header("Content-Type", self.content_type.as_str());
        }
        if self.cache_control {
            response.set_header("Cache-Control", cache_control_value(self.max_age(now)));
        }
        response
    }

    pub fn encode(&self) -> Result<Bytes, CodecError> {
        let content_type_len = u16::try_from(self.content_type.len()).map_err(|_| {
            CodecError::FieldTooLarge {
                field: "content_type",
                len: self.content_type.len(),
                max: u16::MAX as usize,
            }
        })?;
        let body_len =
            u32::try_from(self.body.len()).map_err(|_| CodecError::FieldTooLarge {
                field: "body",
                len: self.body.len(),
                max: u32::MAX as usize,
            })?;

        let mut buf =
            BytesMut::with_capacity(FIXED_LEN + 2 + self.content_type.len() + 4 + self.body.len());
        buf.put_u8(FORMAT_VERSION);
        buf.put_u16(self.status.as_u16());
        buf.put_u64(self.expires_at);
        buf.put_u8(if self.cache_control {
            FLAG_CACHE_CONTROL
        } else {
            0
        });
        buf.put_u16(content_type_len);
        buf.put_slice(self.content_type.as_bytes());
        buf.put_u32(body_len);
        buf.put_slice(&self.body);
        Ok(buf.freeze())
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, CodecError> {
        ensure(buf, FIXED_LEN, "header")?;

        let version = buf.get_u8();
        if version != FORMAT_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }
        let code = buf.get_u16();
        let status = StatusCode::from_u16(code).ok_or(CodecError::UnknownStatus(code))?;
        let expires_at = buf.get_u64();
        let flags = buf.get_u8();
        if flags & !FLAG_CACHE_CONTROL != 0 {
            return Err(CodecError::UnknownFlags(flags));
        }

        ensure(buf, 2, "content_type length")?;
        let content_type_len = usize::from(buf.get_u16());
        ensure(buf, content_type_len, "content_type")?;
        let content_type = std::str::from_utf8(&buf[..content_type_len])?.to_owned();
        buf.advance(content_type_len);

        ensure(buf, 4, "body length")?;
        let body_len = buf.get_u32() as usize;
        ensure(buf, body_len, "body")?;
        let body = buf.copy_to_bytes(body_len);

        if buf.has_remaining() {
            return Err(CodecError::TrailingBytes(buf.remaining()));
        }

        Ok(Self {
            status,
            content_type,
            body,
            expires_at,
            cache_control: flags & FLAG_CACHE_CONTROL != 0,
        })
    }
}

fn ensure(buf: &[u8], needed: usize, field: &'static str) -> Result<(), CodecError> {
    if buf.len() < needed {
        return Err(CodecError::Truncated {
            field,
            needed,
            remaining: buf.len(),
        });
    }
    Ok(())
}
