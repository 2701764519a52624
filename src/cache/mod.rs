//! Content cache used for whole-template and sub-block caching
//!
//! The engine only talks to the [`Cache`] trait. Two backends are provided:
//! [`MemoryCache`] for a single process and [`FileCache`], which stores one
//! file per key and publishes writes atomically.

mod file;
mod memory;

pub use file::FileCache;
pub use memory::MemoryCache;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use thiserror::Error;
use xxhash_rust::xxh64::xxh64;

use crate::error::RenderError;

/// Errors returned by cache reads and writes
///
/// Callers treat every variant as a cache miss and recompute.
#[derive(Debug, Error)]
pub enum CacheError {
    /// No entry stored under the key
    #[error("no cache entry found for '{key}'")]
    NotFound { key: String },

    /// The entry exists but its expiry has passed
    #[error("cache entry '{key}' has expired")]
    Expired { key: String },

    /// The entry failed validation
    #[error("unable to validate cached data for '{key}': {reason}")]
    Corrupt { key: String, reason: String },

    /// Backend I/O failure
    #[error("cache I/O error for '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

impl CacheError {
    pub(crate) fn corrupt(key: &str, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Key/value store with per-entry expiry
///
/// A `put` must be visible to an immediately following `has`/`get` on the
/// same instance, and readers must never observe a partially written entry.
pub trait Cache: Send + Sync {
    /// Whether a fresh (unexpired) entry exists for `key`
    fn has(&self, key: &str) -> bool;

    /// Fetch the payload stored under `key`
    fn get(&self, key: &str) -> Result<String, CacheError>;

    /// Store `content` under `key` for `ttl`
    fn put(&self, key: &str, content: &str, ttl: Duration) -> Result<(), CacheError>;
}

/// How a rendered template may be cached by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum CacheMode {
    /// Cache the final output
    #[default]
    Static,
    /// Cache the compiled output; deferred fragments are resolved on every render
    Dynamic,
    /// Never cache
    Disabled,
}

impl CacheMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheMode::Static => "static",
            CacheMode::Dynamic => "dynamic",
            CacheMode::Disabled => "disabled",
        }
    }

    /// Combine with the mode of nested output: the more restrictive mode wins
    pub fn nest(self, inner: CacheMode) -> CacheMode {
        self.max(inner)
    }
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheMode {
    type Err = RenderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "static" => Ok(CacheMode::Static),
            "dynamic" => Ok(CacheMode::Dynamic),
            "disabled" => Ok(CacheMode::Disabled),
            other => Err(RenderError::InvalidCacheMode {
                value: other.to_string(),
            }),
        }
    }
}

/// Longest ttl honoured; longer values are clamped
pub const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// A stored payload with its expiry and checksum
///
/// Serialized layout: a fixed-width RFC 3339 expiry in UTC with millisecond
/// precision, a fixed-width hex xxh64 checksum of the payload, then the raw
/// payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    expires_at: DateTime<Utc>,
    checksum: u64,
    payload: String,
}

impl CacheEntry {
    /// Width of the expiry field, e.g. `2026-10-17T08:30:00.000Z`
    pub const EXPIRY_WIDTH: usize = 24;
    /// Width of the checksum field
    pub const CHECKSUM_WIDTH: usize = 16;
    /// Total header width
    pub const HEADER_WIDTH: usize = Self::EXPIRY_WIDTH + Self::CHECKSUM_WIDTH;

    /// Create an entry expiring `ttl` from now
    pub fn new(payload: impl Into<String>, ttl: Duration) -> Self {
        let delta = TimeDelta::from_std(ttl.min(MAX_TTL)).unwrap_or_else(|_| TimeDelta::zero());
        let payload = payload.into();
        Self {
            expires_at: Utc::now() + delta,
            checksum: Self::checksum_of(payload.as_bytes()),
            payload,
        }
    }

    pub fn checksum_of(payload: &[u8]) -> u64 {
        xxh64(payload, 0)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Whether the stored checksum still matches the payload
    pub fn is_intact(&self) -> bool {
        Self::checksum_of(self.payload.as_bytes()) == self.checksum
    }

    /// Validate the entry and hand out its payload
    pub fn into_payload(self, key: &str) -> Result<String, CacheError> {
        if self.is_expired() {
            return Err(CacheError::Expired {
                key: key.to_string(),
            });
        }
        if !self.is_intact() {
            return Err(CacheError::corrupt(key, "checksum mismatch"));
        }
        Ok(self.payload)
    }

    pub fn encode(&self) -> Vec<u8> {
        let expiry = self
            .expires_at
            .to_rfc3339_opts(SecondsFormat::Millis, true);
        let mut out = Vec::with_capacity(Self::HEADER_WIDTH + self.payload.len());
        out.extend_from_slice(expiry.as_bytes());
        out.extend_from_slice(format!("{:016x}", self.checksum).as_bytes());
        out.extend_from_slice(self.payload.as_bytes());
        out
    }

    /// Parse a serialized entry; structural problems are reported as corruption
    pub fn decode(key: &str, bytes: &[u8]) -> Result<Self, CacheError> {
        if bytes.len() < Self::HEADER_WIDTH {
            return Err(CacheError::corrupt(key, "truncated header"));
        }
        let expires_at = Self::decode_expiry(&bytes[..Self::EXPIRY_WIDTH])
            .ok_or_else(|| CacheError::corrupt(key, "invalid expiry field"))?;
        let checksum = std::str::from_utf8(&bytes[Self::EXPIRY_WIDTH..Self::HEADER_WIDTH])
            .ok()
            .and_then(|hex| u64::from_str_radix(hex, 16).ok())
            .ok_or_else(|| CacheError::corrupt(key, "invalid checksum field"))?;
        let payload = String::from_utf8(bytes[Self::HEADER_WIDTH..].to_vec())
            .map_err(|_| CacheError::corrupt(key, "payload is not valid UTF-8"))?;
        Ok(Self {
            expires_at,
            checksum,
            payload,
        })
    }

    /// Parse the expiry field alone
    pub fn decode_expiry(field: &[u8]) -> Option<DateTime<Utc>> {
        let text = std::str::from_utf8(field).ok()?;
        DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}
