use crate::errors::{LimiterError, Result, StoreError};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

/// Counting strategy executed by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Counter that resets when its TTL lapses. Bursts at window edges are possible.
    #[default]
    FixedWindow,
    /// One timestamp per admitted request, bounded over any trailing window.
    SlidingWindow,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::FixedWindow => "fixed_window",
            Algorithm::SlidingWindow => "sliding_window",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How many requests are admitted per window.
///
/// A duration of zero never expires: the bucket admits `limit` requests in total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSpec {
    limit: u64,
    duration_ms: i64,
}

impl WindowSpec {
    /// Create a window, rejecting negative durations (including the `-1` sentinel)
    pub fn new(limit: u64, duration_ms: i64) -> Result<Self> {
        if duration_ms < 0 {
            return Err(LimiterError::InvalidWindow { duration_ms });
        }
        Ok(Self { limit, duration_ms })
    }

    /// Create a window from a `Duration`, truncated to whole milliseconds
    pub fn per(limit: u64, window: Duration) -> Result<Self> {
        let duration_ms = i64::try_from(window.as_millis()).map_err(|_| {
            LimiterError::Configuration(format!("window {:?} is too long", window))
        })?;
        Self::new(limit, duration_ms)
    }

    /// Bucket that never expires
    pub fn permanent(limit: u64) -> Self {
        Self {
            limit,
            duration_ms: 0,
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn duration_ms(&self) -> i64 {
        self.duration_ms
    }

    pub fn expires(&self) -> bool {
        self.duration_ms > 0
    }
}

/// Outcome of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    /// Remaining lifetime of the limiter state, only meaningful when denied.
    /// Negative when the state never expires.
    pub retry_after_ms: i64,
}

impl Decision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            retry_after_ms: 0,
        }
    }

    pub fn deny(retry_after_ms: i64) -> Self {
        Self {
            allowed: false,
            retry_after_ms: retry_after_ms.max(-1),
        }
    }

    /// Advisory `Retry-After` in whole seconds, rounded up
    pub fn retry_after_secs(&self) -> Option<u64> {
        if self.allowed {
            None
        } else {
            retry_after_secs(self.retry_after_ms)
        }
    }

    pub fn outcome(&self) -> &'static str {
        if self.allowed {
            "allowed"
        } else {
            "denied"
        }
    }

    /// Interpret the `{allowed, pttl}` pair returned by the window scripts
    pub fn from_reply(reply: &[i64]) -> std::result::Result<Self, StoreError> {
        match reply {
            [1, _] => Ok(Decision::allow()),
            [0, ttl] => Ok(Decision::deny(*ttl)),
            other => Err(StoreError::Logic(format!(
                "unexpected window script reply: {:?}",
                other
            ))),
        }
    }
}

/// Round milliseconds up to whole seconds; `None` for a bucket that never expires
pub fn retry_after_secs(retry_after_ms: i64) -> Option<u64> {
    u64::try_from(retry_after_ms)
        .ok()
        .map(|ms| ms.div_ceil(1000))
}

/// Store key for one limiter's counting state: `{prefix}:{identifier}:{disambiguator}`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateKey {
    rendered: String,
    prefix_len: usize,
    identifier_len: usize,
}

impl RateKey {
    pub fn new(prefix: &str, identifier: &str, disambiguator: &str) -> Self {
        Self {
            rendered: format!("{}:{}:{}", prefix, identifier, disambiguator),
            prefix_len: prefix.len(),
            identifier_len: identifier.len(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.rendered
    }

    pub fn prefix(&self) -> &str {
        &self.rendered[..self.prefix_len]
    }

    pub fn identifier(&self) -> &str {
        let start = self.prefix_len + 1;
        &self.rendered[start..start + self.identifier_len]
    }

    pub fn disambiguator(&self) -> &str {
        &self.rendered[self.prefix_len + self.identifier_len + 2..]
    }
}

impl fmt::Display for RateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendered)
    }
}
