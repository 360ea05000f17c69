//! Exporter configuration
//!
//! Values consumed by the liveness core. Loading them (CLI flags and
//! environment) happens in `main.rs`.

use std::time::Duration;

use tracing::warn;

use crate::error::{Error, Result};

/// Default suffix nsq uses for topics and channels it never writes to disk.
pub const DEFAULT_EPHEMERAL_SUFFIX: &str = "#ephemeral";

// =============================================================================
// Ephemeral Filter
// =============================================================================

/// Suffix predicate applied to topic and channel names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EphemeralFilter {
    /// Every topic and channel is recorded
    Disabled,
    /// Names ending in the suffix are never recorded
    Suffix(String),
}

impl EphemeralFilter {
    pub fn from_flag(enabled: bool, suffix: impl Into<String>) -> Self {
        if enabled {
            EphemeralFilter::Suffix(suffix.into())
        } else {
            EphemeralFilter::Disabled
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        match self {
            EphemeralFilter::Disabled => false,
            EphemeralFilter::Suffix(suffix) => name.ends_with(suffix.as_str()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, EphemeralFilter::Suffix(_))
    }
}

impl Default for EphemeralFilter {
    fn default() -> Self {
        EphemeralFilter::Suffix(DEFAULT_EPHEMERAL_SUFFIX.to_string())
    }
}

// =============================================================================
// Exporter Config
// =============================================================================

/// Configuration for the liveness ledgers and the janitor
#[derive(Debug, Clone, PartialEq)]
pub struct ExporterConfig {
    /// How long a node may stay silent before it is forgotten
    pub node_ttl: Duration,

    /// How long a topic/channel combo (or a topic without channel) may stay silent
    pub topic_channel_ttl: Duration,

    /// Period of the janitor sweep
    pub janitor_interval: Duration,

    /// Filter for ephemeral topics and channels
    pub ephemeral: EphemeralFilter,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            node_ttl: Duration::from_secs(60),
            topic_channel_ttl: Duration::from_secs(120),
            janitor_interval: Duration::from_secs(15),
            ephemeral: EphemeralFilter::default(),
        }
    }
}

impl ExporterConfig {
    /// Reject values the janitor cannot work with.
    ///
    /// A janitor interval longer than half the smaller TTL is accepted but
    /// logged, since expired series then linger noticeably past their TTL.
    pub fn validate(&self) -> Result<()> {
        if self.janitor_interval.is_zero() {
            return Err(Error::Config(
                "janitor interval must be greater than zero".to_string(),
            ));
        }

        if let EphemeralFilter::Suffix(suffix) = &self.ephemeral {
            if suffix.is_empty() {
                return Err(Error::Config(
                    "ephemeral suffix must not be empty when the filter is enabled".to_string(),
                ));
            }
        }

        let shortest_ttl = self.node_ttl.min(self.topic_channel_ttl);
        if self.janitor_interval > shortest_ttl / 2 {
            warn!(
                janitor_interval_secs = self.janitor_interval.as_secs(),
                shortest_ttl_secs = shortest_ttl.as_secs(),
                "Janitor interval exceeds half the shortest TTL, expired series will linger"
            );
        }

        Ok(())
    }
}

// =============================================================================
// Address Parsing
// =============================================================================

/// Validate one `hostname:port` entry of a server list.
///
/// An `http://` or `https://` scheme is accepted and kept.
pub fn parse_server_address(value: &str) -> Result<String> {
    let value = value.trim().trim_end_matches('/');
    let authority = value
        .strip_prefix("http://")
        .or_else(|| value.strip_prefix("https://"))
        .unwrap_or(value);
    let mut parts = authority.split(':');

    match (parts.next(), parts.next(), parts.next()) {
        (Some(host), Some(port), None) if !host.is_empty() => {
            port.parse::<u16>().map_err(|_| {
                Error::Config(format!("invalid port in server address '{}'", value))
            })?;
            Ok(value.to_string())
        }
        _ => Err(Error::Config(format!(
            "'{}' is not a hostname:port combination",
            value
        ))),
    }
}
