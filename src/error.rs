//! Error kinds shared by every component.
//!
//! ERROR HANDLING
//! ==============
//! Recoverable kinds (`no-turns`, `navigation-timeout`, `storage-quota`,
//! `corrupt-record`, `stale-record`) are logged by the component that hits
//! them and replaced with a default (empty tree, no-op navigation, eviction).
//! `no-container` is the only kind surfaced as an initialization failure so
//! the host harness can retry with backoff.

#[cfg(test)]
#[path = "error_test.rs"]
mod error_test;

use crate::dom::Direction;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("conversation container not found")]
    NoContainer,
    #[error("no turn elements found")]
    NoTurns,
    #[error("turn `{turn_id}` is no longer in the document")]
    StaleTarget { turn_id: String },
    #[error("no {direction} control on turn `{turn_id}`")]
    NoControl { turn_id: String, direction: Direction },
    #[error("reached the end of the variant range on turn `{turn_id}`")]
    EndOfRange { turn_id: String },
    #[error("variant counter on turn `{turn_id}` did not advance after {attempts} attempts")]
    NavigationTimeout { turn_id: String, attempts: u32 },
    #[error("navigation cancelled")]
    Cancelled,
    #[error("unknown variant `{0}`")]
    UnknownVariant(String),
    #[error("storage quota exceeded while writing `{key}`")]
    StorageQuota { key: String },
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("corrupt record under `{key}`: {reason}")]
    CorruptRecord { key: String, reason: String },
    #[error("record under `{key}` is stale (last written {age_ms} ms ago)")]
    StaleRecord { key: String, age_ms: i64 },
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl CoreError {
    /// Stable kebab-case code for the error kind, suitable for host UIs.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoContainer => "no-container",
            Self::NoTurns => "no-turns",
            Self::StaleTarget { .. } => "stale-target",
            Self::NoControl { .. } => "no-control",
            Self::EndOfRange { .. } => "end-of-range",
            Self::NavigationTimeout { .. } => "navigation-timeout",
            Self::Cancelled => "cancelled",
            Self::UnknownVariant(_) => "unknown-variant",
            Self::StorageQuota { .. } => "storage-quota",
            Self::StorageUnavailable(_) => "storage-unavailable",
            Self::CorruptRecord { .. } => "corrupt-record",
            Self::StaleRecord { .. } => "stale-record",
            Self::Serialization(_) => "serialization",
        }
    }

    /// Whether the kind is handled locally with a default rather than
    /// surfaced as a failure of the surrounding operation.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NoTurns
                | Self::NavigationTimeout { .. }
                | Self::StorageQuota { .. }
                | Self::CorruptRecord { .. }
                | Self::StaleRecord { .. }
        )
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
