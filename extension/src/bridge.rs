//! JSON shapes returned across the JS boundary.

#[cfg(test)]
#[path = "bridge_test.rs"]
mod bridge_test;

use branchscope::CoreError;
use branchscope::navigator::NavigationResult;
use serde::{Deserialize, Serialize};

/// Code reported when the adapter was built without browser support or has
/// not been started.
pub const INACTIVE: &str = "inactive";

/// Result of any export. `code` is the kebab-case error kind on failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clicks: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Whether the host harness should retry (only `no-container`).
    #[serde(default)]
    pub retry: bool,
}

impl Outcome {
    #[must_use]
    pub fn success() -> Self {
        Self { ok: true, ..Self::default() }
    }

    #[must_use]
    pub fn failure(err: &CoreError) -> Self {
        Self {
            ok: false,
            code: Some(err.code().to_owned()),
            message: Some(err.to_string()),
            retry: matches!(err, CoreError::NoContainer),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn inactive() -> Self {
        Self {
            ok: false,
            code: Some(INACTIVE.to_owned()),
            message: Some("branchscope is not running on this page".to_owned()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn from_navigation(result: &NavigationResult) -> Self {
        match result {
            Ok(report) => Self {
                clicks: Some(report.clicks),
                request_id: Some(report.request_id.to_string()),
                ..Self::success()
            },
            Err(err) => Self { clicks: Some(err.clicks), ..Self::failure(&err.kind) },
        }
    }

    /// Serialized form; falls back to a fixed failure document.
    #[must_use]
    pub fn to_json(&self) -> String {
        match serde_json::to_string(self) {
            Ok(json) => json,
            Err(_) => r#"{"ok":false,"code":"serialization","retry":false}"#.to_owned(),
        }
    }
}
