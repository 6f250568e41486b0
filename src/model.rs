//! Turn, variant and branch-record types.
//!
//! SYSTEM CONTEXT
//! ==============
//! A *turn* is a position in the linear conversation; a *variant* is one
//! regeneration or edit of that turn. The tree stores variants only. Turns are
//! recovered by grouping variants on `turn_index`.
//!
//! Variant identity is canonical: `"{turn_id}_v{variant_index}"`. The turn
//! identity is the common prefix before the `_v` suffix.

#[cfg(test)]
#[path = "model_test.rs"]
mod model_test;

use serde::{Deserialize, Serialize};

/// Stable identifier of a turn position (host-provided or synthesized).
pub type TurnId = String;
/// Globally unique identifier of a (turn, variant) pair.
pub type VariantId = String;

/// Preview text used when a turn renders no readable content.
pub const NO_CONTENT_PREVIEW: &str = "[No content]";

/// Who authored a turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    #[default]
    Unknown,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Unknown => "unknown",
        }
    }

    /// Parse a host role attribute value. Unrecognised values map to `Unknown`.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "user" | "human" => Self::User,
            "assistant" | "model" | "bot" => Self::Assistant,
            _ => Self::Unknown,
        }
    }
}

/// Canonical variant identifier for a turn and 1-based variant index.
#[must_use]
pub fn variant_id(turn_id: &str, variant_index: u32) -> VariantId {
    format!("{turn_id}_v{variant_index}")
}

/// Split a canonical variant identifier into its turn prefix and index.
#[must_use]
pub fn split_variant_id(variant_id: &str) -> Option<(&str, u32)> {
    let (turn_id, index) = variant_id.rsplit_once("_v")?;
    let Ok(index) = index.parse::<u32>() else {
        return None;
    };
    if turn_id.is_empty() || index == 0 {
        return None;
    }
    Some((turn_id, index))
}

/// Whether a preview string is an inferred placeholder rather than content.
///
/// Placeholders are missing, empty, or at most three characters once trimmed,
/// which covers the bare 1-3 digit indices the detector writes for
/// undiscovered variants.
#[must_use]
pub fn is_placeholder_preview(preview: Option<&str>) -> bool {
    let Some(text) = preview else {
        return true;
    };
    let trimmed = text.trim();
    trimmed.is_empty() || trimmed.chars().count() <= 3
}

/// A position in the linear conversation, derived from a branch record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub turn_index: usize,
    pub turn_id: TurnId,
    pub role: Role,
    pub total_variants: u32,
    pub active_variant_index: u32,
}

impl Turn {
    /// A turn is a branch point when the host reports more than one variant.
    #[must_use]
    pub fn is_branch_point(&self) -> bool {
        self.total_variants > 1
    }
}

/// One (turn, variant) pair: a node in the conversation tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    pub variant_id: VariantId,
    pub turn_id: TurnId,
    pub turn_index: usize,
    /// 1-based position within the turn.
    pub variant_index: u32,
    pub role: Role,
    /// Short content preview, or a placeholder when undiscovered.
    pub preview: String,
    /// Hash of `preview`; `None` until the content has been observed.
    pub text_hash: Option<String>,
    /// True iff this is the variant the host currently displays.
    pub is_active: bool,
    /// True once the content has been observed. Never reverts.
    pub is_discovered: bool,
    /// Last observation time, ms since epoch.
    pub timestamp: i64,
}

impl Variant {
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        is_placeholder_preview(Some(&self.preview))
    }

    /// Grouping key used to consolidate duplicates across identities.
    #[must_use]
    pub fn slot(&self) -> (usize, u32) {
        (self.turn_index, self.variant_index)
    }
}

/// Everything the detector learned about one branch-point turn in a rescan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchRecord {
    pub turn_id: TurnId,
    pub turn_index: usize,
    pub current_variant: u32,
    pub total_variants: u32,
    pub role: Role,
    /// One descriptor per variant index, `1..=total_variants`, in order.
    pub variants: Vec<Variant>,
    pub active_variant_id: VariantId,
    pub timestamp: i64,
}

impl BranchRecord {
    #[must_use]
    pub fn turn(&self) -> Turn {
        Turn {
            turn_index: self.turn_index,
            turn_id: self.turn_id.clone(),
            role: self.role,
            total_variants: self.total_variants,
            active_variant_index: self.current_variant,
        }
    }
}
