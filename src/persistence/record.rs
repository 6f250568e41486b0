//! Persisted record shapes and their validation.
//!
//! The lean schema stores variants only. Each node carries its parent and
//! children as variant identifiers, so a snapshot rebuilds the arena without
//! pointer fix-ups. Reads go through `Raw*` shapes whose required fields are
//! optional, so a record missing `conversationId` or `timestamp` is rejected
//! as corrupt instead of failing deep inside serde.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::model::{Role, Variant, split_variant_id};

/// Schema version stamped on every record written.
pub const CURRENT_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeanNode {
    pub id: String,
    #[serde(default)]
    pub variant_id: String,
    #[serde(default)]
    pub role: Role,
    /// Preview text.
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub turn_index: usize,
    #[serde(default)]
    pub variant_index: u32,
    #[serde(default)]
    pub turn_id: String,
    #[serde(default)]
    pub children: Vec<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub is_discovered: bool,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub text_hash: Option<String>,
    #[serde(default)]
    pub timestamp: i64,
}

impl LeanNode {
    #[must_use]
    pub fn from_variant(variant: &Variant, parent_id: Option<String>, children: Vec<String>) -> Self {
        Self {
            id: variant.variant_id.clone(),
            variant_id: variant.variant_id.clone(),
            role: variant.role,
            text: variant.preview.clone(),
            turn_index: variant.turn_index,
            variant_index: variant.variant_index,
            turn_id: variant.turn_id.clone(),
            children,
            parent_id,
            is_discovered: variant.is_discovered,
            is_active: variant.is_active,
            text_hash: variant.text_hash.clone(),
            timestamp: variant.timestamp,
        }
    }

    /// Rebuild the variant, filling identity gaps left by older writers.
    #[must_use]
    pub fn to_variant(&self) -> Variant {
        let variant_id = if self.variant_id.is_empty() { self.id.clone() } else { self.variant_id.clone() };
        let parsed = split_variant_id(&variant_id);
        let turn_id = if self.turn_id.is_empty() {
            parsed.map(|(turn, _)| turn.to_owned()).unwrap_or_default()
        } else {
            self.turn_id.clone()
        };
        let variant_index = if self.variant_index == 0 {
            parsed.map_or(1, |(_, index)| index)
        } else {
            self.variant_index
        };
        Variant {
            variant_id,
            turn_id,
            turn_index: self.turn_index,
            variant_index,
            role: self.role,
            preview: self.text.clone(),
            text_hash: self.text_hash.clone(),
            is_active: self.is_active,
            is_discovered: self.is_discovered,
            timestamp: self.timestamp,
        }
    }
}

/// Flat, persistable tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeanTree {
    #[serde(default)]
    pub node_count: usize,
    #[serde(default)]
    pub root_children: Vec<String>,
    #[serde(default)]
    pub nodes: Vec<LeanNode>,
}

impl LeanTree {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn variants(&self) -> Vec<Variant> {
        self.nodes.iter().map(LeanNode::to_variant).collect()
    }

    #[must_use]
    pub fn discovered_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_discovered).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRecord {
    pub version: String,
    pub timestamp: i64,
    pub conversation_id: String,
    pub tree_data: LeanTree,
}

impl ConversationRecord {
    #[must_use]
    pub fn new(conversation_id: &str, tree: LeanTree, now: i64) -> Self {
        Self {
            version: CURRENT_VERSION.to_owned(),
            timestamp: now,
            conversation_id: conversation_id.to_owned(),
            tree_data: tree,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantCustomization {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomizationRecord {
    pub version: String,
    pub timestamp: i64,
    pub conversation_id: String,
    pub customizations: BTreeMap<String, VariantCustomization>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConversationRecord {
    version: Option<String>,
    timestamp: Option<i64>,
    conversation_id: Option<String>,
    #[serde(alias = "tree")]
    tree_data: Option<LeanTree>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCustomizationRecord {
    version: Option<String>,
    timestamp: Option<i64>,
    conversation_id: Option<String>,
    #[serde(default)]
    customizations: BTreeMap<String, VariantCustomization>,
}

fn corrupt(key: &str, reason: impl Into<String>) -> CoreError {
    CoreError::CorruptRecord { key: key.to_owned(), reason: reason.into() }
}

fn migrate(key: &str, version: Option<String>) -> String {
    match version {
        Some(v) if v == CURRENT_VERSION => v,
        other => {
            log::info!(
                "migrating `{key}` from {} to {CURRENT_VERSION}",
                other.as_deref().unwrap_or("unversioned")
            );
            CURRENT_VERSION.to_owned()
        }
    }
}

/// Parse, validate and migrate a tree record.
///
/// # Errors
///
/// [`CoreError::CorruptRecord`] for unparseable JSON or a missing
/// `conversationId`, `timestamp` or tree payload.
pub fn parse_conversation(key: &str, json: &str) -> Result<ConversationRecord, CoreError> {
    let raw: RawConversationRecord = serde_json::from_str(json).map_err(|e| corrupt(key, e.to_string()))?;
    let conversation_id = raw
        .conversation_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| corrupt(key, "missing conversationId"))?;
    let timestamp = raw.timestamp.ok_or_else(|| corrupt(key, "missing timestamp"))?;
    let tree_data = raw.tree_data.ok_or_else(|| corrupt(key, "missing tree payload"))?;
    Ok(ConversationRecord { version: migrate(key, raw.version), timestamp, conversation_id, tree_data })
}

/// Parse, validate and migrate a customization record.
///
/// # Errors
///
/// [`CoreError::CorruptRecord`] as for [`parse_conversation`].
pub fn parse_customizations(key: &str, json: &str) -> Result<CustomizationRecord, CoreError> {
    let raw: RawCustomizationRecord = serde_json::from_str(json).map_err(|e| corrupt(key, e.to_string()))?;
    let conversation_id = raw
        .conversation_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| corrupt(key, "missing conversationId"))?;
    let timestamp = raw.timestamp.ok_or_else(|| corrupt(key, "missing timestamp"))?;
    Ok(CustomizationRecord {
        version: migrate(key, raw.version),
        timestamp,
        conversation_id,
        customizations: raw.customizations,
    })
}

/// Timestamp of any record shape, for eviction ordering. `None` when the
/// value is not a JSON object with a numeric `timestamp`.
#[must_use]
pub fn record_timestamp(json: &str) -> Option<i64> {
    #[derive(Deserialize)]
    struct Stamp {
        timestamp: Option<i64>,
    }
    match serde_json::from_str::<Stamp>(json) {
        Ok(stamp) => stamp.timestamp,
        Err(_) => None,
    }
}
