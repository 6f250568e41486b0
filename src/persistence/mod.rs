//! Persistence: per-conversation records in a key-value store.
//!
//! SYSTEM CONTEXT
//! ==============
//! Keys are `"{prefix}{conversationId}_{dataType}"`. Values are JSON records
//! (see [`record`]) passed through the [`codec`]. The store is shared with
//! the host page, so only keys under the configured prefix are ever
//! enumerated, evicted or cleared.
//!
//! ERROR HANDLING
//! ==============
//! A write rejected for quota evicts the oldest share of records and retries
//! once before surfacing [`CoreError::StorageQuota`]. Loads that hit corrupt
//! or stale records log and return `None` from [`Persistence::load_tree`];
//! [`Persistence::try_load_tree`] exposes the typed error instead.

pub mod codec;
pub mod record;
pub mod store;

#[cfg(test)]
#[path = "persistence_test.rs"]
mod persistence_test;

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use serde::Serialize;

use crate::clock::Clock;
use crate::config::PersistenceConfig;
use crate::error::CoreError;

pub use record::{ConversationRecord, CustomizationRecord, LeanNode, LeanTree, VariantCustomization};
pub use store::{KeyValueStore, MemoryStore, StoreError};

/// Record kinds stored per conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Tree,
    Customizations,
}

impl DataType {
    pub const ALL: [DataType; 2] = [DataType::Tree, DataType::Customizations];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tree => "tree",
            Self::Customizations => "customizations",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "tree" => Some(Self::Tree),
            "customizations" => Some(Self::Customizations),
            _ => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-conversation summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationStats {
    pub conversation_id: String,
    pub node_count: usize,
    pub discovered_count: usize,
    pub bytes: usize,
    pub timestamp: Option<i64>,
    pub compressed: bool,
    pub has_customizations: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
    pub record_count: usize,
    pub total_bytes: usize,
    pub conversations: Vec<ConversationStats>,
}

pub struct Persistence<S> {
    store: S,
    config: PersistenceConfig,
    clock: Rc<dyn Clock>,
}

impl<S> fmt::Debug for Persistence<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Persistence").field("config", &self.config).finish_non_exhaustive()
    }
}

impl<S: KeyValueStore> Persistence<S> {
    pub fn new(store: S, config: PersistenceConfig, clock: Rc<dyn Clock>) -> Self {
        Self { store, config, clock }
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    #[must_use]
    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    #[must_use]
    pub fn key(&self, conversation_id: &str, data_type: DataType) -> String {
        format!("{}{conversation_id}_{data_type}", self.config.prefix)
    }

    /// Inverse of [`Persistence::key`] for keys under this prefix.
    #[must_use]
    pub fn parse_key<'k>(&self, key: &'k str) -> Option<(&'k str, DataType)> {
        let rest = key.strip_prefix(self.config.prefix.as_str())?;
        let (conversation_id, data_type) = rest.rsplit_once('_')?;
        if conversation_id.is_empty() {
            return None;
        }
        Some((conversation_id, DataType::parse(data_type)?))
    }

    fn own_keys(&self) -> Vec<String> {
        self.store
            .keys()
            .into_iter()
            .filter(|k| k.starts_with(self.config.prefix.as_str()))
            .collect()
    }

    /// Bytes (key plus value) stored under the prefix.
    #[must_use]
    pub fn usage_bytes(&self) -> usize {
        self.own_keys()
            .iter()
            .map(|k| k.len() + self.store.get(k).map_or(0, |v| v.len()))
            .sum()
    }

    /// Conversation identifiers with at least one record.
    #[must_use]
    pub fn conversation_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .own_keys()
            .iter()
            .filter_map(|k| self.parse_key(k).map(|(id, _)| id.to_owned()))
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    // =========================================================================
    // Trees
    // =========================================================================

    /// # Errors
    ///
    /// [`CoreError::StorageQuota`] when the write fails even after eviction,
    /// [`CoreError::StorageUnavailable`] when the backend is unusable.
    pub fn save_tree(&self, conversation_id: &str, tree: &LeanTree) -> Result<(), CoreError> {
        self.save_tree_at(conversation_id, tree, self.clock.now_ms())
    }

    /// [`Persistence::save_tree`] with an explicit timestamp.
    ///
    /// # Errors
    ///
    /// As for [`Persistence::save_tree`].
    pub fn save_tree_at(&self, conversation_id: &str, tree: &LeanTree, now: i64) -> Result<(), CoreError> {
        let record = ConversationRecord::new(conversation_id, tree.clone(), now);
        let json = serde_json::to_string(&record)?;
        let key = self.key(conversation_id, DataType::Tree);
        self.write(&key, &json)?;
        log::info!("saved {} nodes for conversation `{conversation_id}`", tree.nodes.len());
        Ok(())
    }

    /// Stored tree, or `None` when absent, corrupt or stale.
    #[must_use]
    pub fn load_tree(&self, conversation_id: &str) -> Option<LeanTree> {
        match self.try_load_tree(conversation_id) {
            Ok(tree) => tree,
            Err(err) => {
                log::warn!("ignoring stored tree for `{conversation_id}`: {err}");
                None
            }
        }
    }

    /// # Errors
    ///
    /// [`CoreError::CorruptRecord`] or [`CoreError::StaleRecord`].
    pub fn try_load_tree(&self, conversation_id: &str) -> Result<Option<LeanTree>, CoreError> {
        self.try_load_tree_at(conversation_id, self.clock.now_ms())
    }

    /// # Errors
    ///
    /// As for [`Persistence::try_load_tree`].
    pub fn try_load_tree_at(&self, conversation_id: &str, now: i64) -> Result<Option<LeanTree>, CoreError> {
        let key = self.key(conversation_id, DataType::Tree);
        let Some(stored) = self.store.get(&key) else {
            return Ok(None);
        };
        let record = record::parse_conversation(&key, codec::decode(&stored))?;
        if record.conversation_id != conversation_id {
            log::warn!(
                "record under `{key}` names conversation `{}`; using it anyway",
                record.conversation_id
            );
        }
        let age_ms = now.saturating_sub(record.timestamp);
        if age_ms > self.config.stale_after_ms {
            return Err(CoreError::StaleRecord { key, age_ms });
        }
        Ok(Some(record.tree_data))
    }

    // =========================================================================
    // Customizations
    // =========================================================================

    /// # Errors
    ///
    /// As for [`Persistence::save_tree`].
    pub fn save_customizations(
        &self,
        conversation_id: &str,
        customizations: &BTreeMap<String, VariantCustomization>,
    ) -> Result<(), CoreError> {
        let record = CustomizationRecord {
            version: record::CURRENT_VERSION.to_owned(),
            timestamp: self.clock.now_ms(),
            conversation_id: conversation_id.to_owned(),
            customizations: customizations.clone(),
        };
        let json = serde_json::to_string(&record)?;
        self.write(&self.key(conversation_id, DataType::Customizations), &json)
    }

    /// Stored customizations keyed by variant id; empty when absent or corrupt.
    #[must_use]
    pub fn load_customizations(&self, conversation_id: &str) -> BTreeMap<String, VariantCustomization> {
        let key = self.key(conversation_id, DataType::Customizations);
        let Some(stored) = self.store.get(&key) else {
            return BTreeMap::new();
        };
        match record::parse_customizations(&key, codec::decode(&stored)) {
            Ok(record) => record.customizations,
            Err(err) => {
                log::warn!("ignoring stored customizations: {err}");
                BTreeMap::new()
            }
        }
    }

    // =========================================================================
    // Housekeeping
    // =========================================================================

    /// Remove every record of one conversation.
    pub fn clear(&self, conversation_id: &str) {
        for data_type in DataType::ALL {
            self.store.remove(&self.key(conversation_id, data_type));
        }
        log::info!("cleared stored data for conversation `{conversation_id}`");
    }

    /// Remove every record under the prefix. Returns the number removed.
    pub fn clear_all(&self) -> usize {
        let keys = self.own_keys();
        for key in &keys {
            self.store.remove(key);
        }
        log::info!("cleared {} stored records", keys.len());
        keys.len()
    }

    /// Delete records older than the staleness threshold. Returns the keys
    /// removed.
    pub fn prune_stale(&self) -> Vec<String> {
        self.prune_stale_at(self.clock.now_ms())
    }

    pub fn prune_stale_at(&self, now: i64) -> Vec<String> {
        let stale: Vec<String> = self
            .own_keys()
            .into_iter()
            .filter(|key| {
                self.store
                    .get(key)
                    .and_then(|v| record::record_timestamp(codec::decode(&v)))
                    .is_some_and(|ts| now.saturating_sub(ts) > self.config.stale_after_ms)
            })
            .collect();
        for key in &stale {
            self.store.remove(key);
        }
        if !stale.is_empty() {
            log::info!("pruned {} stale records", stale.len());
        }
        stale
    }

    /// Delete the oldest share of records under the prefix, never `protect`.
    /// Unreadable records sort first. Returns the keys removed.
    pub fn evict(&self, protect: Option<&str>) -> Vec<String> {
        let mut candidates: Vec<(i64, String)> = self
            .own_keys()
            .into_iter()
            .filter(|k| protect != Some(k.as_str()))
            .map(|k| {
                let ts = self
                    .store
                    .get(&k)
                    .and_then(|v| record::record_timestamp(codec::decode(&v)))
                    .unwrap_or(i64::MIN);
                (ts, k)
            })
            .collect();
        if candidates.is_empty() {
            return Vec::new();
        }
        candidates.sort();
        let count = eviction_count(candidates.len(), self.config.eviction_fraction);
        let removed: Vec<String> = candidates.into_iter().take(count).map(|(_, k)| k).collect();
        for key in &removed {
            self.store.remove(key);
        }
        log::info!("evicted {} oldest records", removed.len());
        removed
    }

    #[must_use]
    pub fn stats(&self) -> StorageStats {
        let keys = self.own_keys();
        let mut by_conversation: BTreeMap<String, ConversationStats> = BTreeMap::new();
        let mut total_bytes = 0;
        for key in &keys {
            let Some(value) = self.store.get(key) else {
                continue;
            };
            let bytes = key.len() + value.len();
            total_bytes += bytes;
            let Some((conversation_id, data_type)) = self.parse_key(key) else {
                continue;
            };
            let entry = by_conversation.entry(conversation_id.to_owned()).or_insert_with(|| ConversationStats {
                conversation_id: conversation_id.to_owned(),
                node_count: 0,
                discovered_count: 0,
                bytes: 0,
                timestamp: None,
                compressed: false,
                has_customizations: false,
            });
            entry.bytes += bytes;
            match data_type {
                DataType::Tree => {
                    entry.compressed = codec::is_compressed(&value);
                    if let Ok(record) = record::parse_conversation(key, codec::decode(&value)) {
                        entry.node_count = record.tree_data.nodes.len();
                        entry.discovered_count = record.tree_data.discovered_count();
                        entry.timestamp = Some(record.timestamp);
                    }
                }
                DataType::Customizations => entry.has_customizations = true,
            }
        }
        StorageStats { record_count: keys.len(), total_bytes, conversations: by_conversation.into_values().collect() }
    }

    fn write(&self, key: &str, json: &str) -> Result<(), CoreError> {
        let value = codec::encode(json, self.config.compression_threshold);
        match self.store.set(key, &value) {
            Ok(()) => {}
            Err(StoreError::Quota) => {
                log::warn!("quota exceeded writing `{key}`; evicting and retrying once");
                self.evict(Some(key));
                match self.store.set(key, &value) {
                    Ok(()) => {}
                    Err(StoreError::Quota) => return Err(CoreError::StorageQuota { key: key.to_owned() }),
                    Err(StoreError::Unavailable(reason)) => return Err(CoreError::StorageUnavailable(reason)),
                }
            }
            Err(StoreError::Unavailable(reason)) => return Err(CoreError::StorageUnavailable(reason)),
        }
        if self.usage_bytes() > self.config.quota_bytes {
            log::warn!("storage usage above {} bytes; evicting", self.config.quota_bytes);
            self.evict(Some(key));
        }
        Ok(())
    }
}

/// `ceil(len * fraction)`, at least one and at most `len`.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn eviction_count(len: usize, fraction: f64) -> usize {
    let fraction = if fraction.is_finite() { fraction.clamp(0.0, 1.0) } else { 0.25 };
    // Non-negative and at most `len`, so the cast back cannot wrap.
    let count = (len as f64 * fraction).ceil() as usize;
    count.max(1).min(len)
}
