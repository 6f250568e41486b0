use std::rc::Rc;

use super::*;
use crate::fixture::ManualClock;
use crate::model::Role;

const DAY_MS: i64 = 24 * 60 * 60 * 1_000;

fn lean_node(turn_id: &str, variant_index: u32, text: &str, discovered: bool) -> LeanNode {
    let id = format!("{turn_id}_v{variant_index}");
    LeanNode {
        id: id.clone(),
        variant_id: id,
        role: Role::Assistant,
        text: text.to_owned(),
        turn_index: 0,
        variant_index,
        turn_id: turn_id.to_owned(),
        children: Vec::new(),
        parent_id: None,
        is_discovered: discovered,
        is_active: variant_index == 1,
        text_hash: discovered.then(|| crate::hash::text_hash(text)),
        timestamp: 100,
    }
}

fn sample_tree() -> LeanTree {
    let nodes = vec![lean_node("t0", 1, "First answer", true), lean_node("t0", 2, "2", false)];
    LeanTree {
        node_count: nodes.len(),
        root_children: nodes.iter().map(|n| n.id.clone()).collect(),
        nodes,
    }
}

fn persistence_with(store: Rc<MemoryStore>, config: PersistenceConfig, now: i64) -> Persistence<Rc<MemoryStore>> {
    Persistence::new(store, config, ManualClock::at(now))
}

fn persistence() -> Persistence<Rc<MemoryStore>> {
    persistence_with(Rc::new(MemoryStore::new()), PersistenceConfig::default(), 1_000)
}

// =============================================================================
// Keys
// =============================================================================

#[test]
fn keys_follow_prefix_id_type_layout() {
    let p = persistence();
    assert_eq!(p.key("abc", DataType::Tree), "branchscope_abc_tree");
    assert_eq!(p.key("abc", DataType::Customizations), "branchscope_abc_customizations");
    assert_eq!(p.parse_key("branchscope_a_b_tree"), Some(("a_b", DataType::Tree)));
    assert_eq!(p.parse_key("branchscope_abc_other"), None);
    assert_eq!(p.parse_key("elsewhere_abc_tree"), None);
}

// =============================================================================
// Save / load
// =============================================================================

#[test]
fn save_then_load_round_trips() {
    let p = persistence();
    let tree = sample_tree();
    p.save_tree("abc", &tree).unwrap();
    assert_eq!(p.load_tree("abc"), Some(tree));
    assert_eq!(p.load_tree("missing"), None);
}

#[test]
fn saved_record_uses_lean_wire_shape() {
    let p = persistence();
    p.save_tree("abc", &sample_tree()).unwrap();
    let raw = p.store().get("branchscope_abc_tree").unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(json["version"], "1.0.0");
    assert_eq!(json["timestamp"], 1_000);
    assert_eq!(json["conversationId"], "abc");
    assert_eq!(json["treeData"]["nodeCount"], 2);
    assert_eq!(json["treeData"]["nodes"][0]["variantId"], "t0_v1");
    assert!(json["treeData"]["nodes"][1]["textHash"].is_null());
}

#[test]
fn large_records_are_compressed_and_still_load() {
    let config = PersistenceConfig { compression_threshold: 10, ..PersistenceConfig::default() };
    let p = persistence_with(Rc::new(MemoryStore::new()), config, 1_000);
    let tree = sample_tree();
    p.save_tree("abc", &tree).unwrap();
    let raw = p.store().get("branchscope_abc_tree").unwrap();
    assert!(raw.starts_with(codec::SENTINEL));
    assert_eq!(p.load_tree("abc"), Some(tree));
}

#[test]
fn corrupt_record_is_treated_as_absent() {
    let p = persistence();
    p.store().set("branchscope_abc_tree", "{not json").unwrap();
    assert_eq!(p.load_tree("abc"), None);
    let err = p.try_load_tree("abc").unwrap_err();
    assert_eq!(err.code(), "corrupt-record");
}

#[test]
fn record_missing_required_fields_is_rejected() {
    let p = persistence();
    p.store().set("branchscope_abc_tree", r#"{"version":"1.0.0","timestamp":5,"treeData":{}}"#).unwrap();
    assert!(matches!(p.try_load_tree("abc"), Err(CoreError::CorruptRecord { .. })));
    p.store().set("branchscope_abc_tree", r#"{"version":"1.0.0","conversationId":"abc","treeData":{}}"#).unwrap();
    assert!(matches!(p.try_load_tree("abc"), Err(CoreError::CorruptRecord { .. })));
}

#[test]
fn older_versions_migrate_and_accept_tree_alias() {
    let p = persistence();
    let json = r#"{"version":"0.9","timestamp":900,"conversationId":"abc",
        "tree":{"nodeCount":1,"rootChildren":["t0_v1"],"nodes":[{"id":"t0_v1","text":"hello there"}]}}"#;
    p.store().set("branchscope_abc_tree", json).unwrap();
    let tree = p.load_tree("abc").unwrap();
    let variant = tree.nodes[0].to_variant();
    assert_eq!(variant.turn_id, "t0");
    assert_eq!(variant.variant_index, 1);
    assert_eq!(variant.preview, "hello there");
}

#[test]
fn stale_record_is_absent_until_pruned() {
    let store = Rc::new(MemoryStore::new());
    let writer = persistence_with(Rc::clone(&store), PersistenceConfig::default(), 0);
    writer.save_tree("old", &sample_tree()).unwrap();
    writer.save_tree_at("new", &sample_tree(), 40 * DAY_MS).unwrap();

    let reader = persistence_with(Rc::clone(&store), PersistenceConfig::default(), 31 * DAY_MS);
    assert!(matches!(reader.try_load_tree("old"), Err(CoreError::StaleRecord { .. })));
    assert_eq!(reader.load_tree("old"), None);
    assert!(store.get("branchscope_old_tree").is_some());

    assert_eq!(reader.prune_stale(), vec!["branchscope_old_tree".to_owned()]);
    assert!(store.get("branchscope_old_tree").is_none());
    assert!(store.get("branchscope_new_tree").is_some());
}

// =============================================================================
// Quota
// =============================================================================

#[test]
fn usage_over_quota_evicts_oldest_quarter_but_not_the_new_record() {
    let store = Rc::new(MemoryStore::new());
    let p = persistence_with(Rc::clone(&store), PersistenceConfig::default(), 0);
    for (i, id) in ["a", "b", "c", "d"].iter().enumerate() {
        p.save_tree_at(id, &sample_tree(), i64::try_from(i).unwrap() * 10).unwrap();
    }
    let tight = PersistenceConfig { quota_bytes: p.usage_bytes(), ..PersistenceConfig::default() };
    let p = persistence_with(Rc::clone(&store), tight, 0);
    p.save_tree_at("e", &sample_tree(), 1).unwrap();

    assert_eq!(p.conversation_ids(), vec!["b", "c", "d", "e"]);
}

#[test]
fn rejected_write_evicts_and_retries_once() {
    let probe = persistence();
    probe.save_tree_at("x", &sample_tree(), 0).unwrap();
    let one_record = probe.usage_bytes();

    let store = Rc::new(MemoryStore::with_capacity(one_record * 2 + one_record / 2));
    let p = persistence_with(Rc::clone(&store), PersistenceConfig::default(), 0);
    p.save_tree_at("a", &sample_tree(), 1).unwrap();
    p.save_tree_at("b", &sample_tree(), 2).unwrap();
    p.save_tree_at("c", &sample_tree(), 3).unwrap();
    assert_eq!(p.conversation_ids(), vec!["b", "c"]);
}

#[test]
fn write_fails_when_eviction_cannot_make_room() {
    let store = Rc::new(MemoryStore::with_capacity(10));
    let p = persistence_with(store, PersistenceConfig::default(), 0);
    let err = p.save_tree("abc", &sample_tree()).unwrap_err();
    assert_eq!(err, CoreError::StorageQuota { key: "branchscope_abc_tree".to_owned() });
}

#[test]
fn eviction_count_rounds_up() {
    assert_eq!(eviction_count(4, 0.25), 1);
    assert_eq!(eviction_count(5, 0.25), 2);
    assert_eq!(eviction_count(1, 0.25), 1);
    assert_eq!(eviction_count(3, 0.0), 1);
    assert_eq!(eviction_count(3, 1.0), 3);
    assert_eq!(eviction_count(1_000, 0.25), 250);
    assert_eq!(eviction_count(0, 0.25), 0);
}

// =============================================================================
// Customizations & housekeeping
// =============================================================================

#[test]
fn customizations_round_trip() {
    let p = persistence();
    let mut custom = BTreeMap::new();
    custom.insert(
        "t0_v2".to_owned(),
        VariantCustomization { name: Some("shorter".to_owned()), color: Some("#ff8800".to_owned()) },
    );
    p.save_customizations("abc", &custom).unwrap();
    assert_eq!(p.load_customizations("abc"), custom);
    assert!(p.load_customizations("other").is_empty());
}

#[test]
fn clear_removes_only_that_conversation() {
    let p = persistence();
    p.save_tree("a", &sample_tree()).unwrap();
    p.save_customizations("a", &BTreeMap::new()).unwrap();
    p.save_tree("b", &sample_tree()).unwrap();
    p.clear("a");
    assert_eq!(p.conversation_ids(), vec!["b"]);
}

#[test]
fn clear_all_leaves_foreign_keys() {
    let p = persistence();
    p.store().set("theme", "dark").unwrap();
    p.save_tree("a", &sample_tree()).unwrap();
    p.save_tree("b", &sample_tree()).unwrap();
    assert_eq!(p.clear_all(), 2);
    assert_eq!(p.store().keys(), vec!["theme".to_owned()]);
}

#[test]
fn stats_summarise_each_conversation() {
    let p = persistence();
    p.save_tree("a", &sample_tree()).unwrap();
    p.save_customizations("a", &BTreeMap::new()).unwrap();
    p.save_tree("b", &sample_tree()).unwrap();

    let stats = p.stats();
    assert_eq!(stats.record_count, 3);
    assert_eq!(stats.total_bytes, p.usage_bytes());
    assert_eq!(stats.conversations.len(), 2);
    let a = &stats.conversations[0];
    assert_eq!(a.conversation_id, "a");
    assert_eq!(a.node_count, 2);
    assert_eq!(a.discovered_count, 1);
    assert_eq!(a.timestamp, Some(1_000));
    assert!(a.has_customizations);
    assert!(!stats.conversations[1].has_customizations);
}
