use super::*;

// =============================================================
// Identifiers
// =============================================================

#[test]
fn variant_id_is_canonical() {
    assert_eq!(variant_id("conversation-turn-3", 2), "conversation-turn-3_v2");
}

#[test]
fn split_variant_id_recovers_turn_prefix() {
    assert_eq!(split_variant_id("turn-0-ab_cd_v12"), Some(("turn-0-ab_cd", 12)));
    assert_eq!(split_variant_id("abc_v0"), None);
    assert_eq!(split_variant_id("_v1"), None);
    assert_eq!(split_variant_id("no-suffix"), None);
}

// =============================================================
// Placeholders
// =============================================================

#[test]
fn placeholder_detection() {
    assert!(is_placeholder_preview(None));
    assert!(is_placeholder_preview(Some("")));
    assert!(is_placeholder_preview(Some("   ")));
    assert!(is_placeholder_preview(Some("2")));
    assert!(is_placeholder_preview(Some("123")));
    assert!(is_placeholder_preview(Some(" ok ")));
    assert!(!is_placeholder_preview(Some("1234")));
    assert!(!is_placeholder_preview(Some("Sure, here is")));
    assert!(!is_placeholder_preview(Some(NO_CONTENT_PREVIEW)));
}

// =============================================================
// Role
// =============================================================

#[test]
fn role_parse_and_serde() {
    assert_eq!(Role::parse("Assistant"), Role::Assistant);
    assert_eq!(Role::parse(" user "), Role::User);
    assert_eq!(Role::parse("system"), Role::Unknown);
    assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), "\"assistant\"");
}

// =============================================================
// Records
// =============================================================

#[test]
fn branch_record_exposes_turn() {
    let record = BranchRecord {
        turn_id: "t".into(),
        turn_index: 4,
        current_variant: 2,
        total_variants: 3,
        role: Role::User,
        variants: Vec::new(),
        active_variant_id: "t_v2".into(),
        timestamp: 10,
    };
    let turn = record.turn();
    assert_eq!(turn.turn_index, 4);
    assert_eq!(turn.active_variant_index, 2);
    assert!(turn.is_branch_point());
}

#[test]
fn variant_serializes_camel_case() {
    let variant = Variant {
        variant_id: "t_v1".into(),
        turn_id: "t".into(),
        turn_index: 0,
        variant_index: 1,
        role: Role::Assistant,
        preview: "hello there".into(),
        text_hash: None,
        is_active: true,
        is_discovered: true,
        timestamp: 5,
    };
    let json = serde_json::to_value(&variant).unwrap();
    assert_eq!(json["variantId"], "t_v1");
    assert_eq!(json["isDiscovered"], true);
    assert!(json["textHash"].is_null());
    assert_eq!(variant.slot(), (0, 1));
}
