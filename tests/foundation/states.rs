//! Integration tests for lifecycle states
//!
//! EntityState set algebra, merge strategies, and change actions.

use daybook_foundation::{EntityAction, EntityState, EntityStateSet, MergeStrategy};

#[test]
fn changed_is_exactly_added_modified_deleted() {
    let changed = EntityState::changed();
    assert!(changed.contains(EntityState::Added));
    assert!(changed.contains(EntityState::Modified));
    assert!(changed.contains(EntityState::Deleted));
    assert!(!changed.contains(EntityState::Unchanged));
    assert!(!changed.contains(EntityState::Detached));
}

#[test]
fn attached_excludes_only_detached() {
    let attached = EntityState::attached();
    assert_eq!(attached.len(), 4);
    assert!(!attached.contains(EntityState::Detached));
    for state in attached {
        assert!(state.is_attached());
    }
}

#[test]
fn set_algebra_composes() {
    let pending: EntityStateSet = EntityState::Added | EntityState::Modified;
    let with_deletes = pending | EntityState::Deleted;

    assert_eq!(with_deletes, EntityState::changed());
    assert_eq!(
        EntityState::attached() - EntityState::changed(),
        EntityStateSet::from(EntityState::Unchanged)
    );
}

#[test]
fn per_state_flags_agree_with_the_sets() {
    for state in [
        EntityState::Detached,
        EntityState::Unchanged,
        EntityState::Added,
        EntityState::Modified,
        EntityState::Deleted,
    ] {
        assert_eq!(state.has_changes(), EntityState::changed().contains(state));
        assert_eq!(state.is_attached(), EntityState::attached().contains(state));
    }
}

#[test]
fn attach_family_actions_are_flagged() {
    assert!(EntityAction::Attach.is_attach());
    assert!(EntityAction::AttachOnQuery.is_attach());
    assert!(EntityAction::AttachOnImport.is_attach());
    assert!(!EntityAction::Delete.is_attach());
    assert!(!EntityAction::RejectChanges.is_attach());
    assert!(!EntityAction::Clear.is_attach());
}

#[test]
fn preserve_changes_is_the_default_strategy() {
    assert_eq!(MergeStrategy::default(), MergeStrategy::PreserveChanges);
}
