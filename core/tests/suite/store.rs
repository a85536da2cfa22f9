//! Fragment store invariants, including the property-based ones.

use std::sync::Arc;

use proptest::prelude::*;
use storyloom_core::branches::BranchManager;
use storyloom_core::config::Config;
use storyloom_core::error::CoreError;
use storyloom_core::store::{FieldPatch, FragmentStore, StoreTuning};
use storyloom_core::story::StoryStore;
use storyloom_protocol::{Fragment, FragmentType};
use tempfile::TempDir;

struct StoreFixture {
    _dir: TempDir,
    store: FragmentStore,
    story_id: String,
}

fn fixture() -> StoreFixture {
    let dir = TempDir::new().unwrap();
    let config = Arc::new(Config::with_data_dir(dir.path()));
    let stories = StoryStore::new(config.clone());
    let branches = Arc::new(BranchManager::new(config.clone()));
    let store = FragmentStore::new(config, branches, StoreTuning::default());
    let story = stories.create("Novel", "").unwrap();
    StoreFixture {
        _dir: dir,
        store,
        story_id: story.id,
    }
}

#[test]
fn delete_blocked_until_archive() {
    let fx = fixture();
    let fragment = fx
        .store
        .create(&fx.story_id, Fragment::new(FragmentType::Prose, "Opening"))
        .unwrap();

    let err = fx.store.delete(&fx.story_id, &fragment.id).unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));

    fx.store.archive(&fx.story_id, &fragment.id).unwrap();
    fx.store.delete(&fx.story_id, &fragment.id).unwrap();
    assert!(matches!(
        fx.store.get(&fx.story_id, &fragment.id),
        Err(CoreError::NotFound(_))
    ));
}

#[test]
fn archive_restore_round_trips() {
    let fx = fixture();
    let fragment = fx
        .store
        .create(&fx.story_id, Fragment::new(FragmentType::Knowledge, "Lore"))
        .unwrap();
    assert!(fx.store.archive(&fx.story_id, &fragment.id).unwrap().archived);
    assert!(!fx.store.restore(&fx.story_id, &fragment.id).unwrap().archived);
}

#[test]
fn list_by_type_returns_only_matching_prefixes() {
    let fx = fixture();
    for kind in [
        FragmentType::Prose,
        FragmentType::Character,
        FragmentType::Guideline,
        FragmentType::Knowledge,
        FragmentType::Marker,
    ] {
        fx.store
            .create(&fx.story_id, Fragment::new(kind.clone(), format!("{kind} one")))
            .unwrap();
    }
    for (kind, prefix) in [
        (FragmentType::Prose, "pr-"),
        (FragmentType::Character, "ch-"),
        (FragmentType::Guideline, "gl-"),
        (FragmentType::Knowledge, "kn-"),
        (FragmentType::Marker, "mk-"),
    ] {
        let listed = fx.store.list(&fx.story_id, Some(&kind), false).unwrap();
        assert_eq!(listed.len(), 1, "one {kind} fragment expected");
        assert!(listed.iter().all(|f| f.id.starts_with(prefix)));
    }
}

/// A small patch universe: each field either untouched or set to one of a
/// few known values.
fn patch_strategy() -> impl Strategy<Value = FieldPatch> {
    let field = prop::option::of(prop::sample::select(vec![
        "alpha".to_string(),
        "beta".to_string(),
        "gamma".to_string(),
    ]));
    (field.clone(), field.clone(), field).prop_map(|(name, description, content)| FieldPatch {
        name,
        description,
        content,
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn version_increases_iff_a_field_changes(patches in prop::collection::vec(patch_strategy(), 1..8)) {
        let fx = fixture();
        let created = fx
            .store
            .create(
                &fx.story_id,
                Fragment::new(FragmentType::Prose, "alpha").with_content("alpha"),
            )
            .unwrap();

        let mut current = created;
        for patch in patches {
            let changed = patch.name.as_ref().is_some_and(|v| *v != current.name)
                || patch.description.as_ref().is_some_and(|v| *v != current.description)
                || patch.content.as_ref().is_some_and(|v| *v != current.content);
            let before = current.clone();
            let after = fx
                .store
                .update_versioned(&fx.story_id, &current.id, patch, None)
                .unwrap();

            if changed {
                prop_assert_eq!(after.version, before.version + 1);
                // The latest snapshot equals the pre-state.
                let last = after.versions.last().unwrap();
                prop_assert_eq!(last.version, before.version);
                prop_assert_eq!(&last.name, &before.name);
                prop_assert_eq!(&last.description, &before.description);
                prop_assert_eq!(&last.content, &before.content);
            } else {
                prop_assert_eq!(after.version, before.version);
                prop_assert_eq!(after.versions.len(), before.versions.len());
            }
            prop_assert!(after.versions.len() + 1 >= after.version as usize);
            current = after;
        }
    }

    #[test]
    fn revert_round_trips_content(contents in prop::collection::vec("[a-z]{1,12}", 2..6)) {
        let fx = fixture();
        let created = fx
            .store
            .create(
                &fx.story_id,
                Fragment::new(FragmentType::Prose, "Opening").with_content(contents[0].clone()),
            )
            .unwrap();
        for content in &contents[1..] {
            fx.store
                .update_versioned(&fx.story_id, &created.id, FieldPatch::content(content.clone()), None)
                .unwrap();
        }
        let reverted = fx.store.revert_to_version(&fx.story_id, &created.id, Some(1)).unwrap();
        prop_assert_eq!(&reverted.content, &contents[0]);
        // Version keeps climbing; reverts never rewind it.
        prop_assert_eq!(reverted.version, contents.len() as u64 + 1);
    }
}
