//! Property-based tests for view resolution
//!
//! Uses proptest to check the partition and ordering guarantees every
//! subscriber relies on, first on plain record sets and then through the
//! engine against both backends.

use std::collections::HashSet;
use std::sync::Arc;

use proptest::prelude::*;
use syncdrop_core::{
    CollectionFilter, CollectionId, Drop, DropId, DropType, MemoryRemote, Principal, SessionAuth,
    SyncConfig, SyncDrop, ViewFilter,
};
use tempfile::TempDir;

// ============================================================================
// Strategy Generators
// ============================================================================

fn collection_strategy() -> impl Strategy<Value = CollectionId> {
    prop::sample::select(CollectionId::ALL.to_vec())
}

fn drop_type_strategy() -> impl Strategy<Value = DropType> {
    prop::sample::select(DropType::ALL.to_vec())
}

/// A drop with a random collection, timestamp and tombstone
fn drop_strategy() -> impl Strategy<Value = Drop> {
    (
        "[a-z ]{0,20}",
        drop_type_strategy(),
        collection_strategy(),
        0i64..1_000_000,
        prop::option::of(0i64..1_000_000),
    )
        .prop_map(|(content, drop_type, collection, created_at, deleted_at)| {
            let mut drop = Drop::new(content, drop_type, collection).with_created_at(created_at);
            drop.deleted_at = deleted_at;
            drop
        })
}

fn drops_strategy(max: usize) -> impl Strategy<Value = Vec<Drop>> {
    prop::collection::vec(drop_strategy(), 0..max)
}

fn ids(drops: &[Drop]) -> HashSet<DropId> {
    drops.iter().map(|d| d.id.clone()).collect()
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    /// "all" and "trash" split the store into two disjoint halves
    #[test]
    fn all_and_trash_partition_the_store(drops in drops_strategy(40)) {
        let active = ViewFilter::new(CollectionFilter::All).resolve(drops.clone());
        let trash = ViewFilter::new(CollectionFilter::Trash).resolve(drops.clone());

        prop_assert!(active.iter().all(Drop::is_active));
        prop_assert!(trash.iter().all(Drop::is_trashed));
        prop_assert!(ids(&active).is_disjoint(&ids(&trash)));
        prop_assert_eq!(active.len() + trash.len(), drops.len());
    }

    /// The collections together cover exactly the active drops
    #[test]
    fn collections_cover_active_drops(drops in drops_strategy(40)) {
        let active = ids(&ViewFilter::new(CollectionFilter::All).resolve(drops.clone()));

        let mut covered = HashSet::new();
        for collection in CollectionId::ALL {
            let view = ViewFilter::from(collection).resolve(drops.clone());
            prop_assert!(view.iter().all(|d| d.collection_id == collection && d.is_active()));
            for drop in view {
                prop_assert!(covered.insert(drop.id));
            }
        }
        prop_assert_eq!(covered, active);
    }

    /// Every resolved view is ordered newest first
    #[test]
    fn resolved_views_are_newest_first(
        drops in drops_strategy(60),
        collection in prop::option::of(collection_strategy()),
    ) {
        let filter = collection.map_or(CollectionFilter::All, CollectionFilter::Collection);
        let view = ViewFilter::new(filter).resolve(drops);
        for pair in view.windows(2) {
            prop_assert!(pair[0].created_at >= pair[1].created_at);
        }
    }

    /// Narrowing by a query never adds drops
    #[test]
    fn query_narrows_a_view(drops in drops_strategy(40), query in "[a-z]{1,3}") {
        let base = ids(&ViewFilter::new(CollectionFilter::All).resolve(drops.clone()));
        let narrowed = ViewFilter::new(CollectionFilter::All)
            .with_query(query.clone())
            .resolve(drops);

        prop_assert!(ids(&narrowed).is_subset(&base));
        prop_assert!(narrowed.iter().all(|d| d.content.contains(&query)
            || d.tags.iter().any(|t| t.contains(&query))));
    }
}

/// A fresh engine on either the local store or a signed-in memory remote
fn engine(temp: &TempDir, remote: bool) -> SyncDrop {
    let builder = SyncDrop::builder(SyncConfig::new(temp.path()));
    let builder = if remote {
        builder
            .auth(Arc::new(SessionAuth::signed_in(Principal::new("owner-1"))))
            .remote(Arc::new(MemoryRemote::new()))
    } else {
        builder
    };
    builder.build().unwrap()
}

fn newest_first(drops: &[Drop]) -> bool {
    drops.windows(2).all(|pair| pair[0].created_at >= pair[1].created_at)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Whatever backend is active, "all" and "trash" split what was added
    #[test]
    fn engine_lists_partition_and_order(drops in drops_strategy(25), remote in any::<bool>()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let temp = TempDir::new().unwrap();
        let engine = engine(&temp, remote);

        let (active, trash) = runtime.block_on(async {
            for drop in &drops {
                engine.add_drop(drop.clone()).await.unwrap();
            }
            (
                engine.list(CollectionFilter::All).await.unwrap(),
                engine.list(CollectionFilter::Trash).await.unwrap(),
            )
        });

        prop_assert!(ids(&active).is_disjoint(&ids(&trash)));
        prop_assert_eq!(active.len() + trash.len(), drops.len());
        let listed: HashSet<DropId> = ids(&active).union(&ids(&trash)).cloned().collect();
        prop_assert_eq!(listed, ids(&drops));
        prop_assert!(active.iter().all(Drop::is_active));
        prop_assert!(trash.iter().all(Drop::is_trashed));
        prop_assert!(newest_first(&active));
        prop_assert!(newest_first(&trash));
    }
}
