//! Properties of the paginated dedup engine.

mod common;

use acled_sync::engine::select_new_records;
use acled_sync::{DedupPolicy, PageRange, SyncEngine};
use common::{ID, ScriptedSource, event};
use fake::Fake;
use fake::faker::lorem::en::Word;
use proptest::prelude::*;
use std::collections::HashSet;

fn id_pool(size: usize) -> Vec<String> {
    (0..size)
        .map(|i| format!("{}{}", Word().fake::<String>().to_uppercase(), i))
        .collect()
}

fn build_source(pool: &[String], pages: &[Vec<usize>]) -> ScriptedSource {
    pages
        .iter()
        .enumerate()
        .fold(ScriptedSource::new(), |source, (i, page)| {
            let records = page.iter().map(|&idx| event(&pool[idx])).collect();
            source.page(i as u32 + 1, records)
        })
}

proptest! {
    #[test]
    fn prop_session_batch_is_unique_and_new(
        stored in proptest::collection::vec(0usize..40, 0..20),
        pages in proptest::collection::vec(proptest::collection::vec(0usize..40, 1..15), 0..6),
    ) {
        let pool = id_pool(40);
        let existing: HashSet<String> = stored.iter().map(|&i| pool[i].clone()).collect();
        let source = build_source(&pool, &pages);

        let outcome = tokio_test::block_on(
            SyncEngine::new(&source, 15, ID).collect(&existing, PageRange::starting_at(1)),
        )
        .unwrap();

        let ids = outcome.batch.ids(ID);
        let unique: HashSet<&String> = ids.iter().collect();
        prop_assert_eq!(unique.len(), ids.len());
        prop_assert!(ids.iter().all(|id| !existing.contains(id)));

        let expected: HashSet<String> = pages
            .iter()
            .flatten()
            .map(|&i| pool[i].clone())
            .filter(|id| !existing.contains(id))
            .collect();
        prop_assert_eq!(unique.len(), expected.len());
        prop_assert_eq!(outcome.pages_fetched as usize, pages.len() + 1);
    }

    #[test]
    fn prop_page_policy_is_superset_of_session(
        stored in proptest::collection::vec(0usize..30, 0..15),
        pages in proptest::collection::vec(proptest::collection::vec(0usize..30, 1..10), 1..5),
    ) {
        let pool = id_pool(30);
        let existing: HashSet<String> = stored.iter().map(|&i| pool[i].clone()).collect();
        let source = build_source(&pool, &pages);

        let session = tokio_test::block_on(
            SyncEngine::new(&source, 10, ID).collect(&existing, PageRange::default()),
        )
        .unwrap();
        let page = tokio_test::block_on(
            SyncEngine::new(&source, 10, ID)
                .with_policy(DedupPolicy::Page)
                .collect(&existing, PageRange::default()),
        )
        .unwrap();

        let session_ids: HashSet<String> = session.batch.ids(ID).into_iter().collect();
        let page_ids: HashSet<String> = page.batch.ids(ID).into_iter().collect();
        prop_assert_eq!(session_ids, page_ids);
        prop_assert!(page.batch.len() >= session.batch.len());
    }

    #[test]
    fn prop_select_new_never_returns_stored(
        stored in proptest::collection::vec(0usize..20, 0..20),
        page in proptest::collection::vec(0usize..20, 0..30),
    ) {
        let pool = id_pool(20);
        let baseline: HashSet<String> = stored.iter().map(|&i| pool[i].clone()).collect();
        let records = page.iter().map(|&i| event(&pool[i])).collect();

        let new = select_new_records(records, &baseline, ID);

        prop_assert!(new.iter().all(|r| !baseline.contains(&r.id(ID).unwrap())));
    }
}
