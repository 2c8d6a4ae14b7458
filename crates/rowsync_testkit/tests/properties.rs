//! Properties of the diff API under random client traffic.

use proptest::prelude::*;
use rowsync_testkit::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn fresh_replica_matches_live_rows(
        ops in row_operations_strategy(6, 40),
        fetch_limit in 1usize..8,
    ) {
        let engine = TestEngine::memory().with_people();
        let data = engine.data(PEOPLE, admin());
        for op in &ops {
            let _ = apply_operation(&data, op);
        }

        let mut replica = Replica::new();
        replica.pull(&data, fetch_limit).unwrap();
        let live = live_rows(&data, fetch_limit).unwrap();
        prop_assert!(same_revisions(replica.rows(), &live));
    }

    #[test]
    fn incremental_replica_converges(
        batches in prop::collection::vec(row_operations_strategy(5, 10), 1..6),
        fetch_limit in 1usize..5,
    ) {
        let engine = TestEngine::memory().with_people();
        let data = engine.data(PEOPLE, admin());

        let mut replica = Replica::new();
        for batch in &batches {
            for op in batch {
                let _ = apply_operation(&data, op);
            }
            replica.sync(&data, fetch_limit).unwrap();
            let live = live_rows(&data, 100).unwrap();
            prop_assert!(same_revisions(replica.rows(), &live));
        }
    }

    #[test]
    fn every_page_size_delivers_each_row_once(count in 0usize..30, fetch_limit in 1usize..10) {
        let engine = scenarios::populated(count);
        let data = engine.data(PEOPLE, admin());

        let mut seen = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = data.rows_since(None, cursor.as_deref(), Some(fetch_limit)).unwrap();
            prop_assert!(page.rows.len() <= fetch_limit);
            seen.extend(page.rows.into_iter().map(|r| r.row_id));
            if !page.has_more {
                break;
            }
            cursor = page.websafe_resume_cursor;
        }

        let mut unique = seen.clone();
        unique.sort();
        unique.dedup();
        prop_assert_eq!(unique.len(), seen.len());
        prop_assert_eq!(seen.len(), count);
    }

    #[test]
    fn stale_writes_never_change_rows(
        row_id in row_id_strategy(3),
        name in value_strategy().prop_filter("differs from the stale write", |n| n != "stale"),
    ) {
        let engine = TestEngine::memory().with_people();
        let data = engine.data(PEOPLE, admin());
        apply_operation(&data, &RowOperation::Upsert { row_id: row_id.clone(), name }).unwrap();
        let before = data.get_row(&row_id).unwrap();

        let stale_write = RowOperation::StaleWrite { row_id: row_id.clone() };
        prop_assert!(apply_operation(&data, &stale_write).is_err());
        let after = data.get_row(&row_id).unwrap();
        prop_assert_eq!(before.row_etag, after.row_etag);
        prop_assert_eq!(before.values, after.values);
    }

    #[test]
    fn filter_scopes_survive_storage(scope in filter_scope_strategy()) {
        let engine = TestEngine::memory().with_people();
        let data = engine.data(PEOPLE, admin());
        let row = rowsync_protocol::Row::new("r").with_filter_scope(scope.clone());
        let stored = data.insert_or_update_row(row).unwrap();
        prop_assert_eq!(stored.filter_scope, Some(scope));
    }
}
