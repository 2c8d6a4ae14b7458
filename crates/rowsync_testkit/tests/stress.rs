//! Concurrent writers against one table.

use rowsync_testkit::prelude::*;
use std::collections::BTreeSet;

fn run(engine: &TestEngine, config: &StressConfig) -> StressTestResult {
    let result = stress_concurrent_writers(engine, PEOPLE, config);
    result.print_summary("concurrent writers");
    result
}

#[test]
fn concurrent_writers_get_unique_increasing_etags() {
    let engine = TestEngine::memory().with_people();
    let config = StressConfig::new(6, 10);
    let result = run(&engine, &config);

    assert_eq!(result.failed, 0);
    assert_eq!(result.successful(), 60);

    let all: BTreeSet<_> = result.committed.iter().flatten().cloned().collect();
    assert_eq!(all.len(), 60);

    // each writer sees its own commits in sequence order
    let data = engine.data(PEOPLE, admin());
    let order = data.change_sets_since(None, None).unwrap().data_etags;
    for writer in &result.committed {
        let positions: Vec<_> = writer
            .iter()
            .map(|tag| order.iter().position(|t| t == tag).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }
}

#[test]
fn journal_backed_writers_converge() {
    let engine = TestEngine::file().with_people();
    let result = run(&engine, &StressConfig::new(3, 8));
    assert_eq!(result.failed, 0);

    let data = engine.data(PEOPLE, admin());
    let mut replica = Replica::new();
    replica.pull(&data, 5).unwrap();
    assert_eq!(replica.rows().len(), 24);
    assert!(same_revisions(replica.rows(), &live_rows(&data, 7).unwrap()));
}
