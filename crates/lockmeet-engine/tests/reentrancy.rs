mod common;

use lockmeet_engine::pipeline::{build_cluster_table, run_fixpoint};
use lockmeet_engine::query::Verdict;
use lockmeet_engine::relation::ClusterLayout;
use lockmeet_engine::store::{Contributor, ProtectedStore};
use lockmeet_ir::domain::Interval;

const NESTED: &str = r#"
program Nested {
    global g = 3;
    mutex A protects g;
    thread main {
        lock A;
        lock A;
        unlock A;
        assert g == 3;
        unlock A;
    }
}
"#;

#[test]
fn reacquiring_a_held_mutex_leaves_the_store_untouched() {
    let ast = lockmeet_dsl::parse(NESTED, "nested.lmt").unwrap();
    let program = lockmeet_ir::lowering::lower(&ast).unwrap();
    let opts = common::options(&[]);
    let table = build_cluster_table(&program, &opts).unwrap();
    let layout = ClusterLayout::new(&table, opts.relational_width);

    let fix = run_fixpoint::<Interval>(&program, &table, &opts).unwrap();
    assert!(fix.converged);
    assert_eq!(fix.rounds, 1);
    assert!(fix.outcomes[0].updates.is_empty());
    assert!(fix.store.contribution(0, Contributor::Thread(0)).is_none());
    assert_eq!(fix.store, ProtectedStore::seeded(&program, &table, &layout));
    assert_eq!(fix.outcomes[0].assertions[0].verdict, Verdict::Holds);
}

#[test]
fn unlocking_twice_is_a_protocol_violation() {
    let src = r#"
program Twice {
    global g;
    mutex A protects g;
    thread main {
        lock A;
        unlock A;
        unlock A;
        lock A;
        assert g == 0;
        unlock A;
    }
}
"#;
    let ast = lockmeet_dsl::parse(src, "twice.lmt").unwrap();
    let program = lockmeet_ir::lowering::lower(&ast).unwrap();
    let report = lockmeet_engine::pipeline::analyze(&program, &common::options(&[])).unwrap();
    assert_eq!(report.diagnostics.len(), 1);
    assert_eq!(report.verdict_of("g == 0"), Some(Verdict::Unknown));
}

#[test]
fn joining_a_foreign_thread_warns() {
    let src = r#"
program Joins {
    thread helper { }
    thread idle { }
    thread main {
        join helper;
    }
}
"#;
    let ast = lockmeet_dsl::parse(src, "joins.lmt").unwrap();
    let program = lockmeet_ir::lowering::lower(&ast).unwrap();
    let report = lockmeet_engine::pipeline::analyze(&program, &common::options(&[])).unwrap();
    assert!(!report.has_errors());
    let kinds: Vec<_> = report.diagnostics.iter().map(|d| d.kind).collect();
    use lockmeet_engine::result::DiagnosticKind::*;
    assert!(kinds.contains(&JoinUnspawned));
    assert!(kinds.contains(&NeverSpawned));
}
