//! Criterion benchmarks for the CFA analysis.
//!
//! Run with: cargo bench -p argus-expl

use argus_core::{PruneStrategy, SearchOrder};
use argus_expl::{check_cfa, Cfa, ExplConfig, Expr, Refinement, Stmt, Strategy};
use criterion::{criterion_group, criterion_main, Criterion};
use std::sync::Arc;

/// Counts `x` up to `n` in a loop, then asserts `x == n`. Safe.
fn counter(n: i64) -> Arc<Cfa> {
    let mut b = Cfa::builder();
    let x = b.int_var("x", 0, n);
    let init = b.loc("init");
    let head = b.loc("head");
    let exit = b.loc("exit");
    let err = b.loc("err");
    b.edge(init, head, vec![Stmt::Assign(x, Expr::int(0))]);
    b.edge(
        head,
        head,
        vec![
            Stmt::Assume(Expr::var(x).lt(Expr::int(n))),
            Stmt::Assign(x, Expr::var(x) + Expr::int(1)),
        ],
    );
    b.edge(head, exit, vec![Stmt::Assume(Expr::var(x).equals(Expr::int(n)))]);
    b.edge(exit, err, vec![Stmt::Assume(Expr::var(x).not_equals(Expr::int(n)))]);
    b.init_loc(init).error_loc(err);
    Arc::new(b.build().unwrap())
}

/// `k` independent flags, each set once; the error needs all of them set and
/// one of them clear at the same time. Safe.
fn flags(k: u32) -> Arc<Cfa> {
    let mut b = Cfa::builder();
    let vars: Vec<_> = (0..k).map(|i| b.bool_var(format!("f{i}"))).collect();
    let mut locs = vec![b.loc("l0")];
    for (i, v) in vars.iter().enumerate() {
        let next = b.loc(format!("l{}", i + 1));
        b.edge(locs[i], next, vec![Stmt::Assign(*v, Expr::Bool(false))]);
        b.edge(locs[i], next, vec![Stmt::Assign(*v, Expr::Bool(true))]);
        locs.push(next);
    }
    let err = b.loc("err");
    let all_set = vars
        .iter()
        .fold(Expr::Bool(true), |acc, v| acc.and(Expr::var(*v)));
    let some_clear = !Expr::var(vars[0]);
    b.edge(locs[k as usize], err, vec![Stmt::Assume(all_set.and(some_clear))]);
    b.init_loc(locs[0]).error_loc(err);
    Arc::new(b.build().unwrap())
}

fn bench_check(c: &mut Criterion, name: &str, cfa: Arc<Cfa>, config: ExplConfig) {
    c.bench_function(name, |b| {
        b.iter(|| {
            let result = check_cfa(cfa.clone(), &config).unwrap();
            assert!(result.is_safe());
        })
    });
}

fn benchmarks(c: &mut Criterion) {
    let default = ExplConfig::default();

    let dfs_full_prune = ExplConfig {
        prune: PruneStrategy::Full,
        abstractor: argus_core::AbstractorConfig {
            search: SearchOrder::Dfs,
            ..Default::default()
        },
        ..Default::default()
    };

    let multi_minimal = ExplConfig {
        refinement: Refinement::MultiTrace,
        strategy: Strategy::MinimalCore,
        ..Default::default()
    };

    bench_check(c, "counter_16", counter(16), default.clone());
    bench_check(c, "counter_64", counter(64), default.clone());
    bench_check(c, "counter_64_dfs_full", counter(64), dfs_full_prune);
    bench_check(c, "flags_6", flags(6), default.clone());
    bench_check(c, "flags_6_multi_minimal", flags(6), multi_minimal);
}

criterion_group!(benches, benchmarks);
criterion_main!(benches);
