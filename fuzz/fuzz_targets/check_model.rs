#![no_main]
use argus_core::{AbstractorConfig, PruneStrategy, SearchOrder};
use argus_soundness::graph::Graph;
use argus_soundness::{check_acyclic, check_coverage, check_graph, check_witness, GraphConfig};
use libfuzzer_sys::fuzz_target;
use std::sync::Arc;

// Byte layout: [n, flags, init mask, target mask, (from, to)*]
fuzz_target!(|data: &[u8]| {
    let [n, flags, init, targets, rest @ ..] = data else {
        return;
    };
    let n = u32::from(n % 8) + 1;
    let bits = |mask: u8| (0..n).filter(move |s| mask & (1 << s) != 0);
    let edges = rest
        .chunks_exact(2)
        .take(24)
        .map(|e| (u32::from(e[0]) % n, u32::from(e[1]) % n));
    let graph = Arc::new(Graph::new(n, bits(*init), edges, bits(*targets)));

    let search = match flags % 3 {
        0 => SearchOrder::Bfs,
        1 => SearchOrder::Dfs,
        _ => SearchOrder::Priority,
    };
    let config = GraphConfig {
        abstractor: AbstractorConfig {
            search,
            parallel: flags & 0x10 != 0,
            validate_domain: true,
            ..Default::default()
        },
        prune: PruneStrategy::Full,
        multi_trace: flags & 0x20 != 0,
        ..Default::default()
    };
    let result = check_graph(&graph, &config).expect("full pruning never diverges");
    assert_eq!(result.is_safe(), graph.is_safe(), "{graph:?}");
    check_acyclic(result.arg()).unwrap();
    check_coverage(&graph, result.arg()).unwrap();
    if let argus_core::SafetyResult::Unsafe { witness, .. } = &result {
        check_witness(&graph, witness).unwrap();
    }
});
