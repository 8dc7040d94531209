//! Abstract reachability graph.
//!
//! Nodes live in an arena and are addressed by [`NodeId`]s that stay valid
//! (and are never reused) for the lifetime of the graph. Parent, child and
//! covering relations are plain id references; pruning tombstones arena
//! slots instead of deallocating subtrees.

use crate::trace::{ArgTrace, Trace};
use std::collections::{HashMap, HashSet};
use std::fmt::{self, Debug, Write as _};
use std::ops::Index;

/// Stable handle of a graph node.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

impl NodeId {
    #[inline]
    pub fn from_raw(raw: u32) -> Self {
        NodeId(raw)
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// One abstract state in the graph.
#[derive(Debug, Clone)]
pub struct ArgNode<S, A> {
    id: NodeId,
    state: S,
    /// Projection key, fixed at creation.
    key: u64,
    /// Parent and the action leading here (None for initial nodes).
    in_edge: Option<(NodeId, A)>,
    /// Successors in creation order.
    children: Vec<NodeId>,
    covered_by: Option<NodeId>,
    covered_nodes: Vec<NodeId>,
    expanded: bool,
    target: bool,
    can_cover: bool,
    depth: usize,
}

impl<S, A> ArgNode<S, A> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn key(&self) -> u64 {
        self.key
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.in_edge.as_ref().map(|(p, _)| *p)
    }

    /// Action on the incoming edge.
    pub fn in_action(&self) -> Option<&A> {
        self.in_edge.as_ref().map(|(_, a)| a)
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn covered_by(&self) -> Option<NodeId> {
        self.covered_by
    }

    /// Nodes this node covers.
    pub fn covered_nodes(&self) -> &[NodeId] {
        &self.covered_nodes
    }

    /// A covered node is subsumed by another node and never expanded.
    pub fn is_covered(&self) -> bool {
        self.covered_by.is_some()
    }

    pub fn is_expanded(&self) -> bool {
        self.expanded
    }

    pub fn is_target(&self) -> bool {
        self.target
    }

    /// False once the node lost its covering ability after a repeated counterexample.
    pub fn can_cover(&self) -> bool {
        self.can_cover
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_init(&self) -> bool {
        self.in_edge.is_none()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Awaiting expansion: not expanded, not covered, not a target.
    pub fn is_incomplete(&self) -> bool {
        !self.expanded && self.covered_by.is_none() && !self.target
    }
}

/// An edge of the graph, borrowed from its target node.
#[derive(Debug, Clone, Copy)]
pub struct ArgEdge<'a, A> {
    pub source: NodeId,
    pub action: &'a A,
    pub target: NodeId,
}

/// Size metrics of a graph.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ArgMetrics {
    /// Live nodes.
    pub size: usize,
    /// Maximum node depth.
    pub depth: usize,
    /// Live covered nodes.
    pub covered: usize,
    /// Live target nodes.
    pub targets: usize,
    /// Mean number of children over nodes that have children.
    pub mean_branching_factor: f64,
}

/// Abstract reachability graph.
#[derive(Debug, Clone)]
pub struct Arg<S, A> {
    /// Arena; `None` marks a pruned slot.
    nodes: Vec<Option<ArgNode<S, A>>>,
    init_nodes: Vec<NodeId>,
    /// Projection key -> live nodes with that key, in creation order.
    partitions: HashMap<u64, Vec<NodeId>>,
    live: usize,
    initialized: bool,
}

impl<S, A> Default for Arg<S, A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, A> Index<NodeId> for Arg<S, A> {
    type Output = ArgNode<S, A>;

    /// Panics if the node was pruned.
    fn index(&self, id: NodeId) -> &Self::Output {
        match self.nodes.get(id.index()).and_then(Option::as_ref) {
            Some(node) => node,
            None => panic!("node {id} is not in the graph"),
        }
    }
}

impl<S, A> Arg<S, A> {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            init_nodes: Vec::new(),
            partitions: HashMap::new(),
            live: 0,
            initialized: false,
        }
    }

    /// True once the initial states have been added and none was pruned since.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn set_initialized(&mut self, initialized: bool) {
        self.initialized = initialized;
    }

    /// Number of live nodes.
    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Number of nodes ever created, pruned ones included.
    pub fn created(&self) -> usize {
        self.nodes.len()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: NodeId) -> Option<&ArgNode<S, A>> {
        self.nodes.get(id.index()).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, id: NodeId) -> &mut ArgNode<S, A> {
        match self.nodes.get_mut(id.index()).and_then(Option::as_mut) {
            Some(node) => node,
            None => panic!("node {id} is not in the graph"),
        }
    }

    pub fn init_nodes(&self) -> &[NodeId] {
        &self.init_nodes
    }

    /// Live nodes in creation order.
    pub fn nodes(&self) -> impl Iterator<Item = &ArgNode<S, A>> {
        self.nodes.iter().filter_map(Option::as_ref)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes().map(|n| n.id)
    }

    fn push_node(
        &mut self,
        state: S,
        key: u64,
        in_edge: Option<(NodeId, A)>,
        target: bool,
        depth: usize,
    ) -> NodeId {
        let raw = u32::try_from(self.nodes.len()).unwrap_or_else(|_| panic!("node arena overflow"));
        let id = NodeId(raw);
        self.nodes.push(Some(ArgNode {
            id,
            state,
            key,
            in_edge,
            children: Vec::new(),
            covered_by: None,
            covered_nodes: Vec::new(),
            expanded: false,
            target,
            can_cover: true,
            depth,
        }));
        self.partitions.entry(key).or_default().push(id);
        self.live += 1;
        id
    }

    /// Add an initial node.
    ///
    /// # Panics
    ///
    /// Panics after 2^32 nodes have been created. Pruned ids are not
    /// reused.
    pub fn create_init_node(&mut self, state: S, key: u64, target: bool) -> NodeId {
        let id = self.push_node(state, key, None, target, 0);
        self.init_nodes.push(id);
        id
    }

    /// Add a child of `parent` reached along `action`.
    ///
    /// # Panics
    ///
    /// Panics if `parent` is not in the graph, or on arena overflow as in
    /// [`Arg::create_init_node`].
    pub fn create_succ_node(
        &mut self,
        parent: NodeId,
        action: A,
        state: S,
        key: u64,
        target: bool,
    ) -> NodeId {
        let depth = self[parent].depth + 1;
        let id = self.push_node(state, key, Some((parent, action)), target, depth);
        self.node_mut(parent).children.push(id);
        id
    }

    pub fn set_expanded(&mut self, id: NodeId, expanded: bool) {
        self.node_mut(id).expanded = expanded;
    }

    /// Let `coverer` cover `id`, replacing any previous coverer.
    pub fn cover(&mut self, id: NodeId, coverer: NodeId) {
        assert_ne!(id, coverer, "a node cannot cover itself");
        self.uncover(id);
        self.node_mut(id).covered_by = Some(coverer);
        self.node_mut(coverer).covered_nodes.push(id);
    }

    pub fn uncover(&mut self, id: NodeId) {
        if let Some(coverer) = self.node_mut(id).covered_by.take() {
            if let Some(Some(c)) = self.nodes.get_mut(coverer.index()) {
                c.covered_nodes.retain(|n| *n != id);
            }
        }
    }

    /// Release every node covered by `id`; they become incomplete again.
    pub fn clear_covered_nodes(&mut self, id: NodeId) {
        let covered = std::mem::take(&mut self.node_mut(id).covered_nodes);
        for n in covered {
            if let Some(Some(node)) = self.nodes.get_mut(n.index()) {
                node.covered_by = None;
            }
        }
    }

    /// Forbid `id` from covering nodes from now on.
    pub fn disable_covering(&mut self, id: NodeId) {
        self.node_mut(id).can_cover = false;
    }

    /// Live nodes sharing projection key `key`, in creation order.
    pub fn partition(&self, key: u64) -> &[NodeId] {
        self.partitions.get(&key).map_or(&[], Vec::as_slice)
    }

    /// First node (by creation order) in `id`'s partition that may cover it.
    ///
    /// A candidate must differ from `id`, be uncovered, keep its covering
    /// ability and satisfy `is_leq(id.state, candidate.state)`.
    pub fn find_coverer(
        &self,
        id: NodeId,
        mut is_leq: impl FnMut(&S, &S) -> bool,
    ) -> Option<NodeId> {
        let node = &self[id];
        self.partition(node.key).iter().copied().find(|&m| {
            m != id
                && self.get(m).is_some_and(|candidate| {
                    candidate.covered_by.is_none()
                        && candidate.can_cover
                        && is_leq(&node.state, &candidate.state)
                })
        })
    }

    pub fn in_edge(&self, id: NodeId) -> Option<ArgEdge<'_, A>> {
        self[id].in_edge.as_ref().map(|(source, action)| ArgEdge {
            source: *source,
            action,
            target: id,
        })
    }

    /// Outgoing edges in creation order.
    pub fn out_edges(&self, id: NodeId) -> impl Iterator<Item = ArgEdge<'_, A>> + '_ {
        self[id]
            .children
            .iter()
            .filter_map(move |&child| self.in_edge(child))
    }

    /// `id` and every node below it, in pre-order.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            out.push(n);
            stack.extend(self[n].children.iter().rev().copied());
        }
        out
    }

    /// Nodes awaiting expansion, in creation order.
    pub fn incomplete_nodes(&self) -> Vec<NodeId> {
        self.nodes()
            .filter(|n| n.is_incomplete())
            .map(|n| n.id)
            .collect()
    }

    pub fn target_nodes(&self) -> impl Iterator<Item = &ArgNode<S, A>> {
        self.nodes().filter(|n| n.target)
    }

    /// Uncovered target nodes, shortest first, ties broken by creation order.
    pub fn cexs(&self) -> Vec<NodeId> {
        let mut cexs: Vec<(usize, NodeId)> = self
            .target_nodes()
            .filter(|n| n.covered_by.is_none())
            .map(|n| (n.depth, n.id))
            .collect();
        cexs.sort_unstable();
        cexs.into_iter().map(|(_, id)| id).collect()
    }

    /// No uncovered target node is reachable.
    pub fn is_safe(&self) -> bool {
        self.target_nodes().all(|n| n.covered_by.is_some())
    }

    /// Every node is expanded, covered or a target.
    pub fn is_complete(&self) -> bool {
        self.nodes().all(|n| !n.is_incomplete())
    }

    /// Remove `id` and its subtree.
    ///
    /// Covering links into and out of the removed set are cleared, so nodes
    /// that were covered by a removed node become incomplete again. The
    /// parent is marked unexpanded; pruning an initial node marks the graph
    /// uninitialized.
    pub fn prune(&mut self, id: NodeId) {
        if !self.contains(id) {
            return;
        }
        let removed = self.descendants(id);
        let removed_set: HashSet<NodeId> = removed.iter().copied().collect();

        match self[id].parent() {
            Some(parent) => {
                let p = self.node_mut(parent);
                p.children.retain(|c| *c != id);
                p.expanded = false;
            }
            None => {
                self.init_nodes.retain(|n| *n != id);
                self.initialized = false;
            }
        }

        for &r in &removed {
            let (covered_by, covered_nodes) = {
                let node = self.node_mut(r);
                (node.covered_by.take(), std::mem::take(&mut node.covered_nodes))
            };
            if let Some(m) = covered_by.filter(|m| !removed_set.contains(m)) {
                self.node_mut(m).covered_nodes.retain(|n| *n != r);
            }
            for c in covered_nodes.into_iter().filter(|c| !removed_set.contains(c)) {
                self.node_mut(c).covered_by = None;
            }
        }

        for &r in &removed {
            self.nodes[r.index()] = None;
        }
        self.live -= removed.len();
        for ids in self.partitions.values_mut() {
            ids.retain(|n| !removed_set.contains(n));
        }
        self.partitions.retain(|_, ids| !ids.is_empty());
    }

    /// Remove every node. Ids are not reused afterwards.
    pub fn prune_all(&mut self) {
        for slot in &mut self.nodes {
            *slot = None;
        }
        self.init_nodes.clear();
        self.partitions.clear();
        self.live = 0;
        self.initialized = false;
    }

    pub fn metrics(&self) -> ArgMetrics {
        let mut metrics = ArgMetrics::default();
        let mut parents = 0usize;
        let mut children = 0usize;
        for n in self.nodes() {
            metrics.size += 1;
            metrics.depth = metrics.depth.max(n.depth);
            if n.covered_by.is_some() {
                metrics.covered += 1;
            }
            if n.target {
                metrics.targets += 1;
            }
            if !n.children.is_empty() {
                parents += 1;
                children += n.children.len();
            }
        }
        if parents > 0 {
            metrics.mean_branching_factor = children as f64 / parents as f64;
        }
        metrics
    }
}

impl<S: Clone, A: Clone> Arg<S, A> {
    /// Path from an initial node to `id`, following parent links.
    pub fn trace_to(&self, id: NodeId) -> ArgTrace<S, A> {
        let mut nodes = vec![id];
        let mut states = vec![self[id].state.clone()];
        let mut actions = Vec::new();
        let mut current = id;
        while let Some((parent, action)) = self[current].in_edge.as_ref() {
            nodes.push(*parent);
            states.push(self[*parent].state.clone());
            actions.push(action.clone());
            current = *parent;
        }
        nodes.reverse();
        states.reverse();
        actions.reverse();
        ArgTrace::new(nodes, Trace::new(states, actions))
    }
}

impl<S: Debug, A: Debug> Arg<S, A> {
    /// Graphviz rendering for debugging. Covering links are dashed.
    pub fn to_dot(&self) -> String {
        fn escape(s: String) -> String {
            s.replace('\\', "\\\\").replace('"', "\\\"")
        }
        let mut out = String::from("digraph arg {\n");
        for n in self.nodes() {
            let mut attrs = format!("label=\"{}: {}\"", n.id, escape(format!("{:?}", n.state)));
            if n.target {
                attrs.push_str(", peripheries=2");
            }
            if n.covered_by.is_some() {
                attrs.push_str(", style=dashed");
            }
            let _ = writeln!(out, "  {} [{}];", n.id, attrs);
        }
        for n in self.nodes() {
            for edge in self.out_edges(n.id) {
                let _ = writeln!(
                    out,
                    "  {} -> {} [label=\"{}\"];",
                    edge.source,
                    edge.target,
                    escape(format!("{:?}", edge.action))
                );
            }
            if let Some(coverer) = n.covered_by {
                let _ = writeln!(out, "  {} -> {} [style=dashed];", n.id, coverer);
            }
        }
        out.push_str("}\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// root -a-> n1 -b-> n2, root -c-> n3
    fn small_arg() -> (Arg<u32, char>, [NodeId; 4]) {
        let mut arg = Arg::new();
        let root = arg.create_init_node(0, 0, false);
        let n1 = arg.create_succ_node(root, 'a', 1, 0, false);
        let n2 = arg.create_succ_node(n1, 'b', 2, 0, true);
        let n3 = arg.create_succ_node(root, 'c', 3, 0, false);
        arg.set_expanded(root, true);
        arg.set_expanded(n1, true);
        arg.set_initialized(true);
        (arg, [root, n1, n2, n3])
    }

    #[test]
    fn test_trace_reconstruction() {
        let (arg, [root, n1, n2, _]) = small_arg();
        let trace = arg.trace_to(n2);
        assert_eq!(trace.nodes(), &[root, n1, n2]);
        assert_eq!(trace.trace().states(), &[0, 1, 2]);
        assert_eq!(trace.trace().actions(), &['a', 'b']);
        assert_eq!(trace.target(), n2);
    }

    #[test]
    fn test_cexs_sorted_by_depth_then_creation() {
        let (mut arg, [root, _, n2, _]) = small_arg();
        let shallow = arg.create_succ_node(root, 'd', 4, 0, true);
        assert_eq!(arg.cexs(), vec![shallow, n2]);
        assert!(!arg.is_safe());
    }

    #[test]
    fn test_coverage_links() {
        let (mut arg, [root, n1, _, n3]) = small_arg();
        arg.cover(n3, n1);
        assert_eq!(arg[n3].covered_by(), Some(n1));
        assert_eq!(arg[n1].covered_nodes(), &[n3]);
        arg.clear_covered_nodes(n1);
        assert!(!arg[n3].is_covered());
        assert!(arg[n1].covered_nodes().is_empty());
        assert_eq!(arg.incomplete_nodes(), vec![n3]);
        assert!(!arg[root].is_incomplete());
    }

    #[test]
    fn test_find_coverer_first_match_by_creation_order() {
        let (mut arg, [root, n1, _, n3]) = small_arg();
        let fresh = arg.create_succ_node(n3, 'x', 7, 0, false);
        // every node "covers" every other: the earliest candidate wins
        assert_eq!(arg.find_coverer(fresh, |_, _| true), Some(root));
        arg.disable_covering(root);
        assert_eq!(arg.find_coverer(fresh, |_, _| true), Some(n1));
        assert_eq!(arg.find_coverer(fresh, |a, b| a == b), None);
    }

    #[test]
    fn test_find_coverer_respects_partition() {
        let mut arg: Arg<u32, char> = Arg::new();
        let a = arg.create_init_node(1, 10, false);
        let b = arg.create_init_node(1, 20, false);
        assert_eq!(arg.find_coverer(b, |x, y| x == y), None);
        let c = arg.create_succ_node(a, 'z', 1, 10, false);
        assert_eq!(arg.find_coverer(c, |x, y| x == y), Some(a));
    }

    #[test]
    fn test_prune_subtree_clears_coverage_and_reopens_parent() {
        let (mut arg, [root, n1, n2, n3]) = small_arg();
        let covered = arg.create_succ_node(n3, 'e', 1, 0, false);
        arg.cover(covered, n1);
        arg.set_expanded(n3, true);

        arg.prune(n1);

        assert!(!arg.contains(n1));
        assert!(!arg.contains(n2));
        assert!(!arg[root].is_expanded());
        assert_eq!(arg[root].children(), &[n3]);
        assert!(!arg[covered].is_covered());
        assert_eq!(arg.len(), 3);
        assert!(arg.is_initialized());
        assert_eq!(arg.created(), 5);
        assert!(arg.partition(0).iter().all(|id| arg.contains(*id)));
    }

    #[test]
    fn test_prune_init_node_uninitializes() {
        let (mut arg, [root, ..]) = small_arg();
        arg.prune(root);
        assert!(arg.is_empty());
        assert!(arg.init_nodes().is_empty());
        assert!(!arg.is_initialized());
        let fresh = arg.create_init_node(9, 0, false);
        assert_eq!(fresh, NodeId::from_raw(4), "ids are never reused");
    }

    #[test]
    fn test_metrics() {
        let (mut arg, [_, _, _, n3]) = small_arg();
        let n4 = arg.create_succ_node(n3, 'f', 5, 0, false);
        arg.cover(n4, n3);
        let m = arg.metrics();
        assert_eq!(m.size, 5);
        assert_eq!(m.depth, 2);
        assert_eq!(m.covered, 1);
        assert_eq!(m.targets, 1);
        assert!((m.mean_branching_factor - 4.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_out_edges() {
        let (arg, [root, n1, _, n3]) = small_arg();
        let edges: Vec<_> = arg.out_edges(root).map(|e| (*e.action, e.target)).collect();
        assert_eq!(edges, vec![('a', n1), ('c', n3)]);
        assert_eq!(arg.in_edge(n1).map(|e| e.source), Some(root));
    }

    #[test]
    fn test_to_dot_mentions_every_node() {
        let (arg, _) = small_arg();
        let dot = arg.to_dot();
        assert!(dot.starts_with("digraph arg {"));
        for id in arg.node_ids() {
            assert!(dot.contains(&format!("{id} [")));
        }
        assert!(dot.contains("peripheries=2"));
    }
}
