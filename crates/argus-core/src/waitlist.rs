//! Exploration order over graph nodes awaiting expansion.

use crate::arg::NodeId;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};

/// Order in which the abstractor pops nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchOrder {
    /// First in, first out: breadth-first.
    #[default]
    Bfs,
    /// Last in, first out: depth-first.
    Dfs,
    /// Lowest projection key first, ties broken by insertion order.
    Priority,
}

/// Nodes waiting for expansion.
#[derive(Debug, Clone)]
pub struct Waitlist {
    order: SearchOrder,
    queue: VecDeque<NodeId>,
    /// Min-heap on (key, insertion sequence).
    heap: BinaryHeap<Reverse<(u64, u64, NodeId)>>,
    seq: u64,
}

impl Waitlist {
    pub fn new(order: SearchOrder) -> Self {
        Self {
            order,
            queue: VecDeque::new(),
            heap: BinaryHeap::new(),
            seq: 0,
        }
    }

    /// Add a node. `key` is only consulted by [`SearchOrder::Priority`].
    pub fn push(&mut self, node: NodeId, key: u64) {
        match self.order {
            SearchOrder::Bfs | SearchOrder::Dfs => self.queue.push_back(node),
            SearchOrder::Priority => {
                self.heap.push(Reverse((key, self.seq, node)));
                self.seq += 1;
            }
        }
    }

    pub fn pop(&mut self) -> Option<NodeId> {
        match self.order {
            SearchOrder::Bfs => self.queue.pop_front(),
            SearchOrder::Dfs => self.queue.pop_back(),
            SearchOrder::Priority => self.heap.pop().map(|Reverse((_, _, node))| node),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len() + self.heap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: u32) -> Vec<NodeId> {
        (0..n).map(NodeId::from_raw).collect()
    }

    #[test]
    fn test_bfs_is_fifo() {
        let mut w = Waitlist::new(SearchOrder::Bfs);
        for id in ids(3) {
            w.push(id, 0);
        }
        assert_eq!(w.pop(), Some(NodeId::from_raw(0)));
        assert_eq!(w.pop(), Some(NodeId::from_raw(1)));
        assert_eq!(w.len(), 1);
    }

    #[test]
    fn test_dfs_is_lifo() {
        let mut w = Waitlist::new(SearchOrder::Dfs);
        for id in ids(3) {
            w.push(id, 0);
        }
        assert_eq!(w.pop(), Some(NodeId::from_raw(2)));
        assert_eq!(w.pop(), Some(NodeId::from_raw(1)));
    }

    #[test]
    fn test_priority_orders_by_key_then_insertion() {
        let mut w = Waitlist::new(SearchOrder::Priority);
        let n = ids(4);
        w.push(n[0], 5);
        w.push(n[1], 1);
        w.push(n[2], 5);
        w.push(n[3], 1);
        let popped: Vec<_> = std::iter::from_fn(|| w.pop()).collect();
        assert_eq!(popped, vec![n[1], n[3], n[0], n[2]]);
        assert!(w.is_empty());
    }
}
