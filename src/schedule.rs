//! Processing Order
//!
//! Computes a node order in which every source runs before the nodes it
//! feeds, and packages it with the per-node input feeds into a [`Schedule`]
//! the render pass can walk without touching the connection list.
//!
//! Feedback loops are not errors. The depth-first walk follows each node's
//! dependencies (the sources feeding it); reaching a node that is still being
//! resolved means the edge closes a cycle, and that one edge is dropped from
//! the ordering. At run time it still carries a value, just the one its source
//! produced on the previous block.

use crate::node::Node;
use slotmap::{new_key_type, SecondaryMap};

new_key_type! {
    /// Internal handle of a node; stale handles never alias a reused slot
    pub struct NodeKey;
}

/// One incoming value to pull before a node runs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Feed {
    pub source: NodeKey,
    pub source_port: usize,
    pub target_port: usize,
    pub amount: f32,
}

/// A node to run, with the feeds that fill its inputs
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub node: NodeKey,
    pub feeds: Vec<Feed>,
}

/// An edge as seen by the scheduler: `source` output feeds `target` input
#[derive(Debug, Clone, Copy)]
pub struct Edge {
    pub source: NodeKey,
    pub source_port: usize,
    pub target: NodeKey,
    pub target_port: usize,
    pub amount: f32,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

/// Order `nodes` so every dependency precedes its dependents.
///
/// Roots are taken in the order given. Returns the order and the number of
/// edges dropped to break cycles. Iterative, so chain length is bounded only
/// by memory.
pub fn sort(nodes: &[NodeKey], dependencies: &SecondaryMap<NodeKey, Vec<NodeKey>>) -> (Vec<NodeKey>, usize) {
    let mut order = Vec::with_capacity(nodes.len());
    let mut marks: SecondaryMap<NodeKey, Mark> = SecondaryMap::with_capacity(nodes.len());
    let mut stack: Vec<(NodeKey, usize)> = Vec::new();
    let mut broken = 0;

    for &root in nodes {
        if marks.contains_key(root) {
            continue;
        }
        marks.insert(root, Mark::InProgress);
        stack.push((root, 0));

        while let Some(&(node, next)) = stack.last() {
            let deps = dependencies.get(node).map_or(&[][..], Vec::as_slice);
            match deps.get(next) {
                Some(&dep) => {
                    if let Some(top) = stack.last_mut() {
                        top.1 += 1;
                    }
                    match marks.get(dep) {
                        Some(Mark::Done) => {}
                        Some(Mark::InProgress) => broken += 1,
                        None => {
                            marks.insert(dep, Mark::InProgress);
                            stack.push((dep, 0));
                        }
                    }
                }
                None => {
                    stack.pop();
                    marks.insert(node, Mark::Done);
                    order.push(node);
                }
            }
        }
    }

    (order, broken)
}

/// A precomputed execution plan
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    steps: Vec<Step>,
    feedback_edges: usize,
}

impl Schedule {
    /// Build the plan for `nodes` (in registration order) and `edges`
    pub fn build(nodes: &[NodeKey], edges: &[Edge]) -> Self {
        let mut dependencies: SecondaryMap<NodeKey, Vec<NodeKey>> =
            SecondaryMap::with_capacity(nodes.len());
        let mut feeds: SecondaryMap<NodeKey, Vec<Feed>> = SecondaryMap::with_capacity(nodes.len());
        for &node in nodes {
            dependencies.insert(node, Vec::new());
            feeds.insert(node, Vec::new());
        }

        for edge in edges {
            if !dependencies.contains_key(edge.source) {
                continue;
            }
            let Some(deps) = dependencies.get_mut(edge.target) else {
                continue;
            };
            deps.push(edge.source);
            if let Some(list) = feeds.get_mut(edge.target) {
                list.push(Feed {
                    source: edge.source,
                    source_port: edge.source_port,
                    target_port: edge.target_port,
                    amount: edge.amount,
                });
            }
        }

        let (order, feedback_edges) = sort(nodes, &dependencies);
        let steps = order
            .into_iter()
            .map(|node| Step {
                node,
                feeds: feeds.remove(node).unwrap_or_default(),
            })
            .collect();

        Self {
            steps,
            feedback_edges,
        }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn order(&self) -> impl Iterator<Item = NodeKey> + '_ {
        self.steps.iter().map(|s| s.node)
    }

    /// Edges dropped from the ordering to break feedback loops
    pub fn feedback_edges(&self) -> usize {
        self.feedback_edges
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run one block over `nodes`.
    ///
    /// Disabled nodes are skipped and hold their outputs. Steps whose node is
    /// absent are skipped. Does not allocate.
    pub fn run(
        &self,
        nodes: &mut SecondaryMap<NodeKey, Box<dyn Node>>,
        buffer: &mut [f32],
        frames: usize,
        sample_rate: u32,
    ) {
        for step in &self.steps {
            match nodes.get(step.node) {
                Some(node) if node.is_enabled() => {}
                _ => continue,
            }

            for feed in &step.feeds {
                let value = nodes
                    .get(feed.source)
                    .map_or(0.0, |source| source.get_output(feed.source_port))
                    * feed.amount;
                if let Some(node) = nodes.get_mut(step.node) {
                    node.set_input(feed.target_port, value);
                }
            }

            if let Some(node) = nodes.get_mut(step.node) {
                node.render(buffer, frames, sample_rate);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn keys(n: usize) -> (SlotMap<NodeKey, ()>, Vec<NodeKey>) {
        let mut map = SlotMap::with_key();
        let keys = (0..n).map(|_| map.insert(())).collect();
        (map, keys)
    }

    fn edge(source: NodeKey, target: NodeKey) -> Edge {
        Edge {
            source,
            source_port: 0,
            target,
            target_port: 0,
            amount: 1.0,
        }
    }

    fn position(order: &[NodeKey], key: NodeKey) -> usize {
        order.iter().position(|&k| k == key).unwrap()
    }

    #[test]
    fn test_chain_registered_backwards() {
        let (_map, k) = keys(3);
        // Registration order is C, B, A but wiring is A -> B -> C
        let nodes = [k[2], k[1], k[0]];
        let schedule = Schedule::build(&nodes, &[edge(k[0], k[1]), edge(k[1], k[2])]);
        let order: Vec<_> = schedule.order().collect();
        assert_eq!(order, vec![k[0], k[1], k[2]]);
        assert_eq!(schedule.feedback_edges(), 0);
    }

    #[test]
    fn test_diamond() {
        let (_map, k) = keys(4);
        let edges = [
            edge(k[0], k[1]),
            edge(k[0], k[2]),
            edge(k[1], k[3]),
            edge(k[2], k[3]),
        ];
        let schedule = Schedule::build(&[k[3], k[2], k[1], k[0]], &edges);
        let order: Vec<_> = schedule.order().collect();
        for e in &edges {
            assert!(position(&order, e.source) < position(&order, e.target));
        }
    }

    #[test]
    fn test_two_node_cycle_is_total() {
        let (_map, k) = keys(2);
        let schedule = Schedule::build(&k, &[edge(k[0], k[1]), edge(k[1], k[0])]);
        assert_eq!(schedule.len(), 2);
        assert_eq!(schedule.feedback_edges(), 1);
        // A is visited first; its feeder B is resolved before it
        let order: Vec<_> = schedule.order().collect();
        assert_eq!(order, vec![k[1], k[0]]);
    }

    #[test]
    fn test_self_loop() {
        let (_map, k) = keys(1);
        let schedule = Schedule::build(&k, &[edge(k[0], k[0])]);
        assert_eq!(schedule.len(), 1);
        assert_eq!(schedule.feedback_edges(), 1);
        assert_eq!(schedule.steps()[0].feeds.len(), 1);
    }

    #[test]
    fn test_cycle_with_tail_keeps_acyclic_constraints() {
        let (_map, k) = keys(4);
        // 0 -> 1 -> 2 -> 1 (loop), 2 -> 3
        let edges = [
            edge(k[0], k[1]),
            edge(k[1], k[2]),
            edge(k[2], k[1]),
            edge(k[2], k[3]),
        ];
        let schedule = Schedule::build(&k, &edges);
        let order: Vec<_> = schedule.order().collect();
        assert_eq!(order.len(), 4);
        assert!(position(&order, k[0]) < position(&order, k[1]));
        assert!(position(&order, k[2]) < position(&order, k[3]));
        assert_eq!(schedule.feedback_edges(), 1);
    }

    #[test]
    fn test_long_chain_does_not_overflow() {
        let (_map, k) = keys(100_000);
        let edges: Vec<_> = k.windows(2).map(|w| edge(w[0], w[1])).collect();
        let mut registration = k.clone();
        registration.reverse();
        let schedule = Schedule::build(&registration, &edges);
        let order: Vec<_> = schedule.order().collect();
        assert_eq!(order, k);
    }

    #[test]
    fn test_feeds_attached_to_target() {
        let (_map, k) = keys(2);
        let e = Edge {
            source: k[0],
            source_port: 2,
            target: k[1],
            target_port: 1,
            amount: 0.25,
        };
        let schedule = Schedule::build(&k, &[e]);
        let step = &schedule.steps()[1];
        assert_eq!(step.node, k[1]);
        assert_eq!(
            step.feeds,
            vec![Feed {
                source: k[0],
                source_port: 2,
                target_port: 1,
                amount: 0.25
            }]
        );
    }

    #[test]
    fn test_edges_to_unknown_nodes_ignored() {
        let (_map, k) = keys(3);
        let schedule = Schedule::build(&k[..2], &[edge(k[2], k[0]), edge(k[0], k[1])]);
        assert_eq!(schedule.len(), 2);
        assert_eq!(schedule.steps()[0].feeds.len(), 0);
    }
}
