//! Topological ordering of a flow graph.

use std::collections::{BTreeSet, HashMap};

use flowloom_core::error::{FlowError, Result};

use crate::graph::FlowGraph;

/// Compute the execution order of `graph` with Kahn's algorithm.
///
/// Among nodes that are ready at the same time, the one declared first in the
/// graph runs first, so the order is a pure function of the document. A cycle
/// yields [`FlowError::Cycle`] naming every node that could not be ordered.
pub fn execution_order(graph: &FlowGraph) -> Result<Vec<String>> {
    let index: HashMap<&str, usize> = graph
        .nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.as_str(), i))
        .collect();

    let mut in_degree = vec![0usize; graph.nodes.len()];
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); graph.nodes.len()];

    for edge in &graph.edges {
        let lookup = |id: &String| {
            index.get(id.as_str()).copied().ok_or_else(|| FlowError::DanglingEdge {
                edge: edge.label(),
                node: id.clone(),
            })
        };
        let from = lookup(&edge.source)?;
        let to = lookup(&edge.target)?;
        successors[from].push(to);
        in_degree[to] += 1;
    }

    // Ordered by declaration index
    let mut ready: BTreeSet<usize> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(i, _)| i)
        .collect();

    let mut order = Vec::with_capacity(graph.nodes.len());
    while let Some(i) = ready.pop_first() {
        order.push(graph.nodes[i].id.clone());
        for &next in &successors[i] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.insert(next);
            }
        }
    }

    if order.len() < graph.nodes.len() {
        let nodes = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d > 0)
            .map(|(i, _)| graph.nodes[i].id.clone())
            .collect();
        return Err(FlowError::Cycle { nodes });
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, Node};

    fn graph(ids: &[&str], edges: &[(&str, &str)]) -> FlowGraph {
        FlowGraph::new(
            ids.iter().map(|id| Node::new(*id, "passthrough")).collect(),
            edges.iter().map(|(s, t)| Edge::new(*s, *t)).collect(),
        )
    }

    #[test]
    fn test_linear_chain() {
        let g = graph(&["a", "b", "c"], &[("a", "b"), ("b", "c")]);
        assert_eq!(execution_order(&g).unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_declaration_order_breaks_ties() {
        // Declared out of dependency order: c and a are both roots.
        let g = graph(&["c", "b", "a", "d"], &[("a", "d"), ("c", "d"), ("b", "d")]);
        assert_eq!(execution_order(&g).unwrap(), vec!["c", "b", "a", "d"]);
    }

    #[test]
    fn test_late_ready_node_respects_index() {
        // x becomes ready after a, but y (declared earlier) is already waiting.
        let g = graph(&["a", "y", "x"], &[("a", "x")]);
        assert_eq!(execution_order(&g).unwrap(), vec!["a", "y", "x"]);
    }

    #[test]
    fn test_diamond_sources_before_targets() {
        let g = graph(
            &["d", "c", "b", "a"],
            &[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")],
        );
        let order = execution_order(&g).unwrap();
        let pos = |id: &str| order.iter().position(|n| n == id).unwrap();
        for edge in &g.edges {
            assert!(pos(&edge.source) < pos(&edge.target));
        }
        assert_eq!(order, vec!["a", "c", "b", "d"]);
    }

    #[test]
    fn test_self_loop_is_cycle() {
        let g = graph(&["a"], &[("a", "a")]);
        match execution_order(&g) {
            Err(FlowError::Cycle { nodes }) => assert_eq!(nodes, vec!["a"]),
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_cycle_lists_only_blocked_nodes() {
        let g = graph(&["s", "a", "b"], &[("s", "a"), ("a", "b"), ("b", "a")]);
        match execution_order(&g) {
            Err(FlowError::Cycle { nodes }) => assert_eq!(nodes, vec!["a", "b"]),
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_endpoint() {
        let g = graph(&["a"], &[("a", "zzz")]);
        assert!(matches!(execution_order(&g), Err(FlowError::DanglingEdge { .. })));
    }

    #[test]
    fn test_empty_graph() {
        assert!(execution_order(&FlowGraph::default()).unwrap().is_empty());
    }
}
