//! Class Hierarchy Analysis
//!
//! Computes strongly connected components (SCCs) over subclass-of edges.
//! Wikidata carries subclass loops; traversals tolerate them, but they are
//! reported after the graph is closed so the data can be inspected.

use petgraph::algo::kosaraju_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{ClassKey, RelationGraph};

// =============================================================================
// Cycle Group
// =============================================================================

/// A strongly connected component (cycle group) in the class hierarchy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleGroup {
    /// Unique identifier for this group
    pub id: usize,
    /// All classes in this group, sorted
    pub members: Vec<ClassKey>,
    /// Whether this is a class declared as its own superclass
    pub is_self_referential: bool,
}

// =============================================================================
// Report
// =============================================================================

/// Complete cycle analysis result for a relation graph
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CycleReport {
    /// Only groups with >1 member or a self-loop
    pub groups: Vec<CycleGroup>,
    /// Class -> group id
    membership: HashMap<ClassKey, usize>,
}

impl CycleReport {
    pub fn is_acyclic(&self) -> bool {
        self.groups.is_empty()
    }

    /// Check if a class sits on a cycle
    pub fn is_cyclic(&self, class: &str) -> bool {
        self.membership.contains_key(class)
    }

    /// Get the cycle group for a class
    pub fn group_of(&self, class: &str) -> Option<&CycleGroup> {
        let id = *self.membership.get(class)?;
        self.groups.get(id)
    }

    /// Number of classes involved in any cycle
    pub fn cyclic_class_count(&self) -> usize {
        self.membership.len()
    }
}

// =============================================================================
// Analysis Functions
// =============================================================================

/// Compute the cycle report for a relation graph.
///
/// Edges run from class to ancestor. Ancestor keys without a node of their
/// own still get a vertex so that orphaned edges are analysed too.
pub fn find_cycles(graph: &RelationGraph) -> CycleReport {
    let mut digraph: DiGraph<&str, ()> = DiGraph::new();
    let mut indices: HashMap<&str, NodeIndex> = HashMap::new();

    for (class, node) in graph.iter() {
        let from = node_index(&mut digraph, &mut indices, class);
        for ancestor in &node.ancestors {
            let to = node_index(&mut digraph, &mut indices, ancestor);
            digraph.add_edge(from, to, ());
        }
    }

    let mut groups = Vec::new();
    for scc in kosaraju_scc(&digraph) {
        let is_self_referential = scc.len() == 1
            && digraph
                .edges_directed(scc[0], Direction::Outgoing)
                .any(|e| e.target() == scc[0]);
        if scc.len() == 1 && !is_self_referential {
            continue;
        }

        let mut members: Vec<ClassKey> = scc
            .iter()
            .filter_map(|idx| digraph.node_weight(*idx))
            .map(|key| key.to_string())
            .collect();
        members.sort();
        groups.push(CycleGroup {
            id: 0,
            members,
            is_self_referential,
        });
    }

    // stable ids regardless of SCC discovery order
    groups.sort_by(|a, b| a.members.cmp(&b.members));
    let mut membership = HashMap::new();
    for (id, group) in groups.iter_mut().enumerate() {
        group.id = id;
        for member in &group.members {
            membership.insert(member.clone(), id);
        }
    }

    CycleReport { groups, membership }
}

fn node_index<'g>(
    digraph: &mut DiGraph<&'g str, ()>,
    indices: &mut HashMap<&'g str, NodeIndex>,
    key: &'g str,
) -> NodeIndex {
    *indices.entry(key).or_insert_with(|| digraph.add_node(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acyclic_graph() {
        let mut graph = RelationGraph::new();
        graph.add_ancestor("B", "A");
        graph.add_ancestor("C", "B");

        let report = find_cycles(&graph);
        assert!(report.is_acyclic());
        assert!(!report.is_cyclic("B"));
    }

    #[test]
    fn test_multi_member_cycle() {
        let mut graph = RelationGraph::new();
        graph.add_ancestor("A", "B");
        graph.add_ancestor("B", "C");
        graph.add_ancestor("C", "A");
        graph.add_ancestor("C", "D");

        let report = find_cycles(&graph);
        assert_eq!(report.groups.len(), 1);
        let group = report.group_of("B").unwrap();
        assert_eq!(group.members, vec!["A", "B", "C"]);
        assert!(!group.is_self_referential);
        assert!(!report.is_cyclic("D"));
        assert_eq!(report.cyclic_class_count(), 3);
    }

    #[test]
    fn test_self_loop() {
        let mut graph = RelationGraph::new();
        graph.add_ancestor("Q1", "Q1");
        graph.add_ancestor("Q2", "Q3");

        let report = find_cycles(&graph);
        assert_eq!(report.groups.len(), 1);
        assert!(report.groups[0].is_self_referential);
        assert_eq!(report.groups[0].members, vec!["Q1"]);
    }

    #[test]
    fn test_group_ids_are_sorted() {
        let mut graph = RelationGraph::new();
        graph.add_ancestor("Y", "Z");
        graph.add_ancestor("Z", "Y");
        graph.add_ancestor("A", "B");
        graph.add_ancestor("B", "A");

        let report = find_cycles(&graph);
        assert_eq!(report.group_of("A").unwrap().id, 0);
        assert_eq!(report.group_of("Z").unwrap().id, 1);
    }
}
