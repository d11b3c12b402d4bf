//! Class Relation Graph
//!
//! Subclass-of hierarchy collected while scanning the dump. Every class keeps
//! an ordered-unique set of direct ancestors and direct successors.
//!
//! The hierarchy is NOT assumed to be acyclic (the source data contains
//! subclass loops), so every traversal terminates through a visited guard.
//! Path enumeration uses a path-local closed list: a class already on the
//! current path ends that branch, while the same class may still appear on a
//! different path.
//!
//! This module is shared between:
//! - the streaming pipeline (type substitution pass)
//! - the relations CLI (closures, subclass lists, expanded instances)

pub mod analysis;
pub mod classify;
pub mod instances;
pub mod loader;
pub mod typing;

// Re-export key types from submodules
pub use analysis::{find_cycles, CycleReport};
pub use classify::{Category, CategoryTable, Classifier};
pub use instances::InstanceIndex;
pub use loader::{
    load_graph_directory, load_graph_dump, load_instance_directory, load_instance_dump,
    save_graph_dump, save_instance_dump,
};
pub use typing::{TypeExpansion, TypeStats, TypeSubstitutor};

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Class identifier ("Q5")
pub type ClassKey = String;

/// Separator between classes in a root path ("Q35120->Q215627->Q5")
pub const PATH_DELIMITER: &str = "->";

/// Direct relations of one class
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassNode {
    /// Direct superclasses
    #[serde(default)]
    pub ancestors: IndexSet<ClassKey>,
    /// Direct subclasses
    #[serde(default)]
    pub successors: IndexSet<ClassKey>,
}

impl ClassNode {
    pub fn is_root(&self) -> bool {
        self.ancestors.is_empty()
    }
}

/// The class relation graph
///
/// Equality compares the edge sets, not insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationGraph {
    classes: IndexMap<ClassKey, ClassNode>,
}

impl RelationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // ========== Build ==========

    /// Get or create a class node
    pub fn add_class(&mut self, class: &str) -> &mut ClassNode {
        self.classes.entry(class.to_string()).or_default()
    }

    /// Record `ancestor` as a direct superclass of `class` (idempotent)
    pub fn add_ancestor(&mut self, class: &str, ancestor: &str) {
        self.add_class(ancestor);
        self.add_class(class).ancestors.insert(ancestor.to_string());
    }

    /// Record `successor` as a direct subclass of `class` (idempotent)
    pub fn add_successor(&mut self, class: &str, successor: &str) {
        self.add_class(successor);
        self.add_class(class).successors.insert(successor.to_string());
    }

    pub fn clear_ancestors(&mut self, class: &str) {
        if let Some(node) = self.classes.get_mut(class) {
            node.ancestors.clear();
        }
    }

    pub fn clear_successors(&mut self, class: &str) {
        if let Some(node) = self.classes.get_mut(class) {
            node.successors.clear();
        }
    }

    /// Remove a class node. Edges pointing at it from other nodes are left in
    /// place; traversals treat them as unresolved keys.
    pub fn remove_class(&mut self, class: &str) -> Option<ClassNode> {
        self.classes.shift_remove(class)
    }

    /// Add every missing inverse edge, so that each declared ancestor lists
    /// the class as a successor and vice versa.
    pub fn complete_relations(&mut self) {
        let mut missing_successors = Vec::new();
        let mut missing_ancestors = Vec::new();

        for (class, node) in &self.classes {
            for ancestor in &node.ancestors {
                let known = self
                    .classes
                    .get(ancestor)
                    .map(|n| n.successors.contains(class))
                    .unwrap_or(false);
                if !known {
                    missing_successors.push((ancestor.clone(), class.clone()));
                }
            }
            for successor in &node.successors {
                let known = self
                    .classes
                    .get(successor)
                    .map(|n| n.ancestors.contains(class))
                    .unwrap_or(false);
                if !known {
                    missing_ancestors.push((successor.clone(), class.clone()));
                }
            }
        }

        for (ancestor, class) in missing_successors {
            self.add_successor(&ancestor, &class);
        }
        for (successor, class) in missing_ancestors {
            self.add_ancestor(&successor, &class);
        }
    }

    /// Union another graph into this one. Shared classes get their edge sets
    /// unioned, classes only present in `other` are adopted as they are.
    pub fn merge(&mut self, other: RelationGraph) {
        for (class, node) in other.classes {
            match self.classes.get_mut(&class) {
                Some(existing) => {
                    existing.ancestors.extend(node.ancestors);
                    existing.successors.extend(node.successors);
                }
                None => {
                    self.classes.insert(class, node);
                }
            }
        }
    }

    // ========== Lookup ==========

    /// Number of known classes
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Number of direct subclass-of edges
    pub fn edge_count(&self) -> usize {
        self.classes.values().map(|n| n.ancestors.len()).sum()
    }

    pub fn contains(&self, class: &str) -> bool {
        self.classes.contains_key(class)
    }

    pub fn get(&self, class: &str) -> Option<&ClassNode> {
        self.classes.get(class)
    }

    /// Direct ancestors of a class (empty for unknown classes)
    pub fn ancestors_of(&self, class: &str) -> impl Iterator<Item = &ClassKey> {
        self.classes
            .get(class)
            .into_iter()
            .flat_map(|n| n.ancestors.iter())
    }

    /// Direct successors of a class (empty for unknown classes)
    pub fn successors_of(&self, class: &str) -> impl Iterator<Item = &ClassKey> {
        self.classes
            .get(class)
            .into_iter()
            .flat_map(|n| n.successors.iter())
    }

    /// All classes in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&ClassKey, &ClassNode)> {
        self.classes.iter()
    }

    // ========== Closures ==========

    /// Transitive closure over ancestor edges, breadth-first, without `class`
    /// itself. Unknown classes have no ancestors.
    pub fn all_ancestors(&self, class: &str) -> IndexSet<ClassKey> {
        self.closure(class, |node| &node.ancestors)
    }

    /// Transitive closure over successor edges, breadth-first, without `class`
    /// itself. Unknown classes have no successors.
    pub fn all_successors(&self, class: &str) -> IndexSet<ClassKey> {
        self.closure(class, |node| &node.successors)
    }

    fn closure<'a, F>(&'a self, class: &str, next: F) -> IndexSet<ClassKey>
    where
        F: Fn(&'a ClassNode) -> &'a IndexSet<ClassKey>,
    {
        let mut reached = IndexSet::new();
        let Some(start) = self.classes.get(class) else {
            return reached;
        };

        let mut queue: VecDeque<&str> = next(start).iter().map(String::as_str).collect();
        while let Some(key) = queue.pop_front() {
            if key == class || reached.contains(key) {
                continue;
            }
            reached.insert(key.to_string());
            // unresolved keys are kept but not expanded
            if let Some(node) = self.classes.get(key) {
                queue.extend(next(node).iter().map(String::as_str));
            }
        }

        reached
    }

    /// Each class followed by its ancestor closure, first-seen order, no
    /// duplicates
    pub fn transitive_types<I, S>(&self, classes: I) -> Vec<ClassKey>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut types: IndexSet<ClassKey> = IndexSet::new();
        for class in classes {
            let class = class.as_ref();
            types.insert(class.to_string());
            types.extend(self.all_ancestors(class));
        }
        types.into_iter().collect()
    }

    // ========== Paths ==========

    /// Every distinct root-to-class path for the given classes, joined with
    /// [`PATH_DELIMITER`], lexicographically sorted.
    pub fn paths_to_root<I, S>(&self, classes: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut paths = Vec::new();
        for class in classes {
            let mut closed = Vec::new();
            paths.extend(self.paths_to_class(class.as_ref(), &mut closed));
        }

        paths.sort();
        // Identical paths are adjacent after the sort. This relies on the
        // delimiter never reordering against class-key characters, which holds
        // for "->" and the Q-number keys.
        paths.dedup();
        paths
    }

    fn paths_to_class<'a>(&'a self, class: &'a str, closed: &mut Vec<&'a str>) -> Vec<String> {
        // unknown class or root class
        let node = match self.classes.get(class) {
            Some(node) if !node.is_root() => node,
            _ => return vec![class.to_string()],
        };
        // class is already on the current path
        if closed.contains(&class) {
            return vec![class.to_string()];
        }

        closed.push(class);
        let mut all_paths = Vec::new();
        for ancestor in &node.ancestors {
            for path in self.paths_to_class(ancestor, closed) {
                all_paths.push(format!("{}{}{}", path, PATH_DELIMITER, class));
            }
        }
        closed.pop();

        all_paths
    }

    /// The given classes and all their ancestors, most specific first.
    ///
    /// Each key carries the minimum number of ancestor hops from any input
    /// class (inputs are depth 0). Keys are ordered by that depth ascending,
    /// ties by key. `root` is dropped when `remove_root` is set.
    pub fn specificity_ordered_ancestors<I, S>(
        &self,
        classes: I,
        remove_root: bool,
        root: Option<&str>,
    ) -> Vec<ClassKey>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.ancestor_depths(classes)
            .into_iter()
            .filter(|(key, _)| !(remove_root && root == Some(key.as_str())))
            .map(|(key, _)| key)
            .collect()
    }

    /// Minimum ancestor depth per reachable key, sorted by (depth, key).
    ///
    /// A breadth-first walk reaches every key at its shortest hop count. A
    /// shortest chain never repeats a class, so this is the same minimum a
    /// path-local cycle guard would report.
    pub fn ancestor_depths<I, S>(&self, classes: I) -> Vec<(ClassKey, usize)>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut depths: HashMap<String, usize> = HashMap::new();
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();

        for class in classes {
            let class = class.as_ref().to_string();
            if !depths.contains_key(&class) {
                depths.insert(class.clone(), 0);
                queue.push_back((class, 0));
            }
        }

        while let Some((class, depth)) = queue.pop_front() {
            for ancestor in self.ancestors_of(&class) {
                if !depths.contains_key(ancestor) {
                    depths.insert(ancestor.clone(), depth + 1);
                    queue.push_back((ancestor.clone(), depth + 1));
                }
            }
        }

        let mut ordered: Vec<(ClassKey, usize)> = depths.into_iter().collect();
        ordered.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        ordered
    }

    // ========== Relation listings ==========

    /// `(class, ancestor)` for every class and every member of its closure
    pub fn superclass_closure_rows(&self) -> impl Iterator<Item = (&str, ClassKey)> + '_ {
        self.classes.keys().flat_map(move |class| {
            self.all_ancestors(class)
                .into_iter()
                .map(move |ancestor| (class.as_str(), ancestor))
        })
    }

    /// `(class, successor)` for every class and every member of its
    /// successor closure
    pub fn subclass_rows(&self) -> impl Iterator<Item = (&str, ClassKey)> + '_ {
        self.classes.keys().flat_map(move |class| {
            self.all_successors(class)
                .into_iter()
                .map(move |successor| (class.as_str(), successor))
        })
    }

    /// Direct `(class, ancestor)` edges
    pub fn relation_rows(&self) -> impl Iterator<Item = (&str, &str)> {
        self.classes.iter().flat_map(|(class, node)| {
            node.ancestors
                .iter()
                .map(move |ancestor| (class.as_str(), ancestor.as_str()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> RelationGraph {
        // A <- B <- C
        let mut graph = RelationGraph::new();
        graph.add_ancestor("B", "A");
        graph.add_ancestor("C", "B");
        graph
    }

    fn diamond() -> RelationGraph {
        let mut graph = RelationGraph::new();
        graph.add_ancestor("D", "B");
        graph.add_ancestor("D", "C");
        graph.add_ancestor("D", "A");
        graph.add_ancestor("B", "A");
        graph.add_ancestor("C", "A");
        graph
    }

    #[test]
    fn test_add_edges_is_idempotent() {
        let mut graph = chain();
        graph.add_ancestor("C", "B");
        graph.add_ancestor("C", "B");
        assert_eq!(graph.edge_count(), 2);
        assert_eq!(graph.len(), 3);
        assert!(graph.get("A").unwrap().is_root());
    }

    #[test]
    fn test_all_ancestors_chain() {
        let graph = chain();
        let ancestors: Vec<_> = graph.all_ancestors("C").into_iter().collect();
        assert_eq!(ancestors, vec!["B", "A"]);
        assert!(graph.all_ancestors("A").is_empty());
    }

    #[test]
    fn test_all_ancestors_unknown_class() {
        let graph = chain();
        assert!(graph.all_ancestors("Q404").is_empty());
        assert!(graph.all_successors("Q404").is_empty());
    }

    #[test]
    fn test_all_ancestors_terminates_on_cycle() {
        let mut graph = RelationGraph::new();
        graph.add_ancestor("A", "B");
        graph.add_ancestor("B", "C");
        graph.add_ancestor("C", "A");
        graph.add_ancestor("C", "D");

        let ancestors = graph.all_ancestors("A");
        assert_eq!(ancestors.len(), 3);
        assert!(ancestors.contains("B"));
        assert!(ancestors.contains("C"));
        assert!(ancestors.contains("D"));
        assert!(!ancestors.contains("A"));
    }

    #[test]
    fn test_all_successors_after_complete_relations() {
        let mut graph = chain();
        assert!(graph.all_successors("A").is_empty());

        graph.complete_relations();
        let successors: Vec<_> = graph.all_successors("A").into_iter().collect();
        assert_eq!(successors, vec!["B", "C"]);
    }

    #[test]
    fn test_complete_relations_from_successor_feed() {
        let mut graph = RelationGraph::new();
        graph.add_successor("A", "B");
        graph.complete_relations();
        assert!(graph.get("B").unwrap().ancestors.contains("A"));

        let before = graph.clone();
        graph.complete_relations();
        assert_eq!(graph, before);
    }

    #[test]
    fn test_unresolved_keys_are_not_expanded() {
        let mut graph = chain();
        graph.remove_class("B");
        let ancestors: Vec<_> = graph.all_ancestors("C").into_iter().collect();
        assert_eq!(ancestors, vec!["B"]);
    }

    #[test]
    fn test_paths_to_root_chain() {
        let graph = chain();
        assert_eq!(graph.paths_to_root(["C"]), vec!["A->B->C"]);
        assert_eq!(graph.paths_to_root(["A"]), vec!["A"]);
        assert_eq!(graph.paths_to_root(["Q404"]), vec!["Q404"]);
    }

    #[test]
    fn test_paths_to_root_sorted_and_unique() {
        let graph = diamond();
        let paths = graph.paths_to_root(["D", "D", "B"]);
        assert_eq!(paths, vec!["A->B", "A->B->D", "A->C->D", "A->D"]);
    }

    #[test]
    fn test_paths_to_root_cycle_terminates() {
        let mut graph = RelationGraph::new();
        graph.add_ancestor("A", "B");
        graph.add_ancestor("B", "A");
        graph.add_ancestor("C", "A");

        assert_eq!(graph.paths_to_root(["C"]), vec!["A->B->A->C"]);
    }

    fn two_cycle_with_exit() -> RelationGraph {
        // Q1 <-> Q2, Q2 <- Q3
        let mut graph = RelationGraph::new();
        graph.add_ancestor("Q1", "Q2");
        graph.add_ancestor("Q2", "Q1");
        graph.add_ancestor("Q2", "Q3");
        graph
    }

    #[test]
    fn test_paths_to_root_on_two_cycle() {
        let graph = two_cycle_with_exit();
        assert_eq!(
            graph.paths_to_root(["Q1"]),
            vec!["Q1->Q2->Q1", "Q3->Q2->Q1"]
        );
    }

    #[test]
    fn test_paths_to_root_duplicate_inputs() {
        let graph = two_cycle_with_exit();
        assert_eq!(
            graph.paths_to_root(["Q1", "Q1"]),
            graph.paths_to_root(["Q1"])
        );
        assert_eq!(graph.paths_to_root(["Q1", "Q1"]).len(), 2);
    }

    #[test]
    fn test_paths_share_class_on_disjoint_branches() {
        // X reachable on two separate branches, each path keeps it
        let mut graph = RelationGraph::new();
        graph.add_ancestor("L", "X");
        graph.add_ancestor("R", "X");
        graph.add_ancestor("N", "L");
        graph.add_ancestor("N", "R");

        assert_eq!(graph.paths_to_root(["N"]), vec!["X->L->N", "X->R->N"]);
    }

    #[test]
    fn test_specificity_diamond_keeps_min_depth() {
        let graph = diamond();
        let depths = graph.ancestor_depths(["D"]);
        assert_eq!(
            depths,
            vec![
                ("D".to_string(), 0),
                ("A".to_string(), 1),
                ("B".to_string(), 1),
                ("C".to_string(), 1),
            ]
        );

        let ordered = graph.specificity_ordered_ancestors(["D"], false, None);
        assert_eq!(ordered.iter().filter(|k| *k == "A").count(), 1);
        assert_eq!(ordered, vec!["D", "A", "B", "C"]);
    }

    #[test]
    fn test_specificity_removes_root() {
        let graph = chain();
        assert_eq!(
            graph.specificity_ordered_ancestors(["C"], true, Some("A")),
            vec!["C", "B"]
        );
        assert_eq!(
            graph.specificity_ordered_ancestors(["C"], false, Some("A")),
            vec!["C", "B", "A"]
        );
    }

    #[test]
    fn test_specificity_multiple_inputs() {
        let graph = chain();
        // B is an input (depth 0) and an ancestor of C (depth 1)
        assert_eq!(
            graph.specificity_ordered_ancestors(["C", "B"], false, None),
            vec!["B", "C", "A"]
        );
    }

    #[test]
    fn test_transitive_types() {
        let graph = chain();
        assert_eq!(graph.transitive_types(["C", "B"]), vec!["C", "B", "A"]);
        assert_eq!(graph.transitive_types(["Q404"]), vec!["Q404"]);
    }

    #[test]
    fn test_merge_commutative_and_idempotent() {
        let mut g1 = RelationGraph::new();
        g1.add_ancestor("B", "A");
        g1.add_ancestor("C", "A");

        let mut g2 = RelationGraph::new();
        g2.add_ancestor("B", "X");
        g2.add_ancestor("D", "C");

        let mut left = g1.clone();
        left.merge(g2.clone());
        let mut right = g2.clone();
        right.merge(g1.clone());
        assert_eq!(left, right);

        let mut twice = g1.clone();
        twice.merge(g1.clone());
        assert_eq!(twice, g1);

        let b = left.get("B").unwrap();
        assert!(b.ancestors.contains("A") && b.ancestors.contains("X"));
    }

    #[test]
    fn test_relation_rows() {
        let graph = chain();
        let direct: Vec<_> = graph.relation_rows().collect();
        assert_eq!(direct, vec![("B", "A"), ("C", "B")]);

        let closure: Vec<_> = graph.superclass_closure_rows().collect();
        assert_eq!(
            closure,
            vec![
                ("B", "A".to_string()),
                ("C", "B".to_string()),
                ("C", "A".to_string()),
            ]
        );
    }
}
