//! Type field substitution
//!
//! Replaces the pipe-separated class keys of a record's type field with a
//! graph-derived list: root paths, the flattened ancestor set, or the
//! specificity-ordered ancestors.

use serde::{Deserialize, Serialize};

use super::{ClassKey, RelationGraph};
use crate::record::{join_values, TabularRecord};

/// How a type field is expanded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeExpansion {
    /// Every root-to-class path ("Q35120->Q215627->Q5")
    Paths,
    /// Each class followed by its ancestor closure
    Closure,
    /// Classes and ancestors, most specific first
    Specificity {
        remove_root: bool,
        root: Option<ClassKey>,
    },
}

impl TypeExpansion {
    pub fn expand(&self, graph: &RelationGraph, classes: &[&str]) -> Vec<String> {
        match self {
            TypeExpansion::Paths => graph.paths_to_root(classes),
            TypeExpansion::Closure => graph.transitive_types(classes),
            TypeExpansion::Specificity { remove_root, root } => {
                graph.specificity_ordered_ancestors(classes, *remove_root, root.as_deref())
            }
        }
    }
}

/// Counters of one type substitution pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeStats {
    pub records: usize,
    /// Records whose type field was rewritten
    pub rewritten: usize,
    /// Records with an empty (or absent) type field
    pub untyped: usize,
    /// Type classes absent from the graph (kept as they are)
    pub unknown_classes: usize,
}

/// Rewrites the type field of records against one graph
pub struct TypeSubstitutor<'g> {
    graph: &'g RelationGraph,
    expansion: TypeExpansion,
    type_field: usize,
    stats: TypeStats,
}

impl<'g> TypeSubstitutor<'g> {
    pub fn new(graph: &'g RelationGraph, expansion: TypeExpansion, type_field: usize) -> Self {
        Self {
            graph,
            expansion,
            type_field,
            stats: TypeStats::default(),
        }
    }

    pub fn substitute(&mut self, record: &mut TabularRecord) {
        self.stats.records += 1;

        let classes: Vec<&str> = record.values(self.type_field).collect();
        if classes.is_empty() {
            self.stats.untyped += 1;
            return;
        }
        self.stats.unknown_classes += classes
            .iter()
            .filter(|class| !self.graph.contains(class))
            .count();

        let expanded = join_values(self.expansion.expand(self.graph, &classes));
        record.set_field(self.type_field, expanded);
        self.stats.rewritten += 1;
    }

    pub fn stats(&self) -> &TypeStats {
        &self.stats
    }

    pub fn into_stats(self) -> TypeStats {
        self.stats
    }
}
