//! Instance Index
//!
//! Class key -> entities declared as `instance of` that class. An entity with
//! a multi-valued type field sits in several buckets.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use super::{ClassKey, RelationGraph};
use crate::record::MULTI_VALUE_SEPARATOR;

/// Instance relations, one ordered-unique bucket per class
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceIndex {
    buckets: IndexMap<ClassKey, IndexSet<String>>,
}

impl InstanceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `entity` to every class named in a pipe-separated type field
    pub fn add_instance(&mut self, entity: &str, class_field: &str) {
        for class in class_field
            .split(MULTI_VALUE_SEPARATOR)
            .filter(|c| !c.is_empty())
        {
            self.buckets
                .entry(class.to_string())
                .or_default()
                .insert(entity.to_string());
        }
    }

    /// Remove a class and all its instances
    pub fn remove_class(&mut self, class: &str) -> Option<IndexSet<String>> {
        self.buckets.shift_remove(class)
    }

    /// Remove one instance from one class bucket
    pub fn remove_instance(&mut self, entity: &str, class: &str) -> bool {
        self.buckets
            .get_mut(class)
            .map(|bucket| bucket.shift_remove(entity))
            .unwrap_or(false)
    }

    /// Union another index into this one
    pub fn merge(&mut self, other: InstanceIndex) {
        for (class, instances) in other.buckets {
            self.buckets.entry(class).or_default().extend(instances);
        }
    }

    /// Number of class buckets
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Number of (instance, class) pairs
    pub fn relation_count(&self) -> usize {
        self.buckets.values().map(IndexSet::len).sum()
    }

    pub fn classes(&self) -> impl Iterator<Item = &ClassKey> {
        self.buckets.keys()
    }

    pub fn instances_of(&self, class: &str) -> Option<&IndexSet<String>> {
        self.buckets.get(class)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ClassKey, &IndexSet<String>)> {
        self.buckets.iter()
    }

    /// Lazily pair every instance with each class resolved for its bucket.
    ///
    /// The bucket class resolves to its ancestor closure, or to its root
    /// paths when `use_paths` is set; the direct `(instance, class)` pair
    /// follows the resolved ones. The sequence is single-pass: call again to
    /// restart.
    pub fn expand<'a>(&'a self, graph: &'a RelationGraph, use_paths: bool) -> Expansion<'a> {
        Expansion {
            graph,
            use_paths,
            buckets: self.buckets.iter(),
            current: None,
        }
    }
}

/// Iterator returned by [`InstanceIndex::expand`]
pub struct Expansion<'a> {
    graph: &'a RelationGraph,
    use_paths: bool,
    buckets: indexmap::map::Iter<'a, ClassKey, IndexSet<String>>,
    current: Option<ExpandedBucket<'a>>,
}

struct ExpandedBucket<'a> {
    class: &'a str,
    resolved: Vec<String>,
    instances: indexmap::set::Iter<'a, String>,
    instance: Option<&'a str>,
    // index into `resolved`; `resolved.len()` is the direct class pair
    cursor: usize,
}

impl<'a> Expansion<'a> {
    fn resolve(&self, class: &str) -> Vec<String> {
        if self.use_paths {
            self.graph.paths_to_root([class])
        } else {
            self.graph.all_ancestors(class).into_iter().collect()
        }
    }
}

impl<'a> Iterator for Expansion<'a> {
    type Item = (&'a str, String);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(bucket) = self.current.as_mut() {
                if let Some(instance) = bucket.instance {
                    if bucket.cursor < bucket.resolved.len() {
                        let class = bucket.resolved[bucket.cursor].clone();
                        bucket.cursor += 1;
                        return Some((instance, class));
                    }
                    if bucket.cursor == bucket.resolved.len() {
                        bucket.cursor += 1;
                        return Some((instance, bucket.class.to_string()));
                    }
                }
                match bucket.instances.next() {
                    Some(instance) => {
                        bucket.instance = Some(instance.as_str());
                        bucket.cursor = 0;
                        continue;
                    }
                    None => self.current = None,
                }
            }

            let (class, instances) = self.buckets.next()?;
            let resolved = self.resolve(class);
            self.current = Some(ExpandedBucket {
                class: class.as_str(),
                resolved,
                instances: instances.iter(),
                instance: None,
                cursor: 0,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_instance_multi_valued() {
        let mut index = InstanceIndex::new();
        index.add_instance("Q1", "Q5|Q215627");
        index.add_instance("Q2", "Q5");
        index.add_instance("Q2", "Q5");
        index.add_instance("Q3", "");

        assert_eq!(index.len(), 2);
        assert_eq!(index.relation_count(), 3);
        let people: Vec<_> = index.instances_of("Q5").unwrap().iter().collect();
        assert_eq!(people, vec!["Q1", "Q2"]);
    }

    #[test]
    fn test_merge_dedups() {
        let mut left = InstanceIndex::new();
        left.add_instance("Q1", "Q5");
        let mut right = InstanceIndex::new();
        right.add_instance("Q1", "Q5");
        right.add_instance("Q2", "Q5");
        right.add_instance("Q3", "Q6");

        let mut other_way = right.clone();
        other_way.merge(left.clone());
        left.merge(right);

        assert_eq!(left, other_way);
        assert_eq!(left.relation_count(), 3);
    }

    #[test]
    fn test_remove() {
        let mut index = InstanceIndex::new();
        index.add_instance("Q1", "Q5|Q6");
        assert!(index.remove_instance("Q1", "Q5"));
        assert!(!index.remove_instance("Q1", "Q5"));
        assert!(index.remove_class("Q6").is_some());
        assert_eq!(index.relation_count(), 0);
    }

    #[test]
    fn test_expand_closure() {
        let mut graph = RelationGraph::new();
        graph.add_ancestor("C", "B");
        graph.add_ancestor("B", "A");

        let mut index = InstanceIndex::new();
        index.add_instance("e1", "C");
        index.add_instance("e2", "C");
        index.add_instance("e3", "Z");

        let pairs: Vec<_> = index.expand(&graph, false).collect();
        assert_eq!(
            pairs,
            vec![
                ("e1", "B".to_string()),
                ("e1", "A".to_string()),
                ("e1", "C".to_string()),
                ("e2", "B".to_string()),
                ("e2", "A".to_string()),
                ("e2", "C".to_string()),
                ("e3", "Z".to_string()),
            ]
        );
    }

    #[test]
    fn test_expand_paths() {
        let mut graph = RelationGraph::new();
        graph.add_ancestor("C", "B");

        let mut index = InstanceIndex::new();
        index.add_instance("e1", "C");

        let pairs: Vec<_> = index.expand(&graph, true).collect();
        assert_eq!(
            pairs,
            vec![("e1", "B->C".to_string()), ("e1", "C".to_string())]
        );
    }

    #[test]
    fn test_expand_on_cyclic_graph() {
        let mut graph = RelationGraph::new();
        graph.add_ancestor("Q1", "Q2");
        graph.add_ancestor("Q2", "Q1");
        graph.add_ancestor("Q2", "Q3");

        let mut index = InstanceIndex::new();
        index.add_instance("E1", "Q1");

        let closure: Vec<_> = index.expand(&graph, false).collect();
        assert_eq!(
            closure,
            vec![
                ("E1", "Q2".to_string()),
                ("E1", "Q3".to_string()),
                ("E1", "Q1".to_string()),
            ]
        );

        let paths: Vec<_> = index.expand(&graph, true).collect();
        assert_eq!(
            paths,
            vec![
                ("E1", "Q1->Q2->Q1".to_string()),
                ("E1", "Q3->Q2->Q1".to_string()),
                ("E1", "Q1".to_string()),
            ]
        );
    }
}
