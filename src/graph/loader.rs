//! Dump Loading
//!
//! Persists and restores the class relation graph and the instance index as
//! indented JSON objects with sorted keys, and merges the fragment
//! directories produced by partitioned scans.

use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, info};
use walkdir::WalkDir;

use super::{ClassNode, InstanceIndex, RelationGraph};
use crate::error::{KbError, Result};

// =============================================================================
// Writers / readers
// =============================================================================

/// Write the graph as `{class: {"ancestors": [...], "successors": [...]}}`
pub fn write_graph_dump<W: Write>(graph: &RelationGraph, writer: W) -> Result<()> {
    let sorted: BTreeMap<&str, &ClassNode> =
        graph.iter().map(|(class, node)| (class.as_str(), node)).collect();
    write_pretty(writer, &sorted)
}

/// Write the instance index as `{class: [instance, ...]}`
pub fn write_instance_dump<W: Write>(index: &InstanceIndex, writer: W) -> Result<()> {
    let sorted: BTreeMap<&str, _> = index
        .iter()
        .map(|(class, instances)| (class.as_str(), instances))
        .collect();
    write_pretty(writer, &sorted)
}

pub fn read_graph_dump<R: Read>(reader: R) -> Result<RelationGraph> {
    Ok(serde_json::from_reader(reader)?)
}

pub fn read_instance_dump<R: Read>(reader: R) -> Result<InstanceIndex> {
    Ok(serde_json::from_reader(reader)?)
}

fn write_pretty<W: Write, T: Serialize>(writer: W, value: &T) -> Result<()> {
    let mut serializer = Serializer::with_formatter(writer, PrettyFormatter::with_indent(b"    "));
    value.serialize(&mut serializer)?;
    serializer.into_inner().write_all(b"\n")?;
    Ok(())
}

// =============================================================================
// Files
// =============================================================================

/// Save the graph dump. The dump is written to a temporary file next to
/// `path` and renamed into place, so a failed write never leaves a truncated
/// dump behind.
pub fn save_graph_dump(graph: &RelationGraph, path: &Path) -> Result<()> {
    persist_with(path, |writer| write_graph_dump(graph, writer))?;
    info!(path = %path.display(), classes = graph.len(), "Saved class relations dump");
    Ok(())
}

/// Save the instance dump (same temp-then-rename discipline as the graph)
pub fn save_instance_dump(index: &InstanceIndex, path: &Path) -> Result<()> {
    persist_with(path, |writer| write_instance_dump(index, writer))?;
    info!(path = %path.display(), classes = index.len(), "Saved instance relations dump");
    Ok(())
}

fn persist_with<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<&File>) -> Result<()>,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let temp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(temp.as_file());
        write(&mut writer)?;
        writer.flush()?;
    }
    temp.persist(path)?;
    Ok(())
}

pub fn load_graph_dump(path: &Path) -> Result<RelationGraph> {
    let file = File::open(path)?;
    let graph = read_graph_dump(BufReader::new(file)).map_err(|e| fragment_error(path, e))?;
    debug!(path = %path.display(), classes = graph.len(), "Loaded class relations dump");
    Ok(graph)
}

pub fn load_instance_dump(path: &Path) -> Result<InstanceIndex> {
    let file = File::open(path)?;
    let index = read_instance_dump(BufReader::new(file)).map_err(|e| fragment_error(path, e))?;
    debug!(path = %path.display(), classes = index.len(), "Loaded instance relations dump");
    Ok(index)
}

fn fragment_error(path: &Path, err: KbError) -> KbError {
    match err {
        KbError::Json(e) => KbError::InvalidFragment {
            path: path.display().to_string(),
            reason: e.to_string(),
        },
        other => other,
    }
}

// =============================================================================
// Distributed fragments
// =============================================================================

/// Merge every graph fragment file directly inside `dir`
pub fn load_graph_directory(dir: &Path) -> Result<RelationGraph> {
    let mut graph = RelationGraph::new();
    let count = for_each_fragment(dir, |path| {
        graph.merge(load_graph_dump(path)?);
        Ok(())
    })?;
    info!(dir = %dir.display(), fragments = count, classes = graph.len(), "Merged class relation fragments");
    Ok(graph)
}

/// Merge every instance fragment file directly inside `dir`
pub fn load_instance_directory(dir: &Path) -> Result<InstanceIndex> {
    let mut index = InstanceIndex::new();
    let count = for_each_fragment(dir, |path| {
        index.merge(load_instance_dump(path)?);
        Ok(())
    })?;
    info!(dir = %dir.display(), fragments = count, classes = index.len(), "Merged instance relation fragments");
    Ok(index)
}

/// Visit regular files in `dir` (not recursive) in file-name order
fn for_each_fragment<F>(dir: &Path, mut visit: F) -> Result<usize>
where
    F: FnMut(&Path) -> Result<()>,
{
    let mut count = 0;
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        visit(entry.path())?;
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_graph() -> RelationGraph {
        let mut graph = RelationGraph::new();
        graph.add_ancestor("Q5", "Q215627");
        graph.add_ancestor("Q215627", "Q35120");
        graph.complete_relations();
        graph
    }

    #[test]
    fn test_graph_dump_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("classes.json");
        let graph = sample_graph();

        save_graph_dump(&graph, &path).unwrap();
        let loaded = load_graph_dump(&path).unwrap();
        assert_eq!(loaded, graph);
        assert_eq!(loaded.edge_count(), graph.edge_count());
    }

    #[test]
    fn test_graph_dump_is_sorted() {
        let mut graph = RelationGraph::new();
        graph.add_ancestor("Q9", "Q1");

        let mut out = Vec::new();
        write_graph_dump(&graph, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        let q1 = text.find("\"Q1\"").unwrap();
        let q9 = text.find("\"Q9\"").unwrap();
        assert!(q1 < q9);
        assert!(text.contains("    \"Q1\": {"));
        assert!(text.find("\"ancestors\"").unwrap() < text.find("\"successors\"").unwrap());
    }

    #[test]
    fn test_instance_dump_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("instances.json");
        let mut index = InstanceIndex::new();
        index.add_instance("Q42", "Q5");
        index.add_instance("Q1", "Q5|Q6");

        save_instance_dump(&index, &path).unwrap();
        assert_eq!(load_instance_dump(&path).unwrap(), index);
    }

    #[test]
    fn test_load_directory_merges_fragments() {
        let dir = TempDir::new().unwrap();

        let mut part1 = RelationGraph::new();
        part1.add_ancestor("B", "A");
        let mut part2 = RelationGraph::new();
        part2.add_ancestor("B", "X");
        part2.add_ancestor("C", "B");

        save_graph_dump(&part1, &dir.path().join("classes_1.json")).unwrap();
        save_graph_dump(&part2, &dir.path().join("classes_2.json")).unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let merged = load_graph_directory(dir.path()).unwrap();
        let mut expected = part1.clone();
        expected.merge(part2);
        assert_eq!(merged, expected);
    }

    #[test]
    fn test_invalid_fragment_names_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("broken.json"), "{ not json").unwrap();

        let err = load_graph_directory(dir.path()).unwrap_err();
        match err {
            KbError::InvalidFragment { path, .. } => assert!(path.ends_with("broken.json")),
            other => panic!("Expected InvalidFragment, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_directory_is_io_error() {
        let err = load_instance_directory(Path::new("/nonexistent/fragments")).unwrap_err();
        assert!(matches!(err, KbError::Io(_)));
    }

    #[test]
    fn test_read_instance_fragment() {
        let index = read_instance_dump(r#"{"Q5": ["Q1", "Q2"]}"#.as_bytes()).unwrap();
        assert_eq!(index.relation_count(), 2);
    }
}
