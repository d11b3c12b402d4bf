//! Identifier -> label dictionary
//!
//! Built during the scan, read-only during name substitution. Stored on disk
//! as two-column `id\tlabel` lines.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use tracing::debug;

use crate::error::Result;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dictionary {
    labels: HashMap<String, String>,
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a label
    pub fn insert(&mut self, id: impl Into<String>, label: impl Into<String>) {
        self.labels.insert(id.into(), label.into());
    }

    pub fn get(&self, id: &str) -> Option<&str> {
        self.labels.get(id).map(String::as_str)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.labels.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Read `id\tlabel` lines. Lines without a tab are skipped; a later line
    /// for the same id wins.
    pub fn read_tsv<R: BufRead>(reader: R) -> Result<Self> {
        let mut dictionary = Self::new();
        for line in reader.lines() {
            let line = line?;
            let line = line.strip_suffix('\r').unwrap_or(&line);
            match line.split_once('\t') {
                Some((id, label)) => dictionary.insert(id, label),
                None => debug!(line = %line, "Skipping dictionary line without label"),
            }
        }
        Ok(dictionary)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let dictionary = Self::read_tsv(BufReader::new(File::open(path)?))?;
        debug!(path = %path.display(), entries = dictionary.len(), "Loaded dictionary");
        Ok(dictionary)
    }

    /// Write one `id\tlabel` line
    pub fn write_entry<W: Write>(writer: &mut W, id: &str, label: &str) -> std::io::Result<()> {
        writeln!(writer, "{}\t{}", id, label)
    }

    /// Write every entry, sorted by id
    pub fn write_tsv<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        let mut entries: Vec<_> = self.labels.iter().collect();
        entries.sort();
        for (id, label) in entries {
            Self::write_entry(writer, id, label)?;
        }
        Ok(())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Dictionary {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut dictionary = Self::new();
        for (id, label) in iter {
            dictionary.insert(id, label);
        }
        dictionary
    }
}
