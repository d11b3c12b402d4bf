//! Pass 1: dump scan
//!
//! Streams the dump once. Every entity yields an output row, its subclass-of
//! edges, its instance-of memberships and (when labelled) a dictionary entry.
//! Undecodable lines (bad JSON or bad UTF-8) and records without identity are
//! counted and skipped.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::BufRead;
use tracing::{debug, info};

use crate::error::Result;
use crate::extract::{Extracted, RecordExtractor};
use crate::graph::{InstanceIndex, RelationGraph};
use crate::record::{DumpReader, ScanLimit, TabularRecord};

/// Counters of one scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    /// Record lines read (framing lines excluded)
    pub lines: usize,
    /// Entities emitted
    pub processed: usize,
    /// Lines that failed to decode
    pub malformed: usize,
    /// Records without id (or label, when required)
    pub missing_identity: usize,
    /// Dictionary entries emitted
    pub labels: usize,
}

impl ScanStats {
    /// Malformed plus missing-identity records
    pub fn skipped(&self) -> usize {
        self.malformed + self.missing_identity
    }
}

/// Relations collected by a scan
#[derive(Debug, Default)]
pub struct ScanOutput {
    pub graph: RelationGraph,
    pub instances: InstanceIndex,
    pub stats: ScanStats,
}

pub struct Scanner<E> {
    extractor: E,
    limit: ScanLimit,
}

impl<E: RecordExtractor> Scanner<E> {
    pub fn new(extractor: E) -> Self {
        Self {
            extractor,
            limit: ScanLimit::All,
        }
    }

    pub fn with_limit(mut self, limit: ScanLimit) -> Self {
        self.limit = limit;
        self
    }

    /// Scan `input`, handing rows to `on_record` and `(id, label)` pairs to
    /// `on_label`. Sink errors abort the scan.
    pub fn scan<R, F, G>(&self, input: R, mut on_record: F, mut on_label: G) -> Result<ScanOutput>
    where
        R: BufRead,
        F: FnMut(TabularRecord) -> Result<()>,
        G: FnMut(&str, &str) -> Result<()>,
    {
        let mut output = ScanOutput::default();

        for line in DumpReader::new(input) {
            let line = line?;
            match self.limit {
                ScanLimit::Line(wanted) if line.number < wanted => continue,
                ScanLimit::Line(wanted) if line.number > wanted => break,
                _ => {}
            }
            output.stats.lines += 1;

            let value: Value = match serde_json::from_slice(&line.content) {
                Ok(value) => value,
                Err(e) => {
                    debug!(line = line.number, error = %e, "Skipping malformed record");
                    output.stats.malformed += 1;
                    continue;
                }
            };

            let entity = match self.extractor.extract(&value) {
                Extracted::Entity(entity) => entity,
                Extracted::MissingIdentity => {
                    debug!(line = line.number, "Skipping record without identity");
                    output.stats.missing_identity += 1;
                    continue;
                }
            };

            for ancestor in &entity.subclass_of {
                output.graph.add_ancestor(&entity.id, ancestor);
            }
            output.instances.add_instance(&entity.id, &entity.types);
            if !entity.label.is_empty() {
                on_label(&entity.id, &entity.label)?;
                output.stats.labels += 1;
            }
            on_record(entity.record)?;
            output.stats.processed += 1;

            if self.limit == ScanLimit::Line(line.number) {
                break;
            }
            if let ScanLimit::MaxRecords(max) = self.limit {
                if output.stats.processed >= max {
                    break;
                }
            }
        }

        info!(
            processed = output.stats.processed,
            malformed = output.stats.malformed,
            missing_identity = output.stats.missing_identity,
            classes = output.graph.len(),
            "Scan finished"
        );
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KbError;
    use crate::extract::WikidataExtractor;
    use std::io::Cursor;

    const DUMP: &str = r#"[
{"id":"Q5","labels":{"en":{"value":"human"}},"claims":{"P279":[{"mainsnak":{"datavalue":{"value":{"entity-type":"item","id":"Q215627"}}}}]}},
{"id":"Q42","labels":{"en":{"value":"Douglas Adams"}},"claims":{"P31":[{"mainsnak":{"datavalue":{"value":{"entity-type":"item","id":"Q5"}}}}]}},
{"id": broken},
{"labels":{"en":{"value":"no id"}}},
{"id":"Q7"}
]
"#;

    fn collect(limit: ScanLimit) -> (Vec<String>, Vec<(String, String)>, ScanOutput) {
        let scanner = Scanner::new(WikidataExtractor::new("en")).with_limit(limit);
        let mut records = Vec::new();
        let mut labels = Vec::new();
        let output = scanner
            .scan(
                Cursor::new(DUMP),
                |r| {
                    records.push(r.field(0).unwrap_or("").to_string());
                    Ok(())
                },
                |id, label| {
                    labels.push((id.to_string(), label.to_string()));
                    Ok(())
                },
            )
            .unwrap();
        (records, labels, output)
    }

    #[test]
    fn test_full_scan() {
        let (records, labels, output) = collect(ScanLimit::All);
        assert_eq!(records, vec!["Q5", "Q42", "Q7"]);
        assert_eq!(labels.len(), 2);
        assert_eq!(labels[1], ("Q42".to_string(), "Douglas Adams".to_string()));

        assert_eq!(output.stats.lines, 5);
        assert_eq!(output.stats.processed, 3);
        assert_eq!(output.stats.malformed, 1);
        assert_eq!(output.stats.missing_identity, 1);
        assert_eq!(output.stats.skipped(), 2);

        assert!(output.graph.get("Q5").unwrap().ancestors.contains("Q215627"));
        assert!(output.instances.instances_of("Q5").unwrap().contains("Q42"));
    }

    #[test]
    fn test_max_records() {
        let (records, _, output) = collect(ScanLimit::MaxRecords(2));
        assert_eq!(records, vec!["Q5", "Q42"]);
        assert_eq!(output.stats.malformed, 0);
    }

    #[test]
    fn test_single_line() {
        // line 1 is the opening bracket
        let (records, _, output) = collect(ScanLimit::Line(3));
        assert_eq!(records, vec!["Q42"]);
        assert_eq!(output.stats.lines, 1);
        assert!(output.graph.is_empty());
    }

    #[test]
    fn test_sink_error_aborts() {
        let scanner = Scanner::new(WikidataExtractor::new("en"));
        let result = scanner.scan(
            Cursor::new(DUMP),
            |_| Err(KbError::configuration("sink closed")),
            |_, _| Ok(()),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_utf8_counted_as_malformed() {
        let mut dump = b"[\n".to_vec();
        dump.extend_from_slice(b"{\"id\":\"Q1\",\"labels\":{\"en\":{\"value\":\"caf\xe9\"}}},\n");
        dump.extend_from_slice(b"{\"id\":\"Q2\"}\n]\n");

        let scanner = Scanner::new(WikidataExtractor::new("en"));
        let mut records = Vec::new();
        let output = scanner
            .scan(
                Cursor::new(dump),
                |r| {
                    records.push(r.field(0).unwrap_or("").to_string());
                    Ok(())
                },
                |_, _| Ok(()),
            )
            .unwrap();

        assert_eq!(records, vec!["Q2"]);
        assert_eq!(output.stats.lines, 2);
        assert_eq!(output.stats.malformed, 1);
        assert_eq!(output.stats.processed, 1);
    }
}
