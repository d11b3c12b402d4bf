//! Tabular records and dump framing
//!
//! A [`TabularRecord`] is one tab-separated output line. The [`DumpReader`]
//! turns the outer JSON array of a dump (one record per physical line) into
//! numbered record lines.

use std::io::{BufRead, Write};

use crate::error::{KbError, Result};

/// Separator of multi-valued attributes inside one field
pub const MULTI_VALUE_SEPARATOR: char = '|';

/// Separator between fields
pub const FIELD_SEPARATOR: char = '\t';

// ========== Tabular Record ==========

/// Ordered sequence of text fields
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TabularRecord {
    fields: Vec<String>,
}

impl TabularRecord {
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }

    /// Parse one TSV line. A trailing `\n` / `\r\n` is ignored.
    pub fn from_tsv(line: &str) -> Self {
        let line = line.strip_suffix('\n').unwrap_or(line);
        let line = line.strip_suffix('\r').unwrap_or(line);
        Self {
            fields: line.split(FIELD_SEPARATOR).map(str::to_string).collect(),
        }
    }

    /// Fields joined by tabs, without line terminator
    pub fn to_tsv(&self) -> String {
        self.fields.join("\t")
    }

    /// Write the record as one `\n`-terminated line
    pub fn write_tsv<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(self.to_tsv().as_bytes())?;
        writer.write_all(b"\n")
    }

    pub fn field(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }

    pub fn field_mut(&mut self, index: usize) -> Option<&mut String> {
        self.fields.get_mut(index)
    }

    /// Replace a field; returns false when the record is too short
    pub fn set_field(&mut self, index: usize, value: String) -> bool {
        match self.fields.get_mut(index) {
            Some(field) => {
                *field = value;
                true
            }
            None => false,
        }
    }

    /// Values of a multi-valued field (empty parts dropped)
    pub fn values(&self, index: usize) -> impl Iterator<Item = &str> {
        self.field(index)
            .unwrap_or("")
            .split(MULTI_VALUE_SEPARATOR)
            .filter(|v| !v.is_empty())
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl From<Vec<String>> for TabularRecord {
    fn from(fields: Vec<String>) -> Self {
        Self::new(fields)
    }
}

/// Join values into one multi-valued field
pub fn join_values<I, S>(values: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut joined = String::new();
    for (i, value) in values.into_iter().enumerate() {
        if i > 0 {
            joined.push(MULTI_VALUE_SEPARATOR);
        }
        joined.push_str(value.as_ref());
    }
    joined
}

/// Replace characters that would break the TSV framing
pub fn sanitize_field(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            '\t' | '\n' | '\r' => ' ',
            other => other,
        })
        .collect()
}

// ========== Scan Limit ==========

/// Which part of the dump to scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanLimit {
    #[default]
    All,
    /// Stop after this many emitted records
    MaxRecords(usize),
    /// Only this physical line (1-based, the `[` line is line 1)
    Line(usize),
}

impl ScanLimit {
    /// Build from the two mutually exclusive selectors
    pub fn from_options(max_records: Option<usize>, line: Option<usize>) -> Result<Self> {
        match (max_records, line) {
            (Some(_), Some(_)) => Err(KbError::configuration(
                "a line selector and a maximum record count are mutually exclusive",
            )),
            (Some(0), None) => Err(KbError::configuration(
                "maximum record count must be positive",
            )),
            (None, Some(0)) => Err(KbError::configuration("line numbers start at 1")),
            (Some(n), None) => Ok(ScanLimit::MaxRecords(n)),
            (None, Some(n)) => Ok(ScanLimit::Line(n)),
            (None, None) => Ok(ScanLimit::All),
        }
    }
}

// ========== Dump Reader ==========

/// One record line of the dump
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpLine {
    /// Physical line number, 1-based
    pub number: usize,
    /// Record bytes without trailing comma or line terminator. Not
    /// necessarily valid UTF-8; decoding is left to the scanner.
    pub content: Vec<u8>,
}

/// Iterates record lines of an array-framed dump
pub struct DumpReader<R> {
    reader: R,
    line_number: usize,
    buffer: Vec<u8>,
}

impl<R: BufRead> DumpReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line_number: 0,
            buffer: Vec::new(),
        }
    }

    /// Physical lines consumed so far
    pub fn line_number(&self) -> usize {
        self.line_number
    }

    fn frame(mut line: &[u8]) -> Option<&[u8]> {
        while let [rest @ .., b'\n' | b'\r'] = line {
            line = rest;
        }
        if line.is_empty() || line == b"[" || line == b"]" {
            return None;
        }
        Some(line.strip_suffix(b",").unwrap_or(line))
    }
}

impl<R: BufRead> Iterator for DumpReader<R> {
    type Item = Result<DumpLine>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buffer.clear();
            match self.reader.read_until(b'\n', &mut self.buffer) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(e.into())),
            }
            self.line_number += 1;

            if let Some(content) = Self::frame(&self.buffer) {
                return Some(Ok(DumpLine {
                    number: self.line_number,
                    content: content.to_vec(),
                }));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_tsv_line() {
        let record = TabularRecord::from_tsv("Q1\tQ5|Q6\tname\n");
        assert_eq!(record.len(), 3);
        assert_eq!(record.field(1), Some("Q5|Q6"));
        assert_eq!(record.values(1).collect::<Vec<_>>(), vec!["Q5", "Q6"]);
        assert_eq!(record.to_tsv(), "Q1\tQ5|Q6\tname");

        let mut out = Vec::new();
        record.write_tsv(&mut out).unwrap();
        assert_eq!(out, b"Q1\tQ5|Q6\tname\n");
    }

    #[test]
    fn test_empty_fields_survive() {
        let record = TabularRecord::from_tsv("Q1\t\t\r\n");
        assert_eq!(record.fields(), &["Q1", "", ""]);
        assert_eq!(record.values(1).count(), 0);
        assert_eq!(record.values(9).count(), 0);
    }

    #[test]
    fn test_set_field() {
        let mut record = TabularRecord::from_tsv("a\tb");
        assert!(record.set_field(1, "c".to_string()));
        assert!(!record.set_field(5, "x".to_string()));
        assert_eq!(record.to_tsv(), "a\tc");
    }

    #[test]
    fn test_join_and_sanitize() {
        assert_eq!(join_values(["a", "b", "c"]), "a|b|c");
        assert_eq!(join_values(Vec::<String>::new()), "");
        assert_eq!(sanitize_field("two\tlines\nhere"), "two lines here");
    }

    #[test]
    fn test_scan_limit_options() {
        assert_eq!(ScanLimit::from_options(None, None).unwrap(), ScanLimit::All);
        assert_eq!(
            ScanLimit::from_options(Some(10), None).unwrap(),
            ScanLimit::MaxRecords(10)
        );
        assert_eq!(ScanLimit::from_options(None, Some(3)).unwrap(), ScanLimit::Line(3));

        let err = ScanLimit::from_options(Some(10), Some(3)).unwrap_err();
        assert!(err.is_configuration());
        assert!(ScanLimit::from_options(None, Some(0)).is_err());
    }

    #[test]
    fn test_dump_reader_framing() {
        let dump = "[\n{\"id\":\"Q1\"},\n\n{\"id\":\"Q2\"}\n]\n";
        let lines: Vec<DumpLine> = DumpReader::new(Cursor::new(dump))
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(
            lines,
            vec![
                DumpLine {
                    number: 2,
                    content: br#"{"id":"Q1"}"#.to_vec()
                },
                DumpLine {
                    number: 4,
                    content: br#"{"id":"Q2"}"#.to_vec()
                },
            ]
        );
    }

    #[test]
    fn test_dump_reader_crlf() {
        let dump = "[\r\n{\"id\":\"Q1\"},\r\n]\r\n";
        let lines: Vec<DumpLine> = DumpReader::new(Cursor::new(dump))
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].content, br#"{"id":"Q1"}"#);
    }

    #[test]
    fn test_dump_reader_keeps_invalid_utf8() {
        let dump: &[u8] = b"[\n{\"id\":\"Q\xff\"},\n{\"id\":\"Q2\"}\n]\n";
        let lines: Vec<DumpLine> = DumpReader::new(Cursor::new(dump))
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].content, b"{\"id\":\"Q\xff\"}");
        assert_eq!(lines[1].number, 3);
    }
}
