//! Identifier substitution
//!
//! Rewrites embedded identifiers ("Q42") in record fields to their labels.
//! Identifiers found in one field are replaced longest first, and only as
//! whole tokens, so `Q1` never rewrites the prefix of `Q12`.

use indexmap::IndexSet;
use regex::Regex;
use std::collections::BTreeSet;

use crate::dictionary::Dictionary;
use crate::error::{KbError, Result};
use crate::record::TabularRecord;

/// Default lexical shape of an entity identifier
pub const DEFAULT_IDENTIFIER_PATTERN: &str = r"Q\d+";

#[derive(Debug, Clone)]
pub struct IdentifierSubstitutor {
    pattern: Regex,
    excluded: BTreeSet<usize>,
    show_missing: bool,
    remove_missing: bool,
}

impl IdentifierSubstitutor {
    pub fn new(pattern: &str) -> Result<Self> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            excluded: BTreeSet::new(),
            show_missing: false,
            remove_missing: false,
        })
    }

    /// Field positions that are never rewritten
    pub fn with_excluded<I: IntoIterator<Item = usize>>(mut self, fields: I) -> Self {
        self.excluded = fields.into_iter().collect();
        self
    }

    /// Track identifiers without a label
    pub fn show_missing(mut self, show: bool) -> Self {
        self.show_missing = show;
        self
    }

    /// Delete identifiers without a label instead of keeping them verbatim
    pub fn remove_missing(mut self, remove: bool) -> Self {
        self.remove_missing = remove;
        self
    }

    pub fn is_excluded(&self, field: usize) -> bool {
        self.excluded.contains(&field)
    }

    /// Lazily substitute every record of `records`.
    ///
    /// Errors from the input pass through untouched. Fails up front when no
    /// dictionary was supplied.
    pub fn substitute<'s, I>(
        &'s self,
        records: I,
        dictionary: Option<&'s Dictionary>,
    ) -> Result<Substitution<'s, I::IntoIter>>
    where
        I: IntoIterator<Item = Result<TabularRecord>>,
    {
        let dictionary = dictionary.ok_or_else(|| {
            KbError::configuration("name substitution requires a dictionary")
        })?;
        Ok(Substitution {
            substitutor: self,
            dictionary,
            records: records.into_iter(),
            missing: IndexSet::new(),
        })
    }

    /// Rewrite one record in place, adding unresolved ids to `missing`
    pub fn substitute_record(
        &self,
        record: &mut TabularRecord,
        dictionary: &Dictionary,
        missing: &mut IndexSet<String>,
    ) {
        for index in 0..record.len() {
            if self.is_excluded(index) {
                continue;
            }
            if let Some(field) = record.field_mut(index) {
                if let Some(rewritten) = self.substitute_field(field, dictionary, missing) {
                    *field = rewritten;
                }
            }
        }
    }

    /// `None` when the field contains no identifier
    fn substitute_field(
        &self,
        field: &str,
        dictionary: &Dictionary,
        missing: &mut IndexSet<String>,
    ) -> Option<String> {
        let mut ids: Vec<&str> = self.pattern.find_iter(field).map(|m| m.as_str()).collect();
        if ids.is_empty() {
            return None;
        }
        ids.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        ids.dedup();

        let mut value = field.to_string();
        for id in ids {
            match dictionary.get(id) {
                Some(label) => value = replace_token(&value, id, label),
                None => {
                    if self.show_missing {
                        missing.insert(id.to_string());
                    }
                    if self.remove_missing {
                        value = replace_token(&value, id, "");
                    }
                }
            }
        }
        Some(value)
    }
}

/// Replace occurrences of `id` that are not followed by another digit
fn replace_token(field: &str, id: &str, replacement: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut rest = field;
    while let Some(pos) = rest.find(id) {
        let end = pos + id.len();
        let continues = rest[end..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_digit());
        out.push_str(&rest[..pos]);
        out.push_str(if continues { id } else { replacement });
        rest = &rest[end..];
    }
    out.push_str(rest);
    out
}

/// Iterator returned by [`IdentifierSubstitutor::substitute`]
///
/// The missing-identifier report is complete once the iterator is drained.
pub struct Substitution<'s, I> {
    substitutor: &'s IdentifierSubstitutor,
    dictionary: &'s Dictionary,
    records: I,
    missing: IndexSet<String>,
}

impl<'s, I> Substitution<'s, I> {
    pub fn missing(&self) -> &IndexSet<String> {
        &self.missing
    }

    pub fn into_missing(self) -> IndexSet<String> {
        self.missing
    }
}

impl<'s, I> Iterator for Substitution<'s, I>
where
    I: Iterator<Item = Result<TabularRecord>>,
{
    type Item = Result<TabularRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut record = match self.records.next()? {
            Ok(record) => record,
            Err(e) => return Some(Err(e)),
        };
        self.substitutor
            .substitute_record(&mut record, self.dictionary, &mut self.missing);
        Some(Ok(record))
    }
}
