//! Record extraction
//!
//! Maps one decoded dump record to an output row plus the relations the
//! scanner feeds into the class graph and the dictionary.

use serde_json::Value;

use crate::record::{join_values, sanitize_field, TabularRecord};

/// Column layout produced by [`WikidataExtractor`]
pub mod columns {
    pub const ID: usize = 0;
    pub const INSTANCE_OF: usize = 1;
    pub const LABEL: usize = 2;
    pub const DISAMBIGUATION: usize = 3;
    pub const ALIASES: usize = 4;
    pub const DESCRIPTION: usize = 5;
    pub const ROLES: usize = 6;
    pub const FICTIONAL: usize = 7;
    pub const WIKIPEDIA_URL: usize = 8;
    pub const WIKIDATA_URL: usize = 9;
    pub const DBPEDIA_URL: usize = 10;
    pub const IMAGES: usize = 11;
    pub const COUNT: usize = 12;
}

const INSTANCE_OF: &str = "P31";
const SUBCLASS_OF: &str = "P279";
const IMAGE: &str = "P18";

/// Everything the scanner needs from one entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityData {
    pub record: TabularRecord,
    pub id: String,
    /// Empty when the entity has no label in the configured language
    pub label: String,
    /// Pipe-joined instance-of classes
    pub types: String,
    /// Direct subclass-of targets
    pub subclass_of: Vec<String>,
}

/// Result of extracting one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extracted {
    Entity(EntityData),
    /// The record lacks a usable identifier (or a required label)
    MissingIdentity,
}

/// Converts decoded dump records into tabular rows
pub trait RecordExtractor {
    fn extract(&self, record: &Value) -> Extracted;
}

/// Default extractor for Wikidata entity JSON
#[derive(Debug, Clone)]
pub struct WikidataExtractor {
    language: String,
    require_label: bool,
}

impl WikidataExtractor {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            require_label: false,
        }
    }

    /// Treat records without a label as missing identity
    pub fn require_label(mut self, require: bool) -> Self {
        self.require_label = require;
        self
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    fn localized<'v>(&self, record: &'v Value, section: &str) -> Option<&'v str> {
        record
            .get(section)?
            .get(&self.language)?
            .get("value")?
            .as_str()
    }

    fn aliases(&self, record: &Value) -> Vec<String> {
        record
            .get("aliases")
            .and_then(|a| a.get(&self.language))
            .and_then(Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(|v| v.get("value").and_then(Value::as_str))
                    .map(sanitize_field)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn wikipedia_url(&self, record: &Value) -> String {
        let site = format!("{}wiki", self.language);
        record
            .get("sitelinks")
            .and_then(|s| s.get(&site))
            .and_then(|s| s.get("title"))
            .and_then(Value::as_str)
            .map(|title| {
                let title = title.split_whitespace().collect::<Vec<_>>().join("_");
                format!("https://{}.wikipedia.org/wiki/{}", self.language, title)
            })
            .unwrap_or_default()
    }
}

/// Item ids of every statement of `property`
fn item_claims(record: &Value, property: &str) -> Vec<String> {
    claims(record, property)
        .filter_map(|statement| {
            let value = statement.pointer("/mainsnak/datavalue/value")?;
            if value.get("entity-type")?.as_str()? != "item" {
                return None;
            }
            value.get("id")?.as_str().map(sanitize_field)
        })
        .collect()
}

/// Commons file names of every image statement
fn image_claims(record: &Value) -> Vec<String> {
    claims(record, IMAGE)
        .filter_map(|statement| {
            let snak = statement.get("mainsnak")?;
            if snak.get("datatype").and_then(Value::as_str) != Some("commonsMedia") {
                return None;
            }
            snak.pointer("/datavalue/value")?
                .as_str()
                .map(sanitize_field)
        })
        .collect()
}

fn claims<'v>(record: &'v Value, property: &str) -> impl Iterator<Item = &'v Value> {
    record
        .get("claims")
        .and_then(|c| c.get(property))
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

impl RecordExtractor for WikidataExtractor {
    fn extract(&self, record: &Value) -> Extracted {
        let id = match record.get("id").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => sanitize_field(id),
            _ => return Extracted::MissingIdentity,
        };
        let label = self
            .localized(record, "labels")
            .map(sanitize_field)
            .unwrap_or_default();
        if self.require_label && label.is_empty() {
            return Extracted::MissingIdentity;
        }

        let types = join_values(item_claims(record, INSTANCE_OF));
        let mut fields = vec![String::new(); columns::COUNT];
        fields[columns::ID] = id.clone();
        fields[columns::INSTANCE_OF] = types.clone();
        fields[columns::LABEL] = label.clone();
        fields[columns::ALIASES] = join_values(self.aliases(record));
        fields[columns::DESCRIPTION] = self
            .localized(record, "descriptions")
            .map(sanitize_field)
            .unwrap_or_default();
        fields[columns::WIKIPEDIA_URL] = self.wikipedia_url(record);
        fields[columns::WIKIDATA_URL] = format!("https://www.wikidata.org/wiki/{}", id);
        fields[columns::IMAGES] = join_values(image_claims(record));

        Extracted::Entity(EntityData {
            record: TabularRecord::new(fields),
            id,
            label,
            types,
            subclass_of: item_claims(record, SUBCLASS_OF),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(id: &str) -> Value {
        json!({"mainsnak": {"datavalue": {"value": {"entity-type": "item", "id": id}}}})
    }

    fn douglas_adams() -> Value {
        json!({
            "id": "Q42",
            "labels": {"en": {"value": "Douglas Adams"}, "cs": {"value": "Douglas Adams"}},
            "aliases": {"en": [{"value": "Douglas Noel Adams"}, {"value": "DNA"}]},
            "descriptions": {"en": {"value": "English writer\tand humorist"}},
            "sitelinks": {"enwiki": {"title": "Douglas Adams"}},
            "claims": {
                "P31": [item("Q5"), {"mainsnak": {"snaktype": "novalue"}}],
                "P18": [{"mainsnak": {
                    "datatype": "commonsMedia",
                    "datavalue": {"value": "Douglas adams portrait.jpg"}
                }}]
            }
        })
    }

    #[test]
    fn test_extract_wikidata_entity() {
        let Extracted::Entity(entity) = WikidataExtractor::new("en").extract(&douglas_adams())
        else {
            panic!("expected entity");
        };

        assert_eq!(entity.id, "Q42");
        assert_eq!(entity.label, "Douglas Adams");
        assert_eq!(entity.types, "Q5");
        assert!(entity.subclass_of.is_empty());

        let record = &entity.record;
        assert_eq!(record.len(), columns::COUNT);
        assert_eq!(record.field(columns::ALIASES), Some("Douglas Noel Adams|DNA"));
        assert_eq!(record.field(columns::DESCRIPTION), Some("English writer and humorist"));
        assert_eq!(
            record.field(columns::WIKIPEDIA_URL),
            Some("https://en.wikipedia.org/wiki/Douglas_Adams")
        );
        assert_eq!(
            record.field(columns::WIKIDATA_URL),
            Some("https://www.wikidata.org/wiki/Q42")
        );
        assert_eq!(record.field(columns::IMAGES), Some("Douglas adams portrait.jpg"));
        assert!(!record.to_tsv().contains('\n'));
    }

    #[test]
    fn test_extract_subclass_of() {
        let record = json!({
            "id": "Q515",
            "labels": {"en": {"value": "city"}},
            "claims": {"P279": [item("Q486972"), item("Q1549591")]}
        });
        let Extracted::Entity(entity) = WikidataExtractor::new("en").extract(&record) else {
            panic!("expected entity");
        };
        assert_eq!(entity.subclass_of, vec!["Q486972", "Q1549591"]);
        assert_eq!(entity.types, "");
    }

    #[test]
    fn test_claim_ids_keep_row_framing() {
        let record = json!({
            "id": "Q1",
            "claims": {"P31": [item("Q5\tQ6")], "P279": [item("Q7\nQ8")]}
        });
        let Extracted::Entity(entity) = WikidataExtractor::new("en").extract(&record) else {
            panic!("expected entity");
        };
        assert_eq!(entity.types, "Q5 Q6");
        assert_eq!(entity.subclass_of, vec!["Q7 Q8"]);
        assert_eq!(entity.record.len(), columns::COUNT);
        assert_eq!(entity.record.to_tsv().matches('\t').count(), columns::COUNT - 1);
    }

    #[test]
    fn test_missing_identity() {
        let extractor = WikidataExtractor::new("en");
        assert_eq!(extractor.extract(&json!({"labels": {}})), Extracted::MissingIdentity);
        assert_eq!(extractor.extract(&json!({"id": ""})), Extracted::MissingIdentity);

        let unlabeled = json!({"id": "Q1"});
        assert!(matches!(extractor.extract(&unlabeled), Extracted::Entity(_)));
        assert_eq!(
            extractor.clone().require_label(true).extract(&unlabeled),
            Extracted::MissingIdentity
        );
    }

    #[test]
    fn test_other_language() {
        let Extracted::Entity(entity) = WikidataExtractor::new("cs").extract(&douglas_adams())
        else {
            panic!("expected entity");
        };
        assert_eq!(entity.label, "Douglas Adams");
        assert_eq!(entity.record.field(columns::ALIASES), Some(""));
        assert_eq!(entity.record.field(columns::WIKIPEDIA_URL), Some(""));
    }
}
