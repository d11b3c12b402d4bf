//! Entity Classification
//!
//! Determines WHICH output category an entity belongs to, consuming:
//! - the entity's type classes (instance-of field)
//! - the class relation graph (specificity order)
//! - a category table (class key -> category tag)
//!
//! The most specific class with a category decides. A person or artist whose
//! ancestor list also holds the other kind becomes `PersonArtist`. Entities
//! matching nothing fall back to `General`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use super::{ClassKey, RelationGraph};
use crate::error::{KbError, Result};

// =============================================================================
// Category
// =============================================================================

/// Output category of an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Person,
    Group,
    Artist,
    #[serde(rename = "person+artist")]
    PersonArtist,
    Geographical,
    Event,
    Organization,
    General,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::Person,
        Category::Group,
        Category::Artist,
        Category::PersonArtist,
        Category::Geographical,
        Category::Event,
        Category::Organization,
        Category::General,
    ];

    /// Tag used in configuration and reports
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Person => "person",
            Category::Group => "group",
            Category::Artist => "artist",
            Category::PersonArtist => "person+artist",
            Category::Geographical => "geographical",
            Category::Event => "event",
            Category::Organization => "organization",
            Category::General => "general",
        }
    }

    /// Prefix prepended to the entity id in category outputs
    pub fn prefix(&self) -> &'static str {
        match self {
            Category::Person => "p:",
            Category::Group => "g:",
            Category::Artist | Category::PersonArtist => "a:",
            Category::Geographical => "l:",
            Category::Event => "e:",
            Category::Organization => "o:",
            Category::General => "x:",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = KbError;

    fn from_str(s: &str) -> Result<Self> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| KbError::configuration(format!("Unknown category: {}", s)))
    }
}

// =============================================================================
// Category Table
// =============================================================================

/// Seed classes shipped with the crate
const PERSON_CLASSES: &[&str] = &["Q5", "Q15632617", "Q3658341"];
const GROUP_CLASSES: &[&str] = &["Q16334295"];
const GEOGRAPHICAL_CLASSES: &[&str] = &[
    "Q15617994", "Q6256", "Q3336843", "Q112099", "Q7275", "Q1048835", "Q3624078", "Q185145",
    "Q619610", "Q859563", "Q4209223", "Q133442", "Q1520223", "Q35657", "Q107390", "Q185441",
    "Q160016", "Q15634554", "Q5119", "Q515", "Q1549591", "Q200250", "Q3957", "Q532",
    "Q14757767", "Q15284", "Q23442", "Q123705", "Q34038", "Q23397", "Q165", "Q1973404", "Q8514",
    "Q8502", "Q192287", "Q387917", "Q50231",
];

/// Class key -> category lookup
#[derive(Debug, Clone, Default)]
pub struct CategoryTable {
    classes: HashMap<ClassKey, Category>,
    artists: HashSet<ClassKey>,
}

impl CategoryTable {
    /// Empty table (everything classifies as `General`)
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in person, group and geographical seeds
    pub fn builtin() -> Self {
        let mut table = Self::new();
        for (category, classes) in [
            (Category::Person, PERSON_CLASSES),
            (Category::Group, GROUP_CLASSES),
            (Category::Geographical, GEOGRAPHICAL_CLASSES),
        ] {
            for class in classes {
                table.insert(category, class);
            }
        }
        table
    }

    /// Build a table from `[categories]` configuration (tag -> class keys)
    pub fn from_map(map: &BTreeMap<String, Vec<ClassKey>>) -> Result<Self> {
        let mut table = Self::new();
        // BTreeMap order is alphabetical; a class listed twice keeps the
        // category that comes first in `Category::ALL`
        let mut entries: Vec<(Category, &Vec<ClassKey>)> = map
            .iter()
            .map(|(tag, classes)| Ok((tag.parse::<Category>()?, classes)))
            .collect::<Result<_>>()?;
        entries.sort_by_key(|(category, _)| *category);

        for (category, classes) in entries {
            for class in classes {
                table.insert(category, class);
            }
        }
        Ok(table)
    }

    /// Default configuration map, the inverse of [`CategoryTable::from_map`]
    pub fn builtin_map() -> BTreeMap<String, Vec<ClassKey>> {
        let mut map = BTreeMap::new();
        for (category, classes) in [
            (Category::Person, PERSON_CLASSES),
            (Category::Group, GROUP_CLASSES),
            (Category::Geographical, GEOGRAPHICAL_CLASSES),
        ] {
            map.insert(
                category.as_str().to_string(),
                classes.iter().map(|c| c.to_string()).collect(),
            );
        }
        map
    }

    /// Assign `class` to `category`. The first assignment of a class wins.
    pub fn insert(&mut self, category: Category, class: &str) {
        if category == Category::Artist {
            self.artists.insert(class.to_string());
        }
        self.classes.entry(class.to_string()).or_insert(category);
    }

    pub fn category_of(&self, class: &str) -> Option<Category> {
        self.classes.get(class).copied()
    }

    pub fn is_artist(&self, class: &str) -> bool {
        self.artists.contains(class)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

// =============================================================================
// Classifier
// =============================================================================

/// Resolves the category of an entity from its type classes
#[derive(Debug, Clone)]
pub struct Classifier {
    table: CategoryTable,
}

impl Classifier {
    pub fn new(table: CategoryTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &CategoryTable {
        &self.table
    }

    /// Category of an entity typed with `types`
    pub fn classify<I, S>(&self, graph: &RelationGraph, types: I) -> Category
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ordered = graph.specificity_ordered_ancestors(types, false, None);

        for class in &ordered {
            let Some(category) = self.table.category_of(class) else {
                continue;
            };
            let upgrade = match category {
                Category::Person => ordered.iter().any(|c| self.table.is_artist(c)),
                Category::Artist => ordered
                    .iter()
                    .any(|c| self.table.category_of(c) == Some(Category::Person)),
                _ => false,
            };
            return if upgrade { Category::PersonArtist } else { category };
        }

        Category::General
    }

    /// Entity id with its category prefix ("p:Q42")
    pub fn prefixed_id<I, S>(&self, graph: &RelationGraph, id: &str, types: I) -> String
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        format!("{}{}", self.classify(graph, types).prefix(), id)
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(CategoryTable::builtin())
    }
}
