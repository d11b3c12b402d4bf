//! Wikidata Knowledge Base
//!
//! Streams a Wikidata JSON dump into a flat, tab-separated knowledge base.
//! Entity type fields are rewritten through the subclass-of class hierarchy
//! and identifiers inside fields are replaced with human-readable labels.
//!
//! ## Features
//!
//! - **Relation Graph**: Ordered-unique ancestor/successor sets with
//!   cycle-tolerant closures and root paths
//! - **Bounded Memory**: Buffer levels 0/1/2 trade memory for spooled
//!   temporary files, with byte-identical output
//! - **Distributed Input**: Graph and instance fragments from parallel scans
//!   are merged into one graph
//! - **Stage-Tagged Failures**: Every failure names the stage it happened in
//!
//! ## Architecture
//!
//! ```text
//! dump.json ──► Scan ──► GraphBuild ──► GraphClose ──► TypeSubstitute ──► NameSubstitute ──► kb.tsv
//!                │            ▲              │
//!                │   fragments/*.json        ├──► class_relations.json
//!                │                           └──► instance_relations.json
//!                ├──► records (memory | spool)
//!                └──► dictionary (memory | spool)
//! ```

pub mod config;
pub mod dictionary;
pub mod error;
pub mod extract;
pub mod graph;
pub mod pipeline;
pub mod record;
pub mod scan;
pub mod spool;
pub mod substitute;

pub use config::KbConfig;
pub use dictionary::Dictionary;
pub use error::{KbError, PipelineError, Result};
pub use extract::{RecordExtractor, WikidataExtractor};
pub use graph::{Category, ClassKey, ClassNode, Classifier, InstanceIndex, RelationGraph};
pub use pipeline::{BufferLevel, Pipeline, PipelineOptions, RunMode, RunReport, Stage};
pub use record::{ScanLimit, TabularRecord};
pub use scan::{ScanStats, Scanner};
pub use substitute::IdentifierSubstitutor;
