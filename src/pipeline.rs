//! Pipeline orchestration
//!
//! Drives one run through Scan -> GraphBuild -> GraphClose -> TypeSubstitute
//! -> NameSubstitute. The buffer level decides which intermediate streams
//! stay in memory and which are spooled to temporary files:
//!
//! | level | records  | dictionary |
//! |-------|----------|------------|
//! | 0     | spooled  | spooled    |
//! | 1     | spooled  | memory     |
//! | 2     | memory   | memory     |
//!
//! Spool files are dropped (and deleted) on every exit path, unless cleanup
//! is disabled. A failure aborts the remaining stages and is reported with
//! the stage it happened in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

use crate::config::KbConfig;
use crate::dictionary::Dictionary;
use crate::error::{KbError, PipelineError, Result};
use crate::extract::WikidataExtractor;
use crate::graph::{
    find_cycles, load_graph_directory, load_graph_dump, load_instance_directory,
    save_graph_dump, save_instance_dump, InstanceIndex, RelationGraph, TypeExpansion, TypeStats,
    TypeSubstitutor,
};
use crate::record::{ScanLimit, TabularRecord};
use crate::scan::{ScanOutput, ScanStats, Scanner};
use crate::spool::{SpoolFile, Spooler};
use crate::substitute::IdentifierSubstitutor;

// =============================================================================
// Buffer Level
// =============================================================================

/// Memory/disk tradeoff for intermediate streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum BufferLevel {
    /// Records and dictionary spooled
    #[default]
    Spool,
    /// Dictionary in memory, records spooled
    Dictionary,
    /// Records and dictionary in memory
    Memory,
}

impl BufferLevel {
    pub fn holds_dictionary(&self) -> bool {
        *self >= BufferLevel::Dictionary
    }

    pub fn holds_records(&self) -> bool {
        *self == BufferLevel::Memory
    }
}

impl TryFrom<u8> for BufferLevel {
    type Error = KbError;

    fn try_from(level: u8) -> Result<Self> {
        match level {
            0 => Ok(BufferLevel::Spool),
            1 => Ok(BufferLevel::Dictionary),
            2 => Ok(BufferLevel::Memory),
            other => Err(KbError::configuration(format!(
                "buffer level must be 0, 1 or 2, got {}",
                other
            ))),
        }
    }
}

impl From<BufferLevel> for u8 {
    fn from(level: BufferLevel) -> u8 {
        match level {
            BufferLevel::Spool => 0,
            BufferLevel::Dictionary => 1,
            BufferLevel::Memory => 2,
        }
    }
}

// =============================================================================
// Stage
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Scan,
    GraphBuild,
    GraphClose,
    TypeSubstitute,
    NameSubstitute,
    Done,
}

impl Stage {
    /// Process exit status when this stage fails
    pub fn exit_code(&self) -> i32 {
        match self {
            Stage::Scan => 1,
            Stage::NameSubstitute => 3,
            Stage::GraphBuild => 4,
            Stage::GraphClose => 5,
            Stage::TypeSubstitute => 6,
            Stage::Done => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Scan => "scan",
            Stage::GraphBuild => "graph build",
            Stage::GraphClose => "graph close",
            Stage::TypeSubstitute => "type substitution",
            Stage::NameSubstitute => "name substitution",
            Stage::Done => "done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which stages a run executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Every stage, dump in, knowledge base out
    Full,
    /// Scan + GraphBuild + GraphClose; rows written untyped
    ParseOnly,
    /// TypeSubstitute over an existing TSV with a stored graph
    SubstituteTypesOnly,
    /// NameSubstitute over an existing TSV with a stored dictionary
    SubstituteNamesOnly,
}

// =============================================================================
// Options and Report
// =============================================================================

/// Files of one run
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    /// Dump (full, parse-only) or TSV (partial substitution runs)
    pub input: PathBuf,
    pub output: PathBuf,
    /// Dictionary written by full and parse-only runs, read by name-only runs
    pub dict_file: Option<PathBuf>,
    /// Graph dump written after GraphClose, read by type-only runs
    pub class_relations_dump: Option<PathBuf>,
    /// Instance dump written after GraphClose
    pub instance_relations_dump: Option<PathBuf>,
    /// Directory of graph fragments merged during GraphBuild
    pub graph_fragments: Option<PathBuf>,
    /// Directory of instance fragments merged during GraphBuild
    pub instance_fragments: Option<PathBuf>,
    pub limit: ScanLimit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTiming {
    pub stage: Stage,
    pub millis: u64,
}

/// Summary of a finished run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub mode: RunMode,
    pub buffer_level: BufferLevel,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub scan: Option<ScanStats>,
    pub types: Option<TypeStats>,
    pub classes: usize,
    pub instance_relations: usize,
    pub cycle_groups: usize,
    pub dictionary_entries: usize,
    pub records_written: usize,
    pub missing_identifiers: Vec<String>,
    pub stages: Vec<StageTiming>,
    pub kept_temp_files: Vec<PathBuf>,
}

impl RunReport {
    fn new(mode: RunMode, buffer_level: BufferLevel) -> Self {
        Self {
            mode,
            buffer_level,
            started_at: Utc::now(),
            finished_at: None,
            scan: None,
            types: None,
            classes: 0,
            instance_relations: 0,
            cycle_groups: 0,
            dictionary_entries: 0,
            records_written: 0,
            missing_identifiers: Vec::new(),
            stages: Vec::new(),
            kept_temp_files: Vec::new(),
        }
    }

    /// Write the report as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}

/// Bookkeeping of the run in progress
struct Run<'p> {
    output: &'p Path,
    stage: Option<(Stage, Instant)>,
    output_started: bool,
    report: RunReport,
}

impl<'p> Run<'p> {
    fn enter(&mut self, stage: Stage) {
        self.close_stage();
        info!(stage = %stage, "Stage started");
        self.stage = Some((stage, Instant::now()));
    }

    fn close_stage(&mut self) {
        if let Some((stage, started)) = self.stage.take() {
            let millis = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            info!(stage = %stage, millis, "Stage finished");
            self.report.stages.push(StageTiming { stage, millis });
        }
    }

    fn current(&self) -> Stage {
        self.stage.map(|(stage, _)| stage).unwrap_or(Stage::Done)
    }

    /// Truncate the final output and mark it as started
    fn create_output(&mut self) -> Result<BufWriter<File>> {
        let file = File::create(self.output)?;
        self.output_started = true;
        Ok(BufWriter::new(file))
    }

    fn track(&mut self, spool: &SpoolFile) {
        if spool.is_kept() {
            self.report.kept_temp_files.push(spool.path().to_path_buf());
        }
    }

    fn finish(mut self) -> RunReport {
        self.close_stage();
        self.report.finished_at = Some(Utc::now());
        self.report
    }

    fn fail(self, source: KbError) -> PipelineError {
        let stage = self.current();
        let partial = self.output_started
            && std::fs::metadata(self.output)
                .map(|m| m.len() > 0)
                .unwrap_or(false);
        warn!(stage = %stage, partial_output = partial, error = %source, "Pipeline run failed");
        PipelineError::new(stage, source)
            .with_partial_output(partial)
            .with_kept_temp_files(self.report.kept_temp_files)
    }
}

/// Where the scan sends rows or labels
#[derive(Clone, Copy)]
enum Target<'f> {
    Memory,
    File(&'f File),
    /// Written to the file and kept in memory
    Both(&'f File),
    Discard,
}

impl<'f> Target<'f> {
    fn file(self) -> Option<&'f File> {
        match self {
            Target::File(file) | Target::Both(file) => Some(file),
            Target::Memory | Target::Discard => None,
        }
    }

    fn keeps_memory(self) -> bool {
        matches!(self, Target::Memory | Target::Both(_))
    }
}

/// Parsed rows between stages
enum RecordStore {
    Memory(Vec<TabularRecord>),
    Spooled(SpoolFile),
}

// =============================================================================
// Pipeline
// =============================================================================

pub struct Pipeline {
    config: KbConfig,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(config: KbConfig, options: PipelineOptions) -> Self {
        Self { config, options }
    }

    pub fn config(&self) -> &KbConfig {
        &self.config
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn run_full(&self) -> std::result::Result<RunReport, PipelineError> {
        self.run(RunMode::Full)
    }

    pub fn parse_only(&self) -> std::result::Result<RunReport, PipelineError> {
        self.run(RunMode::ParseOnly)
    }

    pub fn substitute_types_only(&self) -> std::result::Result<RunReport, PipelineError> {
        self.run(RunMode::SubstituteTypesOnly)
    }

    pub fn substitute_names_only(&self) -> std::result::Result<RunReport, PipelineError> {
        self.run(RunMode::SubstituteNamesOnly)
    }

    pub fn run(&self, mode: RunMode) -> std::result::Result<RunReport, PipelineError> {
        let mut run = Run {
            output: &self.options.output,
            stage: None,
            output_started: false,
            report: RunReport::new(mode, self.config.pipeline.buffer_level),
        };

        if let Err(source) = self.check(mode) {
            return Err(PipelineError::new(first_stage(mode), source));
        }

        let result = match mode {
            RunMode::Full => self.full(&mut run),
            RunMode::ParseOnly => self.parse(&mut run),
            RunMode::SubstituteTypesOnly => self.types_only(&mut run),
            RunMode::SubstituteNamesOnly => self.names_only(&mut run),
        };

        match result {
            Ok(()) => {
                let report = run.finish();
                info!(
                    mode = ?mode,
                    records = report.records_written,
                    "Pipeline run finished"
                );
                Ok(report)
            }
            Err(source) => Err(run.fail(source)),
        }
    }

    /// Misuse checks done before any file is opened
    fn check(&self, mode: RunMode) -> Result<()> {
        self.config.validate()?;
        IdentifierSubstitutor::new(&self.config.substitution.identifier_pattern)?;

        match mode {
            RunMode::SubstituteTypesOnly => {
                let dump = self.options.class_relations_dump.as_deref();
                let fragments = self.options.graph_fragments.as_deref();
                if dump.is_none() && fragments.is_none() {
                    return Err(KbError::MissingCompanion {
                        stage: Stage::TypeSubstitute.as_str(),
                        what: "class relations dump or fragment directory".to_string(),
                    });
                }
                for path in dump.into_iter().chain(fragments) {
                    require_exists(Stage::TypeSubstitute, path)?;
                }
            }
            RunMode::SubstituteNamesOnly => match self.options.dict_file.as_deref() {
                Some(path) => require_exists(Stage::NameSubstitute, path)?,
                None => {
                    return Err(KbError::MissingCompanion {
                        stage: Stage::NameSubstitute.as_str(),
                        what: "dictionary file".to_string(),
                    })
                }
            },
            RunMode::Full | RunMode::ParseOnly => {}
        }
        Ok(())
    }

    // ========== Modes ==========

    fn full(&self, run: &mut Run<'_>) -> Result<()> {
        let level = self.config.pipeline.buffer_level;
        let spooler = self.spooler();
        let names = self.name_substitutor()?;

        run.enter(Stage::Scan);
        let record_spool = if level.holds_records() {
            None
        } else {
            let spool = spooler.create("records")?;
            run.track(&spool);
            Some(spool)
        };
        // a requested dictionary file replaces the dictionary spool
        let dict_file = self
            .options
            .dict_file
            .as_ref()
            .map(File::create)
            .transpose()?;
        let dict_spool = if level.holds_dictionary() || dict_file.is_some() {
            None
        } else {
            let spool = spooler.create("dictionary")?;
            run.track(&spool);
            Some(spool)
        };
        let labels = match (&dict_file, &dict_spool) {
            (Some(file), _) if level.holds_dictionary() => Target::Both(file),
            (Some(file), _) => Target::File(file),
            (None, Some(spool)) => Target::File(spool.as_file()),
            (None, None) => Target::Memory,
        };
        let (mut scanned, records, dictionary) = self.scan(
            record_spool.as_ref().map_or(Target::Memory, |s| Target::File(s.as_file())),
            labels,
        )?;
        run.report.scan = Some(scanned.stats);
        let records = match record_spool {
            Some(spool) => RecordStore::Spooled(spool),
            None => RecordStore::Memory(records),
        };

        run.enter(Stage::GraphBuild);
        self.merge_fragments(&mut scanned.graph, &mut scanned.instances)?;

        run.enter(Stage::GraphClose);
        self.close_graph(&mut scanned.graph, &scanned.instances, run)?;

        run.enter(Stage::TypeSubstitute);
        let typed = match records {
            RecordStore::Memory(records) => {
                let mut typed = Vec::with_capacity(records.len());
                let stats = self.substitute_types(
                    &scanned.graph,
                    records.into_iter().map(Ok),
                    |record| {
                        typed.push(record);
                        Ok(())
                    },
                )?;
                run.report.types = Some(stats);
                RecordStore::Memory(typed)
            }
            RecordStore::Spooled(spool) => {
                let typed = spooler.create("typed")?;
                run.track(&typed);
                let mut writer = typed.writer();
                let stats = self.substitute_types(&scanned.graph, spool.records()?, |record| {
                    Ok(record.write_tsv(&mut writer)?)
                })?;
                writer.flush()?;
                drop(writer);
                run.report.types = Some(stats);
                RecordStore::Spooled(typed)
            }
        };
        drop(scanned);

        run.enter(Stage::NameSubstitute);
        let dictionary = match (&self.options.dict_file, dict_spool) {
            _ if level.holds_dictionary() => dictionary,
            (Some(path), _) => Dictionary::load(path)?,
            (None, Some(spool)) => Dictionary::read_tsv(spool.reader()?)?,
            (None, None) => dictionary,
        };
        run.report.dictionary_entries = dictionary.len();

        let mut writer = run.create_output()?;
        match typed {
            RecordStore::Memory(records) => {
                self.write_names(&names, &dictionary, records.into_iter().map(Ok), &mut writer, run)?
            }
            RecordStore::Spooled(spool) => {
                self.write_names(&names, &dictionary, spool.records()?, &mut writer, run)?
            }
        }
        writer.flush()?;
        Ok(())
    }

    fn parse(&self, run: &mut Run<'_>) -> Result<()> {
        run.enter(Stage::Scan);
        let output = File::create(&self.options.output)?;
        run.output_started = true;
        let dict_file = self
            .options
            .dict_file
            .as_ref()
            .map(File::create)
            .transpose()?;

        let (mut scanned, _, _) = self.scan(
            Target::File(&output),
            dict_file.as_ref().map_or(Target::Discard, Target::File),
        )?;
        run.report.scan = Some(scanned.stats);
        run.report.records_written = scanned.stats.processed;
        run.report.dictionary_entries = scanned.stats.labels;

        run.enter(Stage::GraphBuild);
        self.merge_fragments(&mut scanned.graph, &mut scanned.instances)?;

        run.enter(Stage::GraphClose);
        self.close_graph(&mut scanned.graph, &scanned.instances, run)
    }

    fn types_only(&self, run: &mut Run<'_>) -> Result<()> {
        run.enter(Stage::GraphBuild);
        let mut graph = match &self.options.class_relations_dump {
            Some(path) => load_graph_dump(path)?,
            None => RelationGraph::new(),
        };
        if let Some(dir) = &self.options.graph_fragments {
            graph.merge(load_graph_directory(dir)?);
        }
        if self.config.pipeline.complete_relations {
            graph.complete_relations();
        }
        run.report.classes = graph.len();

        run.enter(Stage::TypeSubstitute);
        let input = self.open_input()?;
        let mut writer = run.create_output()?;
        let stats = self.substitute_types(&graph, tsv_records(input), |record| {
            Ok(record.write_tsv(&mut writer)?)
        })?;
        writer.flush()?;
        run.report.records_written = stats.records;
        run.report.types = Some(stats);
        Ok(())
    }

    fn names_only(&self, run: &mut Run<'_>) -> Result<()> {
        let names = self.name_substitutor()?;

        run.enter(Stage::NameSubstitute);
        let dictionary = match &self.options.dict_file {
            Some(path) => Dictionary::load(path)?,
            None => Dictionary::new(),
        };
        run.report.dictionary_entries = dictionary.len();

        let input = self.open_input()?;
        let mut writer = run.create_output()?;
        self.write_names(&names, &dictionary, tsv_records(input), &mut writer, run)?;
        writer.flush()?;
        Ok(())
    }

    // ========== Stages ==========

    fn scan(
        &self,
        records: Target<'_>,
        labels: Target<'_>,
    ) -> Result<(ScanOutput, Vec<TabularRecord>, Dictionary)> {
        let extractor = WikidataExtractor::new(self.config.parse.language.clone())
            .require_label(self.config.parse.require_label);
        let scanner = Scanner::new(extractor).with_limit(self.options.limit);
        let input = self.open_input()?;

        let mut memory_records = Vec::new();
        let mut memory_labels = Dictionary::new();
        let mut record_writer = records.file().map(BufWriter::new);
        let mut label_writer = labels.file().map(BufWriter::new);

        let output = scanner.scan(
            input,
            |record| {
                if let Some(writer) = &mut record_writer {
                    record.write_tsv(writer)?;
                }
                if records.keeps_memory() {
                    memory_records.push(record);
                }
                Ok(())
            },
            |id, label| {
                if let Some(writer) = &mut label_writer {
                    Dictionary::write_entry(writer, id, label)?;
                }
                if labels.keeps_memory() {
                    memory_labels.insert(id, label);
                }
                Ok(())
            },
        )?;

        if let Some(mut writer) = record_writer {
            writer.flush()?;
        }
        if let Some(mut writer) = label_writer {
            writer.flush()?;
        }
        Ok((output, memory_records, memory_labels))
    }

    fn merge_fragments(&self, graph: &mut RelationGraph, instances: &mut InstanceIndex) -> Result<()> {
        if let Some(dir) = &self.options.graph_fragments {
            graph.merge(load_graph_directory(dir)?);
        }
        if let Some(dir) = &self.options.instance_fragments {
            instances.merge(load_instance_directory(dir)?);
        }
        Ok(())
    }

    fn close_graph(
        &self,
        graph: &mut RelationGraph,
        instances: &InstanceIndex,
        run: &mut Run<'_>,
    ) -> Result<()> {
        if self.config.pipeline.complete_relations {
            graph.complete_relations();
        }

        let cycles = find_cycles(graph);
        if !cycles.is_acyclic() {
            warn!(
                groups = cycles.groups.len(),
                classes = cycles.cyclic_class_count(),
                "Class hierarchy contains cycles"
            );
        }
        run.report.cycle_groups = cycles.groups.len();
        run.report.classes = graph.len();
        run.report.instance_relations = instances.relation_count();

        if let Some(path) = &self.options.class_relations_dump {
            save_graph_dump(graph, path)?;
        }
        if let Some(path) = &self.options.instance_relations_dump {
            save_instance_dump(instances, path)?;
        }
        Ok(())
    }

    fn substitute_types<I, F>(&self, graph: &RelationGraph, records: I, mut sink: F) -> Result<TypeStats>
    where
        I: Iterator<Item = Result<TabularRecord>>,
        F: FnMut(TabularRecord) -> Result<()>,
    {
        let mut substitutor =
            TypeSubstitutor::new(graph, self.type_expansion(), self.config.fields.type_field);
        for record in records {
            let mut record = record?;
            substitutor.substitute(&mut record);
            sink(record)?;
        }

        let stats = substitutor.into_stats();
        info!(
            records = stats.records,
            rewritten = stats.rewritten,
            unknown_classes = stats.unknown_classes,
            "Type substitution finished"
        );
        Ok(stats)
    }

    fn write_names<I, W>(
        &self,
        substitutor: &IdentifierSubstitutor,
        dictionary: &Dictionary,
        records: I,
        writer: &mut W,
        run: &mut Run<'_>,
    ) -> Result<()>
    where
        I: Iterator<Item = Result<TabularRecord>>,
        W: Write,
    {
        let mut substitution = substitutor.substitute(records, Some(dictionary))?;
        for record in substitution.by_ref() {
            record?.write_tsv(writer)?;
            run.report.records_written += 1;
        }

        let missing = substitution.into_missing();
        if !missing.is_empty() {
            info!(missing = missing.len(), "Identifiers without label");
        }
        run.report.missing_identifiers = missing.into_iter().collect();
        Ok(())
    }

    // ========== Helpers ==========

    fn open_input(&self) -> Result<BufReader<File>> {
        Ok(BufReader::new(File::open(&self.options.input)?))
    }

    fn spooler(&self) -> Spooler {
        let dir = match &self.config.pipeline.temp_dir {
            Some(dir) => dir.clone(),
            None => match self.options.output.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            },
        };
        Spooler::new(dir).keep_files(!self.config.pipeline.cleanup)
    }

    fn name_substitutor(&self) -> Result<IdentifierSubstitutor> {
        Ok(
            IdentifierSubstitutor::new(&self.config.substitution.identifier_pattern)?
                .with_excluded(self.config.fields.excluded.iter().copied())
                .show_missing(self.config.pipeline.show_missing)
                .remove_missing(self.config.substitution.remove_missing),
        )
    }

    fn type_expansion(&self) -> TypeExpansion {
        let pipeline = &self.config.pipeline;
        if pipeline.full_paths {
            TypeExpansion::Paths
        } else {
            TypeExpansion::Specificity {
                remove_root: !pipeline.keep_root_class,
                root: Some(pipeline.root_class_id.clone()),
            }
        }
    }
}

fn first_stage(mode: RunMode) -> Stage {
    match mode {
        RunMode::Full | RunMode::ParseOnly => Stage::Scan,
        RunMode::SubstituteTypesOnly => Stage::TypeSubstitute,
        RunMode::SubstituteNamesOnly => Stage::NameSubstitute,
    }
}

fn require_exists(stage: Stage, path: &Path) -> Result<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(KbError::MissingCompanion {
            stage: stage.as_str(),
            what: path.display().to_string(),
        })
    }
}

fn tsv_records<R: BufRead>(input: R) -> impl Iterator<Item = Result<TabularRecord>> {
    input
        .lines()
        .map(|line| Ok(TabularRecord::from_tsv(&line?)))
}
