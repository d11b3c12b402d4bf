//! Knowledge Base Pipeline CLI
//!
//! Turns a Wikidata JSON dump into a tab-separated knowledge base, or runs a
//! single part of the pipeline over files written by an earlier run.
//!
//! Usage:
//!   kb-pipeline latest-all.json kb.tsv --buffer-level 1
//!   kb-pipeline latest-all.json kb.tsv --parse-only --dict-file dict.tsv --class-relations-dump classes.json
//!   kb-pipeline kb.tsv typed.tsv --substitute-type-only --class-relations-dump classes.json
//!   kb-pipeline typed.tsv named.tsv --substitute-names-only --dict-file dict.tsv

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use wikidata_kb::{
    BufferLevel, KbConfig, PipelineError, Pipeline, PipelineOptions, RunMode, RunReport, ScanLimit,
};

/// Exit status for misuse detected before the run starts
const CONFIGURATION_EXIT_CODE: i32 = 2;

#[derive(Parser)]
#[command(name = "kb-pipeline")]
#[command(about = "Build a tab-separated knowledge base from a Wikidata JSON dump")]
struct Cli {
    /// Input file: the JSON dump, or a TSV for the substitute-only modes
    input: PathBuf,

    /// Output TSV file
    output: PathBuf,

    /// Configuration file (on top of kb.toml and KB__* variables)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 0 spools records and dictionary, 1 keeps the dictionary in memory, 2 keeps both
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=2))]
    buffer_level: Option<u8>,

    /// Dictionary file (written by full and --parse-only runs, read by --substitute-names-only)
    #[arg(long)]
    dict_file: Option<PathBuf>,

    /// Class relations dump (written after graph close, read by --substitute-type-only)
    #[arg(long)]
    class_relations_dump: Option<PathBuf>,

    /// Instance relations dump written after graph close
    #[arg(long)]
    instance_relations_dump: Option<PathBuf>,

    /// Directory of class relation fragments to merge into the graph
    #[arg(long)]
    graph_fragments: Option<PathBuf>,

    /// Directory of instance relation fragments to merge
    #[arg(long)]
    instance_fragments: Option<PathBuf>,

    /// Process only this physical line of the dump
    #[arg(short, long, conflicts_with = "number_of_entities")]
    line: Option<usize>,

    /// Stop after this many entities
    #[arg(short, long)]
    number_of_entities: Option<usize>,

    /// Replace types with full root paths
    #[arg(long)]
    full_paths: bool,

    /// Keep the root class in ancestor lists
    #[arg(long)]
    keep_root_class: bool,

    /// Root class of the hierarchy
    #[arg(long)]
    root_class_id: Option<String>,

    /// Label language
    #[arg(long)]
    language: Option<String>,

    /// Skip entities without a label in the chosen language
    #[arg(long)]
    require_label: bool,

    /// Directory for temporary files (defaults to the output's directory)
    #[arg(long)]
    temp_dir: Option<PathBuf>,

    /// Keep temporary files after the run
    #[arg(long)]
    no_cleanup: bool,

    /// Add missing inverse edges to the class graph
    #[arg(long)]
    complete_relations: bool,

    /// Report identifiers without a label
    #[arg(long)]
    show_missing: bool,

    /// Delete identifiers without a label instead of keeping them
    #[arg(long)]
    remove_missing: bool,

    /// Only parse the dump (no type or name substitution)
    #[arg(long, conflicts_with_all = ["substitute_type_only", "substitute_names_only"])]
    parse_only: bool,

    /// Only substitute types in an existing TSV
    #[arg(long, conflicts_with = "substitute_names_only")]
    substitute_type_only: bool,

    /// Only substitute names in an existing TSV
    #[arg(long)]
    substitute_names_only: bool,

    /// Write the run report as JSON
    #[arg(long)]
    report: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Print nothing on success
    #[arg(short, long)]
    quiet: bool,
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        let code = match e.downcast_ref::<PipelineError>() {
            Some(failure) => {
                for path in &failure.kept_temp_files {
                    eprintln!("   Kept temporary file: {}", path.display());
                }
                failure.exit_code()
            }
            None => CONFIGURATION_EXIT_CODE,
        };
        std::process::exit(code);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = KbConfig::load_from(cli.config.as_deref()).context("Loading configuration")?;
    apply_overrides(&mut config, &cli)?;

    let limit = ScanLimit::from_options(cli.number_of_entities, cli.line)?;
    let options = PipelineOptions {
        input: cli.input.clone(),
        output: cli.output.clone(),
        dict_file: cli.dict_file.clone(),
        class_relations_dump: cli.class_relations_dump.clone(),
        instance_relations_dump: cli.instance_relations_dump.clone(),
        graph_fragments: cli.graph_fragments.clone(),
        instance_fragments: cli.instance_fragments.clone(),
        limit,
    };

    let mode = if cli.parse_only {
        RunMode::ParseOnly
    } else if cli.substitute_type_only {
        RunMode::SubstituteTypesOnly
    } else if cli.substitute_names_only {
        RunMode::SubstituteNamesOnly
    } else {
        RunMode::Full
    };

    let report = Pipeline::new(config, options).run(mode)?;

    if let Some(path) = &cli.report {
        report
            .save(path)
            .with_context(|| format!("Writing run report to {}", path.display()))?;
    }
    if !cli.quiet {
        print_summary(&report, &cli);
    }
    Ok(())
}

fn apply_overrides(config: &mut KbConfig, cli: &Cli) -> anyhow::Result<()> {
    let pipeline = &mut config.pipeline;
    if let Some(level) = cli.buffer_level {
        pipeline.buffer_level = BufferLevel::try_from(level)?;
    }
    if let Some(root) = &cli.root_class_id {
        pipeline.root_class_id = root.clone();
    }
    if let Some(dir) = &cli.temp_dir {
        pipeline.temp_dir = Some(dir.clone());
    }
    pipeline.full_paths |= cli.full_paths;
    pipeline.keep_root_class |= cli.keep_root_class;
    pipeline.complete_relations |= cli.complete_relations;
    pipeline.show_missing |= cli.show_missing;
    if cli.no_cleanup {
        pipeline.cleanup = false;
    }

    if let Some(language) = &cli.language {
        config.parse.language = language.clone();
    }
    config.parse.require_label |= cli.require_label;
    config.substitution.remove_missing |= cli.remove_missing;

    config.validate()?;
    Ok(())
}

fn print_summary(report: &RunReport, cli: &Cli) {
    println!("✅ {:?} run finished: {}", report.mode, cli.output.display());
    if let Some(scan) = &report.scan {
        println!(
            "   Scanned {} entities ({} malformed, {} without identity)",
            scan.processed, scan.malformed, scan.missing_identity
        );
    }
    if report.classes > 0 {
        println!(
            "   Class graph: {} classes, {} cycle group(s)",
            report.classes, report.cycle_groups
        );
    }
    if let Some(types) = &report.types {
        println!(
            "   Types rewritten: {} of {} records ({} unknown classes)",
            types.rewritten, types.records, types.unknown_classes
        );
    }
    println!("   Records written: {}", report.records_written);

    if !report.missing_identifiers.is_empty() {
        println!();
        println!("⚠️  {} identifier(s) without a label:", report.missing_identifiers.len());
        for id in &report.missing_identifiers {
            println!("   {}", id);
        }
    }
    for path in &report.kept_temp_files {
        println!("   Kept temporary file: {}", path.display());
    }
    for timing in &report.stages {
        println!("   {:<18} {} ms", timing.stage.to_string(), timing.millis);
    }
}
