//! Class Relations CLI
//!
//! Maintenance tool for class relation dumps written by `kb-pipeline`:
//! closures, subclass lists, root paths, expanded instance relations, type
//! replacement, classification and cycle inspection.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use wikidata_kb::graph::loader::{
    load_graph_directory, load_graph_dump, load_instance_directory, load_instance_dump,
    save_graph_dump, save_instance_dump,
};
use wikidata_kb::graph::{find_cycles, TypeExpansion, TypeSubstitutor};
use wikidata_kb::{Classifier, KbConfig, RelationGraph, TabularRecord};

#[derive(Parser)]
#[command(name = "kb-relations")]
#[command(about = "Inspect and apply Wikidata class relations")]
struct Cli {
    /// Class relations dump
    #[arg(short, long, global = true)]
    dump: Option<PathBuf>,

    /// Directory of class relation fragments merged on top of the dump
    #[arg(short, long, global = true)]
    fragments: Option<PathBuf>,

    /// Add missing inverse edges after loading
    #[arg(long, global = true)]
    complete_relations: bool,

    /// Output file (defaults to stdout)
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Every class paired with each of its superclasses (transitively)
    Superclasses,

    /// Every class paired with each of its subclasses (transitively)
    Subclasses,

    /// Direct subclass-of edges
    Relations,

    /// Root-to-class paths of the given classes
    Paths {
        /// Class keys (e.g. Q5)
        #[arg(required = true)]
        classes: Vec<String>,
    },

    /// Instance relations extended with every superclass of each class
    ExpandInstances {
        /// Instance relations dump
        #[arg(short, long)]
        instances: Option<PathBuf>,

        /// Directory of instance relation fragments
        #[arg(long)]
        instance_fragments: Option<PathBuf>,

        /// Emit root paths instead of superclasses
        #[arg(long)]
        paths: bool,
    },

    /// Rewrite the type field of a TSV file
    ReplaceTypes {
        /// Input TSV
        input: PathBuf,

        /// Emit root paths instead of the flattened ancestor set
        #[arg(long)]
        paths: bool,

        #[arg(long, default_value_t = 1)]
        type_field: usize,
    },

    /// Prefix entity ids of a TSV file with their category
    Classify {
        /// Input TSV
        input: PathBuf,

        /// Configuration file with a [categories] table
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Report cycles in the class hierarchy
    Cycles {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Merge fragment directories into dumps
    Merge {
        /// Directory of instance relation fragments
        #[arg(long)]
        instance_fragments: Option<PathBuf>,

        /// Instance relations dump to write
        #[arg(long, requires = "instance_fragments")]
        instance_output: Option<PathBuf>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Superclasses => {
            let graph = load_graph(&cli)?;
            let mut out = open_output(cli.output.as_deref())?;
            for (class, ancestor) in graph.superclass_closure_rows() {
                writeln!(out, "{}\t{}", class, ancestor)?;
            }
            out.flush()?;
        }

        Commands::Subclasses => {
            let graph = load_graph(&cli)?;
            let mut out = open_output(cli.output.as_deref())?;
            for (class, successor) in graph.subclass_rows() {
                writeln!(out, "{}\t{}", class, successor)?;
            }
            out.flush()?;
        }

        Commands::Relations => {
            let graph = load_graph(&cli)?;
            let mut out = open_output(cli.output.as_deref())?;
            for (class, ancestor) in graph.relation_rows() {
                writeln!(out, "{}\t{}", class, ancestor)?;
            }
            out.flush()?;
        }

        Commands::Paths { classes } => {
            let graph = load_graph(&cli)?;
            let mut out = open_output(cli.output.as_deref())?;
            for class in classes {
                for path in graph.paths_to_root([class]) {
                    writeln!(out, "{}\t{}", class, path)?;
                }
            }
            out.flush()?;
        }

        Commands::ExpandInstances {
            instances,
            instance_fragments,
            paths,
        } => {
            let graph = load_graph(&cli)?;
            let mut index = match instances {
                Some(path) => load_instance_dump(path)?,
                None => Default::default(),
            };
            if let Some(dir) = instance_fragments {
                index.merge(load_instance_directory(dir)?);
            }
            if index.is_empty() {
                anyhow::bail!("No instance relations given (use --instances or --instance-fragments)");
            }

            let mut out = open_output(cli.output.as_deref())?;
            let mut rows = 0usize;
            for (instance, class) in index.expand(&graph, *paths) {
                writeln!(out, "{}\t{}", instance, class)?;
                rows += 1;
            }
            out.flush()?;
            info!(rows, "Expanded instance relations");
        }

        Commands::ReplaceTypes {
            input,
            paths,
            type_field,
        } => {
            let graph = load_graph(&cli)?;
            let expansion = if *paths {
                TypeExpansion::Paths
            } else {
                TypeExpansion::Closure
            };
            let mut substitutor = TypeSubstitutor::new(&graph, expansion, *type_field);

            let mut out = open_output(cli.output.as_deref())?;
            for line in open_input(input)?.lines() {
                let mut record = TabularRecord::from_tsv(&line?);
                substitutor.substitute(&mut record);
                record.write_tsv(&mut out)?;
            }
            out.flush()?;

            let stats = substitutor.stats();
            eprintln!(
                "✅ Rewrote {} of {} records ({} unknown classes)",
                stats.rewritten, stats.records, stats.unknown_classes
            );
        }

        Commands::Classify { input, config } => {
            let graph = load_graph(&cli)?;
            let config = KbConfig::load_from(config.as_deref())?;
            let classifier = Classifier::new(config.category_table()?);
            let id_field = config.fields.id_field;
            let type_field = config.fields.type_field;

            let mut out = open_output(cli.output.as_deref())?;
            for line in open_input(input)?.lines() {
                let mut record = TabularRecord::from_tsv(&line?);
                let Some(id) = record.field(id_field).map(str::to_string) else {
                    record.write_tsv(&mut out)?;
                    continue;
                };
                let types: Vec<String> = record.values(type_field).map(str::to_string).collect();
                let prefixed = classifier.prefixed_id(&graph, &id, &types);
                record.set_field(id_field, prefixed);
                record.write_tsv(&mut out)?;
            }
            out.flush()?;
        }

        Commands::Cycles { json } => {
            let graph = load_graph(&cli)?;
            let report = find_cycles(&graph);
            let mut out = open_output(cli.output.as_deref())?;

            if *json {
                serde_json::to_writer_pretty(&mut out, &report.groups)?;
                writeln!(out)?;
            } else if report.is_acyclic() {
                writeln!(out, "✅ No cycles in {} classes", graph.len())?;
            } else {
                writeln!(
                    out,
                    "❌ {} cycle group(s), {} classes involved:",
                    report.groups.len(),
                    report.cyclic_class_count()
                )?;
                for group in &report.groups {
                    let marker = if group.is_self_referential {
                        " (self-referential)"
                    } else {
                        ""
                    };
                    writeln!(out, "   {}: {}{}", group.id, group.members.join(", "), marker)?;
                }
            }
            out.flush()?;
        }

        Commands::Merge {
            instance_fragments,
            instance_output,
        } => {
            if cli.fragments.is_none() && instance_fragments.is_none() {
                anyhow::bail!("Nothing to merge (use --fragments or --instance-fragments)");
            }
            if cli.fragments.is_some() {
                let graph = load_graph(&cli)?;
                let output = cli
                    .output
                    .as_deref()
                    .context("--output is required to write the merged class dump")?;
                save_graph_dump(&graph, output)?;
                println!("✅ Merged {} classes into {}", graph.len(), output.display());
            }
            if let (Some(dir), Some(output)) = (instance_fragments, instance_output) {
                let index = load_instance_directory(dir)?;
                save_instance_dump(&index, output)?;
                println!(
                    "✅ Merged {} instance relations into {}",
                    index.relation_count(),
                    output.display()
                );
            }
        }
    }

    Ok(())
}

/// Graph from the dump and/or fragment directory given on the command line
fn load_graph(cli: &Cli) -> anyhow::Result<RelationGraph> {
    let mut graph = match &cli.dump {
        Some(path) => load_graph_dump(path)
            .with_context(|| format!("Loading class relations from {}", path.display()))?,
        None => RelationGraph::new(),
    };
    if let Some(dir) = &cli.fragments {
        graph.merge(load_graph_directory(dir)?);
    }
    if cli.dump.is_none() && cli.fragments.is_none() {
        anyhow::bail!("No class relations given (use --dump or --fragments)");
    }
    if cli.complete_relations {
        graph.complete_relations();
    }
    info!(classes = graph.len(), edges = graph.edge_count(), "Class graph loaded");
    Ok(graph)
}

fn open_input(path: &Path) -> anyhow::Result<BufReader<File>> {
    let file = File::open(path).with_context(|| format!("Opening {}", path.display()))?;
    Ok(BufReader::new(file))
}

fn open_output(path: Option<&Path>) -> anyhow::Result<Box<dyn Write>> {
    Ok(match path {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    })
}
