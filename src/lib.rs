pub mod builder;
pub mod cli;
pub mod data;
pub mod directive;
pub mod entity;
pub mod error;
pub mod hierarchy;
pub mod infer;
pub mod io_utils;
pub mod populate;
pub mod resolver;
pub mod rows;
pub mod sink;
pub mod table;

use std::{
    env,
    path::{Path, PathBuf},
    sync::OnceLock,
};

use anyhow::{Context, Result};
use clap::Parser;
use itertools::Itertools;
use log::{LevelFilter, info, warn};

use crate::cli::{Cli, Commands};
use crate::hierarchy::InMemoryHierarchy;
use crate::populate::PopulateOptions;
use crate::rows::RowStream;
use crate::sink::{AnnotationRequest, CsvTableSink, TableSink};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("bulk_populate", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Populate(args) => handle_populate(&args),
        Commands::DetectHeaders(args) => handle_detect_headers(&args),
    }
}

fn handle_populate(args: &cli::PopulateArgs) -> Result<()> {
    let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
    let hierarchy = InMemoryHierarchy::load(&args.hierarchy)
        .with_context(|| format!("Loading hierarchy from {:?}", args.hierarchy))?;
    let options = PopulateOptions {
        manual_headers: args.manual_headers,
        allow_nan: args.allow_nan,
        table_name: args.table_name.clone(),
        column_types: (!args.columns.is_empty()).then(|| args.columns.clone()),
        encoding,
    };
    info!(
        "Populating '{}' from '{}'",
        args.target,
        args.input.display()
    );
    let populated = populate::populate_path(&args.input, args.target, &hierarchy, &options)
        .with_context(|| format!("Populating {} from {:?}", args.target, args.input))?;

    let unresolved = populated.report.unresolved.len();
    if unresolved > 0 {
        warn!("{unresolved} reference cell(s) left unresolved");
    }
    if args.preview {
        print!("{}", populated.table.render());
    }
    if args.dry_run {
        info!("Dry run: table '{}' not persisted", populated.table_name);
        return Ok(());
    }

    let output = match &args.output {
        Some(path) => path.clone(),
        None => default_output_path(&args.input)?,
    };
    let mut sink = CsvTableSink::new(&output);
    let handle = sink
        .persist(&AnnotationRequest::new(&populated))
        .with_context(|| format!("Writing table to {output:?}"))?;
    info!(
        "Table with {} row(s) and {} column(s) written to {:?} (sha256 {})",
        handle.rows, handle.columns, handle.location, handle.sha256
    );
    Ok(())
}

fn handle_detect_headers(args: &cli::DetectHeadersArgs) -> Result<()> {
    let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
    let reader = io_utils::open_csv_reader_from_path(&args.input)?;
    let mut stream = RowStream::new(reader, encoding);
    let tokens = directive::detect_header_tokens(&mut stream)
        .with_context(|| format!("Detecting column types in {:?}", args.input))?;
    println!("{}", tokens.iter().join(","));
    Ok(())
}

fn default_output_path(input: &Path) -> Result<PathBuf> {
    if io_utils::is_dash(input) {
        anyhow::bail!("--output is required when reading from stdin");
    }
    let mut name = input
        .file_stem()
        .map(|stem| stem.to_os_string())
        .context("Input path has no file name")?;
    name.push(".table.csv");
    Ok(input.with_file_name(name))
}
