use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::entity::Target;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Populate typed bulk annotation tables from CSV files",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Build a typed table from a CSV file and link it to a container
    Populate(PopulateArgs),
    /// Print the column type tokens automatic detection would choose
    DetectHeaders(DetectHeadersArgs),
}

#[derive(Debug, Args)]
pub struct PopulateArgs {
    /// Input CSV file (`-` reads stdin)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Target container as `Kind:id`, e.g. `Dataset:42` or `Screen:3`
    #[arg(short = 't', long = "target", value_parser = parse_target)]
    pub target: Target,
    /// YAML or JSON description of the container hierarchy
    #[arg(long = "hierarchy")]
    pub hierarchy: PathBuf,
    /// Output CSV for the finished table (defaults to `<input>.table.csv`)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Comma-separated column type tokens (d,l,s,b,plate,well,image,dataset,roi)
    #[arg(short = 'C', long = "columns", value_delimiter = ',')]
    pub columns: Vec<String>,
    /// Do not infer column types; undeclared columns become strings
    #[arg(long = "manual-headers")]
    pub manual_headers: bool,
    /// Convert empty or unparseable double cells to NaN
    #[arg(long = "allow-nan")]
    pub allow_nan: bool,
    /// Name of the persisted table
    #[arg(long = "table-name", default_value = crate::populate::DEFAULT_TABLE_NAME)]
    pub table_name: String,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Build the table but do not persist it
    #[arg(long = "dry-run")]
    pub dry_run: bool,
    /// Print the finished table to stdout
    #[arg(long = "preview")]
    pub preview: bool,
}

#[derive(Debug, Args)]
pub struct DetectHeadersArgs {
    /// Input CSV file (`-` reads stdin)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

fn parse_target(value: &str) -> Result<Target, String> {
    value.parse::<Target>().map_err(|err| err.to_string())
}
