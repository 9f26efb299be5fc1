//! dynaq Command-Line Tool
//!
//! Validates query mapping directories, renders queriers and runs queries
//! against JSON fixtures.

mod commands;
mod formatter;

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};
use commands::{CliError, Invocation, Mode, RunOptions};
use formatter::OutputFormat;
use tracing_subscriber::EnvFilter;

/// dynaq Command-Line Tool
#[derive(Parser, Debug)]
#[command(name = "dynaq")]
#[command(version, about = "Declarative query mappings: validate, render and run")]
pub struct Args {
    /// Output format
    #[arg(long, global = true, default_value = "table", value_enum)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load and validate every mapping file in a directory
    Validate {
        /// Mapping directory
        dir: PathBuf,
    },
    /// List the queries defined in a directory
    List {
        /// Mapping directory
        dir: PathBuf,
    },
    /// Render a query into its backend script and bound values
    Render {
        /// Mapping directory
        dir: PathBuf,
        /// Versioned query name
        query: String,
        #[command(flatten)]
        invocation: InvocationArgs,
    },
    /// Run a query against in-memory fixture rows
    Run {
        /// Mapping directory
        dir: PathBuf,
        /// Versioned query name
        query: String,
        /// JSON object of query name to fixture rows
        #[arg(long)]
        fixtures: PathBuf,
        /// Execution mode
        #[arg(long, default_value = "select", value_enum)]
        mode: Mode,
        /// Emulate offsets over a continuation-token backend
        #[arg(long)]
        cursor: bool,
        /// Maximum rows a select may return
        #[arg(long)]
        max_select_size: Option<usize>,
        /// Print execution metrics after the result
        #[arg(long)]
        metrics: bool,
        #[command(flatten)]
        invocation: InvocationArgs,
    },
}

#[derive(ClapArgs, Debug)]
pub struct InvocationArgs {
    /// Criteria as a JSON object
    #[arg(long)]
    pub criteria: Option<String>,
    /// Context as a JSON object
    #[arg(long)]
    pub context: Option<String>,
    /// JSON file backing CM(...) lookups
    #[arg(long)]
    pub config: Option<String>,
    /// Page offset
    #[arg(long)]
    pub offset: Option<usize>,
    /// Page limit
    #[arg(long)]
    pub limit: Option<usize>,
}

impl From<InvocationArgs> for Invocation {
    fn from(args: InvocationArgs) -> Self {
        Self {
            criteria: args.criteria,
            context: args.context,
            config: args.config,
            offset: args.offset,
            limit: args.limit,
        }
    }
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dynaq=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match run(args) {
        Ok(output) => println!("{}", output),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn run(args: Args) -> Result<String, CliError> {
    let formatter = formatter::create_formatter(args.format);

    match args.command {
        Command::Validate { dir } => commands::validate(&dir, &*formatter),
        Command::List { dir } => commands::list(&dir, &*formatter),
        Command::Render {
            dir,
            query,
            invocation,
        } => commands::render(&dir, &query, &invocation.into(), &*formatter),
        Command::Run {
            dir,
            query,
            fixtures,
            mode,
            cursor,
            max_select_size,
            metrics,
            invocation,
        } => {
            let options = RunOptions {
                mode,
                cursor,
                max_select_size,
                metrics,
            };
            commands::run(
                &dir,
                &query,
                &fixtures,
                &invocation.into(),
                &options,
                &*formatter,
            )
        }
    }
}
