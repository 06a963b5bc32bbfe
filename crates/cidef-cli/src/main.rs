//! cidef CLI tool.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "cidef")]
#[command(about = "Read and inspect CI pipeline definitions", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a pipeline definition
    Check {
        #[command(flatten)]
        input: Input,
    },
    /// Print the normalized pipeline definition
    Show {
        #[command(flatten)]
        input: Input,
        /// Output format
        #[arg(long, value_enum, default_value_t = Format::Yaml)]
        format: Format,
    },
    /// Print a phase, or one variant of it, as JSON
    Getinfo {
        #[command(flatten)]
        input: Input,
        /// Phase name
        #[arg(long)]
        phase: String,
        /// Variant name
        #[arg(long)]
        variant: Option<String>,
    },
}

/// The definition to read and the variables it is read with.
#[derive(Args)]
struct Input {
    /// Path to the pipeline definition
    #[arg(default_value = "cidef.yaml")]
    path: PathBuf,

    /// Workspace directory bound to `WORKSPACE`
    #[arg(long, env = "WORKSPACE")]
    workspace: Option<String>,

    /// Bind a variable (NAME=VALUE)
    #[arg(long = "var", value_name = "NAME=VALUE", value_parser = parse_var)]
    vars: Vec<(String, String)>,

    /// Declare a variable without a value
    #[arg(long = "unset", value_name = "NAME")]
    unset: Vec<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Json,
    Yaml,
}

fn parse_var(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected NAME=VALUE, got `{s}`")),
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("CIDEF_LOG").unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Check { input } => {
            commands::check(&input)?;
        }
        Commands::Show { input, format } => {
            commands::show::show(&input, format)?;
        }
        Commands::Getinfo {
            input,
            phase,
            variant,
        } => {
            commands::show::getinfo(&input, &phase, variant.as_deref())?;
        }
    }

    Ok(())
}
