use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use wheelbake::{Converter, PyCompile};

/// Compile all Python files inside a wheel to bytecode files.
///
/// Writes a new wheel next to the input with `.compiled` appended to the
/// version, containing bytecode instead of source.
#[derive(Debug, Parser)]
#[command(version, name = env!("CARGO_PKG_NAME"))]
struct Cli {
    /// Path to the wheel to convert
    wheel: PathBuf,

    /// Glob matched against member paths relative to the archive root;
    /// matching members are carried through uncompiled
    #[arg(long, value_name = "GLOB")]
    exclude: Option<String>,

    /// Python interpreter used to byte-compile sources
    #[arg(long, value_name = "PATH")]
    python: Option<PathBuf>,
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<PathBuf> {
    let cli = Cli::parse();

    let compiler = match cli.python {
        Some(interpreter) => PyCompile::new(interpreter),
        None => PyCompile::default(),
    };
    let mut converter = Converter::new(Box::new(compiler));
    if let Some(pattern) = cli.exclude.as_deref() {
        converter = converter.exclude(
            glob::Pattern::new(pattern).context("Invalid --exclude pattern")?,
        );
    }

    converter
        .convert(&cli.wheel)
        .with_context(|| format!("Failed to convert {}", cli.wheel.display()))
}

fn main() {
    setup_logging();
    match run() {
        Ok(output) => println!("{}", output.display()),
        Err(err) => {
            let mut stderr = std::io::stderr();
            let _ = writeln!(stderr, "💥 {err:?}");
            std::process::exit(1);
        }
    }
}
