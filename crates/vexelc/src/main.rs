//! The Vexel compiler frontend CLI.
//!
//! Runs the full frontend over one entry file and, on success, optionally
//! writes the analysis report. Backend code generation is a separate
//! consumer of the analyzed program and is not part of this binary.

mod render;
mod report;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use log::debug;
use rustc_hash::FxHashMap;

use render::RenderSink;
use vexel_common::options::{Options, Strictness};

#[derive(Parser)]
#[command(name = "vexelc", version, about = "The Vexel compiler frontend")]
struct Cli {
    /// Entry source file (.vx)
    entry: PathBuf,

    /// Project root for import resolution (defaults to the entry's directory)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Target backend name
    #[arg(long, default_value = "c")]
    backend: String,

    /// Per-backend option, `key=value` (repeatable)
    #[arg(long = "backend-opt", value_name = "KEY=VALUE")]
    backend_opts: Vec<String>,

    /// Output stem for derived artifacts
    #[arg(long, value_name = "STEM")]
    out_stem: Option<String>,

    /// Write `<stem>.analysis.txt` after a successful run
    #[arg(long)]
    emit_analysis: bool,

    /// Also write `<stem>.analysis.json`
    #[arg(long)]
    emit_analysis_json: bool,

    /// Allow process expressions to run during compile-time evaluation
    #[arg(long)]
    allow_process: bool,

    /// Type strictness level: 0 relaxed, 1 local annotations, 2 full
    #[arg(long, default_value = "0")]
    strictness: u8,

    /// Verbose pass tracing on stderr
    #[arg(short, long)]
    verbose: bool,

    /// Disable colored diagnostics
    #[arg(long)]
    plain: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(if cli.verbose {
        "debug"
    } else {
        "warn"
    }))
    .format_timestamp(None)
    .init();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let Some(strictness) = Strictness::from_level(cli.strictness) else {
        anyhow::bail!("invalid strictness level {} (expected 0, 1, or 2)", cli.strictness);
    };

    let mut backend_options = FxHashMap::default();
    for opt in &cli.backend_opts {
        let Some((key, value)) = opt.split_once('=') else {
            anyhow::bail!("backend option `{opt}` is not of the form key=value");
        };
        backend_options.insert(key.to_string(), value.to_string());
    }

    let root = cli
        .root
        .clone()
        .or_else(|| cli.entry.parent().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."));
    let out_stem = cli.out_stem.clone().unwrap_or_else(|| {
        cli.entry
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "out".to_string())
    });

    let options = Options {
        verbose: cli.verbose,
        emit_analysis: cli.emit_analysis,
        allow_process: cli.allow_process,
        backend: cli.backend.clone(),
        backend_options,
        out_stem: out_stem.clone(),
        strictness,
    };

    let mut sink = RenderSink::new(cli.plain);
    let program = match vexel_front::compile(&cli.entry, &root, options, &mut sink) {
        Ok(program) => program,
        Err(_) => return Ok(ExitCode::FAILURE),
    };
    debug!(
        "frontend finished: {} merged item(s), {} reachable function(s)",
        program.merged().items.len(),
        program.analysis.reachable.len()
    );

    if cli.emit_analysis || cli.emit_analysis_json {
        if cli.emit_analysis {
            let path = format!("{out_stem}.analysis.txt");
            std::fs::write(&path, report::render_text(&program))
                .with_context(|| format!("cannot write `{path}`"))?;
            eprintln!("wrote {path}");
        }
        if cli.emit_analysis_json {
            let path = format!("{out_stem}.analysis.json");
            let json = serde_json::to_string_pretty(&report::render_json(&program))
                .context("cannot serialize analysis report")?;
            std::fs::write(&path, json).with_context(|| format!("cannot write `{path}`"))?;
            eprintln!("wrote {path}");
        }
    }

    Ok(ExitCode::SUCCESS)
}
