mod attainment;
mod cli;
mod course;
mod db;
mod error;
mod ipc;
mod normalize;
mod setup;
mod sheet;

use anyhow::Context;
use clap::Parser;
use std::io::{self, BufRead, Write};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands, ComputeArgs};

const LOG_ENV: &str = "ATTAIND_LOG";

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(l) => EnvFilter::new(l),
        None => EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info")),
    };
    // stdout carries protocol lines only.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    match cli.command {
        Some(Commands::Compute(args)) => run_compute(cli.workspace.as_deref(), &args),
        Some(Commands::Serve) | None => serve(cli.workspace),
    }
}

fn run_compute(workspace: Option<&std::path::Path>, args: &ComputeArgs) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(&args.input)
        .with_context(|| format!("failed to read {}", args.input.to_string_lossy()))?;
    let input: attainment::EvaluationInput = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not an input document", args.input.to_string_lossy()))?;

    let mut opts = match workspace {
        Some(ws) => setup::load_attainment(&db::open_db(ws)?)?.engine_options(),
        None => attainment::EngineOptions::default(),
    };
    if let Some(t) = args.threshold {
        if !(t > 0.0 && t <= 1.0) {
            anyhow::bail!("--threshold must be in (0, 1], got {t}");
        }
        opts.default_threshold_fraction = t;
    }

    let report = attainment::run(&input, &opts)?;
    let text = serde_json::to_string_pretty(&report)?;
    match &args.out {
        Some(path) => std::fs::write(path, text + "\n")
            .with_context(|| format!("failed to write {}", path.to_string_lossy()))?,
        None => println!("{text}"),
    }
    tracing::info!(
        students = report.summary.total_students,
        questions = report.summary.total_questions,
        "report written"
    );
    Ok(())
}

fn serve(workspace: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let mut state = ipc::AppState::default();
    if let Some(ws) = workspace {
        state.db = Some(db::open_db(&ws)?);
        state.workspace = Some(ws);
    }
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "attaind ready");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id.
                tracing::warn!(error = %e, "unparseable request line");
                let reply = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{reply}");
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    Ok(())
}
