use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "attaind", version, about = "CO/PO outcome attainment engine")]
pub struct Cli {
    #[arg(long, global = true, help = "Workspace directory to open at startup")]
    pub workspace: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        help = "Log filter, e.g. info or attaind=debug (overrides ATTAIND_LOG)"
    )]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Answer JSON-lines requests on stdin (default).
    Serve,
    /// Compute one input document and exit.
    Compute(ComputeArgs),
}

#[derive(Debug, Args)]
pub struct ComputeArgs {
    #[arg(long, help = "Engine input document (JSON)")]
    pub input: PathBuf,

    #[arg(long, help = "Write the report here instead of stdout")]
    pub out: Option<PathBuf>,

    #[arg(long, help = "Default threshold fraction for questions without one")]
    pub threshold: Option<f64>,
}
