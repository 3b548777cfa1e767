use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "himawari", version, about = "Himawari-8 imagery ingestion")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the HTTP server (default if no subcommand given).
    Serve {
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Overrides `PORT`.
        #[arg(long)]
        port: Option<u16>,
    },

    /// Run one ingestion batch and print its report as JSON.
    Ingest,

    /// Write the newest rendered image to a file (or stdout).
    Latest {
        /// Only consider images of this sector (7, 8 or 9).
        #[arg(long)]
        sector: Option<u8>,

        /// Output file; stdout when omitted.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// List stored artifacts as JSON.
    Stats,

    /// Delete objects past their retention and print the counts as JSON.
    Sweep,
}
