use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "tilevault",
    about = "Delete partial tiles superseded by full tiles in local log directories",
    version
)]
pub struct Cli {
    /// Path to the YAML config listing the logs
    #[arg(short, long, default_value = "tilevault.yaml")]
    pub config: PathBuf,

    /// Log every removed file and directory
    #[arg(short, long)]
    pub verbose: bool,
}
