//! Command-line entry point for kerneltune.

use anyhow::Result;
use clap::Parser;
use kerneltune_driver::cli::{run_cli, Cli};

fn main() -> Result<()> {
    let cli = Cli::parse();
    run_cli(cli)
}
