//! CLI entry point for the sigil structure-preservation pipeline

use clap::Parser;
use sigilguard::io::cli::{Cli, CommandRunner, init_tracing};

fn main() -> sigilguard::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    CommandRunner::new(cli).run()
}
