//! CLI entry point for elan.

use clap::Parser;
use cli::Config;

fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    config.run()
}
