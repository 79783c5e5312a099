mod commands;

use clap::Parser;
use commands::Cli;

fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));
    commands::run(Cli::parse())
}
