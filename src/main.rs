//! libmig: migrate a Python project between libraries with an LLM.
//!
//! The binary rewrites every file that imports the source library, swaps the
//! requirement, and runs the project's tests before and after so that
//! regressions can be fed back for repair. Everything it produces lives
//! under the output directory.
mod cache;
mod cli;
mod completion;
mod discovery;
mod llm;
mod requirements;
mod staging;
mod state;
mod testing;
mod util;
mod workflow;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "libmig=info";

fn main() -> Result<()> {
    let args = cli::Args::parse();
    init_tracing();

    if args.show_completion {
        return completion::show_completion();
    }
    if args.install_completion {
        return completion::install_completion();
    }
    workflow::run_migration(&args)
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
