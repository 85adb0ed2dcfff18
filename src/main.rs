use std::fs;

use clap::Parser;
use color_eyre::eyre;
use log::info;

use citygml_tools::cli::Cli;
use citygml_tools::config::Config;
use citygml_tools::driver;

fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    env_logger::builder()
        .filter_level(cli.log_level.to_filter())
        .target(match &cli.log_file {
            Some(path) => env_logger::Target::Pipe(Box::new(
                fs::OpenOptions::new().create(true).append(true).open(path)?,
            )),
            None => env_logger::Target::Stderr,
        })
        .init();

    if let Some(pid_file) = &cli.pid_file {
        fs::write(pid_file, std::process::id().to_string())?;
    }

    let mut config = match &cli.config {
        Some(path) => Config::from_toml_file(path)?,
        None => Config::default(),
    };
    if let Some(dir) = &cli.extensions {
        config.load_extensions(dir)?;
    }

    let start = std::time::Instant::now();
    let stats = driver::run(cli, &config)?;
    let elapsed = start.elapsed();

    info!(
        "processed {} file(s) in {:.2?}: {} warning(s), {} error(s)",
        stats.files_processed, elapsed, stats.warnings, stats.errors
    );
    println!(
        "done: {} file(s) processed, {} warning(s), {} error(s) in {:.2?}",
        stats.files_processed, stats.warnings, stats.errors, elapsed
    );

    if stats.errors > 0 {
        std::process::exit(1);
    }
    if stats.warnings > 0 {
        std::process::exit(3);
    }
    Ok(())
}
