use anyhow::Result;
use checkr::cli::Cli;
use std::process::ExitCode;

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    cli.run()
}
