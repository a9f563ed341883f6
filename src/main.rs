use clap::Parser;
use quantrader::cli::{Cli, run};

fn main() -> std::process::ExitCode {
    run(Cli::parse())
}
