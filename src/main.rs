use clap::Parser;
use shortbot::cli::{run, Cli};

fn main() -> std::process::ExitCode {
    run(Cli::parse())
}
