use std::process::ExitCode;

use ansi_term::Colour;
use nannybot::cli::run_cli;
use tracing::error;

fn main() -> ExitCode {
    match run_cli() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Error running nannybot {e:?}");
            eprintln!("{} {e:#}", Colour::Red.bold().paint("error:"));
            ExitCode::FAILURE
        }
    }
}
