//! Entry point for the keel plugin host daemon.

use std::io::{self, Write};
use std::process::ExitCode;

fn main() -> ExitCode {
    match keeld::run_host() {
        Ok(_) => ExitCode::SUCCESS,
        Err(error) => {
            writeln!(io::stderr(), "keeld: {error}").ok();
            ExitCode::FAILURE
        }
    }
}
