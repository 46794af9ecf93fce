// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use clap::Parser;
use dss_cli::{Cli, error_envelope, execute, init_tracing};
use std::process;

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());
    if let Err(err) = execute(cli) {
        eprintln!("{}", error_envelope(&err));
        process::exit(1);
    }
}
