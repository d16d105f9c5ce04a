//! Terminal helpers for the CLI.

use std::io::{self, IsTerminal};

/// Print a status line to stderr when it is a terminal. Stdout is reserved
/// for the JSON envelope.
pub fn status(message: &str) {
    if io::stderr().is_terminal() {
        eprintln!("{}", message);
    }
}

// log_status! macro is defined in lib.rs (#[macro_export]) and available crate-wide.
