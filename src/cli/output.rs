//! Output formatting for the hostlink CLI
//!
//! Status messages go to stderr so that remote stdout can be piped cleanly.

use colored::Colorize;
use is_terminal::IsTerminal;
use std::io::{self, Write};

/// Output formatter for status and diagnostic messages
pub struct OutputFormatter {
    /// Use colored output
    use_color: bool,
    /// Verbosity level
    verbosity: u8,
}

impl OutputFormatter {
    /// Create a new output formatter
    pub fn new(use_color: bool, verbosity: u8) -> Self {
        // Respect NO_COLOR and plain pipes
        let use_color =
            use_color && std::env::var("NO_COLOR").is_err() && io::stderr().is_terminal();

        Self {
            use_color,
            verbosity,
        }
    }

    /// Print an error message
    pub fn error(&self, message: &str) {
        if self.use_color {
            eprintln!("{} {}", "ERROR:".red().bold(), message);
        } else {
            eprintln!("ERROR: {}", message);
        }
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        if self.use_color {
            eprintln!("{} {}", "WARNING:".yellow().bold(), message);
        } else {
            eprintln!("WARNING: {}", message);
        }
    }

    /// Print an info message (respects verbosity)
    pub fn info(&self, message: &str) {
        if self.verbosity < 1 {
            return;
        }

        if self.use_color {
            eprintln!("{} {}", "INFO:".blue(), message);
        } else {
            eprintln!("INFO: {}", message);
        }
    }

    /// Print `key: value` pairs aligned on the key column
    pub fn fields(&self, rows: &[(&str, &str)]) {
        let width = rows.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
        for (key, value) in rows {
            let key = format!("{:width$}", key, width = width);
            if self.use_color {
                println!("{}  {}", key.bright_white().bold(), value);
            } else {
                println!("{}  {}", key, value);
            }
        }
    }

    /// Flush stdout
    pub fn flush(&self) {
        let _ = io::stdout().flush();
    }
}
