//! Output helpers shared by every subcommand.
//!
//! Global flags are passed through the environment (`CATALOGUE_JSON`,
//! `CATALOGUE_QUIET`, `CATALOGUE_NO_COLOR`) so any module
//! can check them without threading arguments through.

use std::io::IsTerminal;

fn flag(name: &str) -> bool {
    std::env::var(name).map(|v| v == "1").unwrap_or(false)
}

pub fn is_json() -> bool {
    flag("CATALOGUE_JSON")
}

pub fn is_quiet() -> bool {
    flag("CATALOGUE_QUIET")
}

/// Print a JSON value to stdout, pretty-printed.
pub fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("  failed to serialize output: {e}"),
    }
}

/// Status symbols, coloured when stderr is a terminal.
pub struct Styled {
    color: bool,
}

impl Styled {
    pub fn new() -> Self {
        Self {
            color: !flag("CATALOGUE_NO_COLOR") && std::io::stderr().is_terminal(),
        }
    }

    fn paint(&self, code: &str, text: &str) -> String {
        if self.color {
            format!("\x1b[{code}m{text}\x1b[0m")
        } else {
            text.to_string()
        }
    }

    pub fn ok_sym(&self) -> String {
        self.paint("32", "✓")
    }

    pub fn fail_sym(&self) -> String {
        self.paint("31", "✗")
    }

    pub fn warn_sym(&self) -> String {
        self.paint("33", "!")
    }

    pub fn dim(&self, text: &str) -> String {
        self.paint("2", text)
    }
}

impl Default for Styled {
    fn default() -> Self {
        Self::new()
    }
}
