use colored::Colorize;
use std::fmt::Display;

const RULE: &str = "----------------------";

/// Colored console output that `--quiet` can silence. Errors go to stderr
/// regardless.
#[derive(Debug, Clone, Copy, Default)]
pub struct Console {
    quiet: bool,
}

impl Console {
    pub fn new(quiet: bool) -> Self {
        Console { quiet }
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    pub fn rule(&self) {
        if !self.quiet {
            println!("{}", RULE.dimmed());
        }
    }

    pub fn heading(&self, msg: impl Display) {
        if !self.quiet {
            println!("{}", msg.to_string().green().bold());
        }
    }

    pub fn info(&self, msg: impl Display) {
        if !self.quiet {
            println!("{}", msg);
        }
    }

    pub fn progress(&self, msg: impl Display) {
        if !self.quiet {
            println!("{}", msg.to_string().blue());
        }
    }

    pub fn warn(&self, msg: impl Display) {
        if !self.quiet {
            println!("{}", msg.to_string().yellow());
        }
    }

    pub fn danger(&self, msg: impl Display) {
        if !self.quiet {
            println!("{}", msg.to_string().red());
        }
    }

    pub fn error(&self, msg: impl Display) {
        eprintln!("{}: {}", "error".red().bold(), msg);
    }
}
