//! Console status reports and the boot banner. Nothing here carries state
//! beyond what a line of terminal output needs.

use crate::{error::Outcome, logging};

pub const COLOR_RED: &str = "\x1b[31m";
pub const COLOR_GREEN: &str = "\x1b[32m";
pub const COLOR_YELLOW: &str = "\x1b[33m";
pub const COLOR_CYAN: &str = "\x1b[36m";
pub const COLOR_MAGENTA: &str = "\x1b[35m";
pub const END_COLOR: &str = "\x1b[0m";

/// Prints the "Starting foo..." half of a status line, without a newline so
/// the completion tag lands on the same line.
pub fn begin_status_report(text: &str) {
    print!("{text}... ");
    use std::io::Write;
    let _ = std::io::stdout().flush();
}

/// Completes a status line with the outcome tag, optionally logging it.
pub fn complete_status_report(text: &str, outcome: Outcome, log: bool) {
    let tag = match outcome {
        Outcome::Success => format!("{COLOR_GREEN}Done{END_COLOR}"),
        Outcome::Warning => format!("{COLOR_YELLOW}Warn{END_COLOR}"),
        Outcome::Failure => format!("{COLOR_RED}Failed{END_COLOR}"),
    };
    println!("[{tag}]");
    if log {
        logging::write_line(&format!("{text}: {outcome}"));
    }
}

/// Resolves a config color name to its escape sequence.
pub fn color_by_name(name: &str) -> Option<&'static str> {
    Some(match name.to_ascii_uppercase().as_str() {
        "RED" => COLOR_RED,
        "GREEN" => COLOR_GREEN,
        "YELLOW" => COLOR_YELLOW,
        "CYAN" => COLOR_CYAN,
        "MAGENTA" => COLOR_MAGENTA,
        _ => return None,
    })
}

/// Prints the configured boot banner, if any.
pub fn print_boot_banner(text: Option<&str>, color: Option<&str>) {
    let Some(text) = text else {
        return;
    };
    match color.and_then(color_by_name) {
        Some(escape) => println!("{escape}{text}{END_COLOR}"),
        None => println!("{text}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colors_resolve_case_insensitively() {
        assert_eq!(color_by_name("red"), Some(COLOR_RED));
        assert_eq!(color_by_name("CYAN"), Some(COLOR_CYAN));
        assert_eq!(color_by_name("mauve"), None);
    }
}
