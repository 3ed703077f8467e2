//! Console output in the `INFO` / `WARNING` / `ERROR` style used throughout the tool.

use std::fmt::Display;

use colored::Colorize;

pub fn info(msg: impl Display) {
    println!("{} {}", "INFO".blue().bold(), msg);
}

pub fn warning(msg: impl Display) {
    println!("{} {}", "WARNING".yellow().bold(), msg);
}

pub fn error(msg: impl Display) {
    eprintln!("{} {}", "ERROR".red().bold(), msg);
}

/// Echoes a resolved setting, e.g. `INFO Request rate: 4`.
pub fn setting(name: &str, value: impl Display) {
    println!(
        "{} {}: {}",
        "INFO".blue().bold(),
        name,
        value.to_string().green().bold()
    );
}

/// Announces that a setting fell back to its default.
pub fn defaulted(name: &str, value: impl Display) {
    println!(
        "{} {} not specified. Defaulting to {}",
        "WARNING".yellow().bold(),
        name,
        value
    );
}

pub fn rule() {
    println!("-------------------------------------------------");
}

/// Shortens a completion to `first 50 ... last 50` characters on one line.
pub fn abbreviate(text: &str) -> String {
    let flat = text.replace(['\n', '\r'], " ");
    let count = flat.chars().count();
    if count <= 100 {
        return flat;
    }
    format!(
        "{}...{}",
        flat.chars().take(50).collect::<String>(),
        flat.chars().skip(count - 50).collect::<String>()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_flattened_only() {
        assert_eq!(abbreviate("a\nb\rc"), "a b c");
    }

    #[test]
    fn long_text_keeps_both_ends() {
        let text: String = std::iter::repeat('x')
            .take(60)
            .chain(std::iter::repeat('y').take(60))
            .collect();
        let short = abbreviate(&text);
        assert_eq!(short.chars().count(), 103);
        assert!(short.starts_with(&"x".repeat(50)));
        assert!(short.ends_with(&"y".repeat(50)));
    }
}
