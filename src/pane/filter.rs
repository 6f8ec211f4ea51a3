//! Listing filter
//!
//! Plain text matches as a case-insensitive substring. Text containing `*`
//! or `?` is a glob over the whole name, also case-insensitive.

use glob::{MatchOptions, Pattern};

const GLOB_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

pub fn is_glob(filter: &str) -> bool {
    filter.contains('*') || filter.contains('?')
}

pub fn matches_filter(name: &str, filter: &str) -> bool {
    let filter = filter.trim();
    if filter.is_empty() {
        return true;
    }
    if is_glob(filter) {
        return match Pattern::new(filter) {
            Ok(pattern) => pattern.matches_with(name, GLOB_OPTIONS),
            // An unparsable pattern falls back to substring search
            Err(_) => name.to_lowercase().contains(&filter.to_lowercase()),
        };
    }
    name.to_lowercase().contains(&filter.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substring_is_case_insensitive() {
        assert!(matches_filter("Report-2024.PDF", "report"));
        assert!(matches_filter("Report-2024.PDF", ".pdf"));
        assert!(!matches_filter("notes.txt", "pdf"));
        assert!(matches_filter("anything", "  "));
    }

    #[test]
    fn test_glob() {
        assert!(matches_filter("photo.PNG", "*.png"));
        assert!(matches_filter("a1.log", "a?.log"));
        assert!(!matches_filter("photo.png.bak", "*.png"));
        assert!(matches_filter("[*]notes", "[*"));
    }
}
