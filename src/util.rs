//! Shared utility functions used across the codebase.

/// Parse an environment variable as a boolean, returning `default` if unset.
///
/// Recognises `1`, `true`, `yes`, `y`, `on` (case-insensitive) as `true`;
/// everything else maps to `false`.
pub fn env_var_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => parse_bool(&value),
        Err(_) => default,
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

/// Lowercase a query and check whether any of `keywords` occurs in it.
pub fn contains_any(text: &str, keywords: &[&str]) -> bool {
    let lower = text.to_lowercase();
    keywords.iter().any(|k| lower.contains(k))
}

/// Split a query into lowercase terms longer than two characters.
pub fn query_terms(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric() && c != '-')
        .filter(|t| t.chars().count() > 2)
        .map(|t| t.to_lowercase())
        .collect()
}

/// Round a score to three decimal places.
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Truncate `s` to at most `max_chars` characters, appending `...` when cut.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let cut: String = s.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bool_accepts_common_truthy_values() {
        for value in ["1", "true", "YES", " on ", "y"] {
            assert!(parse_bool(value), "{value} should be truthy");
        }
        for value in ["0", "false", "off", ""] {
            assert!(!parse_bool(value), "{value} should be falsy");
        }
    }

    #[test]
    fn query_terms_drops_short_words() {
        let terms = query_terms("What is the best treatment for type-2 diabetes?");
        assert_eq!(
            terms,
            vec!["what", "the", "best", "treatment", "for", "type-2", "diabetes"]
        );
    }

    #[test]
    fn contains_any_is_case_insensitive() {
        assert!(contains_any("Latest MEDICAL news", &["medical"]));
        assert!(!contains_any("weather today", &["medical", "health"]));
    }

    #[test]
    fn truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo wörld", 5), "héllo...");
        assert_eq!(truncate_chars("short", 10), "short");
    }

    #[test]
    fn round3_rounds_half_up() {
        assert_eq!(round3(0.12345), 0.123);
        assert_eq!(round3(0.9996), 1.0);
    }
}
