//! Shared utility functions used across multiple modules.

use crate::error::{Error, Result};

/// Normalize optional text by trimming whitespace and removing empties.
///
/// Returns `None` when the input is `None` or the trimmed value is empty.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Trim `value`, rejecting blanks with an error naming `field`.
pub fn required_text(value: impl Into<String>, field: &str) -> Result<String> {
    normalize_text_option(Some(value.into()))
        .ok_or_else(|| Error::InvalidInput(format!("{field} must not be empty")))
}

/// Truncate text to at most 180 characters for log and error messages.
pub fn compact_text(value: &str) -> String {
    value.trim().chars().take(180).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_option_rejects_empty() {
        assert_eq!(normalize_text_option(None), None);
        assert_eq!(normalize_text_option(Some("   ".to_string())), None);
    }

    #[test]
    fn required_text_trims_and_names_field() {
        assert_eq!(required_text(" v1 ", "video_id").unwrap(), "v1");
        let err = required_text("  ", "user_id").unwrap_err();
        assert!(err.to_string().contains("user_id"));
    }

    #[test]
    fn compact_text_truncates() {
        let long = "x".repeat(500);
        assert_eq!(compact_text(&long).len(), 180);
    }
}
