//! Fallible pattern matching.

use regex::Regex;

use crate::error::{CompError, CompResult};

/// Match `text` against `pattern`.
///
/// An invalid pattern is reported as a configuration error.
pub fn matches(pattern: &str, text: &str) -> CompResult<bool> {
    let regex = Regex::new(pattern).map_err(|e| CompError::InvalidPattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })?;
    Ok(regex.is_match(text))
}
