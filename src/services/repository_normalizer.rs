//! Repository URL normalization (§4.5). Accepts three input forms and
//! produces one canonical `https://github.com/<owner>/<repo>` form.

/// Normalize a user-supplied repository reference to canonical form.
///
/// - `owner/repo` -> prepend `https://github.com/`
/// - `github.com/owner/repo` -> prepend `https://`
/// - anything starting with `http` -> passed through unchanged
pub fn normalize_repository(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.starts_with("http") {
        trimmed.to_string()
    } else if trimmed.starts_with("github.com/") {
        format!("https://{trimmed}")
    } else {
        format!("https://github.com/{trimmed}")
    }
}
