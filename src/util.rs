/// Replacement for names that sanitize to nothing usable.
const FALLBACK_FILE_NAME: &str = "track";

/// Turns an arbitrary track label into a single path component.
///
/// Path separators of every platform and NUL are removed. A name that ends up
/// blank, `.` or `..` is replaced with a fixed fallback, so the result can
/// always be joined onto a directory without escaping it.
///
/// # Examples
///
/// ```rust
/// assert_eq!(sanitize_file_name("3. Artist / Title"), "3. Artist  Title");
/// assert_eq!(sanitize_file_name("//"), "track");
/// ```
#[must_use]
pub fn sanitize_file_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .filter(|chr| !matches!(chr, '/' | '\\' | '\0'))
        .collect();

    match sanitized.trim() {
        "" | "." | ".." => FALLBACK_FILE_NAME.to_owned(),
        _ => sanitized,
    }
}
