//! Filename sanitization for storage keys
//!
//! Uploaded filenames come straight from municipal staff browsers and
//! routinely contain spaces, parentheses, unicode punctuation, and path
//! separators. Everything that lands in a blob storage key goes through
//! [`sanitize_filename`] first.

/// Longest sanitized filename we will emit, extension included.
const MAX_FILENAME_LEN: usize = 120;

/// Normalize a user-supplied filename into a storage-safe one.
///
/// Keeps ASCII alphanumerics plus `.`, `_`, and `-`; every run of other
/// characters collapses to a single `_`. The extension (final dot segment)
/// is preserved, and long names are truncated from the base so the result
/// never exceeds [`MAX_FILENAME_LEN`]. Never fails: the worst input
/// collapses to underscores plus whatever extension survived.
///
/// Idempotent: sanitizing a sanitized name returns it unchanged.
pub fn sanitize_filename(name: &str) -> String {
    let (base, ext) = split_extension(name);

    let mut out = String::with_capacity(base.len());
    let mut in_run = false;
    for c in base.chars() {
        if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('_');
            in_run = true;
        }
    }

    let ext = ext.map(|e| {
        e.chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
    });

    // The length cap covers the dot and extension too.
    let ext_len = ext.as_ref().map(|e| e.len() + 1).unwrap_or(0);
    let max_base = MAX_FILENAME_LEN.saturating_sub(ext_len);
    if out.len() > max_base {
        out.truncate(max_base);
    }

    match ext {
        Some(e) if !e.is_empty() => format!("{}.{}", out, e),
        _ => out,
    }
}

/// Split `name` into base and extension at the last dot.
///
/// A leading dot (hidden-file style) or a trailing dot does not count as
/// an extension separator.
fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(idx) if idx > 0 && idx < name.len() - 1 => {
            (&name[..idx], Some(&name[idx + 1..]))
        }
        _ => (name, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_name_unchanged() {
        assert_eq!(sanitize_filename("violations.csv"), "violations.csv");
        assert_eq!(sanitize_filename("report_2024-07.csv"), "report_2024-07.csv");
    }

    #[test]
    fn test_spaces_and_parens_collapse() {
        assert_eq!(
            sanitize_filename("Phoenix Violations (July).csv"),
            "Phoenix_Violations_July_.csv"
        );
    }

    #[test]
    fn test_run_of_bad_chars_collapses_to_one_underscore() {
        assert_eq!(sanitize_filename("a   b.csv"), "a_b.csv");
        assert_eq!(sanitize_filename("a/../b.csv"), "a_.._b.csv");
        assert_eq!(sanitize_filename("city\u{00e9}\u{00e9}data.csv"), "city_data.csv");
    }

    #[test]
    fn test_extension_preserved_on_truncation() {
        let long = format!("{}.csv", "x".repeat(300));
        let sanitized = sanitize_filename(&long);
        assert!(sanitized.len() <= MAX_FILENAME_LEN);
        assert!(sanitized.ends_with(".csv"));
    }

    #[test]
    fn test_idempotent() {
        let inputs = [
            "Phoenix Violations (July).csv",
            "weird!!name??.TSV",
            "  leading spaces.csv",
            "no_extension",
            "...",
        ];
        for input in inputs {
            let once = sanitize_filename(input);
            let twice = sanitize_filename(&once);
            assert_eq!(once, twice, "not idempotent for {:?}", input);
        }
    }

    #[test]
    fn test_never_fails_on_garbage() {
        assert_eq!(sanitize_filename("???"), "_");
        assert_eq!(sanitize_filename("???.csv"), "_.csv");
        assert_eq!(sanitize_filename(""), "");
    }

    #[test]
    fn test_hidden_file_dot_not_extension() {
        assert_eq!(sanitize_filename(".env"), ".env");
    }
}
