//! Download-hierarchy path construction and parsing.
//!
//! Downloaded documents live under a canonical filesystem layout:
//!
//! ```text
//! <download_root>/
//!   <sec_code>_<sanitized_filer_name>/
//!     <doc_type_code>_<doc_type_name>/
//!       <YYYYMM>/
//!         <doc_id>.pdf
//!     ir/
//!       <category>/
//!         <filename from URL>
//! ```
//!
//! Everything here is a pure function over strings and paths; the filesystem is only
//! touched by [`find_document_in_hierarchy`].

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

static INVALID_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#).expect("static pattern"));
static UNDERSCORE_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_+").expect("static pattern"));

/// Maps an EDINET document-type code to its Japanese name.
///
/// Unknown or missing codes map to `"unknown"`, which keeps the hierarchy navigable
/// even for exotic filings.
pub fn doc_type_name(doc_type_code: Option<&str>) -> &'static str {
    match doc_type_code {
        Some("120") => "有価証券報告書",
        Some("130") => "訂正有価証券報告書",
        Some("140") => "四半期報告書",
        Some("150") => "訂正四半期報告書",
        Some("160") => "半期報告書",
        Some("170") => "訂正半期報告書",
        Some("180") => "臨時報告書",
        Some("190") => "訂正臨時報告書",
        Some("350") => "大量保有報告書",
        Some("360") => "訂正大量保有報告書",
        _ => "unknown",
    }
}

/// Sanitizes a string for use as a file or folder name.
///
/// Replaces `< > : " / \ | ? *` and control characters with `_`, collapses runs of
/// underscores, trims whitespace, and falls back to `"unknown"` for empty input.
/// The function is idempotent: `sanitize_filename(sanitize_filename(x)) ==
/// sanitize_filename(x)`.
pub fn sanitize_filename(name: Option<&str>) -> String {
    let Some(name) = name else {
        return "unknown".to_string();
    };

    let replaced = INVALID_CHARS.replace_all(name, "_");
    let collapsed = UNDERSCORE_RUNS.replace_all(&replaced, "_");
    let trimmed = collapsed.trim();

    if trimmed.is_empty() {
        "unknown".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Converts a `YYYY-MM-DD` period-end date to the `YYYYMM` folder name.
///
/// Anything unparsable becomes `"unknown"`.
pub fn parse_period_to_yyyymm(period_end: Option<&str>) -> String {
    let Some(period_end) = period_end else {
        return "unknown".to_string();
    };

    let mut parts = period_end.split('-');
    match (parts.next(), parts.next()) {
        (Some(year), Some(month)) if !year.is_empty() && !month.is_empty() => {
            format!("{year}{month}")
        }
        _ => "unknown".to_string(),
    }
}

/// Builds the hierarchical download path for a filing PDF.
///
/// Missing metadata fields degrade to `"unknown"` segments rather than failing, so a
/// download can always proceed.
///
/// # Example
///
/// ```
/// # use std::path::Path;
/// let path = kaijikit::build_download_path(
///     Path::new("downloads"),
///     Some("72030"),
///     Some("トヨタ自動車株式会社"),
///     Some("120"),
///     Some("2025-03-31"),
///     "S100ABCD",
/// );
/// assert_eq!(
///     path,
///     Path::new("downloads/72030_トヨタ自動車株式会社/120_有価証券報告書/202503/S100ABCD.pdf"),
/// );
/// ```
pub fn build_download_path(
    base_dir: &Path,
    sec_code: Option<&str>,
    filer_name: Option<&str>,
    doc_type_code: Option<&str>,
    period_end: Option<&str>,
    doc_id: &str,
) -> PathBuf {
    let company_folder = format!(
        "{}_{}",
        sec_code.unwrap_or("unknown"),
        sanitize_filename(filer_name)
    );
    let doc_type_folder = format!(
        "{}_{}",
        doc_type_code.unwrap_or("unknown"),
        doc_type_name(doc_type_code)
    );
    let period_folder = parse_period_to_yyyymm(period_end);

    base_dir
        .join(company_folder)
        .join(doc_type_folder)
        .join(period_folder)
        .join(format!("{doc_id}.pdf"))
}

/// Recursively searches the download hierarchy for `<doc_id>.pdf`.
///
/// Returns the first match in directory-walk order, or `None` when the file (or the
/// base directory itself) does not exist.
pub fn find_document_in_hierarchy(base_dir: &Path, doc_id: &str) -> Option<PathBuf> {
    if !base_dir.exists() {
        return None;
    }

    let target = format!("{doc_id}.pdf");
    let mut stack = vec![base_dir.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        let mut subdirs = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                subdirs.push(path);
            } else if path.file_name().is_some_and(|n| n == target.as_str()) {
                return Some(path);
            }
        }
        // Walk subdirectories in name order so the first match is deterministic.
        subdirs.sort();
        stack.extend(subdirs.into_iter().rev());
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_and_collapses() {
        assert_eq!(sanitize_filename(Some("トヨタ/自動車")), "トヨタ_自動車");
        assert_eq!(sanitize_filename(Some("a<b>c:d\"e")), "a_b_c_d_e");
        assert_eq!(sanitize_filename(Some("a//b")), "a_b");
        assert_eq!(sanitize_filename(Some("  spaced  ")), "spaced");
        assert_eq!(sanitize_filename(Some("")), "unknown");
        assert_eq!(sanitize_filename(None), "unknown");
    }

    #[test]
    fn sanitize_is_idempotent() {
        for raw in ["トヨタ/自動車", "a<b>c", "x__y", "   ", "plain"] {
            let once = sanitize_filename(Some(raw));
            let twice = sanitize_filename(Some(&once));
            assert_eq!(once, twice, "not idempotent for {raw:?}");
        }
    }

    #[test]
    fn period_parsing() {
        assert_eq!(parse_period_to_yyyymm(Some("2025-12-31")), "202512");
        assert_eq!(parse_period_to_yyyymm(Some("2025")), "unknown");
        assert_eq!(parse_period_to_yyyymm(None), "unknown");
    }

    #[test]
    fn download_path_uses_unknown_for_missing_fields() {
        let path = build_download_path(Path::new("dl"), None, None, None, None, "S100ABCD");
        assert_eq!(path, Path::new("dl/unknown_unknown/unknown_unknown/unknown/S100ABCD.pdf"));
    }

    #[test]
    fn hierarchy_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = build_download_path(
            dir.path(),
            Some("72030"),
            Some("トヨタ自動車株式会社"),
            Some("120"),
            Some("2025-03-31"),
            "S100ABCD",
        );
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"%PDF-1.4").unwrap();

        let found = find_document_in_hierarchy(dir.path(), "S100ABCD").unwrap();
        assert_eq!(found, path);
        assert!(find_document_in_hierarchy(dir.path(), "S100XXXX").is_none());
    }
}
