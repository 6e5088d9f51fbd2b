//! Per-platform content shaping
//!
//! Lengths are measured in Unicode scalar values (`char`s), the same unit the
//! platform character limits are expressed in.

/// Marker appended to truncated text
pub const ELLIPSIS: &str = "...";

const ELLIPSIS_LEN: usize = 3;

/// Shorten `content` to fit a platform's character limit
///
/// A limit of 0 means unlimited. Content within the limit is returned
/// unchanged. Otherwise the first `limit` characters are kept and, when that
/// leaves at least three characters, the last three are replaced with
/// [`ELLIPSIS`], so the result is never longer than `limit`.
///
/// ```
/// use libcrosscast::content::truncate_for_limit;
///
/// assert_eq!(truncate_for_limit("abcdefghijk", 10), "abcdefg...");
/// assert_eq!(truncate_for_limit("short", 10), "short");
/// assert_eq!(truncate_for_limit("anything", 0), "anything");
/// ```
pub fn truncate_for_limit(content: &str, limit: usize) -> String {
    if limit == 0 || content.chars().count() <= limit {
        return content.to_string();
    }

    let kept: String = content.chars().take(limit).collect();
    if limit < ELLIPSIS_LEN {
        return kept;
    }

    let mut shortened: String = kept.chars().take(limit - ELLIPSIS_LEN).collect();
    shortened.push_str(ELLIPSIS);
    shortened
}

/// Whether [`truncate_for_limit`] would change `content`
pub fn needs_truncation(content: &str, limit: usize) -> bool {
    limit > 0 && content.chars().count() > limit
}
