//! Query text conveniences.
//!
//! Users may type a full `SELECT` or just a trailing clause such as
//! `WHERE c.age > 10`. Nothing here parses or validates the query.

/// Query used when the user typed nothing.
pub const SELECT_ALL: &str = "SELECT * FROM c";

/// Page size used when the limit input is absent or unusable.
pub const DEFAULT_PAGE_SIZE: u32 = 10;

const SELECT_KEYWORD: &str = "SELECT";

/// Expands user query text into a complete query.
///
/// Empty text selects everything, text starting with `SELECT` (any case)
/// is used verbatim and anything else is appended to `SELECT * FROM c`.
pub fn build_effective_query(user_text: &str) -> String {
    if user_text.is_empty() {
        return SELECT_ALL.to_string();
    }
    let starts_with_select = user_text
        .get(..SELECT_KEYWORD.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(SELECT_KEYWORD));
    if starts_with_select {
        user_text.to_string()
    } else {
        format!("{SELECT_ALL} {user_text}")
    }
}

/// Parses the page-size input.
///
/// Falls back to [`DEFAULT_PAGE_SIZE`] when the input is missing, not a
/// 32-bit integer, or not positive. No upper bound is applied here.
pub fn parse_limit(input: Option<&str>) -> u32 {
    input
        .and_then(|raw| raw.trim().parse::<i32>().ok())
        .filter(|value| *value > 0)
        .map(|value| value as u32)
        .unwrap_or(DEFAULT_PAGE_SIZE)
}
