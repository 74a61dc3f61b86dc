//! JQL construction. User text only ever reaches Jira inside a quoted,
//! escaped string literal.

/// Quote `value` as a JQL string literal.
///
/// Backslashes and double quotes are backslash-escaped; control characters
/// (newlines included) are replaced by spaces so the literal stays on one line.
pub fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for ch in value.chars() {
        match ch {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            c if c.is_control() => quoted.push(' '),
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

/// Free-text search limited to `space_keys`, newest first.
pub fn text_search(query: &str, space_keys: &[String]) -> String {
    let mut jql = format!("text ~ {}", quote(query));
    if !space_keys.is_empty() {
        let keys = space_keys
            .iter()
            .map(|key| quote(key))
            .collect::<Vec<_>>()
            .join(", ");
        jql.push_str(&format!(" AND project in ({keys})"));
    }
    jql.push_str(" ORDER BY created DESC");
    jql
}
