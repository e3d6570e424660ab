//! Shared sanitization helpers for values that become filesystem paths.

/// Strip every character that is not alphanumeric, `-`, `_`, or `.`.
/// Used for session ids (conversation log filenames) and plan ids
/// (checkpoint filenames).
pub fn sanitize_id(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_' || *c == '.')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_allowed_chars() {
        assert_eq!(sanitize_id("abc-123_def.txt"), "abc-123_def.txt");
    }

    #[test]
    fn strips_path_traversal() {
        assert_eq!(sanitize_id("../../etc/passwd"), "......etcpasswd");
    }

    #[test]
    fn strips_slashes_and_spaces() {
        assert_eq!(sanitize_id("my session/1"), "mysession1");
    }
}
