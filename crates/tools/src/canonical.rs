//! Method-name canonicalization: the single source of truth for alias
//! resolution, invoked once by the router before every dispatch.
//!
//! Grounded directly on the canonicalization table in the original alias
//! map (browser/terminal/file synonyms collapsing onto one method name
//! per provider).

/// Resolve `(name, method)` to their canonical forms. The provider name is
/// only lowercased; only the method name is ever remapped, and only for
/// the three providers that carry synonyms.
pub fn canonicalize(name: &str, method: &str) -> (String, String) {
    let name = name.trim().to_ascii_lowercase();
    let method = method.trim().to_ascii_lowercase();

    let canonical_method = match name.as_str() {
        "browser" => match method.as_str() {
            "fetch" | "get" | "get_url" | "download" | "httpget" => "http_get".to_string(),
            other => other.to_string(),
        },
        "terminal" => match method.as_str() {
            "exec" | "run" | "cmd" => "run_cmd".to_string(),
            other => other.to_string(),
        },
        "file" => match method.as_str() {
            "read" => "read_text".to_string(),
            "write" => "write_text".to_string(),
            "ls" | "dir" => "list_dir".to_string(),
            "mkdir" => "mkdirs".to_string(),
            other => other.to_string(),
        },
        _ => method,
    };

    (name, canonical_method)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn browser_aliases_collapse_to_http_get() {
        for alias in ["fetch", "get", "get_url", "download", "httpget"] {
            let (n, m) = canonicalize("browser", alias);
            assert_eq!(n, "browser");
            assert_eq!(m, "http_get");
        }
    }

    #[test]
    fn terminal_aliases_collapse_to_run_cmd() {
        for alias in ["exec", "run", "cmd"] {
            let (_, m) = canonicalize("terminal", alias);
            assert_eq!(m, "run_cmd");
        }
    }

    #[test]
    fn file_aliases_collapse_per_operation() {
        assert_eq!(canonicalize("file", "read").1, "read_text");
        assert_eq!(canonicalize("file", "write").1, "write_text");
        assert_eq!(canonicalize("file", "ls").1, "list_dir");
        assert_eq!(canonicalize("file", "dir").1, "list_dir");
        assert_eq!(canonicalize("file", "mkdir").1, "mkdirs");
    }

    #[test]
    fn unrelated_provider_methods_pass_through_lowercased() {
        let (n, m) = canonicalize("Ping", "GET");
        assert_eq!(n, "ping");
        assert_eq!(m, "get");
    }

    #[test]
    fn already_canonical_methods_are_unchanged() {
        assert_eq!(canonicalize("browser", "http_get").1, "http_get");
        assert_eq!(canonicalize("terminal", "run_cmd").1, "run_cmd");
    }
}
