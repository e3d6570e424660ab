//! File provider: `read_text` / `write_text` / `list_dir` / `mkdirs`,
//! confined to a workspace root.
//!
//! Canonicalize what exists, walk up to the nearest existing ancestor for
//! paths that don't exist yet, then require containment under the root
//! via `starts_with`.

use crate::{Provider, ProviderError};
use async_trait::async_trait;
use sa_domain::tool::ToolErrorKind;
use serde_json::Value;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub struct FileProvider {
    root: PathBuf,
}

impl FileProvider {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl Provider for FileProvider {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn call(&self, method: &str, args: &Value) -> Result<Value, ProviderError> {
        match method {
            "read_text" => self.read_text(args).await,
            "write_text" => self.write_text(args).await,
            "list_dir" => self.list_dir(args).await,
            "mkdirs" => self.mkdirs(args).await,
            other => Err(ProviderError::unknown_method(other)),
        }
    }
}

impl FileProvider {
    async fn read_text(&self, args: &Value) -> Result<Value, ProviderError> {
        let rel = required_str(args, "path")?;
        let resolved = validate_path(&self.root, rel)?;
        let bytes = tokio::fs::read(&resolved).await.map_err(|e| io_err(e, &resolved))?;
        let text = String::from_utf8_lossy(&bytes).into_owned();
        Ok(serde_json::json!({"ok": true, "path": rel, "text": text, "bytes": bytes.len()}))
    }

    async fn write_text(&self, args: &Value) -> Result<Value, ProviderError> {
        let rel = required_str(args, "path")?;
        let text = args
            .get("text")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::invalid_args("missing required field 'text'"))?;
        let resolved = validate_path(&self.root, rel)?;

        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| io_err(e, parent))?;
        }

        let tmp_path = resolved.with_extension(format!("tmp-{}", Uuid::new_v4()));
        tokio::fs::write(&tmp_path, text.as_bytes())
            .await
            .map_err(|e| io_err(e, &tmp_path))?;
        tokio::fs::rename(&tmp_path, &resolved)
            .await
            .map_err(|e| io_err(e, &resolved))?;

        Ok(serde_json::json!({"ok": true, "path": rel, "bytes": text.len()}))
    }

    async fn list_dir(&self, args: &Value) -> Result<Value, ProviderError> {
        let rel = args.get("path").and_then(Value::as_str).unwrap_or(".");
        let resolved = validate_path(&self.root, rel)?;

        let mut entries = Vec::new();
        let mut read_dir = tokio::fs::read_dir(&resolved).await.map_err(|e| io_err(e, &resolved))?;
        while let Some(entry) = read_dir.next_entry().await.map_err(|e| io_err(e, &resolved))? {
            let file_type = entry.file_type().await.map_err(|e| io_err(e, &resolved))?;
            entries.push(serde_json::json!({
                "name": entry.file_name().to_string_lossy(),
                "is_dir": file_type.is_dir(),
            }));
        }
        entries.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));

        Ok(serde_json::json!({"ok": true, "path": rel, "entries": entries}))
    }

    async fn mkdirs(&self, args: &Value) -> Result<Value, ProviderError> {
        let rel = required_str(args, "path")?;
        let resolved = validate_path(&self.root, rel)?;
        tokio::fs::create_dir_all(&resolved).await.map_err(|e| io_err(e, &resolved))?;
        Ok(serde_json::json!({"ok": true, "path": rel}))
    }
}

fn required_str<'a>(args: &'a Value, field: &str) -> Result<&'a str, ProviderError> {
    args.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| ProviderError::invalid_args(format!("missing required field '{field}'")))
}

fn io_err(e: std::io::Error, path: &Path) -> ProviderError {
    ProviderError::new(
        ToolErrorKind::ToolException,
        serde_json::json!({"path": path.display().to_string(), "message": e.to_string()}),
    )
}

/// Confine `relative` under `root`: reject absolute input paths and raw
/// `..` components, then canonicalize the nearest existing ancestor and
/// verify the fully-joined path stays within `root`.
fn validate_path(root: &Path, relative: &str) -> Result<PathBuf, ProviderError> {
    let rel_path = Path::new(relative);
    if rel_path.is_absolute() {
        return Err(permission_err(relative, "absolute paths are not allowed"));
    }
    if rel_path
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err(permission_err(relative, "path must not contain '..'"));
    }

    let canonical_root = root
        .canonicalize()
        .map_err(|_| permission_err(relative, "workspace root does not exist"))?;
    let candidate = canonical_root.join(rel_path);

    let mut to_check = candidate.clone();
    let resolved_ancestor = loop {
        match to_check.canonicalize() {
            Ok(p) => break p,
            Err(_) => {
                if !to_check.pop() {
                    return Err(permission_err(relative, "no existing ancestor directory"));
                }
            }
        }
    };

    let resolved_full = if resolved_ancestor == to_check {
        resolved_ancestor
    } else {
        let suffix = candidate.strip_prefix(&to_check).unwrap_or(&candidate);
        resolved_ancestor.join(suffix)
    };

    if !resolved_full.starts_with(&canonical_root) {
        return Err(permission_err(relative, "path escapes workspace root"));
    }

    Ok(candidate)
}

fn permission_err(path: &str, reason: &str) -> ProviderError {
    ProviderError::new(
        ToolErrorKind::PermissionError,
        serde_json::json!({"path": path, "reason": reason}),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FileProvider::new(dir.path().to_path_buf());

        provider
            .write_text(&serde_json::json!({"path": "notes/a.txt", "text": "hello"}))
            .await
            .unwrap();
        let result = provider
            .read_text(&serde_json::json!({"path": "notes/a.txt"}))
            .await
            .unwrap();
        assert_eq!(result["text"], "hello");
    }

    #[tokio::test]
    async fn rejects_absolute_path() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FileProvider::new(dir.path().to_path_buf());
        let err = provider
            .read_text(&serde_json::json!({"path": "/etc/passwd"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::PermissionError);
    }

    #[tokio::test]
    async fn rejects_parent_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FileProvider::new(dir.path().to_path_buf());
        let err = provider
            .read_text(&serde_json::json!({"path": "../outside.txt"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::PermissionError);
    }

    #[tokio::test]
    async fn mkdirs_then_list_dir_shows_sorted_entries() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FileProvider::new(dir.path().to_path_buf());

        provider.mkdirs(&serde_json::json!({"path": "sub"})).await.unwrap();
        provider
            .write_text(&serde_json::json!({"path": "b.txt", "text": "x"}))
            .await
            .unwrap();
        provider
            .write_text(&serde_json::json!({"path": "a.txt", "text": "x"}))
            .await
            .unwrap();

        let result = provider.list_dir(&serde_json::json!({"path": "."})).await.unwrap();
        let names: Vec<String> = result["entries"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "sub"]);
    }

    #[tokio::test]
    async fn read_missing_file_reports_tool_exception() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FileProvider::new(dir.path().to_path_buf());
        let err = provider
            .read_text(&serde_json::json!({"path": "missing.txt"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::ToolException);
    }
}
