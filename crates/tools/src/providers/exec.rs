//! Subprocess Runner (C8): `terminal.run_cmd`, a single-shot, non-shell
//! command execution with a confined working directory and an executable
//! allowlist.
//!
//! Capped output capture and a timeout race against the child, but
//! deliberately no `sh -c` invocation and no persistent session or
//! background-monitor machinery — one command in, one result out.

use crate::{Provider, ProviderError};
use async_trait::async_trait;
use sa_domain::tool::ToolErrorKind;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

pub struct ExecProvider {
    allowlist: Vec<String>,
    default_timeout_sec: u64,
    max_output_bytes: usize,
    base_dir: PathBuf,
}

impl ExecProvider {
    pub fn new(
        allowlist: Vec<String>,
        default_timeout_sec: u64,
        max_output_bytes: usize,
        base_dir: PathBuf,
    ) -> Self {
        Self {
            allowlist: allowlist.into_iter().map(|s| s.to_ascii_lowercase()).collect(),
            default_timeout_sec,
            max_output_bytes,
            base_dir,
        }
    }
}

#[async_trait]
impl Provider for ExecProvider {
    fn name(&self) -> &'static str {
        "terminal"
    }

    async fn call(&self, method: &str, args: &Value) -> Result<Value, ProviderError> {
        match method {
            "run_cmd" => self.run_cmd(args).await,
            other => Err(ProviderError::unknown_method(other)),
        }
    }
}

impl ExecProvider {
    async fn run_cmd(&self, args: &Value) -> Result<Value, ProviderError> {
        let cmd_field = args
            .get("cmd")
            .ok_or_else(|| ProviderError::invalid_args("missing required field 'cmd'"))?;

        let timeout_sec = args
            .get("timeout_sec")
            .and_then(Value::as_u64)
            .unwrap_or(self.default_timeout_sec)
            .min(3600);

        // Accept either an argument vector (used verbatim as argv, no
        // tokenizing) or a shell-like string (split via `tokenize`).
        let argv = match cmd_field {
            Value::Array(items) => items
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| "cmd array elements must be strings".to_string())
                })
                .collect::<Result<Vec<String>, String>>()
                .map_err(ProviderError::invalid_args)?,
            Value::String(s) => tokenize(s)
                .map_err(|e| ProviderError::invalid_args(format!("cannot tokenize cmd: {e}")))?,
            _ => return Err(ProviderError::invalid_args("'cmd' must be a string or array of strings")),
        };
        let cmd_str = argv.join(" ");
        let exe = argv
            .first()
            .ok_or_else(|| ProviderError::invalid_args("empty command"))?
            .clone();

        let basename = executable_basename(&exe);
        if !self.allowlist.iter().any(|a| a == &basename) {
            return Err(ProviderError::new(
                ToolErrorKind::ExecutableNotAllowed,
                serde_json::json!({"executable": basename, "allowlist": self.allowlist}),
            ));
        }

        let cwd = match args.get("cwd").and_then(Value::as_str) {
            Some(requested) => validate_cwd(&self.base_dir, requested)
                .map_err(|reason| ProviderError::new(ToolErrorKind::PermissionError, serde_json::json!({"reason": reason})))?,
            None => self.base_dir.clone(),
        };

        let mut command = Command::new(&exe);
        command
            .args(&argv[1..])
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(env_overrides) = args.get("env").and_then(Value::as_object) {
            for (key, value) in env_overrides {
                match value {
                    Value::Null => {
                        command.env_remove(key);
                    }
                    Value::String(s) => {
                        command.env(key, s);
                    }
                    Value::Number(n) => {
                        command.env(key, n.to_string());
                    }
                    Value::Bool(b) => {
                        command.env(key, b.to_string());
                    }
                    other => {
                        return Err(ProviderError::invalid_args(format!(
                            "env var '{key}' must be a scalar, got {other}"
                        )))
                    }
                }
            }
        }

        let mut child = command.spawn().map_err(|e| {
            ProviderError::new(
                ToolErrorKind::ToolException,
                serde_json::json!({"message": format!("failed to spawn {exe}: {e}")}),
            )
        })?;

        let mut stdout_pipe = child.stdout.take().expect("piped stdout");
        let mut stderr_pipe = child.stderr.take().expect("piped stderr");
        let max_output_bytes = self.max_output_bytes;

        let stdout_task = tokio::spawn(async move { read_capped(&mut stdout_pipe, max_output_bytes).await });
        let stderr_task = tokio::spawn(async move { read_capped(&mut stderr_pipe, max_output_bytes).await });

        let wait_result = tokio::time::timeout(Duration::from_secs(timeout_sec), child.wait()).await;

        let (stdout_bytes, stdout_truncated) = stdout_task.await.unwrap_or_default();
        let (stderr_bytes, stderr_truncated) = stderr_task.await.unwrap_or_default();
        let stdout = String::from_utf8_lossy(&stdout_bytes).into_owned();
        let stderr = String::from_utf8_lossy(&stderr_bytes).into_owned();

        match wait_result {
            Ok(Ok(status)) => Ok(serde_json::json!({
                "ok": true,
                "exe": basename,
                "cmd": cmd_str,
                "cwd": cwd.display().to_string(),
                "returncode": status.code(),
                "stdout": stdout,
                "stderr": stderr,
                "stdout_truncated": stdout_truncated,
                "stderr_truncated": stderr_truncated,
            })),
            Ok(Err(e)) => Err(ProviderError::new(
                ToolErrorKind::ToolException,
                serde_json::json!({"message": e.to_string()}),
            )),
            Err(_) => {
                let _ = child.start_kill();
                Err(ProviderError::new(
                    ToolErrorKind::Timeout,
                    serde_json::json!({
                        "timeout_sec": timeout_sec,
                        "stdout": stdout,
                        "stderr": stderr,
                        "stdout_truncated": stdout_truncated,
                        "stderr_truncated": stderr_truncated,
                    }),
                ))
            }
        }
    }
}

async fn read_capped(pipe: &mut (impl AsyncReadExt + Unpin), max_bytes: usize) -> (Vec<u8>, bool) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if buf.len() > max_bytes {
                    buf.truncate(max_bytes);
                    return (buf, true);
                }
            }
            Err(_) => break,
        }
    }
    (buf, false)
}

fn executable_basename(exe: &str) -> String {
    let base = Path::new(exe)
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| exe.to_string());
    let base = base.to_ascii_lowercase();
    base.strip_suffix(".exe").map(str::to_string).unwrap_or(base)
}

/// POSIX-ish tokenizer: whitespace-separated words, single/double quoting,
/// backslash escapes. No glob expansion, no variable substitution, no
/// pipelines or redirection — those are shell features this runner
/// deliberately does not provide.
fn tokenize(input: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut has_current = false;
    let mut chars = input.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                } else if c == '\\' && q == '"' {
                    if let Some(&next) = chars.peek() {
                        if next == '"' || next == '\\' {
                            current.push(next);
                            chars.next();
                            continue;
                        }
                    }
                    current.push(c);
                } else {
                    current.push(c);
                }
            }
            None => match c {
                ' ' | '\t' | '\n' => {
                    if has_current {
                        tokens.push(std::mem::take(&mut current));
                        has_current = false;
                    }
                }
                '\'' | '"' => {
                    quote = Some(c);
                    has_current = true;
                }
                '\\' => {
                    if let Some(next) = chars.next() {
                        current.push(next);
                        has_current = true;
                    }
                }
                other => {
                    current.push(other);
                    has_current = true;
                }
            },
        }
    }

    if quote.is_some() {
        return Err("unterminated quote".to_string());
    }
    if has_current {
        tokens.push(current);
    }
    Ok(tokens)
}

/// Resolve `requested` against `base_dir`, rejecting any path that escapes
/// it. Mirrors the containment check used for workspace-confined file
/// operations: canonicalize what exists, walk up to the nearest existing
/// ancestor otherwise, then verify containment with `starts_with`.
fn validate_cwd(base_dir: &Path, requested: &str) -> Result<PathBuf, String> {
    let candidate = if Path::new(requested).is_absolute() {
        PathBuf::from(requested)
    } else {
        base_dir.join(requested)
    };

    let root = base_dir
        .canonicalize()
        .map_err(|e| format!("base dir does not exist: {e}"))?;

    let mut to_check = candidate.clone();
    let resolved = loop {
        match to_check.canonicalize() {
            Ok(p) => break p,
            Err(_) => {
                if !to_check.pop() {
                    return Err("path has no existing ancestor".to_string());
                }
            }
        }
    };

    let resolved_full = if resolved == to_check {
        resolved
    } else {
        // an ancestor resolved; reconstruct the full candidate path under it
        let suffix = candidate.strip_prefix(&to_check).unwrap_or(&candidate);
        resolved.join(suffix)
    };

    if !resolved_full.starts_with(&root) {
        return Err(format!(
            "cwd '{}' escapes confined base directory",
            requested
        ));
    }

    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn tokenize_splits_on_whitespace() {
        assert_eq!(tokenize("git status").unwrap(), vec!["git", "status"]);
    }

    #[test]
    fn tokenize_respects_double_quotes() {
        assert_eq!(
            tokenize(r#"git commit -m "hello world""#).unwrap(),
            vec!["git", "commit", "-m", "hello world"]
        );
    }

    #[test]
    fn tokenize_respects_single_quotes() {
        assert_eq!(tokenize("echo 'a b c'").unwrap(), vec!["echo", "a b c"]);
    }

    #[test]
    fn tokenize_rejects_unterminated_quote() {
        assert!(tokenize("echo \"unterminated").is_err());
    }

    #[test]
    fn executable_basename_strips_path_and_exe_suffix() {
        assert_eq!(executable_basename("/usr/bin/Python"), "python");
        assert_eq!(executable_basename(r"C:\Tools\Git.EXE"), "git");
    }

    #[tokio::test]
    async fn run_cmd_rejects_non_allowlisted_executable() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ExecProvider::new(
            vec!["python".to_string()],
            10,
            1_000_000,
            dir.path().to_path_buf(),
        );
        let err = provider
            .run_cmd(&serde_json::json!({"cmd": "rm -rf /"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::ExecutableNotAllowed);
    }

    #[tokio::test]
    async fn run_cmd_executes_allowlisted_echo_like_binary() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ExecProvider::new(
            vec!["echo".to_string()],
            10,
            1_000_000,
            dir.path().to_path_buf(),
        );
        let result = provider
            .run_cmd(&serde_json::json!({"cmd": "echo hello"}))
            .await
            .unwrap();
        assert_eq!(result["ok"], true);
        assert_eq!(result["returncode"], 0);
        assert!(result["stdout"].as_str().unwrap().contains("hello"));
    }

    #[tokio::test]
    async fn run_cmd_accepts_argument_vector() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ExecProvider::new(
            vec!["echo".to_string()],
            10,
            1_000_000,
            dir.path().to_path_buf(),
        );
        let result = provider
            .run_cmd(&serde_json::json!({"cmd": ["echo", "hello world"]}))
            .await
            .unwrap();
        assert_eq!(result["ok"], true);
        assert!(result["stdout"].as_str().unwrap().contains("hello world"));
    }

    #[tokio::test]
    async fn run_cmd_rejects_cwd_escaping_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ExecProvider::new(
            vec!["echo".to_string()],
            10,
            1_000_000,
            dir.path().to_path_buf(),
        );
        let err = provider
            .run_cmd(&serde_json::json!({"cmd": "echo hi", "cwd": "../../etc"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::PermissionError);
    }

    #[tokio::test]
    async fn run_cmd_times_out_on_long_running_process() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ExecProvider::new(
            vec!["sleep".to_string()],
            1,
            1_000_000,
            dir.path().to_path_buf(),
        );
        let err = provider
            .run_cmd(&serde_json::json!({"cmd": "sleep 5", "timeout_sec": 1}))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::Timeout);
    }

    #[test]
    fn allowlist_lookup_is_case_insensitive_set() {
        let allow: HashSet<String> = ["python", "pip", "git"].iter().map(|s| s.to_string()).collect();
        assert!(allow.contains("python"));
    }
}
