//! Conversation Log (C2): append-only JSONL history, one file per session.
//!
//! A line that fails to parse as a `Message` is not dropped with a warning.
//! It is coerced into `{role: user, content: <raw line>}` so a session's
//! history never silently loses a turn just because an older schema wrote
//! it.

use sa_domain::tool::{Message, Role};
use sa_domain::{Error, Result};
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct ConversationLog {
    base_dir: PathBuf,
}

impl ConversationLog {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.base_dir
            .join(format!("{}.jsonl", sa_domain::sanitize::sanitize_id(session_id)))
    }

    /// Append one or more messages to a session's log in a single write.
    pub fn append(&self, session_id: &str, messages: &[Message]) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }
        std::fs::create_dir_all(&self.base_dir)?;

        let mut buf = String::new();
        for m in messages {
            buf.push_str(&serde_json::to_string(m)?);
            buf.push('\n');
        }

        let path = self.path_for(session_id);
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        file.write_all(buf.as_bytes())?;

        tracing::debug!(event = "convlog_append", session_id, lines = messages.len());
        Ok(())
    }

    pub fn append_one(&self, session_id: &str, message: Message) -> Result<()> {
        self.append(session_id, std::slice::from_ref(&message))
    }

    /// Read back a session's full history. Lines that fail to parse as a
    /// well-formed `Message` are coerced rather than dropped — see module
    /// docs.
    pub fn read(&self, session_id: &str) -> Result<Vec<Message>> {
        let path = self.path_for(session_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&path)?;
        Ok(parse_lines(&raw))
    }

    /// Read only the most recent `n` turns, cheaper than loading the whole
    /// history when the context assembler just needs a tail window.
    pub fn read_tail(&self, session_id: &str, n: usize) -> Result<Vec<Message>> {
        let mut all = self.read(session_id)?;
        if all.len() > n {
            all = all.split_off(all.len() - n);
        }
        Ok(all)
    }

    pub fn exists(&self, session_id: &str) -> bool {
        self.path_for(session_id).is_file()
    }

    pub fn log_path(&self, session_id: &str) -> PathBuf {
        self.path_for(session_id)
    }
}

fn parse_lines(raw: &str) -> Vec<Message> {
    let mut out = Vec::new();
    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<Message>(trimmed) {
            Ok(m) => out.push(m),
            Err(e) => {
                tracing::warn!(error = %e, "coercing malformed conversation log line");
                out.push(Message::user(trimmed, 0.0));
            }
        }
    }
    out
}

/// Validate that a file, if it exists, is a readable conversation log
/// (used by startup health checks rather than by the read path itself).
pub fn is_healthy(path: &Path) -> Result<bool> {
    if !path.exists() {
        return Ok(true);
    }
    std::fs::read_to_string(path).map(|_| true).map_err(Error::Io)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let log = ConversationLog::new(dir.path());

        log.append_one("sess-1", Message::user("hello", 1.0)).unwrap();
        log.append_one("sess-1", Message::assistant("hi there", 2.0)).unwrap();

        let msgs = log.read("sess-1").unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, Role::User);
        assert_eq!(msgs[1].content, "hi there");
    }

    #[test]
    fn missing_session_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = ConversationLog::new(dir.path());
        assert!(log.read("never-seen").unwrap().is_empty());
    }

    #[test]
    fn malformed_line_is_coerced_not_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let log = ConversationLog::new(dir.path());
        std::fs::create_dir_all(dir.path()).unwrap();
        std::fs::write(
            log.log_path("sess-2"),
            "{\"role\":\"user\",\"content\":\"ok\",\"timestamp\":1.0}\nnot even json\n",
        )
        .unwrap();

        let msgs = log.read("sess-2").unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[1].role, Role::User);
        assert_eq!(msgs[1].content, "not even json");
    }

    #[test]
    fn read_tail_keeps_most_recent() {
        let dir = tempfile::tempdir().unwrap();
        let log = ConversationLog::new(dir.path());
        for i in 0..5 {
            log.append_one("sess-3", Message::user(format!("msg{i}"), i as f64))
                .unwrap();
        }
        let tail = log.read_tail("sess-3", 2).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].content, "msg3");
        assert_eq!(tail[1].content, "msg4");
    }

    #[test]
    fn session_ids_are_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let log = ConversationLog::new(dir.path());
        log.append_one("../evil", Message::user("x", 0.0)).unwrap();
        assert!(!log.log_path("../evil").starts_with(".."));
    }
}
