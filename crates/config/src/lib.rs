//! Runtime configuration: environment-variable-first, falling back to
//! scraping an optional config file, with a teacher-style `validate()` pass
//! that collects `ConfigError`s instead of panicking.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub http_fetcher: HttpFetcherConfig,
    #[serde(default)]
    pub exec: ExecConfig,
    #[serde(default)]
    pub admission: AdmissionConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub context: ContextConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            llm: LlmConfig::default(),
            http_fetcher: HttpFetcherConfig::default(),
            exec: ExecConfig::default(),
            admission: AdmissionConfig::default(),
            paths: PathsConfig::default(),
            context: ContextConfig::default(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server (fixed loopback bind)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default = "d_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default = "d_max_message_chars")]
    pub max_message_chars: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
            max_body_bytes: d_max_body_bytes(),
            max_message_chars: d_max_message_chars(),
        }
    }
}

fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_port() -> u16 {
    10010
}
fn d_max_body_bytes() -> usize {
    256 * 1024
}
fn d_max_message_chars() -> usize {
    32_000
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default, alias = "url", alias = "endpoint")]
    pub base_url: String,
    #[serde(default, alias = "model", alias = "id")]
    pub model_id: String,
    #[serde(default = "d_llm_timeout_sec")]
    pub timeout_sec: u64,
    #[serde(default = "d_plan_max_tokens")]
    pub plan_max_tokens: u32,
    #[serde(default = "d_plan_temperature")]
    pub plan_temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            model_id: String::new(),
            timeout_sec: d_llm_timeout_sec(),
            plan_max_tokens: d_plan_max_tokens(),
            plan_temperature: d_plan_temperature(),
        }
    }
}

fn d_llm_timeout_sec() -> u64 {
    180
}
fn d_plan_max_tokens() -> u32 {
    1800
}
fn d_plan_temperature() -> f32 {
    0.2
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HTTP fetcher
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpFetcherConfig {
    /// Comma-separated allowlist entries, leading `*.` permitted for
    /// subdomain wildcards. Populated from `AICORE_HTTP_ALLOWLIST`.
    #[serde(default)]
    pub allowlist: Vec<String>,
    #[serde(default = "d_fetch_timeout_sec")]
    pub default_timeout_sec: u64,
    #[serde(default = "d_fetch_max_bytes")]
    pub default_max_bytes: usize,
    #[serde(default = "d_fetch_max_text_chars")]
    pub default_max_text_chars: usize,
}

impl Default for HttpFetcherConfig {
    fn default() -> Self {
        Self {
            allowlist: Vec::new(),
            default_timeout_sec: d_fetch_timeout_sec(),
            default_max_bytes: d_fetch_max_bytes(),
            default_max_text_chars: d_fetch_max_text_chars(),
        }
    }
}

fn d_fetch_timeout_sec() -> u64 {
    20
}
fn d_fetch_max_bytes() -> usize {
    200_000_000
}
fn d_fetch_max_text_chars() -> usize {
    200_000_000
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Subprocess runner
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecConfig {
    #[serde(default = "d_exec_allowlist")]
    pub executable_allowlist: Vec<String>,
    #[serde(default = "d_exec_timeout_sec")]
    pub default_timeout_sec: u64,
    #[serde(default = "d_exec_max_output_bytes")]
    pub max_output_bytes: usize,
    /// Base directory subprocess working directories must resolve under.
    #[serde(default = "d_exec_base_dir")]
    pub base_dir: PathBuf,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            executable_allowlist: d_exec_allowlist(),
            default_timeout_sec: d_exec_timeout_sec(),
            max_output_bytes: d_exec_max_output_bytes(),
            base_dir: d_exec_base_dir(),
        }
    }
}

fn d_exec_allowlist() -> Vec<String> {
    vec!["python".into(), "pip".into(), "git".into()]
}
fn d_exec_timeout_sec() -> u64 {
    3600
}
fn d_exec_max_output_bytes() -> usize {
    1_000_000
}
fn d_exec_base_dir() -> PathBuf {
    PathBuf::from(".")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Admission control
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    #[serde(default = "d_rate_limit_requests")]
    pub rate_limit_requests: u32,
    #[serde(default = "d_rate_limit_window_s")]
    pub rate_limit_window_s: u64,
    #[serde(default = "d_rate_limit_max_keys")]
    pub rate_limit_max_keys: usize,
    #[serde(default = "d_max_inflight_chats")]
    pub max_inflight_chats: usize,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            rate_limit_requests: d_rate_limit_requests(),
            rate_limit_window_s: d_rate_limit_window_s(),
            rate_limit_max_keys: d_rate_limit_max_keys(),
            max_inflight_chats: d_max_inflight_chats(),
        }
    }
}

fn d_rate_limit_requests() -> u32 {
    30
}
fn d_rate_limit_window_s() -> u64 {
    60
}
fn d_rate_limit_max_keys() -> usize {
    5_000
}
fn d_max_inflight_chats() -> usize {
    4
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context assembler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "d_episodic_turns")]
    pub episodic_turns: usize,
    #[serde(default = "d_semantic_top_k")]
    pub semantic_top_k: usize,
    #[serde(default = "d_snippet_max_chars")]
    pub snippet_max_chars: usize,
    #[serde(default = "d_context_budget_chars")]
    pub budget_chars: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            episodic_turns: d_episodic_turns(),
            semantic_top_k: d_semantic_top_k(),
            snippet_max_chars: d_snippet_max_chars(),
            budget_chars: d_context_budget_chars(),
        }
    }
}

fn d_episodic_turns() -> usize {
    20
}
fn d_semantic_top_k() -> usize {
    8
}
fn d_snippet_max_chars() -> usize {
    900
}
fn d_context_budget_chars() -> usize {
    18_000
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Persisted state layout
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "d_runtime_root")]
    pub runtime_root: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            runtime_root: d_runtime_root(),
        }
    }
}

fn d_runtime_root() -> PathBuf {
    PathBuf::from(".")
}

impl PathsConfig {
    pub fn conversation_log_dir(&self) -> PathBuf {
        self.runtime_root.join("data/memory")
    }
    pub fn semantic_index_path(&self) -> PathBuf {
        self.runtime_root.join("data/rag/knowledge.sqlite")
    }
    pub fn checkpoint_dir(&self) -> PathBuf {
        self.runtime_root.join(".runtime/plans")
    }
    pub fn request_log_path(&self) -> PathBuf {
        self.runtime_root.join("logs/gateway_requests.jsonl")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Loading: env-first, then optional file scrape
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl RuntimeConfig {
    /// Load configuration from an optional file (TOML), then overlay
    /// environment variables, which always win over file values.
    pub fn load(file_path: Option<&Path>) -> Self {
        let mut cfg = if let Some(path) = file_path {
            match std::fs::read_to_string(path) {
                Ok(raw) => toml::from_str(&raw).unwrap_or_default(),
                Err(_) => RuntimeConfig::default(),
            }
        } else {
            RuntimeConfig::default()
        };

        if let Ok(v) = std::env::var("AICORE_LMSTUDIO_BASE_URL") {
            if !v.is_empty() {
                cfg.llm.base_url = v;
            }
        }
        if let Ok(v) = std::env::var("AICORE_MAIN_MODEL_ID") {
            if !v.is_empty() {
                cfg.llm.model_id = v;
            }
        }
        if let Ok(v) = std::env::var("AICORE_HTTP_ALLOWLIST") {
            cfg.http_fetcher.allowlist = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        cfg
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl RuntimeConfig {
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.host.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.host".into(),
                message: "host must not be empty".into(),
            });
        }
        if self.server.port == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.port".into(),
                message: "port must be greater than 0".into(),
            });
        }

        if self.llm.base_url.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "llm.base_url".into(),
                message: "no LLM base_url configured; set AICORE_LMSTUDIO_BASE_URL".into(),
            });
        } else if !self.llm.base_url.starts_with("http://") && !self.llm.base_url.starts_with("https://") {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "llm.base_url".into(),
                message: format!(
                    "base_url must start with http:// or https:// (got \"{}\")",
                    self.llm.base_url
                ),
            });
        }

        if self.exec.executable_allowlist.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "exec.executable_allowlist".into(),
                message: "empty allowlist — no executables will ever be permitted".into(),
            });
        }

        if self.admission.rate_limit_requests == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "admission.rate_limit_requests".into(),
                message: "rate_limit_requests must be greater than 0".into(),
            });
        }
        if self.admission.max_inflight_chats == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "admission.max_inflight_chats".into(),
                message: "max_inflight_chats must be greater than 0".into(),
            });
        }

        for (i, entry) in self.http_fetcher.allowlist.iter().enumerate() {
            if entry.is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("http_fetcher.allowlist[{i}]"),
                    message: "allowlist entry must not be empty".into(),
                });
            }
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_with_only_warnings() {
        let cfg = RuntimeConfig::default();
        let issues = cfg.validate();
        let errors: Vec<_> = issues
            .iter()
            .filter(|e| e.severity == ConfigSeverity::Error)
            .collect();
        assert!(errors.is_empty(), "expected no errors, got: {errors:?}");
    }

    #[test]
    fn empty_host_is_error() {
        let mut cfg = RuntimeConfig::default();
        cfg.server.host = String::new();
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|e| e.field == "server.host" && e.severity == ConfigSeverity::Error));
    }

    #[test]
    fn bad_llm_scheme_is_error() {
        let mut cfg = RuntimeConfig::default();
        cfg.llm.base_url = "ftp://localhost:1234".into();
        let issues = cfg.validate();
        let issue = issues
            .iter()
            .find(|e| e.field == "llm.base_url")
            .expect("expected llm.base_url error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn zero_rate_limit_is_error() {
        let mut cfg = RuntimeConfig::default();
        cfg.admission.rate_limit_requests = 0;
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|e| e.field == "admission.rate_limit_requests"));
    }

    #[test]
    fn env_overlay_wins_over_file() {
        std::env::set_var("AICORE_MAIN_MODEL_ID", "test-model-xyz");
        let cfg = RuntimeConfig::load(None);
        assert_eq!(cfg.llm.model_id, "test-model-xyz");
        std::env::remove_var("AICORE_MAIN_MODEL_ID");
    }

    #[test]
    fn allowlist_parses_comma_separated() {
        std::env::set_var("AICORE_HTTP_ALLOWLIST", "*.example.com, foo.bar ");
        let cfg = RuntimeConfig::load(None);
        assert_eq!(cfg.http_fetcher.allowlist, vec!["*.example.com", "foo.bar"]);
        std::env::remove_var("AICORE_HTTP_ALLOWLIST");
    }

    #[test]
    fn config_error_display_format() {
        let err = ConfigError {
            severity: ConfigSeverity::Error,
            field: "server.port".into(),
            message: "port must be greater than 0".into(),
        };
        assert_eq!(format!("{err}"), "[ERROR] server.port: port must be greater than 0");
    }
}
