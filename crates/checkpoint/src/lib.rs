//! Checkpoint Store (C1): atomic, crash-safe persistence of plan execution
//! state to `<root>/<plan_id>.json`.
//!
//! Writes go write-to-tmp, fsync, rename, so a crash mid-write never leaves
//! a torn file behind. Serialization goes
//! through `serde_json::Value` (whose map representation is a `BTreeMap`
//! unless the `preserve_order` feature is enabled, which this workspace does
//! not enable) so the bytes on disk always have keys in sorted order —
//! useful for diffing and for detecting no-op re-saves.

use sa_domain::plan::{Plan, PlanStatus};
use sa_domain::sanitize::sanitize_id;
use sa_domain::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;

pub const SCHEMA_VERSION: u32 = 1;

/// The full persisted record for one plan, stored as one file per plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointState {
    pub schema_version: u32,
    pub plan_id: String,
    pub goal: String,
    pub created_utc: String,
    pub updated_utc: String,
    pub status: PlanStatus,
    /// Scheduler bookkeeping: step id -> free-form cursor note (e.g. retry
    /// count, last attempted timestamp). Not interpreted by this crate.
    #[serde(default)]
    pub cursors: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_results_ref: Option<String>,
    pub plan: Plan,
}

impl CheckpointState {
    /// Wrap a freshly normalized plan into a new checkpoint record.
    pub fn wrap(plan: Plan) -> Self {
        let now = now_rfc3339();
        Self {
            schema_version: SCHEMA_VERSION,
            plan_id: plan.plan_id.clone(),
            goal: plan.goal.clone(),
            created_utc: now.clone(),
            updated_utc: now,
            status: plan.status,
            cursors: BTreeMap::new(),
            tool_results_ref: None,
            plan,
        }
    }

    /// Refresh the denormalized fields from the embedded plan and bump
    /// `updated_utc`. Called before every save.
    pub fn touch(&mut self) {
        self.status = self.plan.status;
        self.updated_utc = now_rfc3339();
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub struct CheckpointStore {
    root: PathBuf,
}

impl CheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, plan_id: &str) -> PathBuf {
        self.root.join(format!("{}.json", sanitize_id(plan_id)))
    }

    pub fn exists(&self, plan_id: &str) -> bool {
        self.path_for(plan_id).is_file()
    }

    /// Persist `state`, refreshing its `updated_utc` first.
    pub async fn save(&self, state: &mut CheckpointState) -> Result<()> {
        state.touch();
        fs::create_dir_all(&self.root).await?;

        let path = self.path_for(&state.plan_id);
        let value = serde_json::to_value(&*state)?;
        let body = serde_json::to_string(&value)?;

        let tmp_name = format!(
            ".{}.{}.tmp",
            path.file_name().unwrap_or_default().to_string_lossy(),
            uuid::Uuid::new_v4().as_simple()
        );
        let tmp_path = path.with_file_name(tmp_name);

        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(body.as_bytes()).await?;
        file.flush().await?;
        file.sync_data().await?;

        if let Err(e) = fs::rename(&tmp_path, &path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(Error::Io(e));
        }

        tracing::debug!(event = "checkpoint_written", plan_id = %state.plan_id, status = ?state.status);
        Ok(())
    }

    pub async fn load(&self, plan_id: &str) -> Result<CheckpointState> {
        let path = self.path_for(plan_id);
        let raw = fs::read_to_string(&path)
            .await
            .map_err(|_| Error::NotFound(format!("checkpoint for plan '{plan_id}'")))?;
        let state: CheckpointState = serde_json::from_str(&raw)?;
        if state.schema_version != SCHEMA_VERSION {
            return Err(Error::SchemaMismatch(format!(
                "checkpoint schema_version {} unsupported (expected {SCHEMA_VERSION})",
                state.schema_version
            )));
        }
        Ok(state)
    }

    pub async fn delete(&self, plan_id: &str) -> Result<()> {
        let path = self.path_for(plan_id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// List plan ids with a checkpoint on disk, for crash-recovery scans.
    pub async fn list_plan_ids(&self) -> Result<Vec<String>> {
        let mut out = Vec::new();
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(Error::Io(e)),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    out.push(stem.to_string());
                }
            }
        }
        out.sort();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sa_domain::plan::Step;
    use sa_domain::plan::{PlanStatus, StepStatus, StepType};

    fn sample_plan(id: &str) -> Plan {
        Plan {
            plan_id: id.into(),
            goal: "test goal".into(),
            created_ts: 0.0,
            status: PlanStatus::New,
            steps: vec![Step {
                id: "s1".into(),
                title: "first step".into(),
                step_type: StepType::Note,
                depends_on: vec![],
                tool: None,
                prompt: Some("do the thing".into()),
                status: StepStatus::Pending,
                result: None,
            }],
            checkpoints: vec![],
        }
    }

    #[tokio::test]
    async fn save_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let mut state = CheckpointState::wrap(sample_plan("plan-1"));

        store.save(&mut state).await.unwrap();
        assert!(store.exists("plan-1"));

        let loaded = store.load("plan-1").await.unwrap();
        assert_eq!(loaded.plan_id, "plan-1");
        assert_eq!(loaded.plan.steps.len(), 1);
        assert_eq!(loaded.schema_version, SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn load_missing_plan_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let err = store.load("nope").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn load_rejects_future_schema_version() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let mut state = CheckpointState::wrap(sample_plan("plan-2"));
        state.schema_version = SCHEMA_VERSION + 1;

        // Bypass save()'s touch() so the bumped version round-trips untouched.
        let path = store.path_for("plan-2");
        fs::create_dir_all(dir.path()).await.unwrap();
        let body = serde_json::to_string_pretty(&serde_json::to_value(&state).unwrap()).unwrap();
        fs::write(&path, body).await.unwrap();

        let err = store.load("plan-2").await.unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch(_)));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        store.delete("never-existed").await.unwrap();

        let mut state = CheckpointState::wrap(sample_plan("plan-3"));
        store.save(&mut state).await.unwrap();
        store.delete("plan-3").await.unwrap();
        assert!(!store.exists("plan-3"));
        store.delete("plan-3").await.unwrap();
    }

    #[tokio::test]
    async fn plan_ids_sanitized_against_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let store = CheckpointStore::new(dir.path());
        let mut state = CheckpointState::wrap(sample_plan("../../evil"));
        store.save(&mut state).await.unwrap();

        // The file landed inside root, not escaped via traversal: no
        // path separator survives sanitization, so every entry is a
        // direct, non-nested child of `root`.
        let mut seen = fs::read_dir(dir.path()).await.unwrap();
        let mut names = vec![];
        while let Some(e) = seen.next_entry().await.unwrap() {
            let path = e.path().canonicalize().unwrap();
            assert_eq!(path.parent().unwrap(), root);
            names.push(e.file_name().to_string_lossy().to_string());
        }
        assert!(names.iter().all(|n| !n.contains('/') && !n.contains('\\')));
    }

    #[tokio::test]
    async fn list_plan_ids_on_empty_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("nonexistent-subdir"));
        assert!(store.list_plan_ids().await.unwrap().is_empty());
    }
}
