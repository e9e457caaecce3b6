use anyhow::{Context, Result};
use rigprep_core::now_utc_rfc3339;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const RUN_REPORT_SCHEMA_VERSION: &str = "1.0.0";

#[derive(Debug, Serialize)]
pub struct ReportPaths {
    pub run_id: String,
    pub root: PathBuf,
    pub run_json: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub schema_version: String,
    pub started_at_utc: String,
    pub finished_at_utc: Option<String>,
    pub transitions: Vec<String>,
    pub mounted_by_run: bool,
    pub mount: Option<Value>,
    pub test_command: Vec<String>,
    pub test_exit_code: Option<i32>,
    pub interrupted: bool,
    pub unmounted: usize,
    pub error: Option<String>,
}

impl RunRecord {
    pub fn start(test_command: Vec<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            schema_version: RUN_REPORT_SCHEMA_VERSION.to_string(),
            started_at_utc: now_utc_rfc3339(),
            finished_at_utc: None,
            transitions: Vec::new(),
            mounted_by_run: false,
            mount: None,
            test_command,
            test_exit_code: None,
            interrupted: false,
            unmounted: 0,
            error: None,
        }
    }

    pub fn finish(&mut self) {
        self.finished_at_utc = Some(now_utc_rfc3339());
    }
}

/// Writes `<base>/reports/<run_id>/run.json`.
pub fn create_run_report(base: impl AsRef<Path>, record: &RunRecord) -> Result<ReportPaths> {
    let run_id = record.run_id.to_string();
    let root = base.as_ref().join("reports").join(&run_id);
    std::fs::create_dir_all(&root).with_context(|| format!("create {}", root.display()))?;

    let run_json = root.join("run.json");
    let data = serde_json::to_string_pretty(record)?;
    std::fs::write(&run_json, data).with_context(|| format!("write {}", run_json.display()))?;

    Ok(ReportPaths {
        run_id,
        root,
        run_json,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_run_json_under_run_id() {
        let dir = tempfile::tempdir().unwrap();
        let mut record = RunRecord::start(vec!["pytest".to_string(), "-q".to_string()]);
        record.transitions = vec!["idle".to_string(), "cleaned".to_string()];
        record.test_exit_code = Some(1);
        record.finish();

        let paths = create_run_report(dir.path(), &record).unwrap();
        assert_eq!(paths.root, dir.path().join("reports").join(&paths.run_id));

        let written: Value =
            serde_json::from_str(&std::fs::read_to_string(&paths.run_json).unwrap()).unwrap();
        assert_eq!(written["run_id"], paths.run_id);
        assert_eq!(written["test_exit_code"], 1);
        assert_eq!(written["schema_version"], RUN_REPORT_SCHEMA_VERSION);
        assert!(written["finished_at_utc"].is_string());
    }

    #[test]
    fn run_ids_are_unique() {
        let first = RunRecord::start(Vec::new());
        let second = RunRecord::start(Vec::new());
        assert_ne!(first.run_id, second.run_id);
    }
}
