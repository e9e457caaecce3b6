use crate::guard::MountGuard;
use crate::signals;
use crate::suite::{TestOutcome, TestSuite};
use anyhow::{Context, Result};
use rigprep_core::{now_utc_rfc3339, RigConfig};
use rigprep_host_linux::{DriveSource, MountHost, MountManager, MountReport, UnmountReport};
use rigprep_report::RunRecord;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunState {
    Idle,
    Mounted,
    TestRunning,
    Cleaned,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Mounted => "mounted",
            RunState::TestRunning => "test-running",
            RunState::Cleaned => "cleaned",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at_utc: String,
    pub transitions: Vec<RunState>,
    pub mount: Option<MountReport>,
    pub mounted_by_run: bool,
    pub outcome: TestOutcome,
    pub cleanup: UnmountReport,
}

impl RunSummary {
    pub fn final_state(&self) -> RunState {
        self.transitions.last().copied().unwrap_or(RunState::Idle)
    }

    /// 130 for an interrupted run, the suite's own code otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.outcome.interrupted {
            return 130;
        }
        self.outcome.exit_code.unwrap_or(1)
    }

    pub fn to_record(&self, test_command: Vec<String>) -> RunRecord {
        let mut record = RunRecord::start(test_command);
        record.started_at_utc = self.started_at_utc.clone();
        record.transitions = self
            .transitions
            .iter()
            .map(|state| state.as_str().to_string())
            .collect();
        record.mounted_by_run = self.mounted_by_run;
        record.mount = self
            .mount
            .as_ref()
            .and_then(|report| serde_json::to_value(report).ok());
        record.test_exit_code = self.outcome.exit_code;
        record.interrupted = self.outcome.interrupted;
        record.unmounted = self.cleanup.count();
        record
    }
}

/// Idle -> [Mounted] -> TestRunning -> Cleaned.
pub struct RunOrchestrator<'a, H: MountHost, D: DriveSource> {
    manager: &'a MountManager<H, D>,
    auto_mount: bool,
}

impl<'a, H: MountHost, D: DriveSource> RunOrchestrator<'a, H, D> {
    pub fn new(manager: &'a MountManager<H, D>, config: &RigConfig) -> Self {
        Self {
            manager,
            auto_mount: config.disk.auto_mount_for_testing,
        }
    }

    pub fn run(&self, suite: &dyn TestSuite) -> Result<RunSummary> {
        let started_at_utc = now_utc_rfc3339();
        let mut transitions = vec![RunState::Idle];

        let mut mount = None;
        let guard = if self.auto_mount {
            let (guard, report) =
                MountGuard::acquire(self.manager).context("auto-mount for testing")?;
            transitions.push(RunState::Mounted);
            mount = Some(report);
            Some(guard)
        } else {
            info!("auto-mount disabled, testing against existing mounts");
            None
        };
        let mounted_by_run = guard
            .as_ref()
            .map(|guard| guard.performed_mount())
            .unwrap_or(false);

        transitions.push(RunState::TestRunning);
        let outcome = if signals::interrupted() {
            warn!(signal = ?signals::last_signal(), "interrupted before the test suite started");
            Ok(TestOutcome::interrupted_before_start())
        } else {
            info!(suite = %suite.describe(), "running test suite");
            suite.execute()
        };

        let cleanup = match guard {
            Some(guard) => guard.release(),
            None => UnmountReport::default(),
        };
        transitions.push(RunState::Cleaned);
        info!(unmounted = cleanup.count(), "run cleaned up");

        let outcome = outcome.context("test suite execution")?;
        Ok(RunSummary {
            started_at_utc,
            transitions,
            mount,
            mounted_by_run,
            outcome,
            cleanup,
        })
    }
}
