//! In-memory host and scripted tools for tests.

use crate::host::MountHost;
use crate::mounts::{MountEntry, MountTable};
use anyhow::{anyhow, Result};
use rigprep_core::{ToolOutput, ToolRunner};
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
enum Scripted {
    Output(ToolOutput),
    Missing,
}

/// Canned responses keyed by program name. Queued responses are consumed in
/// order; the last one repeats.
#[derive(Debug, Default)]
pub struct ScriptedTools {
    responses: RefCell<HashMap<String, VecDeque<Scripted>>>,
    calls: RefCell<Vec<Vec<String>>>,
    envs: RefCell<Vec<Vec<(String, String)>>>,
}

impl ScriptedTools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, program: &str, output: ToolOutput) -> Self {
        self.push(program, Scripted::Output(output));
        self
    }

    pub fn stdout(self, program: &str, stdout: &str) -> Self {
        self.respond(
            program,
            ToolOutput {
                code: Some(0),
                stdout: stdout.to_string(),
                stderr: String::new(),
            },
        )
    }

    pub fn missing(self, program: &str) -> Self {
        self.push(program, Scripted::Missing);
        self
    }

    fn push(&self, program: &str, response: Scripted) {
        self.responses
            .borrow_mut()
            .entry(program.to_string())
            .or_default()
            .push_back(response);
    }

    /// Program followed by its arguments, one entry per invocation.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.borrow().clone()
    }

    pub fn envs(&self) -> Vec<Vec<(String, String)>> {
        self.envs.borrow().clone()
    }

    pub fn call_count(&self, program: &str) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|call| call.first().map(String::as_str) == Some(program))
            .count()
    }
}

impl ToolRunner for ScriptedTools {
    fn run_env(&self, program: &str, args: &[&str], env: &[(&str, &str)]) -> io::Result<ToolOutput> {
        let mut call = vec![program.to_string()];
        call.extend(args.iter().map(|arg| arg.to_string()));
        self.calls.borrow_mut().push(call);
        self.envs.borrow_mut().push(
            env.iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
        );

        let mut responses = self.responses.borrow_mut();
        let queue = responses.get_mut(program);
        let response = match queue {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        match response {
            Some(Scripted::Output(output)) => Ok(output),
            Some(Scripted::Missing) | None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{}: command not found", program),
            )),
        }
    }
}

/// Builds an `nvme list -o json` document from `(device path, model)` pairs.
pub fn nvme_listing_json(devices: &[(&str, &str)]) -> String {
    let devices: Vec<serde_json::Value> = devices
        .iter()
        .enumerate()
        .map(|(idx, (path, model))| {
            serde_json::json!({
                "NameSpace": 1,
                "DevicePath": path,
                "Firmware": "SN11842",
                "ModelNumber": model,
                "SerialNumber": format!("NLD{:04}", idx),
                "PhysicalSize": 4_096_805_658_624u64,
                "SectorSize": 512
            })
        })
        .collect();
    serde_json::json!({ "Devices": devices }).to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostOp {
    CreateFilesystem { target: PathBuf, fs_type: String },
    CreateDir(PathBuf),
    Mount { source: PathBuf, target: PathBuf },
    Unmount(PathBuf),
    SetMode { path: PathBuf, mode: u32 },
}

impl HostOp {
    pub fn is_filesystem_op(&self) -> bool {
        matches!(
            self,
            HostOp::CreateFilesystem { .. } | HostOp::Mount { .. } | HostOp::Unmount(_)
        )
    }
}

#[derive(Debug, Default)]
struct FakeState {
    devices: BTreeSet<PathBuf>,
    partitions: HashMap<PathBuf, Vec<PathBuf>>,
    filesystems: HashMap<PathBuf, String>,
    mounts: Vec<MountEntry>,
    dirs: BTreeSet<PathBuf>,
    failing_mounts: BTreeSet<PathBuf>,
    ops: Vec<HostOp>,
}

/// Block devices and a mount table held in memory.
#[derive(Debug, Default)]
pub struct FakeHost {
    state: RefCell<FakeState>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_devices(devices: &[&str]) -> Self {
        let host = Self::new();
        for device in devices {
            host.add_device(device);
        }
        host
    }

    pub fn add_device(&self, device: &str) {
        self.state.borrow_mut().devices.insert(PathBuf::from(device));
    }

    pub fn add_partition(&self, device: &str, partition: &str) {
        let mut state = self.state.borrow_mut();
        state.devices.insert(PathBuf::from(partition));
        state
            .partitions
            .entry(PathBuf::from(device))
            .or_default()
            .push(PathBuf::from(partition));
    }

    pub fn set_filesystem(&self, target: &str, fs_type: &str) {
        self.state
            .borrow_mut()
            .filesystems
            .insert(PathBuf::from(target), fs_type.to_string());
    }

    /// A mount that exists before the code under test runs.
    pub fn add_mount(&self, source: &str, target: &str) {
        let fs_type = self
            .state
            .borrow()
            .filesystems
            .get(Path::new(source))
            .cloned()
            .unwrap_or_else(|| "ext4".to_string());
        self.state.borrow_mut().mounts.push(MountEntry {
            source: source.to_string(),
            target: PathBuf::from(target),
            fs_type,
        });
    }

    pub fn fail_mounts_of(&self, source: &str) {
        self.state
            .borrow_mut()
            .failing_mounts
            .insert(PathBuf::from(source));
    }

    pub fn ops(&self) -> Vec<HostOp> {
        self.state.borrow().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.state.borrow_mut().ops.clear();
    }

    pub fn mounted_targets(&self) -> Vec<PathBuf> {
        let mut targets: Vec<PathBuf> = self
            .state
            .borrow()
            .mounts
            .iter()
            .map(|entry| entry.target.clone())
            .collect();
        targets.sort();
        targets
    }

    pub fn source_at(&self, target: &str) -> Option<String> {
        self.state
            .borrow()
            .mounts
            .iter()
            .find(|entry| entry.target == Path::new(target))
            .map(|entry| entry.source.clone())
    }

    fn record(&self, op: HostOp) {
        self.state.borrow_mut().ops.push(op);
    }
}

impl MountHost for FakeHost {
    fn device_exists(&self, device: &Path) -> bool {
        self.state.borrow().devices.contains(device)
    }

    fn partitions(&self, device: &Path) -> Vec<PathBuf> {
        self.state
            .borrow()
            .partitions
            .get(device)
            .cloned()
            .unwrap_or_default()
    }

    fn mount_table(&self) -> Result<MountTable> {
        Ok(MountTable::from_entries(self.state.borrow().mounts.clone()))
    }

    fn filesystem_type(&self, target: &Path) -> Result<Option<String>> {
        Ok(self.state.borrow().filesystems.get(target).cloned())
    }

    fn create_filesystem(&self, target: &Path, fs_type: &str) -> Result<()> {
        self.record(HostOp::CreateFilesystem {
            target: target.to_path_buf(),
            fs_type: fs_type.to_string(),
        });
        self.state
            .borrow_mut()
            .filesystems
            .insert(target.to_path_buf(), fs_type.to_string());
        Ok(())
    }

    fn create_dir(&self, path: &Path) -> Result<()> {
        if self.state.borrow_mut().dirs.insert(path.to_path_buf()) {
            self.record(HostOp::CreateDir(path.to_path_buf()));
        }
        Ok(())
    }

    fn mount(&self, source: &Path, target: &Path) -> Result<()> {
        self.record(HostOp::Mount {
            source: source.to_path_buf(),
            target: target.to_path_buf(),
        });
        let mut state = self.state.borrow_mut();
        if state.failing_mounts.contains(source) {
            return Err(anyhow!("mount {} failed: I/O error", source.display()));
        }
        if !state.dirs.contains(target) {
            return Err(anyhow!("mount point {} does not exist", target.display()));
        }
        let fs_type = state
            .filesystems
            .get(source)
            .cloned()
            .ok_or_else(|| anyhow!("{}: wrong fs type", source.display()))?;
        state.mounts.push(MountEntry {
            source: source.to_string_lossy().to_string(),
            target: target.to_path_buf(),
            fs_type,
        });
        Ok(())
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        self.record(HostOp::Unmount(target.to_path_buf()));
        let mut state = self.state.borrow_mut();
        let position = state
            .mounts
            .iter()
            .rposition(|entry| entry.target == target)
            .ok_or_else(|| anyhow!("{}: not mounted", target.display()))?;
        state.mounts.remove(position);
        Ok(())
    }

    fn set_mode(&self, path: &Path, mode: u32) -> Result<()> {
        self.record(HostOp::SetMode {
            path: path.to_path_buf(),
            mode,
        });
        Ok(())
    }
}
