use crate::discovery::DriveSource;
use crate::host::MountHost;
use crate::mounts::MountTable;
use anyhow::Result;
use rigprep_core::{
    DiscoveryError, Drive, MountLayout, MountPoint, MountState, SkipReason,
};
use rigprep_safety::{can_create_filesystem, FormatContext, SafetyDecision};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum MountResult {
    Mounted {
        source: PathBuf,
        fs_type: String,
        formatted: bool,
        permissions_applied: bool,
    },
    Skipped {
        reason: SkipReason,
    },
    Failed {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriveOutcome {
    pub index: usize,
    pub device: PathBuf,
    pub mount_point: PathBuf,
    pub result: MountResult,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MountReport {
    pub outcomes: Vec<DriveOutcome>,
}

impl MountReport {
    /// Mount points bound by this call.
    pub fn newly_mounted(&self) -> Vec<PathBuf> {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome.result, MountResult::Mounted { .. }))
            .map(|outcome| outcome.mount_point.clone())
            .collect()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome.result, MountResult::Skipped { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome.result, MountResult::Failed { .. }))
            .count()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UnmountReport {
    pub unmounted: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

impl UnmountReport {
    pub fn count(&self) -> usize {
        self.unmounted.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriveStatus {
    pub drive: Drive,
    pub mount_point: PathBuf,
    pub mount_source: PathBuf,
    pub state: MountState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub drives_detected: bool,
    pub message: Option<String>,
    pub drives: Vec<DriveStatus>,
    pub mount_points: Vec<MountPoint>,
}

pub struct MountManager<H, D> {
    host: H,
    source: D,
    layout: MountLayout,
    format: FormatContext,
}

impl<H: MountHost, D: DriveSource> MountManager<H, D> {
    pub fn new(host: H, source: D) -> Self {
        Self {
            host,
            source,
            layout: MountLayout::default(),
            format: FormatContext::default(),
        }
    }

    pub fn with_layout(mut self, layout: MountLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_format_context(mut self, format: FormatContext) -> Self {
        self.format = format;
        self
    }

    pub fn layout(&self) -> &MountLayout {
        &self.layout
    }

    pub fn discover(&self) -> Result<Vec<Drive>, DiscoveryError> {
        self.source.discover()
    }

    /// Discovery then `mount_drives`. Discovery failures abort before any
    /// filesystem operation.
    pub fn mount(&self) -> Result<MountReport, DiscoveryError> {
        let drives = self.source.discover()?;
        Ok(self.mount_drives(&drives))
    }

    /// Best effort: a drive that cannot be mounted is logged and skipped.
    pub fn mount_drives(&self, drives: &[Drive]) -> MountReport {
        let mut report = MountReport::default();
        for drive in drives {
            let mount_point = self.layout.mount_point(drive.index);
            let result = match self.mount_drive(drive, &mount_point) {
                Ok(result) => result,
                Err(err) => {
                    error!(
                        device = %drive.device_path.display(),
                        mount_point = %mount_point.display(),
                        "mount failed: {:#}",
                        err
                    );
                    MountResult::Failed {
                        message: format!("{:#}", err),
                    }
                }
            };
            if let MountResult::Skipped { reason } = &result {
                warn!(
                    device = %drive.device_path.display(),
                    mount_point = %mount_point.display(),
                    "skipping drive: {}",
                    reason
                );
            }
            report.outcomes.push(DriveOutcome {
                index: drive.index,
                device: drive.device_path.clone(),
                mount_point,
                result,
            });
        }
        info!(
            mounted = report.newly_mounted().len(),
            skipped = report.skipped(),
            failed = report.failed(),
            "mount pass complete"
        );
        report
    }

    fn mount_drive(&self, drive: &Drive, mount_point: &Path) -> Result<MountResult> {
        if drive.index >= self.layout.slots {
            return Ok(skipped(SkipReason::SlotOutOfRange {
                index: drive.index,
                slots: self.layout.slots,
            }));
        }
        let device = drive.device_path.as_path();
        if !self.host.device_exists(device) {
            return Ok(skipped(SkipReason::DeviceVanished {
                device: device.to_path_buf(),
            }));
        }

        let table = self.host.mount_table()?;
        let partitions = self.host.partitions(device);
        for node in std::iter::once(device).chain(partitions.iter().map(PathBuf::as_path)) {
            if let Some(target) = table.targets_of(node).into_iter().next() {
                return Ok(skipped(SkipReason::AlreadyMounted {
                    source_path: node.to_path_buf(),
                    target,
                }));
            }
        }

        let source = partitions.first().map(PathBuf::as_path).unwrap_or(device);

        // must precede mkfs: a busy slot leaves the drive untouched
        if table.is_mount_point(mount_point) {
            return Ok(skipped(SkipReason::MountPointBusy {
                mount_point: mount_point.to_path_buf(),
            }));
        }

        let (fs_type, formatted) = match self.host.filesystem_type(source)? {
            Some(fs_type) => {
                debug!(source = %source.display(), fs_type = %fs_type, "existing filesystem");
                (fs_type, false)
            }
            None => {
                if let SafetyDecision::Deny(reason) = can_create_filesystem(&self.format, source) {
                    return Ok(skipped(SkipReason::FormatDenied {
                        target: source.to_path_buf(),
                        reason,
                    }));
                }
                warn!(
                    source = %source.display(),
                    fs_type = %self.layout.filesystem,
                    "no filesystem found, creating one (all data on the target is destroyed)"
                );
                self.host.create_filesystem(source, &self.layout.filesystem)?;
                (self.layout.filesystem.clone(), true)
            }
        };

        self.host.create_dir(mount_point)?;
        self.host.mount(source, mount_point)?;
        info!(
            source = %source.display(),
            mount_point = %mount_point.display(),
            fs_type = %fs_type,
            "mounted"
        );

        let permissions_applied = match self.host.set_mode(mount_point, self.layout.mode) {
            Ok(()) => true,
            Err(err) => {
                warn!(mount_point = %mount_point.display(), "could not set permissions: {:#}", err);
                false
            }
        };

        Ok(MountResult::Mounted {
            source: source.to_path_buf(),
            fs_type,
            formatted,
            permissions_applied,
        })
    }

    /// Unmounts every active mount point in slots `0..slots`.
    pub fn unmount(&self, slots: usize) -> Result<UnmountReport> {
        let points: Vec<PathBuf> = (0..slots).map(|index| self.layout.mount_point(index)).collect();
        self.unmount_points(&points)
    }

    pub fn unmount_points(&self, points: &[PathBuf]) -> Result<UnmountReport> {
        let mut report = UnmountReport::default();
        for point in points {
            let table = self.host.mount_table()?;
            if !table.is_mount_point(point) {
                debug!(mount_point = %point.display(), "not mounted");
                continue;
            }
            info!(mount_point = %point.display(), "unmounting");
            match self.host.unmount(point) {
                Ok(()) => report.unmounted.push(point.clone()),
                Err(err) => {
                    warn!(mount_point = %point.display(), "unmount failed: {:#}", err);
                    report.failed.push((point.clone(), format!("{:#}", err)));
                }
            }
        }
        info!(count = report.count(), "unmount complete");
        Ok(report)
    }

    /// Read-only. Discovery or mount-table failures become a message, not an error.
    pub fn status(&self) -> StatusReport {
        let table = match self.host.mount_table() {
            Ok(table) => table,
            Err(err) => {
                warn!("could not read mount table: {:#}", err);
                return StatusReport {
                    drives_detected: false,
                    message: Some(format!("mount table unavailable: {:#}", err)),
                    drives: Vec::new(),
                    mount_points: Vec::new(),
                };
            }
        };
        let mount_points = self.mount_points(&table);

        let drives = match self.source.discover() {
            Ok(drives) => drives,
            Err(err) => {
                info!("no drives detected: {}", err);
                return StatusReport {
                    drives_detected: false,
                    message: Some(format!("no drives detected: {}", err)),
                    drives: Vec::new(),
                    mount_points,
                };
            }
        };

        let drives = drives
            .into_iter()
            .map(|drive| self.drive_status(drive, &table))
            .collect();
        StatusReport {
            drives_detected: true,
            message: None,
            drives,
            mount_points,
        }
    }

    fn drive_status(&self, drive: Drive, table: &MountTable) -> DriveStatus {
        let mount_point = self.layout.mount_point(drive.index);
        let partitions = self.host.partitions(&drive.device_path);
        let mount_source = partitions
            .first()
            .cloned()
            .unwrap_or_else(|| drive.device_path.clone());
        let mut targets = table.targets_of(&drive.device_path);
        for partition in &partitions {
            targets.extend(table.targets_of(partition));
        }
        let state = if targets.is_empty() {
            MountState::Unmounted
        } else if targets.iter().any(|target| target == &mount_point) {
            MountState::MountedByUs {
                target: mount_point.clone(),
            }
        } else {
            MountState::MountedElsewhere { targets }
        };
        DriveStatus {
            drive,
            mount_point,
            mount_source,
            state,
        }
    }

    fn mount_points(&self, table: &MountTable) -> Vec<MountPoint> {
        self.layout
            .mount_points()
            .enumerate()
            .map(|(index, path)| {
                let bound_device = table
                    .entry_at(&path)
                    .map(|entry| PathBuf::from(&entry.source));
                MountPoint {
                    index,
                    path,
                    bound_device,
                    mode: self.layout.mode,
                }
            })
            .collect()
    }
}

fn skipped(reason: SkipReason) -> MountResult {
    MountResult::Skipped { reason }
}
