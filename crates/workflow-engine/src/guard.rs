use rigprep_core::DiscoveryError;
use rigprep_host_linux::{DriveSource, MountHost, MountManager, MountReport, UnmountReport};
use std::path::PathBuf;
use tracing::{error, info, warn};

/// Mounts on acquire; unmounts what it mounted exactly once, on `release` or drop.
///
/// Only mount points this guard newly bound are released. Drives that were
/// already mounted when the run started belong to someone else and stay put.
pub struct MountGuard<'a, H: MountHost, D: DriveSource> {
    manager: &'a MountManager<H, D>,
    bound: Vec<PathBuf>,
    released: bool,
}

impl<'a, H: MountHost, D: DriveSource> MountGuard<'a, H, D> {
    pub fn acquire(manager: &'a MountManager<H, D>) -> Result<(Self, MountReport), DiscoveryError> {
        let report = manager.mount()?;
        let bound = report.newly_mounted();
        info!(count = bound.len(), "mount guard acquired");
        Ok((
            Self {
                manager,
                bound,
                released: false,
            },
            report,
        ))
    }

    pub fn performed_mount(&self) -> bool {
        !self.bound.is_empty()
    }

    pub fn release(mut self) -> UnmountReport {
        self.release_once()
    }

    fn release_once(&mut self) -> UnmountReport {
        if self.released {
            return UnmountReport::default();
        }
        self.released = true;
        if self.bound.is_empty() {
            info!("this run mounted nothing, leaving existing mounts alone");
            return UnmountReport::default();
        }
        match self.manager.unmount_points(&self.bound) {
            Ok(report) => report,
            Err(err) => {
                error!("cleanup could not read the mount table: {:#}", err);
                UnmountReport {
                    unmounted: Vec::new(),
                    failed: self
                        .bound
                        .iter()
                        .map(|point| (point.clone(), format!("{:#}", err)))
                        .collect(),
                }
            }
        }
    }
}

impl<'a, H: MountHost, D: DriveSource> Drop for MountGuard<'a, H, D> {
    fn drop(&mut self) {
        if !self.released {
            warn!("mount guard dropped without release, cleaning up");
            self.release_once();
        }
    }
}
