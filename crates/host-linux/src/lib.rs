pub mod discovery;
#[cfg(any(test, feature = "testing"))]
pub mod fake;
pub mod host;
pub mod lifecycle;
pub mod mounts;

pub use discovery::{parse_nvme_listing, DriveSource, NvmeDiscovery, NVME_TOOL};
pub use host::{LinuxHost, MountHost, SystemTools};
pub use lifecycle::{
    DriveOutcome, DriveStatus, MountManager, MountReport, MountResult, StatusReport,
    UnmountReport,
};
pub use mounts::{MountEntry, MountTable};

/// The manager wired to the live host: nvme-cli discovery, `/proc/self/mounts`,
/// blkid/mkfs/mount/umount.
pub type SystemMountManager = MountManager<LinuxHost<SystemTools>, NvmeDiscovery<SystemTools>>;

pub fn system_mount_manager(target_model: &str) -> SystemMountManager {
    MountManager::new(
        LinuxHost::system(),
        NvmeDiscovery::new(SystemTools, target_model),
    )
}
