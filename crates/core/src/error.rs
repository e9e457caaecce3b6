use crate::ArchTag;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Discovery-stage failures. Fatal to `mount`, reported but tolerated by `status`.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("device enumeration tool `{tool}` is not installed")]
    ToolUnavailable { tool: String },

    #[error("device enumeration failed: {0}")]
    EnumerationFailed(String),

    #[error("no drives matching model `{model}`")]
    NoMatchingDevices { model: String },
}

/// Why a single drive was left alone during `mount`. Never aborts the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SkipReason {
    #[error("device {} no longer exists", .device.display())]
    DeviceVanished { device: PathBuf },

    #[error("{} is already mounted at {}", .source_path.display(), .target.display())]
    AlreadyMounted { source_path: PathBuf, target: PathBuf },

    #[error("mount point {} is already in use", .mount_point.display())]
    MountPointBusy { mount_point: PathBuf },

    #[error("drive index {index} has no mount slot (only {slots} slots)")]
    SlotOutOfRange { index: usize, slots: usize },

    #[error("refusing to create a filesystem on {}: {reason}", .target.display())]
    FormatDenied { target: PathBuf, reason: String },
}

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("could not determine host compute architecture: {0}")]
    ArchQueryFailed(String),

    #[error("could not inspect {}: {message}", .path.display())]
    IntrospectionFailed { path: PathBuf, message: String },

    #[error(
        "rebuilt binary {} does not contain {} (embedded: {found}); check the build's CUDA architecture settings",
        .path.display(),
        .target.sm_name()
    )]
    PostBuildArchMismatch {
        path: PathBuf,
        target: ArchTag,
        found: String,
    },

    #[error("build failed: {0}")]
    BuildFailed(String),

    #[error("io error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
