use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;

pub mod config;
pub mod error;
pub mod tools;

pub use config::{DiskConfig, RigConfig, DEFAULT_CONFIG_PATH};
pub use error::{ArtifactError, DiscoveryError, SkipReason};
pub use tools::{is_missing_tool, ToolOutput, ToolRunner};

pub const TARGET_MODEL: &str = "Lexar SSD NM790 4TB";
pub const MOUNT_BASE: &str = "/mnt/nvme";
pub const MOUNT_SLOTS: usize = 8;
pub const DEFAULT_FILESYSTEM: &str = "ext4";
pub const MOUNT_MODE: u32 = 0o777;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Drive {
    pub index: usize,
    pub device_path: PathBuf,
    pub model: String,
    pub serial: Option<String>,
    pub size_bytes: Option<u64>,
}

/// Where drive `i` lands: `base` with the index appended, e.g. `/mnt/nvme0`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MountLayout {
    pub base: PathBuf,
    pub slots: usize,
    pub filesystem: String,
    pub mode: u32,
}

impl Default for MountLayout {
    fn default() -> Self {
        Self {
            base: PathBuf::from(MOUNT_BASE),
            slots: MOUNT_SLOTS,
            filesystem: DEFAULT_FILESYSTEM.to_string(),
            mode: MOUNT_MODE,
        }
    }
}

impl MountLayout {
    pub fn mount_point(&self, index: usize) -> PathBuf {
        mount_point_path(&self.base, index)
    }

    pub fn mount_points(&self) -> impl Iterator<Item = PathBuf> + '_ {
        (0..self.slots).map(move |index| self.mount_point(index))
    }
}

pub fn mount_point_path(base: impl AsRef<Path>, index: usize) -> PathBuf {
    let mut path = base.as_ref().as_os_str().to_os_string();
    path.push(index.to_string());
    PathBuf::from(path)
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum MountState {
    Unmounted,
    MountedElsewhere { targets: Vec<PathBuf> },
    MountedByUs { target: PathBuf },
}

impl MountState {
    pub fn label(&self) -> &'static str {
        match self {
            MountState::Unmounted => "unmounted",
            MountState::MountedElsewhere { .. } => "mounted-elsewhere",
            MountState::MountedByUs { .. } => "mounted-by-us",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MountPoint {
    pub index: usize,
    pub path: PathBuf,
    pub bound_device: Option<PathBuf>,
    pub mode: u32,
}

impl MountPoint {
    pub fn is_bound(&self) -> bool {
        self.bound_device.is_some()
    }
}

/// Accelerator instruction-set generation, stored as its digits (`"90"` for sm_90 / 9.0).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct ArchTag(String);

impl ArchTag {
    pub fn parse(raw: &str) -> Option<Self> {
        let value = raw.trim();
        let value = value
            .strip_prefix("sm_")
            .or_else(|| value.strip_prefix("compute_"))
            .unwrap_or(value);
        let digits: String = if value.contains('.') {
            let mut parts = value.splitn(2, '.');
            let major = parts.next().unwrap_or("");
            let minor = parts.next().unwrap_or("");
            if major.is_empty() || minor.is_empty() {
                return None;
            }
            format!("{}{}", major, minor)
        } else {
            // sm_90a and sm_100f style suffixes belong to the same generation
            value.trim_end_matches(|ch: char| ch.is_ascii_alphabetic()).to_string()
        };
        if digits.is_empty() || !digits.chars().all(|ch| ch.is_ascii_digit()) {
            return None;
        }
        Some(Self(digits))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn sm_name(&self) -> String {
        format!("sm_{}", self.0)
    }
}

impl fmt::Display for ArchTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct BuildArtifact {
    pub path: PathBuf,
    pub exists: bool,
    pub architectures: BTreeSet<ArchTag>,
    pub sha256: Option<String>,
}

impl BuildArtifact {
    pub fn missing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            exists: false,
            architectures: BTreeSet::new(),
            sha256: None,
        }
    }

    pub fn is_valid_for(&self, target: &ArchTag) -> bool {
        self.exists && self.architectures.contains(target)
    }

    pub fn architecture_list(&self) -> String {
        if self.architectures.is_empty() {
            return "none".to_string();
        }
        self.architectures
            .iter()
            .map(ArchTag::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "result", rename_all = "kebab-case")]
pub enum ArchValidation {
    Valid,
    Missing,
    WrongArch { found: BTreeSet<ArchTag> },
}

impl ArchValidation {
    pub fn needs_rebuild(&self) -> bool {
        !matches!(self, ArchValidation::Valid)
    }
}

pub fn now_utc_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_point_appends_index() {
        assert_eq!(mount_point_path("/mnt/nvme", 0), PathBuf::from("/mnt/nvme0"));
        let layout = MountLayout::default();
        let points: Vec<PathBuf> = layout.mount_points().collect();
        assert_eq!(points.len(), MOUNT_SLOTS);
        assert_eq!(points[3], PathBuf::from("/mnt/nvme3"));
    }

    #[test]
    fn arch_tag_accepts_tool_spellings() {
        let expected = ArchTag::parse("90").unwrap();
        assert_eq!(ArchTag::parse("9.0"), Some(expected.clone()));
        assert_eq!(ArchTag::parse("sm_90"), Some(expected.clone()));
        assert_eq!(ArchTag::parse("sm_90a"), Some(expected.clone()));
        assert_eq!(ArchTag::parse("compute_90"), Some(expected));
        assert_eq!(ArchTag::parse("12.0").unwrap().as_str(), "120");
    }

    #[test]
    fn arch_tag_rejects_garbage() {
        assert_eq!(ArchTag::parse(""), None);
        assert_eq!(ArchTag::parse("[N/A]"), None);
        assert_eq!(ArchTag::parse("9."), None);
        assert_eq!(ArchTag::parse("sm_"), None);
    }

    #[test]
    fn artifact_valid_only_when_target_embedded() {
        let mut artifact = BuildArtifact::missing("/opt/bench/gpu_burn");
        let target = ArchTag::parse("90").unwrap();
        assert!(!artifact.is_valid_for(&target));

        artifact.exists = true;
        artifact.architectures.insert(ArchTag::parse("80").unwrap());
        assert!(!artifact.is_valid_for(&target));

        artifact.architectures.insert(target.clone());
        assert!(artifact.is_valid_for(&target));
        assert_eq!(artifact.architecture_list(), "80,90");
    }

    #[test]
    fn mount_state_labels() {
        assert_eq!(MountState::Unmounted.label(), "unmounted");
        let state = MountState::MountedByUs {
            target: PathBuf::from("/mnt/nvme0"),
        };
        assert_eq!(state.label(), "mounted-by-us");
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["state"], "mounted-by-us");
    }
}
