use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, warn};

pub const DEFAULT_CONFIG_PATH: &str = "tests/config.yaml";

/// The test suite's YAML file. Only `disk` is ours; cpu/mem/bmc sections are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RigConfig {
    #[serde(default)]
    pub disk: DiskConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiskConfig {
    #[serde(default)]
    pub auto_mount_for_testing: bool,
    #[serde(default = "default_true")]
    pub format_blank_drives: bool,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            auto_mount_for_testing: false,
            format_blank_drives: true,
        }
    }
}

fn default_true() -> bool {
    true
}

impl RigConfig {
    pub fn from_yaml(data: &str) -> Result<Self> {
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(data).context("parse config yaml")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(data) => {
                let config = Self::from_yaml(&data)
                    .with_context(|| format!("load config {}", path.display()))?;
                debug!(path = %path.display(), ?config, "loaded config");
                Ok(config)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "config file not found, using defaults");
                Ok(Self::default())
            }
            Err(err) => Err(err).with_context(|| format!("read config {}", path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_disk_section_and_ignores_the_rest() {
        let yaml = r#"
cpu:
  model_contains: "EPYC"
mem:
  dimms_expected: 16
  per_dimm_gib: 64
disk:
  auto_mount_for_testing: true
"#;
        let config = RigConfig::from_yaml(yaml).unwrap();
        assert!(config.disk.auto_mount_for_testing);
        assert!(config.disk.format_blank_drives);
    }

    #[test]
    fn missing_disk_section_defaults_to_no_auto_mount() {
        let config = RigConfig::from_yaml("cpu:\n  model_contains: Xeon\n").unwrap();
        assert_eq!(config, RigConfig::default());
        assert!(!config.disk.auto_mount_for_testing);
    }

    #[test]
    fn empty_file_is_default() {
        assert_eq!(RigConfig::from_yaml("  \n").unwrap(), RigConfig::default());
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        assert!(RigConfig::from_yaml("disk: [unterminated").is_err());
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = RigConfig::load(dir.path().join("config.yaml")).unwrap();
        assert_eq!(config, RigConfig::default());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "disk:\n  auto_mount_for_testing: true\n  format_blank_drives: false\n")
            .unwrap();
        let config = RigConfig::load(&path).unwrap();
        assert!(config.disk.auto_mount_for_testing);
        assert!(!config.disk.format_blank_drives);
    }
}
