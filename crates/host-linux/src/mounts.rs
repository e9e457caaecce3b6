use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const PROC_MOUNTS: &str = "/proc/self/mounts";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountEntry {
    pub source: String,
    pub target: PathBuf,
    pub fs_type: String,
}

impl MountEntry {
    fn device_name(&self) -> Option<&str> {
        if !self.source.starts_with("/dev/") {
            return None;
        }
        Path::new(&self.source)
            .file_name()
            .and_then(|value| value.to_str())
            .filter(|value| !value.is_empty())
    }
}

/// Snapshot of the kernel mount table. Always re-read; never cached across operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountTable {
    entries: Vec<MountEntry>,
}

impl MountTable {
    pub fn read() -> Result<Self> {
        let data = fs::read_to_string(PROC_MOUNTS).with_context(|| format!("read {}", PROC_MOUNTS))?;
        Ok(Self::parse(&data))
    }

    pub fn parse(data: &str) -> Self {
        let mut entries = Vec::new();
        for line in data.lines() {
            let mut parts = line.split_whitespace();
            let source = match parts.next() {
                Some(value) => value.to_string(),
                None => continue,
            };
            let target = match parts.next() {
                Some(value) => PathBuf::from(unescape_mount(value)),
                None => continue,
            };
            let fs_type = match parts.next() {
                Some(value) => value.to_string(),
                None => continue,
            };
            entries.push(MountEntry {
                source,
                target,
                fs_type,
            });
        }
        Self { entries }
    }

    pub fn from_entries(entries: Vec<MountEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[MountEntry] {
        &self.entries
    }

    pub fn is_mount_point(&self, path: &Path) -> bool {
        self.entries.iter().any(|entry| entry.target == path)
    }

    /// Topmost mount at `path`, if any.
    pub fn entry_at(&self, path: &Path) -> Option<&MountEntry> {
        self.entries.iter().rev().find(|entry| entry.target == path)
    }

    /// Every place the block device `device` is mounted.
    pub fn targets_of(&self, device: &Path) -> Vec<PathBuf> {
        let name = match device.file_name().and_then(|value| value.to_str()) {
            Some(value) if !value.is_empty() => value,
            _ => return Vec::new(),
        };
        self.entries
            .iter()
            .filter(|entry| entry.device_name() == Some(name))
            .map(|entry| entry.target.clone())
            .collect()
    }
}

/// Decodes the `\040`-style octal escapes the kernel uses for whitespace in paths.
fn unescape_mount(value: &str) -> String {
    let mut output = String::new();
    let mut chars = value.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            output.push(ch);
            continue;
        }
        let mut octal = String::new();
        for _ in 0..3 {
            match chars.peek() {
                Some(next) if next.is_digit(8) => {
                    octal.push(*next);
                    chars.next();
                }
                _ => break,
            }
        }
        if octal.len() == 3 {
            if let Ok(byte) = u8::from_str_radix(&octal, 8) {
                output.push(byte as char);
                continue;
            }
        }
        output.push('\\');
        output.push_str(&octal);
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
sysfs /sys sysfs rw,nosuid,nodev,noexec,relatime 0 0
/dev/nvme0n1p2 / ext4 rw,relatime 0 0
/dev/nvme1n1p1 /mnt/nvme0 ext4 rw,relatime 0 0
/dev/nvme2n1 /srv/scratch\\040space xfs rw,relatime 0 0
tmpfs /mnt/nvme3 tmpfs rw 0 0
";

    #[test]
    fn parses_entries_and_unescapes_targets() {
        let table = MountTable::parse(SAMPLE);
        assert_eq!(table.entries().len(), 5);
        assert!(table.is_mount_point(Path::new("/srv/scratch space")));
        assert!(table.is_mount_point(Path::new("/mnt/nvme0/")));
        assert!(!table.is_mount_point(Path::new("/mnt/nvme1")));
    }

    #[test]
    fn non_device_sources_still_count_as_mount_points() {
        let table = MountTable::parse(SAMPLE);
        assert!(table.is_mount_point(Path::new("/mnt/nvme3")));
        assert_eq!(table.entry_at(Path::new("/mnt/nvme3")).unwrap().fs_type, "tmpfs");
    }

    #[test]
    fn targets_of_matches_by_device_name() {
        let table = MountTable::parse(SAMPLE);
        assert_eq!(
            table.targets_of(Path::new("/dev/nvme1n1p1")),
            vec![PathBuf::from("/mnt/nvme0")]
        );
        assert!(table.targets_of(Path::new("/dev/nvme1n1")).is_empty());
        assert!(table.targets_of(Path::new("/dev/tmpfs")).is_empty());
    }

    #[test]
    fn skips_short_lines() {
        let table = MountTable::parse("/dev/sda1\n\n/dev/sdb1 /data\n");
        assert!(table.entries().is_empty());
    }

    #[test]
    fn keeps_invalid_escapes_verbatim() {
        assert_eq!(unescape_mount("a\\9b"), "a\\9b");
        assert_eq!(unescape_mount("tab\\011here"), "tab\there");
    }
}
