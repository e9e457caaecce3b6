use crate::mounts::MountTable;
use anyhow::{anyhow, Context, Result};
use rigprep_core::{ToolOutput, ToolRunner};
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Block-device and mount primitives the lifecycle manager is written against.
pub trait MountHost {
    fn device_exists(&self, device: &Path) -> bool;

    /// Partitions of `device`, lowest partition number first.
    fn partitions(&self, device: &Path) -> Vec<PathBuf>;

    fn mount_table(&self) -> Result<MountTable>;

    /// `None` when no filesystem signature is present.
    fn filesystem_type(&self, target: &Path) -> Result<Option<String>>;

    fn create_filesystem(&self, target: &Path, fs_type: &str) -> Result<()>;

    fn create_dir(&self, path: &Path) -> Result<()>;

    fn mount(&self, source: &Path, target: &Path) -> Result<()>;

    fn unmount(&self, target: &Path) -> Result<()>;

    fn set_mode(&self, path: &Path, mode: u32) -> Result<()>;
}

impl<T: MountHost + ?Sized> MountHost for &T {
    fn device_exists(&self, device: &Path) -> bool {
        (**self).device_exists(device)
    }

    fn partitions(&self, device: &Path) -> Vec<PathBuf> {
        (**self).partitions(device)
    }

    fn mount_table(&self) -> Result<MountTable> {
        (**self).mount_table()
    }

    fn filesystem_type(&self, target: &Path) -> Result<Option<String>> {
        (**self).filesystem_type(target)
    }

    fn create_filesystem(&self, target: &Path, fs_type: &str) -> Result<()> {
        (**self).create_filesystem(target, fs_type)
    }

    fn create_dir(&self, path: &Path) -> Result<()> {
        (**self).create_dir(path)
    }

    fn mount(&self, source: &Path, target: &Path) -> Result<()> {
        (**self).mount(source, target)
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        (**self).unmount(target)
    }

    fn set_mode(&self, path: &Path, mode: u32) -> Result<()> {
        (**self).set_mode(path, mode)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTools;

impl ToolRunner for SystemTools {
    fn run_env(&self, program: &str, args: &[&str], env: &[(&str, &str)]) -> io::Result<ToolOutput> {
        debug!(program, ?args, "run tool");
        let output = Command::new(program)
            .args(args)
            .envs(env.iter().copied())
            .output()?;
        Ok(ToolOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

const SYS_CLASS_BLOCK: &str = "/sys/class/block";

pub struct LinuxHost<T> {
    tools: T,
}

impl LinuxHost<SystemTools> {
    pub fn system() -> Self {
        Self { tools: SystemTools }
    }
}

impl<T: ToolRunner> LinuxHost<T> {
    pub fn new(tools: T) -> Self {
        Self { tools }
    }

    fn run_checked(&self, program: &str, args: &[&str]) -> Result<ToolOutput> {
        let output = self
            .tools
            .run(program, args)
            .with_context(|| format!("run {}", program))?;
        if output.success() {
            Ok(output)
        } else {
            Err(anyhow!(
                "{} {} failed: {}",
                program,
                args.join(" "),
                output.diagnostic()
            ))
        }
    }
}

impl<T: ToolRunner> MountHost for LinuxHost<T> {
    fn device_exists(&self, device: &Path) -> bool {
        device.exists()
    }

    fn partitions(&self, device: &Path) -> Vec<PathBuf> {
        let Some(name) = device.file_name().and_then(|value| value.to_str()) else {
            return Vec::new();
        };
        let disk_path = Path::new(SYS_CLASS_BLOCK).join(name);
        let entries = match fs::read_dir(&disk_path) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };
        let mut partitions = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(number) = read_u64(path.join("partition")) else {
                continue;
            };
            let part_name = entry.file_name().to_string_lossy().to_string();
            partitions.push((number, Path::new("/dev").join(part_name)));
        }
        partitions.sort();
        partitions.into_iter().map(|(_, path)| path).collect()
    }

    fn mount_table(&self) -> Result<MountTable> {
        MountTable::read()
    }

    fn filesystem_type(&self, target: &Path) -> Result<Option<String>> {
        let target_str = target.to_string_lossy();
        let output = self
            .tools
            .run("blkid", &["-p", "-o", "value", "-s", "TYPE", target_str.as_ref()])
            .context("run blkid")?;
        match output.code {
            Some(0) => {
                let value = output.stdout.trim();
                Ok((!value.is_empty()).then(|| value.to_string()))
            }
            // blkid exits 2 when the probe finds no signature
            Some(2) => Ok(None),
            _ => Err(anyhow!(
                "blkid {} failed: {}",
                target.display(),
                output.diagnostic()
            )),
        }
    }

    fn create_filesystem(&self, target: &Path, fs_type: &str) -> Result<()> {
        let program = format!("mkfs.{}", fs_type);
        let target_str = target.to_string_lossy();
        let force = if fs_type == "xfs" { "-f" } else { "-F" };
        self.run_checked(&program, &[force, target_str.as_ref()])?;
        Ok(())
    }

    fn create_dir(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).with_context(|| format!("create dir {}", path.display()))
    }

    fn mount(&self, source: &Path, target: &Path) -> Result<()> {
        let source_str = source.to_string_lossy();
        let target_str = target.to_string_lossy();
        self.run_checked("mount", &[source_str.as_ref(), target_str.as_ref()])?;
        Ok(())
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        let target_str = target.to_string_lossy();
        self.run_checked("umount", &[target_str.as_ref()])?;
        Ok(())
    }

    fn set_mode(&self, path: &Path, mode: u32) -> Result<()> {
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
            .with_context(|| format!("chmod {:o} {}", mode, path.display()))
    }
}

fn read_u64(path: impl AsRef<Path>) -> Option<u64> {
    fs::read_to_string(path)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::ScriptedTools;

    fn blkid_exit(code: i32, stdout: &str) -> ScriptedTools {
        ScriptedTools::new().respond(
            "blkid",
            ToolOutput {
                code: Some(code),
                stdout: stdout.to_string(),
                stderr: String::new(),
            },
        )
    }

    #[test]
    fn blkid_type_is_reported() {
        let host = LinuxHost::new(blkid_exit(0, "ext4\n"));
        assert_eq!(
            host.filesystem_type(Path::new("/dev/nvme1n1p1")).unwrap(),
            Some("ext4".to_string())
        );
    }

    #[test]
    fn blkid_exit_two_means_blank() {
        let host = LinuxHost::new(blkid_exit(2, ""));
        assert_eq!(host.filesystem_type(Path::new("/dev/nvme1n1")).unwrap(), None);
    }

    #[test]
    fn blkid_other_failures_are_errors() {
        let host = LinuxHost::new(blkid_exit(4, ""));
        assert!(host.filesystem_type(Path::new("/dev/nvme1n1")).is_err());
    }

    #[test]
    fn mkfs_forces_and_targets_device() {
        let tools = ScriptedTools::new().stdout("mkfs.ext4", "");
        let host = LinuxHost::new(&tools);
        host.create_filesystem(Path::new("/dev/nvme1n1"), "ext4").unwrap();
        assert_eq!(
            tools.calls(),
            vec![vec![
                "mkfs.ext4".to_string(),
                "-F".to_string(),
                "/dev/nvme1n1".to_string()
            ]]
        );
    }

    #[test]
    fn failed_mount_carries_stderr() {
        let tools = ScriptedTools::new().respond(
            "mount",
            ToolOutput {
                code: Some(32),
                stdout: String::new(),
                stderr: "wrong fs type, bad option".to_string(),
            },
        );
        let host = LinuxHost::new(&tools);
        let err = host
            .mount(Path::new("/dev/nvme1n1"), Path::new("/mnt/nvme0"))
            .unwrap_err();
        assert!(err.to_string().contains("wrong fs type"));
    }

    #[test]
    fn set_mode_applies_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let host = LinuxHost::new(ScriptedTools::new());
        host.set_mode(dir.path(), 0o777).unwrap();
        let mode = fs::metadata(dir.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o777);
    }

    #[test]
    fn unknown_device_has_no_partitions() {
        let host = LinuxHost::new(ScriptedTools::new());
        assert!(host
            .partitions(Path::new("/dev/definitely-not-a-disk"))
            .is_empty());
    }
}
