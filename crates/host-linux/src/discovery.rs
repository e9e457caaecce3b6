use rigprep_core::{is_missing_tool, DiscoveryError, Drive, ToolRunner};
use serde::Deserialize;
use std::path::PathBuf;
use tracing::{debug, info, warn};

pub const NVME_TOOL: &str = "nvme";

pub trait DriveSource {
    fn discover(&self) -> Result<Vec<Drive>, DiscoveryError>;
}

/// `nvme list -o json`. nvme-cli has shipped both `Devices` and `devices`
/// for the array, and `DevicePath` or `Name` for the node.
#[derive(Debug, Deserialize)]
struct NvmeListing {
    #[serde(rename = "Devices", default)]
    devices_upper: Option<Vec<NvmeDevice>>,
    #[serde(rename = "devices", default)]
    devices_lower: Option<Vec<NvmeDevice>>,
}

impl NvmeListing {
    fn into_devices(self) -> Vec<NvmeDevice> {
        match (self.devices_upper, self.devices_lower) {
            (Some(upper), _) if !upper.is_empty() => upper,
            (_, Some(lower)) => lower,
            (upper, None) => upper.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct NvmeDevice {
    #[serde(rename = "DevicePath", default)]
    device_path: Option<String>,
    #[serde(rename = "Name", default)]
    name: Option<String>,
    #[serde(rename = "ModelNumber", default)]
    model_number: Option<String>,
    #[serde(rename = "SerialNumber", default)]
    serial_number: Option<String>,
    #[serde(rename = "PhysicalSize", default)]
    physical_size: Option<serde_json::Value>,
}

impl NvmeDevice {
    fn node(&self) -> Option<PathBuf> {
        let raw = self
            .device_path
            .as_deref()
            .or(self.name.as_deref())?
            .trim();
        if raw.is_empty() {
            return None;
        }
        if raw.starts_with('/') {
            Some(PathBuf::from(raw))
        } else {
            Some(PathBuf::from("/dev").join(raw))
        }
    }

    fn size_bytes(&self) -> Option<u64> {
        self.physical_size.as_ref().and_then(|value| value.as_u64())
    }
}

/// Filters a listing down to `target_model`, keeping the tool's order.
/// Index `i` in the result is the drive's mount slot.
pub fn parse_nvme_listing(raw: &str, target_model: &str) -> Result<Vec<Drive>, DiscoveryError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(DiscoveryError::EnumerationFailed(
            "`nvme list -o json` returned no output".to_string(),
        ));
    }
    let listing: NvmeListing = serde_json::from_str(raw).map_err(|err| {
        DiscoveryError::EnumerationFailed(format!("unparseable nvme listing: {}", err))
    })?;
    let devices = listing.into_devices();
    debug!(count = devices.len(), "nvme devices enumerated");

    let mut drives = Vec::new();
    for device in devices {
        let model = device.model_number.as_deref().unwrap_or("");
        if model != target_model {
            continue;
        }
        let Some(device_path) = device.node() else {
            warn!(model, "matching device has no device path, ignoring");
            continue;
        };
        drives.push(Drive {
            index: drives.len(),
            device_path,
            model: model.to_string(),
            serial: device.serial_number.clone(),
            size_bytes: device.size_bytes(),
        });
    }

    if drives.is_empty() {
        return Err(DiscoveryError::NoMatchingDevices {
            model: target_model.to_string(),
        });
    }
    Ok(drives)
}

pub struct NvmeDiscovery<T> {
    tools: T,
    target_model: String,
}

impl<T: ToolRunner> NvmeDiscovery<T> {
    pub fn new(tools: T, target_model: impl Into<String>) -> Self {
        Self {
            tools,
            target_model: target_model.into(),
        }
    }
}

impl<T: ToolRunner> DriveSource for NvmeDiscovery<T> {
    fn discover(&self) -> Result<Vec<Drive>, DiscoveryError> {
        let output = self
            .tools
            .run(NVME_TOOL, &["list", "-o", "json"])
            .map_err(|err| {
                if is_missing_tool(&err) {
                    DiscoveryError::ToolUnavailable {
                        tool: NVME_TOOL.to_string(),
                    }
                } else {
                    DiscoveryError::EnumerationFailed(format!("run {}: {}", NVME_TOOL, err))
                }
            })?;
        if !output.success() {
            return Err(DiscoveryError::EnumerationFailed(format!(
                "`nvme list -o json` exited with {:?}: {}",
                output.code,
                output.diagnostic()
            )));
        }
        let drives = parse_nvme_listing(&output.stdout, &self.target_model)?;
        for drive in &drives {
            info!(
                index = drive.index,
                device = %drive.device_path.display(),
                serial = drive.serial.as_deref().unwrap_or("-"),
                "discovered drive"
            );
        }
        Ok(drives)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{nvme_listing_json, ScriptedTools};
    use rigprep_core::{ToolOutput, TARGET_MODEL};
    use std::path::Path;

    fn mixed_listing() -> String {
        nvme_listing_json(&[
            ("/dev/nvme0n1", "Samsung SSD 980 250GB"),
            ("/dev/nvme1n1", TARGET_MODEL),
            ("/dev/nvme2n1", TARGET_MODEL),
            ("/dev/nvme3n1", "Lexar SSD NM790 2TB"),
            ("/dev/nvme4n1", TARGET_MODEL),
        ])
    }

    #[test]
    fn keeps_only_exact_model_matches_in_enumeration_order() {
        let drives = parse_nvme_listing(&mixed_listing(), TARGET_MODEL).unwrap();
        let paths: Vec<&Path> = drives.iter().map(|d| d.device_path.as_path()).collect();
        assert_eq!(
            paths,
            vec![
                Path::new("/dev/nvme1n1"),
                Path::new("/dev/nvme2n1"),
                Path::new("/dev/nvme4n1")
            ]
        );
        let indices: Vec<usize> = drives.iter().map(|d| d.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn index_assignment_is_repeatable() {
        let first = parse_nvme_listing(&mixed_listing(), TARGET_MODEL).unwrap();
        let second = parse_nvme_listing(&mixed_listing(), TARGET_MODEL).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn model_match_is_exact() {
        let raw = nvme_listing_json(&[("/dev/nvme1n1", "Lexar SSD NM790 4TB ")]);
        assert!(matches!(
            parse_nvme_listing(&raw, TARGET_MODEL),
            Err(DiscoveryError::NoMatchingDevices { .. })
        ));
    }

    #[test]
    fn accepts_lowercase_array_and_name_field() {
        let raw = r#"{"devices":[
            {"Name":"nvme5n1","ModelNumber":"Lexar SSD NM790 4TB","SerialNumber":"NLD123","PhysicalSize":4096805658624}
        ]}"#;
        let drives = parse_nvme_listing(raw, TARGET_MODEL).unwrap();
        assert_eq!(drives.len(), 1);
        assert_eq!(drives[0].device_path, PathBuf::from("/dev/nvme5n1"));
        assert_eq!(drives[0].serial.as_deref(), Some("NLD123"));
        assert_eq!(drives[0].size_bytes, Some(4_096_805_658_624));
    }

    #[test]
    fn device_path_wins_over_name() {
        let raw = r#"{"Devices":[
            {"DevicePath":"/dev/nvme1n1","Name":"ignored","ModelNumber":"Lexar SSD NM790 4TB"}
        ]}"#;
        let drives = parse_nvme_listing(raw, TARGET_MODEL).unwrap();
        assert_eq!(drives[0].device_path, PathBuf::from("/dev/nvme1n1"));
    }

    #[test]
    fn empty_upper_array_falls_through_to_lower() {
        let raw = r#"{"Devices":[],"devices":[{"DevicePath":"/dev/nvme1n1","ModelNumber":"Lexar SSD NM790 4TB"}]}"#;
        assert_eq!(parse_nvme_listing(raw, TARGET_MODEL).unwrap().len(), 1);
    }

    #[test]
    fn empty_or_garbage_output_is_enumeration_failure() {
        assert!(matches!(
            parse_nvme_listing("  ", TARGET_MODEL),
            Err(DiscoveryError::EnumerationFailed(_))
        ));
        assert!(matches!(
            parse_nvme_listing("Node  SN  Model", TARGET_MODEL),
            Err(DiscoveryError::EnumerationFailed(_))
        ));
    }

    #[test]
    fn no_devices_is_no_matching_devices() {
        assert!(matches!(
            parse_nvme_listing(r#"{"Devices":[]}"#, TARGET_MODEL),
            Err(DiscoveryError::NoMatchingDevices { .. })
        ));
    }

    #[test]
    fn missing_tool_is_tool_unavailable() {
        let tools = ScriptedTools::new().missing(NVME_TOOL);
        let discovery = NvmeDiscovery::new(&tools, TARGET_MODEL);
        assert!(matches!(
            discovery.discover(),
            Err(DiscoveryError::ToolUnavailable { .. })
        ));
    }

    #[test]
    fn failing_tool_is_enumeration_failure() {
        let tools = ScriptedTools::new().respond(
            NVME_TOOL,
            ToolOutput {
                code: Some(1),
                stdout: String::new(),
                stderr: "Permission denied".to_string(),
            },
        );
        let discovery = NvmeDiscovery::new(&tools, TARGET_MODEL);
        match discovery.discover() {
            Err(DiscoveryError::EnumerationFailed(message)) => {
                assert!(message.contains("Permission denied"))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn discover_runs_nvme_list_json() {
        let tools = ScriptedTools::new().stdout(NVME_TOOL, &mixed_listing());
        let discovery = NvmeDiscovery::new(&tools, TARGET_MODEL);
        assert_eq!(discovery.discover().unwrap().len(), 3);
        assert_eq!(
            tools.calls(),
            vec![vec![
                "nvme".to_string(),
                "list".to_string(),
                "-o".to_string(),
                "json".to_string()
            ]]
        );
    }
}
