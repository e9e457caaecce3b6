use rigprep_core::{is_missing_tool, ArchTag, ArtifactError, ToolRunner};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, warn};

pub const ARCH_QUERY_TOOL: &str = "nvidia-smi";
pub const INTROSPECTION_TOOL: &str = "cuobjdump";

/// Compute capability of the host accelerator, e.g. `90` for an H100.
pub fn query_host_arch(tools: &dyn ToolRunner) -> Result<ArchTag, ArtifactError> {
    let output = tools
        .run(
            ARCH_QUERY_TOOL,
            &["--query-gpu=compute_cap", "--format=csv,noheader"],
        )
        .map_err(|err| {
            if is_missing_tool(&err) {
                ArtifactError::ArchQueryFailed(format!("{} is not installed", ARCH_QUERY_TOOL))
            } else {
                ArtifactError::ArchQueryFailed(format!("run {}: {}", ARCH_QUERY_TOOL, err))
            }
        })?;
    if !output.success() {
        return Err(ArtifactError::ArchQueryFailed(format!(
            "{} exited with {:?}: {}",
            ARCH_QUERY_TOOL,
            output.code,
            output.diagnostic()
        )));
    }
    parse_compute_caps(&output.stdout)
}

fn parse_compute_caps(raw: &str) -> Result<ArchTag, ArtifactError> {
    let mut tags = Vec::new();
    for (line_idx, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let tag = ArchTag::parse(line).ok_or_else(|| {
            ArtifactError::ArchQueryFailed(format!(
                "unexpected compute capability '{}' at line {}",
                line,
                line_idx + 1
            ))
        })?;
        tags.push(tag);
    }
    let Some(first) = tags.first().cloned() else {
        return Err(ArtifactError::ArchQueryFailed(format!(
            "{} reported no GPUs",
            ARCH_QUERY_TOOL
        )));
    };
    if tags.iter().any(|tag| tag != &first) {
        warn!(
            selected = %first,
            all = ?tags.iter().map(ArchTag::as_str).collect::<Vec<_>>(),
            "GPUs report different compute capabilities, validating against the first"
        );
    }
    debug!(arch = %first, "host compute capability");
    Ok(first)
}

/// SASS architectures embedded in `binary`, from `cuobjdump --list-elf`.
pub fn embedded_arches(tools: &dyn ToolRunner, binary: &Path) -> Result<BTreeSet<ArchTag>, ArtifactError> {
    let binary_str = binary.to_string_lossy();
    let output = tools
        .run(INTROSPECTION_TOOL, &["--list-elf", binary_str.as_ref()])
        .map_err(|err| ArtifactError::IntrospectionFailed {
            path: binary.to_path_buf(),
            message: if is_missing_tool(&err) {
                format!("{} is not installed", INTROSPECTION_TOOL)
            } else {
                format!("run {}: {}", INTROSPECTION_TOOL, err)
            },
        })?;
    if !output.success() {
        let diagnostic = output.diagnostic();
        if diagnostic.contains("does not contain device code") {
            debug!(binary = %binary.display(), "no device code embedded");
            return Ok(BTreeSet::new());
        }
        return Err(ArtifactError::IntrospectionFailed {
            path: binary.to_path_buf(),
            message: format!("{} exited with {:?}: {}", INTROSPECTION_TOOL, output.code, diagnostic),
        });
    }
    Ok(parse_sm_tags(&output.stdout))
}

fn parse_sm_tags(listing: &str) -> BTreeSet<ArchTag> {
    let mut tags = BTreeSet::new();
    for line in listing.lines() {
        let mut rest = line;
        while let Some(pos) = rest.find("sm_") {
            let candidate = &rest[pos..];
            let end = candidate[3..]
                .find(|ch: char| !ch.is_ascii_alphanumeric())
                .map(|idx| idx + 3)
                .unwrap_or(candidate.len());
            if let Some(tag) = ArchTag::parse(&candidate[..end]) {
                tags.insert(tag);
            }
            rest = &candidate[3..];
        }
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;
    use rigprep_core::ToolOutput;
    use rigprep_host_linux::fake::ScriptedTools;

    fn tag(value: &str) -> ArchTag {
        ArchTag::parse(value).unwrap()
    }

    #[test]
    fn reads_compute_cap_from_nvidia_smi() {
        let tools = ScriptedTools::new().stdout(ARCH_QUERY_TOOL, "9.0\n9.0\n");
        assert_eq!(query_host_arch(&tools).unwrap(), tag("90"));
    }

    #[test]
    fn mixed_gpus_use_the_first() {
        let tools = ScriptedTools::new().stdout(ARCH_QUERY_TOOL, "8.9\n9.0\n");
        assert_eq!(query_host_arch(&tools).unwrap(), tag("89"));
    }

    #[test]
    fn arch_query_failures() {
        let missing = ScriptedTools::new().missing(ARCH_QUERY_TOOL);
        assert!(matches!(
            query_host_arch(&missing),
            Err(ArtifactError::ArchQueryFailed(_))
        ));

        let empty = ScriptedTools::new().stdout(ARCH_QUERY_TOOL, "\n");
        assert!(matches!(
            query_host_arch(&empty),
            Err(ArtifactError::ArchQueryFailed(_))
        ));

        let old_driver = ScriptedTools::new().stdout(ARCH_QUERY_TOOL, "[N/A]\n");
        assert!(matches!(
            query_host_arch(&old_driver),
            Err(ArtifactError::ArchQueryFailed(_))
        ));

        let no_driver = ScriptedTools::new().respond(
            ARCH_QUERY_TOOL,
            ToolOutput {
                code: Some(9),
                stdout: "NVIDIA-SMI has failed because it couldn't communicate with the NVIDIA driver.".to_string(),
                stderr: String::new(),
            },
        );
        assert!(matches!(
            query_host_arch(&no_driver),
            Err(ArtifactError::ArchQueryFailed(_))
        ));
    }

    #[test]
    fn parses_elf_listing() {
        let listing = "\
ELF file    1: gpu_burn.1.sm_80.cubin
ELF file    2: gpu_burn.2.sm_90.cubin
ELF file    3: gpu_burn.3.sm_90a.cubin
";
        let tags = parse_sm_tags(listing);
        assert_eq!(tags, BTreeSet::from([tag("80"), tag("90")]));
    }

    #[test]
    fn no_device_code_is_an_empty_set() {
        let tools = ScriptedTools::new().respond(
            INTROSPECTION_TOOL,
            ToolOutput {
                code: Some(255),
                stdout: String::new(),
                stderr: "cuobjdump info    : File 'gpu_burn' does not contain device code".to_string(),
            },
        );
        assert!(embedded_arches(&tools, Path::new("gpu_burn")).unwrap().is_empty());
    }

    #[test]
    fn missing_cuobjdump_is_introspection_failure() {
        let tools = ScriptedTools::new().missing(INTROSPECTION_TOOL);
        assert!(matches!(
            embedded_arches(&tools, Path::new("gpu_burn")),
            Err(ArtifactError::IntrospectionFailed { .. })
        ));
    }
}
