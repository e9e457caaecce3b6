pub mod arch;
pub mod builder;
pub mod fingerprint;

pub use arch::{embedded_arches, query_host_arch, ARCH_QUERY_TOOL, INTROSPECTION_TOOL};
pub use builder::{ArtifactBuilder, BuildStatus, CommandBuilder};
pub use fingerprint::sha256_file;

use rigprep_core::{ArchTag, ArchValidation, ArtifactError, BuildArtifact, ToolRunner};
use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};

pub fn inspect_artifact(tools: &dyn ToolRunner, binary: &Path) -> Result<BuildArtifact, ArtifactError> {
    if !binary.is_file() {
        return Ok(BuildArtifact::missing(binary));
    }
    let architectures = embedded_arches(tools, binary)?;
    let sha256 = sha256_file(binary).map_err(|source| ArtifactError::Io {
        path: binary.to_path_buf(),
        source,
    })?;
    Ok(BuildArtifact {
        path: binary.to_path_buf(),
        exists: true,
        architectures,
        sha256: Some(sha256),
    })
}

/// Decides skip-vs-rebuild for `binary` against `target`.
pub fn validate(
    tools: &dyn ToolRunner,
    binary: &Path,
    target: &ArchTag,
) -> Result<ArchValidation, ArtifactError> {
    let artifact = inspect_artifact(tools, binary)?;
    let validation = classify(&artifact, target);
    match &validation {
        ArchValidation::Valid => info!(
            binary = %binary.display(),
            arch = %target.sm_name(),
            sha256 = artifact.sha256.as_deref().unwrap_or("-"),
            "binary matches host architecture, rebuild not needed"
        ),
        ArchValidation::Missing => info!(binary = %binary.display(), "binary missing, build required"),
        ArchValidation::WrongArch { .. } => warn!(
            binary = %binary.display(),
            arch = %target.sm_name(),
            embedded = %artifact.architecture_list(),
            "binary built for a different architecture, rebuild required"
        ),
    }
    Ok(validation)
}

fn classify(artifact: &BuildArtifact, target: &ArchTag) -> ArchValidation {
    if !artifact.exists {
        ArchValidation::Missing
    } else if artifact.is_valid_for(target) {
        ArchValidation::Valid
    } else {
        ArchValidation::WrongArch {
            found: artifact.architectures.clone(),
        }
    }
}

/// Strict check after a rebuild. A miss here means the build is misconfigured;
/// it is never retried.
pub fn verify_post_build(
    tools: &dyn ToolRunner,
    binary: &Path,
    target: &ArchTag,
) -> Result<BuildArtifact, ArtifactError> {
    let artifact = inspect_artifact(tools, binary)?;
    if !artifact.is_valid_for(target) {
        return Err(ArtifactError::PostBuildArchMismatch {
            path: binary.to_path_buf(),
            target: target.clone(),
            found: if artifact.exists {
                artifact.architecture_list()
            } else {
                "binary missing".to_string()
            },
        });
    }
    info!(
        binary = %binary.display(),
        arch = %target.sm_name(),
        sha256 = artifact.sha256.as_deref().unwrap_or("-"),
        "rebuilt binary verified"
    );
    Ok(artifact)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum EnsureOutcome {
    Skipped {
        artifact: BuildArtifact,
    },
    Rebuilt {
        before: ArchValidation,
        status: BuildStatus,
        artifact: BuildArtifact,
    },
}

pub fn ensure_artifact(
    tools: &dyn ToolRunner,
    binary: &Path,
    target: &ArchTag,
    builder: &dyn ArtifactBuilder,
) -> Result<EnsureOutcome, ArtifactError> {
    let artifact = inspect_artifact(tools, binary)?;
    let before = classify(&artifact, target);
    if !before.needs_rebuild() {
        info!(binary = %binary.display(), arch = %target.sm_name(), "skipping rebuild");
        return Ok(EnsureOutcome::Skipped { artifact });
    }
    info!(
        binary = %binary.display(),
        arch = %target.sm_name(),
        reason = ?before,
        "rebuilding"
    );
    let status = builder.build(target)?;
    let artifact = verify_post_build(tools, binary, target)?;
    Ok(EnsureOutcome::Rebuilt {
        before,
        status,
        artifact,
    })
}
