use rigprep_core::{ArchTag, ArtifactError, ToolRunner};
use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildStatus {
    Built,
    AlreadyUpToDate,
}

/// The external build step. Only pass/fail/up-to-date matters here.
pub trait ArtifactBuilder {
    fn build(&self, target: &ArchTag) -> Result<BuildStatus, ArtifactError>;
}

/// Runs a build command with `CUDA_ARCH=<tag>` in its environment.
pub struct CommandBuilder<T> {
    tools: T,
    program: String,
    args: Vec<String>,
}

impl<T: ToolRunner> CommandBuilder<T> {
    pub fn new(tools: T, command: &[String]) -> Result<Self, ArtifactError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| ArtifactError::BuildFailed("no build command given".to_string()))?;
        Ok(Self {
            tools,
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl<T: ToolRunner> ArtifactBuilder for CommandBuilder<T> {
    fn build(&self, target: &ArchTag) -> Result<BuildStatus, ArtifactError> {
        let args: Vec<&str> = self.args.iter().map(String::as_str).collect();
        info!(program = %self.program, ?args, arch = %target, "running build");
        let output = self
            .tools
            .run_env(&self.program, &args, &[("CUDA_ARCH", target.as_str())])
            .map_err(|err| ArtifactError::BuildFailed(format!("run {}: {}", self.program, err)))?;
        debug!(stdout = %output.stdout, "build output");
        if !output.success() {
            return Err(ArtifactError::BuildFailed(format!(
                "{} exited with {:?}: {}",
                self.program,
                output.code,
                tail(&output.diagnostic(), 20)
            )));
        }
        if output.stdout.contains("Nothing to be done") || output.stdout.contains("is up to date") {
            return Ok(BuildStatus::AlreadyUpToDate);
        }
        Ok(BuildStatus::Built)
    }
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rigprep_core::ToolOutput;
    use rigprep_host_linux::fake::ScriptedTools;

    fn command(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|part| part.to_string()).collect()
    }

    #[test]
    fn exports_target_arch() {
        let tools = ScriptedTools::new().stdout("make", "nvcc -arch=sm_90 ...\n");
        let builder = CommandBuilder::new(&tools, &command(&["make", "-C", "gpu-burn"])).unwrap();
        let status = builder.build(&ArchTag::parse("90").unwrap()).unwrap();
        assert_eq!(status, BuildStatus::Built);
        assert_eq!(
            tools.envs(),
            vec![vec![("CUDA_ARCH".to_string(), "90".to_string())]]
        );
        assert_eq!(tools.calls()[0], command(&["make", "-C", "gpu-burn"]));
    }

    #[test]
    fn recognizes_up_to_date() {
        let tools = ScriptedTools::new().stdout("make", "make: Nothing to be done for 'all'.\n");
        let builder = CommandBuilder::new(&tools, &command(&["make"])).unwrap();
        assert_eq!(
            builder.build(&ArchTag::parse("90").unwrap()).unwrap(),
            BuildStatus::AlreadyUpToDate
        );
    }

    #[test]
    fn failing_build_is_build_failed() {
        let tools = ScriptedTools::new().respond(
            "make",
            ToolOutput {
                code: Some(2),
                stdout: String::new(),
                stderr: "nvcc fatal : Unsupported gpu architecture 'compute_100'".to_string(),
            },
        );
        let builder = CommandBuilder::new(&tools, &command(&["make"])).unwrap();
        match builder.build(&ArchTag::parse("100").unwrap()) {
            Err(ArtifactError::BuildFailed(message)) => assert!(message.contains("Unsupported")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(CommandBuilder::new(ScriptedTools::new(), &[]).is_err());
    }
}
