use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use rigprep_artifact::{ensure_artifact, query_host_arch, validate, CommandBuilder, EnsureOutcome};
use rigprep_core::{ArchTag, ArchValidation, MountState, RigConfig, DEFAULT_CONFIG_PATH, MOUNT_SLOTS, TARGET_MODEL};
use rigprep_host_linux::{
    system_mount_manager, MountResult, StatusReport, SystemMountManager, SystemTools,
};
use rigprep_report::{create_run_report, RunRecord};
use rigprep_safety::FormatContext;
use rigprep_workflow_engine::{install_interrupt_handlers, CommandSuite, RunOrchestrator};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Bare-metal benchmark host preparation.
#[derive(Parser)]
#[command(name = "rigprep", version, arg_required_else_help = true)]
struct Cli {
    /// Test-suite configuration file; only its `disk` section is read.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Format blank drives and mount every matching drive on its slot.
    Mount,
    /// Unmount every active slot mount point.
    Unmount,
    /// Show drives and their mount state.
    Status {
        #[arg(long)]
        json: bool,
    },
    /// List matching drives with their assigned mount points.
    Discover {
        #[arg(long)]
        pretty: bool,
    },
    /// Check or rebuild the benchmark binary for this host's GPU.
    #[command(subcommand)]
    Artifact(ArtifactCommand),
    /// Mount (when configured), run the test command, then clean up.
    Run {
        #[arg(long)]
        report_base: Option<PathBuf>,
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
}

#[derive(Subcommand)]
enum ArtifactCommand {
    Check(ArtifactArgs),
    Ensure {
        #[command(flatten)]
        target: ArtifactArgs,
        #[arg(last = true, required = true)]
        build: Vec<String>,
    },
}

#[derive(Args)]
struct ArtifactArgs {
    #[arg(long)]
    binary: PathBuf,
    /// Target compute capability; queried from nvidia-smi when omitted.
    #[arg(long)]
    arch: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match dispatch(cli) {
        Ok(code) => code,
        Err(err) => {
            error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn dispatch(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Command::Mount => {
            let config = RigConfig::load(&cli.config)?;
            let manager = manager(&config);
            let report = manager.mount()?;
            for outcome in &report.outcomes {
                let detail = match &outcome.result {
                    MountResult::Mounted { source, formatted, .. } => {
                        format!("mounted {}{}", source.display(), if *formatted { " (formatted)" } else { "" })
                    }
                    MountResult::Skipped { reason } => format!("skipped: {}", reason),
                    MountResult::Failed { message } => format!("failed: {}", message),
                };
                println!(
                    "{} -> {}: {}",
                    outcome.device.display(),
                    outcome.mount_point.display(),
                    detail
                );
            }
            println!(
                "{} mounted, {} skipped, {} failed",
                report.newly_mounted().len(),
                report.skipped(),
                report.failed()
            );
            Ok(ExitCode::SUCCESS)
        }
        Command::Unmount => {
            let manager = system_mount_manager(TARGET_MODEL);
            let report = manager.unmount(MOUNT_SLOTS)?;
            for (point, reason) in &report.failed {
                warn!(mount_point = %point.display(), "left mounted: {}", reason);
            }
            println!("Unmounted {} drive(s)", report.count());
            Ok(ExitCode::SUCCESS)
        }
        Command::Status { json } => {
            let report = system_mount_manager(TARGET_MODEL).status();
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_status(&report);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Discover { pretty } => {
            let manager = system_mount_manager(TARGET_MODEL);
            let drives = manager.discover()?;
            let listing: Vec<serde_json::Value> = drives
                .iter()
                .map(|drive| {
                    serde_json::json!({
                        "index": drive.index,
                        "device_path": drive.device_path,
                        "model": drive.model,
                        "serial": drive.serial,
                        "size_bytes": drive.size_bytes,
                        "mount_point": manager.layout().mount_point(drive.index),
                    })
                })
                .collect();
            if pretty {
                println!("{}", serde_json::to_string_pretty(&listing)?);
            } else {
                println!("{}", serde_json::to_string(&listing)?);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Artifact(ArtifactCommand::Check(args)) => {
            let target = target_arch(args.arch.as_deref())?;
            let validation = validate(&SystemTools, &args.binary, &target)?;
            println!("{}", serde_json::to_string(&validation)?);
            Ok(if validation == ArchValidation::Valid {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Artifact(ArtifactCommand::Ensure { target, build }) => {
            let arch = target_arch(target.arch.as_deref())?;
            let builder = CommandBuilder::new(SystemTools, &build)?;
            let outcome = ensure_artifact(&SystemTools, &target.binary, &arch, &builder)?;
            match &outcome {
                EnsureOutcome::Skipped { .. } => info!("binary already built for {}", arch.sm_name()),
                EnsureOutcome::Rebuilt { status, .. } => info!(?status, "binary rebuilt for {}", arch.sm_name()),
            }
            println!("{}", serde_json::to_string(&outcome)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Run { report_base, command } => {
            let config = RigConfig::load(&cli.config)?;
            run(&config, report_base, command)
        }
    }
}

fn manager(config: &RigConfig) -> SystemMountManager {
    system_mount_manager(TARGET_MODEL).with_format_context(FormatContext {
        allow_format: config.disk.format_blank_drives,
    })
}

fn target_arch(explicit: Option<&str>) -> Result<ArchTag> {
    match explicit {
        Some(raw) => ArchTag::parse(raw).ok_or_else(|| anyhow!("invalid architecture '{}'", raw)),
        None => Ok(query_host_arch(&SystemTools)?),
    }
}

fn run(config: &RigConfig, report_base: Option<PathBuf>, command: Vec<String>) -> Result<ExitCode> {
    install_interrupt_handlers()?;
    let manager = manager(config);
    let suite = CommandSuite::new(&command)?;
    let mut record = RunRecord::start(command);
    let result = RunOrchestrator::new(&manager, config).run(&suite);

    let outcome = match result {
        Ok(summary) => {
            record = summary.to_record(record.test_command);
            Ok(summary.exit_code())
        }
        Err(err) => {
            record.error = Some(format!("{:#}", err));
            Err(err)
        }
    };
    if let Some(base) = report_base {
        record.finish();
        let paths = create_run_report(&base, &record).context("write run report")?;
        info!(run_json = %paths.run_json.display(), "run report written");
    }

    let code = outcome?;
    Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
}

fn print_status(report: &StatusReport) {
    if let Some(message) = &report.message {
        println!("{}", message);
    }
    if report.drives_detected {
        println!("{:<5} {:<16} {:<18} {:<18} TARGETS", "IDX", "DEVICE", "SOURCE", "STATE");
        for status in &report.drives {
            let targets = match &status.state {
                MountState::Unmounted => "-".to_string(),
                MountState::MountedByUs { target } => target.display().to_string(),
                MountState::MountedElsewhere { targets } => targets
                    .iter()
                    .map(|target| target.display().to_string())
                    .collect::<Vec<_>>()
                    .join(","),
            };
            println!(
                "{:<5} {:<16} {:<18} {:<18} {}",
                status.drive.index,
                status.drive.device_path.display(),
                status.mount_source.display(),
                status.state.label(),
                targets
            );
        }
    }
    let bound: Vec<_> = report.mount_points.iter().filter(|point| point.is_bound()).collect();
    println!("{} of {} mount points active", bound.len(), report.mount_points.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn unknown_subcommand_is_rejected() {
        assert!(Cli::try_parse_from(["rigprep", "remount"]).is_err());
        assert!(Cli::try_parse_from(["rigprep"]).is_err());
    }

    #[test]
    fn run_takes_trailing_command() {
        let cli = Cli::try_parse_from(["rigprep", "run", "--report-base", "out", "--", "pytest", "-x"]).unwrap();
        match cli.command {
            Command::Run { report_base, command } => {
                assert_eq!(report_base, Some(PathBuf::from("out")));
                assert_eq!(command, vec!["pytest", "-x"]);
            }
            _ => panic!("expected run"),
        }
    }

    fn bad_config(dir: &tempfile::TempDir) -> String {
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "disk:\n  - not\n  - a map\n").unwrap();
        path.to_string_lossy().to_string()
    }

    #[test]
    fn status_ignores_a_malformed_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = bad_config(&dir);
        let cli = Cli::try_parse_from(["rigprep", "--config", config.as_str(), "status", "--json"]).unwrap();
        assert!(dispatch(cli).is_ok());
    }

    #[test]
    fn mount_rejects_a_malformed_config_before_touching_drives() {
        let dir = tempfile::tempdir().unwrap();
        let config = bad_config(&dir);
        let cli = Cli::try_parse_from(["rigprep", "--config", config.as_str(), "mount"]).unwrap();
        let err = dispatch(cli).unwrap_err();
        assert!(format!("{:#}", err).contains("yaml"));
    }

    #[test]
    fn config_defaults_to_suite_file() {
        let cli = Cli::try_parse_from(["rigprep", "status"]).unwrap();
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_PATH));
    }
}
