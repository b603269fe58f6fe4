//! Command line interface built on clap.
//!
//! [`Cli`] holds the global flags (`--config`, `--timeout`, `--verbose`) and
//! one [`Command`] per orchestrator operation.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::api::{ArtifactSpec, JobFilter};
use crate::state_machine::{JobStatus, TaskType};

/// simcloud: submit, follow and fetch remote FDTD simulations.
#[derive(Debug, Parser)]
#[command(name = "simcloud", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (default: ./simcloud.toml or $SIMCLOUD_CONFIG).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Give up waiting after this many seconds.
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Verbose logging.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

impl Cli {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TaskTypeArg {
    Fdtd,
    ModeSolver,
    Heat,
    Eme,
}

impl From<TaskTypeArg> for TaskType {
    fn from(arg: TaskTypeArg) -> Self {
        match arg {
            TaskTypeArg::Fdtd => TaskType::Fdtd,
            TaskTypeArg::ModeSolver => TaskType::ModeSolver,
            TaskTypeArg::Heat => TaskType::Heat,
            TaskTypeArg::Eme => TaskType::Eme,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ArtifactArg {
    /// Field and monitor data (simulation_data.hdf5).
    Data,
    /// Solver log (output/solver.log).
    Log,
}

impl From<ArtifactArg> for ArtifactSpec {
    fn from(arg: ArtifactArg) -> Self {
        match arg {
            ArtifactArg::Data => ArtifactSpec::simulation_data(),
            ArtifactArg::Log => ArtifactSpec::solver_log(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StatusArg {
    Queued,
    Preprocessing,
    Running,
    Postprocessing,
    Success,
    Error,
    Cancelled,
}

impl From<StatusArg> for JobStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Queued => JobStatus::Queued,
            StatusArg::Preprocessing => JobStatus::Preprocessing,
            StatusArg::Running => JobStatus::Running,
            StatusArg::Postprocessing => JobStatus::Postprocessing,
            StatusArg::Success => JobStatus::Success,
            StatusArg::Error => JobStatus::Error,
            StatusArg::Cancelled => JobStatus::Cancelled,
        }
    }
}

/// A simulation JSON file plus its auxiliary inputs.
#[derive(Debug, Args)]
pub struct SimulationArgs {
    /// Path to the serialized simulation (JSON).
    pub simulation: PathBuf,

    /// Solver to run.
    #[arg(long, value_enum, default_value_t = TaskTypeArg::Fdtd)]
    pub task_type: TaskTypeArg,

    /// Extra input uploaded with the simulation, e.g. a mesh. Repeatable.
    #[arg(long = "attach")]
    pub attachments: Vec<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Uploads a simulation and starts it.
    Submit {
        #[command(flatten)]
        simulation: SimulationArgs,

        /// Job name shown in listings.
        #[arg(long)]
        name: String,
    },

    /// Submits, waits for completion and downloads the results.
    Run {
        #[command(flatten)]
        simulation: SimulationArgs,

        #[arg(long)]
        name: String,

        #[arg(long, value_enum, default_value_t = ArtifactArg::Data)]
        artifact: ArtifactArg,
    },

    /// Follows a job's status until it finishes.
    Monitor { job_id: String },

    /// Waits for a job and downloads an artifact into the cache.
    Download {
        job_id: String,

        #[arg(long, value_enum, default_value_t = ArtifactArg::Data)]
        artifact: ArtifactArg,
    },

    /// Shows the full job record, including billed cost.
    Info { job_id: String },

    /// Deletes a job. Succeeds if it is already gone.
    Delete { job_id: String },

    /// Requests cancellation of a running job.
    Abort { job_id: String },

    /// Lists jobs, newest first.
    List {
        #[arg(long, value_enum)]
        status: Option<StatusArg>,

        /// Only jobs with this name.
        #[arg(long)]
        name: Option<String>,

        /// Stop after this many jobs.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Prints the estimated cost of a simulation without submitting it.
    Estimate {
        #[command(flatten)]
        simulation: SimulationArgs,
    },

    /// Deletes every cached artifact.
    CacheClear,

    /// Forgets the stored credential.
    Logout,
}

impl Command {
    /// Listing filter for [`Command::List`].
    pub fn list_filter(&self) -> Option<JobFilter> {
        match self {
            Command::List {
                status,
                name,
                limit,
            } => Some(JobFilter {
                status: status.map(JobStatus::from),
                name: name.clone(),
                limit: *limit,
                ..JobFilter::default()
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_submit_with_attachments() {
        let cli = Cli::parse_from([
            "simcloud",
            "submit",
            "ring.json",
            "--name",
            "ring",
            "--task-type",
            "mode-solver",
            "--attach",
            "a.stl",
            "--attach",
            "b.stl",
        ]);
        match cli.command {
            Command::Submit { simulation, name } => {
                assert_eq!(name, "ring");
                assert_eq!(simulation.simulation, PathBuf::from("ring.json"));
                assert_eq!(TaskType::from(simulation.task_type), TaskType::ModeSolver);
                assert_eq!(simulation.attachments.len(), 2);
            }
            other => panic!("expected Submit, got {other:?}"),
        }
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "simcloud",
            "--config",
            "/etc/simcloud.toml",
            "--timeout",
            "90",
            "--verbose",
            "monitor",
            "fdve-1",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/simcloud.toml")));
        assert_eq!(cli.timeout(), Some(Duration::from_secs(90)));
        assert!(matches!(cli.command, Command::Monitor { ref job_id } if job_id == "fdve-1"));
    }

    #[test]
    fn download_defaults_to_simulation_data() {
        let cli = Cli::parse_from(["simcloud", "download", "fdve-1"]);
        match cli.command {
            Command::Download { artifact, .. } => {
                assert_eq!(ArtifactSpec::from(artifact), ArtifactSpec::simulation_data());
            }
            other => panic!("expected Download, got {other:?}"),
        }
    }

    #[test]
    fn list_builds_filter() {
        let cli = Cli::parse_from(["simcloud", "list", "--status", "running", "--limit", "5"]);
        let filter = cli.command.list_filter().unwrap();
        assert_eq!(filter.status, Some(JobStatus::Running));
        assert_eq!(filter.limit, Some(5));
        assert!(filter.name.is_none());
    }

    #[test]
    fn cache_clear_is_kebab_case() {
        let cli = Cli::parse_from(["simcloud", "cache-clear"]);
        assert!(matches!(cli.command, Command::CacheClear));
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
