//! Interface de linha de comando do issueflow baseada em clap.
//!
//! Subcomandos: `dispatch` (calcula o próximo lote de issues prontas) e
//! `workflow` (executa e inspeciona workflows persistidos).

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::DEFAULT_CONFIG_FILE;

/// issueflow: dependency-aware issue dispatch and resumable workflows.
#[derive(Debug, Parser)]
#[command(name = "issueflow", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Habilita logs detalhados (debug) em stderr.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Computes the dispatch matrix of ready issues and prints it as JSON.
    Dispatch(DispatchArgs),

    /// Runs and inspects persisted workflow instances.
    Workflow {
        #[command(subcommand)]
        command: WorkflowCommand,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceArg {
    /// Open issues carrying `--label`.
    Label,
    /// Project board items whose status is `--ready-status`.
    Project,
}

#[derive(Debug, Args)]
pub struct DispatchArgs {
    /// Repository owner (default: from GITHUB_REPOSITORY).
    #[arg(long)]
    pub owner: Option<String>,

    /// Repository name (default: from GITHUB_REPOSITORY).
    #[arg(long)]
    pub repo: Option<String>,

    /// GitHub token (default: GITHUB_TOKEN).
    #[arg(long)]
    pub token: Option<String>,

    /// Label selecting candidate issues.
    #[arg(long)]
    pub label: Option<String>,

    #[arg(long, value_enum, default_value_t = SourceArg::Label)]
    pub source: SourceArg,

    /// Project board owner (default: --owner).
    #[arg(long)]
    pub project_owner: Option<String>,

    /// Project board number. Non-numeric values are ignored.
    #[arg(long)]
    pub project_number: Option<String>,

    /// Board status that marks an item as ready.
    #[arg(long)]
    pub ready_status: Option<String>,

    /// Board status to set on dispatched items.
    #[arg(long)]
    pub in_progress: Option<String>,

    /// Maximum items per batch; missing, zero or non-numeric means unlimited.
    #[arg(long)]
    pub max_concurrent: Option<String>,

    /// Also write the matrix JSON to this file.
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Compute everything but change nothing on the tracker.
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    /// Fail with CYCLE_DETECTED when dependencies form a cycle.
    #[arg(long, default_value_t = false)]
    pub fail_on_cycle: bool,
}

#[derive(Debug, Subcommand)]
pub enum WorkflowCommand {
    /// Starts or resumes an instance of the workflow in FILE.
    Run {
        /// Workflow definition (.toml or .json).
        file: PathBuf,

        /// Instance id; a new UUID when omitted.
        #[arg(long)]
        id: Option<String>,

        /// Initial context as a JSON object.
        #[arg(long)]
        context: Option<String>,
    },

    /// Prints the stored state of an instance.
    Status { id: String },

    /// Lists stored instance ids.
    List,

    /// Deletes the stored state of an instance.
    Delete { id: String },

    /// Checks a workflow definition without running it.
    Validate { file: PathBuf },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_dispatch_flags() {
        let cli = Cli::parse_from([
            "issueflow",
            "dispatch",
            "--owner",
            "acme",
            "--repo",
            "widgets",
            "--max-concurrent",
            "abc",
            "-o",
            "matrix.json",
            "--dry-run",
            "--fail-on-cycle",
            "-v",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.config, PathBuf::from("issueflow.toml"));
        match cli.command {
            Command::Dispatch(args) => {
                assert_eq!(args.owner.as_deref(), Some("acme"));
                assert_eq!(args.source, SourceArg::Label);
                assert_eq!(args.max_concurrent.as_deref(), Some("abc"));
                assert_eq!(args.output, Some(PathBuf::from("matrix.json")));
                assert!(args.dry_run);
                assert!(args.fail_on_cycle);
            }
            other => panic!("expected Dispatch, got {other:?}"),
        }
    }

    #[test]
    fn cli_parses_workflow_subcommands() {
        let cli = Cli::parse_from([
            "issueflow",
            "workflow",
            "run",
            "flow.toml",
            "--id",
            "issue-12",
            "--context",
            r#"{"issue": 12}"#,
        ]);
        match cli.command {
            Command::Workflow {
                command: WorkflowCommand::Run { file, id, context },
            } => {
                assert_eq!(file, PathBuf::from("flow.toml"));
                assert_eq!(id.as_deref(), Some("issue-12"));
                assert_eq!(context.as_deref(), Some(r#"{"issue": 12}"#));
            }
            other => panic!("expected workflow run, got {other:?}"),
        }

        let cli = Cli::parse_from(["issueflow", "workflow", "delete", "issue-12"]);
        assert!(matches!(
            cli.command,
            Command::Workflow { command: WorkflowCommand::Delete { ref id } } if id == "issue-12"
        ));
    }

    #[test]
    fn cli_rejects_unknown_source() {
        assert!(Cli::try_parse_from(["issueflow", "dispatch", "--source", "jira"]).is_err());
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
