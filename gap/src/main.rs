//! Gated Agent Protocol command-line front end.
//!
//! Every command recomputes from the manifest, the filesystem and the ledger;
//! nothing is cached between invocations.

use std::env;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};

use gap::audit::audit;
use gap::checkpoint::{self, CheckpointDecision};
use gap::core::graph::validate_manifest;
use gap::core::types::{Finding, has_errors};
use gap::exit_codes;
use gap::gate::{approve_step, list_proposals, reject_step};
use gap::io::acl_store::load_for_step;
use gap::io::config::{DB_URL_ENV, GapConfig, database_path_from_url, load_config};
use gap::io::manifest_store::load_manifest;
use gap::io::paths::GapPaths;
use gap::ledger::{
    Ledger, SqlLedger, YamlLedger, open_ledger, open_ledger_or_degraded, project_name,
};
use gap::logging;
use gap::manifest::Manifest;
use gap::migrate::migrate;
use gap::status::{drifted, render_status};

#[derive(Parser)]
#[command(
    name = "gap",
    version,
    about = "Gated Agent Protocol: human approval gates for agent-produced artifacts"
)]
struct Cli {
    /// Project root directory.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Manifest path (defaults to `<root>/manifest.yaml`).
    #[arg(long, global = true)]
    manifest: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print every step with its resolved status.
    Status,
    /// Check the manifest dependency graph.
    Validate,
    /// Check traceability between requirements, design and tasks.
    Audit,
    /// Manage staged proposals.
    Gate {
        #[command(subcommand)]
        command: GateCommand,
    },
    /// Runtime checkpoints between tasks.
    Checkpoint {
        #[command(subcommand)]
        command: CheckpointCommand,
    },
    /// Copy completed steps from one ledger backend to the other.
    Migrate {
        /// Target backend.
        #[arg(long, value_enum, default_value_t = Backend::Sqlite)]
        to: Backend,
        /// SQLite database (`sqlite://path` or a plain path); falls back to `GAP_DB_URL`.
        #[arg(long)]
        db: Option<String>,
    },
    /// Evaluate requests against a step's approved access control list.
    Acl {
        #[command(subcommand)]
        command: AclCommand,
    },
}

#[derive(Subcommand)]
enum GateCommand {
    /// List staged proposals.
    List,
    /// Promote a step's proposal to its live artifact.
    Approve {
        step: String,
        #[arg(long)]
        approver: Option<String>,
    },
    /// Discard a step's proposal.
    Reject { step: String },
}

#[derive(Subcommand)]
enum CheckpointCommand {
    /// Exit 0 if the task may proceed, 1 if it is blocked.
    Verify {
        task: String,
        #[arg(long)]
        phase: Option<String>,
    },
    /// Authorize a paused task.
    Approve {
        task: String,
        #[arg(long)]
        phase: Option<String>,
        #[arg(long)]
        approver: Option<String>,
    },
}

#[derive(Subcommand)]
enum AclCommand {
    /// Exit 0 if writing `path` is permitted.
    CheckWrite { step: String, path: String },
    /// Exit 0 if running the command is permitted.
    CheckExec {
        step: String,
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Backend {
    Yaml,
    Sqlite,
}

fn main() {
    logging::init();
    let code = match run(Cli::parse()) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            exit_codes::FAILURE
        }
    };
    std::process::exit(code);
}

/// Loaded project context shared by commands.
struct Project {
    paths: GapPaths,
    manifest: Manifest,
    config: GapConfig,
}

impl Project {
    fn load(cli: &Cli) -> Result<Self> {
        let paths = GapPaths::new(&cli.root);
        let manifest_path = cli
            .manifest
            .clone()
            .unwrap_or_else(|| paths.manifest_path());
        let manifest = load_manifest(&manifest_path)?;
        let config = load_config(&paths.config_path)?;
        Ok(Self {
            paths,
            manifest,
            config,
        })
    }

    fn approver(&self, explicit: Option<String>) -> String {
        explicit.unwrap_or_else(|| self.config.approver.clone())
    }
}

fn run(cli: Cli) -> Result<i32> {
    let project = Project::load(&cli)?;
    match cli.command {
        Command::Status => cmd_status(&project),
        Command::Validate => Ok(report(&validate_manifest(&project.manifest), "manifest is valid")),
        Command::Audit => Ok(report(
            &audit(&project.paths.root, &project.manifest),
            "traceability audit passed",
        )),
        Command::Gate { command } => cmd_gate(&project, command),
        Command::Checkpoint { command } => cmd_checkpoint(&project, command),
        Command::Migrate { to, db } => cmd_migrate(&project, to, db),
        Command::Acl { command } => cmd_acl(&project, command),
    }
}

fn cmd_status(project: &Project) -> Result<i32> {
    let ledger = open_ledger_or_degraded(&project.paths, &project.manifest, &project.config);
    let statuses = ledger.get_status(&project.manifest);
    println!(
        "{} ({})",
        project.manifest.name,
        project.manifest.protocol_label()
    );
    for line in render_status(&project.manifest, &statuses) {
        println!("{line}");
    }
    let drift = drifted(&statuses);
    if !drift.is_empty() {
        println!(
            "drift detected (live artifact with incomplete dependencies): {}",
            drift.join(", ")
        );
    }
    Ok(exit_codes::OK)
}

/// Print findings; nonzero exit if any is an error.
fn report(findings: &[Finding], clean: &str) -> i32 {
    if findings.is_empty() {
        println!("{clean}");
        return exit_codes::OK;
    }
    for finding in findings {
        println!("{finding}");
    }
    if has_errors(findings) {
        exit_codes::FAILURE
    } else {
        exit_codes::OK
    }
}

fn cmd_gate(project: &Project, command: GateCommand) -> Result<i32> {
    match command {
        GateCommand::List => {
            let proposals = list_proposals(&project.paths)?;
            if proposals.is_empty() {
                println!("no pending proposals");
            }
            for proposal in proposals {
                println!("{}", proposal.display());
            }
        }
        GateCommand::Approve { step, approver } => {
            let ledger = open_ledger(&project.paths, &project.manifest, &project.config)?;
            let approver = project.approver(approver);
            let approval = approve_step(&project.paths, &project.manifest, &ledger, &step, &approver)?;
            println!("approved {}: {}", approval.step, approval.live_path.display());
        }
        GateCommand::Reject { step } => {
            let removed = reject_step(&project.paths, &project.manifest, &step)?;
            println!("rejected {step}: removed {}", removed.display());
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_checkpoint(project: &Project, command: CheckpointCommand) -> Result<i32> {
    let ledger = open_ledger(&project.paths, &project.manifest, &project.config)?;
    match command {
        CheckpointCommand::Verify { task, phase } => {
            let decision = checkpoint::verify(&project.manifest, &ledger, &task, phase.as_deref())?;
            match &decision {
                CheckpointDecision::Proceed { reason } => {
                    println!("proceed: {reason}");
                    Ok(exit_codes::OK)
                }
                CheckpointDecision::Blocked {
                    strategy,
                    remediation,
                } => {
                    println!("checkpoint reached: {task}");
                    println!("strategy: {strategy}");
                    println!("action required: {remediation}");
                    Ok(exit_codes::BLOCKED)
                }
            }
        }
        CheckpointCommand::Approve {
            task,
            phase,
            approver,
        } => {
            let approver = project.approver(approver);
            checkpoint::approve(&ledger, &task, phase.as_deref(), &approver)?;
            println!("approved checkpoint for {task}");
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_migrate(project: &Project, to: Backend, db: Option<String>) -> Result<i32> {
    let database = match db.or_else(|| env::var(DB_URL_ENV).ok()) {
        Some(url) => database_path_from_url(&url)?,
        None => project.config.ledger.database.clone(),
    };
    let sql = SqlLedger::open_sql(
        project.paths.clone(),
        database.clone(),
        project_name(&project.manifest, &project.config),
        &project.manifest.protocol_label(),
    )?;
    let yaml = YamlLedger::open_yaml(project.paths.clone());
    let (migrated, location) = match to {
        Backend::Sqlite => (
            migrate(&project.manifest, &yaml, &sql)?,
            project.paths.resolve(&database),
        ),
        Backend::Yaml => (
            migrate(&project.manifest, &sql, &yaml)?,
            project.paths.ledger_path.clone(),
        ),
    };
    println!(
        "migrated {} record(s) to {}",
        migrated.len(),
        location.display()
    );
    Ok(exit_codes::OK)
}

fn cmd_acl(project: &Project, command: AclCommand) -> Result<i32> {
    let (step, outcome) = match command {
        AclCommand::CheckWrite { step, path } => {
            let enforcer = load_for_step(&project.paths, &project.manifest, &step)?;
            let outcome = enforcer.validate_write(&path);
            (step, outcome)
        }
        AclCommand::CheckExec { step, command } => {
            let enforcer = load_for_step(&project.paths, &project.manifest, &step)?;
            let outcome = enforcer.validate_exec(&command.join(" "));
            (step, outcome)
        }
    };
    match outcome {
        Ok(()) => {
            println!("permitted by {step}");
            Ok(exit_codes::OK)
        }
        Err(denied) => {
            println!("{denied}");
            Ok(exit_codes::BLOCKED)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_status_with_global_root() {
        let cli = Cli::parse_from(["gap", "status", "--root", "/tmp/project"]);
        assert!(matches!(cli.command, Command::Status));
        assert_eq!(cli.root, PathBuf::from("/tmp/project"));
    }

    #[test]
    fn parse_checkpoint_verify_with_phase() {
        let cli = Cli::parse_from(["gap", "checkpoint", "verify", "T-1", "--phase", "build"]);
        match cli.command {
            Command::Checkpoint {
                command: CheckpointCommand::Verify { task, phase },
            } => {
                assert_eq!(task, "T-1");
                assert_eq!(phase.as_deref(), Some("build"));
            }
            _ => panic!("expected checkpoint verify"),
        }
    }

    #[test]
    fn parse_check_exec_keeps_flags_in_command() {
        let cli = Cli::parse_from(["gap", "acl", "check-exec", "design", "cargo", "test", "--all"]);
        match cli.command {
            Command::Acl {
                command: AclCommand::CheckExec { step, command },
            } => {
                assert_eq!(step, "design");
                assert_eq!(command, vec!["cargo", "test", "--all"]);
            }
            _ => panic!("expected acl check-exec"),
        }
    }

    #[test]
    fn migrate_defaults_to_sqlite() {
        let cli = Cli::parse_from(["gap", "migrate"]);
        assert!(matches!(
            cli.command,
            Command::Migrate {
                to: Backend::Sqlite,
                db: None
            }
        ));
    }
}
