//! Operator tool surface.
//!
//! Exit codes: 0 success, 1 validation error, 2 partial or inconsistent
//! cluster, 3 protocol rejection, 4 unreachable.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::model::NodeAddress;

mod commands;
mod render;
mod roster;

pub use roster::{Member, Roster, RosterError};

pub const EXIT_OK: i32 = 0;
pub const EXIT_VALIDATION: i32 = 1;
pub const EXIT_PARTIAL: i32 = 2;
pub const EXIT_REJECTED: i32 = 3;
pub const EXIT_UNREACHABLE: i32 = 4;

#[derive(Parser, Debug)]
#[command(
    name = "concord",
    version,
    about = "Cluster configuration change tool",
    infer_subcommands = true,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Cluster roster file mapping member addresses to node directories.
    #[arg(long, global = true, value_name = "PATH", env = "CONCORD_CLUSTER")]
    pub cluster: Option<PathBuf>,

    /// Debug output (repeat for more).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Export a member's current configuration.
    Export(ExportArgs),

    /// Attach a node or a stripe to the cluster.
    Attach(AttachArgs),

    /// Detach a node or a stripe from the cluster.
    Detach(DetachArgs),

    /// Change a setting cluster-wide.
    Set(SetArgs),

    /// Read a setting from a member's current configuration.
    Get(GetArgs),

    /// Show a member's protocol state, versions, and counters.
    Diagnostic(DiagnosticArgs),

    /// Resolve a change a prior session left unfinished.
    Repair(RepairArgs),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum TargetKind {
    Node,
    Stripe,
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Member to read from.
    #[arg(short = 's', long = "connect-to", value_name = "HOST:PORT")]
    pub member: NodeAddress,

    /// Output file (stdout when omitted).
    #[arg(short = 'f', long = "file", value_name = "PATH")]
    pub file: Option<PathBuf>,

    /// Output format.
    #[arg(short = 't', long = "format", default_value = "json")]
    pub format: String,
}

#[derive(Args, Debug)]
pub struct AttachArgs {
    /// What to attach.
    #[arg(short = 't', long = "type", value_enum, default_value = "node")]
    pub kind: TargetKind,

    /// A member of the destination cluster.
    #[arg(short = 'd', long = "destination", value_name = "HOST:PORT")]
    pub destination: NodeAddress,

    /// The joining member.
    #[arg(short = 's', long = "source", value_name = "HOST:PORT")]
    pub source: NodeAddress,
}

#[derive(Args, Debug)]
pub struct DetachArgs {
    /// What to detach.
    #[arg(short = 't', long = "type", value_enum, default_value = "node")]
    pub kind: TargetKind,

    /// A member of the destination cluster.
    #[arg(short = 'd', long = "destination", value_name = "HOST:PORT")]
    pub destination: NodeAddress,

    /// The member to remove (for stripes, any member of that stripe).
    #[arg(short = 's', long = "source", value_name = "HOST:PORT")]
    pub source: NodeAddress,
}

#[derive(Args, Debug)]
pub struct SetArgs {
    /// Member to apply the change through.
    #[arg(short = 's', long = "connect-to", value_name = "HOST:PORT")]
    pub member: NodeAddress,

    /// Setting as key=value; node-scoped keys apply to the connected
    /// member.
    #[arg(short = 'c', long = "config", value_name = "KEY=VALUE")]
    pub config: String,
}

#[derive(Args, Debug)]
pub struct GetArgs {
    /// Member to read from.
    #[arg(short = 's', long = "connect-to", value_name = "HOST:PORT")]
    pub member: NodeAddress,

    /// Setting key.
    #[arg(short = 'c', long = "config", value_name = "KEY")]
    pub key: String,
}

#[derive(Args, Debug)]
pub struct DiagnosticArgs {
    /// Member to probe.
    #[arg(short = 's', long = "connect-to", value_name = "HOST:PORT")]
    pub member: NodeAddress,
}

#[derive(Args, Debug)]
pub struct RepairArgs {
    /// Any member of the cluster to repair.
    #[arg(short = 's', long = "connect-to", value_name = "HOST:PORT")]
    pub member: NodeAddress,

    /// Force the outcome when no node holds terminal evidence.
    #[arg(long = "force", value_name = "commit|rollback")]
    pub force: Option<String>,
}

pub fn parse_from<I, T>(args: I) -> Cli
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    Cli::parse_from(args)
}

/// Run one command; the return value is the process exit code.
pub fn run(cli: Cli) -> i32 {
    let roster_path = cli
        .cluster
        .clone()
        .unwrap_or_else(|| PathBuf::from("cluster.toml"));
    let outcome = match cli.command {
        Commands::Export(args) => commands::export(&roster_path, args),
        Commands::Attach(args) => commands::attach(&roster_path, args),
        Commands::Detach(args) => commands::detach(&roster_path, args),
        Commands::Set(args) => commands::set(&roster_path, args),
        Commands::Get(args) => commands::get(&roster_path, args),
        Commands::Diagnostic(args) => commands::diagnostic(&roster_path, args),
        Commands::Repair(args) => commands::repair(&roster_path, args),
    };
    match outcome {
        Ok(code) => code,
        Err(failure) => {
            eprintln!("{failure}");
            failure.exit_code()
        }
    }
}

/// A command that could not produce a verdict at all.
#[derive(Debug)]
pub struct CommandFailure {
    pub message: String,
    code: i32,
}

impl CommandFailure {
    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: EXIT_VALIDATION,
        }
    }

    pub fn unreachable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: EXIT_UNREACHABLE,
        }
    }

    pub fn with_code(message: impl Into<String>, code: i32) -> Self {
        Self {
            message: message.into(),
            code,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.code
    }
}

impl std::fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "error: {}", self.message)
    }
}
