//! Command handlers: resolve the roster, drive sessions, render verdicts.

use std::path::Path;

use tracing::debug;

use crate::audit::AuditTrail;
use crate::change::{ChangePayload, SettingTarget};
use crate::cli::roster::{Member, Roster};
use crate::config;
use crate::coordinator::{
    ChangeCoordinator, RepairPolicy, RepairSession, RepairVerdict, SessionError, SessionVerdict,
};
use crate::journal::ChangeLog;
use crate::model::export::{render as render_config, ExportFormat};
use crate::model::settings::{self, SettingScope};
use crate::model::{Cluster, NodeAddress};
use crate::proto::embedded::read_bootstrap;
use crate::proto::{EmbeddedEndpoint, NodeEndpoint, OriginIdentity};

use super::render;
use super::{
    AttachArgs, CommandFailure, DetachArgs, DiagnosticArgs, ExportArgs, GetArgs, RepairArgs,
    SetArgs, TargetKind, EXIT_OK, EXIT_PARTIAL, EXIT_REJECTED, EXIT_UNREACHABLE,
};

type CommandResult = Result<i32, CommandFailure>;

pub fn export(roster_path: &Path, args: ExportArgs) -> CommandResult {
    let roster = load_roster(roster_path)?;
    let member = find_member(&roster, &args.member)?;
    let configuration = current_configuration(member)?;
    let format: ExportFormat = args
        .format
        .parse()
        .map_err(|e| CommandFailure::validation(format!("{e}")))?;
    let rendered = render_config(&configuration, format)
        .map_err(|e| CommandFailure::validation(format!("export failed: {e}")))?;
    match args.file {
        Some(path) => std::fs::write(&path, rendered).map_err(|e| {
            CommandFailure::validation(format!("cannot write {}: {e}", path.display()))
        })?,
        None => print!("{rendered}"),
    }
    Ok(EXIT_OK)
}

pub fn attach(roster_path: &Path, args: AttachArgs) -> CommandResult {
    let roster = load_roster(roster_path)?;
    let destination = find_member(&roster, &args.destination)?;
    let destination_config = current_configuration(destination)?;
    if destination_config.stripes.is_empty() {
        return Err(CommandFailure::validation(format!(
            "destination {} has no configured cluster to attach to",
            args.destination
        )));
    }

    let source = find_member(&roster, &args.source)?;
    let source_seed = read_bootstrap(&source.dir)
        .map_err(|e| CommandFailure::validation(format!("joining member unusable: {e}")))?;

    // The joining side must be unconfigured; configured nodes already
    // belong to a cluster and must be detached first.
    let (joining_members, payload) = match args.kind {
        TargetKind::Node => {
            let node = source_seed
                .find_node(&args.source)
                .ok_or_else(|| {
                    CommandFailure::validation(format!(
                        "{} does not describe itself in its seed configuration",
                        args.source
                    ))
                })?
                .clone();
            let stripe = destination_config
                .stripe_of(&args.destination)
                .ok_or_else(|| {
                    CommandFailure::validation(format!(
                        "{} is not part of its own cluster configuration",
                        args.destination
                    ))
                })?
                .name
                .clone();
            (vec![source], ChangePayload::AttachNode { stripe, node })
        }
        TargetKind::Stripe => {
            let stripe = source_seed
                .stripe_of(&args.source)
                .ok_or_else(|| {
                    CommandFailure::validation(format!(
                        "{} does not describe its stripe in its seed configuration",
                        args.source
                    ))
                })?
                .clone();
            let mut joining = Vec::with_capacity(stripe.nodes.len());
            for node in &stripe.nodes {
                joining.push(find_member(&roster, &node.address)?);
            }
            (joining, ChangePayload::AttachStripe { stripe })
        }
    };
    for member in &joining_members {
        ensure_unconfigured(member)?;
    }

    let members = cluster_members(&roster, &destination_config)?;
    let exit = run_session(&members, payload)?;
    if exit != EXIT_OK {
        return Ok(exit);
    }

    // Bring the joining side to log parity, the way platform replication
    // seeds a fresh mirror.
    let (source_of_truth, _) = open_log(destination)?;
    for member in joining_members {
        let (mut log, _) = open_log(member)?;
        log.adopt_history(source_of_truth.records()).map_err(|e| {
            CommandFailure::with_code(
                format!("attached, but syncing {} failed: {e}", member.address),
                EXIT_PARTIAL,
            )
        })?;
        debug!(address = %member.address, "joining member synced to cluster history");
    }
    Ok(EXIT_OK)
}

pub fn detach(roster_path: &Path, args: DetachArgs) -> CommandResult {
    let roster = load_roster(roster_path)?;
    let destination = find_member(&roster, &args.destination)?;
    let destination_config = current_configuration(destination)?;

    let payload = match args.kind {
        TargetKind::Node => ChangePayload::DetachNode {
            address: args.source.clone(),
        },
        TargetKind::Stripe => {
            let stripe = destination_config
                .stripe_of(&args.source)
                .ok_or_else(|| {
                    CommandFailure::validation(format!(
                        "{} is not part of the cluster",
                        args.source
                    ))
                })?;
            ChangePayload::DetachStripe {
                name: stripe.name.clone(),
            }
        }
    };

    let members = cluster_members(&roster, &destination_config)?;
    run_session(&members, payload)
}

pub fn set(roster_path: &Path, args: SetArgs) -> CommandResult {
    let roster = load_roster(roster_path)?;
    let member = find_member(&roster, &args.member)?;
    let configuration = current_configuration(member)?;

    let (key, value) = args
        .config
        .split_once('=')
        .ok_or_else(|| CommandFailure::validation("setting must be key=value"))?;
    let value = (!value.is_empty()).then(|| value.to_string());
    let target = match settings::lookup(key).map(|def| def.scope) {
        Some(SettingScope::Node) => SettingTarget::Node {
            address: args.member.clone(),
        },
        // Unknown keys go through as cluster-scoped; evaluation rejects
        // them with the reason the operator should see.
        Some(SettingScope::Cluster) | None => SettingTarget::Cluster,
    };
    let payload = ChangePayload::SettingChange {
        target,
        key: key.to_string(),
        value,
    };

    let members = cluster_members(&roster, &configuration)?;
    run_session(&members, payload)
}

pub fn get(roster_path: &Path, args: GetArgs) -> CommandResult {
    let roster = load_roster(roster_path)?;
    let member = find_member(&roster, &args.member)?;
    let configuration = current_configuration(member)?;

    let value = match args.key.as_str() {
        "cluster-name" => Some(configuration.name.clone()),
        key => match settings::lookup(key).map(|def| def.scope) {
            Some(SettingScope::Node) => configuration
                .find_node(&args.member)
                .and_then(|node| node.settings.get(key).cloned()),
            Some(SettingScope::Cluster) => configuration.settings.get(key).cloned(),
            None => {
                return Err(CommandFailure::validation(format!(
                    "unknown setting {key:?}"
                )))
            }
        },
    };
    println!("{}={}", args.key, value.unwrap_or_default());
    Ok(EXIT_OK)
}

pub fn diagnostic(roster_path: &Path, args: DiagnosticArgs) -> CommandResult {
    let roster = load_roster(roster_path)?;
    let member = find_member(&roster, &args.member)?;
    let endpoint = open_endpoint(member)?;
    let deadline = config::load_or_default().session.deadline();
    let response = endpoint
        .discover(deadline)
        .map_err(|e| CommandFailure::unreachable(e.to_string()))?;
    render::diagnostic(&args.member, &response);
    Ok(EXIT_OK)
}

pub fn repair(roster_path: &Path, args: RepairArgs) -> CommandResult {
    let roster = load_roster(roster_path)?;
    find_member(&roster, &args.member)?;
    let policy = match args.force.as_deref() {
        None => RepairPolicy::Default,
        Some(raw) => raw
            .parse()
            .map_err(|e| CommandFailure::validation(format!("{e}")))?,
    };

    // Repair needs the whole roster's picture, stragglers included.
    let endpoints = open_endpoints(roster.members.iter().collect())?;
    let targets: Vec<&dyn NodeEndpoint> =
        endpoints.iter().map(|e| e as &dyn NodeEndpoint).collect();
    let tool_config = config::load_or_default();
    let trail = AuditTrail::from_config(&tool_config.audit);
    let identity = OriginIdentity::detect();
    let session =
        RepairSession::new(identity.clone()).with_deadline(tool_config.session.deadline());
    match session.run(&targets, policy) {
        Ok(verdict) => {
            trail.record(&identity, "repair", &repair_label(&verdict));
            Ok(render::repair_verdict(&verdict))
        }
        Err(err) => {
            trail.record(&identity, "repair", &format!("aborted ({err})"));
            Ok(render::session_error(&err))
        }
    }
}

fn load_roster(path: &Path) -> Result<Roster, CommandFailure> {
    Roster::load(path).map_err(|e| CommandFailure::validation(e.to_string()))
}

fn find_member<'r>(
    roster: &'r Roster,
    address: &NodeAddress,
) -> Result<&'r Member, CommandFailure> {
    roster
        .member(address)
        .map_err(|e| CommandFailure::validation(e.to_string()))
}

fn open_log(member: &Member) -> Result<(ChangeLog, Cluster), CommandFailure> {
    let bootstrap = read_bootstrap(&member.dir)
        .map_err(|e| CommandFailure::unreachable(e.to_string()))?;
    let (log, _) = ChangeLog::open(&member.dir)
        .map_err(|e| CommandFailure::unreachable(e.to_string()))?;
    Ok((log, bootstrap))
}

fn current_configuration(member: &Member) -> Result<Cluster, CommandFailure> {
    let (log, bootstrap) = open_log(member)?;
    Ok(log.current_configuration().cloned().unwrap_or(bootstrap))
}

fn ensure_unconfigured(member: &Member) -> Result<(), CommandFailure> {
    let (log, _) = open_log(member)?;
    if log.head().is_some() {
        return Err(CommandFailure::validation(format!(
            "{} already carries configuration history; detach it first",
            member.address
        )));
    }
    Ok(())
}

/// Every node of the current cluster, resolved through the roster.
fn cluster_members<'r>(
    roster: &'r Roster,
    configuration: &Cluster,
) -> Result<Vec<&'r Member>, CommandFailure> {
    configuration
        .node_addresses()
        .into_iter()
        .map(|address| find_member(roster, address))
        .collect()
}

fn open_endpoint(member: &Member) -> Result<EmbeddedEndpoint, CommandFailure> {
    EmbeddedEndpoint::open(&member.dir, member.address.clone(), member.mode())
        .map_err(|e| CommandFailure::unreachable(e.to_string()))
}

fn open_endpoints(members: Vec<&Member>) -> Result<Vec<EmbeddedEndpoint>, CommandFailure> {
    members.into_iter().map(open_endpoint).collect()
}

fn run_session(members: &[&Member], payload: ChangePayload) -> CommandResult {
    let endpoints = open_endpoints(members.to_vec())?;
    let targets: Vec<&dyn NodeEndpoint> =
        endpoints.iter().map(|e| e as &dyn NodeEndpoint).collect();
    let tool_config = config::load_or_default();
    let trail = AuditTrail::from_config(&tool_config.audit);
    let identity = OriginIdentity::detect();
    let action = payload.summary();
    let coordinator =
        ChangeCoordinator::new(identity.clone()).with_deadline(tool_config.session.deadline());
    match coordinator.run(&targets, payload) {
        Ok(verdict) => {
            trail.record(&identity, &action, verdict_label(&verdict));
            Ok(render::session_verdict(&verdict))
        }
        Err(err) => {
            trail.record(&identity, &action, &format!("aborted ({err})"));
            Ok(render::session_error(&err))
        }
    }
}

fn verdict_label(verdict: &SessionVerdict) -> &'static str {
    match verdict {
        SessionVerdict::Committed { .. } => "committed",
        SessionVerdict::RolledBack { .. } => "rolled back",
        SessionVerdict::PartiallyCommitted { .. } => "partially committed",
        SessionVerdict::PartiallyRolledBack { .. } => "partially rolled back",
    }
}

fn repair_label(verdict: &RepairVerdict) -> String {
    match verdict {
        RepairVerdict::NothingToRepair => "nothing to repair".to_string(),
        RepairVerdict::Repaired { outcome, .. } => format!("repaired ({outcome})"),
        RepairVerdict::PartiallyRepaired { outcome, .. } => {
            format!("partially repaired ({outcome})")
        }
    }
}

pub(super) fn exit_code_for_session_error(err: &SessionError) -> i32 {
    match err {
        SessionError::PartialCluster { .. } => EXIT_UNREACHABLE,
        SessionError::PriorChangeInFlight { .. } => EXIT_REJECTED,
        SessionError::InconsistentCluster { .. } => EXIT_PARTIAL,
        SessionError::RaceDetected { .. } => EXIT_REJECTED,
        SessionError::Cancelled => EXIT_REJECTED,
    }
}
