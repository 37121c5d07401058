//! Operator-facing rendering of verdicts and diagnostics.

use time::format_description::well_known::Rfc3339;

use crate::coordinator::{RepairVerdict, SessionError, SessionVerdict};
use crate::model::NodeAddress;
use crate::proto::{DiscoverResponse, Rejection};

use super::commands::exit_code_for_session_error;
use super::{EXIT_OK, EXIT_PARTIAL, EXIT_REJECTED, EXIT_UNREACHABLE, EXIT_VALIDATION};

pub fn diagnostic(address: &NodeAddress, response: &DiscoverResponse) {
    let state = if response.has_prepared_tail() {
        "PREPARED"
    } else {
        "ACCEPTING"
    };
    println!("node:                   {address}");
    println!("state:                  {state}");
    println!("mode:                   {}", response.mode);
    println!("current version:        {}", response.current_version);
    println!("highest version:        {}", response.highest_version);
    println!("mutative messages:      {}", response.mutative_message_count);
    match (&response.last_mutation_user, &response.last_mutation_host) {
        (Some(user), Some(host)) => {
            let at = response
                .last_mutation_timestamp
                .and_then(|ts| ts.format(&Rfc3339).ok())
                .unwrap_or_else(|| "unknown".to_string());
            println!("last mutation:          {user}@{host} at {at}");
        }
        _ => println!("last mutation:          none"),
    }
    match &response.latest_change {
        Some(change) => {
            println!(
                "latest change:          {} {} ({})",
                change.uuid,
                change.state,
                change.payload.summary()
            );
        }
        None => println!("latest change:          none"),
    }
    if !response.checkpoints.is_empty() {
        println!("checkpoints:");
        for mark in &response.checkpoints {
            println!("  v{} {} {}", mark.version, mark.uuid, mark.label);
        }
    }
}

pub fn session_verdict(verdict: &SessionVerdict) -> i32 {
    match verdict {
        SessionVerdict::Committed { uuid, version } => {
            println!("committed change {uuid} as version {version}");
            EXIT_OK
        }
        SessionVerdict::RolledBack {
            uuid,
            rejections,
            unreachable,
        } => {
            println!("change {uuid} rolled back");
            for (address, rejection) in rejections {
                println!("  {address}: {rejection}");
            }
            for (address, err) in unreachable {
                println!("  {address}: {err}");
            }
            rolled_back_exit(rejections, !unreachable.is_empty())
        }
        SessionVerdict::PartiallyCommitted {
            uuid,
            version,
            committed,
            failed,
        } => {
            println!(
                "change {uuid} (version {version}) committed on {} of {} nodes; run repair",
                committed.len(),
                committed.len() + failed.len()
            );
            for (address, reason) in failed {
                println!("  {address}: {reason}");
            }
            EXIT_PARTIAL
        }
        SessionVerdict::PartiallyRolledBack {
            uuid,
            rejections,
            rolled_back,
            failed,
        } => {
            println!(
                "change {uuid} rolled back on {} nodes but {} did not acknowledge; run repair",
                rolled_back.len(),
                failed.len()
            );
            for (address, rejection) in rejections {
                println!("  {address}: {rejection}");
            }
            for (address, reason) in failed {
                println!("  {address}: {reason}");
            }
            EXIT_PARTIAL
        }
    }
}

/// An evaluation rejection is operator input that failed validation; other
/// rejections mean the protocol refused us.
fn rolled_back_exit(rejections: &[(NodeAddress, Rejection)], any_unreachable: bool) -> i32 {
    if rejections
        .iter()
        .any(|(_, r)| matches!(r, Rejection::EvaluationReject { .. }))
    {
        EXIT_VALIDATION
    } else if !rejections.is_empty() {
        EXIT_REJECTED
    } else if any_unreachable {
        EXIT_UNREACHABLE
    } else {
        EXIT_REJECTED
    }
}

pub fn repair_verdict(verdict: &RepairVerdict) -> i32 {
    match verdict {
        RepairVerdict::NothingToRepair => {
            println!("nothing to repair; every node is accepting");
            EXIT_OK
        }
        RepairVerdict::Repaired {
            outcome,
            uuid,
            resolved,
            already_resolved,
            stragglers,
        } => {
            println!("repaired change {uuid}: {outcome}");
            for address in resolved {
                println!("  {address}: driven to {outcome}");
            }
            for address in already_resolved {
                println!("  {address}: already resolved");
            }
            print_stragglers(stragglers);
            EXIT_OK
        }
        RepairVerdict::PartiallyRepaired {
            outcome,
            uuid,
            resolved,
            failed,
            stragglers,
        } => {
            println!(
                "repair of change {uuid} ({outcome}) incomplete: {} resolved, {} failed",
                resolved.len(),
                failed.len()
            );
            for (address, reason) in failed {
                println!("  {address}: {reason}");
            }
            print_stragglers(stragglers);
            EXIT_PARTIAL
        }
    }
}

fn print_stragglers(stragglers: &[NodeAddress]) {
    if !stragglers.is_empty() {
        println!("nodes that never saw the change (re-run the change against them):");
        for address in stragglers {
            println!("  {address}");
        }
    }
}

pub fn session_error(err: &SessionError) -> i32 {
    eprintln!("error: {err}");
    if let SessionError::InconsistentCluster { observed } = err {
        for divergence in observed {
            eprintln!(
                "  {}: version {}, latest committed {}",
                divergence.address,
                divergence.current_version,
                divergence
                    .latest_committed_uuid
                    .map(|u| u.to_string())
                    .unwrap_or_else(|| "none".to_string())
            );
        }
    }
    exit_code_for_session_error(err)
}
