//! Property tests for the protocol's universal invariants.

mod fixtures;

use proptest::prelude::*;
use tempfile::TempDir;

use concord_rs::change::{evaluate, ChangePayload, ChangeUuid, SettingTarget, Version};
use concord_rs::journal::ChangeLog;
use concord_rs::model::{Node, NodeAddress};
use concord_rs::node::NodeStateMachine;
use concord_rs::proto::{
    CommitRequest, OriginIdentity, PrepareRequest, RollbackRequest, ServerMode, TakeOverRequest,
};

use fixtures::single_stripe_cluster;

fn identity() -> OriginIdentity {
    OriginIdentity::new("opshost", "prop")
}

// =========================================================================
// Invariant 5: evaluator determinism
// =========================================================================

fn arb_payload() -> impl Strategy<Value = ChangePayload> {
    let setting = (
        prop_oneof![
            Just("offheap-resources".to_string()),
            Just("client-lease-duration".to_string()),
            Just("node-log-dir".to_string()),
            Just("cluster-name".to_string()),
            "[a-z-]{1,12}",
        ],
        prop_oneof![
            Just(Some("main:512MB".to_string())),
            Just(Some("150s".to_string())),
            Just(Some("/var/log".to_string())),
            Just(None),
            "[a-zA-Z0-9:/]{0,12}".prop_map(Some),
        ],
        any::<bool>(),
    )
        .prop_map(|(key, value, cluster_scope)| ChangePayload::SettingChange {
            target: if cluster_scope {
                SettingTarget::Cluster
            } else {
                SettingTarget::Node {
                    address: fixtures::address(0),
                }
            },
            key,
            value,
        });

    let attach = ("[a-z]{1,8}", 0u16..4).prop_map(|(host, i)| ChangePayload::AttachNode {
        stripe: "stripe1".to_string(),
        node: Node::new(
            format!("joiner-{host}"),
            NodeAddress::new(host, 9410 + i * 100),
        ),
    });

    let detach = (0usize..3).prop_map(|i| ChangePayload::DetachNode {
        address: fixtures::address(i),
    });

    prop_oneof![setting, attach, detach]
}

proptest! {
    #[test]
    fn evaluator_is_deterministic(payload in arb_payload(), nodes in 1usize..4) {
        let current = single_stripe_cluster(nodes);
        let first = evaluate(&current, &payload);
        for _ in 0..4 {
            prop_assert_eq!(evaluate(&current, &payload), first.clone());
        }
    }

    // Invariant 8: record round-trips are the identity.
    #[test]
    fn records_roundtrip_through_the_wire(payload in arb_payload()) {
        let record = concord_rs::change::ChangeRecord::prepared(
            ChangeUuid::mint(),
            None,
            Version::GENESIS,
            payload,
            single_stripe_cluster(2),
            concord_rs::change::ChangeAudit::new(
                "opshost",
                "prop",
                time::macros::datetime!(2024-03-01 12:00 UTC),
            ),
        );
        let json = serde_json::to_string(&record).unwrap();
        let back: concord_rs::change::ChangeRecord = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(back, record);
    }
}

// =========================================================================
// Invariants 1-4: chain integrity, monotonic commit, at-most-one-in-flight,
// counter monotonicity, under arbitrary request sequences.
// =========================================================================

#[derive(Clone, Debug)]
enum Action {
    PrepareFresh,
    PrepareStaleCounter,
    PrepareBadVersion,
    CommitTail,
    CommitWrongUuid,
    RollbackTail,
    TakeOverTail,
}

fn arb_actions() -> impl Strategy<Value = Vec<Action>> {
    prop::collection::vec(
        prop_oneof![
            3 => Just(Action::PrepareFresh),
            1 => Just(Action::PrepareStaleCounter),
            1 => Just(Action::PrepareBadVersion),
            3 => Just(Action::CommitTail),
            1 => Just(Action::CommitWrongUuid),
            2 => Just(Action::RollbackTail),
            1 => Just(Action::TakeOverTail),
        ],
        0..24,
    )
}

fn check_invariants(machine: &NodeStateMachine, last_count: u64, last_current: Version) {
    let log = machine.log();

    // 1: chain integrity.
    let records = log.records();
    for (i, record) in records.iter().enumerate() {
        assert_eq!(record.version, Version::new(i as u64 + 1));
        if i == 0 {
            assert_eq!(record.parent_uuid, None);
        } else {
            assert_eq!(record.parent_uuid, Some(records[i - 1].uuid));
        }
    }

    // 3: at most one non-terminal record, and only at the tail.
    let open = records.iter().filter(|r| !r.is_terminal()).count();
    assert!(open <= 1);
    if open == 1 {
        assert!(!records.last().unwrap().is_terminal());
    }

    // 2 and 4 are monotonicity claims relative to the previous observation.
    assert!(log.mutation_count() >= last_count);
    assert!(log.current_version() >= last_current);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]
    #[test]
    fn node_invariants_hold_under_arbitrary_sequences(actions in arb_actions()) {
        let dir = TempDir::new().unwrap();
        let (log, _) = ChangeLog::open(dir.path()).unwrap();
        let mut machine =
            NodeStateMachine::new(log, single_stripe_cluster(1), ServerMode::ActiveCoordinator);

        let mut joiner = 0u16;
        for action in actions {
            let count = machine.log().mutation_count();
            let current = machine.log().current_version();
            let tail_uuid = machine.log().head().map(|r| r.uuid);
            let next_version = machine.log().highest_version().next();

            match action {
                Action::PrepareFresh => {
                    joiner += 1;
                    let tail_open = machine.log().head().is_some_and(|r| !r.is_terminal());
                    let response = machine
                        .prepare(PrepareRequest {
                            expected_mutative_count: count,
                            change_uuid: ChangeUuid::mint(),
                            new_version: next_version,
                            payload: ChangePayload::AttachNode {
                                stripe: "stripe1".to_string(),
                                node: Node::new(
                                    format!("joiner{joiner}"),
                                    NodeAddress::new(format!("joiner{joiner}"), 9410),
                                ),
                            },
                            identity: identity(),
                        })
                        .unwrap();
                    // Legal exactly when the tail is terminal.
                    prop_assert_eq!(response.accepted, !tail_open);
                    if response.accepted {
                        prop_assert_eq!(response.mutative_message_count, count + 1);
                    }
                }
                Action::PrepareStaleCounter => {
                    let response = machine
                        .prepare(PrepareRequest {
                            expected_mutative_count: count + 17,
                            change_uuid: ChangeUuid::mint(),
                            new_version: next_version,
                            payload: ChangePayload::DetachNode {
                                address: fixtures::address(0),
                            },
                            identity: identity(),
                        })
                        .unwrap();
                    prop_assert!(!response.accepted);
                    prop_assert_eq!(machine.log().mutation_count(), count);
                }
                Action::PrepareBadVersion => {
                    let response = machine
                        .prepare(PrepareRequest {
                            expected_mutative_count: count,
                            change_uuid: ChangeUuid::mint(),
                            new_version: next_version.next(),
                            payload: ChangePayload::DetachNode {
                                address: fixtures::address(0),
                            },
                            identity: identity(),
                        })
                        .unwrap();
                    prop_assert!(!response.accepted);
                }
                Action::CommitTail => {
                    if let Some(uuid) = tail_uuid {
                        let response = machine
                            .commit(CommitRequest {
                                expected_mutative_count: count,
                                change_uuid: uuid,
                                identity: identity(),
                            })
                            .unwrap();
                        if response.accepted {
                            prop_assert!(response.current_version >= current);
                        }
                    }
                }
                Action::CommitWrongUuid => {
                    if tail_uuid.is_some() {
                        let response = machine
                            .commit(CommitRequest {
                                expected_mutative_count: count,
                                change_uuid: ChangeUuid::mint(),
                                identity: identity(),
                            })
                            .unwrap();
                        prop_assert!(!response.accepted);
                    }
                }
                Action::RollbackTail => {
                    if let Some(uuid) = tail_uuid {
                        let response = machine
                            .rollback(RollbackRequest {
                                expected_mutative_count: count,
                                change_uuid: uuid,
                                identity: identity(),
                            })
                            .unwrap();
                        if response.accepted {
                            prop_assert_eq!(response.current_version, current);
                        }
                    }
                }
                Action::TakeOverTail => {
                    if let Some(uuid) = tail_uuid {
                        let response = machine
                            .take_over(TakeOverRequest {
                                expected_mutative_count: count,
                                change_uuid: uuid,
                                identity: identity(),
                            })
                            .unwrap();
                        if response.accepted {
                            prop_assert_eq!(response.mutative_message_count, count + 1);
                        }
                    }
                }
            }
            check_invariants(&machine, count, current);
        }

        // The log replays to the same state it acknowledged.
        let final_records = machine.log().records().to_vec();
        let final_count = machine.log().mutation_count();
        drop(machine);
        let (reopened, _) = ChangeLog::open(dir.path()).unwrap();
        prop_assert_eq!(reopened.records(), final_records.as_slice());
        prop_assert_eq!(reopened.mutation_count(), final_count);
    }
}
