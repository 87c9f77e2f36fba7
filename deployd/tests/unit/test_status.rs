//! Deployment status state machine tests

use cloudeploy::deploy::fsm::{DeploymentStatus, StatusEvent, StatusFsm};

#[test]
fn test_only_forward_transitions_are_reachable() {
    use DeploymentStatus::*;

    let legal = [
        (Pending, Building),
        (Pending, Failed),
        (Building, Success),
        (Building, Failed),
    ];
    for from in DeploymentStatus::ALL {
        for to in DeploymentStatus::ALL {
            assert_eq!(
                from.can_transition_to(to),
                legal.contains(&(from, to)),
                "{from} -> {to}"
            );
        }
    }
}

#[test]
fn test_terminal_states() {
    assert!(DeploymentStatus::Success.is_terminal());
    assert!(DeploymentStatus::Failed.is_terminal());
    assert!(!DeploymentStatus::Pending.is_terminal());
    assert!(!DeploymentStatus::Building.is_terminal());
}

#[test]
fn test_predecessors_match_transitions() {
    for to in DeploymentStatus::ALL {
        for from in to.predecessors() {
            assert!(from.can_transition_to(to));
        }
    }
    assert!(DeploymentStatus::Pending.predecessors().is_empty());
}

#[test]
fn test_status_wire_format() {
    assert_eq!(
        serde_json::to_string(&DeploymentStatus::Building).unwrap(),
        "\"BUILDING\""
    );
    assert_eq!(
        "SUCCESS".parse::<DeploymentStatus>(),
        Ok(DeploymentStatus::Success)
    );
    assert!("DONE".parse::<DeploymentStatus>().is_err());
}

#[test]
fn test_fsm_failure_after_building() {
    let mut fsm = StatusFsm::new();
    fsm.process(StatusEvent::Launched).unwrap();
    fsm.process(StatusEvent::Failed("exit 1".to_string()))
        .unwrap();

    assert_eq!(fsm.status(), DeploymentStatus::Failed);
    assert_eq!(fsm.error(), Some("exit 1"));
    assert!(fsm.process(StatusEvent::Succeeded).is_err());
}
