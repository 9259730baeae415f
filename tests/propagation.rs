use std::sync::Arc;

use wc26_bracket::bracket::{BracketGraph, NodeId, Slot};
use wc26_bracket::collaborators::PredictionStore;
use wc26_bracket::error::BracketError;
use wc26_bracket::memory::{FixedGate, MemoryBackend};
use wc26_bracket::prediction::PredictionStatus;
use wc26_bracket::reachability::ReachabilityChecker;
use wc26_bracket::scoring::PointsTable;
use wc26_bracket::service::BracketService;
use wc26_bracket::third_place::ThirdPlaceTable;

const USER: u64 = 1;

fn service(enforced: bool) -> (BracketService, MemoryBackend) {
    let backend = MemoryBackend {
        gate: Arc::new(FixedGate::new(enforced)),
        ..MemoryBackend::new()
    };
    let service = BracketService::new(
        Arc::new(BracketGraph::world_cup_2026().unwrap()),
        Arc::new(ThirdPlaceTable::derived_2026().unwrap().clone()),
        PointsTable::default(),
        backend.collaborators(),
    );
    (service, backend)
}

/// Every group finishes in seed order: team `A2` is second in group A.
fn seeded(enforced: bool) -> (BracketService, MemoryBackend) {
    let (service, backend) = service(enforced);
    for group in "ABCDEFGHIJKL".chars() {
        for position in 1..=4u8 {
            backend
                .standings
                .set_place(USER, group, position, &format!("{group}{position}"));
        }
    }
    service.seed_user(USER).unwrap();
    (service, backend)
}

fn slot(service: &BracketService, node: u16, slot: Slot) -> Option<String> {
    service
        .prediction(USER, NodeId(node))
        .unwrap()
        .and_then(|p| p.slot_team(slot).map(str::to_string))
}

fn winner(service: &BracketService, node: u16) -> Option<String> {
    service.prediction(USER, NodeId(node)).unwrap().unwrap().winner
}

fn status(service: &BracketService, node: u16) -> PredictionStatus {
    service.prediction(USER, NodeId(node)).unwrap().unwrap().status
}

/// A2 through M73, M90, M97 and M101 into the final.
fn advance_a2(service: &BracketService) {
    service.set_winner(USER, NodeId(73), Some("A2")).unwrap();
    service.set_winner(USER, NodeId(75), Some("F1")).unwrap();
    service.set_winner(USER, NodeId(90), Some("A2")).unwrap();
    service.set_winner(USER, NodeId(97), Some("A2")).unwrap();
    service.set_winner(USER, NodeId(101), Some("A2")).unwrap();
}

#[test]
fn seeding_fills_group_slots_and_leaves_the_rest_empty() {
    let (service, _backend) = seeded(false);
    assert_eq!(slot(&service, 73, Slot::One).as_deref(), Some("A2"));
    assert_eq!(slot(&service, 73, Slot::Two).as_deref(), Some("B2"));
    assert_eq!(slot(&service, 74, Slot::One).as_deref(), Some("E1"));
    assert_eq!(slot(&service, 74, Slot::Two), None);
    assert_eq!(slot(&service, 90, Slot::One), None);
    assert_eq!(status(&service, 104), PredictionStatus::Invalid);

    // Re-seeding keeps existing rows.
    service.set_winner(USER, NodeId(73), Some("A2")).unwrap();
    assert_eq!(service.seed_user(USER).unwrap(), 0);
    assert_eq!(winner(&service, 73).as_deref(), Some("A2"));
}

#[test]
fn winner_propagates_into_the_next_slot() {
    let (service, _backend) = seeded(false);
    advance_a2(&service);

    assert_eq!(slot(&service, 90, Slot::One).as_deref(), Some("A2"));
    assert_eq!(slot(&service, 90, Slot::Two).as_deref(), Some("F1"));
    assert_eq!(slot(&service, 97, Slot::Two).as_deref(), Some("A2"));
    assert_eq!(slot(&service, 101, Slot::One).as_deref(), Some("A2"));
    assert_eq!(slot(&service, 104, Slot::One).as_deref(), Some("A2"));
    assert_eq!(status(&service, 101), PredictionStatus::Valid);
}

#[test]
fn changing_an_upstream_pick_clears_every_downstream_winner() {
    let (service, _backend) = seeded(false);
    advance_a2(&service);

    service.set_winner(USER, NodeId(73), Some("B2")).unwrap();

    assert_eq!(slot(&service, 90, Slot::One).as_deref(), Some("B2"));
    for node in [90, 97, 101] {
        assert_eq!(winner(&service, node), None, "M{node}");
        assert_eq!(status(&service, node), PredictionStatus::Invalid, "M{node}");
    }
    assert_eq!(slot(&service, 97, Slot::Two), None);
    assert_eq!(slot(&service, 101, Slot::One), None);
    assert_eq!(slot(&service, 104, Slot::One), None);
    // Unrelated branch untouched.
    assert_eq!(winner(&service, 75).as_deref(), Some("F1"));
}

#[test]
fn replaying_a_call_reproduces_the_same_rows() {
    let (service, backend) = seeded(false);
    advance_a2(&service);
    service.set_winner(USER, NodeId(73), Some("B2")).unwrap();
    let once = backend.predictions.load_user(USER).unwrap();

    service.set_winner(USER, NodeId(73), Some("B2")).unwrap();
    service.set_slot(USER, NodeId(73), 1, Some("A2")).unwrap();
    service.set_slot(USER, NodeId(73), 1, Some("A2")).unwrap();
    assert_eq!(backend.predictions.load_user(USER).unwrap(), once);
}

#[test]
fn rejected_inputs_write_nothing() {
    let (service, backend) = seeded(false);
    advance_a2(&service);
    let before = backend.predictions.load_user(USER).unwrap();

    let err = service
        .set_winner(USER, NodeId(73), Some("C1"))
        .unwrap_err();
    assert!(matches!(err, BracketError::InvalidInput(_)));
    let err = service.set_slot(USER, NodeId(73), 3, Some("C1")).unwrap_err();
    assert!(matches!(err, BracketError::InvalidInput(_)));
    let err = service.set_winner(USER, NodeId(12), None).unwrap_err();
    assert!(matches!(err, BracketError::InvalidInput(_)));

    assert_eq!(backend.predictions.load_user(USER).unwrap(), before);
}

#[test]
fn missing_row_is_ignored() {
    let (service, backend) = service(false);
    service.set_winner(7, NodeId(73), Some("A2")).unwrap();
    service.set_slot(7, NodeId(90), 1, None).unwrap();
    assert!(backend.predictions.is_empty());
}

#[test]
fn group_place_change_flows_into_round_of_32() {
    let (service, _backend) = seeded(false);
    advance_a2(&service);

    let touched = service
        .on_group_place_changed(USER, 'a', 2, Some("A2"), Some("A4"))
        .unwrap();
    assert_eq!(touched, vec![(NodeId(73), Slot::One)]);
    assert_eq!(slot(&service, 73, Slot::One).as_deref(), Some("A4"));
    assert_eq!(winner(&service, 73), None);
    assert_eq!(slot(&service, 90, Slot::One), None);
    assert_eq!(winner(&service, 101), None);

    let err = service
        .on_group_place_changed(USER, 'Q', 1, None, Some("X"))
        .unwrap_err();
    assert!(matches!(err, BracketError::InvalidInput(_)));
}

#[test]
fn round_of_32_picks_are_trusted_when_enforced() {
    let (service, backend) = seeded(true);
    service.set_winner(USER, NodeId(73), Some("A2")).unwrap();
    assert_eq!(status(&service, 73), PredictionStatus::Valid);

    let checker = ReachabilityChecker::new(service.graph(), backend.results.as_ref());
    assert!(checker.can_occupy(NodeId(73), "A2").unwrap());
    assert!(checker.can_occupy(NodeId(73), "anyone").unwrap());
}

#[test]
fn known_contestants_make_other_picks_unreachable() {
    let (service, backend) = seeded(true);
    backend.results.set_teams(NodeId(73), "A2", "B2").unwrap();
    backend.results.set_teams(NodeId(75), "C2", "F2").unwrap();

    service.set_winner(USER, NodeId(75), Some("F1")).unwrap();
    assert_eq!(status(&service, 75), PredictionStatus::Unreachable);
    let p = service.prediction(USER, NodeId(75)).unwrap().unwrap();
    assert!(!p.slot1_valid);
    assert!(p.slot2_valid);

    // Flipping the gate off and refreshing clears the flag.
    backend.gate.set(false);
    assert!(service.refresh_statuses(USER).unwrap() > 0);
    assert_eq!(status(&service, 75), PredictionStatus::Valid);
}

#[test]
fn semi_final_loser_feeds_the_third_place_match() {
    let (service, _backend) = seeded(false);
    advance_a2(&service);
    // K2 through M83, M93, M98 into the other side of M101.
    service.set_winner(USER, NodeId(83), Some("K2")).unwrap();
    service.set_winner(USER, NodeId(93), Some("K2")).unwrap();
    service.set_winner(USER, NodeId(98), Some("K2")).unwrap();
    assert_eq!(slot(&service, 103, Slot::One).as_deref(), Some("K2"));

    service.set_winner(USER, NodeId(101), Some("K2")).unwrap();
    assert_eq!(slot(&service, 103, Slot::One).as_deref(), Some("A2"));
    assert_eq!(slot(&service, 104, Slot::One).as_deref(), Some("K2"));
}
