use std::sync::Arc;

use wc26_bracket::bracket::{BracketGraph, NodeId};
use wc26_bracket::collaborators::EliminationTracker;
use wc26_bracket::memory::MemoryBackend;
use wc26_bracket::prediction::{PredictionStatus, PredictionView};
use wc26_bracket::scoring::PointsTable;
use wc26_bracket::service::BracketService;
use wc26_bracket::third_place::ThirdPlaceTable;

const USER: u64 = 4;

fn seeded() -> (BracketService, MemoryBackend) {
    let backend = MemoryBackend::new();
    let service = BracketService::new(
        Arc::new(BracketGraph::world_cup_2026().unwrap()),
        Arc::new(ThirdPlaceTable::derived_2026().unwrap().clone()),
        PointsTable::default(),
        backend.collaborators(),
    );
    for group in "ABCDEFGHIJKL".chars() {
        for position in 1..=4u8 {
            backend
                .standings
                .set_place(USER, group, position, &format!("{group}{position}"));
        }
    }
    service.seed_user(USER).unwrap();
    service.set_winner(USER, NodeId(73), Some("A2")).unwrap();
    service.set_winner(USER, NodeId(75), Some("F1")).unwrap();
    service.set_winner(USER, NodeId(90), Some("F1")).unwrap();
    (service, backend)
}

#[test]
fn decided_fixture_shows_the_real_teams() {
    let (service, backend) = seeded();
    backend.results.record(NodeId(90), "B2", "C2", "C2").unwrap();

    let draft = service.draft(USER, NodeId(90)).unwrap().unwrap();
    assert!(draft.from_result);
    assert_eq!(draft.slot1(), Some("B2"));
    assert_eq!(draft.slot2(), Some("C2"));
    assert_eq!(draft.winner(), Some("C2"));

    // The stored prediction is untouched.
    let stored = service.prediction(USER, NodeId(90)).unwrap().unwrap();
    assert_eq!(stored.slot1(), Some("A2"));
    assert_eq!(stored.winner(), Some("F1"));
}

#[test]
fn known_teams_drop_a_pick_that_is_not_playing() {
    let (service, backend) = seeded();
    backend.results.set_teams(NodeId(90), "A2", "C2").unwrap();

    let draft = service.draft(USER, NodeId(90)).unwrap().unwrap();
    assert!(draft.from_result);
    assert_eq!(draft.winner(), None);

    backend.results.set_teams(NodeId(73), "A2", "B2").unwrap();
    let draft = service.draft(USER, NodeId(73)).unwrap().unwrap();
    assert_eq!(draft.winner(), Some("A2"));
}

#[test]
fn eliminated_team_leaves_the_draft_but_stays_visible() {
    let (service, backend) = seeded();
    backend.eliminations.set_eliminated("F1", true).unwrap();
    service.refresh_statuses(USER).unwrap();

    let draft = service.draft(USER, NodeId(90)).unwrap().unwrap();
    assert!(!draft.from_result);
    assert_eq!(draft.slot1(), Some("A2"));
    assert_eq!(draft.slot2(), None);
    assert_eq!(draft.winner(), None);
    assert_eq!(draft.current_winner.as_deref(), Some("F1"));
    assert_eq!(draft.status(), PredictionStatus::Invalid);
}

#[test]
fn bracket_draft_covers_every_fixture_in_order() {
    let (service, _backend) = seeded();
    let drafts = service.bracket_draft(USER).unwrap();
    assert_eq!(drafts.len(), 32);
    assert_eq!(drafts.first().map(|d| d.node()), Some(NodeId(73)));
    assert_eq!(drafts.last().map(|d| d.node()), Some(NodeId(104)));
    assert!(drafts.iter().all(|d| !d.from_result));
}
