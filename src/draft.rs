//! Disposable previews of predictions, rebuilt from scratch on every call.

use crate::bracket::{BracketGraph, NodeId};
use crate::collaborators::{MatchResults, PredictionStore};
use crate::error::BracketResult;
use crate::prediction::{DraftPrediction, Prediction, UserId};

pub struct DraftProjector<'a> {
    results: &'a dyn MatchResults,
}

impl<'a> DraftProjector<'a> {
    pub fn new(results: &'a dyn MatchResults) -> Self {
        Self { results }
    }

    /// Builds the draft of one prediction. Real teams win over the user's
    /// guesses as soon as a fixture's contestants are known.
    pub fn build_draft(&self, prediction: &Prediction) -> BracketResult<DraftPrediction> {
        let result = self.results.result(prediction.node)?;
        if let (Some(slot1), Some(slot2)) = (result.slot1.clone(), result.slot2.clone()) {
            let winner = result.winner.clone().or_else(|| {
                prediction
                    .winner
                    .clone()
                    .filter(|w| *w == slot1 || *w == slot2)
            });
            return Ok(DraftPrediction {
                user: prediction.user,
                node: prediction.node,
                slot1: Some(slot1),
                slot2: Some(slot2),
                winner,
                current_winner: None,
                status: prediction.status,
                from_result: true,
            });
        }

        let slot1 = prediction.slot1.clone().filter(|_| prediction.slot1_valid);
        let slot2 = prediction.slot2.clone().filter(|_| prediction.slot2_valid);
        let kept = prediction
            .winner
            .as_ref()
            .is_some_and(|w| slot1.as_ref() == Some(w) || slot2.as_ref() == Some(w));
        let (winner, current_winner) = if kept {
            (prediction.winner.clone(), None)
        } else {
            (None, prediction.winner.clone())
        };

        Ok(DraftPrediction {
            user: prediction.user,
            node: prediction.node,
            slot1,
            slot2,
            winner,
            current_winner,
            status: prediction.status,
            from_result: false,
        })
    }

    /// Drafts of every fixture the user has a row for, in bracket order.
    pub fn build_bracket_draft(
        &self,
        graph: &BracketGraph,
        store: &dyn PredictionStore,
        user: UserId,
    ) -> BracketResult<Vec<DraftPrediction>> {
        let mut drafts = Vec::with_capacity(graph.len());
        for node in graph.nodes() {
            if let Some(prediction) = store.load(user, node.id)? {
                drafts.push(self.build_draft(&prediction)?);
            }
        }
        Ok(drafts)
    }

    pub fn draft_at(
        &self,
        store: &dyn PredictionStore,
        user: UserId,
        node: NodeId,
    ) -> BracketResult<Option<DraftPrediction>> {
        match store.load(user, node)? {
            Some(prediction) => Ok(Some(self.build_draft(&prediction)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ResultBook;
    use crate::prediction::PredictionStatus;

    fn prediction(slot1: &str, slot2: &str, winner: Option<&str>) -> Prediction {
        let mut p = Prediction::new(9, NodeId(90));
        p.slot1 = Some(slot1.to_string());
        p.slot2 = Some(slot2.to_string());
        p.slot1_valid = true;
        p.slot2_valid = true;
        p.winner = winner.map(str::to_string);
        p.status = PredictionStatus::Valid;
        p
    }

    #[test]
    fn known_teams_keep_a_matching_pick() {
        let book = ResultBook::default();
        book.set_teams(NodeId(90), "NED", "ESP").unwrap();
        let projector = DraftProjector::new(&book);

        let draft = projector
            .build_draft(&prediction("NED", "USA", Some("NED")))
            .unwrap();
        assert!(draft.from_result);
        assert_eq!(draft.slot2.as_deref(), Some("ESP"));
        assert_eq!(draft.winner.as_deref(), Some("NED"));

        let draft = projector
            .build_draft(&prediction("NED", "USA", Some("USA")))
            .unwrap();
        assert_eq!(draft.winner, None);
    }

    #[test]
    fn invalid_slot_is_dropped_and_winner_kept_for_display() {
        let book = ResultBook::default();
        let projector = DraftProjector::new(&book);
        let mut p = prediction("NED", "USA", Some("USA"));
        p.slot2_valid = false;

        let draft = projector.build_draft(&p).unwrap();
        assert!(!draft.from_result);
        assert_eq!(draft.slot1.as_deref(), Some("NED"));
        assert_eq!(draft.slot2, None);
        assert_eq!(draft.winner, None);
        assert_eq!(draft.current_winner.as_deref(), Some("USA"));
    }
}
