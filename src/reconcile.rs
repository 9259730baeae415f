//! Scores every user's prediction at a fixture once its real result lands.

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::bracket::{BracketGraph, NodeId, Stage};
use crate::collaborators::{Collaborators, EliminationTracker, PredictionStore, ScoreLedger};
use crate::error::{BracketError, BracketResult};
use crate::locks::UserLocks;
use crate::prediction::{Prediction, PredictionStatus, UserId};
use crate::scoring::PointsTable;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub node: Option<NodeId>,
    pub users: usize,
    pub full: usize,
    pub partial: usize,
    pub incorrect: usize,
    pub invalidated: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Full,
    Partial,
    Incorrect,
    /// Already holds partial credit earned at another fixture.
    Kept,
}

pub struct ResultReconciler<'a> {
    graph: &'a BracketGraph,
    store: &'a dyn PredictionStore,
    eliminations: &'a dyn EliminationTracker,
    ledger: &'a dyn ScoreLedger,
    points: &'a PointsTable,
}

impl<'a> ResultReconciler<'a> {
    pub fn new(graph: &'a BracketGraph, collab: &'a Collaborators, points: &'a PointsTable) -> Self {
        Self {
            graph,
            store: collab.predictions.as_ref(),
            eliminations: collab.eliminations.as_ref(),
            ledger: collab.ledger.as_ref(),
            points,
        }
    }

    /// Reconciles every user's prediction at `node` against the decided result.
    /// Safe to re-run with the same arguments: statuses and ledger totals come
    /// out identical.
    pub fn record_result(
        &self,
        node: NodeId,
        winner: &str,
        loser: &str,
        locks: &UserLocks,
    ) -> BracketResult<ReconcileSummary> {
        let Some(fixture) = self.graph.node_by_id(node) else {
            return Err(BracketError::invalid(format!("unknown fixture {node}")));
        };
        let stage = fixture.stage;

        // Semi-final losers still play the third-place match.
        if fixture.loser_next.is_none() {
            self.eliminations.set_eliminated(loser, true)?;
        }

        let users = self.store.users_at(node)?;
        let outcomes = users
            .par_iter()
            .map(|user| {
                locks.with_user(*user, || self.reconcile_user(*user, node, stage, winner, loser))
            })
            .collect::<BracketResult<Vec<_>>>()?;

        let mut summary = ReconcileSummary {
            node: Some(node),
            users: users.len(),
            ..ReconcileSummary::default()
        };
        for (outcome, invalidated) in outcomes.into_iter().flatten() {
            match outcome {
                Outcome::Full => summary.full += 1,
                Outcome::Partial => {
                    summary.partial += 1;
                    summary.incorrect += 1;
                }
                Outcome::Incorrect => summary.incorrect += 1,
                Outcome::Kept => {}
            }
            summary.invalidated += invalidated;
        }
        info!(
            %node,
            winner,
            loser,
            users = summary.users,
            full = summary.full,
            partial = summary.partial,
            invalidated = summary.invalidated,
            "result reconciled"
        );
        Ok(summary)
    }

    /// One user's share of a result. Callers hold the user's lock.
    fn reconcile_user(
        &self,
        user: UserId,
        node: NodeId,
        stage: Stage,
        winner: &str,
        loser: &str,
    ) -> BracketResult<Option<(Outcome, usize)>> {
        let Some(mut prediction) = self.store.load(user, node)? else {
            warn!(user, %node, "prediction row vanished during reconciliation");
            return Ok(None);
        };

        let outcome;

        if prediction.status == PredictionStatus::CorrectPartial {
            outcome = Outcome::Kept;
        } else if prediction.winner.as_deref() == Some(winner) {
            prediction.status = PredictionStatus::CorrectFull;
            prediction.points = self.points.full(stage);
            outcome = Outcome::Full;
        } else {
            outcome = match self.find_partial(user, node, stage, winner)? {
                Some(mut other) => {
                    other.status = PredictionStatus::CorrectPartial;
                    other.points = self.points.partial(stage);
                    self.store.save(&other)?;
                    debug!(user, %node, partial_at = %other.node, winner, "partial credit");
                    Outcome::Partial
                }
                None => Outcome::Incorrect,
            };
            prediction.status = PredictionStatus::Incorrect;
            prediction.points = 0;
        }

        self.store.save(&prediction)?;

        let invalidated = if prediction.winner.as_deref() == Some(loser) {
            self.find_loser_in_next_stages(user, node, loser)?
        } else {
            0
        };

        // Derived from the stored rows, never adjusted in place.
        let total = knockout_total(&self.store.load_user(user)?);
        self.ledger.set_user_knockout_score(user, total)?;
        Ok(Some((outcome, invalidated)))
    }

    /// Same-stage prediction elsewhere in the user's bracket that named the
    /// actual winner but was flagged unreachable.
    fn find_partial(
        &self,
        user: UserId,
        node: NodeId,
        stage: Stage,
        winner: &str,
    ) -> BracketResult<Option<Prediction>> {
        for candidate in self.store.load_user(user)? {
            if candidate.node == node || candidate.status != PredictionStatus::Unreachable {
                continue;
            }
            if candidate.winner.as_deref() != Some(winner) {
                continue;
            }
            if self.graph.node_by_id(candidate.node).map(|n| n.stage) == Some(stage) {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    /// Walks forward from `node` while the user kept advancing `loser`,
    /// marking each such pick invalid. Returns how many rows were invalidated.
    fn find_loser_in_next_stages(
        &self,
        user: UserId,
        node: NodeId,
        loser: &str,
    ) -> BracketResult<usize> {
        let mut invalidated = 0usize;
        let mut current = node;
        while let Some((next, slot)) = self.graph.next(current) {
            let Some(mut prediction) = self.store.load(user, next)? else {
                warn!(user, node = %next, "no prediction row on loser walk");
                break;
            };
            if prediction.slot_team(slot) == Some(loser) {
                prediction.set_slot_valid(slot, false);
            }
            let still_advanced = prediction.winner.as_deref() == Some(loser)
                && !prediction.status.is_post_result();
            if still_advanced && prediction.status != PredictionStatus::Invalid {
                prediction.status = PredictionStatus::Invalid;
                invalidated += 1;
            }
            self.store.save(&prediction)?;
            if !still_advanced {
                break;
            }
            current = next;
        }
        Ok(invalidated)
    }
}

/// A user's knockout score: the points held by their prediction rows.
fn knockout_total(rows: &[Prediction]) -> u32 {
    rows.iter().fold(0u32, |total, p| total.saturating_add(p.points))
}
