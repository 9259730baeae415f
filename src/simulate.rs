//! Random end-to-end tournament: users fill brackets from random group
//! standings, then a random real knockout stage is played through the
//! result flow.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::Serialize;
use tracing::info;

use crate::bracket::{DerivationSource, GROUP_LETTERS, NodeId, Slot, Stage, THIRD_PLACE_SLOTS};
use crate::collaborators::{GroupStandingsProvider, ResultEntry};
use crate::error::{BracketError, BracketResult};
use crate::memory::MemoryStandings;
use crate::prediction::UserId;
use crate::reconcile::ReconcileSummary;
use crate::service::BracketService;
use crate::third_place::QualifierKey;

#[derive(Debug, Clone, Copy)]
pub struct SimulationOptions {
    pub users: usize,
    pub seed: u64,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            users: 100,
            seed: 2026,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SimulationReport {
    pub users: usize,
    pub fixtures_played: usize,
    pub full_hits: usize,
    pub partial_hits: usize,
    pub invalidated: usize,
    pub champion: Option<String>,
    pub leaderboard: Vec<(UserId, u32)>,
}

/// Team code `A1`..`L4`: group letter plus pot number.
pub fn team_code(group: char, pot: u8) -> String {
    format!("{group}{pot}")
}

/// Random final standings for every group, keyed by `(group, position)`.
pub fn random_standings(rng: &mut impl Rng) -> HashMap<(char, u8), String> {
    let mut out = HashMap::with_capacity(GROUP_LETTERS.len() * 4);
    for group in GROUP_LETTERS {
        let mut pots: Vec<u8> = (1..=4).collect();
        pots.shuffle(rng);
        for (i, pot) in pots.into_iter().enumerate() {
            out.insert((group, i as u8 + 1), team_code(group, pot));
        }
    }
    out
}

/// Eight random groups whose third-placed team advances.
pub fn random_qualifiers(rng: &mut impl Rng) -> Vec<char> {
    let mut groups = GROUP_LETTERS.to_vec();
    groups.shuffle(rng);
    groups.truncate(THIRD_PLACE_SLOTS as usize);
    groups
}

fn user_rng(seed: u64, user: UserId) -> StdRng {
    StdRng::seed_from_u64(seed ^ user.wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

/// Fills one user's bracket: standings, third-place qualifiers, then a
/// random pick at every fixture in stage order.
pub fn fill_user(
    service: &BracketService,
    standings: &MemoryStandings,
    user: UserId,
    rng: &mut impl Rng,
) -> BracketResult<()> {
    for ((group, position), team) in random_standings(rng) {
        standings.set_place(user, group, position, &team);
    }
    service.seed_user(user)?;

    let qualifiers: Vec<String> = random_qualifiers(rng)
        .into_iter()
        .map(|group| {
            standings
                .get_place(user, group, 3)?
                .ok_or_else(|| anyhow::anyhow!("no third place in group {group}"))
        })
        .collect::<anyhow::Result<_>>()?;
    service.on_third_place_qualifiers_changed(user, &qualifiers)?;

    for stage in Stage::ALL {
        let nodes: Vec<NodeId> = service.graph().nodes_in_stage(stage).map(|n| n.id).collect();
        for node in nodes {
            let Some(prediction) = service.prediction(user, node)? else {
                continue;
            };
            let (Some(slot1), Some(slot2)) = (prediction.slot1, prediction.slot2) else {
                continue;
            };
            let pick = if rng.gen_bool(0.5) { slot1 } else { slot2 };
            service.set_winner(user, node, Some(&pick))?;
        }
    }
    Ok(())
}

/// Seeds `options.users` random brackets, plays a random tournament through
/// `entry` and `service.record_result`, and returns the final table.
pub fn run(
    service: &BracketService,
    standings: &MemoryStandings,
    entry: &dyn ResultEntry,
    options: &SimulationOptions,
) -> BracketResult<SimulationReport> {
    let users: Vec<UserId> = (1..=options.users as UserId).collect();
    users.par_iter().try_for_each(|user| {
        let mut rng = user_rng(options.seed, *user);
        fill_user(service, standings, *user, &mut rng)
    })?;
    info!(users = users.len(), "brackets filled");

    let mut rng = StdRng::seed_from_u64(options.seed);
    let real = random_standings(&mut rng);
    let key = QualifierKey::from_groups(random_qualifiers(&mut rng))?;
    let assignment = *service.third_place_table().assignment(key)?;

    let mut winners: HashMap<NodeId, String> = HashMap::new();
    let mut losers: HashMap<NodeId, String> = HashMap::new();
    let mut report = SimulationReport {
        users: users.len(),
        ..SimulationReport::default()
    };

    for stage in Stage::ALL {
        let nodes: Vec<_> = service.graph().nodes_in_stage(stage).cloned().collect();
        for node in nodes {
            let mut teams = Vec::with_capacity(2);
            for slot in Slot::BOTH {
                let team = match node.source(slot) {
                    DerivationSource::GroupPosition { group, position } => {
                        real.get(&(*group, *position)).cloned()
                    }
                    DerivationSource::ThirdPlaceSlot(index) => assignment
                        .get(usize::from(*index) - 1)
                        .and_then(|group| real.get(&(*group, 3)).cloned()),
                    DerivationSource::WinnerOf(up) => winners.get(up).cloned(),
                    DerivationSource::LoserOf(up) => losers.get(up).cloned(),
                };
                let team = team.ok_or_else(|| {
                    BracketError::config(format!("cannot resolve {} of {}", slot.index(), node.id))
                })?;
                teams.push(team);
            }
            let (slot1, slot2) = (teams[0].as_str(), teams[1].as_str());
            let (winner, loser) = if rng.gen_bool(0.5) {
                (slot1, slot2)
            } else {
                (slot2, slot1)
            };

            entry.enter_result(node.id, slot1, slot2, winner)?;
            let summary = service.record_result(node.id, slot1, slot2, winner)?;
            tally(&mut report, &summary);
            winners.insert(node.id, winner.to_string());
            losers.insert(node.id, loser.to_string());
        }

        users
            .par_iter()
            .try_for_each(|user| service.refresh_statuses(*user).map(|_| ()))?;
        info!(stage = stage.label(), "stage played");
    }

    report.champion = winners.get(&service.graph().final_node()).cloned();
    let mut leaderboard = users
        .iter()
        .map(|user| Ok((*user, service.knockout_score(*user)?)))
        .collect::<BracketResult<Vec<_>>>()?;
    leaderboard.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    report.leaderboard = leaderboard;
    Ok(report)
}

fn tally(report: &mut SimulationReport, summary: &ReconcileSummary) {
    report.fixtures_played += 1;
    report.full_hits += summary.full;
    report.partial_hits += summary.partial;
    report.invalidated += summary.invalidated;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standings_place_every_team_once() {
        let mut rng = StdRng::seed_from_u64(7);
        let standings = random_standings(&mut rng);
        assert_eq!(standings.len(), 48);
        let mut teams: Vec<&String> = standings.values().collect();
        teams.sort();
        teams.dedup();
        assert_eq!(teams.len(), 48);
    }

    #[test]
    fn qualifiers_are_eight_distinct_groups() {
        let mut rng = StdRng::seed_from_u64(7);
        let groups = random_qualifiers(&mut rng);
        assert!(QualifierKey::from_groups(groups).is_ok());
    }
}
