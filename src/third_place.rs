//! Third-placed qualifiers: which group fills which `3rd_team_N` slot.
//!
//! Eight of the twelve third-placed teams advance. For each of the C(12,8) =
//! 495 possible qualifying sets the table fixes which group's team plays in
//! each of the eight round-of-32 third-place slots.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use once_cell::sync::OnceCell;
use tracing::debug;

use crate::bracket::{BracketGraph, GROUP_LETTERS, NodeId, Slot, THIRD_PLACE_SLOTS};
use crate::collaborators::GroupStandingsProvider;
use crate::error::{BracketError, BracketResult};
use crate::prediction::{UserId, normalize_team};
use crate::propagation::PropagationEngine;

const QUALIFIERS: usize = THIRD_PLACE_SLOTS as usize;
const TABLE_ROWS: usize = 495;

/// Groups whose third-placed team may fill each slot, slot 1 first.
pub const SLOT_ELIGIBILITY_2026: [&str; QUALIFIERS] = [
    "ABCDF", "CDFGH", "CEFHI", "EHIJK", "BEFIJ", "AEHIJ", "EFGIJ", "DEIJL",
];

fn group_bit(group: char) -> Option<u16> {
    let group = group.to_ascii_uppercase();
    GROUP_LETTERS
        .iter()
        .position(|g| *g == group)
        .map(|i| 1u16 << i)
}

/// Order-independent key for a set of eight qualifying groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualifierKey(u16);

impl QualifierKey {
    pub fn from_groups(groups: impl IntoIterator<Item = char>) -> BracketResult<Self> {
        let mut mask = 0u16;
        for group in groups {
            let Some(bit) = group_bit(group) else {
                return Err(BracketError::invalid(format!("unknown group {group}")));
            };
            if mask & bit != 0 {
                return Err(BracketError::invalid(format!(
                    "group {group} listed twice among qualifiers"
                )));
            }
            mask |= bit;
        }
        Self::from_mask(mask)
    }

    fn from_mask(mask: u16) -> BracketResult<Self> {
        if mask.count_ones() as usize != QUALIFIERS || mask >> GROUP_LETTERS.len() != 0 {
            return Err(BracketError::invalid(format!(
                "expected {QUALIFIERS} qualifying groups, got {}",
                mask.count_ones()
            )));
        }
        Ok(Self(mask))
    }

    pub fn contains(self, group: char) -> bool {
        group_bit(group).is_some_and(|bit| self.0 & bit != 0)
    }

    /// Qualifying groups in letter order.
    pub fn groups(self) -> impl Iterator<Item = char> {
        GROUP_LETTERS
            .into_iter()
            .enumerate()
            .filter(move |(i, _)| self.0 & (1u16 << *i) != 0)
            .map(|(_, g)| g)
    }
}

impl fmt::Display for QualifierKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for group in self.groups() {
            write!(f, "{group}")?;
        }
        Ok(())
    }
}

impl FromStr for QualifierKey {
    type Err = BracketError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::from_groups(raw.trim().chars())
    }
}

/// Where a table's rows came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableSource {
    /// Backtracked from slot eligibility; a valid assignment for every key,
    /// not necessarily the published one.
    Derived,
    /// Loaded from a JSON table file.
    Loaded,
}

impl TableSource {
    pub fn label(self) -> &'static str {
        match self {
            TableSource::Derived => "derived from slot eligibility",
            TableSource::Loaded => "loaded from file",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThirdPlaceTable {
    rows: HashMap<QualifierKey, [char; QUALIFIERS]>,
    source: TableSource,
}

static DERIVED_2026_TABLE: OnceCell<ThirdPlaceTable> = OnceCell::new();

impl ThirdPlaceTable {
    /// Builds every row from the per-slot eligible groups. Slots are filled in
    /// order, each taking the first eligible unused group that still leaves a
    /// complete assignment.
    pub fn derived(eligibility: &[&str; QUALIFIERS]) -> BracketResult<Self> {
        let eligible: Vec<Vec<char>> = eligibility
            .iter()
            .map(|groups| {
                let mut groups: Vec<char> =
                    groups.chars().map(|g| g.to_ascii_uppercase()).collect();
                groups.sort_unstable();
                groups
            })
            .collect();

        let mut rows = HashMap::with_capacity(TABLE_ROWS);
        for mask in 0u16..(1 << GROUP_LETTERS.len()) {
            if mask.count_ones() as usize != QUALIFIERS {
                continue;
            }
            let key = QualifierKey(mask);
            let mut picked = Vec::with_capacity(QUALIFIERS);
            if !assign(&eligible, key, &mut picked) {
                return Err(BracketError::config(format!(
                    "no third-place assignment for qualifiers {key}"
                )));
            }
            let mut row = ['?'; QUALIFIERS];
            row.copy_from_slice(&picked);
            rows.insert(key, row);
        }
        Ok(Self {
            rows,
            source: TableSource::Derived,
        })
    }

    /// Derived table for the 2026 slot eligibility. Load the published table
    /// with [`ThirdPlaceTable::from_json`] where exact rows matter.
    pub fn derived_2026() -> BracketResult<&'static ThirdPlaceTable> {
        DERIVED_2026_TABLE.get_or_try_init(|| Self::derived(&SLOT_ELIGIBILITY_2026))
    }

    /// Loads an explicit table: `{"ABCDEFGH": "ACFEBHGD", ...}`, where the
    /// value's n-th letter is the group assigned to third-place slot n.
    pub fn from_json(raw: &str) -> BracketResult<Self> {
        let parsed: HashMap<String, String> = serde_json::from_str(raw)
            .map_err(|e| BracketError::config(format!("third-place table: {e}")))?;

        let mut rows = HashMap::with_capacity(parsed.len());
        for (key_raw, row_raw) in &parsed {
            let key: QualifierKey = key_raw
                .parse()
                .map_err(|e| BracketError::config(format!("third-place key {key_raw}: {e}")))?;
            let picked: Vec<char> = row_raw.trim().chars().map(|g| g.to_ascii_uppercase()).collect();
            let as_key = QualifierKey::from_groups(picked.iter().copied()).ok();
            if picked.len() != QUALIFIERS || as_key != Some(key) {
                return Err(BracketError::config(format!(
                    "third-place row {key_raw} => {row_raw} is not a permutation of its key"
                )));
            }
            let mut row = ['?'; QUALIFIERS];
            row.copy_from_slice(&picked);
            if rows.insert(key, row).is_some() {
                return Err(BracketError::config(format!(
                    "third-place key {key} appears twice"
                )));
            }
        }
        if rows.len() != TABLE_ROWS {
            return Err(BracketError::config(format!(
                "third-place table has {} rows, expected {TABLE_ROWS}",
                rows.len()
            )));
        }
        Ok(Self {
            rows,
            source: TableSource::Loaded,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn source(&self) -> TableSource {
        self.source
    }

    pub fn assignment(&self, key: QualifierKey) -> BracketResult<&[char; QUALIFIERS]> {
        self.rows
            .get(&key)
            .ok_or_else(|| BracketError::config(format!("third-place table has no row {key}")))
    }

    /// Group whose third-placed team fills slot `index` (1-based).
    pub fn group_for_slot(&self, key: QualifierKey, index: u8) -> BracketResult<char> {
        let row = self.assignment(key)?;
        index
            .checked_sub(1)
            .and_then(|i| row.get(i as usize))
            .copied()
            .ok_or_else(|| BracketError::invalid(format!("no third-place slot {index}")))
    }
}

fn assign(eligible: &[Vec<char>], key: QualifierKey, picked: &mut Vec<char>) -> bool {
    let Some(groups) = eligible.get(picked.len()) else {
        return true;
    };
    for group in groups {
        if !key.contains(*group) || picked.contains(group) {
            continue;
        }
        picked.push(*group);
        if assign(eligible, key, picked) {
            return true;
        }
        picked.pop();
    }
    false
}

/// Turns a user's qualifying third-placed teams into round-of-32 slot writes.
pub struct ThirdPlaceResolver<'a> {
    graph: &'a BracketGraph,
    table: &'a ThirdPlaceTable,
    standings: &'a dyn GroupStandingsProvider,
    engine: &'a PropagationEngine<'a>,
}

impl<'a> ThirdPlaceResolver<'a> {
    pub fn new(
        graph: &'a BracketGraph,
        table: &'a ThirdPlaceTable,
        standings: &'a dyn GroupStandingsProvider,
        engine: &'a PropagationEngine<'a>,
    ) -> Self {
        Self {
            graph,
            table,
            standings,
            engine,
        }
    }

    /// Maps the eight qualifying teams back to their groups via the user's
    /// third-place picks, then re-resolves every third-place slot.
    pub fn on_qualifiers_changed(
        &self,
        user: UserId,
        teams: &[String],
        enforce: bool,
    ) -> BracketResult<Vec<(NodeId, Slot)>> {
        if teams.len() != QUALIFIERS {
            return Err(BracketError::invalid(format!(
                "expected {QUALIFIERS} qualifying teams, got {}",
                teams.len()
            )));
        }
        let mut thirds = Vec::with_capacity(GROUP_LETTERS.len());
        for group in GROUP_LETTERS {
            if let Some(team) = normalize_team(self.standings.get_place(user, group, 3)?.as_deref()) {
                thirds.push((group, team));
            }
        }

        let mut groups = Vec::with_capacity(QUALIFIERS);
        for team in teams {
            let Some((group, _)) = thirds.iter().find(|(_, t)| t == team.trim()) else {
                return Err(BracketError::invalid(format!(
                    "{team} is not third in any group for user {user}"
                )));
            };
            groups.push(*group);
        }
        let key = QualifierKey::from_groups(groups)?;
        self.apply_key(user, key, enforce)
    }

    /// Writes the team assigned under `key` into every third-place slot whose
    /// current value differs. Returns the slots that changed.
    pub fn apply_key(
        &self,
        user: UserId,
        key: QualifierKey,
        enforce: bool,
    ) -> BracketResult<Vec<(NodeId, Slot)>> {
        let row = self.table.assignment(key)?;
        let mut changed = Vec::new();
        for (node, slot, index) in self.graph.third_place_slots() {
            let Some(group) = row.get(usize::from(index).saturating_sub(1)) else {
                continue;
            };
            let team = normalize_team(self.standings.get_place(user, *group, 3)?.as_deref());
            let current = self.engine.load(user, node)?;
            let current = current.as_ref().and_then(|p| p.slot_team(slot));
            if current == team.as_deref() {
                continue;
            }
            debug!(user, %node, slot = slot.index(), %group, team = ?team, "third-place slot re-resolved");
            self.engine.set_slot(user, node, slot, team.as_deref(), enforce)?;
            changed.push((node, slot));
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(table: &ThirdPlaceTable, key: &str) -> String {
        table
            .assignment(key.parse().unwrap())
            .unwrap()
            .iter()
            .collect()
    }

    #[test]
    fn derived_table_covers_every_combination() {
        let table = ThirdPlaceTable::derived_2026().unwrap();
        assert_eq!(table.len(), TABLE_ROWS);
        assert_eq!(row(table, "ABCDEFGH"), "ACFEBHGD");
        assert_eq!(row(table, "EFGHIJKL"), "FGEKIHJL");
    }

    #[test]
    fn every_row_respects_slot_eligibility() {
        let table = ThirdPlaceTable::derived_2026().unwrap();
        for (key, row) in &table.rows {
            for (i, group) in row.iter().enumerate() {
                assert!(key.contains(*group));
                assert!(SLOT_ELIGIBILITY_2026[i].contains(*group), "{key} slot {}", i + 1);
            }
        }
    }

    #[test]
    fn key_ignores_input_order() {
        let a: QualifierKey = "HGFEDCBA".parse().unwrap();
        let b = QualifierKey::from_groups(['a', 'b', 'c', 'd', 'e', 'f', 'g', 'h']).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "ABCDEFGH");
        assert!("ABCDEFG".parse::<QualifierKey>().is_err());
        assert!("AABCDEFG".parse::<QualifierKey>().is_err());
        assert!("ABCDEFGZ".parse::<QualifierKey>().is_err());
    }

    #[test]
    fn json_table_must_be_complete_and_consistent() {
        let derived = ThirdPlaceTable::derived_2026().unwrap();
        let mut map: HashMap<String, String> = derived
            .rows
            .iter()
            .map(|(k, r)| (k.to_string(), r.iter().collect()))
            .collect();
        let raw = serde_json::to_string(&map).unwrap();
        let loaded = ThirdPlaceTable::from_json(&raw).unwrap();
        assert_eq!(loaded.rows, derived.rows);
        assert_eq!(loaded.source(), TableSource::Loaded);
        assert_eq!(derived.source(), TableSource::Derived);

        map.insert("ABCDEFGH".into(), "ACFEBHGI".into());
        let raw = serde_json::to_string(&map).unwrap();
        assert!(matches!(
            ThirdPlaceTable::from_json(&raw),
            Err(BracketError::Config(_))
        ));

        map.remove("ABCDEFGH");
        let raw = serde_json::to_string(&map).unwrap();
        let err = ThirdPlaceTable::from_json(&raw).unwrap_err();
        assert!(err.to_string().contains("494"));
    }
}
