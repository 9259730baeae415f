use serde::{Deserialize, Serialize};

use crate::bracket::Stage;

/// Points per correctly predicted knockout winner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointsTable {
    pub round32: u32,
    pub round16: u32,
    pub quarter: u32,
    pub semi: u32,
    pub third_place: u32,
    #[serde(rename = "final")]
    pub final_: u32,
    /// Share of the stage value awarded for a partial hit, in percent.
    pub partial_credit_pct: u32,
}

impl Default for PointsTable {
    fn default() -> Self {
        Self {
            round32: 2,
            round16: 4,
            quarter: 6,
            semi: 8,
            third_place: 8,
            final_: 10,
            partial_credit_pct: 100,
        }
    }
}

impl PointsTable {
    pub fn full(&self, stage: Stage) -> u32 {
        match stage {
            Stage::Round32 => self.round32,
            Stage::Round16 => self.round16,
            Stage::Quarter => self.quarter,
            Stage::Semi => self.semi,
            Stage::ThirdPlace => self.third_place,
            Stage::Final => self.final_,
        }
    }

    pub fn partial(&self, stage: Stage) -> u32 {
        self.full(stage) * self.partial_credit_pct.min(100) / 100
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_matches_full_by_default() {
        let table = PointsTable::default();
        for stage in Stage::ALL {
            assert_eq!(table.partial(stage), table.full(stage));
        }
    }

    #[test]
    fn partial_discount_rounds_down() {
        let table = PointsTable {
            partial_credit_pct: 50,
            quarter: 5,
            ..PointsTable::default()
        };
        assert_eq!(table.partial(Stage::Quarter), 2);
        assert_eq!(table.full(Stage::Quarter), 5);
    }
}
