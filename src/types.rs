use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::constants::SEASON_COLUMN;

/// A single extracted row keyed by canonical column name.
pub type RawRow = BTreeMap<String, String>;

/// Rows pulled from one page, before any validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub rows: Vec<RawRow>,
}

impl RawTable {
    pub fn new(rows: Vec<RawRow>) -> Self {
        Self { rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Fills in the season for rows that did not carry one on the page.
    /// A season read from the page is never overwritten.
    pub fn stamp_season(&mut self, season: &str) {
        for row in &mut self.rows {
            row.entry(SEASON_COLUMN.to_string())
                .or_insert_with(|| season.to_string());
        }
    }
}

/// Where a raw table came from.
#[derive(Debug, Clone, PartialEq)]
pub struct PageSource {
    pub url: String,
    pub fetched_at: DateTime<Utc>,
}

/// Validated season totals for one team. This is the record handed to storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamDefenseRecord {
    pub season: String,
    pub team: String,
    pub points_allowed: u64,
    pub sacks: u64,
    pub interceptions: u64,
    pub source_url: String,
    pub fetched_at: DateTime<Utc>,
}

/// The numeric fields every record must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatField {
    PointsAllowed,
    Sacks,
    Interceptions,
}

impl StatField {
    pub const ALL: [StatField; 3] = [StatField::PointsAllowed, StatField::Sacks, StatField::Interceptions];

    pub fn as_str(&self) -> &'static str {
        match self {
            StatField::PointsAllowed => crate::constants::POINTS_ALLOWED_COLUMN,
            StatField::Sacks => crate::constants::SACKS_COLUMN,
            StatField::Interceptions => crate::constants::INTERCEPTIONS_COLUMN,
        }
    }

    pub fn value_of(&self, record: &TeamDefenseRecord) -> u64 {
        match self {
            StatField::PointsAllowed => record.points_allowed,
            StatField::Sacks => record.sacks,
            StatField::Interceptions => record.interceptions,
        }
    }
}

impl fmt::Display for StatField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Season-wide sums used for the plausibility check and for season means.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeasonAggregate {
    pub season: String,
    pub team_count: u32,
    pub sum_points_allowed: u64,
    pub sum_sacks: u64,
    pub sum_interceptions: u64,
}

impl SeasonAggregate {
    pub fn from_records<'a>(
        season: &str,
        records: impl IntoIterator<Item = &'a TeamDefenseRecord>,
    ) -> Self {
        let mut agg = SeasonAggregate {
            season: season.to_string(),
            team_count: 0,
            sum_points_allowed: 0,
            sum_sacks: 0,
            sum_interceptions: 0,
        };
        for record in records.into_iter().filter(|r| r.season == season) {
            agg.team_count += 1;
            agg.sum_points_allowed = agg.sum_points_allowed.saturating_add(record.points_allowed);
            agg.sum_sacks = agg.sum_sacks.saturating_add(record.sacks);
            agg.sum_interceptions = agg.sum_interceptions.saturating_add(record.interceptions);
        }
        agg
    }

    pub fn sum_of(&self, field: StatField) -> u64 {
        match field {
            StatField::PointsAllowed => self.sum_points_allowed,
            StatField::Sacks => self.sum_sacks,
            StatField::Interceptions => self.sum_interceptions,
        }
    }

    /// Mean per team, or `None` when the season has no teams.
    pub fn mean_of(&self, field: StatField) -> Option<f64> {
        if self.team_count == 0 {
            return None;
        }
        Some(self.sum_of(field) as f64 / f64::from(self.team_count))
    }

    /// Both pressure totals must be non-zero for a season to be believable.
    pub fn is_plausible(&self) -> bool {
        self.sum_sacks > 0 && self.sum_interceptions > 0
    }
}

/// Offensive position groups a defense multiplier is computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PositionGroup {
    #[serde(rename = "QB")]
    Qb,
    #[serde(rename = "RB")]
    Rb,
    #[serde(rename = "WR")]
    Wr,
    #[serde(rename = "TE")]
    Te,
}

impl PositionGroup {
    pub const ALL: [PositionGroup; 4] = [PositionGroup::Qb, PositionGroup::Rb, PositionGroup::Wr, PositionGroup::Te];

    pub fn as_str(&self) -> &'static str {
        match self {
            PositionGroup::Qb => "QB",
            PositionGroup::Rb => "RB",
            PositionGroup::Wr => "WR",
            PositionGroup::Te => "TE",
        }
    }

    /// Raw fields whose season-relative values feed this group's multiplier.
    pub fn basis(&self) -> &'static [StatField] {
        match self {
            PositionGroup::Qb => &[StatField::PointsAllowed, StatField::Sacks, StatField::Interceptions],
            PositionGroup::Rb => &[StatField::PointsAllowed],
            PositionGroup::Wr | PositionGroup::Te => &[StatField::PointsAllowed, StatField::Interceptions],
        }
    }
}

impl fmt::Display for PositionGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Defense-adjusted scalar for one team, season and position group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefenseMultiplier {
    pub season: String,
    pub team: String,
    pub position_group: PositionGroup,
    pub multiplier: f64,
    pub basis: Vec<StatField>,
}

/// A team's place in its season's defensive ordering. Rank 1 is the stingiest defense.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefenseRanking {
    pub season: String,
    pub team: String,
    pub rank: usize,
    /// Share of the season's ranked teams this defense is at least as good as, 0-100.
    pub percentile: f64,
    /// Weighted composite of season-relative totals; lower is stronger.
    pub strength_score: f64,
}
