use serde::Serialize;
use std::fmt;
use tracing::debug;

use crate::config::TransformConfig;
use crate::error::Result;
use crate::types::{
    DefenseMultiplier, DefenseRanking, PositionGroup, SeasonAggregate, StatField, TeamDefenseRecord,
};

/// Weights of the season-relative totals in a defense's strength score.
/// Points allowed count against a defense, takeaways and pressure for it.
const POINTS_ALLOWED_WEIGHT: f64 = 0.4;
const INTERCEPTIONS_WEIGHT: f64 = 0.2;
const SACKS_WEIGHT: f64 = 0.1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The team's row was rejected upstream, so its totals are unknown.
    RejectedRow,
    /// None of the group's basis metrics has a usable season mean.
    NoUsableBasis,
}

/// A team left out of a season's multiplier set. Reported as `SKIPPED_INCOMPLETE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedTeam {
    pub season: String,
    pub team: String,
    pub position_group: Option<PositionGroup>,
    pub reason: SkipReason,
}

impl fmt::Display for SkippedTeam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SKIPPED_INCOMPLETE {} {}", self.season, self.team)?;
        if let Some(group) = self.position_group {
            write!(f, " ({})", group)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SeasonMultipliers {
    pub multipliers: Vec<DefenseMultiplier>,
    pub rankings: Vec<DefenseRanking>,
    pub skipped: Vec<SkippedTeam>,
}

/// Turns validated season totals into clamped, season-relative multipliers.
///
/// Points allowed contributes `team / mean` (a generous defense raises the
/// multiplier). Sacks and interceptions suppress offense and contribute the
/// inverse, `mean / team`. Each contribution and the final average are clamped
/// to the configured bounds. No I/O, no hidden state.
#[derive(Debug, Clone)]
pub struct DefenseMultiplierTransformer {
    min: f64,
    max: f64,
}

impl DefenseMultiplierTransformer {
    /// Fails unless `0 < min < max`.
    pub fn new(config: &TransformConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            min: config.min_multiplier,
            max: config.max_multiplier,
        })
    }

    pub fn transform(
        &self,
        record: &TeamDefenseRecord,
        aggregate: &SeasonAggregate,
        group: PositionGroup,
    ) -> Option<DefenseMultiplier> {
        let mut basis = Vec::new();
        let mut total = 0.0;
        for &field in group.basis() {
            let Some(contribution) = self.contribution(record, aggregate, field) else {
                continue;
            };
            basis.push(field);
            total += contribution;
        }
        if basis.is_empty() {
            return None;
        }
        let multiplier = round4(self.clamp(total / basis.len() as f64));
        Some(DefenseMultiplier {
            season: record.season.clone(),
            team: record.team.clone(),
            position_group: group,
            multiplier,
            basis,
        })
    }

    /// Every position group for every record in the aggregate's season, plus the skips.
    pub fn transform_season(
        &self,
        aggregate: &SeasonAggregate,
        records: &[TeamDefenseRecord],
        rejected_teams: &[String],
    ) -> SeasonMultipliers {
        let mut out = SeasonMultipliers::default();

        for team in rejected_teams {
            out.skipped.push(SkippedTeam {
                season: aggregate.season.clone(),
                team: team.clone(),
                position_group: None,
                reason: SkipReason::RejectedRow,
            });
        }

        for record in records.iter().filter(|r| r.season == aggregate.season) {
            for group in PositionGroup::ALL {
                match self.transform(record, aggregate, group) {
                    Some(m) => out.multipliers.push(m),
                    None => out.skipped.push(SkippedTeam {
                        season: record.season.clone(),
                        team: record.team.clone(),
                        position_group: Some(group),
                        reason: SkipReason::NoUsableBasis,
                    }),
                }
            }
        }

        out.rankings = self.rank_season(aggregate, records);

        debug!(
            season = %aggregate.season,
            multipliers = out.multipliers.len(),
            ranked = out.rankings.len(),
            skipped = out.skipped.len(),
            "computed season multipliers"
        );
        out
    }

    /// Orders the season's defenses by strength score, best first.
    ///
    /// Ties fall back to team name so the order is stable across runs.
    pub fn rank_season(&self, aggregate: &SeasonAggregate, records: &[TeamDefenseRecord]) -> Vec<DefenseRanking> {
        let mut scored: Vec<(&TeamDefenseRecord, f64)> = records
            .iter()
            .filter(|r| r.season == aggregate.season)
            .map(|r| (r, strength_score(r, aggregate)))
            .collect();
        scored.sort_by(|(a, sa), (b, sb)| sa.total_cmp(sb).then_with(|| a.team.cmp(&b.team)));

        let total = scored.len();
        scored
            .into_iter()
            .enumerate()
            .map(|(i, (record, score))| DefenseRanking {
                season: record.season.clone(),
                team: record.team.clone(),
                rank: i + 1,
                percentile: round2((total - i) as f64 / total as f64 * 100.0),
                strength_score: round4(score),
            })
            .collect()
    }

    fn contribution(&self, record: &TeamDefenseRecord, aggregate: &SeasonAggregate, field: StatField) -> Option<f64> {
        let mean = aggregate.mean_of(field).filter(|m| *m > 0.0)?;
        let value = field.value_of(record) as f64;
        let raw = match field {
            StatField::PointsAllowed => value / mean,
            StatField::Sacks | StatField::Interceptions if value == 0.0 => self.max,
            StatField::Sacks | StatField::Interceptions => mean / value,
        };
        Some(self.clamp(raw))
    }

    fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

/// Team value over season mean, or zero when the mean carries no signal.
fn relative(record: &TeamDefenseRecord, aggregate: &SeasonAggregate, field: StatField) -> f64 {
    match aggregate.mean_of(field) {
        Some(mean) if mean > 0.0 => field.value_of(record) as f64 / mean,
        _ => 0.0,
    }
}

fn strength_score(record: &TeamDefenseRecord, aggregate: &SeasonAggregate) -> f64 {
    POINTS_ALLOWED_WEIGHT * relative(record, aggregate, StatField::PointsAllowed)
        - INTERCEPTIONS_WEIGHT * relative(record, aggregate, StatField::Interceptions)
        - SACKS_WEIGHT * relative(record, aggregate, StatField::Sacks)
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record(team: &str, pa: u64, sacks: u64, ints: u64) -> TeamDefenseRecord {
        TeamDefenseRecord {
            season: "2024".into(),
            team: team.into(),
            points_allowed: pa,
            sacks,
            interceptions: ints,
            source_url: "https://stats.example.com/years/2024/opp.htm".into(),
            fetched_at: Utc.with_ymd_and_hms(2024, 9, 1, 0, 0, 0).unwrap(),
        }
    }

    fn transformer() -> DefenseMultiplierTransformer {
        DefenseMultiplierTransformer::new(&TransformConfig::default()).unwrap()
    }

    fn league() -> Vec<TeamDefenseRecord> {
        vec![
            record("Patriots", 300, 40, 10),
            record("Jets", 400, 20, 5),
            record("Bills", 200, 60, 15),
        ]
    }

    #[test]
    fn test_average_team_is_neutral() {
        let records = league();
        let agg = SeasonAggregate::from_records("2024", &records);

        for group in PositionGroup::ALL {
            let m = transformer().transform(&records[0], &agg, group).unwrap();
            assert_eq!(m.multiplier, 1.0, "{}", group);
        }
    }

    #[test]
    fn test_generous_defense_raises_rb_multiplier() {
        let records = league();
        let agg = SeasonAggregate::from_records("2024", &records);

        let jets = transformer().transform(&records[1], &agg, PositionGroup::Rb).unwrap();
        assert!((jets.multiplier - 400.0 / 300.0).abs() < 1e-4);
        assert_eq!(jets.basis, vec![StatField::PointsAllowed]);

        let bills = transformer().transform(&records[2], &agg, PositionGroup::Rb).unwrap();
        assert!(bills.multiplier < 1.0);
    }

    #[test]
    fn test_pressure_defense_lowers_qb_multiplier() {
        let records = league();
        let agg = SeasonAggregate::from_records("2024", &records);

        let bills = transformer().transform(&records[2], &agg, PositionGroup::Qb).unwrap();
        let jets = transformer().transform(&records[1], &agg, PositionGroup::Qb).unwrap();
        assert!(bills.multiplier < 1.0);
        assert!(jets.multiplier > 1.0);
        assert_eq!(
            bills.basis,
            vec![StatField::PointsAllowed, StatField::Sacks, StatField::Interceptions]
        );
    }

    #[test]
    fn test_outliers_are_clamped() {
        let mut records = vec![record("Outlier", 10_000, 0, 0)];
        for i in 0..9 {
            records.push(record(&format!("Normal{}", i), 10, 50, 20));
        }
        let agg = SeasonAggregate::from_records("2024", &records);
        let t = transformer();

        let m = t.transform(&records[0], &agg, PositionGroup::Qb).unwrap();
        assert_eq!(m.multiplier, 4.0);

        let low = t.transform(&records[1], &agg, PositionGroup::Rb).unwrap();
        assert_eq!(low.multiplier, 0.25);
    }

    #[test]
    fn test_zero_mean_metric_left_out_of_basis() {
        let records = vec![record("Patriots", 300, 0, 10), record("Jets", 300, 0, 10)];
        let agg = SeasonAggregate::from_records("2024", &records);

        let m = transformer().transform(&records[0], &agg, PositionGroup::Qb).unwrap();
        assert_eq!(m.basis, vec![StatField::PointsAllowed, StatField::Interceptions]);
    }

    #[test]
    fn test_empty_basis_yields_no_multiplier() {
        let records = vec![record("Patriots", 0, 10, 10)];
        let agg = SeasonAggregate::from_records("2024", &records);

        assert!(transformer().transform(&records[0], &agg, PositionGroup::Rb).is_none());
    }

    #[test]
    fn test_transform_is_deterministic() {
        let records = league();
        let agg = SeasonAggregate::from_records("2024", &records);
        let t = transformer();

        for group in PositionGroup::ALL {
            let a = serde_json::to_vec(&t.transform(&records[1], &agg, group)).unwrap();
            let b = serde_json::to_vec(&t.transform(&records[1], &agg, group)).unwrap();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_transform_season_reports_rejected_and_unusable_teams() {
        let records = vec![record("Patriots", 0, 10, 10), record("Jets", 0, 20, 5)];
        let agg = SeasonAggregate::from_records("2024", &records);

        let out = transformer().transform_season(&agg, &records, &["Bills".to_string()]);

        assert_eq!(out.skipped[0].team, "Bills");
        assert_eq!(out.skipped[0].reason, SkipReason::RejectedRow);
        assert_eq!(out.skipped[0].to_string(), "SKIPPED_INCOMPLETE 2024 Bills");
        // RB only looks at points allowed, whose mean is zero here
        let rb_skips = out
            .skipped
            .iter()
            .filter(|s| s.position_group == Some(PositionGroup::Rb))
            .count();
        assert_eq!(rb_skips, 2);
        assert_eq!(out.multipliers.len(), 6);
        assert!(out.multipliers.iter().all(|m| m.team != "Bills"));
    }

    #[test]
    fn test_inverted_bounds_are_rejected() {
        let inverted = TransformConfig {
            min_multiplier: 4.0,
            max_multiplier: 0.25,
        };
        assert!(DefenseMultiplierTransformer::new(&inverted).is_err());

        let zero_floor = TransformConfig {
            min_multiplier: 0.0,
            max_multiplier: 4.0,
        };
        assert!(DefenseMultiplierTransformer::new(&zero_floor).is_err());
    }

    #[test]
    fn test_rank_season_orders_best_defense_first() {
        let records = league();
        let agg = SeasonAggregate::from_records("2024", &records);

        let ranks = transformer().rank_season(&agg, &records);

        let order: Vec<_> = ranks.iter().map(|r| r.team.as_str()).collect();
        assert_eq!(order, vec!["Bills", "Patriots", "Jets"]);
        assert_eq!(ranks.iter().map(|r| r.rank).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(ranks[0].percentile, 100.0);
        assert_eq!(ranks[1].percentile, 66.67);
        assert_eq!(ranks[2].percentile, 33.33);
        // an exactly average defense scores 0.4 - 0.2 - 0.1
        assert_eq!(ranks[1].strength_score, 0.1);
    }

    #[test]
    fn test_rank_ties_break_on_team_name() {
        let records = vec![record("Jets", 300, 40, 10), record("Bills", 300, 40, 10)];
        let agg = SeasonAggregate::from_records("2024", &records);

        let ranks = transformer().rank_season(&agg, &records);
        assert_eq!(ranks[0].team, "Bills");
        assert_eq!(ranks[1].team, "Jets");
        assert_eq!(ranks[1].percentile, 50.0);
    }

    #[test]
    fn test_transform_season_includes_rankings() {
        let records = league();
        let agg = SeasonAggregate::from_records("2024", &records);

        let out = transformer().transform_season(&agg, &records, &[]);
        assert_eq!(out.rankings.len(), 3);
        assert_eq!(out.rankings[0].rank, 1);
    }
}
