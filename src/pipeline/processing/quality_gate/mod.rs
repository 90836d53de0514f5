use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use tracing::{debug, warn};

use crate::constants::{SEASON_COLUMN, TEAM_COLUMN};
use crate::types::{PageSource, RawRow, RawTable, SeasonAggregate, StatField, TeamDefenseRecord};

static SEASON_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]{4}$").expect("valid season pattern"));

/// Season plus case-folded team name; two rows with the same key describe the same defense.
pub type TeamKey = (String, String);

pub fn team_key(season: &str, team: &str) -> TeamKey {
    (season.to_string(), team.trim().to_lowercase())
}

/// Why a row was excluded from output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "field", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RowErrorKind {
    /// Absent, non-numeric or negative value.
    InvalidNumeric(StatField),
    EmptyTeam,
    InvalidSeason,
    /// Same team already seen for this season in the same table.
    DuplicateTeam,
}

impl fmt::Display for RowErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowErrorKind::InvalidNumeric(field) => write!(f, "INVALID_NUMERIC({})", field),
            RowErrorKind::EmptyTeam => write!(f, "EMPTY_TEAM"),
            RowErrorKind::InvalidSeason => write!(f, "INVALID_SEASON"),
            RowErrorKind::DuplicateTeam => write!(f, "DUPLICATE_TEAM"),
        }
    }
}

/// A single rule violation, attributable to one extracted row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowError {
    /// Zero-based index of the row in its table.
    pub row: usize,
    pub team: Option<String>,
    pub season: Option<String>,
    pub kind: RowErrorKind,
    /// The offending raw value, when there was one.
    pub value: Option<String>,
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {}: {}", self.row, self.kind)?;
        if let Some(team) = &self.team {
            write!(f, " team={}", team)?;
        }
        if let Some(value) = &self.value {
            write!(f, " value={:?}", value)?;
        }
        Ok(())
    }
}

/// Season-scoped quality signal; the season's records are still emitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeasonWarning {
    pub season: String,
    pub kind: SeasonWarningKind,
    pub sum_sacks: u64,
    pub sum_interceptions: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeasonWarningKind {
    ImplausibleSeason,
}

impl fmt::Display for SeasonWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "IMPLAUSIBLE_SEASON {} (sum sacks={}, sum interceptions={})",
            self.season, self.sum_sacks, self.sum_interceptions
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    pub records: Vec<TeamDefenseRecord>,
    pub row_errors: Vec<RowError>,
}

impl ValidationOutcome {
    /// Teams named on rows that were dropped, for reporting as incomplete downstream.
    pub fn rejected_teams(&self) -> Vec<(String, String)> {
        let valid: HashSet<TeamKey> = self
            .records
            .iter()
            .map(|r| team_key(&r.season, &r.team))
            .collect();
        let mut seen = HashSet::new();
        self.row_errors
            .iter()
            .filter(|e| e.kind != RowErrorKind::DuplicateTeam)
            .filter_map(|e| match (&e.season, &e.team) {
                (Some(season), Some(team)) => Some((season.clone(), team.clone())),
                _ => None,
            })
            .filter(|(s, t)| {
                let key = team_key(s, t);
                !valid.contains(&key) && seen.insert(key)
            })
            .collect()
    }

    /// Number of distinct rows dropped; a row breaking several rules counts once.
    pub fn rejected_rows(&self) -> usize {
        self.row_errors.iter().map(|e| e.row).collect::<HashSet<_>>().len()
    }
}

/// Row-level and season-level data-quality rules.
///
/// Rows are never coerced: a row breaking any rule is dropped and every broken
/// rule is reported separately.
#[derive(Debug, Default)]
pub struct DataQualityValidator;

impl DataQualityValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, table: &RawTable, source: &PageSource) -> ValidationOutcome {
        self.validate_against(table, source, &mut HashSet::new())
    }

    /// Like `validate`, but a team already in `seen` (from an earlier page of the
    /// same run) is a `DUPLICATE_TEAM`. Accepted teams are added to `seen`.
    pub fn validate_against(
        &self,
        table: &RawTable,
        source: &PageSource,
        seen: &mut HashSet<TeamKey>,
    ) -> ValidationOutcome {
        let mut outcome = ValidationOutcome::default();

        for (idx, row) in table.rows.iter().enumerate() {
            match self.validate_row(idx, row, source) {
                Ok(record) => {
                    if seen.insert(team_key(&record.season, &record.team)) {
                        outcome.records.push(record);
                    } else {
                        outcome.row_errors.push(RowError {
                            row: idx,
                            team: Some(record.team),
                            season: Some(record.season),
                            kind: RowErrorKind::DuplicateTeam,
                            value: None,
                        });
                    }
                }
                Err(errors) => outcome.row_errors.extend(errors),
            }
        }

        for error in &outcome.row_errors {
            debug!(url = %source.url, error = %error, "row rejected");
        }
        if !outcome.row_errors.is_empty() {
            warn!(
                url = %source.url,
                valid = outcome.records.len(),
                rejected = outcome.row_errors.len(),
                "rows failed validation"
            );
        }
        outcome
    }

    fn validate_row(
        &self,
        idx: usize,
        row: &RawRow,
        source: &PageSource,
    ) -> Result<TeamDefenseRecord, Vec<RowError>> {
        let team = row.get(TEAM_COLUMN).map(|t| t.trim()).unwrap_or_default();
        let season = row.get(SEASON_COLUMN).map(|s| s.trim()).unwrap_or_default();
        let mut errors = Vec::new();
        let error = |kind, value: Option<&String>| RowError {
            row: idx,
            team: (!team.is_empty()).then(|| team.to_string()),
            season: (!season.is_empty()).then(|| season.to_string()),
            kind,
            value: value.cloned(),
        };

        if team.is_empty() {
            errors.push(error(RowErrorKind::EmptyTeam, None));
        }
        if !SEASON_PATTERN.is_match(season) {
            errors.push(error(RowErrorKind::InvalidSeason, row.get(SEASON_COLUMN)));
        }

        let mut values = [0u64; 3];
        for (slot, field) in values.iter_mut().zip(StatField::ALL) {
            let raw = row.get(field.as_str());
            match raw.and_then(|v| parse_count(v)) {
                Some(n) => *slot = n,
                None => errors.push(error(RowErrorKind::InvalidNumeric(field), raw)),
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }
        let [points_allowed, sacks, interceptions] = values;
        Ok(TeamDefenseRecord {
            season: season.to_string(),
            team: team.to_string(),
            points_allowed,
            sacks,
            interceptions,
            source_url: source.url.clone(),
            fetched_at: source.fetched_at,
        })
    }

    /// Plausibility over one season's full batch: both pressure totals must be non-zero.
    pub fn check_season(&self, aggregate: &SeasonAggregate) -> Option<SeasonWarning> {
        if aggregate.is_plausible() {
            return None;
        }
        warn!(
            season = %aggregate.season,
            sum_sacks = aggregate.sum_sacks,
            sum_interceptions = aggregate.sum_interceptions,
            "season flagged for manual review"
        );
        Some(SeasonWarning {
            season: aggregate.season.clone(),
            kind: SeasonWarningKind::ImplausibleSeason,
            sum_sacks: aggregate.sum_sacks,
            sum_interceptions: aggregate.sum_interceptions,
        })
    }

    /// Groups records by season and checks each group.
    pub fn check_seasons(&self, records: &[TeamDefenseRecord]) -> Vec<SeasonWarning> {
        let seasons: BTreeMap<&str, ()> = records.iter().map(|r| (r.season.as_str(), ())).collect();
        seasons
            .keys()
            .filter_map(|season| self.check_season(&SeasonAggregate::from_records(season, records)))
            .collect()
    }
}

/// Parses a non-negative integer count; anything else is rejected, never defaulted.
fn parse_count(raw: &str) -> Option<u64> {
    raw.trim().parse().ok()
}
