use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::app::ports::{ClockPort, HttpClientPort, RecordSinkPort, SeasonBatch};
use crate::config::{Config, Target};
use crate::error::{Result, ScraperError};
use crate::pipeline::ingestion::fetcher::{FetchOutcome, RateLimitedFetcher};
use crate::pipeline::processing::extractor::TableExtractor;
use crate::pipeline::processing::quality_gate::{
    team_key, DataQualityValidator, RowError, SeasonWarning, TeamKey,
};
use crate::pipeline::processing::transform::{DefenseMultiplierTransformer, SkippedTeam};
use crate::types::{DefenseMultiplier, DefenseRanking, PageSource, SeasonAggregate, TeamDefenseRecord};

/// Per-run counters, surfaced as the run's terminal output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub pages_attempted: usize,
    pub pages_fetched: usize,
    pub pages_skipped: usize,
    pub successes: usize,
    pub row_errors: usize,
    /// Distinct rows dropped by validation.
    pub rows_rejected: usize,
    /// Percentage of extracted rows that became records; 0 when nothing was extracted.
    pub validation_rate: f64,
    pub schema_warnings: usize,
    pub season_warnings: usize,
    pub fetch_give_ups: usize,
    pub hard_stops: usize,
    pub multipliers: usize,
    pub skipped_incomplete: usize,
}

impl RunSummary {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: None,
            pages_attempted: 0,
            pages_fetched: 0,
            pages_skipped: 0,
            successes: 0,
            row_errors: 0,
            rows_rejected: 0,
            validation_rate: 0.0,
            schema_warnings: 0,
            season_warnings: 0,
            fetch_give_ups: 0,
            hard_stops: 0,
            multipliers: 0,
            skipped_incomplete: 0,
        }
    }

    pub fn halted(&self) -> bool {
        self.hard_stops > 0
    }

    fn compute_validation_rate(&mut self) {
        let total = self.successes + self.rows_rejected;
        self.validation_rate = if total == 0 {
            0.0
        } else {
            (self.successes as f64 / total as f64 * 10_000.0).round() / 100.0
        };
    }
}

/// Everything that went wrong or needs review, by category.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum RunWarning {
    SchemaDrift { url: String, issue: String },
    RowRejected { url: String, error: RowError },
    FetchGiveUp { url: String, attempts: u32, reason: String },
    HardStop { host: String, url: String, reason: String },
    PageSkipped { url: String, host: String },
    ImplausibleSeason(SeasonWarning),
    SkippedIncomplete(SkippedTeam),
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub summary: RunSummary,
    pub warnings: Vec<RunWarning>,
    pub records: Vec<TeamDefenseRecord>,
    pub multipliers: Vec<DefenseMultiplier>,
    pub rankings: Vec<DefenseRanking>,
}

#[derive(Default)]
struct SeasonWork {
    records: Vec<TeamDefenseRecord>,
    rejected_teams: Vec<String>,
}

/// Drives fetch → extract → validate over every target, then checks, transforms
/// and hands off each season. Strictly sequential.
pub struct PipelineOrchestrator {
    allowed: bool,
    fetcher: RateLimitedFetcher,
    extractor: TableExtractor,
    validator: DataQualityValidator,
    transformer: DefenseMultiplierTransformer,
    sink: Arc<dyn RecordSinkPort>,
    clock: Arc<dyn ClockPort>,
}

impl PipelineOrchestrator {
    pub fn new(
        config: &Config,
        http: Arc<dyn HttpClientPort>,
        clock: Arc<dyn ClockPort>,
        sink: Arc<dyn RecordSinkPort>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            allowed: config.fetch.allowed,
            fetcher: RateLimitedFetcher::new(http, clock.clone(), config.fetch.clone())?,
            extractor: TableExtractor::new(&config.extractor)?,
            validator: DataQualityValidator::new(),
            transformer: DefenseMultiplierTransformer::new(&config.transform)?,
            sink,
            clock,
        })
    }

    #[instrument(skip_all, fields(targets = targets.len()))]
    pub async fn run(&mut self, targets: &[Target]) -> Result<RunReport> {
        let mut summary = RunSummary::new(self.clock.wall_now());
        let mut warnings = Vec::new();
        let mut seasons: BTreeMap<String, SeasonWork> = BTreeMap::new();
        let mut seen: HashSet<TeamKey> = HashSet::new();

        if !self.allowed {
            warn!("fetching is not permitted by configuration; no requests will be made");
            summary.hard_stops += 1;
            summary.pages_skipped = targets.len();
            warnings.push(RunWarning::HardStop {
                host: String::new(),
                url: String::new(),
                reason: "fetch.allowed is false".to_string(),
            });
        } else {
            for target in targets {
                self.process_target(target, &mut summary, &mut warnings, &mut seasons, &mut seen)
                    .await;
            }
        }

        let mut records = Vec::new();
        let mut multipliers = Vec::new();
        let mut rankings = Vec::new();
        for (season, work) in seasons {
            let batch = self.finish_season(&season, work, &mut summary, &mut warnings);
            self.sink
                .write_season(&batch)
                .await
                .map_err(|e| ScraperError::Sink(e.to_string()))?;
            records.extend(batch.records);
            multipliers.extend(batch.multipliers);
            rankings.extend(batch.rankings);
        }

        summary.compute_validation_rate();
        summary.finished_at = Some(self.clock.wall_now());
        self.sink
            .write_summary(&summary)
            .await
            .map_err(|e| ScraperError::Sink(e.to_string()))?;

        info!(
            pages_fetched = summary.pages_fetched,
            pages_skipped = summary.pages_skipped,
            successes = summary.successes,
            row_errors = summary.row_errors,
            validation_rate = summary.validation_rate,
            schema_warnings = summary.schema_warnings,
            season_warnings = summary.season_warnings,
            fetch_give_ups = summary.fetch_give_ups,
            hard_stops = summary.hard_stops,
            multipliers = summary.multipliers,
            "run finished"
        );

        Ok(RunReport {
            summary,
            warnings,
            records,
            multipliers,
            rankings,
        })
    }

    async fn process_target(
        &mut self,
        target: &Target,
        summary: &mut RunSummary,
        warnings: &mut Vec<RunWarning>,
        seasons: &mut BTreeMap<String, SeasonWork>,
        seen: &mut HashSet<TeamKey>,
    ) {
        let host = reqwest::Url::parse(&target.url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .unwrap_or_default();
        if self.fetcher.is_halted(&host) {
            info!(url = %target.url, host = %host, "skipping page on halted host");
            summary.pages_skipped += 1;
            warnings.push(RunWarning::PageSkipped {
                url: target.url.clone(),
                host,
            });
            return;
        }

        summary.pages_attempted += 1;
        let page = match self.fetcher.fetch(&target.url).await {
            FetchOutcome::Success(page) => page,
            FetchOutcome::GiveUp(give_up) => {
                counter!("defense_fetch_give_ups_total").increment(1);
                summary.fetch_give_ups += 1;
                warnings.push(RunWarning::FetchGiveUp {
                    url: target.url.clone(),
                    attempts: give_up.request.attempt_count,
                    reason: give_up.reason,
                });
                return;
            }
            FetchOutcome::Blocked(stop) => {
                counter!("defense_hard_stops_total").increment(1);
                summary.hard_stops += 1;
                warnings.push(RunWarning::HardStop {
                    host: stop.host,
                    url: target.url.clone(),
                    reason: stop.reason.to_string(),
                });
                return;
            }
        };
        counter!("defense_pages_fetched_total").increment(1);
        summary.pages_fetched += 1;

        let (mut table, report) = self.extractor.extract(&page.body);
        for issue in report.issues() {
            counter!("defense_schema_warnings_total").increment(1);
            summary.schema_warnings += 1;
            warnings.push(RunWarning::SchemaDrift {
                url: target.url.clone(),
                issue: issue.to_string(),
            });
        }
        table.stamp_season(&target.season);

        let source = PageSource {
            url: page.url,
            fetched_at: page.fetched_at,
        };
        let outcome = self.validator.validate_against(&table, &source, seen);
        let rejected = outcome.rejected_teams();

        summary.successes += outcome.records.len();
        summary.row_errors += outcome.row_errors.len();
        summary.rows_rejected += outcome.rejected_rows();
        counter!("defense_records_valid_total").increment(outcome.records.len() as u64);
        counter!("defense_row_errors_total").increment(outcome.row_errors.len() as u64);
        for error in outcome.row_errors {
            warnings.push(RunWarning::RowRejected {
                url: target.url.clone(),
                error,
            });
        }
        for record in outcome.records {
            seasons.entry(record.season.clone()).or_default().records.push(record);
        }
        for (season, team) in rejected {
            seasons.entry(season).or_default().rejected_teams.push(team);
        }
    }

    fn finish_season(
        &self,
        season: &str,
        mut work: SeasonWork,
        summary: &mut RunSummary,
        warnings: &mut Vec<RunWarning>,
    ) -> SeasonBatch {
        // a team rejected on one page may still be valid on another
        let valid: HashSet<TeamKey> = work.records.iter().map(|r| team_key(season, &r.team)).collect();
        let mut reported = HashSet::new();
        work.rejected_teams.retain(|team| {
            let key = team_key(season, team);
            !valid.contains(&key) && reported.insert(key)
        });
        work.rejected_teams.sort();

        let aggregate = SeasonAggregate::from_records(season, &work.records);
        let warning = self.validator.check_season(&aggregate);
        if let Some(w) = &warning {
            counter!("defense_season_warnings_total").increment(1);
            summary.season_warnings += 1;
            warnings.push(RunWarning::ImplausibleSeason(w.clone()));
        }

        let computed = self
            .transformer
            .transform_season(&aggregate, &work.records, &work.rejected_teams);
        summary.multipliers += computed.multipliers.len();
        summary.skipped_incomplete += computed.skipped.len();
        warnings.extend(computed.skipped.into_iter().map(RunWarning::SkippedIncomplete));

        SeasonBatch {
            season: season.to_string(),
            records: work.records,
            multipliers: computed.multipliers,
            rankings: computed.rankings,
            warning,
        }
    }
}
