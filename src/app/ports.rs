use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

use crate::pipeline::orchestrator::RunSummary;
use crate::pipeline::processing::quality_gate::SeasonWarning;
use crate::types::{DefenseMultiplier, DefenseRanking, TeamDefenseRecord};

// Fetch-side ports
#[async_trait]
pub trait HttpClientPort: Send + Sync {
    /// Issues a single GET. `Err` means the request never produced a response
    /// (connect failure, timeout, broken body).
    async fn get(&self, url: &str) -> Result<HttpGetResult, String>;
}

#[derive(Clone, Debug)]
pub struct HttpGetResult {
    pub status: u16,
    pub body: String,
    pub retry_after: Option<String>,
}

/// Time source for crawl-delay and backoff waits.
#[async_trait]
pub trait ClockPort: Send + Sync {
    fn now(&self) -> Instant;
    fn wall_now(&self) -> DateTime<Utc>;
    async fn sleep(&self, duration: Duration);
}

// Output-side port
#[async_trait]
pub trait RecordSinkPort: Send + Sync {
    async fn write_season(&self, batch: &SeasonBatch) -> anyhow::Result<()>;
    async fn write_summary(&self, summary: &RunSummary) -> anyhow::Result<()>;
}

/// Everything produced for one season, handed to storage in one piece.
#[derive(Debug, Clone)]
pub struct SeasonBatch {
    pub season: String,
    pub records: Vec<TeamDefenseRecord>,
    pub multipliers: Vec<DefenseMultiplier>,
    pub rankings: Vec<DefenseRanking>,
    /// Set when the season failed the plausibility check and needs manual review.
    pub warning: Option<SeasonWarning>,
}

impl SeasonBatch {
    pub fn needs_review(&self) -> bool {
        self.warning.is_some()
    }
}
