//! Scripted ports shared by unit tests.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::app::ports::{ClockPort, HttpClientPort, HttpGetResult, RecordSinkPort, SeasonBatch};
use crate::pipeline::orchestrator::RunSummary;

pub type Scripted = Result<HttpGetResult, String>;

pub fn ok(body: &str) -> Scripted {
    Ok(HttpGetResult {
        status: 200,
        body: body.to_string(),
        retry_after: None,
    })
}

pub fn status(code: u16) -> Scripted {
    Ok(HttpGetResult {
        status: code,
        body: String::new(),
        retry_after: None,
    })
}

pub fn status_with_retry_after(code: u16, retry_after: &str) -> Scripted {
    Ok(HttpGetResult {
        status: code,
        body: String::new(),
        retry_after: Some(retry_after.to_string()),
    })
}

/// Replays canned responses in order and records every requested URL.
pub struct ScriptedHttp {
    responses: Mutex<VecDeque<Scripted>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedHttp {
    pub fn new(responses: Vec<Scripted>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpClientPort for ScriptedHttp {
    async fn get(&self, url: &str) -> Result<HttpGetResult, String> {
        self.calls.lock().unwrap().push(url.to_string());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err("script exhausted".to_string()))
    }
}

/// Clock that only moves when slept on.
pub struct FakeClock {
    start: Instant,
    elapsed: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClockPort for FakeClock {
    fn now(&self) -> Instant {
        self.start + *self.elapsed.lock().unwrap()
    }

    fn wall_now(&self) -> DateTime<Utc> {
        let base = Utc.with_ymd_and_hms(2024, 9, 1, 12, 0, 0).unwrap();
        let elapsed = *self.elapsed.lock().unwrap();
        base + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero())
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
        *self.elapsed.lock().unwrap() += duration;
    }
}

/// Keeps every batch and summary it is handed.
#[derive(Default)]
pub struct MemorySink {
    batches: Mutex<Vec<SeasonBatch>>,
    summaries: Mutex<Vec<RunSummary>>,
}

impl MemorySink {
    pub fn batches(&self) -> Vec<SeasonBatch> {
        self.batches.lock().unwrap().clone()
    }

    pub fn summaries(&self) -> Vec<RunSummary> {
        self.summaries.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecordSinkPort for MemorySink {
    async fn write_season(&self, batch: &SeasonBatch) -> anyhow::Result<()> {
        self.batches.lock().unwrap().push(batch.clone());
        Ok(())
    }

    async fn write_summary(&self, summary: &RunSummary) -> anyhow::Result<()> {
        self.summaries.lock().unwrap().push(summary.clone());
        Ok(())
    }
}
