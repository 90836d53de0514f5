use crate::app::ports::{RecordSinkPort, SeasonBatch};
use crate::error::Result;
use crate::pipeline::orchestrator::RunSummary;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;

/// File-based implementation of RecordSinkPort.
/// Writes records, multipliers, rankings and season flags to separate NDJSON files
/// and the run summary to `run_summary.json`.
pub struct JsonlOutputAdapter {
    records_file: Mutex<BufWriter<File>>,
    multipliers_file: Mutex<BufWriter<File>>,
    rankings_file: Mutex<BufWriter<File>>,
    seasons_file: Mutex<BufWriter<File>>,
    summary_path: PathBuf,
}

#[derive(Serialize)]
struct SeasonLine<'a> {
    season: &'a str,
    teams: usize,
    multipliers: usize,
    needs_review: bool,
    warning: Option<String>,
}

impl JsonlOutputAdapter {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        let records_path = dir.join("records.jsonl");
        let multipliers_path = dir.join("multipliers.jsonl");
        let rankings_path = dir.join("rankings.jsonl");
        let seasons_path = dir.join("seasons.jsonl");

        info!("Creating output files:");
        info!("  Records: {}", records_path.display());
        info!("  Multipliers: {}", multipliers_path.display());
        info!("  Rankings: {}", rankings_path.display());
        info!("  Seasons: {}", seasons_path.display());

        Ok(Self {
            records_file: Mutex::new(open_truncated(&records_path)?),
            multipliers_file: Mutex::new(open_truncated(&multipliers_path)?),
            rankings_file: Mutex::new(open_truncated(&rankings_path)?),
            seasons_file: Mutex::new(open_truncated(&seasons_path)?),
            summary_path: dir.join("run_summary.json"),
        })
    }
}

fn open_truncated(path: &Path) -> std::io::Result<BufWriter<File>> {
    Ok(BufWriter::new(
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?,
    ))
}

fn write_lines<T: Serialize>(file: &Mutex<BufWriter<File>>, items: &[T]) -> anyhow::Result<()> {
    let mut writer = file
        .lock()
        .map_err(|_| anyhow::anyhow!("output writer lock poisoned"))?;
    for item in items {
        serde_json::to_writer(&mut *writer, item)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

#[async_trait::async_trait]
impl RecordSinkPort for JsonlOutputAdapter {
    async fn write_season(&self, batch: &SeasonBatch) -> anyhow::Result<()> {
        write_lines(&self.records_file, &batch.records)?;
        write_lines(&self.multipliers_file, &batch.multipliers)?;
        write_lines(&self.rankings_file, &batch.rankings)?;
        let line = SeasonLine {
            season: &batch.season,
            teams: batch.records.len(),
            multipliers: batch.multipliers.len(),
            needs_review: batch.needs_review(),
            warning: batch.warning.as_ref().map(|w| w.to_string()),
        };
        write_lines(&self.seasons_file, &[line])?;
        info!(
            season = %batch.season,
            records = batch.records.len(),
            multipliers = batch.multipliers.len(),
            "wrote season output"
        );
        Ok(())
    }

    async fn write_summary(&self, summary: &RunSummary) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(summary)?;
        std::fs::write(&self.summary_path, json)?;
        info!("Wrote run summary to {}", self.summary_path.display());
        Ok(())
    }
}
