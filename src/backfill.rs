//! Resumable multi-month orchestration.
//!
//! Iterates an ordered month sequence, delegating each period to a
//! [`PeriodPipeline`](crate::traits::PeriodPipeline) implementation.
//! Progress state is persisted after every period transition, months
//! with existing output are skipped in resume mode, and a pause
//! sentinel stops the run cleanly at the next period boundary.

use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::month::{Month, MonthError, month_range};
use crate::traits::PeriodPipeline;

#[derive(Debug, Error)]
pub enum BackfillError {
    #[error(transparent)]
    Month(#[from] MonthError),
    #[error("no month with discoverable source data at or after {start}")]
    NoAvailableMonth { start: Month },
    #[error("auto-tune calibration failed: {source}")]
    Calibration {
        source: Box<dyn StdError + Send + Sync>,
    },
    #[error("month {month} failed: {source}")]
    Period {
        month: Month,
        source: Box<dyn StdError + Send + Sync>,
    },
    #[error("failed to encode backfill state: {0}")]
    StateEncode(#[from] serde_json::Error),
    #[error("failed to write backfill state to {path}: {source}")]
    StateWrite { path: PathBuf, source: io::Error },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackfillStatus {
    Running,
    Paused,
    Completed,
}

impl fmt::Display for BackfillStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackfillStatus::Running => "running",
            BackfillStatus::Paused => "paused",
            BackfillStatus::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// Progress snapshot overwritten after every period transition.
#[derive(Debug, Clone, Serialize)]
pub struct BackfillState {
    pub status: BackfillStatus,
    pub updated_at_utc: String,
    pub start_month: String,
    pub end_month: String,
    pub total_months: usize,
    pub completed_months: usize,
    pub percent_complete: f64,
    pub current_month: Option<String>,
    pub next_month: Option<String>,
    pub elapsed_seconds: f64,
}

impl BackfillState {
    #[allow(clippy::too_many_arguments)]
    fn snapshot(
        status: BackfillStatus,
        start: Month,
        end: Month,
        total: usize,
        completed: usize,
        current: Option<Month>,
        next: Option<Month>,
        elapsed: Duration,
    ) -> Self {
        let percent = if total == 0 {
            100.0
        } else {
            completed as f64 / total as f64 * 100.0
        };
        Self {
            status,
            updated_at_utc: Utc::now().to_rfc3339(),
            start_month: start.to_string(),
            end_month: end.to_string(),
            total_months: total,
            completed_months: completed,
            percent_complete: (percent * 100.0).round() / 100.0,
            current_month: current.map(|month| month.to_string()),
            next_month: next.map(|month| month.to_string()),
            elapsed_seconds: (elapsed.as_secs_f64() * 100.0).round() / 100.0,
        }
    }
}

fn write_state(path: &Path, state: &BackfillState) -> Result<(), BackfillError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|source| BackfillError::StateWrite {
                path: path.to_path_buf(),
                source,
            })?;
        }
    }
    let body = serde_json::to_string_pretty(state)?;
    fs::write(path, format!("{body}\n")).map_err(|source| BackfillError::StateWrite {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, Clone)]
pub struct BackfillOptions {
    /// Skip months whose output already exists.
    pub resume: bool,
    /// Log and skip failed months instead of aborting.
    pub continue_on_error: bool,
    /// Calibrate the pipeline before the first month.
    pub auto_tune: bool,
    /// Calibrate and return without processing any months.
    pub exit_after_tune: bool,
    /// Existence of this file requests a stop at the next boundary.
    pub pause_file: PathBuf,
    /// Progress state document, overwritten per transition.
    pub state_file: PathBuf,
}

impl Default for BackfillOptions {
    fn default() -> Self {
        Self {
            resume: true,
            continue_on_error: false,
            auto_tune: false,
            exit_after_tune: false,
            pause_file: PathBuf::from("output/.backfill_pause"),
            state_file: PathBuf::from("output/backfill_state.json"),
        }
    }
}

/// The end of the month range: explicit, or discovered from the most
/// recent month with source data.
#[derive(Debug, Clone, Copy)]
pub enum EndMonth {
    At(Month),
    Latest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackfillOutcome {
    pub status: BackfillStatus,
    pub total_months: usize,
    pub completed_months: usize,
}

/// Resolves an `EndMonth::Latest` bound by probing backward from the
/// current month until a month with discoverable source data is found.
pub fn resolve_end_month<P: PeriodPipeline>(
    pipeline: &P,
    start: Month,
    end: EndMonth,
) -> Result<Month, BackfillError> {
    match end {
        EndMonth::At(month) => Ok(month),
        EndMonth::Latest => {
            let mut cursor = Month::current();
            while cursor >= start {
                if pipeline.has_source_data(cursor) {
                    return Ok(cursor);
                }
                cursor = cursor.pred();
            }
            Err(BackfillError::NoAvailableMonth { start })
        }
    }
}

/// Runs the backfill state machine over `start..=end`.
///
/// Pause is only observed between periods; an in-flight month always
/// runs to completion. State snapshots are written after every period
/// so partial progress survives a crash.
pub fn run_backfill<P: PeriodPipeline>(
    pipeline: &mut P,
    start: Month,
    end: EndMonth,
    options: &BackfillOptions,
) -> Result<BackfillOutcome, BackfillError> {
    if options.auto_tune || options.exit_after_tune {
        pipeline
            .calibrate()
            .map_err(|source| BackfillError::Calibration { source })?;
        if options.exit_after_tune {
            info!("auto-tune complete; exiting before processing any months");
            return Ok(BackfillOutcome {
                status: BackfillStatus::Completed,
                total_months: 0,
                completed_months: 0,
            });
        }
    }

    let end = resolve_end_month(pipeline, start, end)?;
    let months = month_range(start, end)?;
    let total = months.len();
    info!("backfill plan: {start} -> {end} ({total} month(s))");

    let started = Instant::now();
    let mut completed = 0usize;
    let mut paused = false;

    write_state(
        &options.state_file,
        &BackfillState::snapshot(
            BackfillStatus::Running,
            start,
            end,
            total,
            completed,
            None,
            months.first().copied(),
            started.elapsed(),
        ),
    )?;

    for (index, &month) in months.iter().enumerate() {
        if options.resume && pipeline.has_output(month) {
            info!("[{}/{total}] skipping {month}: output already exists", index + 1);
            completed += 1;
        } else {
            info!("[{}/{total}] processing {month}", index + 1);
            let month_started = Instant::now();
            match pipeline.process(month) {
                Ok(()) => {
                    info!(
                        "month {month} completed in {:.1} minutes",
                        month_started.elapsed().as_secs_f64() / 60.0
                    );
                    completed += 1;
                }
                Err(source) if options.continue_on_error => {
                    error!("month {month} failed, continuing: {source}");
                    continue;
                }
                Err(source) => return Err(BackfillError::Period { month, source }),
            }
        }

        log_overall_progress(completed, total, started.elapsed(), month);
        write_state(
            &options.state_file,
            &BackfillState::snapshot(
                BackfillStatus::Running,
                start,
                end,
                total,
                completed,
                Some(month),
                months.get(index + 1).copied(),
                started.elapsed(),
            ),
        )?;

        if options.pause_file.exists() {
            paused = true;
            warn!(
                "pause file {} detected; stopping cleanly after {month}",
                options.pause_file.display()
            );
            break;
        }
    }

    let status = if paused {
        BackfillStatus::Paused
    } else {
        BackfillStatus::Completed
    };
    let next = if paused { months.get(completed).copied() } else { None };
    write_state(
        &options.state_file,
        &BackfillState::snapshot(status, start, end, total, completed, None, next, started.elapsed()),
    )?;

    if paused {
        warn!(
            "backfill paused; remove {} and rerun to continue",
            options.pause_file.display()
        );
    } else {
        info!("backfill finished: {completed}/{total} month(s) processed");
    }

    Ok(BackfillOutcome {
        status,
        total_months: total,
        completed_months: completed,
    })
}

fn log_overall_progress(completed: usize, total: usize, elapsed: Duration, current: Month) {
    let elapsed_s = elapsed.as_secs_f64().max(1e-6);
    let avg_per_month = elapsed_s / completed.max(1) as f64;
    let remaining = total.saturating_sub(completed);
    let eta_s = remaining as f64 * avg_per_month;
    let percent = if total == 0 {
        100.0
    } else {
        completed as f64 / total as f64 * 100.0
    };
    info!(
        "overall progress: {completed}/{total} months ({percent:.1}%) | elapsed {:.1}m | eta {:.1}m | last={current}",
        elapsed_s / 60.0,
        eta_s / 60.0
    );
}
