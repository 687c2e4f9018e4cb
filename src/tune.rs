//! Worker/qps auto-calibration against probe pairs.
//!
//! Benchmarks a small grid of (workers, qps) candidates with fallback
//! substitution disabled, then picks the highest-throughput candidate
//! that still meets the success-rate bar. Probe results are never
//! merged into the persistent route cache.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use thiserror::Error;
use tracing::{info, warn};

use crate::cache::RouteCache;
use crate::rate_limit::{InvalidRate, RateLimiter};
use crate::resolver::{OsrmConfig, RouteResolver, RoutingError};
use crate::route::CoordinatePair;
use crate::traits::Resolve;

/// Candidates at or above this success rate are preferred outright.
const SUCCESS_RATE_BAR: f64 = 0.995;
/// Seed for reproducible probe sampling across runs.
const PROBE_SEED: u64 = 42;
/// Sample at least this many distinct pairs before cyclic expansion.
const MIN_PROBE_SAMPLE: usize = 40;

/// Central-London points used when no cached pairs are available.
const FALLBACK_POINTS: [(f64, f64); 8] = [
    (-0.1276, 51.5074),
    (-0.1410, 51.5010),
    (-0.0990, 51.5140),
    (-0.0760, 51.5210),
    (-0.1890, 51.4930),
    (-0.1100, 51.5300),
    (-0.0840, 51.5000),
    (-0.1500, 51.5150),
];

#[derive(Debug, Clone)]
pub struct TuneOptions {
    /// Probe requests per candidate configuration.
    pub probe_requests: usize,
    /// Operator-supplied qps, always present in the candidate grid.
    pub baseline_qps: f64,
}

impl Default for TuneOptions {
    fn default() -> Self {
        Self {
            probe_requests: 120,
            baseline_qps: 10.0,
        }
    }
}

#[derive(Debug, Error)]
pub enum TuneError {
    #[error(transparent)]
    InvalidRate(#[from] InvalidRate),
    #[error("failed to build a route resolver: {0}")]
    Resolver(#[from] RoutingError),
    #[error("no candidate configurations were benchmarked")]
    NoCandidates,
}

/// One benchmarked (workers, qps) configuration.
#[derive(Debug, Clone, Copy)]
pub struct TuneCandidate {
    pub workers: usize,
    pub qps: f64,
    pub success: usize,
    pub failure: usize,
    pub elapsed: Duration,
}

impl TuneCandidate {
    pub fn success_rate(&self) -> f64 {
        let total = self.success + self.failure;
        if total == 0 {
            0.0
        } else {
            self.success as f64 / total as f64
        }
    }

    /// Successful fetches per second.
    pub fn throughput(&self) -> f64 {
        self.success as f64 / self.elapsed.as_secs_f64().max(1e-6)
    }
}

/// The chosen operating point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TuneSelection {
    pub workers: usize,
    pub qps: f64,
    /// True when no candidate met the success-rate bar and the best
    /// throughput was taken regardless.
    pub degraded: bool,
}

/// Picks the operating point: max throughput among candidates meeting
/// the success-rate bar, or overall max throughput (degraded) if none
/// clears it.
pub fn select_operating_point(candidates: &[TuneCandidate]) -> Option<TuneSelection> {
    if candidates.is_empty() {
        return None;
    }
    let acceptable: Vec<&TuneCandidate> = candidates
        .iter()
        .filter(|candidate| candidate.success_rate() >= SUCCESS_RATE_BAR)
        .collect();
    let degraded = acceptable.is_empty();
    let pool: Vec<&TuneCandidate> = if degraded {
        candidates.iter().collect()
    } else {
        acceptable
    };
    let chosen = pool
        .into_iter()
        .max_by(|a, b| a.throughput().total_cmp(&b.throughput()))?;
    Some(TuneSelection {
        workers: chosen.workers,
        qps: chosen.qps,
        degraded,
    })
}

/// Builds the probe set: cached pairs when available, a synthetic
/// central-London grid otherwise, deterministically shuffled and
/// cyclically expanded to exactly `target` pairs.
pub fn probe_pairs(cache: &RouteCache, target: usize) -> Vec<CoordinatePair> {
    let target = target.max(1);
    let mut rng = StdRng::seed_from_u64(PROBE_SEED);

    let mut pairs: Vec<CoordinatePair> = cache.results().map(|result| result.pair).collect();
    // Hash-map iteration order is arbitrary; sort before the seeded
    // shuffle so the sample is reproducible.
    pairs.sort_by_key(|pair| pair.key());
    if pairs.is_empty() {
        pairs = synthetic_grid();
    }

    pairs.shuffle(&mut rng);
    pairs.truncate(target.max(MIN_PROBE_SAMPLE));

    (0..target).map(|index| pairs[index % pairs.len()]).collect()
}

fn synthetic_grid() -> Vec<CoordinatePair> {
    let mut pairs = Vec::new();
    for &(start_lon, start_lat) in &FALLBACK_POINTS {
        for &(end_lon, end_lat) in &FALLBACK_POINTS {
            if (start_lon, start_lat) != (end_lon, end_lat) {
                pairs.push(CoordinatePair::new(start_lon, start_lat, end_lon, end_lat));
            }
        }
    }
    pairs
}

/// Worker-count levels derived from the hardware concurrency hint.
fn worker_candidates() -> Vec<usize> {
    let cpus = thread::available_parallelism().map(|n| n.get()).unwrap_or(8);
    let mut candidates = vec![
        (cpus / 2).max(4),
        cpus.max(8),
        (cpus * 3 / 2).max(12),
        (cpus * 2).max(16),
    ];
    candidates.sort_unstable();
    candidates.dedup();
    candidates
}

fn qps_candidates(baseline: f64) -> Vec<f64> {
    let mut candidates = vec![baseline.max(20.0), 80.0, 120.0, 180.0, 260.0, 320.0];
    candidates.sort_by(f64::total_cmp);
    candidates.dedup();
    candidates
}

/// Runs the probe set through a pool at (workers, qps) and measures the
/// outcome. Failures are counted, never substituted.
pub fn benchmark_candidate<R, F>(
    pairs: &[CoordinatePair],
    workers: usize,
    qps: f64,
    mut make_resolver: F,
) -> Result<TuneCandidate, TuneError>
where
    R: Resolve + Send,
    F: FnMut() -> Result<R, RoutingError>,
{
    let limiter = RateLimiter::new(qps)?;
    let worker_count = workers.max(1).min(pairs.len().max(1));
    let mut resolvers = Vec::with_capacity(worker_count);
    for _ in 0..worker_count {
        resolvers.push(make_resolver()?);
    }

    let cursor = AtomicUsize::new(0);
    let success = AtomicUsize::new(0);
    let failure = AtomicUsize::new(0);
    let started = Instant::now();

    thread::scope(|scope| {
        for resolver in resolvers {
            let cursor = &cursor;
            let success = &success;
            let failure = &failure;
            let limiter = &limiter;
            scope.spawn(move || {
                loop {
                    let index = cursor.fetch_add(1, Ordering::Relaxed);
                    let Some(pair) = pairs.get(index) else { break };
                    limiter.acquire();
                    match resolver.resolve(pair) {
                        Ok(_) => success.fetch_add(1, Ordering::Relaxed),
                        Err(_) => failure.fetch_add(1, Ordering::Relaxed),
                    };
                }
            });
        }
    });

    Ok(TuneCandidate {
        workers,
        qps,
        success: success.into_inner(),
        failure: failure.into_inner(),
        elapsed: started.elapsed(),
    })
}

/// Benchmarks the full candidate grid against an OSRM endpoint and
/// selects an operating point.
pub fn auto_tune(
    cache: &RouteCache,
    osrm: &OsrmConfig,
    options: &TuneOptions,
) -> Result<TuneSelection, TuneError> {
    let pairs = probe_pairs(cache, options.probe_requests);
    let worker_grid = worker_candidates();
    let qps_grid = qps_candidates(options.baseline_qps);
    info!(
        "auto-tune: benchmarking {} requests across {} worker levels x {} qps levels",
        pairs.len(),
        worker_grid.len(),
        qps_grid.len()
    );

    let mut candidates = Vec::with_capacity(worker_grid.len() * qps_grid.len());
    for &workers in &worker_grid {
        for &qps in &qps_grid {
            let candidate =
                benchmark_candidate(&pairs, workers, qps, || RouteResolver::new(osrm.clone()))?;
            info!(
                "auto-tune probe workers={workers} qps={qps:.1} -> success {:.1}%, throughput {:.1} rps",
                candidate.success_rate() * 100.0,
                candidate.throughput()
            );
            candidates.push(candidate);
        }
    }

    let selection = select_operating_point(&candidates).ok_or(TuneError::NoCandidates)?;
    warn!(
        "auto-tune selected workers={} qps={:.1}",
        selection.workers, selection.qps
    );
    if selection.degraded {
        warn!(
            "no probe configuration reached {:.1}% success; selected best-throughput fallback",
            SUCCESS_RATE_BAR * 100.0
        );
    }
    Ok(selection)
}
