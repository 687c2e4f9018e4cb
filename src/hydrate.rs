//! Missing-route hydration.
//!
//! Fans the uncached coordinate pairs of a batch across a bounded pool
//! of workers, paced by one shared rate limiter, and merges results
//! into the route cache as they complete. A single routing failure
//! never aborts a cycle; the affected pair gets a straight-line
//! fallback instead.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::RouteCache;
use crate::rate_limit::{InvalidRate, RateLimiter};
use crate::resolver::{OsrmConfig, RouteResolver, RoutingError};
use crate::route::{CoordinatePair, RouteResult, RouteSource};
use crate::traits::Resolve;

/// Progress is reported at least this often while fetching.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct HydrateOptions {
    /// Concurrent fetch workers, each with its own transport session.
    pub workers: usize,
    /// Global request budget shared by all workers.
    pub qps: f64,
    /// Cap on new fetches per cycle; overflow pairs get a capped
    /// fallback without a network attempt.
    pub max_new_routes: Option<usize>,
}

impl Default for HydrateOptions {
    fn default() -> Self {
        Self {
            workers: 8,
            qps: 10.0,
            max_new_routes: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum HydrateError {
    #[error(transparent)]
    InvalidRate(#[from] InvalidRate),
    #[error("worker count must be at least 1")]
    NoWorkers,
    #[error("failed to build a route resolver: {0}")]
    Resolver(#[from] RoutingError),
}

/// What one hydration cycle did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HydrateReport {
    /// Pairs dispatched to the routing service.
    pub fetched: usize,
    /// Pairs assigned a capped fallback without a fetch attempt.
    pub capped: usize,
    /// Pairs already present in the cache.
    pub already_cached: usize,
}

/// Hydrates `pairs` against an OSRM endpoint, one resolver per worker.
pub fn hydrate_routes(
    pairs: &[CoordinatePair],
    cache: &mut RouteCache,
    osrm: &OsrmConfig,
    options: &HydrateOptions,
) -> Result<HydrateReport, HydrateError> {
    hydrate_with(pairs, cache, options, || RouteResolver::new(osrm.clone()))
}

/// Hydration over any resolver implementation.
///
/// `make_resolver` is called once per worker, so each worker owns its
/// transport session. On return the cache holds a result for every
/// input pair.
pub fn hydrate_with<R, F>(
    pairs: &[CoordinatePair],
    cache: &mut RouteCache,
    options: &HydrateOptions,
    mut make_resolver: F,
) -> Result<HydrateReport, HydrateError>
where
    R: Resolve + Send,
    F: FnMut() -> Result<R, RoutingError>,
{
    if options.workers == 0 {
        return Err(HydrateError::NoWorkers);
    }
    let limiter = RateLimiter::new(options.qps)?;

    let mut to_fetch: Vec<CoordinatePair> = pairs
        .iter()
        .filter(|pair| !cache.contains(&pair.key()))
        .copied()
        .collect();
    let already_cached = pairs.len() - to_fetch.len();

    if to_fetch.is_empty() {
        info!("all {} route pairs already cached", pairs.len());
        return Ok(HydrateReport {
            already_cached,
            ..HydrateReport::default()
        });
    }

    let mut to_fallback = Vec::new();
    if let Some(cap) = options.max_new_routes {
        if to_fetch.len() > cap {
            warn!(
                "capping route fetches at {cap} (requested {} unique pairs)",
                to_fetch.len()
            );
            to_fallback = to_fetch.split_off(cap);
        }
    }

    let total = to_fetch.len();
    if total > 0 {
        let worker_count = options.workers.min(total);
        info!(
            "fetching {total} routes with {worker_count} workers (qps={}, cap={:?})",
            options.qps, options.max_new_routes
        );

        let mut resolvers = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            resolvers.push(make_resolver()?);
        }

        let cursor = AtomicUsize::new(0);
        let (tx, rx) = mpsc::channel::<RouteResult>();
        let jobs = to_fetch.as_slice();
        let limiter = &limiter;
        let cursor_ref = &cursor;

        thread::scope(|scope| {
            for resolver in resolvers {
                let tx = tx.clone();
                scope.spawn(move || {
                    loop {
                        let index = cursor_ref.fetch_add(1, Ordering::Relaxed);
                        let Some(pair) = jobs.get(index) else { break };
                        limiter.acquire();
                        let result = match resolver.resolve(pair) {
                            Ok(result) => result,
                            Err(err) => {
                                debug!(
                                    "substituting straight-line fallback for {}: {err}",
                                    pair.key()
                                );
                                RouteResult::fallback(*pair, RouteSource::FallbackStraightLine)
                            }
                        };
                        if tx.send(result).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(tx);

            let started = Instant::now();
            let mut last_logged = started;
            let log_every = (total / 100).max(50);
            let mut completed = 0usize;
            for result in rx {
                cache.merge(result);
                completed += 1;
                let now = Instant::now();
                if completed % log_every == 0
                    || now.duration_since(last_logged) >= PROGRESS_INTERVAL
                    || completed == total
                {
                    log_progress(completed, total, started.elapsed());
                    last_logged = now;
                }
            }
        });
    }

    let capped = to_fallback.len();
    for pair in to_fallback {
        cache.merge(RouteResult::fallback(pair, RouteSource::FallbackMaxNewRoutes));
    }

    Ok(HydrateReport {
        fetched: total,
        capped,
        already_cached,
    })
}

fn log_progress(completed: usize, total: usize, elapsed: Duration) {
    let elapsed_s = elapsed.as_secs_f64().max(1e-6);
    let rate = completed as f64 / elapsed_s;
    let percent = completed as f64 / total as f64 * 100.0;
    let remaining = total - completed;
    let eta_s = if rate > 0.0 {
        (remaining as f64 / rate).round() as u64
    } else {
        0
    };
    info!(
        "route progress: {completed}/{total} ({percent:.1}%) | {rate:.1} pairs/s | elapsed {}s | eta {eta_s}s",
        elapsed.as_secs()
    );
}
