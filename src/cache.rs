//! Persistent route cache keyed by canonical coordinate pairs.
//!
//! Loaded once per hydration cycle, merged in memory, saved once at the
//! end. Structural problems on load degrade to an empty cache; only
//! saving can fail.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::route::{CoordinatePair, RouteResult, RouteSource};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to create cache directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("failed to write route cache: {0}")]
    Write(#[from] csv::Error),
}

/// One persisted cache entry. Column order matches the on-disk store.
#[derive(Debug, Serialize, Deserialize)]
struct CacheRow {
    start_lon: f64,
    start_lat: f64,
    end_lon: f64,
    end_lat: f64,
    route_geometry: String,
    route_distance_m: f64,
    route_duration_s: f64,
    route_source: RouteSource,
}

impl CacheRow {
    fn from_result(result: &RouteResult) -> Self {
        Self {
            start_lon: result.pair.start_lon(),
            start_lat: result.pair.start_lat(),
            end_lon: result.pair.end_lon(),
            end_lat: result.pair.end_lat(),
            route_geometry: result.geometry.clone(),
            route_distance_m: result.distance_m,
            route_duration_s: result.duration_s,
            route_source: result.source,
        }
    }

    fn into_result(self) -> RouteResult {
        RouteResult {
            pair: CoordinatePair::new(self.start_lon, self.start_lat, self.end_lon, self.end_lat),
            geometry: self.route_geometry,
            distance_m: self.route_distance_m,
            duration_s: self.route_duration_s,
            source: self.route_source,
        }
    }
}

/// In-memory route store, persisted as CSV sorted by the coordinate
/// columns for reproducible diffs.
#[derive(Debug, Default)]
pub struct RouteCache {
    entries: HashMap<String, RouteResult>,
}

impl RouteCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a cache from disk. A missing, unreadable or misshapen store
    /// is treated as empty, never as an error.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        let mut reader = match csv::Reader::from_path(path) {
            Ok(reader) => reader,
            Err(err) => {
                warn!(
                    "route cache at {} is unreadable, starting empty: {err}",
                    path.display()
                );
                return Self::default();
            }
        };

        let mut entries = HashMap::new();
        for row in reader.deserialize::<CacheRow>() {
            match row {
                Ok(row) => {
                    let result = row.into_result();
                    entries.insert(result.key(), result);
                }
                Err(err) => {
                    warn!(
                        "route cache at {} is misshapen, starting empty: {err}",
                        path.display()
                    );
                    return Self::default();
                }
            }
        }

        info!("loaded {} cached routes from {}", entries.len(), path.display());
        Self { entries }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn lookup(&self, key: &str) -> Option<&RouteResult> {
        self.entries.get(key)
    }

    /// Inserts a resolved route, overwriting any previous entry for the
    /// same key. Merging the same result twice is a no-op.
    pub fn merge(&mut self, result: RouteResult) {
        self.entries.insert(result.key(), result);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn results(&self) -> impl Iterator<Item = &RouteResult> {
        self.entries.values()
    }

    /// Writes all entries sorted by the four coordinate columns. Saving
    /// an empty cache is a no-op.
    pub fn save(&self, path: &Path) -> Result<(), CacheError> {
        if self.entries.is_empty() {
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| CacheError::CreateDir {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let mut rows: Vec<CacheRow> = self.entries.values().map(CacheRow::from_result).collect();
        rows.sort_by(|a, b| {
            a.start_lon
                .total_cmp(&b.start_lon)
                .then(a.start_lat.total_cmp(&b.start_lat))
                .then(a.end_lon.total_cmp(&b.end_lon))
                .then(a.end_lat.total_cmp(&b.end_lat))
        });

        let mut writer = csv::Writer::from_path(path)?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush().map_err(csv::Error::from)?;
        info!("saved route cache with {} entries to {}", self.entries.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_result(start_lon: f64, source: RouteSource) -> RouteResult {
        RouteResult {
            pair: CoordinatePair::new(start_lon, 51.5074, -0.099, 51.514),
            geometry: "AA".to_string(),
            distance_m: 1234.567891,
            duration_s: 345.25,
            source,
        }
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RouteCache::load(&dir.path().join("absent.csv"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_garbage_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.csv");
        fs::write(&path, "not,a,cache\n1,2,3\n").unwrap();
        let cache = RouteCache::load(&path);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_save_empty_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.csv");
        RouteCache::new().save(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_round_trip_reconstructs_identical_results() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.csv");

        let mut cache = RouteCache::new();
        let osrm = sample_result(-0.1276, RouteSource::Osrm);
        let fallback = RouteResult::fallback(
            CoordinatePair::new(-0.141, 51.501, -0.076, 51.521),
            RouteSource::FallbackStraightLine,
        );
        cache.merge(osrm.clone());
        cache.merge(fallback.clone());
        cache.save(&path).unwrap();

        let reloaded = RouteCache::load(&path);
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.lookup(&osrm.key()), Some(&osrm));
        assert_eq!(reloaded.lookup(&fallback.key()), Some(&fallback));
    }

    #[test]
    fn test_save_orders_rows_by_coordinates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.csv");

        let mut cache = RouteCache::new();
        cache.merge(sample_result(0.012, RouteSource::Osrm));
        cache.merge(sample_result(-0.2, RouteSource::Osrm));
        cache.merge(sample_result(-0.05, RouteSource::Osrm));
        cache.save(&path).unwrap();

        let body = fs::read_to_string(&path).unwrap();
        let starts: Vec<&str> = body
            .lines()
            .skip(1)
            .map(|line| line.split(',').next().unwrap())
            .collect();
        assert_eq!(starts, vec!["-0.2", "-0.05", "0.012"]);
    }

    #[test]
    fn test_merge_overwrites_same_key() {
        let mut cache = RouteCache::new();
        let first = sample_result(-0.1276, RouteSource::FallbackStraightLine);
        let second = sample_result(-0.1276, RouteSource::Osrm);
        cache.merge(first);
        cache.merge(second.clone());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.lookup(&second.key()), Some(&second));
    }
}
