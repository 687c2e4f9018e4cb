//! Trip records and route attachment.
//!
//! The surrounding pipeline hands the core its trip rows; the core
//! hands back rows enriched with route columns. Attachment is total:
//! a key somehow absent from the cache gets a zero-cost fallback
//! rather than a hole.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;

use crate::cache::RouteCache;
use crate::route::{CoordinatePair, RouteResult, RouteSource};

/// One normalized trip row, as produced by the ingestion collaborator.
#[derive(Debug, Clone)]
pub struct Trip {
    pub trip_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub endpoints: CoordinatePair,
}

/// A trip with its resolved route columns, ready for export.
#[derive(Debug, Clone, Serialize)]
pub struct EnrichedTrip {
    pub trip_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub route_geometry: String,
    pub route_source: RouteSource,
    pub route_distance_m: f64,
    pub route_duration_s: f64,
}

/// The unique coordinate pairs of a trip batch, first-seen order
/// preserved. This is the hydrator's input contract.
pub fn unique_pairs(trips: &[Trip]) -> Vec<CoordinatePair> {
    let mut seen = HashSet::new();
    let mut unique = Vec::new();
    for trip in trips {
        if seen.insert(trip.endpoints.key()) {
            unique.push(trip.endpoints);
        }
    }
    unique
}

/// Joins resolved routes onto trip rows by canonical key.
pub fn attach_routes(trips: &[Trip], cache: &RouteCache) -> Vec<EnrichedTrip> {
    trips
        .par_iter()
        .map(|trip| {
            let key = trip.endpoints.key();
            let route = match cache.lookup(&key) {
                Some(result) => result.clone(),
                None => RouteResult::fallback(trip.endpoints, RouteSource::FallbackMissing),
            };
            EnrichedTrip {
                trip_id: trip.trip_id.clone(),
                start_time: trip.start_time,
                end_time: trip.end_time,
                route_geometry: route.geometry,
                route_source: route.source,
                route_distance_m: route.distance_m,
                route_duration_s: route.duration_s,
            }
        })
        .collect()
}
