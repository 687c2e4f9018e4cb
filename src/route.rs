//! Core route data model: canonical coordinate pairs and resolved routes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::polyline::Polyline;

/// Rounds a coordinate to the canonical 6-decimal precision.
///
/// Negative zero is normalized so that keys derived from the rounded
/// value are stable.
fn round6(value: f64) -> f64 {
    let rounded = (value * 1e6).round() / 1e6;
    if rounded == 0.0 { 0.0 } else { rounded }
}

/// A start/end coordinate pair, rounded to 6 decimal places on
/// construction. Equality is defined on the rounded values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinatePair {
    start_lon: f64,
    start_lat: f64,
    end_lon: f64,
    end_lat: f64,
}

impl CoordinatePair {
    pub fn new(start_lon: f64, start_lat: f64, end_lon: f64, end_lat: f64) -> Self {
        Self {
            start_lon: round6(start_lon),
            start_lat: round6(start_lat),
            end_lon: round6(end_lon),
            end_lat: round6(end_lat),
        }
    }

    pub fn start_lon(&self) -> f64 {
        self.start_lon
    }

    pub fn start_lat(&self) -> f64 {
        self.start_lat
    }

    pub fn end_lon(&self) -> f64 {
        self.end_lon
    }

    pub fn end_lat(&self) -> f64 {
        self.end_lat
    }

    /// True when start and end coincide after rounding.
    pub fn is_stationary(&self) -> bool {
        self.start_lon == self.end_lon && self.start_lat == self.end_lat
    }

    /// Canonical cache key: the four rounded coordinates at fixed
    /// 6-decimal precision, `|`-separated.
    pub fn key(&self) -> String {
        format!(
            "{:.6}|{:.6}|{:.6}|{:.6}",
            self.start_lon, self.start_lat, self.end_lon, self.end_lat
        )
    }
}

/// How a route result was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteSource {
    Osrm,
    Stationary,
    FallbackStraightLine,
    FallbackMaxNewRoutes,
    FallbackMissing,
}

impl RouteSource {
    pub fn is_fallback(&self) -> bool {
        matches!(
            self,
            RouteSource::FallbackStraightLine
                | RouteSource::FallbackMaxNewRoutes
                | RouteSource::FallbackMissing
        )
    }
}

impl fmt::Display for RouteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RouteSource::Osrm => "osrm",
            RouteSource::Stationary => "stationary",
            RouteSource::FallbackStraightLine => "fallback_straight_line",
            RouteSource::FallbackMaxNewRoutes => "fallback_max_new_routes",
            RouteSource::FallbackMissing => "fallback_missing",
        };
        f.write_str(name)
    }
}

/// An immutable resolved route for one coordinate pair.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteResult {
    pub pair: CoordinatePair,
    /// Polyline6-encoded route geometry.
    pub geometry: String,
    pub distance_m: f64,
    pub duration_s: f64,
    pub source: RouteSource,
}

impl RouteResult {
    /// A route taken from a routing-service response.
    pub fn from_osrm(pair: CoordinatePair, geometry: String, distance_m: f64, duration_s: f64) -> Self {
        Self {
            pair,
            geometry,
            distance_m,
            duration_s,
            source: RouteSource::Osrm,
        }
    }

    /// A degenerate route for a pair whose start and end coincide.
    pub fn stationary(pair: CoordinatePair) -> Self {
        Self {
            pair,
            geometry: Polyline::straight_line(&pair).encode6(),
            distance_m: 0.0,
            duration_s: 0.0,
            source: RouteSource::Stationary,
        }
    }

    /// A synthesized straight-line route with zero distance and duration.
    pub fn fallback(pair: CoordinatePair, source: RouteSource) -> Self {
        debug_assert!(source.is_fallback());
        Self {
            pair,
            geometry: Polyline::straight_line(&pair).encode6(),
            distance_m: 0.0,
            duration_s: 0.0,
            source,
        }
    }

    pub fn key(&self) -> String {
        self.pair.key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rounding_defines_equality() {
        let a = CoordinatePair::new(-0.12760049, 51.50740051, -0.0990, 51.5140);
        let b = CoordinatePair::new(-0.1276, 51.5074, -0.09900000012, 51.51399999989);
        assert_eq!(a, b);
    }

    #[test]
    fn test_key_is_deterministic_for_equal_rounded_pairs() {
        let a = CoordinatePair::new(-0.1276004, 51.5074, -0.099, 51.514);
        let b = CoordinatePair::new(-0.1276, 51.5074004, -0.099, 51.514);
        assert_eq!(a.key(), b.key());
        assert_eq!(a.key(), "-0.127600|51.507400|-0.099000|51.514000");
    }

    #[test]
    fn test_negative_zero_normalizes() {
        let pair = CoordinatePair::new(-0.0000001, 0.0, 0.0, 0.0);
        assert_eq!(pair.key(), "0.000000|0.000000|0.000000|0.000000");
        assert!(pair.is_stationary());
    }

    #[test]
    fn test_stationary_after_rounding() {
        let pair = CoordinatePair::new(-0.1, 51.5000001, -0.1, 51.4999999);
        assert!(pair.is_stationary());
        let moving = CoordinatePair::new(-0.1, 51.5, -0.1, 51.51);
        assert!(!moving.is_stationary());
    }

    #[test]
    fn test_stationary_result_has_zero_cost() {
        let pair = CoordinatePair::new(-0.1, 51.5, -0.1, 51.5);
        let result = RouteResult::stationary(pair);
        assert_eq!(result.distance_m, 0.0);
        assert_eq!(result.duration_s, 0.0);
        assert_eq!(result.source, RouteSource::Stationary);
    }

    #[test]
    fn test_fallback_sources() {
        assert!(RouteSource::FallbackStraightLine.is_fallback());
        assert!(RouteSource::FallbackMaxNewRoutes.is_fallback());
        assert!(RouteSource::FallbackMissing.is_fallback());
        assert!(!RouteSource::Osrm.is_fallback());
        assert!(!RouteSource::Stationary.is_fallback());
    }

    #[test]
    fn test_source_display_matches_wire_names() {
        assert_eq!(RouteSource::Osrm.to_string(), "osrm");
        assert_eq!(
            RouteSource::FallbackMaxNewRoutes.to_string(),
            "fallback_max_new_routes"
        );
    }
}
