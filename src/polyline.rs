//! Polyline6 representation for route geometries.
//!
//! This module provides a type for working with polylines as decoded
//! coordinate sequences. Encoding/decoding happens at the boundary
//! (when receiving from OSRM or writing cache rows), always at 1e-6
//! precision.

use thiserror::Error;

use crate::route::CoordinatePair;

const PRECISION: f64 = 1e6;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolylineError {
    #[error("polyline chunk truncated at byte {0}")]
    Truncated(usize),
    #[error("invalid polyline byte {byte:#04x} at offset {offset}")]
    InvalidByte { byte: u8, offset: usize },
}

/// A polyline representing a route geometry as decoded coordinates.
///
/// Each point is a (latitude, longitude) tuple.
#[derive(Debug, Clone, PartialEq)]
pub struct Polyline {
    points: Vec<(f64, f64)>,
}

impl Polyline {
    pub fn new(points: Vec<(f64, f64)>) -> Self {
        Self { points }
    }

    /// The straight-line geometry for a pair: a single point when the
    /// pair is stationary, start and end otherwise.
    pub fn straight_line(pair: &CoordinatePair) -> Self {
        let mut points = vec![(pair.start_lat(), pair.start_lon())];
        if !pair.is_stationary() {
            points.push((pair.end_lat(), pair.end_lon()));
        }
        Self { points }
    }

    /// Returns a reference to the coordinate points.
    pub fn points(&self) -> &[(f64, f64)] {
        &self.points
    }

    /// Consumes the polyline and returns the owned coordinate points.
    pub fn into_points(self) -> Vec<(f64, f64)> {
        self.points
    }

    /// Encodes the points as a polyline6 string.
    pub fn encode6(&self) -> String {
        let mut out = String::new();
        let (mut prev_lat, mut prev_lon) = (0i64, 0i64);
        for &(lat, lon) in &self.points {
            let lat_e6 = (lat * PRECISION).round() as i64;
            let lon_e6 = (lon * PRECISION).round() as i64;
            encode_delta(lat_e6 - prev_lat, &mut out);
            encode_delta(lon_e6 - prev_lon, &mut out);
            prev_lat = lat_e6;
            prev_lon = lon_e6;
        }
        out
    }

    /// Decodes a polyline6 string into coordinate points.
    pub fn decode6(encoded: &str) -> Result<Self, PolylineError> {
        let bytes = encoded.as_bytes();
        let mut offset = 0usize;
        let (mut lat, mut lon) = (0i64, 0i64);
        let mut points = Vec::new();
        while offset < bytes.len() {
            lat += decode_delta(bytes, &mut offset)?;
            lon += decode_delta(bytes, &mut offset)?;
            points.push((lat as f64 / PRECISION, lon as f64 / PRECISION));
        }
        Ok(Self { points })
    }
}

fn encode_delta(delta: i64, out: &mut String) {
    let mut value = delta << 1;
    if delta < 0 {
        value = !value;
    }
    loop {
        let mut chunk = (value & 0x1f) as u8;
        value >>= 5;
        if value != 0 {
            chunk |= 0x20;
        }
        out.push((chunk + 63) as char);
        if value == 0 {
            break;
        }
    }
}

fn decode_delta(bytes: &[u8], offset: &mut usize) -> Result<i64, PolylineError> {
    let mut accum = 0i64;
    let mut shift = 0u32;
    loop {
        let Some(&raw) = bytes.get(*offset) else {
            return Err(PolylineError::Truncated(*offset));
        };
        if raw < 63 {
            return Err(PolylineError::InvalidByte {
                byte: raw,
                offset: *offset,
            });
        }
        let chunk = raw - 63;
        *offset += 1;
        accum |= i64::from(chunk & 0x1f) << shift;
        shift += 5;
        if chunk & 0x20 == 0 {
            break;
        }
    }
    if accum & 1 == 1 {
        Ok(!(accum >> 1))
    } else {
        Ok(accum >> 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_single_unit_deltas() {
        // One 1e-6 step north and east encodes as two 'A' chunks.
        let line = Polyline::new(vec![(0.000001, 0.000001)]);
        assert_eq!(line.encode6(), "AA");
        let negative = Polyline::new(vec![(-0.000001, -0.000001)]);
        assert_eq!(negative.encode6(), "@@");
    }

    #[test]
    fn test_round_trip_preserves_rounded_points() {
        let points = vec![
            (51.507400, -0.127600),
            (51.501000, -0.141000),
            (51.514000, -0.099000),
        ];
        let encoded = Polyline::new(points.clone()).encode6();
        let decoded = Polyline::decode6(&encoded).unwrap();
        assert_eq!(decoded.points(), &points[..]);
    }

    #[test]
    fn test_straight_line_stationary_is_single_point() {
        let pair = CoordinatePair::new(-0.1276, 51.5074, -0.1276, 51.5074);
        let line = Polyline::straight_line(&pair);
        assert_eq!(line.points(), &[(51.5074, -0.1276)]);
    }

    #[test]
    fn test_straight_line_moving_has_both_endpoints() {
        let pair = CoordinatePair::new(-0.1276, 51.5074, -0.099, 51.514);
        let line = Polyline::straight_line(&pair);
        assert_eq!(line.points(), &[(51.5074, -0.1276), (51.514, -0.099)]);
    }

    #[test]
    fn test_decode_truncated_input() {
        assert_eq!(Polyline::decode6("A"), Err(PolylineError::Truncated(1)));
    }

    #[test]
    fn test_decode_rejects_out_of_range_bytes() {
        assert_eq!(
            Polyline::decode6(" A"),
            Err(PolylineError::InvalidByte { byte: b' ', offset: 0 })
        );
    }

    #[test]
    fn test_empty_polyline() {
        let line = Polyline::new(vec![]);
        assert_eq!(line.encode6(), "");
        assert!(Polyline::decode6("").unwrap().points().is_empty());
    }
}
