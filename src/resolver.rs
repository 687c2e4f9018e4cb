//! OSRM HTTP adapter for single-pair route lookups.

use std::thread;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::route::{CoordinatePair, RouteResult};
use crate::traits::Resolve;

#[derive(Debug, Clone)]
pub struct OsrmConfig {
    pub base_url: String,
    pub profile: String,
    pub timeout: Duration,
    /// Retries for transient transport failures before giving up.
    pub max_retries: u32,
    /// Base delay for exponential retry backoff.
    pub retry_backoff: Duration,
}

impl Default for OsrmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://router.project-osrm.org".to_string(),
            profile: "bicycle".to_string(),
            timeout: Duration::from_secs(20),
            max_retries: 4,
            retry_backoff: Duration::from_millis(400),
        }
    }
}

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("routing service returned HTTP {0}")]
    Status(StatusCode),
    #[error("routing service returned no usable route: {0}")]
    NoRoute(String),
}

impl RoutingError {
    /// Connection problems, timeouts, throttling and server errors are
    /// worth retrying; everything else is definitive.
    fn is_transient(&self) -> bool {
        match self {
            RoutingError::Transport(err) => err.is_timeout() || err.is_connect(),
            RoutingError::Status(status) => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            RoutingError::NoRoute(_) => false,
        }
    }
}

/// Resolves coordinate pairs against an OSRM-style routing service.
///
/// Each resolver owns its reusable transport session; hydration workers
/// hold one resolver each rather than sharing a client.
#[derive(Debug)]
pub struct RouteResolver {
    config: OsrmConfig,
    client: reqwest::blocking::Client,
}

impl RouteResolver {
    pub fn new(config: OsrmConfig) -> Result<Self, RoutingError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("route-backfill/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { config, client })
    }

    fn route_url(&self, pair: &CoordinatePair) -> String {
        format!(
            "{}/route/v1/{}/{:.6},{:.6};{:.6},{:.6}",
            self.config.base_url.trim_end_matches('/'),
            self.config.profile,
            pair.start_lon(),
            pair.start_lat(),
            pair.end_lon(),
            pair.end_lat()
        )
    }

    fn fetch_route(&self, url: &str, pair: &CoordinatePair) -> Result<RouteResult, RoutingError> {
        let response = self
            .client
            .get(url)
            .query(&[
                ("overview", "full"),
                ("geometries", "polyline6"),
                ("steps", "false"),
                ("alternatives", "false"),
            ])
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(RoutingError::Status(status));
        }

        let payload: OsrmRouteResponse = response.json()?;
        if payload.code != "Ok" || payload.routes.is_empty() {
            return Err(RoutingError::NoRoute(payload.code));
        }

        let best = payload
            .routes
            .into_iter()
            .next()
            .ok_or_else(|| RoutingError::NoRoute("Ok".to_string()))?;
        Ok(RouteResult::from_osrm(
            *pair,
            best.geometry,
            best.distance,
            best.duration,
        ))
    }
}

impl Resolve for RouteResolver {
    fn resolve(&self, pair: &CoordinatePair) -> Result<RouteResult, RoutingError> {
        if pair.is_stationary() {
            return Ok(RouteResult::stationary(*pair));
        }

        let url = self.route_url(pair);
        let mut attempt = 0u32;
        loop {
            match self.fetch_route(&url, pair) {
                Ok(result) => return Ok(result),
                Err(err) if err.is_transient() && attempt < self.config.max_retries => {
                    let delay = self.config.retry_backoff * (1u32 << attempt.min(16));
                    debug!(
                        "transient routing error for {} (attempt {}): {err}; retrying in {delay:?}",
                        pair.key(),
                        attempt + 1
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct OsrmRouteResponse {
    #[serde(default)]
    code: String,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    geometry: String,
    #[serde(default)]
    distance: f64,
    #[serde(default)]
    duration: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::RouteSource;

    #[test]
    fn test_stationary_pair_skips_the_network() {
        // A base URL that cannot resolve proves no request is issued.
        let config = OsrmConfig {
            base_url: "http://invalid.localdomain".to_string(),
            ..OsrmConfig::default()
        };
        let resolver = RouteResolver::new(config).unwrap();
        let pair = CoordinatePair::new(-0.1276, 51.5074, -0.1276, 51.5074);
        let result = resolver.resolve(&pair).unwrap();
        assert_eq!(result.source, RouteSource::Stationary);
        assert_eq!(result.distance_m, 0.0);
        assert_eq!(result.duration_s, 0.0);
    }

    #[test]
    fn test_route_url_uses_six_decimal_coordinates() {
        let config = OsrmConfig {
            base_url: "http://osrm.test/".to_string(),
            ..OsrmConfig::default()
        };
        let resolver = RouteResolver::new(config).unwrap();
        let pair = CoordinatePair::new(-0.1276, 51.5074, -0.099, 51.514);
        assert_eq!(
            resolver.route_url(&pair),
            "http://osrm.test/route/v1/bicycle/-0.127600,51.507400;-0.099000,51.514000"
        );
    }

    #[test]
    fn test_payload_parsing_defaults() {
        let payload: OsrmRouteResponse =
            serde_json::from_str(r#"{"code":"Ok","routes":[{"geometry":"AA"}]}"#).unwrap();
        assert_eq!(payload.routes[0].distance, 0.0);
        assert_eq!(payload.routes[0].duration, 0.0);

        let empty: OsrmRouteResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.code, "");
        assert!(empty.routes.is_empty());
    }

    #[test]
    fn test_no_route_errors_are_not_transient() {
        let err = RoutingError::NoRoute("NoRoute".to_string());
        assert!(!err.is_transient());
        assert!(RoutingError::Status(StatusCode::TOO_MANY_REQUESTS).is_transient());
        assert!(RoutingError::Status(StatusCode::BAD_GATEWAY).is_transient());
        assert!(!RoutingError::Status(StatusCode::BAD_REQUEST).is_transient());
    }
}
