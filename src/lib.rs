//! route-backfill core
//!
//! Resolves coordinate pairs to route geometries through an OSRM-style
//! service under a global rate budget, persists results across runs,
//! and drives a resumable multi-month backfill with optional
//! auto-calibration of its concurrency settings.

pub mod backfill;
pub mod cache;
pub mod hydrate;
pub mod month;
pub mod polyline;
pub mod rate_limit;
pub mod resolver;
pub mod route;
pub mod traits;
pub mod trips;
pub mod tune;
