//! Seams between the routing core and its collaborators.
//!
//! These are intentionally minimal. Concrete pipelines implement them
//! for their own ingestion and export formats; the core only sequences
//! and enriches.

use std::error::Error;

use crate::month::Month;
use crate::resolver::RoutingError;
use crate::route::{CoordinatePair, RouteResult};

/// Resolves a single coordinate pair to a route.
pub trait Resolve {
    fn resolve(&self, pair: &CoordinatePair) -> Result<RouteResult, RoutingError>;
}

/// One period's worth of the surrounding data pipeline.
///
/// The orchestrator sequences periods and persists progress; an
/// implementation owns ingestion, route hydration and export for a
/// single period.
pub trait PeriodPipeline {
    /// Whether enriched output for this period already exists.
    fn has_output(&self, month: Month) -> bool;

    /// Whether source data for this period is discoverable upstream.
    fn has_source_data(&self, month: Month) -> bool;

    /// Run ingestion, route hydration and export for one period.
    fn process(&mut self, month: Month) -> Result<(), Box<dyn Error + Send + Sync>>;

    /// Benchmark and apply concurrency settings before the first period.
    fn calibrate(&mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        Ok(())
    }
}
