//! Per-iteration entry point invoked by the runner.

use crate::config::RunConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::fixtures::FixtureStore;
use crate::flows::{BooksClient, Flow, FlowOutcome};
use crate::metrics::MetricsRegistry;
use crate::payload::BookPayload;
use crate::scenario::WorkloadShape;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::yield_now;
use tokio::time::sleep;
use tracing::{info, instrument};

/// Executes one flow per iteration and absorbs its failures into metrics.
pub struct RunDriver {
    flow: Option<Flow>,
    pacing: Option<Duration>,
    client: BooksClient,
    fixtures: Arc<FixtureStore>,
    metrics: Arc<MetricsRegistry>,
}

impl RunDriver {
    /// Build a driver, failing on any configuration error.
    ///
    /// Loads the fixtures and builds every payload once, so an empty set or
    /// an invalid page count stops the run before the first iteration.
    pub fn new(
        config: &RunConfig,
        shape: &WorkloadShape,
        fixtures: Arc<FixtureStore>,
        metrics: Arc<MetricsRegistry>,
    ) -> HarnessResult<Self> {
        config.validate()?;

        let books = fixtures.load()?;
        if books.is_empty() {
            return Err(HarnessError::EmptyFixtureSet);
        }
        for book in books {
            BookPayload::build(book)?;
        }

        let flow = config.selected_flow();
        if let Some(flow) = flow {
            flow.register_metrics(&metrics);
        }

        let client = BooksClient::new(
            config.base_url(),
            config.request_timeout(),
            shape.max_vus().max(1) as usize,
        )?;
        let pacing = config.pacing_for(shape);

        info!(
            url = client.collection_url(),
            flow = flow.map(|f| f.name()).unwrap_or("none"),
            fixtures = books.len(),
            pacing_ms = pacing.map(|p| p.as_millis() as u64).unwrap_or(0),
            "Run driver ready"
        );

        Ok(Self {
            flow,
            pacing,
            client,
            fixtures,
            metrics,
        })
    }

    pub fn flow(&self) -> Option<Flow> {
        self.flow
    }

    pub fn pacing(&self) -> Option<Duration> {
        self.pacing
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Run one iteration.
    ///
    /// Returns `None` when no flow is selected; the iteration still counts.
    #[instrument(skip(self), fields(flow = self.flow.map(|f| f.name())))]
    pub async fn iterate(&self) -> Option<FlowOutcome> {
        let outcome = match self.flow {
            Some(flow) => Some(flow.run(&self.client, &self.fixtures, &self.metrics).await),
            None => {
                // A no-op iteration never awaits I/O; yield so a VU loop
                // cannot monopolize the worker thread.
                yield_now().await;
                None
            }
        };
        self.metrics.record_iteration();

        if outcome.is_some() {
            if let Some(pause) = self.pacing {
                sleep(pause).await;
            }
        }
        outcome
    }
}
