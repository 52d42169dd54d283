//! Load testing harness for the books REST API.
//!
//! This crate provides tools to:
//! - Load book fixtures once and sample them uniformly per iteration
//! - Drive create/list/get/delete flows against a configurable base URL
//! - Shape load with iteration, VU and arrival-rate workload profiles
//! - Collect per-step latency and error metrics and evaluate thresholds
//! - Output results as an HTML report and on the console (table, JSON, CSV)

pub mod config;
pub mod driver;
pub mod error;
pub mod fixtures;
pub mod flows;
pub mod metrics;
pub mod payload;
pub mod report;
pub mod runner;
pub mod scenario;
pub mod thresholds;

pub use config::RunConfig;
pub use driver::RunDriver;
pub use error::{HarnessError, HarnessResult};
pub use fixtures::{BookFixture, FixtureStore, Pages};
pub use flows::{BooksClient, Flow, FlowOutcome, Step, StepResult};
pub use metrics::{MetricsRegistry, RunLabels, TestResults};
pub use payload::BookPayload;
pub use report::ResultsReport;
pub use runner::{LoadRunner, RunCompletion};
pub use scenario::{ScenarioLibrary, ScenarioTable, Stage, WorkloadProfile, WorkloadShape};
pub use thresholds::{ThresholdOutcome, ThresholdSet};
