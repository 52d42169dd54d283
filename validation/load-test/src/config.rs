//! Configuration loading and management.
//!
//! A `RunConfig` is built once at startup, from a YAML file and/or the
//! command line, and handed to the driver by reference. Nothing re-reads the
//! environment while iterations are running.

use crate::error::{HarnessError, HarnessResult};
use crate::flows::Flow;
use crate::metrics::RunLabels;
use crate::scenario::{ScenarioLibrary, ScenarioTable, WorkloadProfile, WorkloadShape};
use crate::thresholds::ThresholdSet;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Fixture file shipped with the crate.
pub const DEFAULT_FIXTURE_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/data/books.json");

/// Directory of custom scenario tables shipped with the crate.
pub const DEFAULT_SCENARIO_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/scenarios");

/// Main run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub base_url: String,
    /// Flow selector; unknown or absent means every iteration is a no-op.
    pub flow: Option<String>,
    /// Workload index into the scenario table.
    pub workload: Option<usize>,
    pub scenario_table: ScenarioTable,
    /// Custom YAML table used instead of the built-in one.
    pub scenario_file: Option<PathBuf>,
    pub no_pacing: bool,
    pub pacing_ms: u64,
    pub test_name: Option<String>,
    pub project_id: u64,
    pub fixture_path: PathBuf,
    pub report_path: PathBuf,
    pub request_timeout_secs: u64,
    pub max_duration_secs: Option<u64>,
    /// Extra thresholds as `metric:expression`.
    pub thresholds: Vec<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            flow: None,
            workload: None,
            scenario_table: ScenarioTable::default(),
            scenario_file: None,
            no_pacing: false,
            pacing_ms: 500,
            test_name: None,
            project_id: 0,
            fixture_path: PathBuf::from(DEFAULT_FIXTURE_PATH),
            report_path: PathBuf::from("general.html"),
            request_timeout_secs: 30,
            max_duration_secs: None,
            thresholds: Vec::new(),
        }
    }
}

impl RunConfig {
    /// Load configuration from YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> HarnessResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            HarnessError::InvalidConfig(format!("{}: {}", path.display(), e))
        })?;
        let config: RunConfig = serde_yaml::from_str(&content)
            .map_err(|e| HarnessError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> HarnessResult<()> {
        self.parsed_base_url()?;
        if self.request_timeout_secs == 0 {
            return Err(HarnessError::InvalidConfig(
                "request_timeout_secs must be > 0".to_string(),
            ));
        }
        if self.max_duration_secs == Some(0) {
            return Err(HarnessError::InvalidConfig(
                "max_duration_secs must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Base URL without trailing slashes.
    pub fn base_url(&self) -> &str {
        self.base_url.trim().trim_end_matches('/')
    }

    /// Parse and check the base URL.
    pub fn parsed_base_url(&self) -> HarnessResult<reqwest::Url> {
        let invalid = |message: String| HarnessError::InvalidBaseUrl {
            url: self.base_url.clone(),
            message,
        };
        let url = reqwest::Url::parse(self.base_url()).map_err(|e| invalid(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
        }
        if url.host_str().is_none() {
            return Err(invalid("missing host".to_string()));
        }
        Ok(url)
    }

    /// The selected flow, if the selector names one.
    pub fn selected_flow(&self) -> Option<Flow> {
        let name = self.flow.as_deref()?;
        let flow = Flow::from_name(name);
        if flow.is_none() {
            warn!(flow = name, "Unknown flow selector; iterations will be no-ops");
        }
        flow
    }

    /// Per-request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Overall run cap, if any.
    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration_secs.map(Duration::from_secs)
    }

    /// Wait after each flow, or `None` when the runner governs timing.
    pub fn pacing_for(&self, shape: &WorkloadShape) -> Option<Duration> {
        if self.no_pacing || shape.is_open_loop() || self.pacing_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.pacing_ms))
        }
    }

    /// The scenario table in effect.
    pub fn scenario_library(&self) -> HarnessResult<ScenarioLibrary> {
        match &self.scenario_file {
            Some(path) => ScenarioLibrary::from_file(path),
            None => Ok(ScenarioLibrary::builtin(self.scenario_table)),
        }
    }

    /// Profile defaults plus any thresholds given in the configuration.
    pub fn thresholds_for(&self, profile: &WorkloadProfile) -> HarnessResult<ThresholdSet> {
        let mut set = ThresholdSet::from_expressions(&profile.thresholds)?;
        for spec in &self.thresholds {
            set.add_spec(spec)?;
        }
        Ok(set)
    }

    /// Labels carried into results and reports.
    pub fn labels(&self, profile: &WorkloadProfile) -> RunLabels {
        let flow = self
            .selected_flow()
            .map(|f| f.name().to_string())
            .unwrap_or_else(|| "none".to_string());
        let test_name = self
            .test_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("{}-{}", flow, profile.name));

        RunLabels {
            test_name,
            project_id: self.project_id,
            scenario_name: profile.name.clone(),
            executor: profile.shape.executor().to_string(),
            flow,
            base_url: self.base_url().to_string(),
        }
    }
}

/// Interpret a boolean flag given as text; only `true` (any case) is set.
pub fn parse_flag(raw: Option<&str>) -> bool {
    raw.map(|s| s.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}
