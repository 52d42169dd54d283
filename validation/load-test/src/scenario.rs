//! Workload shapes and the tables they are selected from.
//!
//! Shapes are plain data. The runner interprets them; the driver only asks
//! whether a shape is open-loop to decide on pacing.

use crate::error::{HarnessError, HarnessResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// One ramp step: move linearly to `target` over `duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    #[serde(with = "duration_str")]
    pub duration: Duration,
    pub target: u32,
}

impl Stage {
    pub fn new(duration: Duration, target: u32) -> Self {
        Self { duration, target }
    }
}

/// How load is shaped over time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ShapeDef", into = "ShapeDef")]
pub enum WorkloadShape {
    /// A fixed number of iterations, shared across VUs or run by each VU.
    FixedIterations { vus: u32, iterations: u64, per_vu: bool },
    /// A constant number of VUs looping for a fixed duration.
    ConstantVus { vus: u32, duration: Duration },
    /// VU count interpolated between stage targets.
    RampingVus { start_vus: u32, stages: Vec<Stage> },
    /// `rate` iterations started per `time_unit`, regardless of latency.
    ConstantArrivalRate {
        rate: u32,
        time_unit: Duration,
        duration: Duration,
        pre_allocated_vus: u32,
    },
    /// Arrival rate interpolated between stage targets.
    RampingArrivalRate {
        start_rate: u32,
        time_unit: Duration,
        stages: Vec<Stage>,
        pre_allocated_vus: u32,
    },
}

/// On-disk form of a shape, keyed by executor name.
///
/// Iteration-bound shapes are written as `shared-iterations` or
/// `per-vu-iterations`; `fixed-iterations` with a `per_vu` flag is also read.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "executor", rename_all = "kebab-case")]
enum ShapeDef {
    SharedIterations {
        vus: u32,
        iterations: u64,
    },
    PerVuIterations {
        vus: u32,
        iterations: u64,
    },
    FixedIterations {
        vus: u32,
        iterations: u64,
        #[serde(default)]
        per_vu: bool,
    },
    ConstantVus {
        vus: u32,
        #[serde(with = "duration_str")]
        duration: Duration,
    },
    RampingVus {
        #[serde(default)]
        start_vus: u32,
        stages: Vec<Stage>,
    },
    ConstantArrivalRate {
        rate: u32,
        #[serde(with = "duration_str", default = "one_second")]
        time_unit: Duration,
        #[serde(with = "duration_str")]
        duration: Duration,
        pre_allocated_vus: u32,
    },
    RampingArrivalRate {
        #[serde(default)]
        start_rate: u32,
        #[serde(with = "duration_str", default = "one_second")]
        time_unit: Duration,
        stages: Vec<Stage>,
        pre_allocated_vus: u32,
    },
}

impl From<ShapeDef> for WorkloadShape {
    fn from(def: ShapeDef) -> Self {
        match def {
            ShapeDef::SharedIterations { vus, iterations } => WorkloadShape::FixedIterations {
                vus,
                iterations,
                per_vu: false,
            },
            ShapeDef::PerVuIterations { vus, iterations } => WorkloadShape::FixedIterations {
                vus,
                iterations,
                per_vu: true,
            },
            ShapeDef::FixedIterations {
                vus,
                iterations,
                per_vu,
            } => WorkloadShape::FixedIterations {
                vus,
                iterations,
                per_vu,
            },
            ShapeDef::ConstantVus { vus, duration } => WorkloadShape::ConstantVus { vus, duration },
            ShapeDef::RampingVus { start_vus, stages } => {
                WorkloadShape::RampingVus { start_vus, stages }
            }
            ShapeDef::ConstantArrivalRate {
                rate,
                time_unit,
                duration,
                pre_allocated_vus,
            } => WorkloadShape::ConstantArrivalRate {
                rate,
                time_unit,
                duration,
                pre_allocated_vus,
            },
            ShapeDef::RampingArrivalRate {
                start_rate,
                time_unit,
                stages,
                pre_allocated_vus,
            } => WorkloadShape::RampingArrivalRate {
                start_rate,
                time_unit,
                stages,
                pre_allocated_vus,
            },
        }
    }
}

impl From<WorkloadShape> for ShapeDef {
    fn from(shape: WorkloadShape) -> Self {
        match shape {
            WorkloadShape::FixedIterations {
                vus,
                iterations,
                per_vu: false,
            } => ShapeDef::SharedIterations { vus, iterations },
            WorkloadShape::FixedIterations {
                vus,
                iterations,
                per_vu: true,
            } => ShapeDef::PerVuIterations { vus, iterations },
            WorkloadShape::ConstantVus { vus, duration } => ShapeDef::ConstantVus { vus, duration },
            WorkloadShape::RampingVus { start_vus, stages } => {
                ShapeDef::RampingVus { start_vus, stages }
            }
            WorkloadShape::ConstantArrivalRate {
                rate,
                time_unit,
                duration,
                pre_allocated_vus,
            } => ShapeDef::ConstantArrivalRate {
                rate,
                time_unit,
                duration,
                pre_allocated_vus,
            },
            WorkloadShape::RampingArrivalRate {
                start_rate,
                time_unit,
                stages,
                pre_allocated_vus,
            } => ShapeDef::RampingArrivalRate {
                start_rate,
                time_unit,
                stages,
                pre_allocated_vus,
            },
        }
    }
}

fn one_second() -> Duration {
    Duration::from_secs(1)
}

impl WorkloadShape {
    /// Executor name as used in scenario files.
    pub fn executor(&self) -> &'static str {
        match self {
            WorkloadShape::FixedIterations { per_vu: false, .. } => "shared-iterations",
            WorkloadShape::FixedIterations { per_vu: true, .. } => "per-vu-iterations",
            WorkloadShape::ConstantVus { .. } => "constant-vus",
            WorkloadShape::RampingVus { .. } => "ramping-vus",
            WorkloadShape::ConstantArrivalRate { .. } => "constant-arrival-rate",
            WorkloadShape::RampingArrivalRate { .. } => "ramping-arrival-rate",
        }
    }

    /// Whether iterations start on a schedule rather than on completion.
    pub fn is_open_loop(&self) -> bool {
        matches!(
            self,
            WorkloadShape::ConstantArrivalRate { .. } | WorkloadShape::RampingArrivalRate { .. }
        )
    }

    /// Largest number of concurrently running iterations this shape allows.
    pub fn max_vus(&self) -> u32 {
        match self {
            WorkloadShape::FixedIterations { vus, .. } | WorkloadShape::ConstantVus { vus, .. } => {
                *vus
            }
            WorkloadShape::RampingVus { start_vus, stages } => stages
                .iter()
                .map(|s| s.target)
                .fold(*start_vus, u32::max),
            WorkloadShape::ConstantArrivalRate {
                pre_allocated_vus, ..
            }
            | WorkloadShape::RampingArrivalRate {
                pre_allocated_vus, ..
            } => *pre_allocated_vus,
        }
    }

    /// Scheduled duration, or `None` for iteration-bound shapes.
    pub fn planned_duration(&self) -> Option<Duration> {
        match self {
            WorkloadShape::FixedIterations { .. } => None,
            WorkloadShape::ConstantVus { duration, .. }
            | WorkloadShape::ConstantArrivalRate { duration, .. } => Some(*duration),
            WorkloadShape::RampingVus { stages, .. }
            | WorkloadShape::RampingArrivalRate { stages, .. } => {
                Some(stages.iter().map(|s| s.duration).sum())
            }
        }
    }

    /// Check shape parameters.
    pub fn validate(&self) -> HarnessResult<()> {
        let fail = |msg: &str| -> HarnessResult<()> {
            Err(HarnessError::InvalidConfig(format!(
                "{}: {}",
                self.executor(),
                msg
            )))
        };
        match self {
            WorkloadShape::FixedIterations { vus, iterations, .. } => {
                if *vus == 0 || *iterations == 0 {
                    return fail("vus and iterations must be > 0");
                }
            }
            WorkloadShape::ConstantVus { vus, duration } => {
                if *vus == 0 || duration.is_zero() {
                    return fail("vus and duration must be > 0");
                }
            }
            WorkloadShape::RampingVus { stages, .. } => {
                if stages.is_empty() {
                    return fail("at least one stage must be specified");
                }
            }
            WorkloadShape::ConstantArrivalRate {
                rate,
                time_unit,
                duration,
                pre_allocated_vus,
            } => {
                if *rate == 0 || time_unit.is_zero() || duration.is_zero() || *pre_allocated_vus == 0 {
                    return fail("rate, time_unit, duration and pre_allocated_vus must be > 0");
                }
            }
            WorkloadShape::RampingArrivalRate {
                time_unit,
                stages,
                pre_allocated_vus,
                ..
            } => {
                if stages.is_empty() || time_unit.is_zero() || *pre_allocated_vus == 0 {
                    return fail("stages, time_unit and pre_allocated_vus must be non-empty / > 0");
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for WorkloadShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkloadShape::FixedIterations { vus, iterations, per_vu } => {
                let scope = if *per_vu { " per VU" } else { "" };
                write!(f, "{} iterations{} across {} VUs", iterations, scope, vus)
            }
            WorkloadShape::ConstantVus { vus, duration } => {
                write!(f, "{} VUs for {}", vus, format_duration(*duration))
            }
            WorkloadShape::RampingVus { start_vus, stages } => {
                write!(f, "ramping VUs from {}: {}", start_vus, format_stages(stages))
            }
            WorkloadShape::ConstantArrivalRate {
                rate,
                time_unit,
                duration,
                pre_allocated_vus,
            } => write!(
                f,
                "{} it/{} for {} ({} VUs)",
                rate,
                format_duration(*time_unit),
                format_duration(*duration),
                pre_allocated_vus
            ),
            WorkloadShape::RampingArrivalRate {
                start_rate,
                time_unit,
                stages,
                pre_allocated_vus,
            } => write!(
                f,
                "ramping rate from {} it/{}: {} ({} VUs)",
                start_rate,
                format_duration(*time_unit),
                format_stages(stages),
                pre_allocated_vus
            ),
        }
    }
}

fn format_stages(stages: &[Stage]) -> String {
    stages
        .iter()
        .map(|s| format!("{}→{}", format_duration(s.duration), s.target))
        .collect::<Vec<_>>()
        .join(", ")
}

/// A named workload shape with the thresholds that apply to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadProfile {
    pub name: String,
    pub shape: WorkloadShape,
    /// Metric name to threshold expressions, e.g. `http_req_failed: ["rate<0.01"]`.
    #[serde(default)]
    pub thresholds: BTreeMap<String, Vec<String>>,
}

impl WorkloadProfile {
    pub fn new(name: impl Into<String>, shape: WorkloadShape) -> Self {
        Self {
            name: name.into(),
            shape,
            thresholds: BTreeMap::new(),
        }
    }

    pub fn with_threshold(mut self, metric: &str, expressions: &[&str]) -> Self {
        self.thresholds.insert(
            metric.to_string(),
            expressions.iter().map(|e| e.to_string()).collect(),
        );
        self
    }
}

/// Built-in scenario tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioTable {
    /// baseline, rate5, rate10, rate25, stressRate.
    #[default]
    Settings,
    /// smoke, average, constantRate.
    General,
}

impl FromStr for ScenarioTable {
    type Err = HarnessError;

    fn from_str(s: &str) -> HarnessResult<Self> {
        match s.to_lowercase().as_str() {
            "settings" => Ok(ScenarioTable::Settings),
            "general" => Ok(ScenarioTable::General),
            other => Err(HarnessError::InvalidConfig(format!(
                "unknown scenario table '{}' (expected settings or general)",
                other
            ))),
        }
    }
}

impl fmt::Display for ScenarioTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScenarioTable::Settings => write!(f, "settings"),
            ScenarioTable::General => write!(f, "general"),
        }
    }
}

/// An indexed table of workload profiles. Index 0 is the fallback.
///
/// A library always holds at least one profile: every constructor, including
/// deserialization, validates the table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "LibraryDef")]
pub struct ScenarioLibrary {
    pub name: String,
    pub description: String,
    profiles: Vec<WorkloadProfile>,
}

#[derive(Deserialize)]
struct LibraryDef {
    name: String,
    #[serde(default)]
    description: String,
    profiles: Vec<WorkloadProfile>,
}

impl TryFrom<LibraryDef> for ScenarioLibrary {
    type Error = HarnessError;

    fn try_from(def: LibraryDef) -> HarnessResult<Self> {
        ScenarioLibrary::new(def.name, def.description, def.profiles)
    }
}

impl ScenarioLibrary {
    /// Build a validated table.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        profiles: Vec<WorkloadProfile>,
    ) -> HarnessResult<Self> {
        let library = Self {
            name: name.into(),
            description: description.into(),
            profiles,
        };
        library.validate()?;
        Ok(library)
    }

    /// Profiles in index order.
    pub fn profiles(&self) -> &[WorkloadProfile] {
        &self.profiles
    }

    /// One of the built-in tables.
    pub fn builtin(table: ScenarioTable) -> Self {
        match table {
            ScenarioTable::Settings => Self::settings(),
            ScenarioTable::General => Self::general(),
        }
    }

    fn settings() -> Self {
        let rate = |name: &str, rate: u32, vus: u32| {
            WorkloadProfile::new(
                name,
                WorkloadShape::ConstantArrivalRate {
                    rate,
                    time_unit: Duration::from_secs(1),
                    duration: Duration::from_secs(5 * 60),
                    pre_allocated_vus: vus,
                },
            )
        };
        let stress = WorkloadProfile::new(
            "stressRate",
            WorkloadShape::RampingArrivalRate {
                start_rate: 0,
                time_unit: Duration::from_secs(1),
                stages: vec![
                    Stage::new(Duration::from_secs(60), 5),
                    Stage::new(Duration::from_secs(150), 5),
                    Stage::new(Duration::from_secs(30), 10),
                    Stage::new(Duration::from_secs(150), 10),
                    Stage::new(Duration::from_secs(30), 25),
                    Stage::new(Duration::from_secs(150), 25),
                    Stage::new(Duration::from_secs(30), 0),
                ],
                pre_allocated_vus: 30,
            },
        );

        let profiles = vec![
            WorkloadProfile::new(
                "baseline",
                WorkloadShape::FixedIterations {
                    vus: 3,
                    iterations: 10,
                    per_vu: true,
                },
            ),
            rate("rate5", 5, 15),
            rate("rate10", 10, 15),
            rate("rate25", 25, 30),
            stress,
        ]
        .into_iter()
        .map(|p| p.with_threshold("http_req_failed", &["rate<0.01"]))
        .collect();

        Self {
            name: ScenarioTable::Settings.to_string(),
            description: "Per-endpoint flows: baseline plus arrival-rate steps".to_string(),
            profiles,
        }
    }

    fn general() -> Self {
        let latency = |p: WorkloadProfile| {
            p.with_threshold("http_req_failed", &["rate<0.01"])
                .with_threshold("http_req_duration", &["p(95)<500", "p(99)<1500"])
        };

        Self {
            name: ScenarioTable::General.to_string(),
            description: "Combined create/list/flow script workloads".to_string(),
            profiles: vec![
                WorkloadProfile::new(
                    "smoke",
                    WorkloadShape::FixedIterations {
                        vus: 3,
                        iterations: 10,
                        per_vu: false,
                    },
                ),
                latency(WorkloadProfile::new(
                    "average",
                    WorkloadShape::RampingVus {
                        start_vus: 0,
                        stages: vec![
                            Stage::new(Duration::from_secs(5), 6),
                            Stage::new(Duration::from_secs(50), 6),
                            Stage::new(Duration::from_secs(5), 0),
                        ],
                    },
                )),
                latency(WorkloadProfile::new(
                    "constantRate",
                    WorkloadShape::ConstantArrivalRate {
                        rate: 10,
                        time_unit: Duration::from_secs(1),
                        duration: Duration::from_secs(30),
                        pre_allocated_vus: 20,
                    },
                )),
            ],
        }
    }

    /// Load a custom table from YAML.
    pub fn from_file(path: impl AsRef<Path>) -> HarnessResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| HarnessError::ScenarioFile(format!("{}: {}", path.display(), e)))?;
        let library: ScenarioLibrary = serde_yaml::from_str(&content)?;
        Ok(library)
    }

    /// Validate every profile. The table must not be empty.
    pub fn validate(&self) -> HarnessResult<()> {
        if self.profiles.is_empty() {
            return Err(HarnessError::ScenarioFile(format!(
                "scenario table '{}' has no profiles",
                self.name
            )));
        }
        for profile in &self.profiles {
            profile.shape.validate()?;
        }
        Ok(())
    }

    /// Parse a raw index value. Anything that is not a non-negative integer
    /// yields `None`.
    pub fn parse_index(raw: Option<&str>) -> Option<usize> {
        raw.and_then(|s| s.trim().parse::<usize>().ok())
    }

    /// Profile at `index`, falling back to the table's first profile.
    pub fn resolve(&self, index: Option<usize>) -> &WorkloadProfile {
        index
            .and_then(|i| self.profiles.get(i))
            .unwrap_or(&self.profiles[0])
    }

    /// Name of the profile at `index`, with the same fallback as `resolve`.
    pub fn name(&self, index: Option<usize>) -> &str {
        &self.resolve(index).name
    }
}

/// Format a duration the way scenario files write it (`2m30s`, `500ms`).
pub fn format_duration(d: Duration) -> String {
    let total_ms = d.as_millis();
    if total_ms == 0 {
        return "0s".to_string();
    }
    if total_ms % 1000 != 0 {
        return format!("{}ms", total_ms);
    }

    let mut secs = d.as_secs();
    let mut out = String::new();
    for (unit, size) in [("h", 3600), ("m", 60), ("s", 1)] {
        if secs >= size {
            out.push_str(&format!("{}{}", secs / size, unit));
            secs %= size;
        }
    }
    out
}

/// Parse `1h`, `2m30s`, `500ms` style durations.
pub fn parse_duration(s: &str) -> HarnessResult<Duration> {
    let err = || HarnessError::InvalidConfig(format!("invalid duration '{}'", s));
    let s = s.trim();
    if s.is_empty() {
        return Err(err());
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return Err(err());
        }
        let value: u64 = rest[..digits].parse().map_err(|_| err())?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        total += match unit {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value * 60),
            "h" => Duration::from_secs(value * 3600),
            _ => return Err(err()),
        };
    }
    Ok(total)
}

mod duration_str {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_duration(&raw).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_fallback() {
        for table in [ScenarioTable::Settings, ScenarioTable::General] {
            let library = ScenarioLibrary::builtin(table);
            let default = &library.profiles[0];

            assert_eq!(library.resolve(None), default);
            assert_eq!(library.resolve(Some(99)), default);
            assert_eq!(library.resolve(Some(library.profiles.len())), default);
            assert_eq!(library.name(Some(1_000)), default.name);
            assert_eq!(
                library.resolve(ScenarioLibrary::parse_index(Some("abc"))),
                default
            );
            assert_eq!(
                library.resolve(ScenarioLibrary::parse_index(Some("-1"))),
                default
            );
        }
    }

    #[test]
    fn test_resolve_zero_is_stable_baseline() {
        let settings = ScenarioLibrary::builtin(ScenarioTable::Settings);
        let first = settings.resolve(Some(0)).clone();
        for _ in 0..10 {
            assert_eq!(settings.resolve(Some(0)), &first);
        }
        assert_eq!(first.name, "baseline");

        let general = ScenarioLibrary::builtin(ScenarioTable::General);
        assert_eq!(general.name(Some(0)), "smoke");
    }

    #[test]
    fn test_settings_table() {
        let library = ScenarioLibrary::builtin(ScenarioTable::Settings);
        let names: Vec<_> = library.profiles.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["baseline", "rate5", "rate10", "rate25", "stressRate"]);

        assert!(!library.resolve(Some(0)).shape.is_open_loop());
        assert!(library.resolve(Some(2)).shape.is_open_loop());
        assert_eq!(library.resolve(Some(3)).shape.max_vus(), 30);
        assert_eq!(
            library.resolve(Some(4)).shape.planned_duration(),
            Some(Duration::from_secs(600))
        );
        library.validate().unwrap();
    }

    #[test]
    fn test_general_table_thresholds() {
        let library = ScenarioLibrary::builtin(ScenarioTable::General);
        assert!(library.resolve(Some(0)).thresholds.is_empty());
        assert_eq!(
            library.resolve(Some(1)).thresholds["http_req_duration"],
            vec!["p(95)<500", "p(99)<1500"]
        );
        assert_eq!(library.resolve(Some(1)).shape.max_vus(), 6);
    }

    #[test]
    fn test_parse_index() {
        assert_eq!(ScenarioLibrary::parse_index(Some("2")), Some(2));
        assert_eq!(ScenarioLibrary::parse_index(Some(" 3 ")), Some(3));
        assert_eq!(ScenarioLibrary::parse_index(Some("")), None);
        assert_eq!(ScenarioLibrary::parse_index(None), None);
    }

    #[test]
    fn test_duration_format_roundtrip() {
        assert_eq!(parse_duration("2m30s").unwrap(), Duration::from_secs(150));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert!(parse_duration("5x").is_err());
        assert!(parse_duration("m").is_err());

        assert_eq!(format_duration(Duration::from_secs(150)), "2m30s");
        assert_eq!(format_duration(Duration::from_millis(500)), "500ms");
        assert_eq!(format_duration(Duration::from_secs(3600)), "1h");
    }

    #[test]
    fn test_library_from_yaml() {
        let yaml = r#"
name: soak
description: Long-running soak
profiles:
  - name: warm
    shape:
      executor: constant-vus
      vus: 4
      duration: 10m
  - name: spike
    shape:
      executor: ramping-arrival-rate
      stages:
        - { duration: 30s, target: 50 }
        - { duration: 30s, target: 0 }
      pre_allocated_vus: 60
    thresholds:
      http_req_failed: ["rate<0.05"]
"#;
        let library: ScenarioLibrary = serde_yaml::from_str(yaml).unwrap();
        library.validate().unwrap();

        assert_eq!(library.name(None), "warm");
        let spike = library.resolve(Some(1));
        assert!(spike.shape.is_open_loop());
        assert_eq!(spike.shape.planned_duration(), Some(Duration::from_secs(60)));
        match &spike.shape {
            WorkloadShape::RampingArrivalRate { time_unit, start_rate, .. } => {
                assert_eq!(*time_unit, Duration::from_secs(1));
                assert_eq!(*start_rate, 0);
            }
            other => panic!("unexpected shape {:?}", other),
        }
    }

    #[test]
    fn test_empty_library_rejected() {
        assert!(matches!(
            ScenarioLibrary::new("empty", "", Vec::new()),
            Err(HarnessError::ScenarioFile(_))
        ));

        let parsed = serde_yaml::from_str::<ScenarioLibrary>("name: x\nprofiles: []");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_invalid_shape_rejected_on_parse() {
        let yaml = r#"
name: broken
profiles:
  - name: zero
    shape:
      executor: constant-vus
      vus: 0
      duration: 10s
"#;
        assert!(serde_yaml::from_str::<ScenarioLibrary>(yaml).is_err());
    }

    #[test]
    fn test_executor_names_parse_back() {
        let tables = [ScenarioTable::Settings, ScenarioTable::General];
        let shapes: Vec<WorkloadShape> = tables
            .iter()
            .flat_map(|t| ScenarioLibrary::builtin(*t).profiles().to_vec())
            .map(|p| p.shape)
            .chain([WorkloadShape::FixedIterations {
                vus: 2,
                iterations: 4,
                per_vu: false,
            }])
            .collect();

        for shape in shapes {
            let yaml = serde_yaml::to_string(&shape).unwrap();
            assert!(
                yaml.contains(&format!("executor: {}", shape.executor())),
                "{}",
                yaml
            );
            let parsed: WorkloadShape = serde_yaml::from_str(&yaml).unwrap();
            assert_eq!(parsed, shape);
        }

        for (name, per_vu) in [("shared-iterations", false), ("per-vu-iterations", true)] {
            let yaml = format!("executor: {}\nvus: 1\niterations: 3", name);
            let shape: WorkloadShape = serde_yaml::from_str(&yaml).unwrap();
            assert_eq!(shape.executor(), name);
            assert_eq!(
                shape,
                WorkloadShape::FixedIterations {
                    vus: 1,
                    iterations: 3,
                    per_vu
                }
            );
        }

        let legacy: WorkloadShape =
            serde_yaml::from_str("executor: fixed-iterations\nvus: 2\niterations: 5\nper_vu: true").unwrap();
        assert_eq!(legacy.executor(), "per-vu-iterations");
    }
}
