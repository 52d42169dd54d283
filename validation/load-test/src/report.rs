//! Results reporting and formatting.

use crate::error::HarnessResult;
use crate::metrics::{LatencySummary, TestResults, HTTP_REQ_DURATION};
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use std::borrow::Cow;
use std::path::Path;
use tracing::info;

/// Formats test results for output.
pub struct ResultsReport;

impl ResultsReport {
    /// Format results as a console table.
    pub fn format_table(results: &TestResults) -> String {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![
                format!("Load Test Results: {}", results.labels.test_name),
                String::new(),
            ]);

        table.add_row(vec!["Scenario:", &format!(
            "{} ({})",
            results.labels.scenario_name, results.labels.executor
        )]);
        table.add_row(vec!["Flow:", &results.labels.flow]);
        table.add_row(vec!["Duration:", &format!("{:.1}s", results.duration_secs)]);
        table.add_row(vec!["Iterations:", &format!(
            "{} ({} dropped)",
            results.iterations, results.dropped_iterations
        )]);
        table.add_row(vec!["Total Requests:", &results.total_requests.to_string()]);
        table.add_row(vec![
            "Failed Requests:",
            &format!(
                "{} ({:.2}%)",
                results.failed_requests,
                results.failure_rate() * 100.0
            ),
        ]);
        table.add_row(vec![
            "Requests/sec:",
            &format!("{:.1}", results.requests_per_second),
        ]);

        table.add_row(vec!["", ""]);
        table.add_row(vec!["Latency (ms)", "p50 / p90 / p95 / p99 / max"]);
        table.add_row(vec![HTTP_REQ_DURATION.to_string(), latency_cell(&results.http_req_duration)]);
        for (name, summary) in &results.trends {
            table.add_row(vec![name.clone(), latency_cell(summary)]);
        }

        if !results.counters.is_empty() {
            table.add_row(vec!["", ""]);
            for (name, value) in &results.counters {
                table.add_row(vec![format!("{}:", name), value.to_string()]);
            }
        }

        if !results.thresholds.is_empty() {
            table.add_row(vec!["", ""]);
            table.add_row(vec!["Thresholds", if results.passed() { "PASSED" } else { "FAILED" }]);
            for outcome in &results.thresholds {
                table.add_row(vec![String::new(), outcome.to_string()]);
            }
        }

        table.to_string()
    }

    /// Format results as JSON.
    pub fn format_json(results: &TestResults) -> HarnessResult<String> {
        Ok(serde_json::to_string_pretty(results)?)
    }

    /// Format results as CSV row.
    pub fn format_csv(results: &TestResults) -> String {
        let d = &results.http_req_duration;
        format!(
            "{},{},{},{},{},{:.1},{},{},{},{:.1},{:.1},{:.1},{:.1},{}",
            csv_field(&results.timestamp),
            csv_field(&results.labels.test_name),
            results.labels.project_id,
            csv_field(&results.labels.scenario_name),
            csv_field(&results.labels.flow),
            results.duration_secs,
            results.iterations,
            results.total_requests,
            results.failed_requests,
            results.requests_per_second,
            d.p50,
            d.p95,
            d.p99,
            results.passed()
        )
    }

    /// CSV header row.
    pub fn csv_header() -> &'static str {
        "timestamp,test_name,project_id,scenario,flow,duration,iterations,requests,failed,rps,p50,p95,p99,passed"
    }

    /// Render a self-contained HTML page.
    pub fn format_html(results: &TestResults) -> String {
        let labels = &results.labels;
        let status = if results.passed() { "passed" } else { "failed" };

        format!(
            r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Load Test Report - {title}</title>
    <style>
        body {{ font-family: Arial, sans-serif; margin: 20px; }}
        .header {{ background-color: #f4f4f4; padding: 20px; border-radius: 5px; }}
        .stats {{ display: flex; gap: 20px; margin: 20px 0; }}
        .stat-card {{ background: #fff; border: 1px solid #ddd; padding: 15px; border-radius: 5px; flex: 1; }}
        .passed {{ border-left: 4px solid #28a745; }}
        .failed {{ border-left: 4px solid #dc3545; }}
        table {{ border-collapse: collapse; margin: 10px 0 30px; }}
        th, td {{ border: 1px solid #ddd; padding: 6px 12px; text-align: right; }}
        th:first-child, td:first-child {{ text-align: left; }}
        tr.passed td {{ background-color: #d4edda; }}
        tr.failed td {{ background-color: #f8d7da; }}
    </style>
</head>
<body>
    <div class="header {status}">
        <h1>Load Test Report: {title}</h1>
        <p>Generated at: {timestamp}</p>
        <p>Project: {project} &middot; Scenario: {scenario} ({executor}) &middot; Flow: {flow}</p>
        <p>Target: {base_url}</p>
    </div>

    <div class="stats">
        <div class="stat-card"><h3>Duration</h3><p>{duration:.1}s</p></div>
        <div class="stat-card"><h3>Iterations</h3><p>{iterations} ({dropped} dropped)</p></div>
        <div class="stat-card"><h3>Requests</h3><p>{requests} ({rps:.1}/s)</p></div>
        <div class="stat-card {status}"><h3>Failed</h3><p>{failed} ({failure_rate:.2}%)</p></div>
    </div>

    <h2>Latency (ms)</h2>
    <table>
        <tr><th>Metric</th><th>Count</th><th>Min</th><th>Avg</th><th>p50</th><th>p90</th><th>p95</th><th>p99</th><th>Max</th></tr>
        {latency_rows}
    </table>

    {counters}

    {thresholds}
</body>
</html>"#,
            title = escape_html(&labels.test_name),
            status = status,
            timestamp = escape_html(&results.timestamp),
            project = labels.project_id,
            scenario = escape_html(&labels.scenario_name),
            executor = escape_html(&labels.executor),
            flow = escape_html(&labels.flow),
            base_url = escape_html(&labels.base_url),
            duration = results.duration_secs,
            iterations = results.iterations,
            dropped = results.dropped_iterations,
            requests = results.total_requests,
            rps = results.requests_per_second,
            failed = results.failed_requests,
            failure_rate = results.failure_rate() * 100.0,
            latency_rows = Self::latency_rows_html(results),
            counters = Self::counters_html(results),
            thresholds = Self::thresholds_html(results),
        )
    }

    /// Write the HTML report to `path`.
    pub fn write_html(results: &TestResults, path: impl AsRef<Path>) -> HarnessResult<()> {
        let path = path.as_ref();
        std::fs::write(path, Self::format_html(results))?;
        info!(path = %path.display(), "Report written");
        Ok(())
    }

    fn latency_rows_html(results: &TestResults) -> String {
        std::iter::once((HTTP_REQ_DURATION, &results.http_req_duration))
            .chain(results.trends.iter().map(|(n, s)| (n.as_str(), s)))
            .map(|(name, s)| {
                format!(
                    "<tr><td>{}</td><td>{}</td><td>{:.2}</td><td>{:.2}</td><td>{:.2}</td><td>{:.2}</td><td>{:.2}</td><td>{:.2}</td><td>{:.2}</td></tr>",
                    escape_html(name),
                    s.count,
                    s.min,
                    s.avg,
                    s.p50,
                    s.p90,
                    s.p95,
                    s.p99,
                    s.max
                )
            })
            .collect::<Vec<_>>()
            .join("\n        ")
    }

    fn counters_html(results: &TestResults) -> String {
        if results.counters.is_empty() {
            return String::new();
        }

        let mut html = String::from("<h2>Counters</h2>\n    <table>\n        <tr><th>Metric</th><th>Value</th></tr>");
        for (name, value) in &results.counters {
            html.push_str(&format!(
                "\n        <tr><td>{}</td><td>{}</td></tr>",
                escape_html(name),
                value
            ));
        }
        html.push_str("\n    </table>");
        html
    }

    fn thresholds_html(results: &TestResults) -> String {
        if results.thresholds.is_empty() {
            return String::new();
        }

        let mut html = String::from(
            "<h2>Thresholds</h2>\n    <table>\n        <tr><th>Metric</th><th>Condition</th><th>Actual</th><th>Result</th></tr>",
        );
        for outcome in &results.thresholds {
            let (class, label) = if outcome.passed {
                ("passed", "pass")
            } else {
                ("failed", "fail")
            };
            let actual = match (&outcome.actual, &outcome.reason) {
                (Some(actual), _) => format!("{:.4}", actual),
                (None, Some(reason)) => escape_html(reason),
                (None, None) => String::new(),
            };
            html.push_str(&format!(
                "\n        <tr class=\"{}\"><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                class,
                escape_html(&outcome.metric),
                escape_html(&outcome.expression),
                actual,
                label
            ));
        }
        html.push_str("\n    </table>");
        html
    }
}

fn latency_cell(s: &LatencySummary) -> String {
    format!(
        "{:.1} / {:.1} / {:.1} / {:.1} / {:.1}",
        s.p50, s.p90, s.p95, s.p99, s.max
    )
}

/// Quote a CSV field (RFC 4180) when it holds a delimiter, quote or line break.
fn csv_field(s: &str) -> Cow<'_, str> {
    if s.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", s.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(s)
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{MetricsRegistry, RunLabels};
    use crate::thresholds::ThresholdSet;
    use std::time::Duration;

    fn sample_results() -> TestResults {
        let registry = MetricsRegistry::new();
        registry.register_trend("CreateBook");
        registry.register_counter("CreateBookErrors");
        for ms in [12, 15, 40] {
            registry.observe("CreateBook", Duration::from_millis(ms));
            registry.record_request(Duration::from_millis(ms), false);
            registry.record_iteration();
        }
        registry.add("CreateBookErrors", 1);

        let mut thresholds = ThresholdSet::new();
        thresholds.add("http_req_duration", "p(95)<500").unwrap();
        thresholds.add("CreateBookErrors", "count<1").unwrap();

        let mut results = registry.results(RunLabels {
            test_name: "create-<smoke>".to_string(),
            project_id: 42,
            scenario_name: "smoke".to_string(),
            executor: "shared-iterations".to_string(),
            flow: "create".to_string(),
            base_url: "http://localhost:8080".to_string(),
        });
        results.thresholds = thresholds.evaluate(&registry);
        results
    }

    #[test]
    fn test_format_table() {
        let table = ResultsReport::format_table(&sample_results());
        assert!(table.contains("create-<smoke>"));
        assert!(table.contains("CreateBookErrors"));
        assert!(table.contains("FAILED"));
    }

    #[test]
    fn test_format_json() {
        let json = ResultsReport::format_json(&sample_results()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["total_requests"], 3);
        assert_eq!(value["counters"]["CreateBookErrors"], 1);
        assert_eq!(value["labels"]["project_id"], 42);
    }

    #[test]
    fn test_csv_matches_header() {
        let row = ResultsReport::format_csv(&sample_results());
        let columns = ResultsReport::csv_header().split(',').count();
        assert_eq!(row.split(',').count(), columns);
        assert!(row.ends_with(",false"));
    }

    #[test]
    fn test_csv_quotes_labels() {
        let mut results = sample_results();
        results.labels.test_name = "books, \"nightly\"".to_string();
        results.labels.scenario_name = "spike,peak".to_string();

        let row = ResultsReport::format_csv(&results);
        assert!(row.contains(",\"books, \"\"nightly\"\"\",42,\"spike,peak\",create,"));
        // Fields outside quotes still line up with the header.
        let unquoted = row.split('"').step_by(2).collect::<String>();
        assert_eq!(
            unquoted.split(',').count(),
            ResultsReport::csv_header().split(',').count()
        );

        assert_eq!(csv_field("smoke"), "smoke");
        assert_eq!(csv_field("a\nb"), "\"a\nb\"");
    }

    #[test]
    fn test_format_html() {
        let html = ResultsReport::format_html(&sample_results());
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("create-&lt;smoke&gt;"));
        assert!(!html.contains("create-<smoke>"));
        assert!(html.contains("<td>CreateBook</td>"));
        assert!(html.contains("<tr class=\"failed\"><td>CreateBookErrors</td>"));
        assert!(html.contains("<tr class=\"passed\"><td>http_req_duration</td>"));
    }

    #[test]
    fn test_write_html() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("general.html");
        ResultsReport::write_html(&sample_results(), &path).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("Load Test Report"));
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("a<b>&\"c'"), "a&lt;b&gt;&amp;&quot;c&#39;");
    }
}
